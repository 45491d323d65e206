pub const BASE_URL: &str = "https://smartmeter.netz-noe.at/orchestration/";
pub const AUTH_URL: &str = "https://smartmeter.netz-noe.at/orchestration/Authentication/Login";

// Relative to BASE_URL.
pub const ENDPOINT_USER_INFO: &str = "User/GetBasicInfo";
pub const ENDPOINT_METERING_POINTS: &str = "User/GetMeteringPointsByBusinesspartnerId?context=2";
pub const ENDPOINT_CONSUMPTION_DAY: &str = "ConsumptionRecord/Day";
pub const ENDPOINT_CONSUMPTION_MONTH: &str = "ConsumptionRecord/Month";
pub const ENDPOINT_CONSUMPTION_YEAR: &str = "ConsumptionRecord/Year";

pub const API_DATE_FORMAT: &str = "%Y-%m-%d";
pub const USER_AGENT: &str = "netznoe-smartmeter/0.2";
