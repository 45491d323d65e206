use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Granularity of the consumption data a meter delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MeterResolution {
    /// 15-minute interval data ("FTM"), aggregated into hourly statistics.
    QuarterHourly,
    /// One value per day, fetched month by month.
    Daily,
}

impl MeterResolution {
    pub fn has_ftm_meter_data(self) -> bool {
        matches!(self, MeterResolution::QuarterHourly)
    }
}

/// A metering point as returned by the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringPoint {
    pub metering_point_id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub smart_meter_type: Option<String>,
    #[serde(default)]
    pub communicative: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MeteringPoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            metering_point_id: id.into(),
            account_id: None,
            smart_meter_type: None,
            communicative: false,
            locked: false,
            extra: Map::new(),
        }
    }

    pub fn has_smart_meter(&self) -> bool {
        self.smart_meter_type.is_some()
    }

    /// Communicative smart meters deliver 15-minute data; others only daily values.
    pub fn default_resolution(&self) -> MeterResolution {
        if self.has_smart_meter() && self.communicative {
            MeterResolution::QuarterHourly
        } else {
            MeterResolution::Daily
        }
    }
}

/// True for an installed smart meter that is not locked.
pub fn is_meter_active(point: &MeteringPoint) -> bool {
    point.has_smart_meter() && !point.locked
}

/// Account summary derived from the first metering point of the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: Option<String>,
    pub metering_point_id: Option<String>,
    pub has_smart_meter: bool,
    pub has_communicative: bool,
    pub has_active: bool,
}

impl AccountInfo {
    pub fn from_metering_point(point: &MeteringPoint) -> Self {
        Self {
            account_id: point.account_id.clone(),
            metering_point_id: Some(point.metering_point_id.clone()),
            has_smart_meter: point.has_smart_meter(),
            has_communicative: point.communicative,
            has_active: !point.locked,
        }
    }

    pub fn is_active(&self) -> bool {
        self.has_active && self.has_smart_meter
    }
}
