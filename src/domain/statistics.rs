use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const STATISTICS_SOURCE: &str = "netznoe";

/// Descriptor of a long-term statistic series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticMetadata {
    pub source: String,
    pub statistic_id: String,
    pub name: String,
    pub unit_of_measurement: String,
    pub has_mean: bool,
    pub has_sum: bool,
}

impl StatisticMetadata {
    pub fn for_metering_point(metering_point_id: &str, unit: &str) -> Self {
        Self {
            source: STATISTICS_SOURCE.to_string(),
            statistic_id: statistic_id(metering_point_id),
            name: format!("Netz NO {metering_point_id}"),
            unit_of_measurement: unit.to_string(),
            has_mean: false,
            has_sum: true,
        }
    }
}

/// Statistic id of a metering point, e.g. `netznoe:at0020000000000000000000100000001`.
pub fn statistic_id(metering_point_id: &str) -> String {
    format!("{STATISTICS_SOURCE}:{}", metering_point_id.to_lowercase())
}

/// One bucket of a statistic: its usage (`state`) and the running total (`sum`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticPoint {
    pub start: DateTime<Utc>,
    pub state: Decimal,
    pub sum: Decimal,
}

/// The most recent stored point of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastStatistic {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub state: Decimal,
    pub sum: Decimal,
}

impl From<StatisticPoint> for LastStatistic {
    /// Every bucket is stored with an hourly period, regardless of meter resolution.
    fn from(point: StatisticPoint) -> Self {
        Self {
            start: point.start,
            end: point.start + Duration::hours(1),
            state: point.state,
            sum: point.sum,
        }
    }
}
