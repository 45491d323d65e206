//! Client for the Netz NÖ smartmeter portal.

pub mod client;
pub mod constants;
pub mod error;
pub mod models;

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{AccountInfo, MeteringPoint};

pub use client::{Credentials, NetzNoeClient};
pub use error::PortalError;
pub use models::ConsumptionRecord;

/// Operations the sync needs from the portal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmartmeterApi: Send + Sync {
    /// Authenticate, reusing a still valid session.
    async fn login(&self) -> Result<(), PortalError>;

    async fn account_info(&self) -> Result<AccountInfo, PortalError>;

    async fn metering_points(&self) -> Result<Vec<MeteringPoint>, PortalError>;

    async fn consumption_day(
        &self,
        day: NaiveDate,
        meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError>;

    async fn consumption_month(
        &self,
        year: i32,
        month: u32,
        meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError>;

    async fn consumption_year(
        &self,
        year: i32,
        meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError>;
}

/// Consumption of a single day within a historical range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyConsumption {
    pub date: NaiveDate,
    pub record: ConsumptionRecord,
}

/// Fetch daily consumption for every day in `start..=end`, `end` defaulting
/// to today.
///
/// Days whose query fails are logged and left out.
pub async fn historical_consumption(
    api: &dyn SmartmeterApi,
    start: NaiveDate,
    end: Option<NaiveDate>,
    meter_id: &str,
) -> Result<Vec<DailyConsumption>, PortalError> {
    let end = end.unwrap_or_else(|| Local::now().date_naive());
    let mut out = Vec::new();
    let mut current = start;
    while current <= end {
        match api.consumption_day(current, meter_id).await {
            Ok(record) => out.push(DailyConsumption { date: current, record }),
            Err(e) if e.is_query() => {
                warn!(date = %current, error = %e, "could not fetch consumption");
            }
            Err(e) => return Err(e),
        }
        current = match current.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(out)
}

/// Total consumption of yesterday, falling back to the day before.
///
/// Returns `None` when neither day has readings yet.
pub async fn latest_meter_reading(
    api: &dyn SmartmeterApi,
    meter_id: &str,
    today: NaiveDate,
) -> Option<f64> {
    for days_ago in [1u64, 2] {
        let Some(day) = today.checked_sub_days(Days::new(days_ago)) else {
            continue;
        };
        debug!(%day, meter_id, "fetching latest consumption");
        match api.consumption_day(day, meter_id).await {
            Ok(record) if !record.is_empty() => {
                let total = record.total();
                debug!(%day, total_kwh = total, "daily total");
                return Some(total);
            }
            Ok(_) => {}
            Err(e) => warn!(days_ago, error = %e, "could not get meter reading"),
        }
    }
    None
}
