//! Imports portal consumption into the statistics store.
//!
//! Quarter-hourly meters are aggregated into hourly buckets, daily meters
//! become one point per day at midnight UTC. Every point carries the running
//! total so the series can be continued by later incremental imports.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::{collections::BTreeMap, str::FromStr, sync::Arc};
use tracing::{debug, error, info, warn};

use crate::{
    config::SyncConfig,
    domain::{statistic_id, LastStatistic, MeterResolution, StatisticMetadata, StatisticPoint},
    portal::SmartmeterApi,
    store::StatisticsStore,
};

const MINUTES_PER_DAY: i64 = 24 * 60;
const MAX_SETTING_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    /// Minimum age of the last statistic before the portal is queried again.
    pub min_wait: Duration,
    /// History fetched when a series has no statistics yet.
    pub initial_history: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self { min_wait: Duration::hours(24), initial_history: Duration::days(365 * 3) }
    }
}

impl From<&SyncConfig> for ImportSettings {
    fn from(cfg: &SyncConfig) -> Self {
        let hours = |h: u64| Duration::hours(h.min(MAX_SETTING_HOURS) as i64);
        Self {
            min_wait: hours(cfg.min_wait_hours),
            initial_history: hours(cfg.initial_history_days.saturating_mul(24)),
        }
    }
}

pub struct Importer {
    api: Arc<dyn SmartmeterApi>,
    store: Arc<dyn StatisticsStore>,
    metering_point_id: String,
    statistic_id: String,
    unit_of_measurement: String,
    resolution: MeterResolution,
    settings: ImportSettings,
}

impl Importer {
    pub fn new(
        api: Arc<dyn SmartmeterApi>,
        store: Arc<dyn StatisticsStore>,
        metering_point_id: impl Into<String>,
        unit_of_measurement: impl Into<String>,
        resolution: MeterResolution,
    ) -> Self {
        let metering_point_id = metering_point_id.into();
        Self {
            api,
            store,
            statistic_id: statistic_id(&metering_point_id),
            metering_point_id,
            unit_of_measurement: unit_of_measurement.into(),
            resolution,
            settings: ImportSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ImportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn statistic_id(&self) -> &str {
        &self.statistic_id
    }

    pub fn metadata(&self) -> StatisticMetadata {
        StatisticMetadata::for_metering_point(&self.metering_point_id, &self.unit_of_measurement)
    }

    /// Import everything new up to `now` and return the cumulative total.
    ///
    /// Failures are logged and reported as `None`.
    pub async fn import(&self, now: DateTime<Utc>) -> Option<Decimal> {
        match self.try_import(now).await {
            Ok(total) => Some(total),
            Err(e) if is_timeout(&e) => {
                warn!(statistic_id = %self.statistic_id, error = %e, "timeout during import");
                None
            }
            Err(e) => {
                error!(statistic_id = %self.statistic_id, error = ?e, "error during import");
                None
            }
        }
    }

    async fn try_import(&self, now: DateTime<Utc>) -> Result<Decimal> {
        let last = self.store.last_statistic(&self.statistic_id).await?;
        debug!(statistic_id = %self.statistic_id, ?last, "last inserted statistic");

        match last {
            None => {
                warn!(
                    metering_point_id = %self.metering_point_id,
                    "Starting initial import. This may take some time."
                );
                self.import_range(now - self.settings.initial_history, now, Decimal::ZERO).await
            }
            Some(last) => match self.start_off_point(&last, now) {
                Some((start, sum)) => self.import_range(start, now, sum).await,
                None => Ok(last.sum),
            },
        }
    }

    /// Where an incremental import continues, or `None` while the last
    /// statistic is too recent to expect new data.
    pub fn start_off_point(
        &self,
        last: &LastStatistic,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, Decimal)> {
        let end = last.end.with_nanosecond(0).unwrap_or(last.end);
        let delta = now - end;
        if delta <= self.settings.min_wait {
            debug!(
                statistic_id = %self.statistic_id,
                next_update_in = %(self.settings.min_wait - delta),
                "last update is recent, skipping portal query"
            );
            return None;
        }
        Some((last.end, last.sum))
    }

    async fn import_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        total: Decimal,
    ) -> Result<Decimal> {
        debug!(%start, %end, resolution = %self.resolution, "importing consumption");
        if start > end {
            warn!(%start, %end, "start is after end, skipping import");
            return Ok(total);
        }

        let readings = match self.resolution {
            MeterResolution::QuarterHourly => self.hourly_readings(start, end).await,
            MeterResolution::Daily => self.daily_readings(start, end).await?,
        };

        let (points, total) = accumulate(readings, total);
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            info!(
                statistic_id = %self.statistic_id,
                count = points.len(),
                from = %first.start,
                to = %last.start,
                "importing statistics"
            );
            self.store.add_statistics(&self.metadata(), &points).await?;
        }
        Ok(total)
    }

    async fn hourly_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BTreeMap<DateTime<Utc>, Decimal> {
        let mut hourly = BTreeMap::new();
        let end_date = end.date_naive();
        let mut day = start.date_naive();

        while day <= end_date {
            match self.api.consumption_day(day, &self.metering_point_id).await {
                Ok(record) => bucket_hourly(&mut hourly, day, &record.values, start),
                Err(e) => debug!(%day, error = %e, "could not fetch day"),
            }
            day = match day.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        hourly
    }

    async fn daily_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<DateTime<Utc>, Decimal>> {
        let mut daily = BTreeMap::new();
        let start_date = start.date_naive();
        let end_date = end.date_naive();
        let mut month = start_date.with_day(1).context("invalid import start date")?;

        while month <= end_date {
            match self
                .api
                .consumption_month(month.year(), month.month(), &self.metering_point_id)
                .await
            {
                Ok(record) => collect_days(&mut daily, month, &record.values, start_date, end_date),
                Err(e) => debug!(
                    year = month.year(),
                    month = month.month(),
                    error = %e,
                    "could not fetch month"
                ),
            }
            month = match month.checked_add_months(Months::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(daily)
    }
}

/// Sum one day of interval readings into hourly buckets.
///
/// Reading `i` lies `i * (1440 / len)` minutes after midnight UTC. Buckets
/// before `not_before` are already imported and skipped.
fn bucket_hourly(
    hourly: &mut BTreeMap<DateTime<Utc>, Decimal>,
    day: NaiveDate,
    values: &[Option<f64>],
    not_before: DateTime<Utc>,
) {
    if values.is_empty() {
        return;
    }
    let interval = (MINUTES_PER_DAY / values.len() as i64).max(1);
    let midnight = day.and_time(NaiveTime::MIN).and_utc();

    for (i, value) in values.iter().enumerate() {
        let offset = i as i64 * interval;
        if offset >= MINUTES_PER_DAY {
            break;
        }
        let Some(value) = value.and_then(to_decimal) else {
            continue;
        };
        let hour_start = midnight + Duration::hours(offset / 60);
        if hour_start < not_before {
            continue;
        }
        *hourly.entry(hour_start).or_default() += value;
    }
}

/// Map a month of daily readings onto midnight UTC of each day.
///
/// Days up to and including `start_date` hold the last imported value.
fn collect_days(
    daily: &mut BTreeMap<DateTime<Utc>, Decimal>,
    month_start: NaiveDate,
    values: &[Option<f64>],
    start_date: NaiveDate,
    end_date: NaiveDate,
) {
    for (i, value) in values.iter().enumerate() {
        let Some(date) = u32::try_from(i + 1).ok().and_then(|d| month_start.with_day(d)) else {
            break;
        };
        let Some(value) = value.and_then(to_decimal) else {
            continue;
        };
        if date <= start_date || date > end_date {
            continue;
        }
        daily.insert(date.and_time(NaiveTime::MIN).and_utc(), value);
    }
}

fn accumulate(
    readings: BTreeMap<DateTime<Utc>, Decimal>,
    mut total: Decimal,
) -> (Vec<StatisticPoint>, Decimal) {
    let points = readings
        .into_iter()
        .map(|(start, usage)| {
            total += usage;
            StatisticPoint { start, state: usage, sum: total }
        })
        .collect();
    (points, total)
}

/// Exact decimal of the shortest representation of a reading.
fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        warn!(value, "ignoring non-finite reading");
        return None;
    }
    match Decimal::from_str(&value.to_string()) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(value, error = %e, "ignoring unrepresentable reading");
            None
        }
    }
}

fn is_timeout(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<sqlx::Error>(), Some(sqlx::Error::PoolTimedOut))
}
