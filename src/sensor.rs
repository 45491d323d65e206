//! Energy sensor of one metering point.

use chrono::{DateTime, Local, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    domain::{AccountInfo, MeterResolution},
    importer::{ImportSettings, Importer},
    portal::{PortalError, SmartmeterApi},
    setup::SelectedMeter,
    store::StatisticsStore,
};

pub const LAST_UPDATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
pub const UNIT_KWH: &str = "kWh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated,
    /// The account is not active, nothing was fetched.
    Inactive,
    /// Another update of this sensor is still running.
    Skipped,
    Failed(String),
}

#[derive(Debug, Default)]
struct SensorState {
    value: Option<Decimal>,
    unavailable: bool,
    last_update: Option<String>,
    account: Option<AccountInfo>,
}

/// Serializable view of a sensor.
#[derive(Debug, Clone, Serialize)]
pub struct SensorSnapshot {
    pub entity_id: String,
    pub unique_id: String,
    pub name: String,
    pub state: Option<String>,
    pub available: bool,
    pub unit_of_measurement: &'static str,
    pub device_class: &'static str,
    pub state_class: &'static str,
    pub icon: &'static str,
    pub attributes: Map<String, Value>,
}

pub struct MeterSensor {
    metering_point_id: String,
    name: String,
    resolution: MeterResolution,
    api: Arc<dyn SmartmeterApi>,
    importer: Importer,
    state: RwLock<SensorState>,
    update_lock: Mutex<()>,
}

impl MeterSensor {
    pub fn new(
        meter: SelectedMeter,
        api: Arc<dyn SmartmeterApi>,
        store: Arc<dyn StatisticsStore>,
        statistics_unit: &str,
        settings: ImportSettings,
    ) -> Self {
        let importer = Importer::new(api.clone(), store, &meter.id, statistics_unit, meter.resolution)
            .with_settings(settings);
        Self {
            name: format!("Smartmeter {}", meter.id),
            metering_point_id: meter.id,
            resolution: meter.resolution,
            api,
            importer,
            state: RwLock::new(SensorState::default()),
            update_lock: Mutex::new(()),
        }
    }

    pub fn metering_point_id(&self) -> &str {
        &self.metering_point_id
    }

    pub fn statistic_id(&self) -> &str {
        self.importer.statistic_id()
    }

    pub fn unique_id(&self) -> String {
        format!("netznoe_{}", self.metering_point_id)
    }

    pub fn entity_id(&self) -> String {
        format!("sensor.{}", slugify(&self.name))
    }

    pub async fn value(&self) -> Option<Decimal> {
        self.state.read().await.value
    }

    pub async fn is_available(&self) -> bool {
        !self.state.read().await.unavailable
    }

    pub fn is_updating(&self) -> bool {
        self.update_lock.try_lock().is_err()
    }

    /// Refresh account data and import new consumption.
    ///
    /// Returns immediately with [`UpdateOutcome::Skipped`] while a previous
    /// update, typically the long initial import, is still running.
    pub async fn update(&self, now: DateTime<Utc>) -> UpdateOutcome {
        let Ok(_guard) = self.update_lock.try_lock() else {
            debug!(
                metering_point_id = %self.metering_point_id,
                "import still in progress, skipping update"
            );
            return UpdateOutcome::Skipped;
        };

        match self.do_update(now).await {
            Ok(outcome) => {
                let mut state = self.state.write().await;
                state.unavailable = false;
                state.last_update = Some(now.with_timezone(&Local).format(LAST_UPDATE_FORMAT).to_string());
                outcome
            }
            Err(e) => {
                if e.is_connection() {
                    warn!(metering_point_id = %self.metering_point_id, error = %e, "Netz NO API unreachable");
                } else {
                    error!(metering_point_id = %self.metering_point_id, error = %e, "error updating sensor");
                }
                self.state.write().await.unavailable = true;
                UpdateOutcome::Failed(e.to_string())
            }
        }
    }

    async fn do_update(&self, now: DateTime<Utc>) -> Result<UpdateOutcome, PortalError> {
        self.api.login().await?;
        debug!(metering_point_id = %self.metering_point_id, "login successful");

        let account = self.api.account_info().await?;
        let active = account.is_active();
        self.state.write().await.account = Some(account);

        if !active {
            warn!(
                metering_point_id = %self.metering_point_id,
                "smart meter is not active, skipping data fetch"
            );
            return Ok(UpdateOutcome::Inactive);
        }

        match self.importer.import(now).await {
            Some(total) => {
                info!(metering_point_id = %self.metering_point_id, %total, "cumulative total updated");
                self.state.write().await.value = Some(total);
            }
            None => debug!(metering_point_id = %self.metering_point_id, "no cumulative total available"),
        }
        Ok(UpdateOutcome::Updated)
    }

    pub async fn snapshot(&self) -> SensorSnapshot {
        let state = self.state.read().await;

        let mut attributes = match state.account.as_ref().map(serde_json::to_value) {
            Some(Ok(Value::Object(map))) => map,
            _ => Map::new(),
        };
        attributes.insert("metering_point_id".into(), Value::from(self.metering_point_id.clone()));
        attributes.insert("last_update".into(), Value::from(state.last_update.clone()));
        attributes.insert(
            "has_ftm_meter_data".into(),
            Value::from(self.resolution.has_ftm_meter_data()),
        );

        SensorSnapshot {
            entity_id: self.entity_id(),
            unique_id: self.unique_id(),
            name: self.name.clone(),
            state: state.value.map(|v| format!("{v:.3}")),
            available: !state.unavailable,
            unit_of_measurement: UNIT_KWH,
            device_class: "energy",
            state_class: "total_increasing",
            icon: "mdi:flash",
            attributes,
        }
    }
}

/// Lowercase, with runs of anything but ASCII letters and digits collapsed to `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}
