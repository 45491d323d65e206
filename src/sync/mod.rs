//! Application state and periodic sync of all meters.

pub mod scheduler;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::info;

use crate::{
    config::Config,
    importer::ImportSettings,
    portal::{NetzNoeClient, SmartmeterApi},
    sensor::MeterSensor,
    setup::{select_meters, validate_auth, SelectedMeter},
    store::{SqliteStatisticsStore, StatisticsStore},
};

pub use scheduler::{SyncScheduler, TaskStatus};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<dyn StatisticsStore>,
    pub scheduler: Arc<SyncScheduler>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let api: Arc<dyn SmartmeterApi> = Arc::new(NetzNoeClient::new(&cfg.portal)?);
        let store: Arc<dyn StatisticsStore> = Arc::new(SqliteStatisticsStore::connect(&cfg.db).await?);

        let setup = validate_auth(api.as_ref())
            .await
            .map_err(|e| anyhow!("Cannot connect to Netz NO: {e} ({})", e.code()))?;

        let meters = select_meters(&setup.metering_points, &cfg.meters);
        if meters.is_empty() {
            return Err(anyhow!("Cannot connect to Netz NO: no active metering point to sync"));
        }
        info!(meters = ?meters.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), "meters selected");

        Ok(Self::from_parts(cfg, api, store, meters))
    }

    /// Assemble state from already constructed parts.
    pub fn from_parts(
        cfg: Config,
        api: Arc<dyn SmartmeterApi>,
        store: Arc<dyn StatisticsStore>,
        meters: Vec<SelectedMeter>,
    ) -> Self {
        let settings = ImportSettings::from(&cfg.sync);
        let sensors = meters
            .into_iter()
            .map(|meter| {
                Arc::new(MeterSensor::new(
                    meter,
                    api.clone(),
                    store.clone(),
                    &cfg.sync.unit_of_measurement,
                    settings,
                ))
            })
            .collect();
        let scheduler = Arc::new(SyncScheduler::new(sensors, cfg.sync.scan_interval()));

        Self { cfg: Arc::new(cfg), store, scheduler }
    }
}
