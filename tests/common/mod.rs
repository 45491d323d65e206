#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use netznoe_smartmeter::{
    config::{AuthConfig, Config, DbConfig, PortalConfig, ServerConfig, SyncConfig},
    domain::{AccountInfo, MeterResolution, MeteringPoint},
    portal::{ConsumptionRecord, PortalError, SmartmeterApi},
    setup::SelectedMeter,
    store::{SqliteStatisticsStore, StatisticsStore},
    sync::AppState,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub const METER_ID: &str = "AT0020000000000000000000100000001";

/// In-process portal returning hourly readings of 1 kWh for every day.
pub struct FakePortal {
    pub reject_login: bool,
    pub active: bool,
    pub day_calls: AtomicUsize,
    /// Latency of every day query.
    pub day_delay: Duration,
}

impl FakePortal {
    pub fn healthy() -> Self {
        Self {
            reject_login: false,
            active: true,
            day_calls: AtomicUsize::new(0),
            day_delay: Duration::ZERO,
        }
    }

    pub fn slow(day_delay: Duration) -> Self {
        Self { day_delay, ..Self::healthy() }
    }

    pub fn rejecting_login() -> Self {
        Self { reject_login: true, ..Self::healthy() }
    }

    pub fn day_calls(&self) -> usize {
        self.day_calls.load(Ordering::SeqCst)
    }

    fn point(&self) -> MeteringPoint {
        let mut point = MeteringPoint::new(METER_ID);
        point.account_id = Some("4711".to_string());
        point.smart_meter_type = Some("L&G E450".to_string());
        point.communicative = true;
        point.locked = !self.active;
        point
    }
}

#[async_trait]
impl SmartmeterApi for FakePortal {
    async fn login(&self) -> Result<(), PortalError> {
        if self.reject_login {
            return Err(PortalError::Login(
                "Login failed (HTTP 401). Check username/password.".to_string(),
            ));
        }
        Ok(())
    }

    async fn account_info(&self) -> Result<AccountInfo, PortalError> {
        Ok(AccountInfo::from_metering_point(&self.point()))
    }

    async fn metering_points(&self) -> Result<Vec<MeteringPoint>, PortalError> {
        Ok(vec![self.point()])
    }

    async fn consumption_day(
        &self,
        _day: NaiveDate,
        _meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError> {
        self.day_calls.fetch_add(1, Ordering::SeqCst);
        if !self.day_delay.is_zero() {
            tokio::time::sleep(self.day_delay).await;
        }
        Ok(ConsumptionRecord { peak_demand_times: Vec::new(), values: vec![Some(1.0); 24] })
    }

    async fn consumption_month(
        &self,
        _year: i32,
        _month: u32,
        _meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError> {
        Ok(ConsumptionRecord { peak_demand_times: Vec::new(), values: vec![Some(10.0); 31] })
    }

    async fn consumption_year(
        &self,
        _year: i32,
        _meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError> {
        Ok(ConsumptionRecord { peak_demand_times: Vec::new(), values: vec![Some(3650.0)] })
    }
}

pub fn test_config(token: &str) -> Config {
    Config {
        portal: PortalConfig {
            base_url: "http://127.0.0.1:9/api/".to_string(),
            auth_url: "http://127.0.0.1:9/auth/".to_string(),
            username: "user@example.com".to_string(),
            password: "secret".to_string(),
            http_timeout_seconds: 5,
        },
        sync: SyncConfig { initial_history_days: 2, ..SyncConfig::default() },
        meters: Vec::new(),
        db: DbConfig { url: "sqlite::memory:".to_string(), max_connections: 1 },
        server: ServerConfig::default(),
        auth: AuthConfig { token: token.to_string() },
    }
}

pub async fn test_state(portal: Arc<FakePortal>, token: &str) -> AppState {
    test_state_with(portal, test_config(token)).await
}

pub async fn test_state_with(portal: Arc<FakePortal>, cfg: Config) -> AppState {
    let store: Arc<dyn StatisticsStore> = Arc::new(
        SqliteStatisticsStore::in_memory().await.expect("in-memory store"),
    );
    AppState::from_parts(
        cfg,
        portal,
        store,
        vec![SelectedMeter { id: METER_ID.to_string(), resolution: MeterResolution::QuarterHourly }],
    )
}
