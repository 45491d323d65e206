//! Credential validation and meter selection at startup.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    config::MeterConfig,
    domain::{is_meter_active, AccountInfo, MeterResolution, MeteringPoint},
    portal::{PortalError, SmartmeterApi},
};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid Netz NO credentials: {0}")]
    Auth(String),

    #[error("Could not connect to Netz NO API: {0}")]
    Connection(String),

    #[error("No smart meter found for this account")]
    NoSmartmeter,

    #[error("Smart meter is not active")]
    NotActive,
}

impl SetupError {
    /// Stable code for clients, e.g. `connection_error`.
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::Auth(_) => "auth",
            SetupError::Connection(_) => "connection_error",
            SetupError::NoSmartmeter => "no_smartmeter",
            SetupError::NotActive => "not_active",
        }
    }
}

impl From<PortalError> for SetupError {
    fn from(e: PortalError) -> Self {
        match e {
            PortalError::Login(msg) => {
                error!(error = %msg, "invalid Netz NO credentials");
                SetupError::Auth(msg)
            }
            PortalError::Connection(msg) => {
                error!(error = %msg, "could not connect to Netz NO API");
                SetupError::Connection(msg)
            }
            other => {
                error!(error = %other, "unexpected error during Netz NO auth");
                SetupError::Auth(other.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupResult {
    pub account: AccountInfo,
    pub metering_points: Vec<MeteringPoint>,
}

/// A meter the service keeps in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedMeter {
    pub id: String,
    pub resolution: MeterResolution,
}

/// Log in and check that the account has an active smart meter.
pub async fn validate_auth(api: &dyn SmartmeterApi) -> Result<SetupResult, SetupError> {
    api.login().await?;
    let account = api.account_info().await?;
    let metering_points = api.metering_points().await?;

    if !account.has_smart_meter {
        return Err(SetupError::NoSmartmeter);
    }
    if !account.has_active {
        return Err(SetupError::NotActive);
    }

    info!(
        account_id = account.account_id.as_deref().unwrap_or("-"),
        metering_points = metering_points.len(),
        "Netz NO account validated"
    );
    Ok(SetupResult { account, metering_points })
}

/// Meters to sync: the configured ones, or every active meter when none are
/// configured.
///
/// A configured resolution wins over the one derived from the portal.
pub fn select_meters(points: &[MeteringPoint], configured: &[MeterConfig]) -> Vec<SelectedMeter> {
    if configured.is_empty() {
        return points
            .iter()
            .filter(|p| is_meter_active(p))
            .map(|p| SelectedMeter {
                id: p.metering_point_id.clone(),
                resolution: p.default_resolution(),
            })
            .collect();
    }

    configured
        .iter()
        .map(|m| {
            let known = points.iter().find(|p| p.metering_point_id == m.id);
            if known.is_none() {
                warn!(metering_point_id = %m.id, "configured meter not reported by the portal");
            }
            let resolution = m
                .resolution
                .or_else(|| known.map(MeteringPoint::default_resolution))
                .unwrap_or(MeterResolution::QuarterHourly);
            SelectedMeter { id: m.id.clone(), resolution }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::MockSmartmeterApi;

    fn smart_point(id: &str, communicative: bool, locked: bool) -> MeteringPoint {
        let mut p = MeteringPoint::new(id);
        p.smart_meter_type = Some("E450".to_string());
        p.communicative = communicative;
        p.locked = locked;
        p
    }

    fn api_with(account: AccountInfo, points: Vec<MeteringPoint>) -> MockSmartmeterApi {
        let mut api = MockSmartmeterApi::new();
        api.expect_login().returning(|| Ok(()));
        api.expect_account_info().returning(move || Ok(account.clone()));
        api.expect_metering_points().returning(move || Ok(points.clone()));
        api
    }

    #[tokio::test]
    async fn test_validate_auth_success() {
        let point = smart_point("AT1", true, false);
        let api = api_with(AccountInfo::from_metering_point(&point), vec![point]);

        let result = validate_auth(&api).await.unwrap();
        assert!(result.account.is_active());
        assert_eq!(result.metering_points.len(), 1);
    }

    #[tokio::test]
    async fn test_login_error_maps_to_auth() {
        let mut api = MockSmartmeterApi::new();
        api.expect_login()
            .returning(|| Err(PortalError::Login("Login failed (HTTP 401)".to_string())));

        let err = validate_auth(&api).await.unwrap_err();
        assert_eq!(err.code(), "auth");
    }

    #[tokio::test]
    async fn test_connection_error_maps_to_connection_error() {
        let mut api = MockSmartmeterApi::new();
        api.expect_login().returning(|| {
            Err(PortalError::Connection("Could not connect to Netz NO API".to_string()))
        });

        let err = validate_auth(&api).await.unwrap_err();
        assert_eq!(err.code(), "connection_error");
    }

    #[tokio::test]
    async fn test_unexpected_error_maps_to_auth() {
        let mut api = MockSmartmeterApi::new();
        api.expect_login().returning(|| Ok(()));
        api.expect_account_info().returning(|| Err(PortalError::SessionExpired));

        let err = validate_auth(&api).await.unwrap_err();
        assert_eq!(err.code(), "auth");
    }

    #[tokio::test]
    async fn test_account_without_smart_meter() {
        let api = api_with(AccountInfo::default(), vec![MeteringPoint::new("AT1")]);
        let err = validate_auth(&api).await.unwrap_err();
        assert_eq!(err.code(), "no_smartmeter");
    }

    #[tokio::test]
    async fn test_locked_account_is_not_active() {
        let point = smart_point("AT1", true, true);
        let api = api_with(AccountInfo::from_metering_point(&point), vec![point]);

        let err = validate_auth(&api).await.unwrap_err();
        assert_eq!(err.code(), "not_active");
    }

    #[test]
    fn test_select_active_meters_by_default() {
        let points = vec![
            smart_point("AT1", true, false),
            smart_point("AT2", false, false),
            smart_point("AT3", true, true),
            MeteringPoint::new("AT4"),
        ];

        let meters = select_meters(&points, &[]);
        assert_eq!(
            meters,
            vec![
                SelectedMeter { id: "AT1".to_string(), resolution: MeterResolution::QuarterHourly },
                SelectedMeter { id: "AT2".to_string(), resolution: MeterResolution::Daily },
            ]
        );
    }

    #[test]
    fn test_configured_meters_win() {
        let points = vec![smart_point("AT1", true, false), smart_point("AT2", false, false)];
        let configured = vec![
            MeterConfig { id: "AT2".to_string(), resolution: None },
            MeterConfig { id: "AT1".to_string(), resolution: Some(MeterResolution::Daily) },
            MeterConfig { id: "AT9".to_string(), resolution: None },
        ];

        let meters = select_meters(&points, &configured);
        assert_eq!(meters[0].resolution, MeterResolution::Daily);
        assert_eq!(meters[1], SelectedMeter { id: "AT1".to_string(), resolution: MeterResolution::Daily });
        assert_eq!(meters[2].resolution, MeterResolution::QuarterHourly);
    }
}
