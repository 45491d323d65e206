use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

use super::{
    constants as c,
    models::{ConsumptionEnvelope, ValueField},
    ConsumptionRecord, PortalError, SmartmeterApi,
};
use crate::{
    config::PortalConfig,
    domain::{AccountInfo, MeteringPoint},
    telemetry::truncate_for_log,
};

const LOG_BODY_CHARS: usize = 500;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    user: &'a str,
    pwd: &'a str,
}

#[derive(Debug, Default)]
struct Session {
    authenticated: bool,
    account: Option<AccountInfo>,
    metering_points: Vec<MeteringPoint>,
}

/// Netz NÖ portal client.
///
/// The portal authenticates with session cookies, which the underlying HTTP
/// client keeps in its cookie store. [`NetzNoeClient::reset`] drops them.
pub struct NetzNoeClient {
    base_url: Url,
    auth_url: Url,
    credentials: Credentials,
    timeout: Duration,
    http: RwLock<reqwest::Client>,
    session: RwLock<Session>,
    login_lock: Mutex<()>,
}

impl NetzNoeClient {
    pub fn new(cfg: &PortalConfig) -> Result<Self, PortalError> {
        let credentials = Credentials {
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        };
        Self::with_urls(
            &cfg.base_url,
            &cfg.auth_url,
            credentials,
            Duration::from_secs(cfg.http_timeout_seconds),
        )
    }

    pub fn with_urls(
        base_url: &str,
        auth_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, PortalError> {
        let base_url = parse_url(base_url)?;
        let auth_url = parse_url(auth_url)?;
        let http = build_http(timeout)?;
        Ok(Self {
            base_url,
            auth_url,
            credentials,
            timeout,
            http: RwLock::new(http),
            session: RwLock::new(Session::default()),
            login_lock: Mutex::new(()),
        })
    }

    /// Start over with a fresh HTTP session and no cached account data.
    pub async fn reset(&self) -> Result<(), PortalError> {
        let http = build_http(self.timeout)?;
        *self.http.write().await = http;
        *self.session.write().await = Session::default();
        Ok(())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.authenticated
    }

    pub async fn account_id(&self) -> Option<String> {
        self.session.read().await.account.as_ref().and_then(|a| a.account_id.clone())
    }

    pub async fn metering_point_id(&self) -> Option<String> {
        self.session
            .read()
            .await
            .account
            .as_ref()
            .and_then(|a| a.metering_point_id.clone())
    }

    /// Explicit meter id, or the account's default metering point.
    pub async fn resolve_meter(&self, meter_id: Option<&str>) -> Result<String, PortalError> {
        match meter_id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(id.to_string()),
            None => self.metering_point_id().await.ok_or(PortalError::NoMeteringPoint),
        }
    }

    async fn http(&self) -> reqwest::Client {
        self.http.read().await.clone()
    }

    async fn validate_session(&self) -> bool {
        if !self.is_logged_in().await {
            return false;
        }
        let Ok(url) = self.endpoint_url(c::ENDPOINT_USER_INFO, &[]) else {
            return false;
        };
        match self.http().await.get(url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    async fn do_login(&self) -> Result<(), PortalError> {
        if self.is_logged_in().await && self.validate_session().await {
            return Ok(());
        }

        debug!(url = %self.auth_url, "attempting login");
        let response = self
            .http()
            .await
            .post(self.auth_url.clone())
            .json(&LoginRequest {
                user: &self.credentials.username,
                pwd: &self.credentials.password,
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "connection error during login");
                PortalError::Connection("Could not connect to Netz NO API".to_string())
            })?;

        let status = response.status();
        debug!(%status, headers = ?response.headers(), "login response");
        let body = response.text().await.unwrap_or_default();
        debug!(body = truncate_for_log(&body, LOG_BODY_CHARS), "login response body");

        if status != StatusCode::OK {
            return Err(PortalError::Login(format!(
                "Login failed (HTTP {}). Check username/password.",
                status.as_u16()
            )));
        }

        self.session.write().await.authenticated = true;
        self.load_account_info().await
    }

    async fn load_account_info(&self) -> Result<(), PortalError> {
        let points: Vec<MeteringPoint> = self.call_api(c::ENDPOINT_METERING_POINTS, &[]).await?;
        debug!(count = points.len(), "metering points loaded");

        let mut session = self.session.write().await;
        if let Some(first) = points.first() {
            session.account = Some(AccountInfo::from_metering_point(first));
            session.metering_points = points;
        }
        Ok(())
    }

    fn endpoint_url(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Url, PortalError> {
        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|e| PortalError::Query(format!("Invalid endpoint {endpoint}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn call_api<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, PortalError> {
        if !self.is_logged_in().await {
            return Err(PortalError::Connection(
                "Not authenticated. Call login() first.".to_string(),
            ));
        }

        let url = self.endpoint_url(endpoint, query)?;
        let response = self
            .http()
            .await
            .get(url)
            .send()
            .await
            .map_err(|e| PortalError::Connection(format!("Request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.session.write().await.authenticated = false;
            return Err(PortalError::SessionExpired);
        }
        let body = response
            .text()
            .await
            .map_err(|e| PortalError::Connection(format!("Request failed: {e}")))?;
        if !status.is_success() {
            return Err(PortalError::Query(format!(
                "API error: HTTP {status}: {}",
                truncate_for_log(&body, LOG_BODY_CHARS)
            )));
        }

        debug!(endpoint, body = truncate_for_log(&body, LOG_BODY_CHARS), "API response");
        serde_json::from_str(&body)
            .map_err(|e| PortalError::Query(format!("Invalid response from {endpoint}: {e}")))
    }

    async fn consumption(
        &self,
        endpoint: &str,
        meter_id: &str,
        mut query: Vec<(&str, String)>,
        field: ValueField,
    ) -> Result<ConsumptionRecord, PortalError> {
        let meter = self.resolve_meter(Some(meter_id)).await?;
        query.insert(0, ("meterId", meter));
        let envelope: ConsumptionEnvelope = self.call_api(endpoint, &query).await?;
        Ok(envelope.into_record(field))
    }
}

#[async_trait]
impl SmartmeterApi for NetzNoeClient {
    async fn login(&self) -> Result<(), PortalError> {
        let _guard = self.login_lock.lock().await;
        self.do_login().await
    }

    async fn account_info(&self) -> Result<AccountInfo, PortalError> {
        Ok(self.session.read().await.account.clone().unwrap_or_default())
    }

    async fn metering_points(&self) -> Result<Vec<MeteringPoint>, PortalError> {
        Ok(self.session.read().await.metering_points.clone())
    }

    async fn consumption_day(
        &self,
        day: NaiveDate,
        meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError> {
        let query = vec![("day", day.format(c::API_DATE_FORMAT).to_string())];
        self.consumption(c::ENDPOINT_CONSUMPTION_DAY, meter_id, query, ValueField::MeteredValues)
            .await
    }

    async fn consumption_month(
        &self,
        year: i32,
        month: u32,
        meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError> {
        let query = vec![("year", year.to_string()), ("month", month.to_string())];
        self.consumption(c::ENDPOINT_CONSUMPTION_MONTH, meter_id, query, ValueField::MeteredValues)
            .await
    }

    async fn consumption_year(
        &self,
        year: i32,
        meter_id: &str,
    ) -> Result<ConsumptionRecord, PortalError> {
        let query = vec![("year", year.to_string())];
        self.consumption(c::ENDPOINT_CONSUMPTION_YEAR, meter_id, query, ValueField::Values)
            .await
    }
}

fn parse_url(raw: &str) -> Result<Url, PortalError> {
    Url::parse(raw).map_err(|e| PortalError::Connection(format!("Invalid portal URL {raw}: {e}")))
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, PortalError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(c::USER_AGENT));
    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| PortalError::Connection(format!("Could not build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const METER: &str = "AT0020000000000000000000100000001";

    fn client_for(server: &MockServer) -> NetzNoeClient {
        NetzNoeClient::with_urls(
            &format!("{}/orchestration/", server.uri()),
            &format!("{}/orchestration/Authentication/Login", server.uri()),
            Credentials {
                username: "user@example.com".to_string(),
                password: "secret".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/orchestration/Authentication/Login"))
            .and(body_json(json!({"user": "user@example.com", "pwd": "secret"})))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "ASP.NET_SessionId=abc123; Path=/"),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orchestration/User/GetMeteringPointsByBusinesspartnerId"))
            .and(query_param("context", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "meteringPointId": METER,
                    "accountId": "4711",
                    "smartMeterType": "E450",
                    "communicative": true,
                    "locked": false
                },
                {
                    "meteringPointId": "AT0020000000000000000000100000002",
                    "accountId": "4711",
                    "smartMeterType": null
                }
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_loads_account_info() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        let client = client_for(&server);

        client.login().await.unwrap();

        assert!(client.is_logged_in().await);
        let info = client.account_info().await.unwrap();
        assert_eq!(info.account_id.as_deref(), Some("4711"));
        assert_eq!(info.metering_point_id.as_deref(), Some(METER));
        assert!(info.has_smart_meter);
        assert!(info.has_communicative);
        assert!(info.is_active());
        assert_eq!(client.metering_points().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orchestration/Authentication/Login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = client_for(&server);

        let err = client.login().await.unwrap_err();
        assert!(matches!(err, PortalError::Login(_)));
        assert_eq!(err.to_string(), "Login failed (HTTP 401). Check username/password.");
        assert!(!client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_login_connection_error() {
        let client = NetzNoeClient::with_urls(
            "http://127.0.0.1:9/orchestration/",
            "http://127.0.0.1:9/orchestration/Authentication/Login",
            Credentials { username: "u".to_string(), password: "p".to_string() },
            Duration::from_secs(2),
        )
        .unwrap();

        let err = client.login().await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_login_reuses_valid_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orchestration/Authentication/Login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orchestration/User/GetMeteringPointsByBusinesspartnerId"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orchestration/User/GetBasicInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        let client = client_for(&server);

        client.login().await.unwrap();
        client.login().await.unwrap();
        assert!(client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_concurrent_logins_post_credentials_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orchestration/Authentication/Login"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orchestration/User/GetMeteringPointsByBusinesspartnerId"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orchestration/User/GetBasicInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        let client = client_for(&server);

        let (first, second) = tokio::join!(client.login(), client.login());
        first.unwrap();
        second.unwrap();
        assert!(client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_invalid_json_is_query_error() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Day"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = client.consumption_day(day, METER).await.unwrap_err();
        assert!(err.is_query());
        assert!(err.to_string().contains("Invalid response from ConsumptionRecord/Day"));
        assert!(client.is_logged_in().await);
    }

    #[test]
    fn test_endpoint_url_keeps_existing_query() {
        let client = NetzNoeClient::with_urls(
            c::BASE_URL,
            c::AUTH_URL,
            Credentials { username: "u".to_string(), password: "p".to_string() },
            Duration::from_secs(5),
        )
        .unwrap();

        let url = client
            .endpoint_url(c::ENDPOINT_METERING_POINTS, &[("meterId", METER.to_string())])
            .unwrap();
        assert_eq!(url.path(), "/orchestration/User/GetMeteringPointsByBusinesspartnerId");
        assert_eq!(url.query(), Some(format!("context=2&meterId={METER}").as_str()));

        let url = client.endpoint_url(c::ENDPOINT_CONSUMPTION_DAY, &[]).unwrap();
        assert_eq!(url.query(), None);
    }

    #[tokio::test]
    async fn test_consumption_day_sends_session_cookie_and_query() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Day"))
            .and(query_param("meterId", METER))
            .and(query_param("day", "2024-03-01"))
            .and(header("cookie", "ASP.NET_SessionId=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"peakDemandTimes": [], "meteredValues": [0.25, 0.5, null, 0.25]}
            ])))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let record = client.consumption_day(day, METER).await.unwrap();
        assert_eq!(record.values, vec![Some(0.25), Some(0.5), None, Some(0.25)]);
    }

    #[tokio::test]
    async fn test_consumption_uses_default_metering_point() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Month"))
            .and(query_param("meterId", METER))
            .and(query_param("year", "2024"))
            .and(query_param("month", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"meteredValues": [7.5, 8.25]}
            ])))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let record = client.consumption_month(2024, 2, "").await.unwrap();
        assert_eq!(record.values, vec![Some(7.5), Some(8.25)]);
    }

    #[tokio::test]
    async fn test_consumption_year_reads_values() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Year"))
            .and(query_param("year", "2023"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"peakDemandTimes": [], "values": [310.0, 280.5]}
            ])))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let record = client.consumption_year(2023, METER).await.unwrap();
        assert_eq!(record.values, vec![Some(310.0), Some(280.5)]);
    }

    #[tokio::test]
    async fn test_empty_consumption_list() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Day"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(client.consumption_day(day, METER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_marks_session_expired() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Day"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = client.consumption_day(day, METER).await.unwrap_err();
        assert!(matches!(err, PortalError::SessionExpired));
        assert!(!client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_server_error_is_query_error() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/orchestration/ConsumptionRecord/Day"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.login().await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = client.consumption_day(day, METER).await.unwrap_err();
        assert!(matches!(err, PortalError::Query(_)));
        assert!(client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_requires_login() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = client.consumption_day(day, METER).await.unwrap_err();
        assert_eq!(err.to_string(), "Not authenticated. Call login() first.");
    }

    #[tokio::test]
    async fn test_reset_clears_session() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        let client = client_for(&server);
        client.login().await.unwrap();

        client.reset().await.unwrap();
        assert!(!client.is_logged_in().await);
        assert!(client.metering_point_id().await.is_none());
        assert!(matches!(
            client.resolve_meter(None).await,
            Err(PortalError::NoMeteringPoint)
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials { username: "u".to_string(), password: "hunter2".to_string() };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
