use thiserror::Error;

/// Errors raised by the Netz NÖ portal client.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Login(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("{0}")]
    Query(String),

    #[error("No metering point ID available")]
    NoMeteringPoint,
}

impl PortalError {
    /// Credential or session problems, as opposed to transport or data errors.
    pub fn is_auth(&self) -> bool {
        matches!(self, PortalError::Login(_) | PortalError::SessionExpired)
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, PortalError::Connection(_))
    }

    pub fn is_query(&self) -> bool {
        matches!(self, PortalError::Query(_) | PortalError::NoMeteringPoint)
    }
}
