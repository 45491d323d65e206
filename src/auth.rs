use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::api::error::ApiError;

/// Expected bearer token; empty disables the check.
#[derive(Clone)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    pub fn new(token: &str) -> Self {
        Self(Arc::from(token))
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_empty()
    }

    fn matches(&self, header: Option<&str>) -> bool {
        header
            .and_then(|h| h.strip_prefix("Bearer "))
            .is_some_and(|given| given.trim() == &*self.0)
    }
}

pub async fn require_bearer(
    State(token): State<BearerToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if token.is_disabled() {
        return Ok(next.run(request).await);
    }

    let header = request.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !token.matches(header) {
        tracing::debug!(path = %request.uri().path(), "rejected request without valid bearer token");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
