//! Error taxonomy for the governance layer

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Why a credential could not be turned into a principal
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No credential was presented
    #[error("missing credential")]
    Missing,

    /// Credential failed to parse or verify
    #[error("malformed credential")]
    Malformed,

    /// Credential signature is valid but past its expiry
    #[error("expired credential")]
    Expired,

    /// Non-SuperAdmin credential without an organization claim
    #[error("missing tenant context")]
    MissingTenantContext,
}

impl AuthenticationError {
    /// Stable code recorded in audit details
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::MissingTenantContext => "missing-tenant-context",
        }
    }
}

/// Why the access governor refused an action
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Principal belongs to another organization
    #[error("tenant mismatch")]
    TenantMismatch,

    /// Role below the minimum for the action
    #[error("insufficient role")]
    InsufficientRole,

    /// Principal carries no organization
    #[error("missing tenant context")]
    NoTenant,
}

impl DenyReason {
    /// Stable code recorded in audit details
    pub fn code(&self) -> &'static str {
        match self {
            Self::TenantMismatch => "tenant-mismatch",
            Self::InsufficientRole => "insufficient-role",
            Self::NoTenant => "no-tenant",
        }
    }
}

/// Governance error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    /// Credential missing, malformed, expired or without tenant
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Access denied; the reason is never shown to callers
    #[error("access denied: {0}")]
    Authorization(DenyReason),

    /// Malformed key or input
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller throttled
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Whole seconds until the current window ends
        retry_after_secs: u64,
    },

    /// Transient backend failure
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Result type for the governance layer
pub type GovernanceResult<T> = Result<T, GovernanceError>;

impl From<crate::store::StoreError> for GovernanceError {
    fn from(err: crate::store::StoreError) -> Self {
        GovernanceError::StorageUnavailable(err.to_string())
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GovernanceError::Authentication(_) => {
                (StatusCode::UNAUTHORIZED, "authentication required".to_string())
            }
            // Identical body for every reason so callers cannot enumerate other tenants.
            GovernanceError::Authorization(_) => (StatusCode::FORBIDDEN, "access denied".to_string()),
            GovernanceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            GovernanceError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded".to_string())
            }
            GovernanceError::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service unavailable".to_string())
            }
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let GovernanceError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_body_is_generic() {
        let mismatch = GovernanceError::Authorization(DenyReason::TenantMismatch).into_response();
        let role = GovernanceError::Authorization(DenyReason::InsufficientRole).into_response();

        assert_eq!(mismatch.status(), StatusCode::FORBIDDEN);
        assert_eq!(role.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_throttle_sets_retry_after() {
        let response = GovernanceError::RateLimitExceeded { retry_after_secs: 17 }.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "17");
    }

    #[test]
    fn test_auth_codes() {
        assert_eq!(AuthenticationError::MissingTenantContext.code(), "missing-tenant-context");
        assert_eq!(AuthenticationError::Expired.code(), "expired");
    }
}
