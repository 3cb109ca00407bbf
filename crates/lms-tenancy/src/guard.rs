//! Request guard middleware
//!
//! Runs the per-request pipeline ahead of any handler: resolve the bearer
//! credential, throttle the subject, then hand the [`Principal`] to the
//! handler through request extensions. Handlers perform their own
//! [`AccessGovernor`](crate::AccessGovernor) check against the target tenant.

use crate::audit::{AuditEvent, AuditOutcome, ClientInfo};
use crate::error::GovernanceError;
use crate::ratelimit::{RateLimitDecision, SubjectKey};
use crate::Governance;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

/// Audit action for rejected credentials
pub const AUTH_FAILURE_ACTION: &str = "auth.failure";
/// Audit action for throttled requests
pub const RATE_LIMITED_ACTION: &str = "rate_limit.exceeded";

/// Governance middleware; install with `axum::middleware::from_fn_with_state`
pub async fn guard(State(gov): State<Governance>, mut request: Request, next: Next) -> Response {
    let endpoint = endpoint_name(&request);
    let client = client_info(request.headers());

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let principal = match gov.resolver.resolve_bearer(authorization) {
        Ok(principal) => principal,
        Err(e) => {
            warn!(endpoint = %endpoint, reason = e.code(), "Authentication failed");
            gov.audit
                .record_denial(
                    AuditEvent::new(AUTH_FAILURE_ACTION, "session", AuditOutcome::Failure)
                        .subject("anonymous", None)
                        .client(client)
                        .details(json!({ "reason": e.code(), "endpoint": endpoint })),
                )
                .await;
            return GovernanceError::Authentication(e).into_response();
        }
    };

    let subject = SubjectKey::for_principal(&principal, &endpoint);
    let decision = gov.limiter.check_policy(&subject, &endpoint).await;

    if !decision.allowed {
        gov.audit
            .record(
                AuditEvent::new(RATE_LIMITED_ACTION, "endpoint", AuditOutcome::Failure)
                    .by(&principal)
                    .resource(endpoint.clone())
                    .client(client)
                    .details(json!({ "limit": decision.limit, "reset_at": decision.reset_at })),
            )
            .await;

        let mut response = match decision.clone().into_result() {
            Err(e) => e.into_response(),
            Ok(_) => GovernanceError::RateLimitExceeded { retry_after_secs: 1 }.into_response(),
        };
        apply_rate_headers(response.headers_mut(), &decision);
        return response;
    }

    request.extensions_mut().insert(principal);
    request.extensions_mut().insert(client);

    let mut response = next.run(request).await;
    apply_rate_headers(response.headers_mut(), &decision);
    response
}

/// `METHOD /route/template`, falling back to the raw path when unrouted
fn endpoint_name(request: &Request) -> String {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    format!("{} {}", request.method(), path)
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ClientInfo { ip, agent }
}

fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    for (name, value) in decision.headers() {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(&value)) {
            headers.insert(name, value);
        }
    }
}
