//! HTTP routes
//!
//! Everything under `/api/v1` sits behind the governance guard, so handlers
//! always receive a verified [`Principal`] and only need the tenant check.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use lms_tenancy::{
    audit::ClientInfo, cache::CacheKey, guard::guard, Action, AuditEvent, AuditOutcome, AuditPage,
    AuditQuery, Governance, GovernanceResult, OrganizationId, Principal,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(gov: Governance) -> Router {
    let api = Router::new()
        .route("/platform/audit", get(query_platform_audit))
        .route("/organizations/:org_id/audit", get(query_audit))
        .route(
            "/organizations/:org_id/cache/:resource_type/:id",
            get(inspect_cache).delete(invalidate_cache),
        )
        .route_layer(middleware::from_fn_with_state(gov.clone(), guard));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(gov)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================
// Audit
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub subject_id: Option<String>,
    pub action: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl AuditParams {
    fn apply(self, mut query: AuditQuery) -> AuditQuery {
        query.subject_id = self.subject_id;
        query.action = self.action;
        query.outcome = self.outcome;
        query.from = self.from;
        query.to = self.to;
        if let Some(page) = self.page {
            query.page = page;
        }
        if let Some(per_page) = self.per_page {
            query.per_page = per_page;
        }
        query
    }
}

async fn query_audit(
    State(gov): State<Governance>,
    Extension(principal): Extension<Principal>,
    Path(org_id): Path<String>,
    Query(params): Query<AuditParams>,
) -> GovernanceResult<Json<AuditPage>> {
    let query = params.apply(AuditQuery::for_org(OrganizationId::parse(org_id)?));
    let page = gov.audit.query(&principal, query).await?;
    Ok(Json(page))
}

/// Records with no organization: auth failures and retention purges
async fn query_platform_audit(
    State(gov): State<Governance>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<AuditParams>,
) -> GovernanceResult<Json<AuditPage>> {
    let page = gov
        .audit
        .query(&principal, params.apply(AuditQuery::platform()))
        .await?;
    Ok(Json(page))
}

// ============================================
// Cache
// ============================================

#[derive(Debug, Serialize)]
pub struct CacheLookup {
    pub key: String,
    pub hit: bool,
    pub size: usize,
    pub value: Option<serde_json::Value>,
}

async fn inspect_cache(
    State(gov): State<Governance>,
    Extension(principal): Extension<Principal>,
    Extension(client): Extension<ClientInfo>,
    Path((org_id, resource_type, id)): Path<(String, String, String)>,
) -> GovernanceResult<Json<CacheLookup>> {
    let org = OrganizationId::parse(org_id)?;
    gov.governor
        .enforce(&principal, Action::ManageCache, &org, &client)
        .await?;
    let key = CacheKey::new(&org, &resource_type, &id)?;

    let payload = gov.cache.get(&org, &resource_type, &id).await?;
    Ok(Json(CacheLookup {
        key: key.to_string(),
        hit: payload.is_some(),
        size: payload.as_ref().map_or(0, |p| p.len()),
        value: payload.and_then(|p| p.decode::<serde_json::Value>().ok()),
    }))
}

async fn invalidate_cache(
    State(gov): State<Governance>,
    Extension(principal): Extension<Principal>,
    Extension(client): Extension<ClientInfo>,
    Path((org_id, resource_type, id)): Path<(String, String, String)>,
) -> GovernanceResult<StatusCode> {
    let org = OrganizationId::parse(org_id)?;
    gov.governor
        .enforce(&principal, Action::ManageCache, &org, &client)
        .await?;
    let key = CacheKey::new(&org, &resource_type, &id)?;

    gov.cache.delete(&org, &resource_type, &id).await?;
    gov.audit
        .record(
            AuditEvent::new("cache.invalidate", resource_type, AuditOutcome::Success)
                .by(&principal)
                .resource(id)
                .client(client)
                .details(serde_json::json!({ "key": key.to_string() })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
