//! HTTP API
//!
//! Routes for Puppet environment/class queries and DNS record management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use dns_proxy::{DnsBackend, DnsError, DnsRecordManager, RecordType};
use puppet_proxy::{
    ClassSource, ClassesError, Environment, EnvironmentClassesRetriever, EnvironmentSource,
    FileResult, PuppetClass,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub type ClassesRetriever = EnvironmentClassesRetriever<Arc<dyn ClassSource>>;
pub type DnsManager = DnsRecordManager<Arc<dyn DnsBackend>>;

#[derive(Clone)]
pub struct AppState {
    pub classes: ClassesRetriever,
    pub environments: Arc<dyn EnvironmentSource>,
    /// `None` when no DNS authority is configured
    pub dns: Option<Arc<DnsManager>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/puppet/environments", get(list_environments))
        .route("/puppet/environments/:environment", get(get_environment))
        .route("/puppet/environments/:environment/classes", get(get_classes))
        .route(
            "/puppet/environments/:environment/classes_and_errors",
            get(get_classes_and_errors),
        )
        .route("/puppet/run", post(puppet_run))
        .route("/dns", post(create_dns_record))
        .route("/dns/:value/:record_type", delete(remove_dns_record))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

pub enum ApiError {
    Classes(ClassesError),
    Dns(DnsError),
    DnsNotConfigured,
}

impl From<ClassesError> for ApiError {
    fn from(err: ClassesError) -> Self {
        ApiError::Classes(err)
    }
}

impl From<DnsError> for ApiError {
    fn from(err: DnsError) -> Self {
        ApiError::Dns(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Classes(ClassesError::EnvironmentNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Classes(ClassesError::RemoteUnavailable(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Classes(ClassesError::FetchTimeout { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Classes(ClassesError::CacheInconsistency(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Dns(DnsError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Dns(DnsError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Dns(DnsError::Collision(_)) => StatusCode::CONFLICT,
            ApiError::Dns(DnsError::Backend(_)) => StatusCode::BAD_GATEWAY,
            ApiError::DnsNotConfigured => StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Classes(e) => e.to_string(),
            ApiError::Dns(e) => e.to_string(),
            ApiError::DnsNotConfigured => "DNS backend not configured".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, message);
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Puppet Endpoints
// ============================================================================

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "smart-proxy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_environments(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let environments = state.environments.environments().await?;
    Ok(Json(environments.into_iter().map(|env| env.name).collect()))
}

async fn get_environment(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> Result<Json<Environment>, ApiError> {
    Ok(Json(state.environments.environment(&environment).await?))
}

async fn get_classes(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> Result<Json<Vec<PuppetClass>>, ApiError> {
    Ok(Json(state.classes.classes_in_environment(&environment).await?))
}

async fn get_classes_and_errors(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> Result<Json<Vec<FileResult>>, ApiError> {
    Ok(Json(
        state
            .classes
            .classes_and_errors_in_environment(&environment)
            .await?,
    ))
}

async fn puppet_run() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({ "error": "Puppet runs are not supported" })),
    )
}

// ============================================================================
// DNS Endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateDnsRequest {
    fqdn: String,
    value: String,
    #[serde(rename = "type")]
    record_type: String,
}

fn dns_manager(state: &AppState) -> Result<&DnsManager, ApiError> {
    state.dns.as_deref().ok_or(ApiError::DnsNotConfigured)
}

async fn create_dns_record(
    State(state): State<AppState>,
    Json(req): Json<CreateDnsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dns = dns_manager(&state)?;
    let record_type: RecordType = req.record_type.parse()?;

    let created = dns.create_record(&req.fqdn, &req.value, record_type).await?;

    Ok(Json(serde_json::json!({
        "status": if created { "created" } else { "unchanged" },
        "fqdn": req.fqdn,
        "value": req.value,
        "type": record_type,
    })))
}

async fn remove_dns_record(
    State(state): State<AppState>,
    Path((value, record_type)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dns = dns_manager(&state)?;
    let record_type: RecordType = record_type.parse()?;

    match record_type {
        RecordType::PTR => dns.remove_ptr_record(&value).await?,
        other => dns.remove_record(&value, other).await?,
    }

    Ok(Json(serde_json::json!({
        "status": "removed",
        "value": value,
        "type": record_type,
    })))
}
