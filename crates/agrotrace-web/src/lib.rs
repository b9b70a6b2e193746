//! Axum JSON surface for Agrotrace: property registration and refresh,
//! alert queries, and the geo candidate search. The browser UI consuming
//! these endpoints lives outside this workspace.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

use agrotrace_core::AlertSeverity;
use agrotrace_ingest::{Ingestor, RefreshConfig, RefreshError};
use agrotrace_store::{AlertFilter, AlertStore, MemoryStore, PropertyStore, StoreError};

pub const CRATE_NAME: &str = "agrotrace-web";

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub properties: Arc<dyn PropertyStore>,
    pub alerts: Arc<dyn AlertStore>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/properties", post(create_property_handler))
        .route("/properties/near", get(properties_near_handler))
        .route("/properties/{id}", get(property_handler))
        .route("/properties/{id}/refresh", post(refresh_property_handler))
        .route("/properties/{id}/esg-history", get(esg_history_handler))
        .route("/properties/{id}/eudr", get(eudr_handler))
        .route("/properties/{id}/productivity", get(productivity_handler))
        .route("/alerts", get(alerts_list_handler))
        .route("/alerts/count", get(alerts_count_handler))
        .route("/alerts/read", post(alerts_mark_read_handler))
        .route("/suppliers", post(create_supplier_handler))
        .route("/suppliers/{tax_id}/refresh", post(refresh_supplier_handler))
        .route(
            "/suppliers/{tax_id}/transitions",
            get(supplier_transitions_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("AGROTRACE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = RefreshConfig::from_env();
    let store = Arc::new(MemoryStore::new());
    let ingestor = Arc::new(Ingestor::new(&config, store.clone())?);
    let state = AppState {
        ingestor,
        properties: store.clone(),
        alerts: store,
    };
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "agrotrace web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreatePropertyRequest {
    identifier: String,
    workspace_id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateSupplierRequest {
    tax_id: String,
    workspace_id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearQuery {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    workspace: String,
    severity: Option<AlertSeverity>,
    read: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MarkReadRequest {
    ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    identifier: String,
    esg_status: String,
    eudr_refreshed: bool,
    cultures_refreshed: usize,
    polygon_fetched: bool,
    alerts_emitted: usize,
}

async fn create_property_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePropertyRequest>,
) -> Response {
    match state
        .ingestor
        .register_property(&request.identifier, &request.workspace_id, request.name)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => refresh_error_response(&err),
    }
}

async fn property_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let normalized = agrotrace_core::normalize_property_code(&id);
    match state.properties.get_property(&normalized).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => not_found("property not registered"),
        Err(err) => store_error_response(err),
    }
}

async fn refresh_property_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.ingestor.refresh_property(&id).await {
        Ok(summary) => Json(RefreshResponse {
            identifier: summary.identifier,
            esg_status: summary.esg_status.as_upstream().to_string(),
            eudr_refreshed: summary.eudr_refreshed,
            cultures_refreshed: summary.cultures_refreshed,
            polygon_fetched: summary.polygon_fetched,
            alerts_emitted: summary.alerts_emitted,
        })
        .into_response(),
        Err(err) => refresh_error_response(&err),
    }
}

async fn esg_history_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let normalized = agrotrace_core::normalize_property_code(&id);
    match state.properties.esg_history(&normalized).await {
        Ok(history) => Json(history).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn eudr_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let normalized = agrotrace_core::normalize_property_code(&id);
    match state.properties.latest_eudr(&normalized).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => not_found("no eudr data for this identifier"),
        Err(err) => store_error_response(err),
    }
}

async fn productivity_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let normalized = agrotrace_core::normalize_property_code(&id);
    match state.properties.productivity(&normalized).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn properties_near_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearQuery>,
) -> Response {
    match state
        .ingestor
        .find_properties_near(query.latitude, query.longitude)
        .await
    {
        Ok(candidates) => Json(candidates).into_response(),
        Err(err) => upstream_error_response(err.status_code()),
    }
}

async fn alerts_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let filter = AlertFilter {
        severity: query.severity,
        read: query.read,
    };
    match state.alerts.list(&query.workspace, &filter).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn alerts_count_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    match state.alerts.count_unread(&query.workspace).await {
        Ok(count) => Json(serde_json::json!({ "unread": count })).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn alerts_mark_read_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MarkReadRequest>,
) -> Response {
    match state.alerts.mark_read(&request.ids).await {
        Ok(updated) => Json(serde_json::json!({ "updated": updated })).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn create_supplier_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSupplierRequest>,
) -> Response {
    match state
        .ingestor
        .register_supplier(&request.tax_id, &request.workspace_id, request.name)
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => refresh_error_response(&err),
    }
}

async fn refresh_supplier_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(tax_id): AxumPath<String>,
) -> Response {
    match state.ingestor.refresh_supplier(&tax_id).await {
        Ok(summary) => Json(serde_json::json!({
            "tax_id": summary.tax_id,
            "status": summary.status.as_upstream(),
            "alerts_emitted": summary.alerts_emitted,
        }))
        .into_response(),
        Err(err) => refresh_error_response(&err),
    }
}

async fn supplier_transitions_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(tax_id): AxumPath<String>,
) -> Response {
    match state.ingestor.supplier_transition_report(&tax_id).await {
        Ok(drafts) => {
            let rows: Vec<_> = drafts
                .into_iter()
                .map(|draft| {
                    serde_json::json!({
                        "kind": draft.kind,
                        "severity": draft.severity,
                        "message": draft.message,
                    })
                })
                .collect();
            Json(rows).into_response()
        }
        Err(err) => refresh_error_response(&err),
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::PropertyNotFound(_) | StoreError::SupplierNotFound(_) => {
            not_found("not registered")
        }
    }
}

/// Map an upstream status code onto a user-facing HTTP response: 404 means
/// the provider has no data for the identifier, other 4xx means the
/// request itself was bad, everything else (timeouts, 429, 5xx) is a
/// gateway problem worth retrying later.
fn upstream_error_response(status: u16) -> Response {
    match status {
        404 => not_found("no data for this identifier"),
        400..=499 => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid identifier or request" })),
        )
            .into_response(),
        _ => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": "compliance service unavailable, try later" })),
        )
            .into_response(),
    }
}

fn refresh_error_response(err: &RefreshError) -> Response {
    match err {
        RefreshError::UnknownProperty(_) | RefreshError::UnknownSupplier(_) => {
            not_found("not registered")
        }
        RefreshError::Store(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "storage failure" })),
        )
            .into_response(),
        RefreshError::Esg(inner) => upstream_error_response(inner.status_code()),
    }
}
