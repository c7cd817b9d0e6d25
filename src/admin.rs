// src/admin.rs

//! Admin JSON API over the `KeyPool` commands.

use crate::{
    error::Result,
    pool::{ImportReport, PoolOverview},
    state::AppState,
    storage::{BackupCredential, BackupFilter, Binding, Credential, Provider},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/admin",
        Router::new()
            .route("/credentials", get(list_credentials).post(create_credential))
            .route("/credentials/import", post(import_credentials))
            .route("/credentials/:id/reset", post(reset_credential))
            .route("/credentials/:id", delete(delete_credential))
            .route("/backups", get(list_backups).post(create_backup))
            .route("/backups/import", post(import_backups))
            .route("/backups/:id/restore", post(restore_backup))
            .route("/backups/:id", delete(delete_backup))
            .route("/bindings", get(list_bindings).post(create_binding))
            .route(
                "/bindings/:target_id/:credential_id",
                put(toggle_binding).delete(delete_binding),
            )
            .route("/overview", get(overview)),
    )
}

// --- Request/Response Structs ---

/// Credential as shown to admins: the secret only as a masked preview.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CredentialView {
    pub id: String,
    pub provider: Provider,
    pub status: String,
    pub preview: String,
    pub tokens_used: u64,
    pub requests_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialView {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id.clone(),
            provider: credential.provider.clone(),
            status: credential.status.to_string(),
            preview: credential.preview(),
            tokens_used: credential.tokens_used,
            requests_count: credential.requests_count,
            last_failure_at: credential.last_failure_at,
            created_at: credential.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BackupView {
    pub id: String,
    pub provider: Provider,
    pub preview: String,
    pub is_used: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deletes_at: Option<DateTime<Utc>>,
    /// Seconds left before the reaper removes a used backup
    pub expires_in_secs: Option<i64>,
    pub used_for: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupView {
    fn new(backup: &BackupCredential, now: DateTime<Utc>) -> Self {
        Self {
            id: backup.id.clone(),
            provider: backup.provider.clone(),
            preview: backup.preview(),
            is_used: backup.is_used,
            activated_at: backup.activated_at,
            deletes_at: backup.deletes_at,
            expires_in_secs: backup
                .deletes_at
                .map(|deadline| (deadline - now).num_seconds().max(0)),
            used_for: backup.used_for.clone(),
            created_at: backup.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<Provider>,
}

#[derive(Debug, Deserialize)]
pub struct BackupQuery {
    pub provider: Option<Provider>,
    #[serde(default)]
    pub filter: BackupFilter,
}

#[derive(Debug, Deserialize)]
pub struct BindingQuery {
    pub target_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub id: String,
    pub secret: String,
    pub provider: Provider,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub provider: Provider,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub succeeded_count: usize,
    pub failed_count: usize,
    #[serde(flatten)]
    pub report: ImportReport,
}

impl From<ImportReport> for ImportResponse {
    fn from(report: ImportReport) -> Self {
        Self {
            succeeded_count: report.succeeded_count(),
            failed_count: report.failed_count(),
            report,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBindingRequest {
    pub target_id: String,
    pub credential_id: String,
    pub priority: u32,
}

#[derive(Debug, Deserialize)]
pub struct ToggleBindingRequest {
    pub is_active: bool,
}

// --- Credential handlers ---

pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<Vec<CredentialView>>> {
    let credentials = state.pool.list_credentials(query.provider.as_ref()).await?;
    Ok(Json(credentials.iter().map(CredentialView::from).collect()))
}

pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRecordRequest>,
) -> Result<impl IntoResponse> {
    let credential = state
        .pool
        .create_credential(&request.id, &request.secret, request.provider)
        .await?;
    Ok((StatusCode::CREATED, Json(CredentialView::from(&credential))))
}

pub async fn import_credentials(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Json<ImportResponse> {
    let report = state
        .pool
        .import_credentials(request.provider, &request.data)
        .await;
    Json(report.into())
}

pub async fn reset_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CredentialView>> {
    let credential = state.pool.reset_credential(&id).await?;
    Ok(Json(CredentialView::from(&credential)))
}

pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.pool.delete_credential(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Backup handlers ---

pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BackupQuery>,
) -> Result<Json<Vec<BackupView>>> {
    let now = Utc::now();
    let backups = state
        .pool
        .list_backups(query.provider.as_ref(), query.filter)
        .await?;
    Ok(Json(backups.iter().map(|b| BackupView::new(b, now)).collect()))
}

pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRecordRequest>,
) -> Result<impl IntoResponse> {
    let backup = state
        .pool
        .create_backup(&request.id, &request.secret, request.provider)
        .await?;
    Ok((StatusCode::CREATED, Json(BackupView::new(&backup, Utc::now()))))
}

pub async fn import_backups(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Json<ImportResponse> {
    let report = state.pool.import_backups(request.provider, &request.data).await;
    Json(report.into())
}

pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupView>> {
    let backup = state.pool.restore_backup(&id).await?;
    Ok(Json(BackupView::new(&backup, Utc::now())))
}

pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.pool.delete_backup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Binding handlers ---

pub async fn list_bindings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BindingQuery>,
) -> Result<Json<Vec<Binding>>> {
    Ok(Json(
        state.pool.list_bindings(query.target_id.as_deref()).await?,
    ))
}

pub async fn create_binding(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBindingRequest>,
) -> Result<impl IntoResponse> {
    let binding = state
        .pool
        .create_binding(&request.target_id, &request.credential_id, request.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

pub async fn toggle_binding(
    State(state): State<Arc<AppState>>,
    Path((target_id, credential_id)): Path<(String, String)>,
    Json(request): Json<ToggleBindingRequest>,
) -> Result<Json<Binding>> {
    let binding = state
        .pool
        .toggle_binding(&target_id, &credential_id, request.is_active)
        .await?;
    Ok(Json(binding))
}

pub async fn delete_binding(
    State(state): State<Arc<AppState>>,
    Path((target_id, credential_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.pool.delete_binding(&target_id, &credential_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Read model ---

pub async fn overview(State(state): State<Arc<AppState>>) -> Result<Json<PoolOverview>> {
    Ok(Json(state.pool.overview().await?))
}
