//! HTTP request handlers

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::deploy::deployer::{ServiceAddress, ServiceMapping};
use crate::errors::DeployerError;
use crate::models::deployment::Deployment;
use crate::models::profile::{AwsProfile, ProfileSummary};
use crate::registry::{CreateRequest, DeploymentSummary, ListFilter};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body returned by every failing handler
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps deployer errors onto status codes
pub struct ApiError(pub DeployerError);

impl From<DeployerError> for ApiError {
    fn from(err: DeployerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DeployerError::ValidationError(_) | DeployerError::JsonError(_) => {
                StatusCode::BAD_REQUEST
            }
            DeployerError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployerError::UnsupportedOperation(_) => StatusCode::NOT_IMPLEMENTED,
            DeployerError::LifecycleError(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "cluster-deployer".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Vec<DeploymentSummary>> {
    Ok(Json(state.registry.list(&filter).await?))
}

/// Uploaded files the descriptor references that exist on disk
async fn upload_locations(state: &ServerState, deployment: &Deployment) -> HashMap<String, PathBuf> {
    let mut locations = HashMap::new();
    for file in &deployment.files {
        let key = file.location_key(&deployment.user_id);
        let upload = state.uploads_dir.file(&key);
        if upload.exists().await {
            locations.insert(key, upload.path().to_path_buf());
        }
    }
    locations
}

/// Runs the whole provisioning pipeline before responding
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<DeploymentSummary>), ApiError> {
    let uploads = upload_locations(&state, &request.deployment).await;
    let summary = state.registry.create(request, uploads).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<DeploymentSummary> {
    Ok(Json(state.registry.get(&name).await?))
}

pub async fn update_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(deployment): Json<Deployment>,
) -> Result<StatusCode, ApiError> {
    state.registry.update(&name, &deployment).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<DeploymentSummary> {
    Ok(Json(state.registry.delete(&name).await?))
}

pub async fn service_mappings_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<BTreeMap<String, ServiceMapping>> {
    Ok(Json(state.registry.service_mappings(&name).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceUrlResponse {
    pub url: String,
}

pub async fn service_url_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, service)): Path<(String, String)>,
) -> ApiResult<ServiceUrlResponse> {
    let url = state.registry.service_url(&name, &service).await?;
    Ok(Json(ServiceUrlResponse { url }))
}

pub async fn service_address_handler(
    State(state): State<Arc<ServerState>>,
    Path((name, service)): Path<(String, String)>,
) -> ApiResult<ServiceAddress> {
    Ok(Json(state.registry.service_address(&name, &service).await?))
}

/// Profile submission; the secret never appears in a response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub user_id: String,
    pub aws_id: String,
    pub aws_secret: String,
}

pub async fn store_profile_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ProfileRequest>,
) -> Result<(StatusCode, Json<ProfileSummary>), ApiError> {
    let profile = AwsProfile::new(request.user_id, request.aws_id, &request.aws_secret);
    let summary = state.registry.store_profile(profile).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_profile_handler(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> ApiResult<ProfileSummary> {
    Ok(Json(state.registry.get_profile(&user_id)?))
}

pub async fn delete_profile_handler(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_profile(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
