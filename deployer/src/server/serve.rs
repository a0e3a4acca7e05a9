//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployerError;
use crate::server::handlers::{
    create_deployment_handler, delete_deployment_handler, delete_profile_handler,
    get_deployment_handler, get_profile_handler, health_handler, list_deployments_handler,
    service_address_handler, service_mappings_handler, service_url_handler,
    store_profile_handler, update_deployment_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the deployer API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(
            "/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route(
            "/deployments/{name}",
            get(get_deployment_handler)
                .put(update_deployment_handler)
                .delete(delete_deployment_handler),
        )
        .route("/deployments/{name}/services", get(service_mappings_handler))
        .route(
            "/deployments/{name}/services/{service}/url",
            get(service_url_handler),
        )
        .route(
            "/deployments/{name}/services/{service}/address",
            get(service_address_handler),
        )
        // Credential profiles
        .route("/users", post(store_profile_handler))
        .route(
            "/users/{user_id}",
            get(get_profile_handler).delete(delete_profile_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployerError>>, DeployerError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployerError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployerError::ServerError(e.to_string()))
    });

    Ok(handle)
}
