//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::cloud::memory::MemoryCloud;
use crate::cloud::CloudProvider;
use crate::deploy::deployer::DeployerFactory;
use crate::deploy::upload::{FileTransfer, MemoryTransfer};
use crate::errors::DeployerError;
use crate::registry::Registry;
use crate::storage::settings::CloudProviderKind;
use crate::storage::store::{DeploymentStore, FileStore};

/// Main application state
pub struct AppState {
    /// Deployment registry
    pub registry: Arc<Registry>,
}

/// Cloud provider and file transfer channel for a provider kind
fn cloud_for(kind: CloudProviderKind) -> (Arc<dyn CloudProvider>, Arc<dyn FileTransfer>) {
    match kind {
        CloudProviderKind::Simulated => (
            Arc::new(MemoryCloud::new()),
            Arc::new(MemoryTransfer::new()),
        ),
    }
}

impl AppState {
    /// Build the registry and restore persisted deployments
    pub async fn init(options: &AppOptions) -> Result<Self, DeployerError> {
        info!("Initializing application state...");

        options.pipeline.validate()?;
        options.layout.setup().await?;

        let (provider, transfer) = cloud_for(options.cloud_provider);
        let factory = DeployerFactory::new(provider, options.pipeline.clone(), transfer);
        let store: Arc<dyn DeploymentStore> = Arc::new(FileStore::new(&options.layout));

        let registry = Arc::new(Registry::new(factory, store));
        registry.init().await?;

        Ok(Self { registry })
    }

    /// Shutdown application state
    ///
    /// Live deployments are left running; they are reloaded on next start.
    pub async fn shutdown(&self) -> Result<(), DeployerError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
