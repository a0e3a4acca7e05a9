//! Backend deployer contract and factory

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cloud::CloudProvider;
use crate::deploy::ecs::EcsDeployer;
use crate::deploy::upload::FileTransfer;
use crate::errors::DeployerError;
use crate::models::deployment::{Deployment, NodeId};
use crate::models::profile::AwsProfile;
use crate::storage::settings::PipelineSettings;
use crate::utils::unique_deployment_name;

/// Reachable endpoint of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where one service of a deployment runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMapping {
    pub node_id: NodeId,
    pub public_url: Option<String>,
    pub private_url: Option<String>,
}

/// Opaque reference to the job scheduler assigned to a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerHandle {
    pub id: String,
    #[serde(default)]
    pub config: Value,
}

/// Cluster technology tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployType {
    #[serde(rename = "ECS")]
    Ecs,
    #[serde(rename = "K8S")]
    K8s,
}

impl DeployType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployType::Ecs => "ECS",
            DeployType::K8s => "K8S",
        }
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeployType {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ECS" => Ok(DeployType::Ecs),
            "K8S" => Ok(DeployType::K8s),
            _ => Err(DeployerError::UnsupportedOperation(format!(
                "Unsupported deploy type: {}",
                s
            ))),
        }
    }
}

/// One cluster technology's implementation of the deployment lifecycle
#[async_trait]
pub trait Deployer: Send + Sync {
    /// The descriptor this deployer was built for
    fn deployment(&self) -> &Deployment;

    fn deploy_type(&self) -> DeployType;

    /// Reject descriptors this backend cannot provision, without any cloud
    /// calls
    fn preflight(&self) -> Result<(), DeployerError>;

    /// Run the provisioning pipeline once
    ///
    /// `uploaded_files` maps `<userId>_<fileId>` to a local path. Not
    /// idempotent: a second call creates a second set of resources.
    async fn create_deployment(
        &self,
        uploaded_files: &HashMap<String, PathBuf>,
    ) -> Result<(), DeployerError>;

    /// Always fails; descriptors are immutable once accepted
    async fn update_deployment(&self, deployment: &Deployment) -> Result<(), DeployerError>;

    /// Always fails
    async fn deploy_extensions(&self, extensions: &Deployment) -> Result<(), DeployerError>;

    /// Run the teardown pipeline; safe after partial or full creation
    async fn delete_deployment(&self) -> Result<(), DeployerError>;

    /// Rebuild cluster state from cloud-side tags after a restart
    async fn reload_cluster_state(&self, store_info: Option<Value>) -> Result<(), DeployerError>;

    async fn get_service_url(&self, service_name: &str) -> Result<String, DeployerError>;

    async fn get_service_address(&self, service_name: &str)
        -> Result<ServiceAddress, DeployerError>;

    /// Service name to node placement and URLs
    async fn get_service_mappings(&self)
        -> Result<BTreeMap<String, ServiceMapping>, DeployerError>;

    /// Backend specific record persisted next to the descriptor
    async fn get_store_info(&self) -> Option<Value>;

    /// Empty record of the shape `get_store_info` produces
    fn new_store_info(&self) -> Value;

    async fn get_scheduler(&self) -> Option<SchedulerHandle>;

    async fn set_scheduler(&self, scheduler: SchedulerHandle);
}

/// Builds deployers keyed by technology tag
pub struct DeployerFactory {
    provider: Arc<dyn CloudProvider>,
    pipeline: PipelineSettings,
    transfer: Arc<dyn FileTransfer>,
}

impl DeployerFactory {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        pipeline: PipelineSettings,
        transfer: Arc<dyn FileTransfer>,
    ) -> Self {
        Self {
            provider,
            pipeline,
            transfer,
        }
    }

    pub fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }

    /// Create a deployer for the given technology
    ///
    /// With `create_name` the deployment name is treated as a family and
    /// suffixed with a unique ID.
    pub fn create(
        &self,
        deploy_type: DeployType,
        mut deployment: Deployment,
        profile: Option<&AwsProfile>,
        create_name: bool,
    ) -> Result<Arc<dyn Deployer>, DeployerError> {
        if create_name {
            deployment.name = unique_deployment_name(&deployment.name);
        }

        let deployer: Arc<dyn Deployer> = match deploy_type {
            DeployType::Ecs => {
                let clients = self.provider.session(profile, &deployment.region)?;
                Arc::new(EcsDeployer::new(
                    deployment,
                    clients,
                    self.pipeline.clone(),
                    self.transfer.clone(),
                ))
            }
            DeployType::K8s => {
                return Err(DeployerError::UnsupportedOperation(
                    "K8S backend is not available in this build".to_string(),
                ))
            }
        };

        Ok(deployer)
    }
}
