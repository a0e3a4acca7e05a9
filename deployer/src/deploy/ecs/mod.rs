//! Container-service backend
//!
//! Provisions a VPC, identity role, compute instances and a container
//! cluster whose services are pinned to logical nodes through placement
//! attributes.

pub mod network;
pub mod provision;
pub mod teardown;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, info_span, warn, Instrument};

use crate::cloud::types::ResourceType;
use crate::cloud::CloudClients;
use crate::deploy::deployer::{DeployType, Deployer, SchedulerHandle, ServiceAddress, ServiceMapping};
use crate::deploy::upload::FileTransfer;
use crate::errors::{CloudError, DeployerError};
use crate::models::cluster::{ClusterState, NodeInfo, ResourceKind};
use crate::models::deployment::{Deployment, NodeId, PLACEMENT_ATTRIBUTE};
use crate::storage::settings::PipelineSettings;

use self::provision::{find_vpc, Provisioner};
use self::teardown::Teardown;

/// Backend record persisted next to the descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsStoreInfo {
    #[serde(default)]
    pub vpc_id: Option<String>,

    #[serde(default)]
    pub instance_ids: Vec<String>,

    #[serde(default)]
    pub node_infos: BTreeMap<NodeId, NodeInfo>,
}

impl From<&ClusterState> for EcsStoreInfo {
    fn from(state: &ClusterState) -> Self {
        Self {
            vpc_id: state.vpc_id.clone(),
            instance_ids: state.instance_ids.clone(),
            node_infos: state.node_infos.clone(),
        }
    }
}

/// Inverse of `placement_value`
fn node_id_from_placement(value: &str) -> Option<NodeId> {
    value.strip_prefix("node-")?.parse().ok()
}

/// Deployer for the container-service backend
pub struct EcsDeployer {
    deployment: Deployment,
    clients: CloudClients,
    pipeline: PipelineSettings,
    transfer: Arc<dyn FileTransfer>,
    state: RwLock<ClusterState>,
    scheduler: RwLock<Option<SchedulerHandle>>,

    /// Serializes create and delete; readers only take `state`
    runs: Mutex<()>,
}

impl EcsDeployer {
    pub fn new(
        deployment: Deployment,
        clients: CloudClients,
        pipeline: PipelineSettings,
        transfer: Arc<dyn FileTransfer>,
    ) -> Self {
        let state = ClusterState::for_deployment(&deployment);
        Self {
            deployment,
            clients,
            pipeline,
            transfer,
            state: RwLock::new(state),
            scheduler: RwLock::new(None),
            runs: Mutex::new(()),
        }
    }

    /// Snapshot of the current cluster state
    pub async fn cluster_state(&self) -> ClusterState {
        self.state.read().await.clone()
    }

    /// Image per node: the node's override or the region's host image
    fn resolve_images(&self) -> Result<BTreeMap<NodeId, String>, DeployerError> {
        let mut images = BTreeMap::new();
        for node in &self.deployment.cluster_definition.nodes {
            let image = match &node.image_id {
                Some(image) if !image.trim().is_empty() => image.clone(),
                _ => self
                    .pipeline
                    .image_for_region(&self.deployment.region)?
                    .to_string(),
            };
            images.insert(node.id, image);
        }
        Ok(images)
    }

    fn teardown(&self) -> Teardown<'_> {
        Teardown {
            deployment: &self.deployment,
            clients: &self.clients,
            waiter: self.pipeline.waiter_options(),
        }
    }

    /// Node and host port serving the container named `service_name`
    fn locate_service(&self, service_name: &str) -> Result<(NodeId, u16), DeployerError> {
        let found = self.deployment.task_definitions.iter().find_map(|task| {
            task.container_definitions
                .iter()
                .find(|c| c.name == service_name)
                .map(|container| (task, container))
        });
        let Some((task, container)) = found else {
            return Err(DeployerError::NotFound(format!(
                "Unable to find container {}",
                service_name
            )));
        };

        let port = container
            .port_mappings
            .first()
            .map(|p| p.host_port)
            .ok_or_else(|| {
                DeployerError::NotFound(format!("Container {} exposes no ports", service_name))
            })?;

        let mapping = self
            .deployment
            .node_mapping
            .iter()
            .find(|m| m.task == task.family)
            .ok_or_else(|| {
                DeployerError::NotFound(format!("Task {} is not mapped to a node", task.family))
            })?;

        Ok((mapping.id, port))
    }

    /// First host port exposed by any container of `family`
    fn task_port(&self, family: &str) -> Option<u16> {
        self.deployment
            .task_definition(family)?
            .container_definitions
            .iter()
            .find_map(|c| c.port_mappings.first().map(|p| p.host_port))
    }

    async fn refresh_instances(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let cluster = state.cluster_name();
        let registered = match self.clients.containers.list_container_instances(&cluster).await {
            Ok(registered) => registered,
            Err(CloudError::NotFound(_)) => {
                warn!("Cluster {} no longer exists", cluster);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for instance in registered {
            let node_id = instance
                .attributes
                .get(PLACEMENT_ATTRIBUTE)
                .and_then(|value| node_id_from_placement(value));

            match node_id {
                Some(node_id) => {
                    state.add_instance(node_id, instance.ec2_instance_id.clone());
                    if let Some(info) = state.node_infos.get_mut(&node_id) {
                        info.agent_registration_id = Some(instance.arn);
                    }
                }
                None if !state.instance_ids.contains(&instance.ec2_instance_id) => {
                    state.instance_ids.push(instance.ec2_instance_id);
                }
                None => {}
            }
        }

        if state.instance_ids.is_empty() {
            return Ok(());
        }

        match self.clients.compute.describe_instances(&state.instance_ids).await {
            Ok(described) => {
                for instance in described {
                    if let Some(info) = state.node_for_instance_mut(&instance.instance_id) {
                        info.public_address = instance.public_dns_name;
                        info.private_address = instance.private_ip;
                    }
                }
                Ok(())
            }
            Err(CloudError::NotFound(what)) => {
                warn!("Some instances of {} are gone: {}", state.name, what);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn first_tagged(&self, resource_type: ResourceType, name: &str) -> Option<String> {
        match self.clients.network.find_by_name_tag(resource_type, name).await {
            Ok(ids) => ids.into_iter().next(),
            Err(e) => {
                warn!("Lookup of {} {} failed: {}", resource_type, name, e);
                None
            }
        }
    }
}

#[async_trait]
impl Deployer for EcsDeployer {
    fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    fn deploy_type(&self) -> DeployType {
        DeployType::Ecs
    }

    fn preflight(&self) -> Result<(), DeployerError> {
        self.deployment.validate()?;
        self.resolve_images().map(|_| ())
    }

    async fn create_deployment(
        &self,
        uploaded_files: &HashMap<String, PathBuf>,
    ) -> Result<(), DeployerError> {
        let name = self.deployment.name.clone();
        self.deployment.validate()?;
        let images = self.resolve_images()?;

        let provisioner = Provisioner {
            deployment: &self.deployment,
            clients: &self.clients,
            transfer: self.transfer.as_ref(),
            uploaded_files,
            images: &images,
            vpc_cidr: self.pipeline.vpc_cidr.to_string(),
            subnet_cidr: self.pipeline.subnet_cidr.to_string(),
            ssh_user: self.pipeline.ssh_user.clone(),
            waiter: self.pipeline.waiter_options(),
            readiness: self.pipeline.readiness_poll(),
        };

        let span = info_span!("create_deployment", deployment = %name);
        async {
            // Readers keep seeing the last published state while the
            // pipeline runs
            let _run = self.runs.lock().await;
            let mut state = self.cluster_state().await;
            let result = match provisioner.run(&mut state).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("Provisioning {} failed, rolling back: {}", name, e);
                    if let Err(rollback) = self.teardown().run(&mut state).await {
                        error!("Rollback of {} incomplete: {}", name, rollback);
                    }
                    Err(e)
                }
            };
            *self.state.write().await = state;
            result
        }
        .instrument(span)
        .await
    }

    async fn update_deployment(&self, _deployment: &Deployment) -> Result<(), DeployerError> {
        Err(DeployerError::UnsupportedOperation("unimplemented".to_string()))
    }

    async fn deploy_extensions(&self, _extensions: &Deployment) -> Result<(), DeployerError> {
        Err(DeployerError::UnsupportedOperation("unimplemented".to_string()))
    }

    async fn delete_deployment(&self) -> Result<(), DeployerError> {
        let span = info_span!("delete_deployment", deployment = %self.deployment.name);
        async {
            info!("Deleting deployment {}", self.deployment.name);
            let _run = self.runs.lock().await;
            let mut state = self.cluster_state().await;
            let result = self.teardown().run(&mut state).await;
            *self.state.write().await = state;
            result
        }
        .instrument(span)
        .await
    }

    async fn reload_cluster_state(&self, store_info: Option<Value>) -> Result<(), DeployerError> {
        let info: EcsStoreInfo = match store_info {
            Some(value) if !value.is_null() => serde_json::from_value(value)?,
            _ => EcsStoreInfo::default(),
        };

        let mut state = ClusterState::for_deployment(&self.deployment);
        for kind in ResourceKind::ALL {
            state.mark_created(kind);
        }
        state.instance_ids = info.instance_ids;
        state.node_infos = info.node_infos;

        // Installed before the lookups so a failed reload still tears down by
        // name; with no VPC id the teardown resolves the network itself.
        *self.state.write().await = state.clone();

        let vpc_id = find_vpc(&self.clients, &state.vpc_name())
            .await
            .map_err(|e| DeployerError::NotFound(format!("{}: {}", state.name, e)))?;
        if info.vpc_id.as_deref().is_some_and(|stored| stored != vpc_id) {
            warn!("Stored VPC of {} differs from tagged VPC {}", state.name, vpc_id);
        }
        state.vpc_id = Some(vpc_id);
        state.subnet_id = self
            .first_tagged(ResourceType::Subnet, &state.subnet_name())
            .await;
        state.internet_gateway_id = self
            .first_tagged(ResourceType::InternetGateway, &state.internet_gateway_name())
            .await;
        state.security_group_id = self
            .clients
            .network
            .find_security_groups(&state.security_group_name())
            .await?
            .into_iter()
            .next();

        self.refresh_instances(&mut state).await?;

        info!(
            "Reloaded {} with {} instance(s) in {:?}",
            state.name,
            state.instance_ids.len(),
            state.vpc_id
        );
        *self.state.write().await = state;
        Ok(())
    }

    async fn get_service_url(&self, service_name: &str) -> Result<String, DeployerError> {
        Ok(self.get_service_address(service_name).await?.to_string())
    }

    async fn get_service_address(
        &self,
        service_name: &str,
    ) -> Result<ServiceAddress, DeployerError> {
        let (node_id, port) = self.locate_service(service_name)?;
        let state = self.state.read().await;
        let host = state
            .node_infos
            .get(&node_id)
            .and_then(|info| info.public_address.clone())
            .ok_or_else(|| {
                DeployerError::NotFound(format!("Node {} has no public address", node_id))
            })?;
        Ok(ServiceAddress { host, port })
    }

    async fn get_service_mappings(
        &self,
    ) -> Result<BTreeMap<String, ServiceMapping>, DeployerError> {
        let state = self.state.read().await;
        let mut mappings = BTreeMap::new();

        for mapping in &self.deployment.node_mapping {
            let info = state.node_infos.get(&mapping.id);
            let port = self.task_port(&mapping.task);
            let url = |address: Option<&String>| match (address, port) {
                (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
                (Some(host), None) => Some(host.clone()),
                _ => None,
            };

            mappings.insert(
                mapping.service_name(),
                ServiceMapping {
                    node_id: mapping.id,
                    public_url: url(info.and_then(|i| i.public_address.as_ref())),
                    private_url: url(info.and_then(|i| i.private_address.as_ref())),
                },
            );
        }
        Ok(mappings)
    }

    async fn get_store_info(&self) -> Option<Value> {
        let state = self.state.read().await;
        serde_json::to_value(EcsStoreInfo::from(&*state)).ok()
    }

    fn new_store_info(&self) -> Value {
        serde_json::to_value(EcsStoreInfo::default()).unwrap_or(Value::Null)
    }

    async fn get_scheduler(&self) -> Option<SchedulerHandle> {
        self.scheduler.read().await.clone()
    }

    async fn set_scheduler(&self, scheduler: SchedulerHandle) {
        *self.scheduler.write().await = Some(scheduler);
    }
}
