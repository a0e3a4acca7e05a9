//! Provisioning pipeline
//!
//! Ten ordered steps, each extending the cluster state. A step fails with
//! the first collaborator error it sees; the caller rolls back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use futures::future::join_all;
use secrecy::SecretString;
use tracing::{debug, info};

use crate::cloud::types::{
    InstanceAttribute, InstanceState, LaunchSpec, ResourceType, ServiceRequest, SubnetState, Tag,
    VpcAttribute,
};
use crate::cloud::waiter::{poll_until, wait_until, PollOptions, WaiterOptions};
use crate::cloud::CloudClients;
use crate::deploy::ecs::network::{
    ingress_rules, instance_tags, user_data, DEFAULT_ROLE_POLICY, TRUST_DOCUMENT,
};
use crate::deploy::upload::{FileTransfer, RemoteTarget};
use crate::errors::{CloudError, DeployerError};
use crate::models::cluster::{ClusterState, KeyPairHandle, NodeInfo, ResourceKind};
use crate::models::deployment::{
    placement_value, Deployment, LogConfiguration, NodeId, TaskDefinition, PLACEMENT_ATTRIBUTE,
};

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// Named provisioning steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionStep {
    LogGroups,
    ClusterAndTasks,
    IdentityRole,
    Network,
    Compute,
    Addresses,
    FileUpload,
    ClusterReadiness,
    PlacementAttributes,
    Services,
}

impl ProvisionStep {
    pub const ALL: [ProvisionStep; 10] = [
        ProvisionStep::LogGroups,
        ProvisionStep::ClusterAndTasks,
        ProvisionStep::IdentityRole,
        ProvisionStep::Network,
        ProvisionStep::Compute,
        ProvisionStep::Addresses,
        ProvisionStep::FileUpload,
        ProvisionStep::ClusterReadiness,
        ProvisionStep::PlacementAttributes,
        ProvisionStep::Services,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::LogGroups => "log-groups",
            ProvisionStep::ClusterAndTasks => "cluster-and-tasks",
            ProvisionStep::IdentityRole => "identity-role",
            ProvisionStep::Network => "network",
            ProvisionStep::Compute => "compute",
            ProvisionStep::Addresses => "addresses",
            ProvisionStep::FileUpload => "file-upload",
            ProvisionStep::ClusterReadiness => "cluster-readiness",
            ProvisionStep::PlacementAttributes => "placement-attributes",
            ProvisionStep::Services => "services",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy of `task` whose containers all ship logs to a group named after them
pub fn with_log_configuration(task: &TaskDefinition, region: &str) -> TaskDefinition {
    let mut task = task.clone();
    for container in &mut task.container_definitions {
        let options = BTreeMap::from([
            ("awslogs-group".to_string(), container.name.clone()),
            ("awslogs-region".to_string(), region.to_string()),
            ("awslogs-stream-prefix".to_string(), "awslogs".to_string()),
        ]);
        container.log_configuration = Some(LogConfiguration {
            log_driver: "awslogs".to_string(),
            options,
        });
    }
    task
}

/// Everything one provisioning run needs besides the state it builds
pub struct Provisioner<'a> {
    pub deployment: &'a Deployment,
    pub clients: &'a CloudClients,
    pub transfer: &'a dyn FileTransfer,
    pub uploaded_files: &'a HashMap<String, PathBuf>,
    /// Resolved image per node
    pub images: &'a BTreeMap<NodeId, String>,
    pub vpc_cidr: String,
    pub subnet_cidr: String,
    pub ssh_user: String,
    pub waiter: WaiterOptions,
    pub readiness: PollOptions,
}

impl Provisioner<'_> {
    /// Run every step in order, stopping at the first failure
    pub async fn run(&self, state: &mut ClusterState) -> Result<(), DeployerError> {
        for step in ProvisionStep::ALL {
            info!("Provisioning {}: {}", self.deployment.name, step);
            self.run_step(step, state)
                .await
                .map_err(|e| DeployerError::provisioning(step, e))?;
        }
        info!("Provisioned {}", self.deployment.name);
        Ok(())
    }

    async fn run_step(
        &self,
        step: ProvisionStep,
        state: &mut ClusterState,
    ) -> Result<(), CloudError> {
        match step {
            ProvisionStep::LogGroups => self.log_groups(state).await,
            ProvisionStep::ClusterAndTasks => self.cluster_and_tasks(state).await,
            ProvisionStep::IdentityRole => self.identity_role(state).await,
            ProvisionStep::Network => self.network(state).await,
            ProvisionStep::Compute => self.compute(state).await,
            ProvisionStep::Addresses => self.addresses(state).await,
            ProvisionStep::FileUpload => self.upload_files(state).await,
            ProvisionStep::ClusterReadiness => self.cluster_readiness(state).await,
            ProvisionStep::PlacementAttributes => self.placement_attributes(state).await,
            ProvisionStep::Services => self.services(state).await,
        }
    }

    async fn log_groups(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let containers = self
            .deployment
            .task_definitions
            .iter()
            .flat_map(|t| t.container_definitions.iter());

        for container in containers {
            match self.clients.logs.create_log_group(&container.name).await {
                Ok(()) => {}
                Err(CloudError::AlreadyExists(_)) => {
                    debug!("Log group {} already exists", container.name);
                }
                Err(e) => return Err(e),
            }
            state.mark_created(ResourceKind::LogGroups);
        }
        Ok(())
    }

    async fn cluster_and_tasks(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let cluster = state.cluster_name();
        self.clients.containers.create_cluster(&cluster).await?;
        state.mark_created(ResourceKind::ContainerCluster);

        for task in &self.deployment.task_definitions {
            let task = with_log_configuration(task, &self.deployment.region);
            let revision = self.clients.containers.register_task_definition(&task).await?;
            state.mark_created(ResourceKind::TaskDefinitions);
            info!("Registered task definition {}:{}", task.family, revision);
        }
        Ok(())
    }

    async fn identity_role(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let identity = &self.clients.identity;
        let role = self.deployment.role_name();
        let policy = self.deployment.policy_name();
        let profile = state.instance_profile_name();

        identity.create_role(&role, TRUST_DOCUMENT).await?;
        state.mark_created(ResourceKind::IdentityRole);

        let document = self
            .deployment
            .iam_role
            .policy_document
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_ROLE_POLICY);
        identity.put_role_policy(&role, &policy, document).await?;

        identity.create_instance_profile(&profile).await?;

        let profile_ref = &profile;
        wait_until("instance profile exists", &self.waiter, || async move {
            identity.instance_profile_exists(profile_ref).await
        })
        .await?;

        identity.add_role_to_instance_profile(&profile, &role).await?;
        Ok(())
    }

    async fn network(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let network = &self.clients.network;

        let vpc_id = network.create_vpc(&self.vpc_cidr).await?;
        state.vpc_id = Some(vpc_id.clone());
        state.mark_created(ResourceKind::Network);
        info!("Created VPC {}", vpc_id);

        network
            .modify_vpc_attribute(&vpc_id, VpcAttribute::DnsSupport, true)
            .await?;
        network
            .modify_vpc_attribute(&vpc_id, VpcAttribute::DnsHostnames, true)
            .await?;
        network
            .create_tags(&[vpc_id.clone()], &[Tag::name(state.vpc_name())])
            .await?;

        let subnet_id = network.create_subnet(&vpc_id, &self.subnet_cidr).await?;
        state.subnet_id = Some(subnet_id.clone());

        let subnet_ref = &subnet_id;
        wait_until("subnet available", &self.waiter, || async move {
            Ok::<bool, CloudError>(network.subnet_state(subnet_ref).await? == SubnetState::Available)
        })
        .await?;
        network
            .create_tags(&[subnet_id.clone()], &[Tag::name(state.subnet_name())])
            .await?;

        let gateway_id = network.create_internet_gateway().await?;
        state.internet_gateway_id = Some(gateway_id.clone());
        network
            .create_tags(
                &[gateway_id.clone()],
                &[Tag::name(state.internet_gateway_name())],
            )
            .await?;
        network.attach_internet_gateway(&gateway_id, &vpc_id).await?;

        let route_table = network
            .describe_route_tables()
            .await?
            .into_iter()
            .find(|rt| rt.vpc_id == vpc_id)
            .ok_or_else(|| CloudError::NotFound(format!("route table for {}", vpc_id)))?;
        network
            .create_route(&route_table.route_table_id, DEFAULT_ROUTE, &gateway_id)
            .await?;

        let group_id = network
            .create_security_group(
                &state.security_group_name(),
                &format!("Security group for deployment {}", state.name),
                &vpc_id,
            )
            .await?;
        state.security_group_id = Some(group_id.clone());

        for rule in ingress_rules(&self.deployment.allowed_ports) {
            debug!("Authorizing ingress {} on {}", rule, group_id);
            network.authorize_ingress(&group_id, &rule).await?;
        }
        Ok(())
    }

    async fn compute(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let compute = &self.clients.compute;

        let key_pair = compute.create_key_pair(&state.key_name()).await?;
        state.key_pair = Some(KeyPairHandle {
            name: key_pair.name,
            fingerprint: key_pair.fingerprint,
            material: key_pair.material,
        });
        state.mark_created(ResourceKind::Compute);

        let (Some(subnet_id), Some(group_id)) =
            (state.subnet_id.clone(), state.security_group_id.clone())
        else {
            return Err(CloudError::NotFound(
                "subnet or security group for instance launch".to_string(),
            ));
        };

        let boot_script = user_data(&state.cluster_name());
        let tags = instance_tags(&state.name);

        for node in &self.deployment.cluster_definition.nodes {
            let image_id = self
                .images
                .get(&node.id)
                .cloned()
                .ok_or_else(|| CloudError::NotFound(format!("image for node {}", node.id)))?;

            let spec = LaunchSpec {
                image_id,
                instance_type: node.instance_type.clone(),
                key_name: state.key_name(),
                subnet_id: subnet_id.clone(),
                security_group_ids: vec![group_id.clone()],
                associate_public_address: true,
                instance_profile: state.instance_profile_name(),
                user_data: boot_script.clone(),
            };

            let instance_id = compute.run_instance(&spec).await?;
            info!("Launched instance {} for node {}", instance_id, node.id);
            state.add_instance(node.id, instance_id.clone());
            compute_tags(self.clients, &instance_id, &tags).await?;
        }

        let ids = &state.instance_ids;
        wait_until("instance exists", &self.waiter, || async move {
            match compute.describe_instances(ids).await {
                Ok(found) => Ok(found.len() == ids.len()),
                Err(CloudError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await?;

        // The overlay agent reads the peer group tag during boot
        self.clients.network.create_tags(ids, &tags).await?;

        wait_until("instance status ok", &self.waiter, || async move {
            let found = compute.describe_instances(ids).await?;
            Ok::<bool, CloudError>(
                found
                    .iter()
                    .all(|i| i.state == InstanceState::Running && i.status_ok),
            )
        })
        .await?;
        Ok(())
    }

    async fn addresses(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let described = self
            .clients
            .compute
            .describe_instances(&state.instance_ids)
            .await?;

        for instance in described {
            if let Some(info) = state.node_for_instance_mut(&instance.instance_id) {
                debug!(
                    "Instance {} reachable at {:?}",
                    instance.instance_id, instance.public_dns_name
                );
                info.public_address = instance.public_dns_name;
                info.private_address = instance.private_ip;
            }
        }
        Ok(())
    }

    async fn upload_files(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        if self.deployment.files.is_empty() {
            info!("No files to upload for {}", self.deployment.name);
            return Ok(());
        }

        let key: SecretString = state
            .key_pair
            .as_ref()
            .map(|k| k.material.clone())
            .ok_or_else(|| CloudError::NotFound("key pair for file upload".to_string()))?;

        let mut files = Vec::new();
        for file in &self.deployment.files {
            let location_key = file.location_key(&self.deployment.user_id);
            let local = self.uploaded_files.get(&location_key).ok_or_else(|| {
                CloudError::NotFound(format!("uploaded file {}", file.file_id))
            })?;
            files.push((local.clone(), file.path.clone()));
        }

        let uploads = state.node_infos.iter().map(|(node_id, info)| {
            let target = info.public_address.clone().map(|host| RemoteTarget {
                host,
                user: self.ssh_user.clone(),
                private_key: key.clone(),
            });
            let files = &files;
            async move {
                let target = target.ok_or_else(|| {
                    CloudError::NotFound(format!("public address of node {}", node_id))
                })?;
                for (local, remote) in files {
                    self.transfer.copy_to_remote(&target, local, remote).await?;
                }
                Ok::<(), CloudError>(())
            }
        });

        for result in join_all(uploads).await {
            result?;
        }
        Ok(())
    }

    async fn cluster_readiness(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let containers = &self.clients.containers;
        let cluster = state.cluster_name();
        let cluster_ref = &cluster;
        let expected = self.deployment.node_count();

        poll_until("cluster registration", &self.readiness, || async move {
            let description = containers.describe_cluster(cluster_ref).await?;
            if description.registered_instances >= expected {
                return Ok::<bool, CloudError>(true);
            }
            info!(
                "Cluster {} not ready, registered {} of {}",
                cluster_ref, description.registered_instances, expected
            );
            Ok(false)
        })
        .await
    }

    async fn placement_attributes(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let cluster = state.cluster_name();
        let registered = self
            .clients
            .containers
            .list_container_instances(&cluster)
            .await?;

        for instance in registered {
            if let Some(info) = state.node_for_instance_mut(&instance.ec2_instance_id) {
                info.agent_registration_id = Some(instance.arn);
            }
        }

        let nodes: BTreeSet<NodeId> = self.deployment.node_mapping.iter().map(|m| m.id).collect();
        for node_id in nodes {
            let target_id = state
                .node_infos
                .get(&node_id)
                .and_then(|info: &NodeInfo| info.agent_registration_id.clone())
                .ok_or_else(|| {
                    CloudError::NotFound(format!("container instance for node {}", node_id))
                })?;

            let attribute = InstanceAttribute {
                name: PLACEMENT_ATTRIBUTE.to_string(),
                value: placement_value(node_id),
                target_id,
            };
            self.clients
                .containers
                .put_attribute(&cluster, &attribute)
                .await?;
        }
        Ok(())
    }

    async fn services(&self, state: &mut ClusterState) -> Result<(), CloudError> {
        let cluster = state.cluster_name();
        for mapping in &self.deployment.node_mapping {
            let request = ServiceRequest {
                service_name: mapping.service_name(),
                task_definition: mapping.task.clone(),
                desired_count: 1,
                placement_expression: mapping.placement_expression(),
            };
            self.clients
                .containers
                .create_service(&cluster, &request)
                .await?;
            state.mark_created(ResourceKind::Services);
            info!("Started service {}", request.service_name);
        }
        Ok(())
    }
}

async fn compute_tags(
    clients: &CloudClients,
    instance_id: &str,
    tags: &[Tag],
) -> Result<(), CloudError> {
    clients
        .network
        .create_tags(&[instance_id.to_string()], tags)
        .await
}

/// First VPC carrying the deployment's name tag
pub async fn find_vpc(clients: &CloudClients, vpc_name: &str) -> Result<String, CloudError> {
    clients
        .network
        .find_by_name_tag(ResourceType::Vpc, vpc_name)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::NotFound(format!("vpc tagged {}", vpc_name)))
}
