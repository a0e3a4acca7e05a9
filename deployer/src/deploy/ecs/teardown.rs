//! Teardown pipeline
//!
//! Deletes everything a deployment owns in reverse dependency order. Every
//! step is attempted even when an earlier one fails; failures are collected
//! and reported together. A resource that is already gone counts as clean.

use std::fmt;

use tracing::{debug, info, warn};

use crate::cloud::types::{InstanceState, ResourceType};
use crate::cloud::waiter::{wait_until, WaiterOptions};
use crate::cloud::CloudClients;
use crate::deploy::ecs::provision::find_vpc;
use crate::errors::{CloudError, DeployerError, TeardownFailures};
use crate::models::cluster::{ClusterState, ResourceKind};
use crate::models::deployment::Deployment;

/// Named teardown steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    ResolveNetwork,
    Services,
    TaskDefinitions,
    Instances,
    DetachRole,
    InstanceProfile,
    RolePolicy,
    Role,
    KeyPair,
    SecurityGroups,
    InternetGateways,
    Subnets,
    Vpc,
    Cluster,
}

impl TeardownStep {
    pub const ALL: [TeardownStep; 14] = [
        TeardownStep::ResolveNetwork,
        TeardownStep::Services,
        TeardownStep::TaskDefinitions,
        TeardownStep::Instances,
        TeardownStep::DetachRole,
        TeardownStep::InstanceProfile,
        TeardownStep::RolePolicy,
        TeardownStep::Role,
        TeardownStep::KeyPair,
        TeardownStep::SecurityGroups,
        TeardownStep::InternetGateways,
        TeardownStep::Subnets,
        TeardownStep::Vpc,
        TeardownStep::Cluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::ResolveNetwork => "resolve-network",
            TeardownStep::Services => "services",
            TeardownStep::TaskDefinitions => "task-definitions",
            TeardownStep::Instances => "instances",
            TeardownStep::DetachRole => "detach-role",
            TeardownStep::InstanceProfile => "instance-profile",
            TeardownStep::RolePolicy => "role-policy",
            TeardownStep::Role => "role",
            TeardownStep::KeyPair => "key-pair",
            TeardownStep::SecurityGroups => "security-groups",
            TeardownStep::InternetGateways => "internet-gateways",
            TeardownStep::Subnets => "subnets",
            TeardownStep::Vpc => "vpc",
            TeardownStep::Cluster => "cluster",
        }
    }

    /// The resource kind whose presence makes this step necessary
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            TeardownStep::Services => ResourceKind::Services,
            TeardownStep::TaskDefinitions => ResourceKind::TaskDefinitions,
            TeardownStep::Instances | TeardownStep::KeyPair => ResourceKind::Compute,
            TeardownStep::DetachRole
            | TeardownStep::InstanceProfile
            | TeardownStep::RolePolicy
            | TeardownStep::Role => ResourceKind::IdentityRole,
            TeardownStep::ResolveNetwork
            | TeardownStep::SecurityGroups
            | TeardownStep::InternetGateways
            | TeardownStep::Subnets
            | TeardownStep::Vpc => ResourceKind::Network,
            TeardownStep::Cluster => ResourceKind::ContainerCluster,
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Already gone is as good as deleted
fn tolerate_missing(result: Result<(), CloudError>) -> Result<(), CloudError> {
    match result {
        Err(CloudError::NotFound(what)) => {
            debug!("Already deleted: {}", what);
            Ok(())
        }
        other => other,
    }
}

/// Fold per-item failures of one step into a single error
fn first_error(mut errors: Vec<CloudError>) -> Result<(), CloudError> {
    if errors.len() > 1 {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(CloudError::api("Teardown", messages.join("; ")));
    }
    match errors.pop() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub struct Teardown<'a> {
    pub deployment: &'a Deployment,
    pub clients: &'a CloudClients,
    pub waiter: WaiterOptions,
}

impl Teardown<'_> {
    /// Delete every resource kind recorded in `state`
    ///
    /// Only an unresolvable network aborts early. On success the state is
    /// cleared; on failure it is kept so the teardown can be retried.
    pub async fn run(&self, state: &mut ClusterState) -> Result<(), DeployerError> {
        if state.is_empty() {
            info!("Nothing to tear down for {}", state.name);
            return Ok(());
        }

        if state.has(ResourceKind::Network) && state.vpc_id.is_none() {
            let vpc_id = find_vpc(self.clients, &state.vpc_name())
                .await
                .map_err(|e| {
                    DeployerError::NotFound(format!(
                        "network of deployment {} could not be resolved: {}",
                        state.name, e
                    ))
                })?;
            state.vpc_id = Some(vpc_id);
        }

        let mut failures = TeardownFailures::default();
        for step in TeardownStep::ALL.into_iter().skip(1) {
            if !state.has(step.resource_kind()) {
                debug!("Skipping teardown step {}, nothing was created", step);
                continue;
            }

            info!("Tearing down {}: {}", state.name, step);
            if let Err(e) = self.run_step(step, state).await {
                warn!("Teardown step {} failed: {}", step, e);
                failures.push(step, e.to_string());
            }
        }

        if !failures.is_empty() {
            return Err(DeployerError::TeardownError(failures));
        }

        info!("Teardown of {} complete", state.name);
        state.clear();
        Ok(())
    }

    async fn run_step(&self, step: TeardownStep, state: &ClusterState) -> Result<(), CloudError> {
        let identity = &self.clients.identity;
        match step {
            TeardownStep::ResolveNetwork => Ok(()),
            TeardownStep::Services => self.services(state).await,
            TeardownStep::TaskDefinitions => self.task_definitions().await,
            TeardownStep::Instances => self.instances(state).await,
            TeardownStep::DetachRole => tolerate_missing(
                identity
                    .remove_role_from_instance_profile(
                        &state.instance_profile_name(),
                        &self.deployment.role_name(),
                    )
                    .await,
            ),
            TeardownStep::InstanceProfile => tolerate_missing(
                identity
                    .delete_instance_profile(&state.instance_profile_name())
                    .await,
            ),
            TeardownStep::RolePolicy => tolerate_missing(
                identity
                    .delete_role_policy(&self.deployment.role_name(), &self.deployment.policy_name())
                    .await,
            ),
            TeardownStep::Role => {
                tolerate_missing(identity.delete_role(&self.deployment.role_name()).await)
            }
            TeardownStep::KeyPair => tolerate_missing(
                self.clients
                    .compute
                    .delete_key_pair(&state.key_name())
                    .await,
            ),
            TeardownStep::SecurityGroups => self.security_groups(state).await,
            TeardownStep::InternetGateways => self.internet_gateways(state).await,
            TeardownStep::Subnets => self.subnets(state).await,
            TeardownStep::Vpc => match &state.vpc_id {
                Some(vpc_id) => tolerate_missing(self.clients.network.delete_vpc(vpc_id).await),
                None => Ok(()),
            },
            TeardownStep::Cluster => tolerate_missing(
                self.clients
                    .containers
                    .delete_cluster(&state.cluster_name())
                    .await,
            ),
        }
    }

    async fn services(&self, state: &ClusterState) -> Result<(), CloudError> {
        let containers = &self.clients.containers;
        let cluster = state.cluster_name();
        let mut errors = Vec::new();

        for mapping in &self.deployment.node_mapping {
            let service = mapping.service_name();
            match containers.update_service(&cluster, &service, 0).await {
                Ok(()) => {}
                Err(CloudError::NotFound(_)) => {
                    debug!("Service {} already gone", service);
                    continue;
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            }
            if let Err(e) = tolerate_missing(containers.delete_service(&cluster, &service).await) {
                errors.push(e);
            }
        }
        first_error(errors)
    }

    async fn task_definitions(&self) -> Result<(), CloudError> {
        let containers = &self.clients.containers;
        let mut errors = Vec::new();

        for task in &self.deployment.task_definitions {
            let revision = match containers.describe_task_definition(&task.family).await {
                Ok(revision) => revision,
                Err(CloudError::NotFound(_)) => continue,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if let Err(e) = tolerate_missing(
                containers
                    .deregister_task_definition(&task.family, revision)
                    .await,
            ) {
                errors.push(e);
            }
        }
        first_error(errors)
    }

    async fn instances(&self, state: &ClusterState) -> Result<(), CloudError> {
        let compute = &self.clients.compute;
        if state.instance_ids.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();
        let mut known = Vec::new();
        for instance_id in &state.instance_ids {
            let single = std::slice::from_ref(instance_id);
            match compute.terminate_instances(single).await {
                Ok(()) => known.push(instance_id.clone()),
                Err(CloudError::NotFound(_)) => debug!("Instance {} already gone", instance_id),
                Err(e) => errors.push(e),
            }
        }

        if !known.is_empty() {
            let ids = &known;
            let waited = wait_until("instance terminated", &self.waiter, || async move {
                let found = compute.describe_instances(ids).await?;
                Ok::<bool, CloudError>(found.iter().all(|i| i.state == InstanceState::Terminated))
            })
            .await;
            if let Err(e) = waited {
                errors.push(e);
            }
        }
        first_error(errors)
    }

    async fn security_groups(&self, state: &ClusterState) -> Result<(), CloudError> {
        let network = &self.clients.network;
        let mut errors = Vec::new();
        for group_id in network.find_security_groups(&state.security_group_name()).await? {
            if let Err(e) = tolerate_missing(network.delete_security_group(&group_id).await) {
                errors.push(e);
            }
        }
        first_error(errors)
    }

    async fn internet_gateways(&self, state: &ClusterState) -> Result<(), CloudError> {
        let network = &self.clients.network;
        let gateways = network
            .find_by_name_tag(ResourceType::InternetGateway, &state.internet_gateway_name())
            .await?;

        let mut errors = Vec::new();
        for gateway_id in gateways {
            if let Some(vpc_id) = &state.vpc_id {
                if let Err(e) =
                    tolerate_missing(network.detach_internet_gateway(&gateway_id, vpc_id).await)
                {
                    errors.push(e);
                    continue;
                }
            }
            if let Err(e) = tolerate_missing(network.delete_internet_gateway(&gateway_id).await) {
                errors.push(e);
            }
        }
        first_error(errors)
    }

    async fn subnets(&self, state: &ClusterState) -> Result<(), CloudError> {
        let network = &self.clients.network;
        let subnets = network
            .find_by_name_tag(ResourceType::Subnet, &state.subnet_name())
            .await?;

        let mut errors = Vec::new();
        for subnet_id in subnets {
            if let Err(e) = tolerate_missing(network.delete_subnet(&subnet_id).await) {
                errors.push(e);
            }
        }
        first_error(errors)
    }
}
