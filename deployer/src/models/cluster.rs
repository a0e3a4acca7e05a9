//! Cluster state built by the provisioning pipeline

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::models::deployment::{Deployment, NodeId};

/// Kinds of cloud resources a deployment owns
///
/// A kind is recorded as soon as its first create call succeeds, so a
/// teardown only addresses kinds that may actually exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    LogGroups,
    ContainerCluster,
    TaskDefinitions,
    IdentityRole,
    Network,
    Compute,
    Services,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::LogGroups,
        ResourceKind::ContainerCluster,
        ResourceKind::TaskDefinitions,
        ResourceKind::IdentityRole,
        ResourceKind::Network,
        ResourceKind::Compute,
        ResourceKind::Services,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::LogGroups => "log groups",
            ResourceKind::ContainerCluster => "container cluster",
            ResourceKind::TaskDefinitions => "task definitions",
            ResourceKind::IdentityRole => "identity role",
            ResourceKind::Network => "network",
            ResourceKind::Compute => "compute",
            ResourceKind::Services => "services",
        };
        f.write_str(name)
    }
}

/// Key pair generated for the deployment's nodes
#[derive(Debug, Clone)]
pub struct KeyPairHandle {
    pub name: String,
    pub fingerprint: String,
    pub material: SecretString,
}

/// Correlates a logical node with its concrete instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub instance_id: String,

    /// Container-agent registration, set once the node joins the cluster
    pub agent_registration_id: Option<String>,

    pub public_address: Option<String>,

    pub private_address: Option<String>,
}

/// Provisioned resource identifiers for one deployment
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub name: String,
    pub region: String,
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    pub internet_gateway_id: Option<String>,
    pub security_group_id: Option<String>,
    pub key_pair: Option<KeyPairHandle>,
    pub instance_ids: Vec<String>,
    pub node_infos: BTreeMap<NodeId, NodeInfo>,
    created: BTreeSet<ResourceKind>,
}

impl ClusterState {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            vpc_id: None,
            subnet_id: None,
            internet_gateway_id: None,
            security_group_id: None,
            key_pair: None,
            instance_ids: Vec::new(),
            node_infos: BTreeMap::new(),
            created: BTreeSet::new(),
        }
    }

    pub fn for_deployment(deployment: &Deployment) -> Self {
        Self::new(&deployment.name, &deployment.region)
    }

    /// Record that resources of this kind may now exist
    pub fn mark_created(&mut self, kind: ResourceKind) {
        self.created.insert(kind);
    }

    pub fn has(&self, kind: ResourceKind) -> bool {
        self.created.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    /// Forget every identifier; the name and region survive
    pub fn clear(&mut self) {
        *self = Self::new(std::mem::take(&mut self.name), std::mem::take(&mut self.region));
    }

    pub fn add_instance(&mut self, node_id: NodeId, instance_id: String) {
        if !self.instance_ids.contains(&instance_id) {
            self.instance_ids.push(instance_id.clone());
        }
        self.node_infos.insert(
            node_id,
            NodeInfo {
                instance_id,
                ..Default::default()
            },
        );
    }

    pub fn node_for_instance_mut(&mut self, instance_id: &str) -> Option<&mut NodeInfo> {
        self.node_infos
            .values_mut()
            .find(|info| info.instance_id == instance_id)
    }

    // Resource names derived from the deployment name. Teardown and reload
    // find resources by these names, so they must stay stable.

    pub fn vpc_name(&self) -> String {
        format!("{}-vpc", self.name)
    }

    pub fn subnet_name(&self) -> String {
        format!("{}-subnet", self.name)
    }

    pub fn internet_gateway_name(&self) -> String {
        self.name.clone()
    }

    pub fn security_group_name(&self) -> String {
        self.name.clone()
    }

    pub fn key_name(&self) -> String {
        format!("{}-key", self.name)
    }

    pub fn instance_profile_name(&self) -> String {
        self.name.clone()
    }

    pub fn cluster_name(&self) -> String {
        self.name.clone()
    }
}
