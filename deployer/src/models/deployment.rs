//! Deployment descriptor models

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Logical node identifier assigned by the descriptor author
pub type NodeId = u32;

/// A deployment descriptor submitted by a user
///
/// Accepted once and treated as read-only afterwards; there is no update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Deployment name, also the root of every derived resource name
    pub name: String,

    /// Cloud region
    pub region: String,

    /// Owner user ID
    #[serde(default)]
    pub user_id: String,

    /// Compute nodes to launch
    pub cluster_definition: ClusterDefinition,

    /// Container task templates
    #[serde(default)]
    pub task_definitions: Vec<TaskDefinition>,

    /// Logical node to task mappings
    #[serde(default)]
    pub node_mapping: Vec<NodeMapping>,

    /// Extra TCP ports opened to the world
    #[serde(default)]
    pub allowed_ports: Vec<u16>,

    /// Identity role attached to every node
    #[serde(default)]
    pub iam_role: IamRoleSpec,

    /// Files pushed to every node after launch
    #[serde(default)]
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDefinition {
    pub nodes: Vec<Node>,
}

/// A compute node definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,

    /// Image override; falls back to the region's container-host image
    #[serde(default)]
    pub image_id: Option<String>,

    pub instance_type: String,
}

/// A container task template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub family: String,
    pub container_definitions: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,

    #[serde(default)]
    pub memory: Option<u32>,

    #[serde(default)]
    pub cpu: Option<u32>,

    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    pub log_driver: String,
    pub options: BTreeMap<String, String>,
}

/// Pins one task to one logical node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMapping {
    pub id: NodeId,
    pub task: String,
}

/// Name of the instance attribute used for placement
pub const PLACEMENT_ATTRIBUTE: &str = "nodeId";

impl NodeMapping {
    /// Service name derived from the mapping
    pub fn service_name(&self) -> String {
        format!("{}-node{}", self.task, self.id)
    }

    /// Placement attribute value carried by the node realizing this mapping
    pub fn placement_value(&self) -> String {
        placement_value(self.id)
    }

    /// Placement expression requiring the mapping's node
    pub fn placement_expression(&self) -> String {
        format!(
            "attribute:{} == {}",
            PLACEMENT_ATTRIBUTE,
            self.placement_value()
        )
    }
}

pub fn placement_value(node_id: NodeId) -> String {
    format!("node-{}", node_id)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleSpec {
    /// Role name override
    #[serde(default)]
    pub role_name: Option<String>,

    /// Inline policy name override
    #[serde(default)]
    pub policy_name: Option<String>,

    /// Inline policy document; the default container-host policy when absent
    #[serde(default)]
    pub policy_document: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    pub file_id: String,
    pub path: String,
}

impl FileUpload {
    /// Key into the uploaded-file location map
    pub fn location_key(&self, user_id: &str) -> String {
        format!("{}_{}", user_id, self.file_id)
    }
}

impl Deployment {
    /// Total number of nodes the cluster must register
    pub fn node_count(&self) -> usize {
        self.cluster_definition.nodes.len()
    }

    pub fn task_definition(&self, family: &str) -> Option<&TaskDefinition> {
        self.task_definitions.iter().find(|t| t.family == family)
    }

    /// Identity role name, `<name>-role` unless overridden
    pub fn role_name(&self) -> String {
        self.iam_role
            .role_name
            .clone()
            .unwrap_or_else(|| format!("{}-role", self.name))
    }

    /// Inline policy name, `<name>-policy` unless overridden
    pub fn policy_name(&self) -> String {
        self.iam_role
            .policy_name
            .clone()
            .unwrap_or_else(|| format!("{}-policy", self.name))
    }

    /// Check the descriptor is complete and self-consistent
    pub fn validate(&self) -> Result<(), DeployerError> {
        if self.name.trim().is_empty() {
            return Err(DeployerError::ValidationError(
                "deployment name is required".to_string(),
            ));
        }

        if self.region.trim().is_empty() {
            return Err(DeployerError::ValidationError(
                "deployment region is required".to_string(),
            ));
        }

        if self.cluster_definition.nodes.is_empty() {
            return Err(DeployerError::ValidationError(
                "cluster definition has no nodes".to_string(),
            ));
        }

        let mut node_ids = HashSet::new();
        for node in &self.cluster_definition.nodes {
            if !node_ids.insert(node.id) {
                return Err(DeployerError::ValidationError(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            if node.instance_type.trim().is_empty() {
                return Err(DeployerError::ValidationError(format!(
                    "node {} has no instance type",
                    node.id
                )));
            }
        }

        let mut families = HashSet::new();
        for task in &self.task_definitions {
            if !families.insert(task.family.as_str()) {
                return Err(DeployerError::ValidationError(format!(
                    "duplicate task family {}",
                    task.family
                )));
            }
        }

        let mut services = HashSet::new();
        for mapping in &self.node_mapping {
            if !node_ids.contains(&mapping.id) {
                return Err(DeployerError::ValidationError(format!(
                    "node mapping references unknown node {}",
                    mapping.id
                )));
            }
            if !families.contains(mapping.task.as_str()) {
                return Err(DeployerError::ValidationError(format!(
                    "node mapping references unknown task {}",
                    mapping.task
                )));
            }
            if !services.insert(mapping.service_name()) {
                return Err(DeployerError::ValidationError(format!(
                    "task {} is mapped to node {} more than once",
                    mapping.task, mapping.id
                )));
            }
        }

        Ok(())
    }
}
