//! Request and response shapes exchanged with cloud collaborators

use std::collections::BTreeMap;
use std::fmt;

use ipnet::Ipv4Net;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// A key/value resource tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::new("Name", value)
    }
}

/// Resource types searchable by tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Vpc,
    Subnet,
    InternetGateway,
    SecurityGroup,
    Instance,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Vpc => "vpc",
            ResourceType::Subnet => "subnet",
            ResourceType::InternetGateway => "internet-gateway",
            ResourceType::SecurityGroup => "security-group",
            ResourceType::Instance => "instance",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpcAttribute {
    DnsSupport,
    DnsHostnames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetState {
    Pending,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// One security group ingress permission for a single port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    pub port: u16,
    pub protocol: Protocol,
    pub cidr: Ipv4Net,
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} from {}", self.port, self.protocol, self.cidr)
    }
}

/// Key material returned by key pair creation
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub name: String,
    pub fingerprint: String,
    pub material: SecretString,
}

/// Parameters for launching a single instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub associate_public_address: bool,
    pub instance_profile: String,
    /// Base64 encoded boot script
    pub user_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: InstanceState,
    /// Both system and instance status checks pass
    pub status_ok: bool,
    pub public_dns_name: Option<String>,
    pub private_ip: Option<String>,
}

/// An instance registered with the container control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInstance {
    pub arn: String,
    pub ec2_instance_id: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAttribute {
    pub name: String,
    pub value: String,
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub service_name: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub placement_expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_name: String,
    pub task_definition: String,
    pub desired_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescription {
    pub cluster_name: String,
    pub registered_instances: usize,
    pub active_services: usize,
}
