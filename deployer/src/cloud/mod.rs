//! Cloud provider collaborators
//!
//! The deployer only talks to the cloud through these traits. Each trait
//! mirrors one provider service: log groups, the container control plane,
//! identity, networking and compute.

pub mod memory;
pub mod types;
pub mod waiter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::CloudError;
use crate::models::deployment::TaskDefinition;
use crate::models::profile::AwsProfile;

use self::types::{
    ClusterDescription, ContainerInstance, IngressRule, InstanceAttribute, InstanceDescription,
    KeyPair, LaunchSpec, ResourceType, RouteTable, ServiceRequest, SubnetState, Tag,
    VpcAttribute,
};

#[async_trait]
pub trait LogsApi: Send + Sync {
    /// Fails with `CloudError::AlreadyExists` when the group exists
    async fn create_log_group(&self, name: &str) -> Result<(), CloudError>;
}

#[async_trait]
pub trait ContainerApi: Send + Sync {
    async fn create_cluster(&self, cluster: &str) -> Result<(), CloudError>;

    async fn describe_cluster(&self, cluster: &str) -> Result<ClusterDescription, CloudError>;

    async fn delete_cluster(&self, cluster: &str) -> Result<(), CloudError>;

    /// Returns the new revision number
    async fn register_task_definition(&self, task: &TaskDefinition) -> Result<u32, CloudError>;

    /// Returns the live revision of a family
    async fn describe_task_definition(&self, family: &str) -> Result<u32, CloudError>;

    async fn deregister_task_definition(&self, family: &str, revision: u32)
        -> Result<(), CloudError>;

    async fn list_container_instances(
        &self,
        cluster: &str,
    ) -> Result<Vec<ContainerInstance>, CloudError>;

    async fn put_attribute(
        &self,
        cluster: &str,
        attribute: &InstanceAttribute,
    ) -> Result<(), CloudError>;

    async fn create_service(&self, cluster: &str, request: &ServiceRequest)
        -> Result<(), CloudError>;

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        desired_count: u32,
    ) -> Result<(), CloudError>;

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<(), CloudError>;
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn create_role(&self, role: &str, trust_document: &str) -> Result<(), CloudError>;

    async fn put_role_policy(
        &self,
        role: &str,
        policy: &str,
        document: &str,
    ) -> Result<(), CloudError>;

    async fn create_instance_profile(&self, profile: &str) -> Result<(), CloudError>;

    async fn instance_profile_exists(&self, profile: &str) -> Result<bool, CloudError>;

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str)
        -> Result<(), CloudError>;

    async fn remove_role_from_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> Result<(), CloudError>;

    async fn delete_instance_profile(&self, profile: &str) -> Result<(), CloudError>;

    async fn delete_role_policy(&self, role: &str, policy: &str) -> Result<(), CloudError>;

    async fn delete_role(&self, role: &str) -> Result<(), CloudError>;
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_vpc(&self, cidr: &str) -> Result<String, CloudError>;

    async fn modify_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttribute,
        enabled: bool,
    ) -> Result<(), CloudError>;

    async fn create_tags(&self, resource_ids: &[String], tags: &[Tag]) -> Result<(), CloudError>;

    /// IDs of resources of the given type carrying `Name=<name>`
    async fn find_by_name_tag(
        &self,
        resource_type: ResourceType,
        name: &str,
    ) -> Result<Vec<String>, CloudError>;

    async fn create_subnet(&self, vpc_id: &str, cidr: &str) -> Result<String, CloudError>;

    async fn subnet_state(&self, subnet_id: &str) -> Result<SubnetState, CloudError>;

    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), CloudError>;

    async fn create_internet_gateway(&self) -> Result<String, CloudError>;

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str)
        -> Result<(), CloudError>;

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str)
        -> Result<(), CloudError>;

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<(), CloudError>;

    async fn describe_route_tables(&self) -> Result<Vec<RouteTable>, CloudError>;

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        gateway_id: &str,
    ) -> Result<(), CloudError>;

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String, CloudError>;

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule)
        -> Result<(), CloudError>;

    async fn find_security_groups(&self, group_name: &str) -> Result<Vec<String>, CloudError>;

    async fn delete_security_group(&self, group_id: &str) -> Result<(), CloudError>;

    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), CloudError>;
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn create_key_pair(&self, name: &str) -> Result<KeyPair, CloudError>;

    async fn delete_key_pair(&self, name: &str) -> Result<(), CloudError>;

    /// Returns the new instance ID
    async fn run_instance(&self, spec: &LaunchSpec) -> Result<String, CloudError>;

    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceDescription>, CloudError>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), CloudError>;
}

/// Service clients bound to one account and region
#[derive(Clone)]
pub struct CloudClients {
    pub logs: Arc<dyn LogsApi>,
    pub containers: Arc<dyn ContainerApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub network: Arc<dyn NetworkApi>,
    pub compute: Arc<dyn ComputeApi>,
}

impl CloudClients {
    /// Use one object for every service
    pub fn from_shared<C>(cloud: Arc<C>) -> Self
    where
        C: LogsApi + ContainerApi + IdentityApi + NetworkApi + ComputeApi + 'static,
    {
        Self {
            logs: cloud.clone(),
            containers: cloud.clone(),
            identity: cloud.clone(),
            network: cloud.clone(),
            compute: cloud,
        }
    }
}

/// Opens sessions against a cloud account
pub trait CloudProvider: Send + Sync {
    fn session(&self, profile: Option<&AwsProfile>, region: &str)
        -> Result<CloudClients, CloudError>;
}
