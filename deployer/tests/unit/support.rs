//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use cluster_deployer::cloud::memory::MemoryCloud;
use cluster_deployer::deploy::deployer::DeployerFactory;
use cluster_deployer::deploy::upload::MemoryTransfer;
use cluster_deployer::models::deployment::Deployment;
use cluster_deployer::storage::settings::{PipelineSettings, WaiterSettings};

/// Host image the default settings use for us-east-1
pub const US_EAST_1_IMAGE: &str = "ami-9eb4b1e5";

/// Pipeline settings with millisecond waits
pub fn fast_pipeline() -> PipelineSettings {
    PipelineSettings {
        waiter: WaiterSettings {
            base_delay_ms: 1,
            max_delay_ms: 2,
            max_attempts: 5,
        },
        readiness_poll_interval_secs: 0,
        readiness_timeout_secs: Some(1),
        ..Default::default()
    }
}

/// Two nodes, two task families, each family pinned to its own node
pub fn descriptor(name: &str) -> Deployment {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "region": "us-east-1",
        "userId": "alice",
        "clusterDefinition": { "nodes": [
            { "id": 1, "instanceType": "t2.medium" },
            { "id": 2, "instanceType": "t2.medium" }
        ]},
        "taskDefinitions": [
            {
                "family": "web",
                "containerDefinitions": [{
                    "name": "nginx",
                    "image": "nginx:latest",
                    "memory": 128,
                    "portMappings": [{ "containerPort": 80, "hostPort": 8080 }]
                }]
            },
            {
                "family": "cache",
                "containerDefinitions": [{
                    "name": "redis",
                    "image": "redis:7",
                    "memory": 256,
                    "portMappings": [{ "containerPort": 6379, "hostPort": 6379 }]
                }]
            }
        ],
        "nodeMapping": [
            { "id": 1, "task": "web" },
            { "id": 2, "task": "cache" }
        ],
        "allowedPorts": [8080, 6379]
    }))
    .expect("valid descriptor")
}

pub struct Harness {
    pub cloud: MemoryCloud,
    pub transfer: MemoryTransfer,
    pub factory: DeployerFactory,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pipeline(fast_pipeline())
    }

    pub fn with_pipeline(pipeline: PipelineSettings) -> Self {
        let cloud = MemoryCloud::new();
        let transfer = MemoryTransfer::new();
        let factory = DeployerFactory::new(
            Arc::new(cloud.clone()),
            pipeline,
            Arc::new(transfer.clone()),
        );
        Self {
            cloud,
            transfer,
            factory,
        }
    }
}

/// Calls that remove or detach something
pub fn destructive_calls(calls: &[String]) -> Vec<String> {
    calls
        .iter()
        .filter(|c| {
            ["Delete", "Deregister", "Terminate", "Detach", "Remove"]
                .iter()
                .any(|prefix| c.starts_with(prefix))
        })
        .cloned()
        .collect()
}
