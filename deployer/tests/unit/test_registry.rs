//! Deployment registry tests

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use cluster_deployer::cloud::memory::MemoryCloud;
use cluster_deployer::deploy::deployer::{DeployType, DeployerFactory, SchedulerHandle};
use cluster_deployer::deploy::fsm::DeploymentStatus;
use cluster_deployer::deploy::upload::MemoryTransfer;
use cluster_deployer::errors::DeployerError;
use cluster_deployer::models::deployment::Deployment;
use cluster_deployer::models::profile::AwsProfile;
use cluster_deployer::registry::{CreateRequest, ListFilter, Registry};
use cluster_deployer::storage::store::{DeploymentRecord, DeploymentStore, MemoryStore};
use tokio_test::assert_ok;

use support::{descriptor, fast_pipeline, US_EAST_1_IMAGE};

struct Fixture {
    cloud: MemoryCloud,
    store: Arc<MemoryStore>,
    registry: Registry,
}

impl Fixture {
    fn new() -> Self {
        let cloud = MemoryCloud::new();
        let store = Arc::new(MemoryStore::new());
        let registry = registry_for(&cloud, &store);
        Self {
            cloud,
            store,
            registry,
        }
    }
}

fn registry_for(cloud: &MemoryCloud, store: &Arc<MemoryStore>) -> Registry {
    let factory = DeployerFactory::new(
        Arc::new(cloud.clone()),
        fast_pipeline(),
        Arc::new(MemoryTransfer::new()),
    );
    Registry::new(factory, store.clone())
}

fn request(deployment: Deployment) -> CreateRequest {
    CreateRequest {
        deploy_type: DeployType::Ecs,
        deployment,
        create_name: false,
    }
}

fn owned_by(name: &str, user_id: &str) -> Deployment {
    let mut deployment = descriptor(name);
    deployment.user_id = user_id.to_string();
    deployment
}

#[tokio::test]
async fn test_create_reaches_ready_and_is_persisted() {
    let f = Fixture::new();

    let summary = f
        .registry
        .create(request(descriptor("demo")), HashMap::new())
        .await
        .unwrap();
    assert_eq!(summary.status, DeploymentStatus::Ready);
    assert_eq!(summary.node_count, 2);
    assert_eq!(summary.user_id, "alice");
    assert!(summary.error.is_none());

    let record = f.store.load_deployment("demo").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Ready);
    let store_info = record.store_info.unwrap();
    assert_eq!(store_info["vpcId"], f.cloud.vpcs()[0].as_str());

    let url = f.registry.service_url("demo", "nginx").await.unwrap();
    assert!(url.ends_with(":8080"));
    let mappings = f.registry.service_mappings("demo").await.unwrap();
    assert_eq!(mappings.len(), 2);
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);

    let calls_before = f.cloud.calls().len();
    assert!(matches!(
        f.registry.create(request(descriptor("demo")), HashMap::new()).await,
        Err(DeployerError::ValidationError(_))
    ));
    assert_eq!(f.cloud.calls().len(), calls_before);
    assert_eq!(
        f.registry.get("demo").await.unwrap().status,
        DeploymentStatus::Ready
    );
}

#[tokio::test]
async fn test_invalid_descriptor_is_rejected() {
    let f = Fixture::new();
    let mut deployment = descriptor("demo");
    deployment.cluster_definition.nodes.clear();

    assert!(matches!(
        f.registry.create(request(deployment), HashMap::new()).await,
        Err(DeployerError::ValidationError(_))
    ));
    assert!(f.registry.list(&ListFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_region_leaves_no_record() {
    let f = Fixture::new();
    let mut deployment = descriptor("mars");
    deployment.region = "mars-north-1".to_string();

    assert!(matches!(
        f.registry.create(request(deployment), HashMap::new()).await,
        Err(DeployerError::ValidationError(_))
    ));
    assert!(f.registry.list(&ListFilter::default()).await.unwrap().is_empty());
    assert!(f.store.load_deployment("mars").await.unwrap().is_none());
    assert!(f.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_failed_create_is_recorded_then_deletable() {
    let f = Fixture::new();
    f.cloud.reject_image(US_EAST_1_IMAGE);

    assert!(matches!(
        f.registry.create(request(descriptor("demo")), HashMap::new()).await,
        Err(DeployerError::ProvisioningError { .. })
    ));

    let summary = f.registry.get("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Failed);
    assert!(summary.error.unwrap().contains("compute"));

    let deleted = f.registry.delete("demo").await.unwrap();
    assert_eq!(deleted.status, DeploymentStatus::Deleted);

    // Deleted deployments leave memory but stay listed from the store
    let listed = f.registry.list(&ListFilter::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, DeploymentStatus::Deleted);
    assert_eq!(
        f.registry.get("demo").await.unwrap().status,
        DeploymentStatus::Deleted
    );
    assert!(matches!(
        f.registry.delete("demo").await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_teardown_failure_leaves_deployment_failed_for_retry() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);

    f.cloud.fail_once("DeleteVpc");
    assert!(matches!(
        f.registry.delete("demo").await,
        Err(DeployerError::TeardownError(_))
    ));
    let summary = f.registry.get("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Failed);
    assert!(summary.error.is_some());

    let summary = f.registry.delete("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Deleted);
    assert!(f.cloud.vpcs().is_empty());
}

#[tokio::test]
async fn test_list_filters_and_orders() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(owned_by("beta", "alice")), HashMap::new()).await);
    assert_ok!(f.registry.create(request(owned_by("alpha", "alice")), HashMap::new()).await);
    assert_ok!(f.registry.create(request(owned_by("gamma", "bob")), HashMap::new()).await);
    assert_ok!(f.registry.delete("gamma").await);

    let all = f.registry.list(&ListFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    for pair in all.windows(2) {
        assert!(
            (pair[0].created, &pair[0].name) <= (pair[1].created, &pair[1].name),
            "{:?} listed before {:?}",
            pair[0].name,
            pair[1].name
        );
    }

    let alice = f
        .registry
        .list(&ListFilter {
            user_id: Some("alice".to_string()),
            status: None,
        })
        .await
        .unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|s| s.user_id == "alice"));

    let deleted = f
        .registry
        .list(&ListFilter {
            user_id: None,
            status: Some(DeploymentStatus::Deleted),
        })
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].name, "gamma");

    let ready_for_bob = f
        .registry
        .list(&ListFilter {
            user_id: Some("bob".to_string()),
            status: Some(DeploymentStatus::Ready),
        })
        .await
        .unwrap();
    assert!(ready_for_bob.is_empty());
}

#[tokio::test]
async fn test_concurrent_creates_do_not_block_each_other() {
    let f = Fixture::new();

    let (first, second) = tokio::join!(
        f.registry.create(request(descriptor("first")), HashMap::new()),
        f.registry.create(request(descriptor("second")), HashMap::new()),
    );
    assert_eq!(first.unwrap().status, DeploymentStatus::Ready);
    assert_eq!(second.unwrap().status, DeploymentStatus::Ready);
    assert_eq!(f.cloud.vpcs().len(), 2);
    assert_eq!(f.cloud.clusters().len(), 2);
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let f = Fixture::new();
    assert!(matches!(
        f.registry.get("ghost").await,
        Err(DeployerError::NotFound(_))
    ));
    assert!(matches!(
        f.registry.service_url("ghost", "nginx").await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_update_is_unsupported() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);

    assert!(matches!(
        f.registry.update("demo", &descriptor("demo")).await,
        Err(DeployerError::UnsupportedOperation(_))
    ));
}

#[tokio::test]
async fn test_scheduler_is_persisted() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);

    let handle = SchedulerHandle {
        id: "sched-1".to_string(),
        config: serde_json::json!({ "slots": 4 }),
    };
    f.registry.set_scheduler("demo", handle.clone()).await.unwrap();

    assert_eq!(f.registry.scheduler("demo").await.unwrap(), Some(handle.clone()));
    let record = f.store.load_deployment("demo").await.unwrap().unwrap();
    assert_eq!(record.scheduler, Some(handle));
}

#[tokio::test]
async fn test_profiles_crud() {
    let f = Fixture::new();

    let summary = f
        .registry
        .store_profile(AwsProfile::new("alice", "AKIA123", "s3cret"))
        .await
        .unwrap();
    assert_eq!(summary.aws_id, "AKIA123");
    assert_eq!(f.store.load_profiles().await.unwrap().len(), 1);

    let fetched = f.registry.get_profile("alice").unwrap();
    assert_eq!(fetched.user_id, "alice");
    assert!(!serde_json::to_string(&fetched).unwrap().contains("s3cret"));

    assert!(matches!(
        f.registry.store_profile(AwsProfile::new("", "AKIA123", "x")).await,
        Err(DeployerError::ValidationError(_))
    ));

    f.registry.delete_profile("alice").await.unwrap();
    assert!(matches!(
        f.registry.get_profile("alice"),
        Err(DeployerError::NotFound(_))
    ));
    assert!(f.store.load_profiles().await.unwrap().is_empty());
    assert!(matches!(
        f.registry.delete_profile("alice").await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_init_restores_live_deployments() {
    let f = Fixture::new();
    f.registry
        .store_profile(AwsProfile::new("alice", "AKIA123", "s3cret"))
        .await
        .unwrap();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);
    let url = f.registry.service_url("demo", "redis").await.unwrap();

    let restarted = registry_for(&f.cloud, &f.store);
    assert_eq!(restarted.init().await.unwrap(), 1);

    assert!(restarted.get_profile("alice").is_ok());
    assert_eq!(
        restarted.get("demo").await.unwrap().status,
        DeploymentStatus::Ready
    );
    assert_eq!(restarted.service_url("demo", "redis").await.unwrap(), url);

    let summary = restarted.delete("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Deleted);
    assert!(f.cloud.vpcs().is_empty());
    assert!(f.cloud.live_instances().is_empty());
}

#[tokio::test]
async fn test_init_marks_interrupted_deployments_failed() {
    let f = Fixture::new();
    let deployment = descriptor("interrupted");
    f.store
        .save_deployment(&DeploymentRecord {
            name: deployment.name.clone(),
            user_id: deployment.user_id.clone(),
            deploy_type: DeployType::Ecs,
            status: DeploymentStatus::Creating,
            error: None,
            created: 1_700_000_000,
            deployment,
            store_info: None,
            scheduler: None,
        })
        .await
        .unwrap();

    assert_eq!(f.registry.init().await.unwrap(), 1);
    let summary = f.registry.get("interrupted").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Failed);
    assert!(summary.error.is_some());

    let record = f.store.load_deployment("interrupted").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_failed_reload_still_tears_everything_down() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);

    // The network lookup fails while restoring
    f.cloud.fail_once("DescribeTags");
    let restarted = registry_for(&f.cloud, &f.store);
    assert_eq!(restarted.init().await.unwrap(), 1);
    let summary = restarted.get("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Failed);

    f.cloud.clear_calls();
    let summary = restarted.delete("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Deleted);
    assert!(f.cloud.call_count("TerminateInstances") > 0);
    assert!(f.cloud.vpcs().is_empty());
    assert!(f.cloud.live_instances().is_empty());
    assert!(f.cloud.roles().is_empty());
    assert!(f.cloud.clusters().is_empty());
}

#[tokio::test]
async fn test_unresolvable_network_after_reload_is_not_found() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);

    f.cloud.fail_on("DescribeTags");
    let restarted = registry_for(&f.cloud, &f.store);
    assert_eq!(restarted.init().await.unwrap(), 1);

    // Never reported deleted without reaching the cloud
    assert!(matches!(
        restarted.delete("demo").await,
        Err(DeployerError::NotFound(_))
    ));
    assert_eq!(
        restarted.get("demo").await.unwrap().status,
        DeploymentStatus::Failed
    );
    assert_eq!(f.cloud.vpcs().len(), 1);

    f.cloud.clear_failures();
    let summary = restarted.delete("demo").await.unwrap();
    assert_eq!(summary.status, DeploymentStatus::Deleted);
    assert!(f.cloud.vpcs().is_empty());
}

#[tokio::test]
async fn test_init_skips_deleted_records() {
    let f = Fixture::new();
    assert_ok!(f.registry.create(request(descriptor("demo")), HashMap::new()).await);
    assert_ok!(f.registry.delete("demo").await);

    let restarted = registry_for(&f.cloud, &f.store);
    assert_eq!(restarted.init().await.unwrap(), 0);
    assert_eq!(
        restarted.get("demo").await.unwrap().status,
        DeploymentStatus::Deleted
    );
}
