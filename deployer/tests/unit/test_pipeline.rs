//! Provisioning and teardown pipelines against the simulated cloud

mod support;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use cluster_deployer::cloud::types::Protocol;
use cluster_deployer::deploy::deployer::{DeployType, Deployer};
use cluster_deployer::deploy::ecs::provision::ProvisionStep;
use cluster_deployer::deploy::ecs::teardown::TeardownStep;
use cluster_deployer::errors::{CloudError, DeployerError};
use cluster_deployer::models::deployment::{FileUpload, NodeMapping};
use cluster_deployer::storage::settings::PipelineSettings;
use tokio_test::{assert_err, assert_ok};

use support::{descriptor, destructive_calls, fast_pipeline, Harness, US_EAST_1_IMAGE};

fn no_files() -> HashMap<String, PathBuf> {
    HashMap::new()
}

fn failed_step(result: Result<(), DeployerError>) -> (ProvisionStep, CloudError) {
    match result {
        Err(DeployerError::ProvisioningError { step, source }) => (step, source),
        other => panic!("expected a provisioning error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_then_delete_two_node_cluster() {
    let h = Harness::new();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    assert_ok!(deployer.create_deployment(&no_files()).await);

    // Network
    let vpcs = h.cloud.vpcs();
    assert_eq!(vpcs.len(), 1);
    assert!(h.cloud.vpc_dns_enabled(&vpcs[0]));
    assert_eq!(h.cloud.tags(&vpcs[0])["Name"], "demo-vpc");
    let gateways = h.cloud.internet_gateways();
    assert_eq!(gateways.len(), 1);
    assert_eq!(
        h.cloud.routes(&vpcs[0]),
        vec![("0.0.0.0/0".to_string(), gateways[0].clone())]
    );

    // Compute
    let instances = h.cloud.live_instances();
    assert_eq!(instances.len(), 2);
    for instance in &instances {
        assert_eq!(h.cloud.tags(instance)["Deployment"], "demo");
        let spec = h.cloud.launch_spec(instance).unwrap();
        assert_eq!(spec.image_id, US_EAST_1_IMAGE);
        assert_eq!(spec.instance_profile, "demo");
        assert!(spec.associate_public_address);
    }

    // Services, one per mapping, pinned by placement
    let services = h.cloud.services("demo");
    let names: BTreeSet<_> = services.iter().map(|s| s.service_name.clone()).collect();
    assert_eq!(
        names,
        BTreeSet::from(["cache-node2".to_string(), "web-node1".to_string()])
    );
    assert!(services.iter().all(|s| s.desired_count == 1));

    // Log groups are named after containers
    assert_eq!(h.cloud.log_groups(), vec!["nginx", "redis"]);

    assert_ok!(deployer.delete_deployment().await);

    assert!(h.cloud.vpcs().is_empty());
    assert!(h.cloud.subnets().is_empty());
    assert!(h.cloud.internet_gateways().is_empty());
    assert!(h.cloud.security_groups().is_empty());
    assert!(h.cloud.live_instances().is_empty());
    assert!(h.cloud.key_pairs().is_empty());
    assert!(h.cloud.roles().is_empty());
    assert!(h.cloud.instance_profiles().is_empty());
    assert!(h.cloud.active_task_definitions().is_empty());
    assert!(h.cloud.clusters().is_empty());
    assert!(h.cloud.services("demo").is_empty());

    // Log groups are left for post-mortem reading
    assert_eq!(h.cloud.log_groups().len(), 2);
    assert!(deployer.get_store_info().await.unwrap()["vpcId"].is_null());
}

#[tokio::test]
async fn test_placement_attribute_set_once_per_node() {
    let h = Harness::new();
    let mut deployment = descriptor("demo");
    deployment.node_mapping.push(NodeMapping {
        id: 1,
        task: "cache".to_string(),
    });
    let deployer = h
        .factory
        .create(DeployType::Ecs, deployment, None, false)
        .unwrap();

    assert_ok!(deployer.create_deployment(&no_files()).await);

    assert_eq!(h.cloud.call_count("PutAttributes"), 2);
    assert_eq!(h.cloud.services("demo").len(), 3);

    let values: Vec<String> = h
        .cloud
        .container_instances("demo")
        .into_iter()
        .filter_map(|ci| ci.attributes.get("nodeId").cloned())
        .collect();
    let distinct: BTreeSet<_> = values.iter().cloned().collect();
    assert_eq!(values.len(), distinct.len());
    assert_eq!(
        distinct,
        BTreeSet::from(["node-1".to_string(), "node-2".to_string()])
    );
}

#[tokio::test]
async fn test_rejected_image_rolls_back_everything() {
    let h = Harness::new();
    h.cloud.reject_image(US_EAST_1_IMAGE);
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    let (step, source) = failed_step(deployer.create_deployment(&no_files()).await);
    assert_eq!(step, ProvisionStep::Compute);
    assert!(source.to_string().contains("InvalidAMIID"));

    assert!(h.cloud.roles().is_empty());
    assert!(h.cloud.instance_profiles().is_empty());
    assert!(h.cloud.vpcs().is_empty());
    assert!(h.cloud.subnets().is_empty());
    assert!(h.cloud.security_groups().is_empty());
    assert!(h.cloud.internet_gateways().is_empty());
    assert!(h.cloud.key_pairs().is_empty());
    assert!(h.cloud.clusters().is_empty());
    assert!(h.cloud.active_task_definitions().is_empty());
}

#[tokio::test]
async fn test_rollback_only_touches_created_kinds() {
    let h = Harness::new();
    h.cloud.fail_on("CreateVpc");
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    let (step, _) = failed_step(deployer.create_deployment(&no_files()).await);
    assert_eq!(step, ProvisionStep::Network);

    let calls = h.cloud.calls();
    for untouched in [
        "DescribeTags",
        "DescribeSecurityGroups",
        "DeleteSecurityGroup",
        "DetachInternetGateway",
        "DeleteInternetGateway",
        "DeleteSubnet",
        "DeleteVpc",
        "TerminateInstances",
        "DeleteKeyPair",
        "UpdateService",
        "DeleteService",
    ] {
        assert!(
            !calls.iter().any(|c| c == untouched),
            "{} should not be called",
            untouched
        );
    }
    assert_eq!(h.cloud.call_count("DeregisterTaskDefinition"), 2);
    for expected in [
        "RemoveRoleFromInstanceProfile",
        "DeleteInstanceProfile",
        "DeleteRolePolicy",
        "DeleteRole",
        "DeleteCluster",
    ] {
        assert_eq!(h.cloud.call_count(expected), 1, "{}", expected);
    }
    assert!(h.cloud.roles().is_empty());
    assert!(h.cloud.clusters().is_empty());
}

#[tokio::test]
async fn test_failure_in_first_step_deletes_nothing() {
    let h = Harness::new();
    h.cloud.fail_on("CreateLogGroup");
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    let (step, _) = failed_step(deployer.create_deployment(&no_files()).await);
    assert_eq!(step, ProvisionStep::LogGroups);
    assert!(destructive_calls(&h.cloud.calls()).is_empty());
}

#[tokio::test]
async fn test_existing_log_group_is_reused() {
    let h = Harness::new();
    let first = h
        .factory
        .create(DeployType::Ecs, descriptor("first"), None, false)
        .unwrap();
    let second = h
        .factory
        .create(DeployType::Ecs, descriptor("second"), None, false)
        .unwrap();

    assert_ok!(first.create_deployment(&no_files()).await);
    assert_ok!(second.create_deployment(&no_files()).await);
    assert_eq!(h.cloud.log_groups().len(), 2);
}

#[tokio::test]
async fn test_ingress_is_union_of_required_and_allowed_ports() {
    let h = Harness::new();
    let mut deployment = descriptor("demo");
    deployment.allowed_ports = vec![9000, 8080, 22, 8080];
    let deployer = h
        .factory
        .create(DeployType::Ecs, deployment, None, false)
        .unwrap();

    assert_ok!(deployer.create_deployment(&no_files()).await);

    let groups = h.cloud.security_groups();
    assert_eq!(groups.len(), 1);
    let rules: BTreeSet<(u16, Protocol)> = h
        .cloud
        .ingress_rules(&groups[0])
        .into_iter()
        .map(|r| {
            assert_eq!(r.cidr.to_string(), "0.0.0.0/0");
            (r.port, r.protocol)
        })
        .collect();
    assert_eq!(
        rules,
        BTreeSet::from([
            (22, Protocol::Tcp),
            (80, Protocol::Tcp),
            (6783, Protocol::Tcp),
            (6783, Protocol::Udp),
            (6784, Protocol::Udp),
            (8080, Protocol::Tcp),
            (9000, Protocol::Tcp),
        ])
    );
}

#[tokio::test]
async fn test_teardown_twice_is_clean() {
    let h = Harness::new();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    assert_ok!(deployer.create_deployment(&no_files()).await);
    assert_ok!(deployer.delete_deployment().await);

    h.cloud.clear_calls();
    assert_ok!(deployer.delete_deployment().await);
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_failed_teardown_keeps_state_for_retry() {
    let h = Harness::new();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(deployer.create_deployment(&no_files()).await);

    h.cloud.fail_once("DeleteVpc");
    match deployer.delete_deployment().await {
        Err(DeployerError::TeardownError(failures)) => {
            assert_eq!(failures.steps(), vec![TeardownStep::Vpc]);
        }
        other => panic!("expected a teardown error, got {:?}", other),
    }

    // Later steps still ran
    assert!(h.cloud.clusters().is_empty());
    assert_eq!(h.cloud.vpcs().len(), 1);

    // Everything else is already gone; the retry only removes the VPC
    assert_ok!(deployer.delete_deployment().await);
    assert!(h.cloud.vpcs().is_empty());
}

#[tokio::test]
async fn test_teardown_failures_are_aggregated() {
    let h = Harness::new();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(deployer.create_deployment(&no_files()).await);

    h.cloud.fail_on("DeleteRole");
    h.cloud.fail_on("DeleteKeyPair");
    let error = assert_err!(deployer.delete_deployment().await);
    match error {
        DeployerError::TeardownError(failures) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(
                failures.steps(),
                vec![TeardownStep::Role, TeardownStep::KeyPair]
            );
        }
        other => panic!("expected a teardown error, got {:?}", other),
    }
    assert!(h.cloud.vpcs().is_empty());
}

#[tokio::test]
async fn test_readiness_times_out_without_registration() {
    let h = Harness::new();
    h.cloud.disable_auto_registration();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    let (step, source) = failed_step(deployer.create_deployment(&no_files()).await);
    assert_eq!(step, ProvisionStep::ClusterReadiness);
    assert!(matches!(source, CloudError::PollTimeout { .. }));
    assert!(h.cloud.live_instances().is_empty());
    assert!(h.cloud.vpcs().is_empty());
}

#[tokio::test]
async fn test_readiness_waits_for_late_registration() {
    let h = Harness::new();
    h.cloud.set_registration_lag(3);
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    assert_ok!(deployer.create_deployment(&no_files()).await);
    assert_eq!(h.cloud.call_count("DescribeClusters"), 4);
}

#[tokio::test]
async fn test_reads_do_not_wait_for_a_running_pipeline() {
    let h = Harness::with_pipeline(PipelineSettings {
        readiness_poll_interval_secs: 1,
        readiness_timeout_secs: Some(5),
        ..fast_pipeline()
    });
    h.cloud.set_registration_lag(1);
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();

    let reader = async {
        while h.cloud.call_count("DescribeClusters") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // The pipeline is now sleeping between readiness polls
        let mappings = tokio::time::timeout(
            Duration::from_millis(200),
            deployer.get_service_mappings(),
        )
        .await;
        assert!(mappings.is_ok(), "mappings blocked behind the pipeline");
        tokio::time::timeout(Duration::from_millis(200), deployer.get_store_info())
            .await
            .is_ok()
    };

    let files = no_files();
    let (created, store_info_read) = tokio::join!(deployer.create_deployment(&files), reader);
    assert_ok!(created);
    assert!(store_info_read);
    assert_eq!(h.cloud.call_count("DescribeClusters"), 2);
}

#[tokio::test]
async fn test_update_and_extensions_are_unsupported() {
    let h = Harness::new();
    let deployment = descriptor("demo");
    let deployer = h
        .factory
        .create(DeployType::Ecs, deployment.clone(), None, false)
        .unwrap();

    assert!(matches!(
        deployer.update_deployment(&deployment).await,
        Err(DeployerError::UnsupportedOperation(_))
    ));
    assert!(matches!(
        deployer.deploy_extensions(&deployment).await,
        Err(DeployerError::UnsupportedOperation(_))
    ));
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_factory_rejects_k8s_and_names_families() {
    let h = Harness::new();
    assert!(matches!(
        h.factory.create(DeployType::K8s, descriptor("demo"), None, false),
        Err(DeployerError::UnsupportedOperation(_))
    ));

    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, true)
        .unwrap();
    assert!(deployer.deployment().name.starts_with("demo-"));
    assert_eq!(deployer.deploy_type(), DeployType::Ecs);
}

#[tokio::test]
async fn test_service_lookup() {
    let h = Harness::new();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(deployer.create_deployment(&no_files()).await);

    let address = deployer.get_service_address("nginx").await.unwrap();
    assert_eq!(address.port, 8080);
    assert!(address.host.ends_with(".compute.simulated"));
    assert_eq!(
        deployer.get_service_url("nginx").await.unwrap(),
        format!("{}:8080", address.host)
    );

    let mappings = deployer.get_service_mappings().await.unwrap();
    assert_eq!(mappings["web-node1"].node_id, 1);
    assert_eq!(
        mappings["web-node1"].public_url.as_deref(),
        Some(format!("{}:8080", address.host).as_str())
    );
    assert_eq!(mappings["cache-node2"].node_id, 2);

    assert!(matches!(
        deployer.get_service_url("postgres").await,
        Err(DeployerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reload_from_store_info_then_delete() {
    let h = Harness::new();
    let original = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(original.create_deployment(&no_files()).await);
    let url = original.get_service_url("redis").await.unwrap();

    let restored = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(restored.reload_cluster_state(original.get_store_info().await).await);
    assert_eq!(restored.get_service_url("redis").await.unwrap(), url);

    assert_ok!(restored.delete_deployment().await);
    assert!(h.cloud.vpcs().is_empty());
    assert!(h.cloud.live_instances().is_empty());
    assert!(h.cloud.roles().is_empty());
}

#[tokio::test]
async fn test_reload_without_store_info_uses_placement_attributes() {
    let h = Harness::new();
    let original = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(original.create_deployment(&no_files()).await);

    let restored = h
        .factory
        .create(DeployType::Ecs, descriptor("demo"), None, false)
        .unwrap();
    assert_ok!(restored.reload_cluster_state(None).await);
    assert_eq!(
        restored.get_service_url("nginx").await.unwrap(),
        original.get_service_url("nginx").await.unwrap()
    );
}

#[tokio::test]
async fn test_reload_of_unknown_deployment_is_not_found() {
    let h = Harness::new();
    let deployer = h
        .factory
        .create(DeployType::Ecs, descriptor("ghost"), None, false)
        .unwrap();

    assert!(matches!(
        deployer.reload_cluster_state(None).await,
        Err(DeployerError::NotFound(_))
    ));

    // Teardown still has to find the network before claiming success
    assert!(matches!(
        deployer.delete_deployment().await,
        Err(DeployerError::NotFound(_))
    ));
    assert!(destructive_calls(&h.cloud.calls()).is_empty());
}

#[tokio::test]
async fn test_files_are_copied_to_every_node() {
    let h = Harness::new();
    let mut deployment = descriptor("demo");
    deployment.files = vec![FileUpload {
        file_id: "f1".to_string(),
        path: "/opt/app/app.conf".to_string(),
    }];
    let deployer = h
        .factory
        .create(DeployType::Ecs, deployment, None, false)
        .unwrap();

    let uploaded = HashMap::from([("alice_f1".to_string(), PathBuf::from("/tmp/app.conf"))]);
    assert_ok!(deployer.create_deployment(&uploaded).await);

    let records = h.transfer.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.user == "ec2-user"));
    assert!(records.iter().all(|r| r.remote_path == "/opt/app/app.conf"));
    assert!(records
        .iter()
        .all(|r| r.local_path == PathBuf::from("/tmp/app.conf")));

    let hosts: BTreeSet<String> = records.into_iter().map(|r| r.host).collect();
    let expected: BTreeSet<String> = [
        deployer.get_service_address("nginx").await.unwrap().host,
        deployer.get_service_address("redis").await.unwrap().host,
    ]
    .into_iter()
    .collect();
    assert_eq!(hosts, expected);
}

#[tokio::test]
async fn test_missing_upload_location_fails_the_step() {
    let h = Harness::new();
    let mut deployment = descriptor("demo");
    deployment.files = vec![FileUpload {
        file_id: "f1".to_string(),
        path: "/opt/app/app.conf".to_string(),
    }];
    let deployer = h
        .factory
        .create(DeployType::Ecs, deployment, None, false)
        .unwrap();

    let (step, source) = failed_step(deployer.create_deployment(&no_files()).await);
    assert_eq!(step, ProvisionStep::FileUpload);
    assert!(source.is_not_found());
    assert!(h.transfer.records().is_empty());
    assert!(h.cloud.live_instances().is_empty());
}

#[tokio::test]
async fn test_unsupported_region_is_rejected_before_any_call() {
    let h = Harness::with_pipeline(fast_pipeline());
    let mut deployment = descriptor("demo");
    deployment.region = "mars-north-1".to_string();
    let deployer = h
        .factory
        .create(DeployType::Ecs, deployment, None, false)
        .unwrap();

    assert!(matches!(
        deployer.create_deployment(&no_files()).await,
        Err(DeployerError::ValidationError(_))
    ));
    assert!(h.cloud.calls().is_empty());
}
