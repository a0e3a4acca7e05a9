//! Deployment registry
//!
//! One mutex guards the deployment map and the profile map. It is held only
//! for map reads and mutations, never across a pipeline run, so unrelated
//! deployments never wait on each other.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::deploy::deployer::{
    DeployType, Deployer, DeployerFactory, SchedulerHandle, ServiceAddress, ServiceMapping,
};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use crate::errors::DeployerError;
use crate::models::deployment::Deployment;
use crate::models::profile::{AwsProfile, ProfileSummary};
use crate::storage::store::{DeploymentRecord, DeploymentStore};
use crate::utils::now_secs;

/// A deployment as shown to API callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub name: String,
    pub user_id: String,
    pub region: String,
    pub deploy_type: DeployType,
    pub status: DeploymentStatus,
    pub error: Option<String>,
    pub created: i64,
    pub node_count: usize,
}

impl From<&DeploymentRecord> for DeploymentSummary {
    fn from(record: &DeploymentRecord) -> Self {
        Self {
            name: record.name.clone(),
            user_id: record.user_id.clone(),
            region: record.deployment.region.clone(),
            deploy_type: record.deploy_type,
            status: record.status,
            error: record.error.clone(),
            created: record.created,
            node_count: record.deployment.node_count(),
        }
    }
}

/// Listing filter; absent fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilter {
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub status: Option<DeploymentStatus>,
}

impl ListFilter {
    fn matches(&self, summary: &DeploymentSummary) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == summary.user_id)
            && self.status.is_none_or(|s| s == summary.status)
    }
}

/// Creation request accepted by the registry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub deploy_type: DeployType,
    pub deployment: Deployment,

    /// Treat the name as a family and append a unique suffix
    #[serde(default)]
    pub create_name: bool,
}

struct RegistryEntry {
    deployer: Arc<dyn Deployer>,
    fsm: DeploymentFsm,
    created: i64,
}

impl RegistryEntry {
    fn summary(&self) -> DeploymentSummary {
        let deployment = self.deployer.deployment();
        DeploymentSummary {
            name: deployment.name.clone(),
            user_id: deployment.user_id.clone(),
            region: deployment.region.clone(),
            deploy_type: self.deployer.deploy_type(),
            status: self.fsm.status(),
            error: self.fsm.error().map(str::to_string),
            created: self.created,
            node_count: deployment.node_count(),
        }
    }
}

#[derive(Default)]
struct RegistryMaps {
    deployments: HashMap<String, RegistryEntry>,
    profiles: HashMap<String, AwsProfile>,
}

/// Process-wide map of live deployments and stored credentials
pub struct Registry {
    factory: DeployerFactory,
    store: Arc<dyn DeploymentStore>,
    maps: Mutex<RegistryMaps>,
}

impl Registry {
    pub fn new(factory: DeployerFactory, store: Arc<dyn DeploymentStore>) -> Self {
        Self {
            factory,
            store,
            maps: Mutex::new(RegistryMaps::default()),
        }
    }

    fn maps(&self) -> MutexGuard<'_, RegistryMaps> {
        self.maps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deployer(&self, name: &str) -> Result<Arc<dyn Deployer>, DeployerError> {
        self.maps()
            .deployments
            .get(name)
            .map(|entry| entry.deployer.clone())
            .ok_or_else(|| DeployerError::NotFound(format!("Deployment {} not found", name)))
    }

    /// Apply a pipeline outcome to an entry and return its new status
    fn transition(
        &self,
        name: &str,
        event: DeploymentEvent,
    ) -> Result<DeploymentStatus, DeployerError> {
        let mut maps = self.maps();
        let entry = maps
            .deployments
            .get_mut(name)
            .ok_or_else(|| DeployerError::NotFound(format!("Deployment {} not found", name)))?;
        entry
            .fsm
            .process(event)
            .map_err(DeployerError::LifecycleError)?;
        Ok(entry.fsm.status())
    }

    async fn persist(&self, name: &str) {
        let snapshot = {
            let maps = self.maps();
            maps.deployments.get(name).map(|entry| {
                (
                    entry.deployer.clone(),
                    entry.fsm.clone(),
                    entry.created,
                )
            })
        };
        let Some((deployer, fsm, created)) = snapshot else {
            return;
        };

        let deployment = deployer.deployment();
        let record = DeploymentRecord {
            name: deployment.name.clone(),
            user_id: deployment.user_id.clone(),
            deploy_type: deployer.deploy_type(),
            status: fsm.status(),
            error: fsm.error().map(str::to_string),
            created,
            deployment: deployment.clone(),
            store_info: deployer.get_store_info().await,
            scheduler: deployer.get_scheduler().await,
        };

        if let Err(e) = self.store.save_deployment(&record).await {
            error!("Failed to persist deployment {}: {}", name, e);
        }
    }

    /// Load persisted profiles and rebuild every live deployment
    ///
    /// Deployments whose state cannot be reloaded are kept as failed so
    /// they can still be torn down.
    pub async fn init(&self) -> Result<usize, DeployerError> {
        let profiles = self.store.load_profiles().await?;
        {
            let mut maps = self.maps();
            for profile in profiles {
                maps.profiles.insert(profile.user_id.clone(), profile);
            }
        }

        let mut restored = 0;
        for record in self.store.load_deployments().await? {
            if record.status.is_terminal() {
                continue;
            }

            let profile = self.profile(&record.user_id);
            let deployer = match self.factory.create(
                record.deploy_type,
                record.deployment.clone(),
                profile.as_ref(),
                false,
            ) {
                Ok(deployer) => deployer,
                Err(e) => {
                    error!("Unable to restore deployment {}: {}", record.name, e);
                    continue;
                }
            };

            if let Some(scheduler) = record.scheduler.clone() {
                deployer.set_scheduler(scheduler).await;
            }

            let mut fsm = DeploymentFsm::restore(record.status, record.error.clone());
            match deployer.reload_cluster_state(record.store_info.clone()).await {
                Ok(()) if matches!(record.status, DeploymentStatus::Ready | DeploymentStatus::Failed) => {}
                Ok(()) => {
                    warn!(
                        "Deployment {} was {} when the process stopped",
                        record.name, record.status
                    );
                    let event = DeploymentEvent::Fail(format!("interrupted while {}", record.status));
                    if let Err(e) = fsm.process(event) {
                        warn!("Deployment {} left as {}: {}", record.name, fsm.status(), e);
                    }
                }
                Err(e) => {
                    warn!("Reload of deployment {} failed: {}", record.name, e);
                    if let Err(e) = fsm.process(DeploymentEvent::Fail(e.to_string())) {
                        warn!("Deployment {} left as {}: {}", record.name, fsm.status(), e);
                    }
                }
            }

            self.maps().deployments.insert(
                record.name.clone(),
                RegistryEntry {
                    deployer,
                    fsm,
                    created: record.created,
                },
            );
            self.persist(&record.name).await;
            restored += 1;
        }

        info!("Registry restored {} deployment(s)", restored);
        Ok(restored)
    }

    /// Accept a descriptor and run its provisioning pipeline to completion
    pub async fn create(
        &self,
        request: CreateRequest,
        uploaded_files: HashMap<String, PathBuf>,
    ) -> Result<DeploymentSummary, DeployerError> {
        request.deployment.validate()?;
        let profile = self.profile(&request.deployment.user_id);
        let deployer = self.factory.create(
            request.deploy_type,
            request.deployment,
            profile.as_ref(),
            request.create_name,
        )?;
        deployer.preflight()?;
        let name = deployer.deployment().name.clone();

        {
            let mut maps = self.maps();
            if maps.deployments.contains_key(&name) {
                return Err(DeployerError::ValidationError(format!(
                    "Deployment {} already exists",
                    name
                )));
            }
            let mut fsm = DeploymentFsm::new();
            fsm.process(DeploymentEvent::Create)
                .map_err(DeployerError::LifecycleError)?;
            maps.deployments.insert(
                name.clone(),
                RegistryEntry {
                    deployer: deployer.clone(),
                    fsm,
                    created: now_secs(),
                },
            );
        }
        self.persist(&name).await;

        info!("Creating deployment {}", name);
        let result = deployer.create_deployment(&uploaded_files).await;
        let event = match &result {
            Ok(()) => DeploymentEvent::CreateSucceeded,
            Err(e) => DeploymentEvent::CreateFailed(e.to_string()),
        };
        let status = self.transition(&name, event)?;
        self.persist(&name).await;
        info!("Deployment {} is {}", name, status);

        result?;
        self.get(&name).await
    }

    /// Run the teardown pipeline of a ready or failed deployment
    pub async fn delete(&self, name: &str) -> Result<DeploymentSummary, DeployerError> {
        let deployer = {
            let mut maps = self.maps();
            let entry = maps.deployments.get_mut(name).ok_or_else(|| {
                DeployerError::NotFound(format!("Deployment {} not found", name))
            })?;
            entry
                .fsm
                .process(DeploymentEvent::Delete)
                .map_err(DeployerError::LifecycleError)?;
            entry.deployer.clone()
        };
        self.persist(name).await;

        info!("Deleting deployment {}", name);
        let result = deployer.delete_deployment().await;
        let event = match &result {
            Ok(()) => DeploymentEvent::DeleteSucceeded,
            Err(e) => DeploymentEvent::DeleteFailed(e.to_string()),
        };
        let status = self.transition(name, event)?;
        self.persist(name).await;

        let summary = self.get(name).await?;
        if status == DeploymentStatus::Deleted {
            self.maps().deployments.remove(name);
            info!("Deployment {} deleted", name);
        }

        result?;
        Ok(summary)
    }

    /// Live deployments plus deleted ones from the store, oldest first
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<DeploymentSummary>, DeployerError> {
        let mut summaries: Vec<DeploymentSummary> = {
            let maps = self.maps();
            maps.deployments.values().map(RegistryEntry::summary).collect()
        };

        if filter.status.is_none_or(|s| s == DeploymentStatus::Deleted) {
            let live: Vec<String> = summaries.iter().map(|s| s.name.clone()).collect();
            let deleted = self
                .store
                .load_deployments()
                .await?
                .into_iter()
                .filter(|r| r.status == DeploymentStatus::Deleted && !live.contains(&r.name));
            summaries.extend(deleted.map(|r| DeploymentSummary::from(&r)));
        }

        summaries.retain(|s| filter.matches(s));
        summaries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        Ok(summaries)
    }

    pub async fn get(&self, name: &str) -> Result<DeploymentSummary, DeployerError> {
        let live = {
            let maps = self.maps();
            maps.deployments.get(name).map(RegistryEntry::summary)
        };
        if let Some(summary) = live {
            return Ok(summary);
        }

        self.store
            .load_deployment(name)
            .await?
            .filter(|r| r.status == DeploymentStatus::Deleted)
            .map(|r| DeploymentSummary::from(&r))
            .ok_or_else(|| DeployerError::NotFound(format!("Deployment {} not found", name)))
    }

    /// Always fails: descriptors are immutable once accepted
    pub async fn update(&self, name: &str, deployment: &Deployment) -> Result<(), DeployerError> {
        self.deployer(name)?.update_deployment(deployment).await
    }

    pub async fn service_url(&self, name: &str, service: &str) -> Result<String, DeployerError> {
        self.deployer(name)?.get_service_url(service).await
    }

    pub async fn service_address(
        &self,
        name: &str,
        service: &str,
    ) -> Result<ServiceAddress, DeployerError> {
        self.deployer(name)?.get_service_address(service).await
    }

    pub async fn service_mappings(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, ServiceMapping>, DeployerError> {
        self.deployer(name)?.get_service_mappings().await
    }

    /// Attach a job scheduler to a ready deployment
    pub async fn set_scheduler(
        &self,
        name: &str,
        scheduler: SchedulerHandle,
    ) -> Result<(), DeployerError> {
        let deployer = self.deployer(name)?;
        deployer.set_scheduler(scheduler).await;
        self.persist(name).await;
        Ok(())
    }

    pub async fn scheduler(&self, name: &str) -> Result<Option<SchedulerHandle>, DeployerError> {
        Ok(self.deployer(name)?.get_scheduler().await)
    }

    fn profile(&self, user_id: &str) -> Option<AwsProfile> {
        self.maps().profiles.get(user_id).cloned()
    }

    /// Persist a credentials profile, replacing any previous one
    pub async fn store_profile(&self, profile: AwsProfile) -> Result<ProfileSummary, DeployerError> {
        if profile.user_id.trim().is_empty() || profile.aws_id.trim().is_empty() {
            return Err(DeployerError::ValidationError(
                "userId and awsId are required".to_string(),
            ));
        }
        self.store.save_profile(&profile).await?;
        let summary = ProfileSummary::from(&profile);
        self.maps()
            .profiles
            .insert(profile.user_id.clone(), profile);
        Ok(summary)
    }

    pub fn get_profile(&self, user_id: &str) -> Result<ProfileSummary, DeployerError> {
        self.maps()
            .profiles
            .get(user_id)
            .map(ProfileSummary::from)
            .ok_or_else(|| DeployerError::NotFound(format!("Profile {} not found", user_id)))
    }

    pub async fn delete_profile(&self, user_id: &str) -> Result<(), DeployerError> {
        let removed = self.maps().profiles.remove(user_id);
        if removed.is_none() {
            return Err(DeployerError::NotFound(format!(
                "Profile {} not found",
                user_id
            )));
        }
        self.store.delete_profile(user_id).await
    }

    pub fn factory(&self) -> &DeployerFactory {
        &self.factory
    }
}
