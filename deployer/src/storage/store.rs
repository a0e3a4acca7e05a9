//! Persistent deployment and profile store

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::deploy::deployer::{DeployType, SchedulerHandle};
use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;
use crate::models::profile::AwsProfile;
use crate::storage::layout::StorageLayout;

/// A deployment as it is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub name: String,
    pub user_id: String,
    pub deploy_type: DeployType,
    pub status: DeploymentStatus,

    #[serde(default)]
    pub error: Option<String>,

    /// Creation time, unix seconds
    pub created: i64,

    pub deployment: Deployment,

    /// Backend specific record, see `Deployer::get_store_info`
    #[serde(default)]
    pub store_info: Option<Value>,

    #[serde(default)]
    pub scheduler: Option<SchedulerHandle>,
}

/// Where deployment records and credential profiles survive restarts
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn save_deployment(&self, record: &DeploymentRecord) -> Result<(), DeployerError>;

    async fn load_deployments(&self) -> Result<Vec<DeploymentRecord>, DeployerError>;

    async fn load_deployment(&self, name: &str) -> Result<Option<DeploymentRecord>, DeployerError>;

    async fn save_profile(&self, profile: &AwsProfile) -> Result<(), DeployerError>;

    async fn load_profiles(&self) -> Result<Vec<AwsProfile>, DeployerError>;

    async fn delete_profile(&self, user_id: &str) -> Result<(), DeployerError>;
}

/// Keep record file names inside their directory
fn file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", safe.trim_start_matches('.'))
}

/// One JSON file per record under the storage layout
pub struct FileStore {
    deployments: Dir,
    profiles: Dir,
}

impl FileStore {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            deployments: layout.deployments_dir(),
            profiles: layout.profiles_dir(),
        }
    }

    async fn read_all<T: serde::de::DeserializeOwned>(dir: &Dir) -> Result<Vec<T>, DeployerError> {
        let mut values = Vec::new();
        for path in dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match File::new(&path).read_json::<T>().await {
                Ok(value) => values.push(value),
                Err(e) => warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn save_deployment(&self, record: &DeploymentRecord) -> Result<(), DeployerError> {
        self.deployments
            .file(&file_name(&record.name))
            .write_json(record)
            .await
    }

    async fn load_deployments(&self) -> Result<Vec<DeploymentRecord>, DeployerError> {
        Self::read_all(&self.deployments).await
    }

    async fn load_deployment(&self, name: &str) -> Result<Option<DeploymentRecord>, DeployerError> {
        let file = self.deployments.file(&file_name(name));
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }

    async fn save_profile(&self, profile: &AwsProfile) -> Result<(), DeployerError> {
        let file = self.profiles.file(&file_name(&profile.user_id));
        file.write_json_private(profile).await
    }

    async fn load_profiles(&self) -> Result<Vec<AwsProfile>, DeployerError> {
        Self::read_all(&self.profiles).await
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), DeployerError> {
        self.profiles.file(&file_name(user_id)).delete().await
    }
}

/// Volatile store for tests and throwaway runs
#[derive(Default)]
pub struct MemoryStore {
    deployments: Mutex<BTreeMap<String, DeploymentRecord>>,
    profiles: Mutex<BTreeMap<String, AwsProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn save_deployment(&self, record: &DeploymentRecord) -> Result<(), DeployerError> {
        self.deployments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn load_deployments(&self) -> Result<Vec<DeploymentRecord>, DeployerError> {
        let deployments = self.deployments.lock().unwrap_or_else(|e| e.into_inner());
        Ok(deployments.values().cloned().collect())
    }

    async fn load_deployment(&self, name: &str) -> Result<Option<DeploymentRecord>, DeployerError> {
        let deployments = self.deployments.lock().unwrap_or_else(|e| e.into_inner());
        Ok(deployments.get(name).cloned())
    }

    async fn save_profile(&self, profile: &AwsProfile) -> Result<(), DeployerError> {
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn load_profiles(&self) -> Result<Vec<AwsProfile>, DeployerError> {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        Ok(profiles.values().cloned().collect())
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), DeployerError> {
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        Ok(())
    }
}
