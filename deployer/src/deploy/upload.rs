//! File transfer to provisioned nodes

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::CloudError;
use crate::filesys::dir::Dir;

/// A node reachable over the secure copy channel
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub private_key: SecretString,
}

/// Secure remote copy channel
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn copy_to_remote(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), CloudError>;
}

/// Copies with the system `scp` binary
#[derive(Debug, Clone, Default)]
pub struct ScpTransfer;

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn copy_to_remote(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), CloudError> {
        let io_err = |e: crate::errors::DeployerError| CloudError::api("Scp", e.to_string());

        let key_dir = Dir::create_temp_dir("deployer-key").await.map_err(io_err)?;
        let key_file = key_dir.file("id_rsa");
        let result = async {
            key_file
                .write_private(target.private_key.expose_secret().as_bytes())
                .await
                .map_err(io_err)?;

            info!("Copying {:?} to {}:{}", local_path, target.host, remote_path);
            let output = Command::new("scp")
                .arg("-i")
                .arg(key_file.path())
                .args(["-o", "StrictHostKeyChecking=no"])
                .args(["-o", "UserKnownHostsFile=/dev/null"])
                .arg(local_path)
                .arg(format!("{}@{}:{}", target.user, target.host, remote_path))
                .output()
                .await
                .map_err(|e| CloudError::api("Scp", e.to_string()))?;

            if !output.status.success() {
                return Err(CloudError::api(
                    "Scp",
                    format!(
                        "copy to {} failed: {}",
                        target.host,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                ));
            }
            Ok(())
        }
        .await;

        if let Err(e) = key_dir.delete().await {
            debug!("Unable to remove key directory: {}", e);
        }
        result
    }
}

/// A copy made through [`MemoryTransfer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub host: String,
    pub user: String,
    pub local_path: PathBuf,
    pub remote_path: String,
}

/// Records copies instead of performing them; pairs with the simulated cloud
#[derive(Debug, Clone, Default)]
pub struct MemoryTransfer {
    records: Arc<Mutex<Vec<TransferRecord>>>,
}

impl MemoryTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TransferRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl FileTransfer for MemoryTransfer {
    async fn copy_to_remote(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), CloudError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(TransferRecord {
                host: target.host.clone(),
                user: target.user.clone(),
                local_path: local_path.to_path_buf(),
                remote_path: remote_path.to_string(),
            });
        Ok(())
    }
}
