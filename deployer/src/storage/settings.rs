//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::cloud::waiter::{PollOptions, WaiterOptions};
use crate::errors::DeployerError;
use crate::logs::LogLevel;
use crate::utils::CooldownOptions;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also write logs to `<files_path>/log`
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub json_logs: bool,

    /// Data directory; defaults to the storage base directory
    #[serde(default)]
    pub files_path: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Which cloud the deployer talks to
    #[serde(default)]
    pub cloud_provider: CloudProviderKind,

    /// Provisioning pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: true,
            json_logs: false,
            files_path: None,
            server: ServerSettings::default(),
            cloud_provider: CloudProviderKind::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Cloud backends the binary can open sessions against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProviderKind {
    /// In-process simulated cloud
    #[default]
    Simulated,
}

/// Provisioning pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_cidr")]
    pub vpc_cidr: Ipv4Net,

    #[serde(default = "default_cidr")]
    pub subnet_cidr: Ipv4Net,

    /// Login user on the container host image
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Container host image per region
    #[serde(default = "default_region_images")]
    pub region_images: BTreeMap<String, String>,

    #[serde(default)]
    pub waiter: WaiterSettings,

    /// Interval between cluster registration polls
    #[serde(default = "default_poll_interval_secs")]
    pub readiness_poll_interval_secs: u64,

    /// Give up on cluster registration after this long; `null` waits forever
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: Option<u64>,
}

fn default_cidr() -> Ipv4Net {
    Ipv4Net::new(std::net::Ipv4Addr::new(172, 31, 0, 0), 28).unwrap_or_default()
}

fn default_ssh_user() -> String {
    "ec2-user".to_string()
}

fn default_region_images() -> BTreeMap<String, String> {
    [
        ("us-east-1", "ami-9eb4b1e5"),
        ("us-east-2", "ami-1c002379"),
        ("us-west-1", "ami-4a2c192a"),
        ("us-west-2", "ami-1d668865"),
        ("ca-central-1", "ami-b677c9d2"),
        ("eu-west-1", "ami-8fcc32f6"),
        ("eu-west-2", "ami-cb1101af"),
        ("eu-central-1", "ami-0460cb6b"),
        ("ap-northeast-1", "ami-b743bed1"),
        ("ap-southeast-1", "ami-9d1f7efe"),
        ("ap-southeast-2", "ami-c1a6bda2"),
    ]
    .into_iter()
    .map(|(region, image)| (region.to_string(), image.to_string()))
    .collect()
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_readiness_timeout_secs() -> Option<u64> {
    Some(15 * 60)
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            vpc_cidr: default_cidr(),
            subnet_cidr: default_cidr(),
            ssh_user: default_ssh_user(),
            region_images: default_region_images(),
            waiter: WaiterSettings::default(),
            readiness_poll_interval_secs: default_poll_interval_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), DeployerError> {
        self.pipeline.validate()
    }
}

impl PipelineSettings {
    /// Reject values that would make the pipeline spin or never wait
    pub fn validate(&self) -> Result<(), DeployerError> {
        if self.readiness_poll_interval_secs == 0 {
            return Err(DeployerError::ConfigError(
                "readiness_poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.readiness_timeout_secs == Some(0) {
            return Err(DeployerError::ConfigError(
                "readiness_timeout_secs must be at least 1 or null".to_string(),
            ));
        }
        if self.waiter.max_attempts == 0 {
            return Err(DeployerError::ConfigError(
                "waiter.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Container host image for a region
    pub fn image_for_region(&self, region: &str) -> Result<&str, DeployerError> {
        self.region_images
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| DeployerError::ValidationError(format!("Unsupported region: {}", region)))
    }

    pub fn waiter_options(&self) -> WaiterOptions {
        WaiterOptions {
            cooldown: CooldownOptions {
                base_delay: Duration::from_millis(self.waiter.base_delay_ms),
                max_delay: Duration::from_millis(self.waiter.max_delay_ms),
                multiplier: 2.0,
            },
            max_attempts: self.waiter.max_attempts,
        }
    }

    pub fn readiness_poll(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_secs(self.readiness_poll_interval_secs),
            timeout: self.readiness_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Backoff for provider-side waiters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    15_000
}

fn default_max_attempts() -> u32 {
    40
}

impl Default for WaiterSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}
