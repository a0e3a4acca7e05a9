//! Error types for the cluster deployer

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::deploy::ecs::provision::ProvisionStep;
use crate::deploy::ecs::teardown::TeardownStep;

/// Errors reported by cloud collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("{operation} failed: {message}")]
    Api { operation: String, message: String },

    #[error("Waiter {waiter} gave up after {attempts} attempts")]
    WaiterTimeout { waiter: String, attempts: u32 },

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    PollTimeout { what: String, elapsed: Duration },
}

impl CloudError {
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

/// One failed teardown step
#[derive(Debug, Clone)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub message: String,
}

/// Aggregate of every teardown step that failed during one run
#[derive(Debug, Clone, Default)]
pub struct TeardownFailures(pub Vec<TeardownFailure>);

impl TeardownFailures {
    pub fn push(&mut self, step: TeardownStep, message: impl Into<String>) {
        self.0.push(TeardownFailure {
            step,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn steps(&self) -> Vec<TeardownStep> {
        self.0.iter().map(|f| f.step).collect()
    }
}

impl fmt::Display for TeardownFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|failure| format!("{}: {}", failure.step, failure.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Provisioning failed at {step}: {source}")]
    ProvisioningError {
        step: ProvisionStep,
        #[source]
        source: CloudError,
    },

    #[error("Teardown incomplete ({n} step(s) failed): {0}", n = .0.len())]
    TeardownError(TeardownFailures),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),

    #[error("Invalid lifecycle transition: {0}")]
    LifecycleError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl DeployerError {
    pub fn provisioning(step: ProvisionStep, source: CloudError) -> Self {
        DeployerError::ProvisioningError { step, source }
    }
}
