//! Finite State Machine for deployment lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Accepted, provisioning not started
    NotStarted,

    /// Provisioning pipeline running
    Creating,

    /// Provisioned and serving
    Ready,

    /// A pipeline failed
    Failed,

    /// Teardown pipeline running
    Deleting,

    /// Torn down (terminal)
    Deleted,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::NotStarted => "notstarted",
            DeploymentStatus::Creating => "creating",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Deleting => "deleting",
            DeploymentStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notstarted" => Ok(DeploymentStatus::NotStarted),
            "creating" => Ok(DeploymentStatus::Creating),
            "ready" => Ok(DeploymentStatus::Ready),
            "failed" => Ok(DeploymentStatus::Failed),
            "deleting" => Ok(DeploymentStatus::Deleting),
            "deleted" => Ok(DeploymentStatus::Deleted),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Lifecycle event, produced only by pipeline outcomes
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Provisioning started
    Create,

    /// Provisioning completed
    CreateSucceeded,

    /// Provisioning failed
    CreateFailed(String),

    /// Teardown started
    Delete,

    /// Teardown completed
    DeleteSucceeded,

    /// Teardown left resources behind
    DeleteFailed(String),

    /// Out-of-band failure, e.g. state could not be reloaded
    Fail(String),
}

/// Deployment lifecycle FSM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
    attempts: u32,
}

impl DeploymentFsm {
    /// Create a new FSM in the not-started state
    pub fn new() -> Self {
        Self {
            status: DeploymentStatus::NotStarted,
            error: None,
            attempts: 0,
        }
    }

    /// Resume from a persisted status
    pub fn restore(status: DeploymentStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            attempts: 0,
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Last failure message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of teardown attempts made
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_status = match (&self.status, &event) {
            (DeploymentStatus::NotStarted, DeploymentEvent::Create) => DeploymentStatus::Creating,

            (DeploymentStatus::Creating, DeploymentEvent::CreateSucceeded) => {
                self.error = None;
                DeploymentStatus::Ready
            }
            (DeploymentStatus::Creating, DeploymentEvent::CreateFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            (DeploymentStatus::Ready | DeploymentStatus::Failed, DeploymentEvent::Delete) => {
                self.attempts += 1;
                DeploymentStatus::Deleting
            }

            (DeploymentStatus::Deleting, DeploymentEvent::DeleteSucceeded) => {
                self.error = None;
                DeploymentStatus::Deleted
            }
            (DeploymentStatus::Deleting, DeploymentEvent::DeleteFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            (status, DeploymentEvent::Fail(err)) if !status.is_terminal() => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            // Invalid transitions
            (status, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", status, event));
            }
        };

        self.status = new_status;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
