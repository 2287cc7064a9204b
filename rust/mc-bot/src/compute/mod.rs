//! Compute Engine boundary.
//!
//! The lifecycle controller only talks to [`ComputeApi`]; [`gce::GceClient`]
//! implements it over the REST API and tests substitute scripted fakes.

pub mod auth;
pub mod gce;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::BotResult;

/// Instance status as reported by Compute Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
    Deprovisioning,
    #[serde(other)]
    Unknown,
}

/// How the lifecycle controller reacts to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Running,
    Stopped,
    Transitional,
    Suspended,
    Unknown,
}

impl InstanceStatus {
    pub fn class(self) -> StatusClass {
        match self {
            Self::Running => StatusClass::Running,
            Self::Stopped | Self::Terminated => StatusClass::Stopped,
            Self::Provisioning
            | Self::Deprovisioning
            | Self::Repairing
            | Self::Staging
            | Self::Stopping => StatusClass::Transitional,
            Self::Suspended | Self::Suspending => StatusClass::Suspended,
            Self::Unknown => StatusClass::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Suspending => "SUSPENDING",
            Self::Suspended => "SUSPENDED",
            Self::Repairing => "REPAIRING",
            Self::Terminated => "TERMINATED",
            Self::Deprovisioning => "DEPROVISIONING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of the instance resource the bot cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub status: InstanceStatus,
}

/// Provider-side state of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    #[serde(other)]
    Unknown,
}

/// A create/start/stop operation handle together with its latest status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub status: OperationStatus,
    /// Id of the instance the operation targets, when the provider reports it
    pub target_id: Option<String>,
    /// Error messages attached to a finished operation
    pub errors: Vec<String>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }
}

/// Fixed shape of the game server VM created when none exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub description: String,
    pub machine_type: String,
    pub source_image: String,
    pub disk_name: String,
}

impl InstanceSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.instance.name.clone(),
            description: config.instance.description.clone(),
            machine_type: config.instance.machine_type.clone(),
            source_image: config.instance.source_image.clone(),
            disk_name: config.instance.disk_name.clone(),
        }
    }
}

/// Operations the lifecycle controller needs from the cloud provider.
///
/// Every method addresses the single configured instance; project and zone
/// are fixed at construction time.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Fetch the instance; `Ok(None)` when the provider answers "not found".
    async fn get_instance(&self, name: &str) -> BotResult<Option<Instance>>;

    async fn insert_instance(&self, spec: &InstanceSpec) -> BotResult<Operation>;

    async fn start_instance(&self, name: &str) -> BotResult<Operation>;

    async fn stop_instance(&self, name: &str) -> BotResult<Operation>;

    async fn get_operation(&self, name: &str) -> BotResult<Operation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert_eq!(InstanceStatus::Running.class(), StatusClass::Running);
        assert_eq!(InstanceStatus::Terminated.class(), StatusClass::Stopped);
        assert_eq!(InstanceStatus::Stopped.class(), StatusClass::Stopped);
        for status in [
            InstanceStatus::Provisioning,
            InstanceStatus::Deprovisioning,
            InstanceStatus::Repairing,
            InstanceStatus::Staging,
            InstanceStatus::Stopping,
        ] {
            assert_eq!(status.class(), StatusClass::Transitional, "{status}");
        }
        assert_eq!(InstanceStatus::Suspending.class(), StatusClass::Suspended);
        assert_eq!(InstanceStatus::Suspended.class(), StatusClass::Suspended);
    }

    #[test]
    fn test_status_deserialization() {
        let instance: Instance =
            serde_json::from_str(r#"{"id":"123","name":"mc-server","status":"STAGING"}"#).unwrap();
        assert_eq!(instance.status, InstanceStatus::Staging);

        let instance: Instance = serde_json::from_str(r#"{"status":"HIBERNATING"}"#).unwrap();
        assert_eq!(instance.status, InstanceStatus::Unknown);
        assert_eq!(instance.status.class(), StatusClass::Unknown);
    }
}
