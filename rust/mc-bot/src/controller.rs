//! Compute Lifecycle Controller.
//!
//! Reconciles "up"/"down" requests against the instance status reported by
//! Compute Engine. Status is re-read at entry and after every mutating or
//! waiting step; nothing is cached between calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::Outcome;
use crate::compute::{ComputeApi, Instance, InstanceSpec, InstanceStatus, StatusClass};
use crate::config::Config;
use crate::error::{BotError, BotResult};
use crate::logging::OpTimer;
use crate::waiter::OperationWaiter;

pub const DONE: &str = "done!";
pub const BOOTING: &str =
    "done! please go do something else for 5 minutes, the server instance is booting up Minecraft";
pub const ALREADY_RUNNING: &str = "instance was already running";
pub const ALREADY_STOPPED: &str = "it was already stopped!";
pub const ALREADY_GONE: &str = "it already didn't exist";

/// Something holding a connection into the instance that must be torn down
/// before the instance stops.
#[async_trait]
pub trait ConnectionCloser: Send + Sync {
    async fn close(&self);
}

pub struct LifecycleController {
    compute: Arc<dyn ComputeApi>,
    spec: InstanceSpec,
    waiter: OperationWaiter,
    transition_interval: Duration,
    /// `None` waits out transitional states forever
    max_transition_polls: Option<u32>,
    suspended_alert: Option<String>,
    connection: Option<Arc<dyn ConnectionCloser>>,
}

impl LifecycleController {
    pub fn new(compute: Arc<dyn ComputeApi>, spec: InstanceSpec) -> Self {
        Self {
            compute,
            spec,
            waiter: OperationWaiter::default(),
            transition_interval: Duration::from_secs(5),
            max_transition_polls: None,
            suspended_alert: None,
            connection: None,
        }
    }

    /// Controller with the instance shape, polling policy and alert taken
    /// from the configuration.
    pub fn from_config(compute: Arc<dyn ComputeApi>, config: &Config) -> Self {
        let lifecycle = &config.lifecycle;
        Self::new(compute, InstanceSpec::from_config(config))
            .with_waiter(OperationWaiter::new(
                config.operation_poll_interval(),
                Some(lifecycle.max_operation_polls).filter(|max| *max > 0),
            ))
            .with_transition_policy(
                config.transition_poll_interval(),
                Some(lifecycle.max_transition_polls).filter(|max| *max > 0),
            )
            .with_suspended_alert(config.discord.suspended_alert.clone())
    }

    #[must_use]
    pub fn with_waiter(mut self, waiter: OperationWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    #[must_use]
    pub fn with_transition_policy(mut self, interval: Duration, max_polls: Option<u32>) -> Self {
        self.transition_interval = interval;
        self.max_transition_polls = max_polls;
        self
    }

    #[must_use]
    pub fn with_suspended_alert(mut self, alert: Option<String>) -> Self {
        self.suspended_alert = alert;
        self
    }

    /// Connection closed before every stop request.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<dyn ConnectionCloser>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Instance State Reader: `None` means the instance does not exist.
    pub async fn read_state(&self) -> BotResult<Option<Instance>> {
        self.compute.get_instance(&self.spec.name).await.map_err(|e| {
            error!(instance = %self.spec.name, error = %e, "Cannot get instance details");
            e
        })
    }

    /// Whether the instance exists and is `RUNNING`. Never mutates anything.
    pub async fn is_up(&self) -> BotResult<bool> {
        Ok(self
            .read_state()
            .await?
            .is_some_and(|instance| instance.status == InstanceStatus::Running))
    }

    /// Create or start the instance until it is running.
    #[instrument(skip(self), fields(instance = %self.spec.name))]
    pub async fn bring_up(&self) -> Outcome {
        let timer = OpTimer::new("lifecycle", "bring_up");
        let outcome = self
            .try_bring_up()
            .await
            .unwrap_or_else(|e| Self::failure(&e));
        timer.finish_outcome(&outcome);
        outcome
    }

    /// Stop the instance if it is running.
    #[instrument(skip(self), fields(instance = %self.spec.name))]
    pub async fn bring_down(&self) -> Outcome {
        let timer = OpTimer::new("lifecycle", "bring_down");
        let outcome = self
            .try_bring_down()
            .await
            .unwrap_or_else(|e| Self::failure(&e));
        timer.finish_outcome(&outcome);
        outcome
    }

    async fn try_bring_up(&self) -> BotResult<Outcome> {
        let mut created = false;
        let mut transition_polls = 0;

        loop {
            let Some(instance) = self.read_state().await? else {
                if created {
                    return Err(BotError::UnexpectedStatus(
                        "instance still missing after it was created".to_string(),
                    ));
                }
                info!("No VM instance available. Creating one now");
                let operation = self.compute.insert_instance(&self.spec).await?;
                let done = self.waiter.wait(self.compute.as_ref(), &operation).await?;
                info!(
                    target_id = done.target_id.or(operation.target_id).as_deref().unwrap_or("unknown"),
                    "Instance created"
                );
                created = true;
                continue;
            };

            match instance.status.class() {
                StatusClass::Running => {
                    if created {
                        return Ok(Outcome::ok(DONE));
                    }
                    info!("Instance was already running, doing nothing");
                    return Ok(Outcome::ok(ALREADY_RUNNING));
                }
                StatusClass::Stopped => {
                    info!(status = %instance.status, "Instance was stopped, starting it");
                    let operation = self.compute.start_instance(&self.spec.name).await?;
                    self.waiter.wait(self.compute.as_ref(), &operation).await?;
                    info!("Instance started");
                    return Ok(Outcome::ok(BOOTING));
                }
                StatusClass::Transitional => {
                    self.wait_out_transition(instance.status, &mut transition_polls)
                        .await?;
                }
                StatusClass::Suspended => return Ok(self.suspended(instance.status)),
                StatusClass::Unknown => {
                    return Err(BotError::UnexpectedStatus(instance.status.to_string()));
                }
            }
        }
    }

    async fn try_bring_down(&self) -> BotResult<Outcome> {
        let mut transition_polls = 0;

        loop {
            let Some(instance) = self.read_state().await? else {
                info!("Server already doesn't exist");
                return Ok(Outcome::ok(ALREADY_GONE));
            };

            match instance.status.class() {
                StatusClass::Running => {
                    info!("Instance was running, stopping it");
                    // The management service dies with the instance; never reuse its connection.
                    if let Some(connection) = &self.connection {
                        connection.close().await;
                    }
                    let operation = self.compute.stop_instance(&self.spec.name).await?;
                    self.waiter.wait(self.compute.as_ref(), &operation).await?;
                    info!("Instance stopped");
                    return self.confirm_stopped().await;
                }
                StatusClass::Stopped => {
                    info!("Instance was already stopped, doing nothing");
                    return Ok(Outcome::ok(ALREADY_STOPPED));
                }
                StatusClass::Transitional => {
                    self.wait_out_transition(instance.status, &mut transition_polls)
                        .await?;
                }
                StatusClass::Suspended => return Ok(self.suspended(instance.status)),
                StatusClass::Unknown => {
                    return Err(BotError::UnexpectedStatus(instance.status.to_string()));
                }
            }
        }
    }

    /// Re-read after a finished stop. The stop counts unless the instance
    /// still reports `RUNNING`.
    async fn confirm_stopped(&self) -> BotResult<Outcome> {
        match self.read_state().await? {
            Some(instance) if instance.status == InstanceStatus::Running => {
                Err(BotError::UnexpectedStatus(
                    "instance still RUNNING after it was stopped".to_string(),
                ))
            }
            Some(instance) => {
                info!(status = %instance.status, "Stop confirmed");
                Ok(Outcome::ok(DONE))
            }
            None => Ok(Outcome::ok(DONE)),
        }
    }

    async fn wait_out_transition(&self, status: InstanceStatus, polls: &mut u32) -> BotResult<()> {
        if let Some(max) = self.max_transition_polls {
            if *polls >= max {
                return Err(BotError::TransitionTimeout {
                    status: status.to_string(),
                    polls: *polls,
                });
            }
        }
        info!(
            status = %status,
            wait_secs = self.transition_interval.as_secs(),
            "Instance is in transitional status, waiting before re-reading"
        );
        tokio::time::sleep(self.transition_interval).await;
        *polls += 1;
        Ok(())
    }

    fn suspended(&self, status: InstanceStatus) -> Outcome {
        warn!(status = %status, "Instance is suspended, manual intervention required");
        match &self.suspended_alert {
            Some(alert) => Outcome::failed(format!("server is suspended {alert}")),
            None => Outcome::failed("server is suspended"),
        }
    }

    fn failure(err: &BotError) -> Outcome {
        error!(error = %err, "Lifecycle operation failed");
        Outcome::failed(format!("failed: {err}"))
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("instance", &self.spec.name)
            .field("waiter", &self.waiter)
            .field("transition_interval", &self.transition_interval)
            .field("max_transition_polls", &self.max_transition_polls)
            .field("has_connection", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}
