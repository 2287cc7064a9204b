//! Operation Waiter: polls a Compute Engine operation until it is done.

use std::time::Duration;

use tracing::{debug, warn};

use crate::compute::{ComputeApi, Operation};
use crate::error::{BotError, BotResult};

#[derive(Debug, Clone, Copy)]
pub struct OperationWaiter {
    interval: Duration,
    /// `None` polls until the provider reports a terminal state
    max_polls: Option<u32>,
}

impl OperationWaiter {
    pub fn new(interval: Duration, max_polls: Option<u32>) -> Self {
        Self {
            interval,
            max_polls,
        }
    }

    /// Block until `operation` is done.
    ///
    /// A done operation with errors fails with every message joined into one
    /// [`BotError::OperationFailed`]; a failed status read ends the wait.
    pub async fn wait<C>(&self, compute: &C, operation: &Operation) -> BotResult<Operation>
    where
        C: ComputeApi + ?Sized,
    {
        let mut polls: u32 = 0;
        loop {
            let current = compute.get_operation(&operation.name).await.map_err(|e| {
                warn!(operation = %operation.name, error = %e, "Failed retrieving operation status");
                e
            })?;
            polls += 1;

            if current.is_done() {
                if !current.errors.is_empty() {
                    return Err(BotError::OperationFailed(current.errors.join(", ")));
                }
                debug!(operation = %current.name, polls, "Operation finished");
                return Ok(current);
            }

            if let Some(max) = self.max_polls {
                if polls >= max {
                    return Err(BotError::OperationTimeout {
                        name: operation.name.clone(),
                        polls,
                    });
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

impl Default for OperationWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{Instance, InstanceSpec, OperationStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted operation states; repeats the last one forever.
    struct ScriptedOperations {
        states: Mutex<VecDeque<Operation>>,
        last: Mutex<Option<Operation>>,
        polls: AtomicU32,
    }

    impl ScriptedOperations {
        fn new(states: Vec<Operation>) -> Self {
            Self {
                states: Mutex::new(states.into()),
                last: Mutex::new(None),
                polls: AtomicU32::new(0),
            }
        }
    }

    fn op(status: OperationStatus, errors: &[&str]) -> Operation {
        Operation {
            name: "operation-1".to_string(),
            status,
            target_id: None,
            errors: errors.iter().map(ToString::to_string).collect(),
        }
    }

    #[async_trait]
    impl ComputeApi for ScriptedOperations {
        async fn get_instance(&self, _name: &str) -> BotResult<Option<Instance>> {
            unreachable!("waiter only reads operations")
        }
        async fn insert_instance(&self, _spec: &InstanceSpec) -> BotResult<Operation> {
            unreachable!("waiter only reads operations")
        }
        async fn start_instance(&self, _name: &str) -> BotResult<Operation> {
            unreachable!("waiter only reads operations")
        }
        async fn stop_instance(&self, _name: &str) -> BotResult<Operation> {
            unreachable!("waiter only reads operations")
        }
        async fn get_operation(&self, _name: &str) -> BotResult<Operation> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let next = self.states.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next);
            }
            Ok(last.clone().expect("script must not be empty"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_done() {
        let compute = ScriptedOperations::new(vec![
            op(OperationStatus::Pending, &[]),
            op(OperationStatus::Running, &[]),
            op(OperationStatus::Done, &[]),
        ]);
        let waiter = OperationWaiter::default();

        let done = waiter
            .wait(&compute, &op(OperationStatus::Pending, &[]))
            .await
            .unwrap();

        assert!(done.is_done());
        assert_eq!(compute.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joins_error_messages() {
        let compute = ScriptedOperations::new(vec![op(
            OperationStatus::Done,
            &["disk quota exceeded", "zone exhausted"],
        )]);
        let waiter = OperationWaiter::default();

        let err = waiter
            .wait(&compute, &op(OperationStatus::Running, &[]))
            .await
            .unwrap_err();

        match err {
            BotError::OperationFailed(message) => {
                assert_eq!(message, "disk quota exceeded, zone exhausted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_polling_a_stuck_operation() {
        let compute = ScriptedOperations::new(vec![op(OperationStatus::Running, &[])]);
        let waiter = OperationWaiter::new(Duration::from_secs(1), None);

        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            waiter.wait(&compute, &op(OperationStatus::Running, &[])),
        )
        .await;

        assert!(outcome.is_err(), "an unbounded waiter never gives up");
        let polls = compute.polls.load(Ordering::SeqCst);
        assert!((30..=31).contains(&polls), "polled {polls} times");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cap_yields_timeout() {
        let compute = ScriptedOperations::new(vec![op(OperationStatus::Pending, &[])]);
        let waiter = OperationWaiter::new(Duration::from_secs(1), Some(5));

        let err = waiter
            .wait(&compute, &op(OperationStatus::Pending, &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::OperationTimeout { polls: 5, .. }));
        assert_eq!(compute.polls.load(Ordering::SeqCst), 5);
    }
}
