//! Structured timing for the long-running bot operations.
//!
//! Bringing the server up or down can take minutes; every command handler
//! wraps its work in an [`OpTimer`] so the log shows how long each phase took
//! and whether it succeeded.

use std::time::Instant;

use crate::Outcome;

/// Operation timer for measuring and logging execution duration.
///
/// # Examples
///
/// ```rust,ignore
/// use mc_bot::logging::OpTimer;
///
/// let timer = OpTimer::new("lifecycle", "bring_up");
/// let outcome = controller.bring_up().await;
/// timer.finish_outcome(&outcome);
/// ```
#[derive(Debug)]
pub struct OpTimer {
    /// Component being timed (e.g., "lifecycle", "management").
    component: &'static str,
    /// Operation being performed (e.g., "bring_up", "dial").
    operation: &'static str,
    start: Instant,
}

impl OpTimer {
    /// Creates a new operation timer and logs the start.
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        tracing::debug!(component, operation, "Operation started");

        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Finishes the timer and logs the duration.
    pub fn finish(self) {
        tracing::info!(
            component = self.component,
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }

    /// Finishes the timer with result-aware logging.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.finish(),
            Err(e) => {
                tracing::error!(
                    component = self.component,
                    operation = self.operation,
                    duration_ms = self.elapsed_ms(),
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }

    /// Finishes the timer for an operation that already folded its error
    /// into an [`Outcome`].
    pub fn finish_outcome(self, outcome: &Outcome) {
        if outcome.success {
            tracing::info!(
                component = self.component,
                operation = self.operation,
                duration_ms = self.elapsed_ms(),
                message = %outcome.message,
                "Operation completed successfully"
            );
        } else {
            tracing::warn!(
                component = self.component,
                operation = self.operation,
                duration_ms = self.elapsed_ms(),
                message = %outcome.message,
                "Operation failed"
            );
        }
    }

    fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timer_creation() {
        let timer = OpTimer::new("lifecycle", "bring_up");
        assert_eq!(timer.component, "lifecycle");
        assert_eq!(timer.operation, "bring_up");
    }

    #[test]
    fn test_op_timer_finish_with_result_err() {
        let timer = OpTimer::new("management", "dial");
        let result: Result<(), String> = Err("handshake failed".to_string());
        timer.finish_with_result(&result);
    }

    #[test]
    fn test_op_timer_finish_outcome() {
        OpTimer::new("lifecycle", "bring_down").finish_outcome(&Outcome::ok("done!"));
        OpTimer::new("lifecycle", "bring_down").finish_outcome(&Outcome::failed("failed"));
    }
}
