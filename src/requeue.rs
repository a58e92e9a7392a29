//! Requeue timing for federation passes.
//!
//! The schedule is deliberately flat: a short delay when the request object
//! could not be read, the regular interval after everything else. There is
//! no backoff and no jitter.

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::Error;

/// Delay after the request object could not be fetched
pub const FETCH_ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Delay after any other outcome, successful or not
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Two-valued requeue schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Delay after a fetch failure
    pub fetch_error: Duration,
    /// Delay after every other outcome
    pub interval: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            fetch_error: FETCH_ERROR_REQUEUE,
            interval: RECONCILE_INTERVAL,
        }
    }
}

impl RequeuePolicy {
    /// Delay to wait after `error`
    pub fn delay_for_error(&self, error: &Error) -> Duration {
        if error.is_fetch_failure() {
            self.fetch_error
        } else {
            self.interval
        }
    }

    /// Action to return from `error_policy` for `error`
    pub fn action_for_error(&self, error: &Error) -> Action {
        Action::requeue(self.delay_for_error(error))
    }

    /// Action to return after a successful pass
    pub fn success_action(&self) -> Action {
        Action::requeue(self.interval)
    }
}
