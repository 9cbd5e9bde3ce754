//! Error types raised by the runtime and its bundled templates.

use std::time::Duration;
use thiserror::Error;

/// Application errors produced by the bundled policy templates.
///
/// Surfaced to callers as [`RequestError::User`](courier_core::RequestError::User);
/// recover the concrete value with
/// [`RequestError::user_error`](courier_core::RequestError::user_error).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// [`AttemptLimit`](crate::templates::AttemptLimit) refused another send.
    #[error("attempt limit exceeded after {attempts} attempts")]
    AttemptLimitExceeded {
        /// Sends made before the limit was hit
        attempts: usize,
    },

    /// [`Deadline`](crate::templates::Deadline) ran out of budget.
    #[error("deadline of {limit_ms}ms exceeded after {elapsed_ms}ms")]
    DeadlineExceeded {
        /// Time spent when the deadline fired
        elapsed_ms: u64,
        /// The configured budget
        limit_ms: u64,
    },
}

impl PolicyError {
    /// Build a [`PolicyError::DeadlineExceeded`] from durations.
    #[must_use]
    pub fn deadline_exceeded(elapsed: Duration, limit: Duration) -> Self {
        Self::DeadlineExceeded {
            elapsed_ms: millis(elapsed),
            limit_ms: millis(limit),
        }
    }
}

/// A strategy could not finish a client invocation, typically because the
/// async runtime cancelled the blocking task during shutdown.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("client invocation was interrupted before it completed")]
pub struct Interrupted;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_message_reports_both_durations() {
        let error =
            PolicyError::deadline_exceeded(Duration::from_millis(1500), Duration::from_secs(1));
        assert_eq!(error.to_string(), "deadline of 1000ms exceeded after 1500ms");
    }

    #[test]
    fn attempt_limit_message() {
        let error = PolicyError::AttemptLimitExceeded { attempts: 3 };
        assert_eq!(error.to_string(), "attempt limit exceeded after 3 attempts");
    }
}
