use crate::backend::{Backend, BackendError, ChatRequest, Reply};
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Placeholder written when the backend answered without usable content.
pub const NO_OUTPUT_PLACEHOLDER: &str = "[No output]";

/// Placeholder written when the backend rejected a chunk.
pub const REJECTED_PLACEHOLDER: &str = "[No output or error]";

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least 1)
    pub attempts: u32,

    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

/// Result of one resilient call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The backend produced text.
    Success(String),

    /// The backend answered but produced nothing usable.
    Empty,

    /// A hard failure abandoned the chunk without retrying.
    Rejected {
        /// Failure description
        reason: String,
    },

    /// Every attempt failed with a transient error.
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// The last failure seen
        last_error: String,
    },
}

impl CallOutcome {
    /// Returns true for [`CallOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the short label used in logs and the run summary.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Empty => "empty",
            Self::Rejected { .. } => "rejected",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    /// Returns the body of the chunk's section in the output document:
    /// the generated text, or a placeholder for anything else.
    #[must_use]
    pub fn section_body(&self) -> String {
        match self {
            Self::Success(text) => text.clone(),
            Self::Empty => NO_OUTPUT_PLACEHOLDER.to_string(),
            Self::Rejected { reason } => format!("{REJECTED_PLACEHOLDER}\n{reason}"),
            Self::Exhausted {
                attempts,
                last_error,
            } => format!("[Error]: failed after {attempts} attempts: {last_error}"),
        }
    }
}

/// Calls a backend with a fixed-delay retry loop on transient failures.
pub struct ResilientCaller<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: Backend> ResilientCaller<B> {
    /// Creates a caller. A policy with zero attempts is treated as one.
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy: RetryPolicy {
                attempts: policy.attempts.max(1),
                ..policy
            },
        }
    }

    /// Returns the wrapped backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the retry policy in effect.
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends `request`, retrying transient failures.
    ///
    /// Makes at most `policy.attempts` attempts and never sleeps after the
    /// last one.
    pub fn call(&self, request: &ChatRequest) -> CallOutcome {
        let attempts = self.policy.attempts;
        let mut last_error: Option<BackendError> = None;

        for attempt in 1..=attempts {
            debug!(
                backend = self.backend.name(),
                attempt, attempts, "Calling backend"
            );

            match self.backend.send(request) {
                Ok(Reply::Text(text)) if !text.trim().is_empty() => {
                    return CallOutcome::Success(text);
                }
                Ok(_) => {
                    warn!("Backend returned no output");
                    return CallOutcome::Empty;
                }
                Err(e) if e.is_transient() => {
                    warn!("[attempt {}/{}] {}", attempt, attempts, e);
                    if attempt < attempts {
                        warn!("Retrying in {:.0} seconds...", self.policy.delay.as_secs_f64());
                        thread::sleep(self.policy.delay);
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("{}", e);
                    return CallOutcome::Rejected {
                        reason: e.message().to_string(),
                    };
                }
            }
        }

        error!("Failed after {} attempts", attempts);
        CallOutcome::Exhausted {
            attempts,
            last_error: last_error.map_or_else(
                || "no attempt was made".to_string(),
                |e| e.message().to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{ScriptedBackend, text};
    use std::time::Instant;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::user("test-model", "chunk")
    }

    #[test]
    fn test_success_on_first_attempt() {
        let caller = ResilientCaller::new(ScriptedBackend::new(vec![text("docs")]), policy(3));

        assert_eq!(caller.call(&request()), CallOutcome::Success("docs".to_string()));
        assert_eq!(caller.backend().calls(), 1);
    }

    #[test]
    fn test_always_transient_exhausts_exact_budget() {
        let backend = ScriptedBackend::always(Err(BackendError::transient("504 Gateway Timeout")));
        let caller = ResilientCaller::new(backend, policy(3));

        let outcome = caller.call(&request());

        assert_eq!(
            outcome,
            CallOutcome::Exhausted {
                attempts: 3,
                last_error: "504 Gateway Timeout".to_string(),
            }
        );
        assert_eq!(caller.backend().calls(), 3);
    }

    #[test]
    fn test_hard_failure_short_circuits() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::hard("400 Bad Request: invalid model")),
            text("never reached"),
        ]);
        let caller = ResilientCaller::new(backend, policy(5));

        let outcome = caller.call(&request());

        assert!(matches!(outcome, CallOutcome::Rejected { ref reason } if reason.contains("400")));
        assert_eq!(caller.backend().calls(), 1);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::transient("504")),
            Err(BackendError::transient("connection reset")),
            text("finally"),
        ]);
        let caller = ResilientCaller::new(backend, policy(3));

        assert_eq!(caller.call(&request()), CallOutcome::Success("finally".to_string()));
        assert_eq!(caller.backend().calls(), 3);
    }

    #[test]
    fn test_empty_reply_is_not_retried() {
        let backend = ScriptedBackend::new(vec![Ok(Reply::Empty), text("unused")]);
        let caller = ResilientCaller::new(backend, policy(3));

        assert_eq!(caller.call(&request()), CallOutcome::Empty);
        assert_eq!(caller.backend().calls(), 1);
    }

    #[test]
    fn test_blank_text_counts_as_empty() {
        let caller = ResilientCaller::new(ScriptedBackend::new(vec![text("  \n ")]), policy(1));
        assert_eq!(caller.call(&request()), CallOutcome::Empty);
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        let backend = ScriptedBackend::always(Err(BackendError::transient("timeout")));
        let caller = ResilientCaller::new(backend, policy(0));

        assert!(matches!(caller.call(&request()), CallOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(caller.backend().calls(), 1);
    }

    #[test]
    fn test_no_sleep_after_last_attempt() {
        let backend = ScriptedBackend::always(Err(BackendError::transient("504")));
        let caller = ResilientCaller::new(
            backend,
            RetryPolicy {
                attempts: 2,
                delay: Duration::from_millis(200),
            },
        );

        let start = Instant::now();
        caller.call(&request());
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[test]
    fn test_section_bodies() {
        assert_eq!(CallOutcome::Success("text".into()).section_body(), "text");
        assert_eq!(CallOutcome::Empty.section_body(), NO_OUTPUT_PLACEHOLDER);
        assert!(
            CallOutcome::Rejected { reason: "401".into() }
                .section_body()
                .starts_with(REJECTED_PLACEHOLDER)
        );
        assert!(
            CallOutcome::Exhausted {
                attempts: 3,
                last_error: "504".into()
            }
            .section_body()
            .starts_with("[Error]")
        );
    }
}
