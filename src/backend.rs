//! Text-generation backends and the request/response types they share.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Chat message role used for every request.
const USER_ROLE: &str = "user";

/// A single chat-completion message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: String,
    /// Message body
    pub content: String,
}

/// Chat-completion request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,

    /// Conversation, a single user message in practice
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Creates a request carrying one user message.
    #[must_use]
    pub fn user(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message {
                role: USER_ROLE.to_string(),
                content: content.into(),
            }],
            temperature: None,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Returns the message contents joined by blank lines.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// What a backend produced for one successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Generated text
    Text(String),
    /// The backend answered but produced nothing usable
    Empty,
}

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout-class failure; retry after the configured delay
    Transient,
    /// Anything else; abandon the chunk
    Hard,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Hard => f.write_str("hard"),
        }
    }
}

/// A failed backend exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} backend failure: {message}")]
pub struct BackendError {
    kind: FailureKind,
    message: String,
}

impl BackendError {
    /// Creates a retry-eligible failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a failure that abandons the chunk.
    #[must_use]
    pub fn hard(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Hard,
            message: message.into(),
        }
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns true if the failure is retry-eligible.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, FailureKind::Transient)
    }

    /// Returns the failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A text-generation service or process invoked once per attempt.
///
/// Implementations classify their own failure signals; retrying is the
/// caller's job.
pub trait Backend: Send + Sync {
    /// Short name used in logs and the run summary.
    fn name(&self) -> &str;

    /// Performs one exchange with the backend.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] classified as transient or hard.
    fn send(&self, request: &ChatRequest) -> Result<Reply, BackendError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&self, request: &ChatRequest) -> Result<Reply, BackendError> {
        (**self).send(request)
    }
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&self, request: &ChatRequest) -> Result<Reply, BackendError> {
        (**self).send(request)
    }
}
