//! # Errors
//!
//! This module defines the error taxonomy shared by model definition and the runtime.
//!
//! - [`BuildError`]: raised while a mixin chain is applied. The type is never produced.
//! - [`RequestError`]: a transport or decoding failure. It is carried by the action's
//!   completion future and stored as the instance's last error; it is never returned
//!   synchronously from the call that started the action.
//! - [`ProgrammerError`]: misuse detected at the call site (calling super with no
//!   predecessor, unknown relation, anonymous type asked for a url, ...).
//!
//! [`ModelError`] is the union used by mixins, hooks and method bodies.

use crate::framework::chain::ApiSlot;
use serde_json::Value;

pub type ModelResult<T> = Result<T, ModelError>;

/// Any error raised while defining or using models.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Programmer(#[from] ProgrammerError),
    #[error("{0}")]
    Custom(String),
}

impl ModelError {
    /// Creates an application-level error, typically from inside a hook or method body.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Errors raised while assembling a model type.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("mixin #{index} ({name}) failed: {source}")]
    Mixin {
        index: usize,
        name: String,
        #[source]
        source: Box<ModelError>,
    },
    #[error("unknown builder method `{0}`")]
    UnknownExtension(String),
    #[error("invalid value for model property `{key}`: {reason}")]
    InvalidProperty { key: String, reason: String },
    #[error("invalid declaration: {0}")]
    Declaration(String),
}

/// Failures of an asynchronous action.
///
/// Cloneable so every continuation attached to a completion future sees the same error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("request failed with status {status}")]
    Status { status: u16, body: Value },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transport closed")]
    TransportClosed,
    #[error("transport dropped the response channel")]
    TransportDropped,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("action aborted: {0}")]
    Aborted(String),
    #[error("action dropped before it settled")]
    Dropped,
}

impl RequestError {
    /// HTTP status of a rejected response, if the failure came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ModelError> for RequestError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::Request(error) => error,
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// Misuse of the api, reported synchronously.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgrammerError {
    #[error("`{0}` has no super definition to call")]
    MissingSuper(String),
    #[error("no `{name}` defined on the {slot} api")]
    UndefinedMethod { slot: ApiSlot, name: String },
    #[error("`{name}` must be called on a {expected}")]
    WrongTarget { name: String, expected: &'static str },
    #[error("relation `{relation}` references undefined model `{target}`")]
    UndefinedRelationTarget { relation: String, target: String },
    #[error("`{0}` is not a relation of this model")]
    UnknownRelation(String),
    #[error("`{name}` is a {actual} relation, not {expected}")]
    RelationKind {
        name: String,
        actual: String,
        expected: String,
    },
    #[error("{0} has no url")]
    Unroutable(String),
    #[error("actions need a running tokio runtime")]
    NoRuntime,
    #[error("model `{model}` does not support {capability}")]
    MissingCapability { model: String, capability: &'static str },
}
