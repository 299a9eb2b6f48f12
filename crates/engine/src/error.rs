//! Error types for the fanfetch engine.
//!
//! Errors are split by the layer that raises them. Per-unit failures
//! ([`ActionError`]) are wrapped into [`TaskError`] before they reach a run's
//! error sink; build-time failures ([`ChainError`], [`FinalizerError`]) are
//! returned directly by the builders.

use fanfetch_types::UnknownMethodError;
use fanfetch_util::{HttpExecError, ParamParseError};
use thiserror::Error;

use crate::template::TemplateError;

/// Failures of a single action invocation or construction.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action needs a tag to identify itself")]
    MissingTag,

    #[error(transparent)]
    UnknownMethod(#[from] UnknownMethodError),

    #[error("invalid {field} template: {source}")]
    Template {
        field: String,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("response template #{index} '{pattern}' is not a valid pattern: {source}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("URL {url}: cannot find matched patterns in the response")]
    NoMatch { url: String },

    #[error("request URL {url}: expected status code in {expected:?}, but received {actual}")]
    UnexpectedStatus { url: String, expected: Vec<u16>, actual: u16 },

    #[error("{}", join_messages(.0))]
    Joined(Vec<ActionError>),
}

impl ActionError {
    /// Create a template error naming the field that failed.
    pub fn template(field: impl Into<String>, source: TemplateError) -> Self {
        Self::Template {
            field: field.into(),
            source,
        }
    }

    /// Create a status mismatch error.
    pub fn status_mismatch(url: impl Into<String>, expected: &[u16], actual: u16) -> Self {
        Self::UnexpectedStatus {
            url: url.into(),
            expected: expected.to_vec(),
            actual,
        }
    }

    /// Create a must-match failure.
    pub fn no_match(url: impl Into<String>) -> Self {
        Self::NoMatch { url: url.into() }
    }

    /// Collapse a list of detected failures into one error, if any.
    pub fn join(mut errors: Vec<ActionError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Joined(errors)),
        }
    }
}

fn join_messages(errors: &[ActionError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Failures raised while reading a response through a reader chain.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("transport error: {0}")]
    Transport(#[from] HttpExecError),

    #[error("no reader accepts requests tagged '{tag}'")]
    Unrouted { tag: String },

    #[error("{plugin}: {message}")]
    Plugin { plugin: String, message: String },

    #[error("{plugin}: I/O error: {source}")]
    Io {
        plugin: String,
        #[source]
        source: std::io::Error,
    },
}

impl ReaderError {
    /// Create a plugin-specific error.
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Failures raised while building a response-reader chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Unknown plugin: {name}")]
    UnknownPlugin { name: String },

    #[error("plugin {plugin}: tag {pattern} is not a regular expression: {source}")]
    InvalidTagPattern {
        plugin: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("plugin {plugin}: invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        plugin: String,
        parameter: String,
        reason: String,
    },

    #[error("plugin {plugin}: {reason}")]
    Placement { plugin: String, reason: String },

    #[error("plugin {plugin}: {source}")]
    Transport {
        plugin: String,
        #[source]
        source: HttpExecError,
    },

    #[error("plugin {plugin}: cannot open '{path}': {source}")]
    Io {
        plugin: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChainError {
    pub fn invalid_parameter(plugin: impl Into<String>, parameter: impl Into<String>, source: ParamParseError) -> Self {
        Self::InvalidParameter {
            plugin: plugin.into(),
            parameter: parameter.into(),
            reason: source.to_string(),
        }
    }

    pub fn placement(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Placement {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }
}

/// Failures raised while building or running a finalizer chain.
#[derive(Debug, Error)]
pub enum FinalizerError {
    #[error("Unknown finalizer: {name}")]
    UnknownFinalizer { name: String },

    #[error("{finalizer}: {reason}")]
    InvalidParameter { finalizer: String, reason: String },

    #[error("cannot merge key {key}, which has two values: {first} and {second}")]
    Conflict { key: String, first: String, second: String },

    #[error("{finalizer}: {actual} environments, not {expected}")]
    EnvironmentCount {
        finalizer: String,
        expected: usize,
        actual: usize,
    },

    #[error("{finalizer}: cannot open '{path}': {source}")]
    Open {
        finalizer: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to marshal the task spec: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unable to write the task spec: {0}")]
    Write(#[source] std::io::Error),
}

impl FinalizerError {
    pub fn invalid_parameter(finalizer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            finalizer: finalizer.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the worker pool itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool has been shut down")]
    ShutDown,
}

/// Everything a task run reports on its error sink.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Action {tag} is invalid: {source}")]
    InvalidAction {
        tag: String,
        #[source]
        source: ActionError,
    },

    #[error("Action {tag} failed: {source}")]
    Action {
        tag: String,
        #[source]
        source: ActionError,
    },

    #[error("cannot build plugin chain: {0}")]
    Chain(#[from] ChainError),

    #[error("finalizer failed: {0}")]
    Finalizer(#[from] FinalizerError),

    #[error("cannot submit action {tag}: {source}")]
    Pool {
        tag: String,
        #[source]
        source: PoolError,
    },

    #[error("closing plugin chain failed: {0}")]
    Close(#[source] ReaderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_returns_single_errors_unwrapped() {
        assert!(ActionError::join(Vec::new()).is_none());
        let single = ActionError::join(vec![ActionError::no_match("http://x")]).expect("one error");
        assert!(matches!(single, ActionError::NoMatch { .. }));
    }

    #[test]
    fn joined_errors_report_every_message() {
        let joined = ActionError::join(vec![
            ActionError::status_mismatch("http://x", &[200], 404),
            ActionError::no_match("http://x"),
        ])
        .expect("joined");
        let message = joined.to_string();
        assert!(message.contains("received 404"));
        assert!(message.contains("cannot find matched patterns"));
    }
}
