//! Error types for testbed
//!
//! Every failure that reaches a user carries the rendered invocation, the
//! outcome when one exists, and the expectation that was not met, so the
//! failing command can be reproduced by hand.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::action::Outcome;
use crate::expect::ReturnCodes;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for testbed
#[derive(Error, Debug)]
pub enum Error {
    // === Template Errors ===
    #[error("Unresolved template variable '{key}' in \"{template}\"")]
    Template { key: String, template: String },

    // === Backend Errors ===
    #[error("Backend failure running `{invocation}`: {message}")]
    Backend { invocation: String, message: String },

    // === Expectation Errors ===
    #[error("`{invocation}` returned {outcome}; expected return code {expected}")]
    ReturnCodeMismatch {
        invocation: String,
        expected: ReturnCodes,
        outcome: Box<Outcome>,
    },

    #[error("`{invocation}`: expected output containing \"{expected}\", got {outcome}")]
    AssertionFailed {
        invocation: String,
        expected: String,
        outcome: Box<Outcome>,
    },

    #[error("`{invocation}`: output did not contain \"{expected}\" within {timeout:?}; last observed {last}")]
    EventuallyTimeout {
        invocation: String,
        expected: String,
        timeout: Duration,
        last: Box<Outcome>,
    },

    #[error("Step '{step}' timed out after {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },

    #[error("Run cancelled")]
    Cancelled,

    // === Hook Errors ===
    #[error("{phase} hook '{hook}' failed: {source}")]
    Hook {
        phase: String,
        hook: String,
        #[source]
        source: Box<Error>,
    },

    // === Observer Errors ===
    #[error("Observer error: {0}")]
    Observer(String),

    // === Load-time Errors ===
    #[error("Registry error: {0}")]
    Registry(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("Invalid definition file '{path}': {message}")]
    Yaml { path: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unresolved template variable error
    pub fn template(key: &str, template: &str) -> Self {
        Self::Template {
            key: key.to_string(),
            template: template.to_string(),
        }
    }

    /// Create a backend failure error
    pub fn backend(invocation: impl ToString, message: impl ToString) -> Self {
        Self::Backend {
            invocation: invocation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a definition parse error for `path`
    pub fn yaml(path: &std::path::Path, error: impl ToString) -> Self {
        Self::Yaml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }

    /// Wrap a hook failure with its phase and hook name
    pub fn hook(phase: &str, hook: &str, source: Error) -> Self {
        Self::Hook {
            phase: phase.to_string(),
            hook: hook.to_string(),
            source: Box::new(source),
        }
    }

    /// The outcome attached to this error, if the failure happened after
    /// the backend produced one
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Error::ReturnCodeMismatch { outcome, .. } | Error::AssertionFailed { outcome, .. } => {
                Some(outcome)
            }
            Error::EventuallyTimeout { last, .. } => Some(last),
            Error::Hook { source, .. } => source.outcome(),
            _ => None,
        }
    }

    /// Stable machine-readable code for reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::Template { .. } => "TEMPLATE_ERROR",
            Error::Backend { .. } => "BACKEND_ERROR",
            Error::ReturnCodeMismatch { .. } => "RETURN_CODE_MISMATCH",
            Error::AssertionFailed { .. } => "ASSERTION_FAILED",
            Error::EventuallyTimeout { .. } => "EVENTUALLY_TIMEOUT",
            Error::StepTimeout { .. } => "STEP_TIMEOUT",
            Error::Cancelled => "CANCELLED",
            Error::Hook { .. } => "HOOK_FAILED",
            Error::Observer(_) => "OBSERVER_ERROR",
            Error::Registry(_) => "REGISTRY_ERROR",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::Io(_) | Error::FileRead { .. } => "IO_ERROR",
            Error::Yaml { .. } => "DEFINITION_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Serializable error for reports
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorReport {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_error_names_key_and_template() {
        let err = Error::template("missing", "echo {{missing}}");
        let msg = err.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("echo {{missing}}"));
        assert_eq!(err.code(), "TEMPLATE_ERROR");
    }

    #[test]
    fn test_hook_error_exposes_inner_outcome() {
        let outcome = Outcome {
            stdout: "nope".to_string(),
            return_code: 3,
            ..Default::default()
        };
        let inner = Error::AssertionFailed {
            invocation: "cat status".to_string(),
            expected: "ok".to_string(),
            outcome: Box::new(outcome.clone()),
        };
        let err = Error::hook("before", "prepare", inner);
        assert_eq!(err.outcome(), Some(&outcome));
        assert!(err.to_string().contains("before hook 'prepare' failed"));
    }

    #[test]
    fn test_error_report_carries_code() {
        let report = ErrorReport::from(&Error::Cancelled);
        assert_eq!(report.code, "CANCELLED");
        assert_eq!(report.message, "Run cancelled");
    }
}
