//! Per-instance execution context
//!
//! Holds the user variables of one scenario instance (base context merged
//! with its matrix combination) plus the runtime fields the engine writes
//! after every action. Runtime fields are typed; user keys are open.

use std::borrow::Cow;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::action::Outcome;
use crate::common::{Error, Result};
use crate::template::{value_text, Variables};

/// Variable map in declaration order
pub type Vars = IndexMap<String, Value>;

pub const LAST_STDOUT: &str = "last_stdout";
pub const LAST_STDERR: &str = "last_stderr";
pub const LAST_RETURN_CODE: &str = "last_return_code";
pub const LAST_ERROR: &str = "last_error";
pub const LAST_DURATION_MS: &str = "last_duration_ms";

/// Names owned by the engine; scenarios may not declare them
pub const RESERVED_KEYS: &[&str] = &[
    LAST_STDOUT,
    LAST_STDERR,
    LAST_RETURN_CODE,
    LAST_ERROR,
    LAST_DURATION_MS,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: Vars,
    pub last_stdout: Option<String>,
    pub last_stderr: Option<String>,
    pub last_return_code: Option<i32>,
    pub last_error: Option<String>,
    pub last_duration: Option<Duration>,
}

impl Context {
    pub fn new(vars: Vars) -> Self {
        Self {
            vars,
            ..Default::default()
        }
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Set a user variable. Runtime field names are rejected.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if is_reserved(&key) {
            return Err(Error::Config(format!(
                "'{}' is a reserved runtime field and cannot be set directly",
                key
            )));
        }
        self.vars.insert(key, value);
        Ok(())
    }

    /// Record the outcome of the latest action
    pub fn record_outcome(&mut self, outcome: &Outcome) {
        self.last_stdout = Some(outcome.stdout.clone());
        self.last_stderr = Some(outcome.stderr.clone());
        self.last_return_code = Some(outcome.return_code);
        self.last_duration = Some(outcome.duration);
    }

    /// Record a failure so later hooks can reference `last_error`
    pub fn record_error(&mut self, error: &Error) {
        self.last_error = Some(error.to_string());
        if let Some(outcome) = error.outcome() {
            self.record_outcome(outcome);
        }
    }

    /// All variables including runtime fields, for reports
    pub fn snapshot(&self) -> Vars {
        let mut out = self.vars.clone();
        if let Some(s) = &self.last_stdout {
            out.insert(LAST_STDOUT.to_string(), Value::from(s.as_str()));
        }
        if let Some(s) = &self.last_stderr {
            out.insert(LAST_STDERR.to_string(), Value::from(s.as_str()));
        }
        if let Some(rc) = self.last_return_code {
            out.insert(LAST_RETURN_CODE.to_string(), Value::from(rc));
        }
        if let Some(e) = &self.last_error {
            out.insert(LAST_ERROR.to_string(), Value::from(e.as_str()));
        }
        if let Some(d) = self.last_duration {
            out.insert(LAST_DURATION_MS.to_string(), Value::from(d.as_millis() as u64));
        }
        out
    }
}

impl Variables for Context {
    fn lookup(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            LAST_STDOUT => self.last_stdout.as_deref().map(Cow::Borrowed),
            LAST_STDERR => self.last_stderr.as_deref().map(Cow::Borrowed),
            LAST_RETURN_CODE => self.last_return_code.map(|rc| Cow::Owned(rc.to_string())),
            LAST_ERROR => self.last_error.as_deref().map(Cow::Borrowed),
            LAST_DURATION_MS => self
                .last_duration
                .map(|d| Cow::Owned(d.as_millis().to_string())),
            _ => self.vars.get(key).and_then(value_text),
        }
    }
}
