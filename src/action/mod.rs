//! Actions: named units the engine can build and run
//!
//! Every variant renders its templates in `build` and performs one backend
//! call in `invoke`. The shared contract in [`Action::run`] layers the
//! expectation handling on top: eventually-polling re-invokes the backend,
//! and a declared return code turns a rejected result into an error.
//! Non-zero return codes are otherwise plain data.

pub mod chaos;
pub mod database;
pub mod mock;
pub mod process;
pub mod registry;
pub mod remote;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::config::BackendConfig;
use crate::common::{Cancellation, Error, Result};
use crate::context::Context;
use crate::expect::{check_return_code, poll_until, Expectation};
use crate::template::render;

pub use chaos::{ChaosAction, FaultKind};
pub use database::{DatabaseAction, DbTarget};
pub use mock::{MockAction, MockReply};
pub use process::LocalProcessAction;
pub use registry::ActionRegistry;
pub use remote::RemoteSessionAction;

/// Normalized result of one action invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    #[serde(skip)]
    pub duration: Duration,
}

const EXCERPT_CHARS: usize = 200;

fn excerpt(text: &str) -> String {
    let text = text.trim_end();
    if text.chars().count() > EXCERPT_CHARS {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rc={} stdout=\"{}\" stderr=\"{}\"",
            self.return_code,
            excerpt(&self.stdout),
            excerpt(&self.stderr)
        )
    }
}

/// A fully rendered backend call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invocation {
    /// Local shell command
    Process {
        command: String,
        workdir: Option<String>,
        env: Vec<(String, String)>,
    },
    /// Database statement
    Query { statement: String, target: DbTarget },
    /// Command executed through a remote session
    Remote {
        destination: String,
        port: Option<u16>,
        identity_file: Option<String>,
        command: String,
    },
    /// Fault injection, with its hold and (for self-healing faults) recovery
    Fault {
        inject: String,
        hold: Option<Duration>,
        recover: Option<String>,
    },
    /// Test double; no backend call
    Mock { label: String },
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Process { command, .. } => write!(f, "{}", command),
            Invocation::Query { statement, target } => write!(f, "{} <<< {}", target, statement),
            Invocation::Remote {
                destination,
                port,
                command,
                ..
            } => match port {
                Some(port) => write!(f, "ssh -p {} {} '{}'", port, destination, command),
                None => write!(f, "ssh {} '{}'", destination, command),
            },
            Invocation::Fault { inject, .. } => write!(f, "{}", inject),
            Invocation::Mock { label } => write!(f, "mock: {}", label),
        }
    }
}

/// Per-run services handed to backends
#[derive(Debug, Clone, Copy)]
pub struct Runtime<'a> {
    pub backends: &'a BackendConfig,
    pub cancel: &'a Cancellation,
    /// Identifies one instance execution; backends keep per-instance state
    /// under it
    pub scope: u64,
}

/// One action variant's build/invoke pair
#[async_trait]
pub trait Backend: Send + Sync {
    /// Render the variant's templates into an invocation
    fn build(&self, ctx: &Context) -> Result<Invocation>;

    /// Perform exactly one backend call
    async fn invoke(&self, invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome>;
}

/// A named action, tagged by `type` in definition files
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    #[serde(rename = "shell")]
    Local(LocalProcessAction),
    #[serde(rename = "sql")]
    Database(DatabaseAction),
    #[serde(rename = "ssh")]
    Remote(RemoteSessionAction),
    Chaos(ChaosAction),
    Mock(MockAction),
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::Local(a) => &a.name,
            Action::Database(a) => &a.name,
            Action::Remote(a) => &a.name,
            Action::Chaos(a) => &a.name,
            Action::Mock(a) => &a.name,
        }
    }

    /// Type tag as written in definition files
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Local(_) => "shell",
            Action::Database(_) => "sql",
            Action::Remote(_) => "ssh",
            Action::Chaos(_) => "chaos",
            Action::Mock(_) => "mock",
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Action::Local(a) => a.description.as_deref(),
            Action::Database(a) => a.description.as_deref(),
            Action::Remote(a) => a.description.as_deref(),
            Action::Chaos(a) => a.description.as_deref(),
            Action::Mock(a) => a.description.as_deref(),
        }
    }

    pub fn is_chaos(&self) -> bool {
        matches!(self, Action::Chaos(_))
    }

    /// Whether the action declares a rollback operation
    pub fn supports_rollback(&self) -> bool {
        match self {
            Action::Local(a) => a.undo_cmd.is_some(),
            Action::Chaos(a) => a.recover.is_some(),
            _ => false,
        }
    }

    fn backend(&self) -> &dyn Backend {
        match self {
            Action::Local(a) => a,
            Action::Database(a) => a,
            Action::Remote(a) => a,
            Action::Chaos(a) => a,
            Action::Mock(a) => a,
        }
    }

    /// Render this action's invocation against `ctx`
    pub fn build(&self, ctx: &Context) -> Result<Invocation> {
        self.backend().build(ctx)
    }

    /// Execute `invocation`, honouring the expectation's eventually mode and
    /// return-code constraint
    ///
    /// Containment of an immediate expectation is left to
    /// [`crate::expect::verify`]; only the eventually mode needs to re-run
    /// the backend and so is owned here.
    pub async fn run(
        &self,
        invocation: &Invocation,
        ctx: &Context,
        expectation: Option<&Expectation>,
        rt: &Runtime<'_>,
    ) -> Result<Outcome> {
        let backend = self.backend();
        let label = invocation.to_string();
        let return_codes = expectation.and_then(|e| e.return_code.as_ref());

        let outcome = match expectation.and_then(Expectation::eventually_mode) {
            Some(ev) => {
                let needle = render(&ev.contains, ctx)?;
                poll_until(
                    &needle,
                    ev.timeout,
                    ev.poll_interval,
                    return_codes,
                    &label,
                    rt.cancel,
                    || backend.invoke(invocation, rt),
                )
                .await?
            }
            // Chaos reacts to cancellation itself so it can recover first
            None if self.is_chaos() => backend.invoke(invocation, rt).await?,
            None => rt.cancel.race(backend.invoke(invocation, rt)).await??,
        };

        if let Some(codes) = return_codes {
            check_return_code(&outcome, codes, &label)?;
        }

        Ok(outcome)
    }

    /// Render the rollback invocation, if this action declares one
    pub fn build_rollback(&self, ctx: &Context) -> Result<Option<Invocation>> {
        let template = match self {
            Action::Local(a) => a.undo_cmd.as_deref(),
            Action::Chaos(a) => a.recover.as_deref(),
            _ => None,
        };
        template
            .map(|t| {
                Ok(Invocation::Process {
                    command: render(t, ctx)?,
                    workdir: None,
                    env: Vec::new(),
                })
            })
            .transpose()
    }

    /// Run the rollback operation (chaos `recover`, shell `undo_cmd`)
    ///
    /// A rollback that exits non-zero is an error: the fault is still in
    /// place.
    pub async fn rollback(&self, ctx: &Context, rt: &Runtime<'_>) -> Result<Option<Outcome>> {
        let Some(invocation) = self.build_rollback(ctx)? else {
            return Ok(None);
        };
        let outcome = rt.cancel.race(process::execute(&invocation, rt)).await??;
        if outcome.return_code != 0 {
            return Err(Error::backend(
                &invocation,
                format!("rollback exited with {}", outcome),
            ));
        }
        Ok(Some(outcome))
    }
}
