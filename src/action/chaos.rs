//! Fault injection actions
//!
//! A chaos action has two operations: `inject` (the fault) and `recover`
//! (its rollback), both local shell commands. Executing the action injects
//! the fault and then holds for `duration_secs`. With `auto_recover` the
//! recovery runs right after the hold, which models a bounded fault such as
//! a timed network partition. Otherwise recovery is left to an explicit
//! rollback step or to the engine's failure path. A cancelled hold still
//! runs the self-recovery before reporting the cancellation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::process::execute;
use super::{Backend, Invocation, Outcome, Runtime};
use crate::common::{Cancellation, Error, Result};
use crate::context::Context;
use crate::template::render;

/// Kind of fault, for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Process,
    Network,
    #[default]
    Custom,
}

#[derive(Debug, Deserialize)]
pub struct ChaosAction {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub fault: FaultKind,
    /// Fault command template
    pub inject: String,
    /// Recovery command template
    pub recover: Option<String>,
    /// How long to hold the fault before returning
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub auto_recover: bool,
}

impl ChaosAction {
    pub fn hold(&self) -> Option<Duration> {
        self.duration_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Reject a hold that is not a usable duration
    pub fn validate(&self) -> Result<()> {
        match self.duration_secs {
            Some(secs) if secs < 0.0 || Duration::try_from_secs_f64(secs).is_err() => {
                Err(Error::Config(format!(
                    "chaos action '{}': duration_secs must be a non-negative number of seconds, got {}",
                    self.name, secs
                )))
            }
            _ => Ok(()),
        }
    }

    /// True when executing the action leaves the fault in place
    pub fn leaves_fault(&self) -> bool {
        !(self.auto_recover && self.recover.is_some())
    }
}

fn shell(command: &str) -> Invocation {
    Invocation::Process {
        command: command.to_string(),
        workdir: None,
        env: Vec::new(),
    }
}

#[async_trait]
impl Backend for ChaosAction {
    fn build(&self, ctx: &Context) -> Result<Invocation> {
        let recover = if self.auto_recover {
            self.recover.as_deref().map(|r| render(r, ctx)).transpose()?
        } else {
            None
        };

        Ok(Invocation::Fault {
            inject: render(&self.inject, ctx)?,
            hold: self.hold(),
            recover,
        })
    }

    async fn invoke(&self, invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome> {
        let Invocation::Fault {
            inject,
            hold,
            recover,
        } = invocation
        else {
            return Err(Error::Internal(format!(
                "chaos backend cannot run `{}`",
                invocation
            )));
        };

        tracing::info!(action = %self.name, fault = ?self.fault, command = %inject, "injecting fault");
        let outcome = execute(&shell(inject), rt).await?;
        if outcome.return_code != 0 {
            tracing::warn!(action = %self.name, return_code = outcome.return_code, "fault injection exited non-zero");
            return Ok(outcome);
        }

        if let Some(hold) = hold {
            tracing::info!(action = %self.name, hold_ms = hold.as_millis() as u64, "holding fault");
            if let Err(interrupted) = rt.cancel.sleep(*hold).await {
                if let Some(recover) = recover {
                    // The run's own signal is already set
                    let cleanup = Cancellation::new();
                    let rt = Runtime {
                        cancel: &cleanup,
                        ..*rt
                    };
                    if let Err(e) = self.recover(recover, &rt).await {
                        tracing::error!(action = %self.name, error = %e, "recovery after interrupted hold failed");
                    }
                }
                return Err(interrupted);
            }
        }

        if let Some(recover) = recover {
            self.recover(recover, rt).await?;
        }

        Ok(outcome)
    }
}

impl ChaosAction {
    async fn recover(&self, command: &str, rt: &Runtime<'_>) -> Result<()> {
        tracing::info!(action = %self.name, command = %command, "recovering fault");
        let recovery = execute(&shell(command), rt).await?;
        if recovery.return_code != 0 {
            return Err(Error::backend(
                command,
                format!("fault recovery exited with {}", recovery),
            ));
        }
        Ok(())
    }
}
