//! Local process actions
//!
//! Commands run through the configured shell (`sh -c` by default). The
//! child is killed if the surrounding future is dropped, so step timeouts
//! and cancellation never leave stray processes behind.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::process::Command as TokioCommand;

use super::{Backend, Invocation, Outcome, Runtime};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::template::render;

/// Shell command executed on the local host
#[derive(Debug, Deserialize)]
pub struct LocalProcessAction {
    pub name: String,
    pub description: Option<String>,
    /// Command template
    pub cmd: String,
    /// Rollback command template, run by `rollback` steps
    pub undo_cmd: Option<String>,
    /// Working directory template
    pub workdir: Option<String>,
    /// Extra environment, values are templates
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl LocalProcessAction {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            cmd: cmd.into(),
            undo_cmd: None,
            workdir: None,
            env: IndexMap::new(),
        }
    }
}

#[async_trait]
impl Backend for LocalProcessAction {
    fn build(&self, ctx: &Context) -> Result<Invocation> {
        let env = self
            .env
            .iter()
            .map(|(k, v)| Ok((k.clone(), render(v, ctx)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Invocation::Process {
            command: render(&self.cmd, ctx)?,
            workdir: self.workdir.as_deref().map(|w| render(w, ctx)).transpose()?,
            env,
        })
    }

    async fn invoke(&self, invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome> {
        execute(invocation, rt).await
    }
}

/// Run a `Process` invocation through the configured shell
pub async fn execute(invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome> {
    let Invocation::Process {
        command,
        workdir,
        env,
    } = invocation
    else {
        return Err(Error::Internal(format!(
            "local process backend cannot run `{}`",
            invocation
        )));
    };

    let mut cmd = TokioCommand::new(resolve_program(&rt.backends.shell, invocation)?);
    cmd.arg("-c").arg(command);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    capture(cmd, invocation).await
}

/// Resolve a client program, searching PATH for bare names
pub fn resolve_program(program: &str, invocation: &Invocation) -> Result<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return Ok(PathBuf::from(program));
    }
    which::which(program).map_err(|e| {
        Error::backend(
            invocation,
            format!("client program '{}' not found in PATH: {}", program, e),
        )
    })
}

/// Spawn `cmd`, wait for it and normalize its output
pub async fn capture(mut cmd: TokioCommand, invocation: &Invocation) -> Result<Outcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(invocation = %invocation, "spawning");
    let start = Instant::now();
    let output = cmd
        .output()
        .await
        .map_err(|e| Error::backend(invocation, format!("failed to execute: {}", e)))?;

    let outcome = Outcome {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        return_code: exit_code(&output.status),
        duration: start.elapsed(),
    };
    tracing::debug!(
        invocation = %invocation,
        return_code = outcome.return_code,
        duration_ms = outcome.duration.as_millis() as u64,
        "finished"
    );
    Ok(outcome)
}

/// Exit code, mapping signal deaths to the shell convention 128 + signal
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
