//! Remote session actions
//!
//! The rendered command is wrapped in an `ssh` envelope. Each invocation is
//! its own session; nothing is kept open between calls.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command as TokioCommand;

use super::process::{capture, resolve_program};
use super::{Backend, Invocation, Outcome, Runtime};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::template::render;

/// Command executed on a remote host over ssh
#[derive(Debug, Deserialize)]
pub struct RemoteSessionAction {
    pub name: String,
    pub description: Option<String>,
    /// Remote command template
    pub cmd: String,
    /// Host template
    pub host: String,
    /// User template
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
}

#[async_trait]
impl Backend for RemoteSessionAction {
    fn build(&self, ctx: &Context) -> Result<Invocation> {
        let host = render(&self.host, ctx)?;
        let destination = match &self.user {
            Some(user) => format!("{}@{}", render(user, ctx)?, host),
            None => host,
        };

        Ok(Invocation::Remote {
            destination,
            port: self.port,
            identity_file: self
                .identity_file
                .as_deref()
                .map(|f| render(f, ctx))
                .transpose()?,
            command: render(&self.cmd, ctx)?,
        })
    }

    async fn invoke(&self, invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome> {
        let mut cmd = TokioCommand::new(resolve_program(&rt.backends.ssh, invocation)?);
        cmd.args(ssh_args(invocation, &rt.backends.ssh_options)?);
        capture(cmd, invocation).await
    }
}

/// Arguments for the ssh envelope around a remote invocation
fn ssh_args(invocation: &Invocation, options: &[String]) -> Result<Vec<String>> {
    let Invocation::Remote {
        destination,
        port,
        identity_file,
        command,
    } = invocation
    else {
        return Err(Error::Internal(format!(
            "remote session backend cannot run `{}`",
            invocation
        )));
    };

    let mut args: Vec<String> = options.to_vec();
    if let Some(port) = port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if let Some(identity) = identity_file {
        args.push("-i".to_string());
        args.push(identity.clone());
    }
    args.push(destination.clone());
    args.push("--".to_string());
    args.push(command.clone());
    Ok(args)
}
