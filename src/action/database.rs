//! Database statement actions
//!
//! Each invocation opens its own client session with `psql`, runs one
//! statement and closes the session before returning, on success and on
//! failure alike. Rows come back unaligned and tuples-only, one per line,
//! so containment checks see plain row text.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;

use super::process::{capture, resolve_program};
use super::{Backend, Invocation, Outcome, Runtime};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::template::render;

/// Supported database engines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbKind {
    #[default]
    Postgres,
}

/// SQL statement executed against a database
#[derive(Debug, Deserialize)]
pub struct DatabaseAction {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub db: DbKind,
    /// Statement template
    pub sql: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Password template; passed to the client through the environment
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> String {
    "5432".to_string()
}
fn default_user() -> String {
    "postgres".to_string()
}
fn default_database() -> String {
    "postgres".to_string()
}

/// Rendered connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    #[serde(skip)]
    pub password: Option<String>,
}

impl fmt::Display for DbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

#[async_trait]
impl Backend for DatabaseAction {
    fn build(&self, ctx: &Context) -> Result<Invocation> {
        let port_text = render(&self.port, ctx)?;
        let port = port_text.trim().parse::<u16>().map_err(|_| {
            Error::Config(format!(
                "action '{}': port '{}' is not a valid port number",
                self.name, port_text
            ))
        })?;

        Ok(Invocation::Query {
            statement: render(&self.sql, ctx)?,
            target: DbTarget {
                host: render(&self.host, ctx)?,
                port,
                user: render(&self.user, ctx)?,
                database: render(&self.database, ctx)?,
                password: self.password.as_deref().map(|p| render(p, ctx)).transpose()?,
            },
        })
    }

    async fn invoke(&self, invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome> {
        let Invocation::Query { statement, target } = invocation else {
            return Err(Error::Internal(format!(
                "database backend cannot run `{}`",
                invocation
            )));
        };

        let mut cmd = TokioCommand::new(resolve_program(&rt.backends.psql, invocation)?);
        cmd.args(psql_args(statement, target));
        if let Some(password) = &target.password {
            cmd.env("PGPASSWORD", password);
        }

        capture(cmd, invocation).await
    }
}

/// Arguments for one non-interactive psql session
fn psql_args(statement: &str, target: &DbTarget) -> Vec<String> {
    vec![
        "-X".to_string(),
        "--no-password".to_string(),
        "-v".to_string(),
        "ON_ERROR_STOP=1".to_string(),
        "-A".to_string(),
        "-t".to_string(),
        "-h".to_string(),
        target.host.clone(),
        "-p".to_string(),
        target.port.to_string(),
        "-U".to_string(),
        target.user.clone(),
        "-d".to_string(),
        target.database.clone(),
        "-c".to_string(),
        statement.to_string(),
    ]
}
