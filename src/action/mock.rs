//! Mock actions
//!
//! Return canned outcomes without touching any backend. A `script` is
//! consumed one entry per call with the last entry repeating, which lets a
//! scenario model a flaky step or a state that settles after a few polls.
//! Each instance execution walks the script from its first entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Backend, Invocation, Outcome, Runtime};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::template::render;

/// One canned reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockReply {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub return_code: i32,
    /// Fail the call with a backend error carrying this message
    pub fail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MockAction {
    pub name: String,
    pub description: Option<String>,
    /// Optional template rendered into the invocation label
    pub cmd: Option<String>,
    /// Reply used when `script` is empty
    #[serde(flatten)]
    pub reply: MockReply,
    #[serde(default)]
    pub script: Vec<MockReply>,
    #[serde(skip)]
    calls: AtomicUsize,
    /// Script position per execution scope
    #[serde(skip)]
    cursors: Mutex<HashMap<u64, usize>>,
}

impl MockAction {
    pub fn new(name: impl Into<String>, reply: MockReply) -> Self {
        Self {
            name: name.into(),
            reply,
            ..Default::default()
        }
    }

    pub fn scripted(name: impl Into<String>, script: Vec<MockReply>) -> Self {
        Self {
            name: name.into(),
            script,
            ..Default::default()
        }
    }

    /// Number of times the backend has been invoked, across all scopes
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, scope: u64) -> &MockReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.is_empty() {
            return &self.reply;
        }
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let cursor = cursors.entry(scope).or_insert(0);
        let n = *cursor;
        *cursor += 1;
        &self.script[n.min(self.script.len() - 1)]
    }
}

#[async_trait]
impl Backend for MockAction {
    fn build(&self, ctx: &Context) -> Result<Invocation> {
        let label = match &self.cmd {
            Some(cmd) => render(cmd, ctx)?,
            None => self.name.clone(),
        };
        Ok(Invocation::Mock { label })
    }

    async fn invoke(&self, invocation: &Invocation, rt: &Runtime<'_>) -> Result<Outcome> {
        let reply = self.next_reply(rt.scope);
        if let Some(message) = &reply.fail {
            return Err(Error::backend(invocation, message));
        }
        Ok(Outcome {
            stdout: reply.stdout.clone(),
            stderr: reply.stderr.clone(),
            return_code: reply.return_code,
            duration: Default::default(),
        })
    }
}
