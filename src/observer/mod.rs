//! Lifecycle observers
//!
//! Observers are told about every boundary the engine crosses. Each method
//! defaults to a no-op, so a sink implements only what it records. The
//! fan-out isolates listeners from the engine and from each other: an
//! error or panic inside one observer is logged and dropped.

pub mod console;
pub mod file;
pub mod logging;
pub mod report;
pub mod summary;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::action::{Invocation, Outcome};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::scenario::{HookPhase, Instance, Step};

pub use console::ConsoleObserver;
pub use file::FileLogObserver;
pub use logging::LoggingObserver;
pub use report::JsonReportObserver;
pub use summary::SummaryObserver;

/// Listener for engine lifecycle events
#[allow(unused_variables)]
pub trait Observer: Send + Sync {
    /// Name used when reporting this observer's own failures
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_testcase_start(&self, instance: &Instance, ctx: &Context) -> Result<()> {
        Ok(())
    }

    fn on_testcase_end(&self, instance: &Instance, ctx: &Context, success: bool) -> Result<()> {
        Ok(())
    }

    fn on_testcase_error(&self, instance: &Instance, ctx: &Context, error: &Error) -> Result<()> {
        Ok(())
    }

    /// `attempt` counts from 1
    fn on_step_start(
        &self,
        instance: &Instance,
        step: &Step,
        attempt: u32,
        ctx: &Context,
    ) -> Result<()> {
        Ok(())
    }

    /// A rendered invocation is about to run, for a step or a hook named
    /// `source`
    fn on_invocation(
        &self,
        instance: &Instance,
        source: &str,
        invocation: &Invocation,
    ) -> Result<()> {
        Ok(())
    }

    fn on_step_end(
        &self,
        instance: &Instance,
        step: &Step,
        ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        Ok(())
    }

    /// One failed attempt; `outcome` is present when the backend produced one
    fn on_step_error(
        &self,
        instance: &Instance,
        step: &Step,
        ctx: &Context,
        error: &Error,
        outcome: Option<&Outcome>,
    ) -> Result<()> {
        Ok(())
    }

    fn on_hook_start(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        ctx: &Context,
    ) -> Result<()> {
        Ok(())
    }

    fn on_hook_end(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        Ok(())
    }

    fn on_hook_error(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        ctx: &Context,
        error: &Error,
    ) -> Result<()> {
        Ok(())
    }
}

/// Fan-out over a set of observers
#[derive(Clone, Default)]
pub struct Observers {
    list: Vec<Arc<dyn Observer>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.list.iter().map(|o| o.name()))
            .finish()
    }
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.list.push(observer);
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Deliver one event to every observer, in registration order
    ///
    /// Never fails: observer errors and panics are logged and swallowed.
    pub fn notify<F>(&self, event: &str, f: F)
    where
        F: Fn(&dyn Observer) -> Result<()>,
    {
        for observer in &self.list {
            match catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let e = match e {
                        e @ Error::Observer(_) => e,
                        other => Error::Observer(other.to_string()),
                    };
                    tracing::warn!(observer = observer.name(), event, error = %e, "observer failed");
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!(observer = observer.name(), event, panic = %message, "observer panicked");
                }
            }
        }
    }
}
