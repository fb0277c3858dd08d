//! Structured log sink

use super::Observer;
use crate::action::{Invocation, Outcome};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::scenario::{HookPhase, Instance, Step};

/// Turns lifecycle events into `tracing` events
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_testcase_start(&self, instance: &Instance, _ctx: &Context) -> Result<()> {
        tracing::info!(scenario = %instance.scenario.name, instance = %instance.label, "testcase started");
        Ok(())
    }

    fn on_testcase_end(&self, instance: &Instance, _ctx: &Context, success: bool) -> Result<()> {
        if success {
            tracing::info!(instance = %instance.label, "testcase passed");
        } else {
            tracing::warn!(instance = %instance.label, "testcase failed");
        }
        Ok(())
    }

    fn on_testcase_error(&self, instance: &Instance, _ctx: &Context, error: &Error) -> Result<()> {
        tracing::error!(instance = %instance.label, code = error.code(), error = %error, "testcase error");
        Ok(())
    }

    fn on_step_start(
        &self,
        instance: &Instance,
        step: &Step,
        attempt: u32,
        _ctx: &Context,
    ) -> Result<()> {
        tracing::info!(
            instance = %instance.label,
            step = %step.name,
            action = %step.action,
            attempt,
            max_attempts = step.retry,
            "step started"
        );
        Ok(())
    }

    fn on_invocation(
        &self,
        instance: &Instance,
        source: &str,
        invocation: &Invocation,
    ) -> Result<()> {
        tracing::debug!(instance = %instance.label, source, invocation = %invocation, "invoking");
        Ok(())
    }

    fn on_step_end(
        &self,
        instance: &Instance,
        step: &Step,
        _ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        tracing::info!(
            instance = %instance.label,
            step = %step.name,
            return_code = outcome.return_code,
            duration_ms = outcome.duration.as_millis() as u64,
            "step passed"
        );
        Ok(())
    }

    fn on_step_error(
        &self,
        instance: &Instance,
        step: &Step,
        _ctx: &Context,
        error: &Error,
        outcome: Option<&Outcome>,
    ) -> Result<()> {
        tracing::warn!(
            instance = %instance.label,
            step = %step.name,
            code = error.code(),
            return_code = outcome.map(|o| o.return_code),
            error = %error,
            "step attempt failed"
        );
        Ok(())
    }

    fn on_hook_start(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        _ctx: &Context,
    ) -> Result<()> {
        tracing::info!(instance = %instance.label, %phase, hook, "hook started");
        Ok(())
    }

    fn on_hook_end(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        _ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        tracing::debug!(instance = %instance.label, %phase, hook, return_code = outcome.return_code, "hook finished");
        Ok(())
    }

    fn on_hook_error(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        _ctx: &Context,
        error: &Error,
    ) -> Result<()> {
        tracing::warn!(instance = %instance.label, %phase, hook, error = %error, "hook failed");
        Ok(())
    }
}
