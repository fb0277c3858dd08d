//! Coloured progress output

use std::io::Write;
use std::sync::Mutex;

use colored::Colorize;

use super::Observer;
use crate::action::{Invocation, Outcome};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::scenario::{HookPhase, Instance, Step};

/// Prints test-runner style ✓/✗ lines
///
/// With several instances running at once every line is prefixed with the
/// instance label, since output from different instances interleaves.
pub struct ConsoleObserver {
    verbose: bool,
    prefix: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleObserver {
    pub fn new(verbose: bool, prefix: bool) -> Self {
        Self::with_writer(verbose, prefix, Box::new(std::io::stdout()))
    }

    pub fn with_writer(verbose: bool, prefix: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            verbose,
            prefix,
            out: Mutex::new(out),
        }
    }

    fn line(&self, instance: &Instance, text: String) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| Error::Observer("console writer poisoned".to_string()))?;
        if self.prefix {
            writeln!(out, "{} {}", format!("[{}]", instance.label).dimmed(), text)?;
        } else {
            writeln!(out, "{}", text)?;
        }
        Ok(())
    }
}

impl Observer for ConsoleObserver {
    fn name(&self) -> &str {
        "console"
    }

    fn on_testcase_start(&self, instance: &Instance, _ctx: &Context) -> Result<()> {
        self.line(
            instance,
            format!("{} {}", "Running:".blue().bold(), instance.label.white().bold()),
        )?;
        if let Some(desc) = &instance.scenario.description {
            self.line(instance, format!("  {}", desc.dimmed()))?;
        }
        Ok(())
    }

    fn on_testcase_end(&self, instance: &Instance, _ctx: &Context, success: bool) -> Result<()> {
        let text = if success {
            format!("{} {}", "✓".green().bold(), "Passed".green().bold())
        } else {
            format!("{} {}", "✗".red().bold(), "Failed".red().bold())
        };
        self.line(instance, text)
    }

    fn on_step_start(
        &self,
        instance: &Instance,
        step: &Step,
        attempt: u32,
        _ctx: &Context,
    ) -> Result<()> {
        if attempt > 1 {
            self.line(
                instance,
                format!(
                    "  {} {} (attempt {}/{})",
                    "↻".yellow(),
                    step.name,
                    attempt,
                    step.retry
                ),
            )?;
        }
        Ok(())
    }

    fn on_invocation(
        &self,
        instance: &Instance,
        _source: &str,
        invocation: &Invocation,
    ) -> Result<()> {
        if self.verbose {
            self.line(instance, format!("    $ {}", invocation.to_string().dimmed()))?;
        }
        Ok(())
    }

    fn on_step_end(
        &self,
        instance: &Instance,
        step: &Step,
        _ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        let mut text = format!("  {} {}", "✓".green(), step.name);
        if self.verbose {
            text.push_str(&format!(" {}", format!("({})", outcome).dimmed()));
        }
        self.line(instance, text)
    }

    fn on_step_error(
        &self,
        instance: &Instance,
        step: &Step,
        _ctx: &Context,
        error: &Error,
        _outcome: Option<&Outcome>,
    ) -> Result<()> {
        self.line(instance, format!("  {} {}: {}", "✗".red(), step.name, error))
    }

    fn on_hook_end(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        _ctx: &Context,
        _outcome: &Outcome,
    ) -> Result<()> {
        if self.verbose {
            self.line(
                instance,
                format!("  {} {} hook {}", "✓".green(), phase, hook.dimmed()),
            )?;
        }
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
        self.line(
            instance,
            format!("  {} {} hook {}: {}", "✗".red(), phase, hook, error),
        )
    }
}
