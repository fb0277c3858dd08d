//! JSON run report

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use indexmap::IndexMap;
use serde::Serialize;

use super::Observer;
use crate::action::Outcome;
use crate::common::{Error, ErrorReport, Result};
use crate::context::{Context, Vars};
use crate::scenario::{HookPhase, Instance, InstanceKey, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub action: String,
    pub attempts: u32,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookFailureReport {
    pub phase: String,
    pub hook: String,
    pub error: ErrorReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub label: String,
    pub scenario: String,
    pub params: Vars,
    pub status: Status,
    pub duration_ms: u64,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hook_failures: Vec<HookFailureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub instances: Vec<InstanceReport>,
}

struct Entry {
    started: Instant,
    report: InstanceReport,
}

/// Collects per-instance results for a machine-readable report
#[derive(Default)]
pub struct JsonReportObserver {
    entries: Mutex<IndexMap<InstanceKey, Entry>>,
}

impl JsonReportObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry(&self, instance: &Instance, f: impl FnOnce(&mut Entry)) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Observer("report state poisoned".to_string()))?;
        match entries.get_mut(&instance.key()) {
            Some(entry) => {
                f(entry);
                Ok(())
            }
            None => Err(Error::Observer(format!(
                "event for unknown instance '{}'",
                instance.label
            ))),
        }
    }

    /// Instances in the order they started
    pub fn report(&self) -> RunReport {
        let instances: Vec<InstanceReport> = self
            .entries
            .lock()
            .map(|entries| entries.values().map(|e| e.report.clone()).collect())
            .unwrap_or_default();
        RunReport {
            total: instances.len(),
            passed: instances
                .iter()
                .filter(|i| i.status == Status::Passed)
                .count(),
            failed: instances
                .iter()
                .filter(|i| i.status == Status::Failed)
                .count(),
            instances,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.report())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Observer for JsonReportObserver {
    fn name(&self) -> &str {
        "json-report"
    }

    fn on_testcase_start(&self, instance: &Instance, _ctx: &Context) -> Result<()> {
        let entry = Entry {
            started: Instant::now(),
            report: InstanceReport {
                label: instance.label.clone(),
                scenario: instance.scenario.name.clone(),
                params: instance.params.clone(),
                status: Status::Running,
                duration_ms: 0,
                steps: Vec::new(),
                hook_failures: Vec::new(),
                error: None,
            },
        };
        self.entries
            .lock()
            .map_err(|_| Error::Observer("report state poisoned".to_string()))?
            .insert(instance.key(), entry);
        Ok(())
    }

    fn on_testcase_end(&self, instance: &Instance, _ctx: &Context, success: bool) -> Result<()> {
        self.with_entry(instance, |entry| {
            entry.report.status = if success {
                Status::Passed
            } else {
                Status::Failed
            };
            entry.report.duration_ms = entry.started.elapsed().as_millis() as u64;
        })
    }

    fn on_testcase_error(&self, instance: &Instance, _ctx: &Context, error: &Error) -> Result<()> {
        self.with_entry(instance, |entry| {
            entry.report.error = Some(ErrorReport::from(error));
        })
    }

    fn on_step_start(
        &self,
        instance: &Instance,
        step: &Step,
        attempt: u32,
        _ctx: &Context,
    ) -> Result<()> {
        self.with_entry(instance, |entry| {
            let steps = &mut entry.report.steps;
            match steps.last_mut() {
                Some(last) if attempt > 1 && last.name == step.name => {
                    last.attempts = attempt;
                    last.status = Status::Running;
                }
                _ => steps.push(StepReport {
                    name: step.name.clone(),
                    action: step.action.clone(),
                    attempts: attempt,
                    status: Status::Running,
                    outcome: None,
                    error: None,
                }),
            }
        })
    }

    fn on_step_end(
        &self,
        instance: &Instance,
        _step: &Step,
        _ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        self.with_entry(instance, |entry| {
            if let Some(last) = entry.report.steps.last_mut() {
                last.status = Status::Passed;
                last.outcome = Some(outcome.clone());
                last.error = None;
            }
        })
    }

    fn on_step_error(
        &self,
        instance: &Instance,
        _step: &Step,
        _ctx: &Context,
        error: &Error,
        outcome: Option<&Outcome>,
    ) -> Result<()> {
        self.with_entry(instance, |entry| {
            if let Some(last) = entry.report.steps.last_mut() {
                last.status = Status::Failed;
                last.outcome = outcome.cloned();
                last.error = Some(ErrorReport::from(error));
            }
        })
    }

    fn on_hook_error(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        _ctx: &Context,
        error: &Error,
    ) -> Result<()> {
        self.with_entry(instance, |entry| {
            entry.report.hook_failures.push(HookFailureReport {
                phase: phase.to_string(),
                hook: hook.to_string(),
                error: ErrorReport::from(error),
            });
        })
    }
}
