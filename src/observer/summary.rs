//! Run totals and step timing
//!
//! Counts instances by result and keeps duration samples per step name,
//! covering every attempt of a step including retries and back-off.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;

use super::Observer;
use crate::action::Outcome;
use crate::common::{Error, Result};
use crate::context::Context;
use crate::scenario::{HookPhase, Instance, Step};

/// Snapshot of the collected totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub started: usize,
    pub passed: usize,
    pub failed: usize,
    pub step_failures: usize,
    pub hook_failures: usize,
    /// Step name to wall-clock durations, one sample per finished step
    #[serde(skip)]
    pub step_durations: IndexMap<String, Vec<Duration>>,
}

impl Summary {
    pub fn finished(&self) -> usize {
        self.passed + self.failed
    }

    pub fn mean_step_duration(&self, step: &str) -> Option<Duration> {
        let samples = self.step_durations.get(step)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<Duration>() / samples.len() as u32)
    }
}

#[derive(Default)]
struct State {
    summary: Summary,
    step_started: HashMap<(String, String), Instant>,
}

#[derive(Default)]
pub struct SummaryObserver {
    state: Mutex<State>,
}

impl SummaryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> Summary {
        self.state
            .lock()
            .map(|s| s.summary.clone())
            .unwrap_or_default()
    }

    fn with_state(&self, f: impl FnOnce(&mut State)) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Observer("summary state poisoned".to_string()))?;
        f(&mut state);
        Ok(())
    }

    fn finish_step(&self, instance: &Instance, step: &Step) -> Result<()> {
        self.with_state(|state| {
            let key = (instance.label.clone(), step.name.clone());
            if let Some(started) = state.step_started.remove(&key) {
                state
                    .summary
                    .step_durations
                    .entry(step.name.clone())
                    .or_default()
                    .push(started.elapsed());
            }
        })
    }
}

impl Observer for SummaryObserver {
    fn name(&self) -> &str {
        "summary"
    }

    fn on_testcase_start(&self, _instance: &Instance, _ctx: &Context) -> Result<()> {
        self.with_state(|state| state.summary.started += 1)
    }

    fn on_testcase_end(&self, _instance: &Instance, _ctx: &Context, success: bool) -> Result<()> {
        self.with_state(|state| {
            if success {
                state.summary.passed += 1;
            } else {
                state.summary.failed += 1;
            }
        })
    }

    fn on_step_start(
        &self,
        instance: &Instance,
        step: &Step,
        attempt: u32,
        _ctx: &Context,
    ) -> Result<()> {
        if attempt > 1 {
            return Ok(());
        }
        self.with_state(|state| {
            state
                .step_started
                .insert((instance.label.clone(), step.name.clone()), Instant::now());
        })
    }

    fn on_step_end(
        &self,
        instance: &Instance,
        step: &Step,
        _ctx: &Context,
        _outcome: &Outcome,
    ) -> Result<()> {
        self.finish_step(instance, step)
    }

    fn on_step_error(
        &self,
        _instance: &Instance,
        _step: &Step,
        _ctx: &Context,
        _error: &Error,
        _outcome: Option<&Outcome>,
    ) -> Result<()> {
        self.with_state(|state| state.summary.step_failures += 1)
    }

    fn on_testcase_error(&self, instance: &Instance, _ctx: &Context, _error: &Error) -> Result<()> {
        // The failed step's sample is still open
        self.with_state(|state| {
            let open: Vec<(String, String)> = state
                .step_started
                .keys()
                .filter(|(label, _)| *label == instance.label)
                .cloned()
                .collect();
            for key in open {
                if let Some(started) = state.step_started.remove(&key) {
                    state
                        .summary
                        .step_durations
                        .entry(key.1)
                        .or_default()
                        .push(started.elapsed());
                }
            }
        })
    }

    fn on_hook_error(
        &self,
        _instance: &Instance,
        _phase: HookPhase,
        _hook: &str,
        _ctx: &Context,
        _error: &Error,
    ) -> Result<()> {
        self.with_state(|state| state.summary.hook_failures += 1)
    }
}
