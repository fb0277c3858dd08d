//! Host run
//!
//! Loads and validates every definition before anything executes, expands
//! scenarios into instances and schedules them on the engine, at most
//! `jobs` at a time. Results come back in expansion order regardless of
//! completion order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::task::JoinHandle;

use crate::action::ActionRegistry;
use crate::common::config::EngineConfig;
use crate::common::{Cancellation, Error, Result};
use crate::engine::{Engine, Execution};
use crate::scenario::{load_scenarios, Instance, Scenario};

/// Everything a run needs, validated
#[derive(Debug)]
pub struct Plan {
    pub registry: ActionRegistry,
    pub scenarios: Vec<Arc<Scenario>>,
}

impl Plan {
    /// Load action and scenario definitions
    ///
    /// Fails on the first invalid definition; nothing is partially loaded.
    pub fn load(
        action_paths: &[PathBuf],
        scenario_paths: &[PathBuf],
        engine: &EngineConfig,
    ) -> Result<Self> {
        let mut registry = ActionRegistry::new();
        for path in action_paths {
            registry.load_path(path)?;
        }
        let scenarios = load_scenarios(scenario_paths, &mut registry, engine)?;
        if scenarios.is_empty() {
            return Err(Error::Config(format!(
                "no scenarios found in {}",
                scenario_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        tracing::info!(
            actions = registry.len(),
            scenarios = scenarios.len(),
            "definitions loaded"
        );
        Ok(Self {
            registry,
            scenarios,
        })
    }

    /// Expanded instances whose label contains `filter`
    pub fn instances(&self, filter: Option<&str>) -> Vec<Instance> {
        select_instances(&self.scenarios, filter)
    }
}

pub fn select_instances(scenarios: &[Arc<Scenario>], filter: Option<&str>) -> Vec<Instance> {
    scenarios
        .iter()
        .flat_map(|s| s.instances())
        .filter(|i| filter.map_or(true, |f| i.label.contains(f)))
        .collect()
}

/// Scheduling options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Instances run concurrently
    pub jobs: usize,
    /// Stop scheduling new instances after the first failure
    pub fail_fast: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            fail_fast: false,
        }
    }
}

/// Results of a whole run
#[derive(Debug, Default)]
pub struct RunResults {
    /// Executed instances in expansion order
    pub executions: Vec<Execution>,
    /// Labels of instances never started (fail-fast or cancellation)
    pub skipped: Vec<String>,
}

impl RunResults {
    pub fn passed(&self) -> usize {
        self.executions.iter().filter(|e| e.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.executions.len() - self.passed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Execution> {
        self.executions.iter().filter(|e| !e.passed())
    }

    pub fn first_failure(&self) -> Option<&Execution> {
        self.failures().next()
    }

    /// True only when every selected instance ran and passed
    pub fn success(&self) -> bool {
        self.failed() == 0 && self.skipped.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// Run `instances` on `engine`
pub async fn run_instances(
    engine: &Engine,
    instances: Vec<Instance>,
    options: &RunOptions,
) -> RunResults {
    let stop = AtomicBool::new(false);
    let jobs = options.jobs.max(1);

    let slots: Vec<std::result::Result<Execution, String>> = stream::iter(instances)
        .map(|instance| {
            let stop = &stop;
            async move {
                // Checked when the instance gets a slot, not when queued
                if stop.load(Ordering::SeqCst) || engine.cancellation().is_cancelled() {
                    tracing::debug!(instance = %instance.label, "skipped");
                    return Err(instance.label);
                }
                let execution = engine.execute(&instance).await;
                if options.fail_fast && !execution.passed() {
                    stop.store(true, Ordering::SeqCst);
                }
                Ok(execution)
            }
        })
        .buffered(jobs)
        .collect()
        .await;

    let mut results = RunResults::default();
    for slot in slots {
        match slot {
            Ok(execution) => results.executions.push(execution),
            Err(label) => results.skipped.push(label),
        }
    }
    results
}

/// Cancel `cancel` on the first Ctrl-C; a second Ctrl-C exits immediately
pub fn cancel_on_ctrl_c(cancel: Cancellation) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupted, cancelling run (press Ctrl-C again to exit now)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    })
}
