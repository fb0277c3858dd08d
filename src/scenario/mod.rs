//! Scenario model
//!
//! Scenarios are created once at load time and shared read-only between
//! all of their instances. An instance is one matrix combination merged
//! over the scenario's base context.

pub mod loader;
pub mod matrix;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::{Context, Vars};
use crate::expect::Expectation;

pub use loader::{load_scenarios, ScenarioLoader};
pub use matrix::{combinations, expand, instance_label, Combinations, MatrixIter};

/// Parameter matrix: key to candidate values, in declaration order
pub type Matrix = IndexMap<String, Vec<Value>>;

/// One declared test case
#[derive(Debug)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub matrix: Matrix,
    pub base_context: Vars,
    pub steps: Vec<Step>,
    pub hooks: Hooks,
    /// Definition file, when loaded from disk
    pub source: Option<PathBuf>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            matrix: Matrix::new(),
            base_context: Vars::new(),
            steps: Vec::new(),
            hooks: Hooks::default(),
            source: None,
        }
    }

    /// Every concrete instance of this scenario, in expansion order
    pub fn instances(self: &Arc<Self>) -> impl Iterator<Item = Instance> + '_ {
        combinations(&self.matrix).enumerate().map(move |(index, params)| {
            let mut vars = self.base_context.clone();
            vars.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            Instance {
                scenario: Arc::clone(self),
                index,
                label: instance_label(&self.name, &params),
                params,
                vars,
            }
        })
    }
}

/// One step of a scenario
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    /// Registry key of the action to run
    pub action: String,
    pub expectation: Option<Expectation>,
    /// Attempts, at least 1
    pub retry: u32,
    pub timeout: Option<Duration>,
    /// Run the action's rollback operation instead of executing it
    pub rollback: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            expectation: None,
            retry: 1,
            timeout: None,
            rollback: false,
        }
    }

    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = Some(expectation);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lifecycle hooks, as action refs
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub on_fail: Vec<String>,
}

impl Hooks {
    pub fn phase(&self, phase: HookPhase) -> &[String] {
        match phase {
            HookPhase::Before => &self.before,
            HookPhase::After => &self.after,
            HookPhase::OnFail => &self.on_fail,
            HookPhase::Rollback => &[],
        }
    }

    pub fn all(&self) -> impl Iterator<Item = (HookPhase, &String)> {
        HookPhase::ALL
            .into_iter()
            .flat_map(move |phase| self.phase(phase).iter().map(move |r| (phase, r)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
    OnFail,
    /// Recovery of faults left in place by a failed instance; never declared
    Rollback,
}

impl HookPhase {
    /// Declarable phases
    pub const ALL: [HookPhase; 3] = [HookPhase::Before, HookPhase::After, HookPhase::OnFail];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Before => "before",
            HookPhase::After => "after",
            HookPhase::OnFail => "on_fail",
            HookPhase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One matrix combination of a scenario
#[derive(Debug, Clone)]
pub struct Instance {
    pub scenario: Arc<Scenario>,
    /// Position in the scenario's expansion order
    pub index: usize,
    /// `name[k=v,...]`
    pub label: String,
    /// Matrix values of this combination
    pub params: Vars,
    /// Base context merged with `params`
    pub vars: Vars,
}

/// Identity of an instance within a run: scenario name and expansion index
pub type InstanceKey = (String, usize);

impl Instance {
    /// Fresh private context for one run of this instance
    pub fn context(&self) -> Context {
        Context::new(self.vars.clone())
    }

    /// Unique even when two labels render the same
    pub fn key(&self) -> InstanceKey {
        (self.scenario.name.clone(), self.index)
    }
}
