//! Scenario definition files
//!
//! Defines the YAML shapes of scenarios and turns them into the validated
//! model. Everything is checked here, before anything runs: a run either
//! loads completely or not at all.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{Hooks, Matrix, Scenario, Step};
use crate::action::registry::definition_files;
use crate::action::ActionRegistry;
use crate::common::config::EngineConfig;
use crate::common::{Error, Result};
use crate::context::{is_reserved, Vars};
use crate::expect::{Containment, Eventually, Expectation, ReturnCodes};

/// A scenario as written in a definition file
#[derive(Deserialize, Debug)]
pub struct ScenarioDef {
    pub name: String,
    pub description: Option<String>,
    /// Parameter matrix; one instance per combination
    #[serde(default)]
    pub matrix: Matrix,
    /// Base variables shared by every instance
    #[serde(default, alias = "base_context")]
    pub context: Vars,
    #[serde(default)]
    pub steps: Vec<StepDef>,
    #[serde(default)]
    pub hooks: HooksDef,
}

#[derive(Deserialize, Debug)]
pub struct StepDef {
    pub name: String,
    /// Action to run; defaults to the step name
    #[serde(alias = "cmd_ref")]
    pub action: Option<String>,
    /// Number of attempts (default: 1)
    #[serde(default = "default_retry", alias = "retry_count")]
    pub retry: u32,
    pub timeout_secs: Option<f64>,
    pub expect: Option<ExpectDef>,
    /// Run the action's rollback operation
    #[serde(default)]
    pub rollback: bool,
}

fn default_retry() -> u32 {
    1
}

#[derive(Deserialize, Debug, Default)]
pub struct ExpectDef {
    /// Substring the output must contain
    pub contains: Option<String>,
    /// Poll until the output contains the text
    pub eventually: Option<EventuallyDef>,
    /// Accepted return code, or list of them
    #[serde(alias = "expected_return_code")]
    pub return_code: Option<ReturnCodes>,
}

/// `eventually: 5` (seconds, reusing `contains`) or a full record
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum EventuallyDef {
    Seconds(f64),
    Record {
        contains: Option<String>,
        /// Seconds
        timeout: Option<f64>,
        /// Seconds
        poll_interval: Option<f64>,
    },
}

#[derive(Deserialize, Debug, Default)]
pub struct HooksDef {
    #[serde(default)]
    pub before: Vec<HookDef>,
    #[serde(default)]
    pub after: Vec<HookDef>,
    #[serde(default)]
    pub on_fail: Vec<HookDef>,
}

/// A hook entry
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum HookDef {
    /// Action name, or an inline shell command when it has arguments
    Bare(String),
    /// Explicit action ref
    Action { action: String },
    /// Inline shell command
    Inline { cmd: String },
}

/// Loads scenario files against an action registry
///
/// Inline hook commands are registered into the registry as they are met.
pub struct ScenarioLoader<'a> {
    registry: &'a mut ActionRegistry,
    engine: &'a EngineConfig,
    names: HashSet<String>,
}

impl<'a> ScenarioLoader<'a> {
    pub fn new(registry: &'a mut ActionRegistry, engine: &'a EngineConfig) -> Self {
        Self {
            registry,
            engine,
            names: HashSet::new(),
        }
    }

    /// Parse and validate one scenario document
    pub fn load_str(&mut self, content: &str, origin: &Path) -> Result<Scenario> {
        let def: ScenarioDef = serde_yaml::from_str(content).map_err(|e| Error::yaml(origin, e))?;
        let mut scenario = self.build(def)?;
        scenario.source = Some(origin.to_path_buf());
        Ok(scenario)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Scenario> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        self.load_str(&content, path)
    }

    /// Load a scenario file, or every YAML file of a directory
    pub fn load_path(&mut self, path: &Path) -> Result<Vec<Scenario>> {
        if path.is_dir() {
            definition_files(path)?
                .iter()
                .map(|file| self.load_file(file))
                .collect()
        } else {
            Ok(vec![self.load_file(path)?])
        }
    }

    /// Validate a definition and resolve it into the model
    pub fn build(&mut self, def: ScenarioDef) -> Result<Scenario> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Config("scenario with an empty name".to_string()));
        }
        if !self.names.insert(name.clone()) {
            return Err(Error::Registry(format!(
                "scenario '{}' is defined more than once",
                name
            )));
        }

        for key in def.matrix.keys().chain(def.context.keys()) {
            if is_reserved(key) {
                return Err(Error::Config(format!(
                    "scenario '{}': '{}' is a reserved runtime field",
                    name, key
                )));
            }
        }

        for (key, values) in &def.matrix {
            for (i, value) in values.iter().enumerate() {
                if values[..i].contains(value) {
                    return Err(Error::Config(format!(
                        "scenario '{}': matrix '{}' lists {} more than once",
                        name, key, value
                    )));
                }
            }
        }

        let steps = def
            .steps
            .into_iter()
            .map(|step| self.build_step(&name, step))
            .collect::<Result<Vec<_>>>()?;

        let hooks = Hooks {
            before: self.build_hooks(&name, def.hooks.before)?,
            after: self.build_hooks(&name, def.hooks.after)?,
            on_fail: self.build_hooks(&name, def.hooks.on_fail)?,
        };

        Ok(Scenario {
            name,
            description: def.description,
            matrix: def.matrix,
            base_context: def.context,
            steps,
            hooks,
            source: None,
        })
    }

    fn build_step(&self, scenario: &str, def: StepDef) -> Result<Step> {
        let invalid =
            |msg: String| Error::Config(format!("scenario '{}' step '{}': {}", scenario, def.name, msg));

        let action_ref = def.action.clone().unwrap_or_else(|| def.name.clone());
        let action = self.registry.resolve(&action_ref).map_err(|e| match e {
            Error::Registry(msg) => Error::Registry(format!(
                "scenario '{}' step '{}': {}",
                scenario, def.name, msg
            )),
            other => other,
        })?;

        if def.retry == 0 {
            return Err(invalid("retry must be at least 1".to_string()));
        }

        let timeout = match def.timeout_secs {
            Some(secs) => Some(positive_secs(secs).ok_or_else(|| {
                invalid(format!("timeout_secs must be a positive number, got {}", secs))
            })?),
            None => None,
        };

        let expectation = match def.expect {
            Some(expect) => Some(self.build_expectation(expect).map_err(&invalid)?),
            None => None,
        };
        let eventually = expectation
            .as_ref()
            .and_then(Expectation::eventually_mode)
            .is_some();

        if def.rollback {
            if !action.supports_rollback() {
                return Err(invalid(format!(
                    "action '{}' ({}) has no rollback operation",
                    action_ref,
                    action.kind()
                )));
            }
            if eventually {
                return Err(invalid("rollback steps cannot poll with eventually".to_string()));
            }
        } else if eventually && action.is_chaos() {
            return Err(invalid(format!(
                "chaos action '{}' cannot be re-invoked by eventually",
                action_ref
            )));
        }

        Ok(Step {
            name: def.name,
            action: action_ref,
            expectation,
            retry: def.retry,
            timeout,
            rollback: def.rollback,
        })
    }

    fn build_expectation(&self, def: ExpectDef) -> std::result::Result<Expectation, String> {
        let containment = match def.eventually {
            None => def.contains.map(Containment::Immediate),
            Some(EventuallyDef::Seconds(secs)) => {
                let contains = def
                    .contains
                    .ok_or("eventually needs a 'contains' text to wait for")?;
                Some(Containment::Eventually(Eventually {
                    contains,
                    timeout: positive_secs(secs)
                        .ok_or_else(|| format!("eventually timeout must be positive, got {}", secs))?,
                    poll_interval: self.engine.default_poll_interval(),
                }))
            }
            Some(EventuallyDef::Record {
                contains,
                timeout,
                poll_interval,
            }) => {
                let contains = match (contains, def.contains) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(format!(
                            "both contains \"{}\" and eventually.contains \"{}\" given; use one",
                            b, a
                        ))
                    }
                    (Some(text), _) | (None, Some(text)) => text,
                    (None, None) => {
                        return Err("eventually needs a 'contains' text to wait for".to_string())
                    }
                };
                let timeout = match timeout {
                    Some(secs) => positive_secs(secs)
                        .ok_or_else(|| format!("eventually timeout must be positive, got {}", secs))?,
                    None => self.engine.default_eventually_timeout(),
                };
                let poll_interval = match poll_interval {
                    Some(secs) => positive_secs(secs)
                        .ok_or_else(|| format!("poll_interval must be positive, got {}", secs))?,
                    None => self.engine.default_poll_interval(),
                };
                Some(Containment::Eventually(Eventually {
                    contains,
                    timeout,
                    poll_interval,
                }))
            }
        };

        Ok(Expectation {
            containment,
            return_code: def.return_code,
        })
    }

    fn build_hooks(&mut self, scenario: &str, defs: Vec<HookDef>) -> Result<Vec<String>> {
        defs.into_iter()
            .map(|def| match def {
                HookDef::Bare(name) if self.registry.get(&name).is_some() => Ok(name),
                HookDef::Bare(cmd) if cmd.trim().contains(char::is_whitespace) => {
                    self.registry.register_inline_shell(&cmd)
                }
                HookDef::Inline { cmd } => self.registry.register_inline_shell(&cmd),
                // A single word is a ref; a bare command needs `{cmd: ...}`
                HookDef::Bare(action) | HookDef::Action { action } => {
                    self.registry.resolve(&action).map_err(|e| match e {
                        Error::Registry(msg) => {
                            Error::Registry(format!("scenario '{}' hook: {}", scenario, msg))
                        }
                        other => other,
                    })?;
                    Ok(action)
                }
            })
            .collect()
    }
}

fn positive_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// Load every scenario under `paths`, failing on the first invalid one
pub fn load_scenarios(
    paths: &[PathBuf],
    registry: &mut ActionRegistry,
    engine: &EngineConfig,
) -> Result<Vec<Arc<Scenario>>> {
    let mut loader = ScenarioLoader::new(registry, engine);
    let mut scenarios = Vec::new();
    for path in paths {
        for scenario in loader.load_path(path)? {
            tracing::debug!(scenario = %scenario.name, steps = scenario.steps.len(), "loaded scenario");
            scenarios.push(Arc::new(scenario));
        }
    }
    Ok(scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ActionRegistry {
        let mut r = ActionRegistry::new();
        r.load_str(
            r#"
- name: check
  cmd: "cat {{file}}"
- name: kill_primary
  type: chaos
  inject: "pkill {{svc}}"
  recover: "start {{svc}}"
- name: status
  type: mock
  stdout: ok
"#,
            Path::new("actions.yaml"),
        )
        .unwrap();
        r
    }

    fn load(yaml: &str) -> Result<Scenario> {
        let mut registry = registry();
        let engine = EngineConfig::default();
        ScenarioLoader::new(&mut registry, &engine).load_str(yaml, Path::new("s.yaml"))
    }

    #[test]
    fn test_full_scenario() {
        let scenario = load(
            r#"
name: failover
description: primary dies, replica takes over
matrix:
  db: [pg14, pg15]
context:
  svc: postgres
steps:
  - name: kill_primary
  - name: wait_new_primary
    action: status
    retry: 3
    timeout_secs: 30
    expect:
      eventually: {contains: "ok", timeout: 2, poll_interval: 0.1}
      return_code: [0, 1]
  - name: restore
    action: kill_primary
    rollback: true
hooks:
  before: [check]
  on_fail:
    - "echo failed: {{last_error}}"
    - {cmd: "dmesg | tail"}
"#,
        )
        .unwrap();

        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[0].action, "kill_primary");
        let wait = &scenario.steps[1];
        assert_eq!(wait.retry, 3);
        assert_eq!(wait.timeout, Some(Duration::from_secs(30)));
        let ev = wait.expectation.as_ref().unwrap().eventually_mode().unwrap();
        assert_eq!(ev.timeout, Duration::from_secs(2));
        assert_eq!(ev.poll_interval, Duration::from_millis(100));
        assert!(scenario.steps[2].rollback);
        assert_eq!(scenario.hooks.before, vec!["check"]);
        assert_eq!(scenario.hooks.on_fail.len(), 2);
        assert!(scenario.hooks.on_fail[0].starts_with("inline#"));
    }

    #[test]
    fn test_eventually_short_form_reuses_contains() {
        let scenario = load(
            r#"
name: s
steps:
  - name: status
    expect: {contains: "ok", eventually: 5}
"#,
        )
        .unwrap();
        let ev = scenario.steps[0]
            .expectation
            .as_ref()
            .unwrap()
            .eventually_mode()
            .unwrap()
            .clone();
        assert_eq!(ev.contains, "ok");
        assert_eq!(ev.timeout, Duration::from_secs(5));
        assert_eq!(ev.poll_interval, EngineConfig::default().default_poll_interval());
    }

    #[test]
    fn test_unknown_action_fails_load() {
        let err = load("{name: s, steps: [{name: nope}]}").unwrap_err();
        assert!(matches!(&err, Error::Registry(msg) if msg.contains("nope") && msg.contains("check")));
    }

    #[test]
    fn test_reserved_matrix_key_rejected() {
        let err = load("{name: s, matrix: {last_stdout: [1]}, steps: []}").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_misspelled_hook_ref_fails_load() {
        let err = load("{name: s, steps: [], hooks: {before: [chek]}}").unwrap_err();
        assert!(matches!(&err, Error::Registry(msg) if msg.contains("chek") && msg.contains("check")));
    }

    #[test]
    fn test_single_word_inline_hook_needs_cmd_form() {
        let scenario = load("{name: s, steps: [], hooks: {after: [{cmd: sync}]}}").unwrap();
        assert!(scenario.hooks.after[0].starts_with("inline#"));
        assert!(load("{name: s, steps: [], hooks: {after: [sync]}}").is_err());
    }

    #[test]
    fn test_duplicate_matrix_value_rejected() {
        let err = load("{name: s, matrix: {n: [1, 2, 1]}, steps: []}").unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("'n'")));
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let err = load("{name: s, steps: [{name: check, timeout_secs: 1e20}]}").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_retry_zero_rejected() {
        assert!(load("{name: s, steps: [{name: check, retry: 0}]}").is_err());
    }

    #[test]
    fn test_conflicting_needles_rejected() {
        let err = load(
            "{name: s, steps: [{name: status, expect: {contains: a, eventually: {contains: b}}}]}",
        )
        .unwrap_err();
        assert!(err.to_string().contains("use one"));
    }

    #[test]
    fn test_rollback_requires_rollback_operation() {
        assert!(load("{name: s, steps: [{name: check, rollback: true}]}").is_err());
    }

    #[test]
    fn test_eventually_on_chaos_rejected() {
        assert!(load(
            "{name: s, steps: [{name: kill_primary, expect: {contains: x, eventually: 1}}]}"
        )
        .is_err());
    }

    #[test]
    fn test_duplicate_scenario_names_rejected() {
        let mut registry = registry();
        let engine = EngineConfig::default();
        let mut loader = ScenarioLoader::new(&mut registry, &engine);
        loader
            .load_str("{name: dup, steps: []}", Path::new("a.yaml"))
            .unwrap();
        let err = loader
            .load_str("{name: dup, steps: []}", Path::new("b.yaml"))
            .unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }

    #[test]
    fn test_load_scenarios_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.yaml"), "{name: one, steps: [{name: check}]}").unwrap();
        std::fs::write(dir.path().join("two.yml"), "{name: two, steps: [{name: status}]}").unwrap();

        let mut registry = registry();
        let scenarios = load_scenarios(
            &[dir.path().to_path_buf()],
            &mut registry,
            &EngineConfig::default(),
        )
        .unwrap();
        let names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert!(scenarios[0].source.is_some());
    }
}
