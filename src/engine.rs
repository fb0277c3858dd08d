//! Execution engine
//!
//! Runs one scenario instance through its lifecycle:
//!
//! ```text
//! before hooks -> steps -> after hooks                       (success)
//!      \            \
//!       +------------+-> fault rollback -> on_fail hooks    (failure)
//! ```
//!
//! A before-hook failure aborts the instance. Steps retry locally with a
//! back-off between attempts. After hooks are best-effort cleanup and never
//! fail a passing instance. On failure, faults injected by chaos steps are
//! recovered in reverse order, every on_fail hook runs even when an earlier
//! one fails, and the first error is returned. Observers hear about
//! every boundary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::action::{Action, ActionRegistry, Outcome, Runtime};
use crate::common::config::{BackendConfig, EngineConfig};
use crate::common::{Cancellation, Error, Result};
use crate::context::{Context, Vars};
use crate::expect::{verify, Expectation, ReturnCodes};
use crate::observer::Observers;
use crate::scenario::{HookPhase, Instance, Step};

/// A hook (or fault recovery) that failed without failing the instance
#[derive(Debug)]
pub struct HookFailure {
    pub phase: HookPhase,
    pub hook: String,
    pub error: Error,
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook '{}': {}", self.phase, self.hook, self.error)
    }
}

/// Every secondary failure of one instance, in the order they happened
#[derive(Debug, Default)]
pub struct HookFailures(Vec<HookFailure>);

impl HookFailures {
    pub fn push(&mut self, phase: HookPhase, hook: impl Into<String>, error: Error) {
        self.0.push(HookFailure {
            phase,
            hook: hook.into(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookFailure> {
        self.0.iter()
    }
}

/// Result of running one instance
#[derive(Debug)]
pub struct Execution {
    pub label: String,
    /// The primary error, if the instance failed
    pub result: Result<()>,
    pub hook_failures: HookFailures,
    /// Final context, runtime fields included
    pub context: Vars,
    pub duration: Duration,
}

impl Execution {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs scenario instances against a shared action registry
#[derive(Debug)]
pub struct Engine {
    registry: Arc<ActionRegistry>,
    observers: Observers,
    config: EngineConfig,
    backends: BackendConfig,
    cancel: Cancellation,
    next_scope: AtomicU64,
}

impl Engine {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            observers: Observers::default(),
            config: EngineConfig::default(),
            backends: BackendConfig::default(),
            cancel: Cancellation::new(),
            next_scope: AtomicU64::new(1),
        }
    }

    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backends(mut self, backends: BackendConfig) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Run one instance, returning its primary error on failure
    pub async fn run(&self, instance: &Instance) -> Result<Execution> {
        let mut execution = self.execute(instance).await;
        std::mem::replace(&mut execution.result, Ok(()))?;
        Ok(execution)
    }

    /// Run one instance through its full lifecycle
    pub async fn execute(&self, instance: &Instance) -> Execution {
        let started = Instant::now();
        let scope = self.next_scope.fetch_add(1, Ordering::Relaxed);
        let mut ctx = instance.context();
        let mut failures = HookFailures::default();
        let mut faults: Vec<Arc<Action>> = Vec::new();

        self.observers
            .notify("testcase_start", |o| o.on_testcase_start(instance, &ctx));

        let result = self.run_body(instance, scope, &mut ctx, &mut faults).await;

        match &result {
            Ok(()) => {
                let rt = self.runtime(&self.cancel, scope);
                self.run_cleanup_hooks(instance, HookPhase::After, &ctx, &rt, &mut failures)
                    .await;
            }
            Err(error) => {
                ctx.record_error(error);
                self.observers
                    .notify("testcase_error", |o| o.on_testcase_error(instance, &ctx, error));

                // Recovery must still happen on a cancelled run
                let cleanup = Cancellation::new();
                let rt = self.runtime(&cleanup, scope);
                self.rollback_faults(instance, &ctx, faults, &rt, &mut failures)
                    .await;
                self.run_cleanup_hooks(instance, HookPhase::OnFail, &ctx, &rt, &mut failures)
                    .await;
            }
        }

        let success = result.is_ok();
        self.observers
            .notify("testcase_end", |o| o.on_testcase_end(instance, &ctx, success));

        Execution {
            label: instance.label.clone(),
            result,
            hook_failures: failures,
            context: ctx.snapshot(),
            duration: started.elapsed(),
        }
    }

    fn runtime<'a>(&'a self, cancel: &'a Cancellation, scope: u64) -> Runtime<'a> {
        Runtime {
            backends: &self.backends,
            cancel,
            scope,
        }
    }

    async fn run_body(
        &self,
        instance: &Instance,
        scope: u64,
        ctx: &mut Context,
        faults: &mut Vec<Arc<Action>>,
    ) -> Result<()> {
        let rt = self.runtime(&self.cancel, scope);

        for hook in &instance.scenario.hooks.before {
            self.run_hook(instance, HookPhase::Before, hook, ctx, &rt)
                .await
                .map_err(|e| Error::hook(HookPhase::Before.as_str(), hook, e))?;
        }

        for step in &instance.scenario.steps {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.run_step(instance, step, ctx, faults, &rt).await?;
        }

        Ok(())
    }

    async fn run_step(
        &self,
        instance: &Instance,
        step: &Step,
        ctx: &mut Context,
        faults: &mut Vec<Arc<Action>>,
        rt: &Runtime<'_>,
    ) -> Result<()> {
        let action = self.registry.resolve(&step.action)?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.observers
                .notify("step_start", |o| o.on_step_start(instance, step, attempt, ctx));

            match self.attempt(instance, step, &action, ctx, rt).await {
                Ok(outcome) => {
                    ctx.record_outcome(&outcome);
                    track_fault(step, &action, faults, false);
                    self.observers
                        .notify("step_end", |o| o.on_step_end(instance, step, ctx, &outcome));
                    return Ok(());
                }
                Err(error) => {
                    // Past rendering, the fault may be in place. A timed out
                    // attempt was dropped before any self-recovery ran.
                    if !step.rollback && !matches!(error, Error::Template { .. }) {
                        let interrupted = matches!(error, Error::StepTimeout { .. });
                        track_fault(step, &action, faults, interrupted);
                    }
                    ctx.record_error(&error);
                    self.observers.notify("step_error", |o| {
                        o.on_step_error(instance, step, ctx, &error, error.outcome())
                    });

                    if attempt >= step.retry || matches!(error, Error::Cancelled) {
                        return Err(error);
                    }
                    tracing::debug!(
                        instance = %instance.label,
                        step = %step.name,
                        attempt,
                        backoff_ms = self.config.retry_backoff().as_millis() as u64,
                        "retrying step"
                    );
                    rt.cancel.sleep(self.config.retry_backoff()).await?;
                }
            }
        }
    }

    /// One build, run, verify pass of a step, bounded by the step timeout
    async fn attempt(
        &self,
        instance: &Instance,
        step: &Step,
        action: &Action,
        ctx: &Context,
        rt: &Runtime<'_>,
    ) -> Result<Outcome> {
        let work = async {
            if step.rollback {
                let outcome = action.rollback(ctx, rt).await?.unwrap_or_default();
                if let Some(expectation) = &step.expectation {
                    verify(&outcome, expectation, ctx, &format!("rollback of {}", action.name()))?;
                }
                return Ok(outcome);
            }

            let invocation = action.build(ctx)?;
            self.observers.notify("invocation", |o| {
                o.on_invocation(instance, &step.name, &invocation)
            });
            let outcome = action
                .run(&invocation, ctx, step.expectation.as_ref(), rt)
                .await?;
            if let Some(expectation) = &step.expectation {
                verify(&outcome, expectation, ctx, &invocation.to_string())?;
            }
            Ok(outcome)
        };

        match step.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Error::StepTimeout {
                    step: step.name.clone(),
                    timeout: limit,
                })?,
            None => work.await,
        }
    }

    /// Run one hook; hooks expect a zero return code and nothing else
    async fn run_hook(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        ctx: &Context,
        rt: &Runtime<'_>,
    ) -> Result<Outcome> {
        self.observers
            .notify("hook_start", |o| o.on_hook_start(instance, phase, hook, ctx));

        let result = async {
            let action = self.registry.resolve(hook)?;
            let invocation = action.build(ctx)?;
            self.observers
                .notify("invocation", |o| o.on_invocation(instance, hook, &invocation));
            let expectation = Expectation::default().with_return_code(ReturnCodes::One(0));
            action.run(&invocation, ctx, Some(&expectation), rt).await
        }
        .await;

        match &result {
            Ok(outcome) => self
                .observers
                .notify("hook_end", |o| o.on_hook_end(instance, phase, hook, ctx, outcome)),
            Err(error) => self
                .observers
                .notify("hook_error", |o| o.on_hook_error(instance, phase, hook, ctx, error)),
        }
        result
    }

    /// Run every hook of `phase`, collecting failures instead of stopping
    async fn run_cleanup_hooks(
        &self,
        instance: &Instance,
        phase: HookPhase,
        ctx: &Context,
        rt: &Runtime<'_>,
        failures: &mut HookFailures,
    ) {
        for hook in instance.scenario.hooks.phase(phase) {
            if let Err(error) = self.run_hook(instance, phase, hook, ctx, rt).await {
                tracing::warn!(instance = %instance.label, %phase, hook = %hook, error = %error, "hook failed");
                failures.push(phase, hook.clone(), error);
            }
        }
    }

    /// Recover faults still in place, most recent first
    async fn rollback_faults(
        &self,
        instance: &Instance,
        ctx: &Context,
        faults: Vec<Arc<Action>>,
        rt: &Runtime<'_>,
        failures: &mut HookFailures,
    ) {
        let phase = HookPhase::Rollback;
        for action in faults.into_iter().rev() {
            let name = action.name();
            self.observers
                .notify("hook_start", |o| o.on_hook_start(instance, phase, name, ctx));
            match action.rollback(ctx, rt).await {
                Ok(outcome) => {
                    let outcome = outcome.unwrap_or_default();
                    self.observers
                        .notify("hook_end", |o| o.on_hook_end(instance, phase, name, ctx, &outcome));
                }
                Err(error) => {
                    tracing::error!(instance = %instance.label, action = name, error = %error, "fault recovery failed");
                    self.observers
                        .notify("hook_error", |o| o.on_hook_error(instance, phase, name, ctx, &error));
                    failures.push(phase, name, error);
                }
            }
        }
    }
}

/// Keep `faults` in step with chaos steps: injection adds, rollback removes.
/// An `interrupted` injection is tracked even when it would have recovered
/// itself.
fn track_fault(step: &Step, action: &Arc<Action>, faults: &mut Vec<Arc<Action>>, interrupted: bool) {
    let Action::Chaos(chaos) = action.as_ref() else {
        return;
    };
    if step.rollback {
        faults.retain(|f| !Arc::ptr_eq(f, action));
    } else if chaos.recover.is_some()
        && (chaos.leaves_fault() || interrupted)
        && !faults.iter().any(|f| Arc::ptr_eq(f, action))
    {
        faults.push(Arc::clone(action));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{MockAction, MockReply};
    use crate::observer::Observer;
    use crate::scenario::{Hooks, Scenario};
    use std::sync::Mutex;

    fn ok(stdout: &str) -> MockReply {
        MockReply {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    fn fail(message: &str) -> MockReply {
        MockReply {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn calls(registry: &ActionRegistry, name: &str) -> usize {
        match registry.get(name).map(|a| a.as_ref()) {
            Some(Action::Mock(m)) => m.calls(),
            _ => panic!("no mock named {name}"),
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Observer for Recorder {
        fn on_testcase_end(&self, _: &Instance, _: &Context, success: bool) -> Result<()> {
            self.push(format!("end:{}", success));
            Ok(())
        }
        fn on_step_start(&self, _: &Instance, step: &Step, attempt: u32, _: &Context) -> Result<()> {
            self.push(format!("step:{}:{}", step.name, attempt));
            Ok(())
        }
        fn on_step_end(&self, _: &Instance, step: &Step, _: &Context, _: &Outcome) -> Result<()> {
            self.push(format!("step_end:{}", step.name));
            Ok(())
        }
        fn on_hook_start(&self, _: &Instance, phase: HookPhase, hook: &str, _: &Context) -> Result<()> {
            self.push(format!("{}:{}", phase, hook));
            Ok(())
        }
    }

    struct Exploding;

    impl Observer for Exploding {
        fn on_step_end(&self, _: &Instance, _: &Step, _: &Context, _: &Outcome) -> Result<()> {
            panic!("observer exploded");
        }
        fn on_testcase_start(&self, _: &Instance, _: &Context) -> Result<()> {
            Err(Error::Observer("cannot reach sink".to_string()))
        }
    }

    fn scenario(steps: Vec<Step>, hooks: Hooks) -> Instance {
        let mut scenario = Scenario::new("case");
        scenario.steps = steps;
        scenario.hooks = hooks;
        Arc::new(scenario).instances().next().unwrap()
    }

    fn hooks(before: &[&str], after: &[&str], on_fail: &[&str]) -> Hooks {
        let own = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Hooks {
            before: own(before),
            after: own(after),
            on_fail: own(on_fail),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_runs_after_hooks_once() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::scripted(
                "flaky",
                vec![fail("refused"), fail("refused"), ok("up")],
            )))
            .unwrap();
        for name in ["setup", "teardown", "alert"] {
            registry
                .insert(Action::Mock(MockAction::new(name, ok(""))))
                .unwrap();
        }
        let registry = Arc::new(registry);
        let recorder = Arc::new(Recorder::default());
        let engine = Engine::new(registry.clone())
            .with_observers(Observers::new().with(recorder.clone()));

        let instance = scenario(
            vec![Step::new("flaky", "flaky").with_retry(3)],
            hooks(&["setup"], &["teardown"], &["alert"]),
        );
        let start = Instant::now();
        let execution = engine.run(&instance).await.unwrap();

        assert_eq!(calls(&registry, "flaky"), 3);
        assert_eq!(calls(&registry, "teardown"), 1);
        assert_eq!(calls(&registry, "alert"), 0);
        assert!(execution.hook_failures.is_empty());
        assert_eq!(execution.context.get("last_stdout"), Some(&serde_json::json!("up")));
        // Two back-offs of the default second
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            recorder.events(),
            vec![
                "before:setup",
                "step:flaky:1",
                "step:flaky:2",
                "step:flaky:3",
                "step_end:flaky",
                "after:teardown",
                "end:true",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_runs_every_on_fail_hook_and_returns_step_error() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::new("broken", fail("connection refused"))))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("setup", ok(""))))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("teardown", ok(""))))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("dump_logs", fail("disk full"))))
            .unwrap();
        let mut notify = MockAction::new("notify", ok("sent"));
        notify.cmd = Some("notify {{last_error}}".to_string());
        registry.insert(Action::Mock(notify)).unwrap();
        let registry = Arc::new(registry);

        let engine = Engine::new(registry.clone());
        let instance = scenario(
            vec![Step::new("broken", "broken").with_retry(2)],
            hooks(&["setup"], &["teardown"], &["dump_logs", "notify"]),
        );
        let execution = engine.execute(&instance).await;

        assert_eq!(calls(&registry, "setup"), 1);
        assert_eq!(calls(&registry, "broken"), 2);
        assert_eq!(calls(&registry, "dump_logs"), 1);
        assert_eq!(calls(&registry, "notify"), 1);
        assert_eq!(calls(&registry, "teardown"), 0);

        match &execution.result {
            Err(Error::Backend { message, .. }) => assert_eq!(message, "connection refused"),
            other => panic!("Expected the step's backend error, got {other:?}"),
        }
        assert_eq!(execution.hook_failures.len(), 1);
        let failure = execution.hook_failures.iter().next().unwrap();
        assert_eq!((failure.phase, failure.hook.as_str()), (HookPhase::OnFail, "dump_logs"));
        assert!(execution.context.get("last_error").is_some());
    }

    #[tokio::test]
    async fn test_before_hook_failure_skips_steps() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::new("prepare", MockReply {
                return_code: 2,
                ..Default::default()
            })))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("work", ok(""))))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("alert", ok(""))))
            .unwrap();
        let registry = Arc::new(registry);

        let engine = Engine::new(registry.clone());
        let instance = scenario(
            vec![Step::new("work", "work")],
            hooks(&["prepare"], &[], &["alert"]),
        );
        let err = engine.run(&instance).await.unwrap_err();

        assert!(matches!(&err, Error::Hook { phase, .. } if phase == "before"));
        assert_eq!(err.code(), "HOOK_FAILED");
        assert_eq!(calls(&registry, "work"), 0);
        assert_eq!(calls(&registry, "alert"), 1);
    }

    #[tokio::test]
    async fn test_after_hook_failure_is_reported_not_propagated() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::new("work", ok(""))))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("cleanup", fail("gone"))))
            .unwrap();
        registry
            .insert(Action::Mock(MockAction::new("cleanup2", ok(""))))
            .unwrap();
        let registry = Arc::new(registry);

        let execution = Engine::new(registry.clone())
            .run(&scenario(
                vec![Step::new("work", "work")],
                hooks(&[], &["cleanup", "cleanup2"], &[]),
            ))
            .await
            .unwrap();
        assert_eq!(execution.hook_failures.len(), 1);
        assert_eq!(calls(&registry, "cleanup2"), 1);
    }

    #[tokio::test]
    async fn test_misbehaving_observer_does_not_change_result() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::new("work", ok("done"))))
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let engine = Engine::new(Arc::new(registry)).with_observers(
            Observers::new()
                .with(Arc::new(Exploding))
                .with(recorder.clone()),
        );

        let execution = engine
            .run(&scenario(vec![Step::new("work", "work")], Hooks::default()))
            .await
            .unwrap();
        assert!(execution.passed());
        assert!(recorder.events().contains(&"step_end:work".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expectation_failure_is_retried() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::scripted(
                "status",
                vec![ok("Primary=none"), ok("Primary=node2")],
            )))
            .unwrap();
        let registry = Arc::new(registry);

        let step = Step::new("status", "status")
            .with_retry(2)
            .with_expectation(Expectation::contains("Primary=node2"));
        Engine::new(registry.clone())
            .run(&scenario(vec![step], Hooks::default()))
            .await
            .unwrap();
        assert_eq!(calls(&registry, "status"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_eventually_without_retry() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::new("status", ok("Primary=none"))))
            .unwrap();
        let registry = Arc::new(registry);
        let cancel = Cancellation::new();
        let engine = Engine::new(registry.clone()).with_cancellation(cancel.clone());

        let step = Step::new("status", "status")
            .with_retry(5)
            .with_expectation(Expectation::eventually(
                "Primary=node2",
                Duration::from_secs(60),
                Duration::from_millis(100),
            ));
        let instance = scenario(vec![step], Hooks::default());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = engine.run(&instance).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_step_timeout() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Local(crate::action::LocalProcessAction::new(
                "slow", "sleep 5",
            )))
            .unwrap();
        let step = Step::new("slow", "slow").with_timeout(Duration::from_millis(200));
        let err = Engine::new(Arc::new(registry))
            .run(&scenario(vec![step], Hooks::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_injected_fault_is_recovered_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("recovered");
        let mut registry = ActionRegistry::new();
        registry
            .load_str(
                &format!(
                    r#"
- name: partition
  type: chaos
  inject: "true"
  recover: "touch {}"
- name: bad_recover
  type: chaos
  inject: "true"
  recover: "exit 3"
- name: check
  type: mock
  fail: "replica unreachable"
"#,
                    marker.display()
                ),
                std::path::Path::new("actions.yaml"),
            )
            .unwrap();

        let execution = Engine::new(Arc::new(registry))
            .execute(&scenario(
                vec![
                    Step::new("partition", "partition"),
                    Step::new("bad_recover", "bad_recover"),
                    Step::new("check", "check"),
                ],
                Hooks::default(),
            ))
            .await;

        assert!(marker.exists());
        // Failed recovery is reported alongside, the step error stays primary
        assert!(matches!(&execution.result, Err(Error::Backend { message, .. }) if message == "replica unreachable"));
        let failed: Vec<&str> = execution
            .hook_failures
            .iter()
            .map(|f| f.hook.as_str())
            .collect();
        assert_eq!(failed, vec!["bad_recover"]);
    }

    #[cfg(unix)]
    fn held_fault(marker: &std::path::Path, auto_recover: bool) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .load_str(
                &format!(
                    r#"
- name: partition
  type: chaos
  inject: "true"
  recover: "touch {}"
  duration_secs: 30
  auto_recover: {}
"#,
                    marker.display(),
                    auto_recover
                ),
                std::path::Path::new("actions.yaml"),
            )
            .unwrap();
        registry
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fault_recovered_when_hold_times_out() {
        for auto_recover in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("recovered");
            let step = Step::new("partition", "partition").with_timeout(Duration::from_millis(200));

            let execution = Engine::new(Arc::new(held_fault(&marker, auto_recover)))
                .execute(&scenario(vec![step], Hooks::default()))
                .await;

            assert!(matches!(execution.result, Err(Error::StepTimeout { .. })));
            assert!(marker.exists(), "auto_recover={auto_recover}: fault left in place");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fault_recovered_when_hold_cancelled() {
        for auto_recover in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("recovered");
            let cancel = Cancellation::new();
            let engine = Engine::new(Arc::new(held_fault(&marker, auto_recover)))
                .with_cancellation(cancel.clone());

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                trigger.cancel();
            });

            let execution = engine
                .execute(&scenario(
                    vec![Step::new("partition", "partition")],
                    Hooks::default(),
                ))
                .await;

            assert!(matches!(execution.result, Err(Error::Cancelled)));
            assert!(marker.exists(), "auto_recover={auto_recover}: fault left in place");
            assert!(execution.hook_failures.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_mock_restarts_for_each_instance() {
        let mut registry = ActionRegistry::new();
        registry
            .insert(Action::Mock(MockAction::scripted(
                "flaky",
                vec![fail("refused"), ok("up")],
            )))
            .unwrap();
        let registry = Arc::new(registry);
        let engine = Engine::new(registry.clone());

        let mut case = Scenario::new("case");
        case.matrix = crate::scenario::Matrix::from([(
            "n".to_string(),
            vec![serde_json::json!(1), serde_json::json!(2)],
        )]);
        case.steps = vec![Step::new("flaky", "flaky")];
        let mut passed = Vec::new();
        for instance in Arc::new(case).instances() {
            passed.push(engine.execute(&instance).await.passed());
        }

        assert_eq!(passed, vec![false, false]);
        assert_eq!(calls(&registry, "flaky"), 2);
    }
}
