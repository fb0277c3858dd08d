//! Expectations and their verification
//!
//! An expectation has at most one containment mode (immediate or
//! eventually) and an optional return-code check that composes with either.
//! The eventually mode is a bounded poll: re-probe the backend every
//! `poll_interval` until the output contains the needle or `timeout`
//! elapses, then fail with the last observed outcome.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::action::Outcome;
use crate::common::{Cancellation, Error, Result};
use crate::template::{render, Variables};

/// Accepted return code(s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReturnCodes {
    One(i32),
    AnyOf(BTreeSet<i32>),
}

impl ReturnCodes {
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            ReturnCodes::One(expected) => *expected == code,
            ReturnCodes::AnyOf(set) => set.contains(&code),
        }
    }
}

impl fmt::Display for ReturnCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCodes::One(code) => write!(f, "{}", code),
            ReturnCodes::AnyOf(set) => {
                let codes: Vec<String> = set.iter().map(|c| c.to_string()).collect();
                write!(f, "one of [{}]", codes.join(", "))
            }
        }
    }
}

/// Bounded-retry containment check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eventually {
    /// Needle template, rendered against the context before polling
    pub contains: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Containment mode of an expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Containment {
    /// Output must contain the rendered text after a single invocation
    Immediate(String),
    /// Output must come to contain the rendered text within a time bound
    Eventually(Eventually),
}

/// A declared pass/fail condition for one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectation {
    pub containment: Option<Containment>,
    pub return_code: Option<ReturnCodes>,
}

impl Expectation {
    pub fn contains(text: impl Into<String>) -> Self {
        Self {
            containment: Some(Containment::Immediate(text.into())),
            return_code: None,
        }
    }

    pub fn eventually(text: impl Into<String>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            containment: Some(Containment::Eventually(Eventually {
                contains: text.into(),
                timeout,
                poll_interval,
            })),
            return_code: None,
        }
    }

    pub fn with_return_code(mut self, codes: ReturnCodes) -> Self {
        self.return_code = Some(codes);
        self
    }

    pub fn eventually_mode(&self) -> Option<&Eventually> {
        match &self.containment {
            Some(Containment::Eventually(ev)) => Some(ev),
            _ => None,
        }
    }

    /// Human-readable form used in failure reports
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match &self.containment {
            Some(Containment::Immediate(text)) => parts.push(format!("contains \"{}\"", text)),
            Some(Containment::Eventually(ev)) => parts.push(format!(
                "eventually contains \"{}\" within {:?} (every {:?})",
                ev.contains, ev.timeout, ev.poll_interval
            )),
            None => {}
        }
        if let Some(codes) = &self.return_code {
            parts.push(format!("return code {}", codes));
        }
        if parts.is_empty() {
            "nothing".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Fail with `ReturnCodeMismatch` if `codes` rejects the outcome
pub fn check_return_code(outcome: &Outcome, codes: &ReturnCodes, invocation: &str) -> Result<()> {
    if codes.accepts(outcome.return_code) {
        return Ok(());
    }
    Err(Error::ReturnCodeMismatch {
        invocation: invocation.to_string(),
        expected: codes.clone(),
        outcome: Box::new(outcome.clone()),
    })
}

/// Verify a finished outcome against an expectation
///
/// Needles are rendered against `vars` first. For the eventually mode the
/// polling has already happened inside the action's `run`; here the final
/// outcome is checked once more so a stale outcome can never pass.
pub fn verify(
    outcome: &Outcome,
    expectation: &Expectation,
    vars: &dyn Variables,
    invocation: &str,
) -> Result<()> {
    match &expectation.containment {
        Some(Containment::Immediate(text)) => {
            let needle = render(text, vars)?;
            if !outcome.stdout.contains(&needle) {
                return Err(Error::AssertionFailed {
                    invocation: invocation.to_string(),
                    expected: needle,
                    outcome: Box::new(outcome.clone()),
                });
            }
        }
        Some(Containment::Eventually(ev)) => {
            let needle = render(&ev.contains, vars)?;
            if !outcome.stdout.contains(&needle) {
                return Err(Error::EventuallyTimeout {
                    invocation: invocation.to_string(),
                    expected: needle,
                    timeout: ev.timeout,
                    last: Box::new(outcome.clone()),
                });
            }
        }
        None => {}
    }

    if let Some(codes) = &expectation.return_code {
        check_return_code(outcome, codes, invocation)?;
    }

    Ok(())
}

/// Poll `probe` until its outcome contains `needle` (and, when given,
/// carries an accepted return code) or `timeout` elapses
///
/// The first probe happens immediately; later probes are spaced by
/// `poll_interval`, with the final sleep clipped so the last probe lands on
/// the deadline. Backend errors count as "not yet" while time remains; any
/// other error ends the loop at once. Cancellation interrupts the sleep and
/// yields `Error::Cancelled`.
pub async fn poll_until<F, Fut>(
    needle: &str,
    timeout: Duration,
    poll_interval: Duration,
    return_codes: Option<&ReturnCodes>,
    invocation: &str,
    cancel: &Cancellation,
    mut probe: F,
) -> Result<Outcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outcome>>,
{
    let start = Instant::now();
    let mut last: Option<Outcome> = None;
    let mut last_error: Option<Error> = None;
    let mut polls: u32 = 0;

    loop {
        polls += 1;
        match cancel.race(probe()).await? {
            Ok(outcome) => {
                let code_ok = return_codes.map_or(true, |c| c.accepts(outcome.return_code));
                if code_ok && outcome.stdout.contains(needle) {
                    tracing::debug!(polls, elapsed_ms = start.elapsed().as_millis() as u64, "eventually satisfied");
                    return Ok(outcome);
                }
                last = Some(outcome);
            }
            Err(e @ Error::Backend { .. }) => {
                tracing::debug!(polls, error = %e, "probe failed, retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            tracing::debug!(polls, "eventually timed out");
            return match last {
                Some(outcome) => Err(Error::EventuallyTimeout {
                    invocation: invocation.to_string(),
                    expected: needle.to_string(),
                    timeout,
                    last: Box::new(outcome),
                }),
                None => Err(last_error.unwrap_or_else(|| {
                    Error::Internal("poll loop ended without an observation".to_string())
                })),
            };
        }

        cancel.sleep(poll_interval.min(timeout - elapsed)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Vars;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn out(stdout: &str, rc: i32) -> Outcome {
        Outcome {
            stdout: stdout.to_string(),
            return_code: rc,
            ..Default::default()
        }
    }

    #[test]
    fn test_contains_renders_needle() {
        let vars = Vars::from([("node".to_string(), json!("node1"))]);
        let exp = Expectation::contains("Primary={{node}}");
        verify(&out("Primary=node1\n", 0), &exp, &vars, "status").unwrap();

        let err = verify(&out("Primary=node2\n", 0), &exp, &vars, "status").unwrap_err();
        match err {
            Error::AssertionFailed { expected, outcome, .. } => {
                assert_eq!(expected, "Primary=node1");
                assert_eq!(outcome.stdout, "Primary=node2\n");
            }
            other => panic!("Expected AssertionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_return_code_set_composes_with_contains() {
        let vars = Vars::new();
        let exp = Expectation::contains("ok")
            .with_return_code(ReturnCodes::AnyOf(BTreeSet::from([0, 2])));
        verify(&out("ok", 2), &exp, &vars, "cmd").unwrap();

        let err = verify(&out("ok", 1), &exp, &vars, "cmd").unwrap_err();
        assert!(matches!(err, Error::ReturnCodeMismatch { .. }));
        assert!(err.to_string().contains("one of [0, 2]"));
    }

    #[test]
    fn test_missing_needle_variable_is_template_error() {
        let exp = Expectation::contains("{{nope}}");
        let err = verify(&out("", 0), &exp, &Vars::new(), "cmd").unwrap_err();
        assert!(matches!(err, Error::Template { .. }));
    }

    #[test]
    fn test_describe_lists_modes() {
        let exp = Expectation::eventually("up", Duration::from_secs(1), Duration::from_millis(100))
            .with_return_code(ReturnCodes::One(0));
        let text = exp.describe();
        assert!(text.contains("eventually contains \"up\""));
        assert!(text.contains("return code 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_succeeds_on_third_poll() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancellation::new();
        let start = Instant::now();

        let probe_calls = calls.clone();
        let outcome = poll_until(
            "ready",
            Duration::from_secs(1),
            Duration::from_millis(100),
            None,
            "probe",
            &cancel,
            move || {
                let n = probe_calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(out(if n >= 3 { "ready" } else { "starting" }, 0)) }
            },
        )
        .await
        .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(outcome.stdout, "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_times_out_with_last_output() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = Cancellation::new();
        let start = Instant::now();

        let probe_calls = calls.clone();
        let err = poll_until(
            "ready",
            Duration::from_millis(300),
            Duration::from_millis(100),
            None,
            "probe",
            &cancel,
            move || {
                let n = probe_calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(out(&format!("attempt {n}"), 0)) }
            },
        )
        .await
        .unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(300));
        let polls = calls.load(Ordering::SeqCst);
        match err {
            Error::EventuallyTimeout { last, expected, .. } => {
                assert_eq!(expected, "ready");
                assert_eq!(last.stdout, format!("attempt {polls}"));
            }
            other => panic!("Expected EventuallyTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_waits_for_accepted_return_code() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe_calls = calls.clone();
        let outcome = poll_until(
            "accepting",
            Duration::from_secs(5),
            Duration::from_millis(50),
            Some(&ReturnCodes::One(0)),
            "pg_isready",
            &Cancellation::new(),
            move || {
                let n = probe_calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(out("accepting", if n < 2 { 1 } else { 0 })) }
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.return_code, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe_calls = calls.clone();
        let outcome = poll_until(
            "1 row",
            Duration::from_secs(2),
            Duration::from_millis(100),
            None,
            "select 1",
            &Cancellation::new(),
            move || {
                let n = probe_calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::backend("select 1", "connection refused"))
                    } else {
                        Ok(out("(1 row)", 0))
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.stdout, "(1 row)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_poll_promptly() {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = poll_until(
            "never",
            Duration::from_secs(30),
            Duration::from_millis(100),
            None,
            "probe",
            &cancel,
            || async { Ok(out("nope", 0)) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
