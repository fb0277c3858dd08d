//! Per-instance log files
//!
//! One plain-text file per scenario instance, holding every rendered
//! invocation with its output. The file is what a developer reads to
//! replay a failed run by hand.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::Observer;
use crate::action::{Invocation, Outcome};
use crate::common::{Error, Result};
use crate::context::Context;
use crate::scenario::{HookPhase, Instance, InstanceKey, Step};

#[derive(Default)]
struct LogFiles {
    open: HashMap<InstanceKey, BufWriter<File>>,
    /// Every path handed out this run
    claimed: HashSet<PathBuf>,
}

pub struct FileLogObserver {
    dir: PathBuf,
    files: Mutex<LogFiles>,
}

impl FileLogObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Mutex::new(LogFiles::default()),
        })
    }

    /// Log file of an instance label
    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{}.log", file_stem(label)))
    }

    /// First free path for `instance`; a clashing label gets a numbered file
    fn claim(&self, files: &mut LogFiles, instance: &Instance) -> PathBuf {
        let mut path = self.path_for(&instance.label);
        let mut n = 1;
        while files.claimed.contains(&path) {
            n += 1;
            path = self
                .dir
                .join(format!("{}.{}.log", file_stem(&instance.label), n));
        }
        files.claimed.insert(path.clone());
        path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, instance: &Instance, text: &str) -> Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| Error::Observer("log file table poisoned".to_string()))?;
        let Some(file) = files.open.get_mut(&instance.key()) else {
            return Ok(());
        };
        writeln!(file, "{}", text)?;
        Ok(())
    }

    fn write_outcome(&self, instance: &Instance, outcome: &Outcome) -> Result<()> {
        self.write(
            instance,
            &format!(
                "  return_code: {}\n  duration_ms: {}\n  stdout:\n{}  stderr:\n{}",
                outcome.return_code,
                outcome.duration.as_millis(),
                indent(&outcome.stdout),
                indent(&outcome.stderr)
            ),
        )
    }
}

/// File-system safe form of an instance label
fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '=' | ',' => c,
            _ => '_',
        })
        .collect()
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {}\n", l)).collect()
}

impl Observer for FileLogObserver {
    fn name(&self) -> &str {
        "file-log"
    }

    fn on_testcase_start(&self, instance: &Instance, ctx: &Context) -> Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| Error::Observer("log file table poisoned".to_string()))?;
        let path = self.claim(&mut files, instance);
        let mut file = BufWriter::new(File::create(&path)?);
        writeln!(file, "# {}", instance.label)?;
        for (key, value) in ctx.vars() {
            writeln!(file, "# {} = {}", key, value)?;
        }
        files.open.insert(instance.key(), file);
        Ok(())
    }

    fn on_testcase_end(&self, instance: &Instance, _ctx: &Context, success: bool) -> Result<()> {
        self.write(
            instance,
            if success { "== PASSED" } else { "== FAILED" },
        )?;
        let file = self
            .files
            .lock()
            .map_err(|_| Error::Observer("log file table poisoned".to_string()))?
            .open
            .remove(&instance.key());
        if let Some(mut file) = file {
            file.flush()?;
        }
        Ok(())
    }

    fn on_testcase_error(&self, instance: &Instance, _ctx: &Context, error: &Error) -> Result<()> {
        self.write(instance, &format!("!! {}: {}", error.code(), error))
    }

    fn on_step_start(
        &self,
        instance: &Instance,
        step: &Step,
        attempt: u32,
        _ctx: &Context,
    ) -> Result<()> {
        self.write(
            instance,
            &format!("\n[step {}] attempt {}/{}", step.name, attempt, step.retry),
        )
    }

    fn on_invocation(
        &self,
        instance: &Instance,
        source: &str,
        invocation: &Invocation,
    ) -> Result<()> {
        self.write(instance, &format!("  ({}) $ {}", source, invocation))
    }

    fn on_step_end(
        &self,
        instance: &Instance,
        _step: &Step,
        _ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        self.write_outcome(instance, outcome)?;
        self.write(instance, "  => ok")
    }

    fn on_step_error(
        &self,
        instance: &Instance,
        _step: &Step,
        _ctx: &Context,
        error: &Error,
        outcome: Option<&Outcome>,
    ) -> Result<()> {
        if let Some(outcome) = outcome {
            self.write_outcome(instance, outcome)?;
        }
        self.write(instance, &format!("  => {}", error))
    }

    fn on_hook_start(
        &self,
        instance: &Instance,
        phase: HookPhase,
        hook: &str,
        _ctx: &Context,
    ) -> Result<()> {
        self.write(instance, &format!("\n[{} hook {}]", phase, hook))
    }

    fn on_hook_end(
        &self,
        instance: &Instance,
        _phase: HookPhase,
        _hook: &str,
        _ctx: &Context,
        outcome: &Outcome,
    ) -> Result<()> {
        self.write_outcome(instance, outcome)
    }

    fn on_hook_error(
        &self,
        instance: &Instance,
        _phase: HookPhase,
        _hook: &str,
        _ctx: &Context,
        error: &Error,
    ) -> Result<()> {
        self.write(instance, &format!("  => {}", error))
    }
}
