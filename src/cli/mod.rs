//! CLI command handling
//!
//! Dispatches CLI commands to the runner and formats output.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::{Commands, Sources};
use crate::common::config::Config;
use crate::common::{Cancellation, Error, Result};
use crate::engine::Engine;
use crate::observer::{
    ConsoleObserver, FileLogObserver, JsonReportObserver, LoggingObserver, Observers,
    SummaryObserver,
};
use crate::observer::summary::Summary;
use crate::runner::{self, Plan, RunOptions, RunResults};

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(command: Commands, config: Config, verbose: bool) -> Result<i32> {
    match command {
        Commands::Run {
            sources,
            filter,
            jobs,
            fail_fast,
            report,
            log_dir,
        } => {
            let plan = load_plan(&sources, &config)?;
            let instances = plan.instances(filter.as_deref());
            if instances.is_empty() {
                println!("No scenario instances match");
                return Ok(0);
            }

            let options = RunOptions {
                jobs: jobs.unwrap_or(config.runner.jobs).max(1),
                fail_fast: fail_fast || config.runner.fail_fast,
            };

            let summary = Arc::new(SummaryObserver::new());
            let mut observers = Observers::new()
                .with(Arc::new(LoggingObserver))
                .with(Arc::new(ConsoleObserver::new(verbose, options.jobs > 1)))
                .with(summary.clone());

            let report = report.map(|path| (path, Arc::new(JsonReportObserver::new())));
            if let Some((_, observer)) = &report {
                observers.push(observer.clone());
            }
            if let Some(dir) = log_dir.or_else(|| config.logging.per_instance_dir.clone()) {
                let files = FileLogObserver::new(dir)?;
                println!("Instance logs: {}", files.dir().display());
                observers.push(Arc::new(files));
            }

            let cancel = Cancellation::new();
            let Plan { registry, .. } = plan;
            let engine = Engine::new(Arc::new(registry))
                .with_observers(observers)
                .with_config(config.engine.clone())
                .with_backends(config.backends.clone())
                .with_cancellation(cancel.clone());

            let interrupt = runner::cancel_on_ctrl_c(cancel);
            let results = runner::run_instances(&engine, instances, &options).await;
            interrupt.abort();

            if let Some((path, observer)) = &report {
                observer.write_to(path)?;
                println!("Report written to {}", path.display());
            }

            print_results(&results, &summary.summary());
            Ok(results.exit_code())
        }

        Commands::Validate { sources } => {
            let plan = load_plan(&sources, &config)?;
            let instances = plan.instances(None).len();
            println!(
                "{} {} actions, {} scenarios, {} instances",
                "✓".green().bold(),
                plan.registry.len(),
                plan.scenarios.len(),
                instances
            );
            Ok(0)
        }

        Commands::List { sources, filter } => {
            let plan = load_plan(&sources, &config)?;
            for scenario in &plan.scenarios {
                let labels: Vec<String> = scenario
                    .instances()
                    .map(|i| i.label)
                    .filter(|l| filter.as_deref().map_or(true, |f| l.contains(f)))
                    .collect();
                if labels.is_empty() {
                    continue;
                }
                match &scenario.description {
                    Some(desc) => println!("{} - {}", scenario.name.bold(), desc.dimmed()),
                    None => println!("{}", scenario.name.bold()),
                }
                for label in labels {
                    println!("  {}", label);
                }
            }
            Ok(0)
        }
    }
}

/// Resolve definition paths, falling back to the configured directories
fn resolve_sources(sources: &Sources, config: &Config) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let scenarios = if sources.scenarios.is_empty() {
        config.paths.scenarios.iter().cloned().collect::<Vec<_>>()
    } else {
        sources.scenarios.clone()
    };
    if scenarios.is_empty() {
        return Err(Error::Config(
            "no scenario files given and no [paths] scenarios configured".to_string(),
        ));
    }

    let actions = if sources.actions.is_empty() {
        config.paths.actions.iter().cloned().collect()
    } else {
        sources.actions.clone()
    };

    Ok((actions, scenarios))
}

fn load_plan(sources: &Sources, config: &Config) -> Result<Plan> {
    let (actions, scenarios) = resolve_sources(sources, config)?;
    Plan::load(&actions, &scenarios, &config.engine)
}

fn print_results(results: &RunResults, summary: &Summary) {
    println!();
    let mut parts = vec![
        format!("{} passed", summary.passed).green().to_string(),
        if summary.failed > 0 {
            format!("{} failed", summary.failed).red().to_string()
        } else {
            format!("{} failed", summary.failed)
        },
    ];
    if !results.skipped.is_empty() {
        parts.push(format!("{} skipped", results.skipped.len()).yellow().to_string());
    }
    println!("{} {}", "Results:".bold(), parts.join(", "));

    for execution in &results.executions {
        for failure in execution.hook_failures.iter() {
            println!("  {} {}: {}", "!".yellow(), execution.label, failure);
        }
    }
    for execution in results.failures() {
        if let Err(e) = &execution.result {
            println!("  {} {}: {}", "✗".red(), execution.label, e);
        }
    }

    if let Some(first) = results.first_failure() {
        if let Err(e) = &first.result {
            eprintln!("Error: {}: {}", first.label, e);
        }
    } else if !results.skipped.is_empty() {
        eprintln!("Error: {} instances were not run", results.skipped.len());
    }
}
