//! testbed - declarative test orchestration
//!
//! Scenarios are data: ordered steps, a parameter matrix, lifecycle hooks
//! and expectations. The engine runs every matrix instance of a scenario
//! against named actions (local processes, database statements, remote
//! commands, injected faults, mocks) and reports each lifecycle event to a
//! set of observers.

pub mod action;
pub mod cli;
pub mod commands;
pub mod common;
pub mod context;
pub mod engine;
pub mod expect;
pub mod observer;
pub mod runner;
pub mod scenario;
pub mod template;

// Re-export commonly used types for tests
pub use action::{Action, ActionRegistry, Invocation, Outcome};
pub use common::{Error, Result};
pub use context::{Context, Vars};
pub use engine::{Engine, Execution};
pub use scenario::{Instance, Scenario};
