//! Common utilities shared by the engine, the loader and the CLI

pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use cancel::Cancellation;
pub use error::{Error, ErrorReport, Result};
