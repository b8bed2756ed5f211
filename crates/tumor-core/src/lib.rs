//! Core types and utilities for fine-tuning a tumor patch classifier.
//!
//! Provides the error type, the TOML run configuration, the fixed class
//! mapping, evaluation metrics and logging setup shared by the other
//! workspace crates and tools.

pub mod error;
pub mod types;
pub mod config;
pub mod metrics;
pub mod cli;

pub use error::{Error, Result};
pub use types::*;
pub use config::*;
pub use metrics::*;
pub use cli::*;

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
    pub use crate::config::*;
    pub use crate::metrics::*;
}
