//! Shared domain types for the MiroFlow runtime.
//!
//! Everything here is provider- and transport-agnostic: the message model,
//! tool call/result envelopes, token accounting, task traces, the workspace
//! error type, and the run configuration.

pub mod config;
pub mod error;
pub mod tool;
pub mod trace;
pub mod usage;

pub use error::{Error, Result};
