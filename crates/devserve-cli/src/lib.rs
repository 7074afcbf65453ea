//! devserve CLI.
//!
//! - [`cli`] - flag definitions
//! - [`config`] - configuration file discovery
//! - [`commands`] - running the server until interrupted
//! - [`error`] - error types and `miette` reporting
//! - [`logger`] - tracing setup

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;

pub use error::{CliError, Result};
