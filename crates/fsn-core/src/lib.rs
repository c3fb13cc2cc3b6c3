//! Core configuration and error types for the fsn workspace.
//!
//! This crate provides the pieces shared by the watch engine and its hosts:
//!
//! - [`Config`] and its sections ([`WatchConfig`], [`OutputConfig`])
//! - [`ConfigError`] for configuration loading and validation failures

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{ColorScheme, Config, OutputConfig, OutputFormat, WatchConfig};
pub use error::ConfigError;
