//! Common types, errors, and configuration for wasm-runner.
//!
//! This crate provides shared functionality used across the wasm-runner workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine and the served function
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{DEFAULT_REPLICAS, EngineConfig, MAX_REPLICAS, RunnerConfig, validate_replicas};
pub use config_file::{ConfigFile, ConfigFileError};
pub use error::RuntimeError;
