//! wasm-runner CLI entry point.
//!
//! Warm-starts one function and serves a single invocation: standard input
//! becomes the module's standard input, the module's standard output is
//! written to standard output, and diagnostics go to the log on stderr.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasm_runner_common::{ConfigFile, EngineConfig, RunnerConfig};
use wasm_runner_core::{FunctionRequest, FunctionRunner};

#[derive(Debug, Parser)]
#[command(name = "wasm-runner", version, about = "Run a WebAssembly function once")]
struct Cli {
    /// TOML configuration file with `[engine]` and `[function]` tables
    #[arg(short, long, env = "WASM_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Module root holding bin/<name>, data/<name>/ and run/<name>/
    #[arg(long, env = "WASM_RUNNER_ROOT")]
    root: Option<PathBuf>,

    /// Function name
    #[arg(short, long)]
    name: Option<String>,

    /// Execution timeout in milliseconds (0 disables it)
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Initial number of slots
    #[arg(short, long)]
    replicas: Option<u32>,

    /// Do not prefix relayed lines with <name>:<slot>
    #[arg(long)]
    no_log_prefix: bool,

    /// Enable fuel metering
    #[arg(long)]
    fuel: bool,

    /// Arguments passed to the module
    #[arg(last = true)]
    args: Vec<String>,
}

impl Cli {
    /// Merge the configuration file, if any, with command-line overrides.
    fn into_configs(self) -> anyhow::Result<(EngineConfig, RunnerConfig)> {
        let (mut engine, mut function) = match &self.config {
            Some(path) => {
                let file = ConfigFile::from_file(path)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                (file.engine, file.function)
            }
            None => {
                let name = self.name.clone().context("--name is required without --config")?;
                let root = self.root.clone().context("--root is required without --config")?;
                (EngineConfig::default(), RunnerConfig::new(name, root))
            }
        };

        if let Some(name) = self.name {
            function.name = name;
        }
        if let Some(root) = self.root {
            function.root = root;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            function = function.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(replicas) = self.replicas {
            function = function.with_replicas(replicas);
        }
        if self.no_log_prefix {
            function = function.with_log_prefix(false);
        }
        if !self.args.is_empty() {
            function = function.with_args(self.args);
        }
        engine.fuel_metering |= self.fuel;

        Ok((engine, function))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries the function's output, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wasm_runner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (engine_config, config) = Cli::parse().into_configs()?;

    info!(function = %config.name, root = %config.root.display(), "Starting wasm-runner");

    let runner = FunctionRunner::new(&engine_config, config, wasm_runner_host::default_bindings())
        .context("Warm start failed")?;

    let request = FunctionRequest::new(std::io::stdout()).with_input(std::io::stdin());
    let result = runner.run(request).await;
    runner.drain_logs().await;
    let result = result.context("Invocation failed")?;

    info!(
        invocation_id = %result.invocation_id,
        slot = result.slot,
        output_bytes = result.output_len,
        "Invocation completed"
    );

    Ok(())
}
