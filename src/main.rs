//! wasm-pool CLI entry point.
//!
//! Runs configured WebAssembly command tools through bounded instance pools.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasm_pool_common::{ConfigFile, ToolEntry};
use wasm_pool_core::{
    InputBinding, InstancePool, Instantiator, OutputBinding, ResourceLimits, RunArgs, RunContext,
};
use wasm_pool_host::{HostCapabilities, WasiHost};

#[derive(Debug, Parser)]
#[command(name = "wasm-pool", version, about = "Run sandboxed WebAssembly tools")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "WASM_POOL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a tool once and exit with its status.
    Run {
        /// Name of a tool from the configuration file.
        #[arg(required_unless_present = "module", conflicts_with = "module")]
        tool: Option<String>,

        /// Run this module file instead of a configured tool.
        #[arg(long)]
        module: Option<PathBuf>,

        /// Feed this process's stdin to the tool.
        #[arg(long)]
        stdin: bool,

        /// Abort the run after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Arguments passed to the tool after `argv[0]`.
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Compile and validate every configured tool.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wasm_pool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?,
        None => ConfigFile::default(),
    };

    match cli.command {
        Command::Run {
            tool,
            module,
            stdin,
            timeout_ms,
            args,
        } => {
            let entry = match (tool, module) {
                (Some(name), _) => config
                    .tool(&name)
                    .cloned()
                    .with_context(|| format!("Unknown tool '{name}'"))?,
                (None, Some(path)) => adhoc_entry(&path)?,
                (None, None) => bail!("Either a tool name or --module is required"),
            };

            let limits = ResourceLimits {
                timeout: timeout_ms.map(Duration::from_millis),
                ..Default::default()
            };
            let code = run(&config, &entry, stdin, limits, args).await?;
            std::process::exit(i32::try_from(code).unwrap_or(i32::MAX));
        }
        Command::Check => check(&config).await,
    }
}

async fn run(
    config: &ConfigFile,
    entry: &ToolEntry,
    stdin: bool,
    limits: ResourceLimits,
    args: Vec<String>,
) -> anyhow::Result<u32> {
    let pool = build_pool(config, entry)?;
    pool.init(&RunContext::background(), max_concurrency(config, entry))
        .await?;

    let (ctx, cancel) = RunContext::background().child();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let stdout = pool.capture();
    let stderr = pool.capture();
    let mut request = RunArgs::new(args)
        .stdout(OutputBinding::Capture(stdout.clone()))
        .stderr(OutputBinding::Capture(stderr.clone()))
        .limits(limits);
    if stdin {
        request = request.stdin(InputBinding::Inherit);
    }

    let result = pool.run(&ctx, request).await;

    let mut out = std::io::stdout().lock();
    out.write_all(&stdout.contents())?;
    out.flush()?;
    std::io::stderr().write_all(&stderr.contents())?;

    let code = result?;
    info!(tool = %entry.name, exit_code = code, "Tool finished");
    Ok(code)
}

async fn check(config: &ConfigFile) -> anyhow::Result<()> {
    if config.tools.is_empty() {
        bail!("No tools configured");
    }

    let mut failed = 0;
    for entry in &config.tools {
        let result = match build_pool(config, entry) {
            Ok(pool) => pool
                .init(&RunContext::background(), max_concurrency(config, entry))
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => info!(tool = %entry.name, path = %entry.path, "OK"),
            Err(e) => {
                error!(tool = %entry.name, path = %entry.path, error = %e, "Check failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} tools failed", config.tools.len());
    }
    Ok(())
}

fn build_pool(config: &ConfigFile, entry: &ToolEntry) -> anyhow::Result<InstancePool> {
    let source = std::fs::read(&entry.path)
        .with_context(|| format!("Failed to read module '{}'", entry.path))?;

    let mut caps = HostCapabilities::builder();
    if entry.guest_log {
        caps = caps.enable_guest_log();
    }
    for (key, value) in &entry.env {
        caps = caps.env(key, value);
    }
    let host = WasiHost::new(caps.build())?;

    Ok(
        InstancePool::new(Instantiator::new(entry.name.as_str(), host, source))
            .with_engine_config(config.runtime.engine.clone())
            .with_execution_config(config.runtime.execution.clone()),
    )
}

fn max_concurrency(config: &ConfigFile, entry: &ToolEntry) -> usize {
    entry
        .max_concurrency
        .unwrap_or(config.runtime.pool.max_concurrency)
}

fn adhoc_entry(path: &Path) -> anyhow::Result<ToolEntry> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Cannot derive a tool name from '{}'", path.display()))?;

    Ok(ToolEntry {
        name: name.to_string(),
        path: path.display().to_string(),
        max_concurrency: None,
        guest_log: false,
        env: Default::default(),
    })
}
