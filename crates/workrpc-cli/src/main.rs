//! # workrpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve the compute interface on stdin/stdout (spawned by the commands below)
//! workrpc worker
//!
//! # Make one call through a child process (outputs raw JSON)
//! workrpc call echo '{"msg": "hi"}'
//!
//! # Same call through a worker thread
//! workrpc call fib '{"n": 50}' --transport thread
//!
//! # Throughput with 10k calls, 64 in flight
//! workrpc bench --calls 10000 --concurrency 64
//! ```
//!
//! Logs always go to stderr: stdout is the IPC channel in `worker` mode and
//! the result channel in `call` mode.

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use workrpc_cli::bench::run_bench;
use workrpc_cli::compute;
use workrpc_cli::launch::{launch, LaunchConfig, TransportKind};
use workrpc_worker::{serve_stdio, Dispatcher};

#[derive(FromArgs)]
/// workrpc - run expensive work in an isolated worker
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Worker(WorkerArgs),
    Call(CallArgs),
    Bench(BenchArgs),
}

/// Arguments for running as a worker.
///
/// Not normally run by hand: `call` and `bench` spawn the current executable
/// with this subcommand when using the process transport.
#[derive(FromArgs)]
#[argh(subcommand, name = "worker")]
/// serve the compute interface on stdin/stdout
struct WorkerArgs {}

/// Arguments for making a single call.
///
/// The result is printed as raw JSON on stdout, so the output can be piped
/// to other tools. Failures go to stderr with exit code 1.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a compute method and print its JSON result
struct CallArgs {
    /// name of the method to call (echo, shout, sleep, fib, pid)
    #[argh(positional)]
    method: String,

    /// JSON arguments for the method
    ///
    /// Defaults to `null`.
    #[argh(positional)]
    data: Option<String>,

    /// worker backend: process or thread
    #[argh(option, short = 't', default = "TransportKind::Process")]
    transport: TransportKind,

    /// worker executable for the process backend
    ///
    /// Falls back to the WORKRPC_WORKER_BIN env var, then to this executable.
    #[argh(option, long = "worker-bin")]
    worker_bin: Option<PathBuf>,
}

/// Arguments for the throughput benchmark.
#[derive(FromArgs)]
#[argh(subcommand, name = "bench")]
/// measure echo round-trip throughput
struct BenchArgs {
    /// worker backend: process or thread
    #[argh(option, short = 't', default = "TransportKind::Process")]
    transport: TransportKind,

    /// total number of calls
    #[argh(option, short = 'n', default = "10000")]
    calls: usize,

    /// calls kept in flight at once
    #[argh(option, short = 'c', default = "64")]
    concurrency: usize,

    /// worker executable for the process backend
    #[argh(option, long = "worker-bin")]
    worker_bin: Option<PathBuf>,
}

fn launch_config(transport: TransportKind, worker_bin: Option<PathBuf>) -> LaunchConfig {
    let mut config = LaunchConfig::new(transport);
    if let Some(worker_bin) = worker_bin {
        config = config.worker_bin(worker_bin);
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // `call` stays quiet unless asked, so its stderr only carries failures.
    let default_level = match cli.command {
        Commands::Call(_) => "warn",
        _ => "info",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Worker(WorkerArgs {}) => {
            serve_stdio(Dispatcher::new(compute::registry())).await?;
            Ok(())
        }
        Commands::Call(args) => run_call(args).await,
        Commands::Bench(args) => {
            let config = launch_config(args.transport, args.worker_bin);
            tracing::info!(transport = %args.transport, "Starting compute worker");

            let client = launch(&config)?;
            let report = run_bench(&client, args.calls, args.concurrency).await;
            client.terminate();

            println!("{}", report);
            if report.failures > 0 {
                anyhow::bail!("{} of {} calls failed", report.failures, report.calls);
            }
            Ok(())
        }
    }
}

/// Executes the `call` subcommand.
///
/// # Errors
///
/// Returns an error if:
/// - The data string is not valid JSON
/// - The worker can't be started
/// - The call itself fails
async fn run_call(args: CallArgs) -> Result<()> {
    let data: serde_json::Value = match &args.data {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Invalid JSON in data: {}", e))?,
        None => serde_json::Value::Null,
    };

    let mut config = launch_config(args.transport, args.worker_bin);
    if std::env::var_os("RUST_LOG").is_none() {
        config = config.worker_log("warn");
    }

    let client = launch(&config)?;
    let result = client.proxy().call_value(&args.method, data).await;
    client.terminate();

    println!("{}", serde_json::to_string(&result?)?);
    Ok(())
}
