//! Throughput measurement for the `bench` command.

use std::fmt;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use tracing::debug;
use workrpc_common::transport::Transport;

use crate::compute::ComputeClient;

/// Outcome of a benchmark run.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub calls: usize,
    pub concurrency: usize,
    pub failures: usize,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn calls_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.calls as f64 / secs
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} calls ({} in flight) in {:.3}s: {:.0} calls/s, {} failed",
            self.calls,
            self.concurrency,
            self.elapsed.as_secs_f64(),
            self.calls_per_sec(),
            self.failures
        )
    }
}

/// Issues `calls` echo calls with at most `concurrency` outstanding.
pub async fn run_bench<T: Transport>(
    client: &ComputeClient<T>,
    calls: usize,
    concurrency: usize,
) -> BenchReport {
    let concurrency = concurrency.max(1);
    let start = Instant::now();

    let failures = stream::iter(0..calls)
        .map(|i| async move { client.echo(&format!("bench-{}", i)).await })
        .buffer_unordered(concurrency)
        .filter(|result| {
            if let Err(e) = result {
                debug!("Bench call failed: {}", e);
            }
            futures_util::future::ready(result.is_err())
        })
        .count()
        .await;

    BenchReport {
        calls,
        concurrency,
        failures,
        elapsed: start.elapsed(),
    }
}
