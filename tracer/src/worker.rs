//! Traceroute worker pool: tool selection, subprocess execution, persistence.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cyberwatch_common::db::queries::{get_or_create_target, insert_measurement};
use cyberwatch_common::queue::TargetQueue;
use cyberwatch_common::resilience::RateLimiter;
use sqlx::PgPool;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::parse::{parse_scamper_hops, parse_traceroute_hops, ParsedHop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Scamper,
    Traceroute,
}

impl Tool {
    #[must_use]
    pub const fn binary_name(self) -> &'static str {
        match self {
            Self::Scamper => "scamper",
            Self::Traceroute => "traceroute",
        }
    }
}

/// Pick `scamper` if it is on `PATH`, else `traceroute`; error if neither is.
pub fn pick_tool(which: impl Fn(&str) -> bool) -> anyhow::Result<Tool> {
    if which(Tool::Scamper.binary_name()) {
        Ok(Tool::Scamper)
    } else if which(Tool::Traceroute.binary_name()) {
        Ok(Tool::Traceroute)
    } else {
        anyhow::bail!("neither scamper nor traceroute is available on PATH")
    }
}

#[must_use]
pub fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
    })
}

/// Result of one subprocess run.
pub struct TraceResult {
    pub success: bool,
    pub raw_output: String,
    pub hops: Vec<ParsedHop>,
}

/// Run the chosen tool against `target` and parse its output.
pub async fn run_traceroute(tool: Tool, target: &str) -> anyhow::Result<TraceResult> {
    let mut command = match tool {
        Tool::Scamper => {
            let mut c = Command::new("scamper");
            c.args(["-c", "trace -P icmp", "-O", "text", "-i", target]);
            c
        }
        Tool::Traceroute => {
            let mut c = Command::new("traceroute");
            c.args(["-n", target]);
            c
        }
    };

    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let raw_output = String::from_utf8_lossy(&output.stdout).to_string();
    let hops = match tool {
        Tool::Scamper => parse_scamper_hops(&raw_output),
        Tool::Traceroute => parse_traceroute_hops(&raw_output),
    };

    let success = output.status.success() && !hops.is_empty();

    Ok(TraceResult { success, raw_output, hops })
}

/// A bounded pool of traceroute tasks fed by the work queue.
pub struct Worker {
    pool: PgPool,
    queue: TargetQueue,
    rate_limiter: Arc<RateLimiter>,
    semaphore: Arc<Semaphore>,
    task_timeout: Duration,
    tool: Tool,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        queue: TargetQueue,
        rate_limit_per_minute: u32,
        max_concurrent: usize,
        task_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let tool = pick_tool(binary_on_path)?;
        info!(tool = tool.binary_name(), "selected traceroute tool");

        Ok(Self {
            pool,
            queue,
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_per_minute, Duration::from_secs(60))),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            task_timeout,
            tool,
        })
    }

    /// Pull one task off the queue (blocking up to 1s) and, if present,
    /// spawn a handler for it. Returns immediately either way.
    pub async fn step(&self) -> anyhow::Result<()> {
        let Some(task) = self.queue.dequeue(1.0).await? else {
            return Ok(());
        };

        self.rate_limiter.acquire().await;

        let permit = self.semaphore.clone().acquire_owned().await?;
        let pool = self.pool.clone();
        let tool = self.tool;
        let timeout = self.task_timeout;

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_task(&pool, tool, &task.target_ip, &task.source, timeout).await {
                error!(target = %task.target_ip, error = %e, "traceroute task failed");
            }
        });

        Ok(())
    }
}

/// Run one measurement end-to-end and persist it.
///
/// On timeout the in-flight subprocess is abandoned and nothing is written;
/// at-least-once delivery means a future remeasurement covers it.
async fn handle_task(
    pool: &PgPool,
    tool: Tool,
    target_ip: &str,
    source: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let started_at = Utc::now();

    let result = match tokio::time::timeout(timeout, run_traceroute(tool, target_ip)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(target = target_ip, error = %e, "traceroute subprocess failed");
            TraceResult { success: false, raw_output: String::new(), hops: Vec::new() }
        }
        Err(_) => {
            warn!(target = target_ip, "traceroute task timed out, dropping");
            return Ok(());
        }
    };

    let completed_at = Utc::now();
    let target = get_or_create_target(pool, target_ip, source).await?;

    let hops: Vec<(i32, Option<String>, Option<f64>)> = result
        .hops
        .iter()
        .map(|h| (h.hop_number, h.ip.clone(), h.rtt_ms))
        .collect();

    insert_measurement(
        pool,
        target.id,
        tool.binary_name(),
        started_at,
        Some(completed_at),
        result.success,
        &result.raw_output,
        &hops,
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_scamper_when_both_are_present() {
        let which = |name: &str| name == "scamper" || name == "traceroute";
        assert_eq!(pick_tool(which).unwrap(), Tool::Scamper);
    }

    #[test]
    fn falls_back_to_traceroute_when_scamper_absent() {
        let which = |name: &str| name == "traceroute";
        assert_eq!(pick_tool(which).unwrap(), Tool::Traceroute);
    }

    #[test]
    fn refuses_to_start_when_neither_is_present() {
        let which = |_: &str| false;
        assert!(pick_tool(which).is_err());
    }
}
