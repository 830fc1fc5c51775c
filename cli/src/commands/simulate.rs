use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tollgate_core::api::{BreakerError, CliError, Deduplicator, GovernorError, LimiterStats, Services};

use super::cli::SimulateArgs;
use super::emit;

/// How one simulated call ended, shared by every caller coalesced onto it.
#[derive(Debug, Clone, PartialEq)]
enum CallFailure {
    BreakerOpen,
    Deadline,
    Failed(String),
}

#[derive(Debug, Default, Serialize)]
pub struct SimulationReport {
    pub channel: String,
    pub calls: usize,
    pub executions: usize,
    pub attempts: u32,
    pub succeeded: usize,
    pub exhausted: usize,
    pub timed_out: usize,
    pub breaker_rejected: usize,
    pub elapsed_ms: u64,
    pub limiter: Option<LimiterStats>,
}

fn render(r: &SimulationReport) -> String {
    let mut out = format!(
        "{} calls on '{}' in {}ms: {} executions ({} coalesced), {} attempts\n",
        r.calls,
        r.channel,
        r.elapsed_ms,
        r.executions,
        r.calls.saturating_sub(r.executions),
        r.attempts
    );
    out.push_str(&format!(
        "  succeeded {}  exhausted {}  timed out {}  rejected by breaker {}",
        r.succeeded, r.exhausted, r.timed_out, r.breaker_rejected
    ));
    out
}

pub async fn run(
    services: &Services,
    args: &SimulateArgs,
    default_retries: u32,
) -> Result<SimulationReport, CliError> {
    // Fail early on an unknown channel rather than once per call.
    services.facade.limiter(&args.channel)?;
    if !(0.0..=1.0).contains(&args.fail_rate) {
        return Err(CliError::Command(format!(
            "--fail-rate must be within 0..=1, got {}",
            args.fail_rate
        )));
    }

    let distinct = args.distinct.unwrap_or(args.calls).max(1);
    let retries = args.retries.unwrap_or(default_retries).max(1);
    let latency = Duration::from_millis(args.latency_ms);
    let fail_rate = args.fail_rate;
    let deadline = args.deadline_ms.map(Duration::from_millis);
    let dedupe: Deduplicator<String, CallFailure> = Deduplicator::new();
    let executions = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let calls = (0..args.calls).map(|i| {
        let key = format!("req-{}", i % distinct);
        let services = services.clone();
        let executions = executions.clone();
        let attempts = attempts.clone();
        let channel = args.channel.clone();
        let request = key.clone();
        dedupe.dedupe(&key, move || async move {
            executions.fetch_add(1, Ordering::Relaxed);
            let work = || {
                let attempts = attempts.clone();
                let request = request.clone();
                async move {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    let roll: f64 = rand::random();
                    tokio::time::sleep(latency).await;
                    if roll < fail_rate {
                        Err(format!("{request}: simulated upstream failure"))
                    } else {
                        Ok(format!("{request}: ok"))
                    }
                }
            };
            let call = async {
                match deadline {
                    Some(limit) => {
                        services
                            .facade
                            .call_with_deadline(&channel, retries, limit, work)
                            .await
                    }
                    None => services.facade.call(&channel, retries, work).await,
                }
            };
            services.breaker.call(call).await.map_err(|e| match e {
                BreakerError::Open { .. } => CallFailure::BreakerOpen,
                BreakerError::Inner(GovernorError::DeadlineExceeded(_)) => CallFailure::Deadline,
                BreakerError::Inner(other) => CallFailure::Failed(other.to_string()),
            })
        })
    });

    let outcomes = futures::future::join_all(calls.collect::<Vec<_>>()).await;

    let mut report = SimulationReport {
        channel: args.channel.clone(),
        calls: args.calls,
        ..SimulationReport::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(_) => report.succeeded += 1,
            Err(CallFailure::BreakerOpen) => report.breaker_rejected += 1,
            Err(CallFailure::Deadline) => report.timed_out += 1,
            Err(CallFailure::Failed(e)) => {
                tracing::debug!(error = %e, "simulated call failed");
                report.exhausted += 1;
            }
        }
    }
    report.executions = executions.load(Ordering::Relaxed);
    report.attempts = attempts.load(Ordering::Relaxed);
    report.elapsed_ms = start.elapsed().as_millis() as u64;
    report.limiter = services
        .facade
        .stats()
        .into_iter()
        .find(|s| s.channel == args.channel);
    Ok(report)
}

pub async fn handle_simulate(
    services: &Services,
    args: SimulateArgs,
    default_retries: u32,
    json: bool,
) -> Result<i32, CliError> {
    let report = run(services, &args, default_retries).await?;
    emit(json, &report, || render(&report))?;
    Ok(if report.succeeded == report.calls { 0 } else { 1 })
}
