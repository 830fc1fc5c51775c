use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tollgate_core::api::{BoundedWorkRunner, CliError, ItemFailure};

use super::cli::{ProcessArgs, ProcessMode};
use super::emit;

#[derive(Debug, Serialize)]
pub struct ProcessReport {
    pub mode: &'static str,
    pub items: usize,
    pub completed: usize,
    /// Input indices in completion order (stream mode only).
    pub completion_order: Vec<usize>,
    pub pressure_pauses: u32,
    pub forced_admissions: u32,
    pub elapsed_ms: u64,
    pub failure: Option<String>,
}

fn render(r: &ProcessReport) -> String {
    let mut out = format!(
        "{} run: {}/{} items in {}ms",
        r.mode, r.completed, r.items, r.elapsed_ms
    );
    if r.mode == "stream" {
        out.push_str(&format!(
            ", {} pressure pauses, {} forced admissions",
            r.pressure_pauses, r.forced_admissions
        ));
    }
    if let Some(failure) = &r.failure {
        out.push_str(&format!("\n  failed: {failure}"));
    }
    out
}

pub async fn run(runner: &BoundedWorkRunner, args: &ProcessArgs) -> ProcessReport {
    let work = Duration::from_millis(args.work_ms);
    let fail_at = args.fail_at;
    let processor = move |index: usize| async move {
        tokio::time::sleep(work).await;
        match fail_at {
            Some(bad) if bad == index => Err(format!("item {index} rejected")),
            _ => Ok(index),
        }
    };
    let items: Vec<usize> = (0..args.items).collect();
    let start = Instant::now();

    let mut report = ProcessReport {
        mode: match args.mode {
            ProcessMode::Batch => "batch",
            ProcessMode::Stream => "stream",
        },
        items: args.items,
        completed: 0,
        completion_order: Vec::new(),
        pressure_pauses: 0,
        forced_admissions: 0,
        elapsed_ms: 0,
        failure: None,
    };

    let failed = |report: &mut ProcessReport, e: ItemFailure<String>| {
        report.completed = e.completed;
        report.failure = Some(e.to_string());
    };

    match args.mode {
        ProcessMode::Batch => {
            let size = args.concurrency.unwrap_or(runner.options().batch_size);
            match runner.batch_with(items, size, processor).await {
                Ok(done) => report.completed = done.len(),
                Err(e) => failed(&mut report, e),
            }
        }
        ProcessMode::Stream => {
            let concurrency = args
                .concurrency
                .unwrap_or(runner.options().stream_concurrency);
            match runner.stream_with(items, concurrency, processor).await {
                Ok(outcome) => {
                    report.completed = outcome.len();
                    report.completion_order = outcome.completion_order();
                    report.pressure_pauses = outcome.pressure_pauses;
                    report.forced_admissions = outcome.forced_admissions;
                }
                Err(e) => failed(&mut report, e),
            }
        }
    }
    report.elapsed_ms = start.elapsed().as_millis() as u64;
    report
}

pub async fn handle_process(runner: &BoundedWorkRunner, args: ProcessArgs, json: bool) -> Result<i32, CliError> {
    let report = run(runner, &args).await;
    emit(json, &report, || render(&report))?;
    Ok(if report.failure.is_some() { 1 } else { 0 })
}
