use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tollgate_core::api::{CliError, MemoryEvent, MemoryGovernor};

use super::cli::MonitorArgs;
use super::emit;

fn render_event(event: &MemoryEvent) -> String {
    format!(
        "memory {} -> {}: {}MB used ({:.2}% of ceiling)",
        event.previous,
        event.current,
        event.sample.used_mb,
        event.sample.percent_used
    )
}

/// Print health transitions until Ctrl-C or `duration` elapses.
pub async fn watch(
    memory: &MemoryGovernor,
    interval: Duration,
    duration: Option<Duration>,
    json: bool,
) -> Result<usize, CliError> {
    let mut events = memory.subscribe();
    memory.start_monitoring(interval);

    let stats = memory.stats();
    emit(json, &stats, || stats.to_string())?;

    let stop = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C, monitoring until killed");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => match event {
                Ok(event) => {
                    seen += 1;
                    emit(json, &event, || render_event(&event))?;
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "monitor fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    memory.stop_monitoring();
    Ok(seen)
}

pub async fn handle_monitor(
    memory: &MemoryGovernor,
    args: MonitorArgs,
    default_interval_ms: u64,
    json: bool,
) -> Result<i32, CliError> {
    let interval = Duration::from_millis(args.interval_ms.unwrap_or(default_interval_ms).max(1));
    let duration = args.duration_secs.map(Duration::from_secs);
    watch(memory, interval, duration, json).await?;
    Ok(0)
}
