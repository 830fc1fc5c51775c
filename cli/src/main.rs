use clap::Parser;
mod commands;
use commands::cli;
use std::sync::Arc;
use tollgate_core::api::{AppConfig, AppContext, CliError, ErrorCode, LoggingConfig};
use tollgate_plugins::services::PluginServicesFactory;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

fn load_config(args: &cli::Args) -> Result<AppConfig, CliError> {
    let cfg = match args.config.as_deref() {
        Some(path) => tollgate_core::api::load_from_path(path),
        None => tollgate_core::api::load_default(),
    }
    .map_err(|e| CliError::Config(format!("{e:#}")))?;
    Ok(cfg)
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = load_config(&args)?;
    init_tracing(&cfg.logging).map_err(CliError::Command)?;

    let ctx = AppContext::new(cfg, Some(Arc::new(PluginServicesFactory)));
    dispatch(args, &ctx).await
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 1: command ran but reported a refusal / failed item
    // 11: config error
    // 20: IO error
    // 50: governor/runtime failure
    match e {
        CliError::Config(_) => 11,
        CliError::Governor(ge) => match ge.error_code() {
            ErrorCode::ConfigError => 11,
            _ => 50,
        },
        CliError::Io(_) => 20,
        CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

async fn dispatch(args: cli::Args, ctx: &AppContext) -> Result<i32, CliError> {
    let services = ctx.build_services().await?;
    let json = args.json;
    match args.command {
        cli::Commands::Status => {
            commands::status::handle_status(&services, json)?;
            Ok(0)
        }
        cli::Commands::Store(store_args) => {
            commands::store::handle_store(store_args, &services.store, json).await
        }
        cli::Commands::Simulate(sim_args) => {
            let retries = ctx.cfg().retry.max_attempts;
            commands::simulate::handle_simulate(&services, sim_args, retries, json).await
        }
        cli::Commands::Monitor(mon_args) => {
            let interval = ctx.cfg().memory.monitor_interval_ms;
            commands::monitor::handle_monitor(&services.memory, mon_args, interval, json).await
        }
        cli::Commands::Process(proc_args) => {
            // Background checks reclaim on their own while the run is long.
            if let Some(interval) = tollgate_plugins::factory::monitor_interval(ctx.cfg()) {
                services.memory.start_monitoring(interval);
            }
            let exit = commands::process::handle_process(&services.runner, proc_args, json).await;
            services.memory.stop_monitoring();
            exit
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("tollgate"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("tollgate.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::api::GovernorError;

    #[test]
    fn exit_codes_by_error_class() {
        assert_eq!(exit_code_for_error(&CliError::Config("bad".into())), 11);
        assert_eq!(
            exit_code_for_error(&CliError::Governor(GovernorError::UnknownChannel("x".into()))),
            11
        );
        assert_eq!(
            exit_code_for_error(&CliError::Governor(GovernorError::RetriesExhausted {
                attempts: 3,
                last_error: "down".into(),
                history: Vec::new(),
            })),
            50
        );
        assert_eq!(
            exit_code_for_error(&CliError::Io(std::io::Error::other("disk"))),
            20
        );
    }

    #[tokio::test]
    async fn missing_factory_is_a_config_error() {
        let ctx = AppContext::new(AppConfig::default(), None);
        let args = cli::Args::try_parse_from(["tollgate", "status"]).unwrap();
        let err = dispatch(args, &ctx).await.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 11);
    }
}
