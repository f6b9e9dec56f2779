use clap::Parser;
use taskmesh_cli::app;
use taskmesh_cli::commands::cli;
use taskmesh_core::api::{load_default, load_from_path, CliError, ExecutorError, LoggingConfig};
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

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = match args.config.as_deref() {
        Some(path) => load_from_path(path),
        None => load_default(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;
    init_tracing(&cfg.logging).map_err(CliError::Config)?;

    match args.command {
        cli::Commands::Run(run_args) => app::run_plan(run_args, cfg).await,
        cli::Commands::Validate(validate_args) => app::validate_plan(validate_args),
    }
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 1: run finished with failed tasks (returned as a normal exit code)
    // 11: config / plan error
    // 12: malformed task graph
    // 13: deadlock
    // 20: backend, event feed or IO error
    // 50: internal/uncategorized
    match e {
        CliError::Config(_) | CliError::Plan(_) => 11,
        CliError::Executor(ee) => match ee {
            ExecutorError::Config(_) => 11,
            ExecutorError::Deadlock { .. } => 13,
            ExecutorError::FeedClosed(_) | ExecutorError::Subscribe(_) => 20,
            other if other.is_structural() => 12,
            _ => 50,
        },
        CliError::Io(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

/// Writer for the optional log file; the guard lives until process exit.
fn file_writer(
    logging: &LoggingConfig,
) -> Result<Option<tracing_appender::non_blocking::NonBlocking>, String> {
    if !logging.file {
        return Ok(None);
    }

    let dir = logging
        .directory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("taskmesh"));
    std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;

    let appender =
        tracing_appender::rolling::never(dir, format!("taskmesh.{}.log", std::process::id()));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Ok(Some(writer))
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(&logging.level).map_err(|e| e.to_string())?,
    };

    let file = file_writer(logging)?;
    if !logging.console && file.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    // Logs go to stderr so the run report on stdout stays clean.
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });
    let file_layer = file.map(|w| tracing_subscriber::fmt::layer().with_writer(w).with_ansi(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
