//! EspMon-RS - Main Entry Point
//!
//! Runs the telemetry hub headless until SIGINT/SIGTERM:
//!
//! ```text
//! espmon [settings.toml]
//! ```

use anyhow::Context;
use espmon_rs::{config::LoggingSettings, HubSettings, TelemetryHub};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let settings = match std::env::args_os().nth(1) {
        Some(path) => HubSettings::load(PathBuf::from(path))?,
        None => HubSettings::load_default()?,
    };

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&settings.logging)?;

    tracing::info!("Starting EspMon-RS {}", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(TelemetryHub::open(settings).context("Failed to open registry")?);
    let running = hub.start().context("Failed to start UDP listener")?;

    let terminate = Arc::new(AtomicBool::new(false));
    for signal in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*signal, terminate.clone())
            .context("Failed to register signal handler")?;
    }

    let warnings = hub.registry().warnings();
    while !terminate.load(Ordering::SeqCst) {
        // Persistence warnings are already logged; draining keeps the queue short
        while warnings.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("Shutting down...");
    running.shutdown();
    hub.registry().close();

    Ok(())
}

fn init_logging(settings: &LoggingSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));

    if !settings.file_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    }

    let dir = match &settings.log_dir {
        Some(dir) => dir.clone(),
        None => espmon_rs::config::ensure_app_data_dir()?.join("logs"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {:?}", dir))?;

    let appender = tracing_appender::rolling::daily(&dir, "espmon.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    Ok(Some(guard))
}
