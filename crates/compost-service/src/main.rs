//! Compost Monitor - sampling, durable logging, cloud sync and dashboard.
//!
//! Run with: `cargo run -p compost-service`

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use time::UtcOffset;
use tracing::{info, warn};

use compost_core::{SampleSource, SensorBackend, SimulatedSensor, SysfsSensor, SystemClock};
use compost_service::{
    AppState, BackendKind, Config, Scheduler, SyncAgent, ToggleControl, ToggleSignal, WebServer,
};
use compost_store::DurableLog;

/// Compost Monitor - local-first telemetry logger.
#[derive(Parser, Debug)]
#[command(name = "compost-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Log directory (overrides config).
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Disable remote sync regardless of config.
    #[arg(long, global = true)]
    no_sync: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor in the foreground (default behavior).
    Run,

    /// Write the full log as CSV.
    Export {
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete every record and reset the id counter.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Validate the configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("compost_service=info".parse()?)
                .add_directive("compost_store=info".parse()?)
                .add_directive("compost_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Export { output }) => export(&config, output),
        Some(Command::Clear { yes }) => clear(&config, yes),
        Some(Command::CheckConfig) => {
            println!("Configuration OK");
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Run) | None => run(config).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(dir) = &args.dir {
        config.storage.dir = dir.clone();
    }
    if args.no_sync {
        config.sync.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn open_log(config: &Config) -> anyhow::Result<DurableLog> {
    DurableLog::open(&config.storage.dir, config.storage.log_options())
        .with_context(|| format!("Failed to open log in {}", config.storage.dir.display()))
}

fn export(config: &Config, output: Option<PathBuf>) -> anyhow::Result<()> {
    let log = open_log(config)?;
    let bytes = log.export_all()?;

    match output {
        Some(path) => {
            std::fs::write(&path, &bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn clear(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("Refusing to clear the log without --yes");
    }
    let mut log = open_log(config)?;
    let last_id = log.last_id();
    log.clear()?;
    eprintln!("Cleared {} record(s) from {}", last_id, log.path().display());
    Ok(())
}

fn sensor_backend(config: &Config) -> Box<dyn SensorBackend> {
    match config.sensor.backend {
        BackendKind::Sysfs => Box::new(
            SysfsSensor::new(config.sensor.sysfs.clone()).with_conversion_timeout(
                Duration::from_millis(config.sensor.conversion_timeout_ms),
            ),
        ),
        BackendKind::Simulated => {
            Box::new(SimulatedSensor::new(config.sensor.calibration.adc_max))
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    // A log that cannot be opened is fatal; the supervisor restarts us.
    let log = open_log(&config)?;
    info!(
        "Log {} ready, next id {}",
        log.path().display(),
        log.last_id() + 1
    );

    let offset = UtcOffset::from_hms(config.sensor.utc_offset_hours, 0, 0)?;
    let backend = sensor_backend(&config);
    info!("Sensor backend: {}", backend.name());
    let source = SampleSource::with_clock(
        backend,
        SystemClock::with_offset(offset),
        config.sensor.calibration,
    );

    let state = AppState::new(log, config.clone());

    let signal = Arc::new(ToggleSignal::new());
    #[cfg(unix)]
    compost_service::control::spawn_signal_listener(Arc::clone(&signal))
        .context("Failed to install SIGUSR1 handler")?;

    let mut control = ToggleControl::new(
        signal,
        config.control.debounce(),
        WebServer::new(config.server.bind.clone(), Arc::clone(&state))
            .with_shutdown_grace(config.control.shutdown_grace()),
    );
    if let Err(e) = control.start_if(config.control.web_enabled_at_start).await {
        warn!("Web server not started: {}", e);
    }

    let mut scheduler =
        Scheduler::new(Arc::clone(&state), source, config.schedule.clone()).with_control(control);
    if config.sync.enabled {
        let agent = SyncAgent::new(&config.sync)?;
        info!("Syncing to {}", agent.endpoint());
        scheduler = scheduler.with_sync(agent);
    } else {
        info!("Remote sync disabled");
    }

    let task = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    state.scheduler.signal_stop();
    task.await?;

    Ok(())
}
