//! # Geodrive
//!
//! Drives the simulated rover through a short RC session.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (path from the first argument, defaults otherwise)
//!    - Set up logging with tracing subscriber, plus a rolling file if configured
//!    - Connect to the simulated rover
//!
//! 2. **Main Loop**
//!    - Stream RC channels at the configured rate
//!    - Ramp throttle up from neutral and back down
//!    - Poll and record telemetry every `poll_interval_ms`
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Stop the RC stream (channels back to neutral)
//!    - Disconnect
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- geodrive.toml
//! ```

use anyhow::{bail, Context, Result};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use geodrive::client::AsyncRoverClient;
use geodrive::communicator::sim::SimulatedRover;
use geodrive::config::{Config, ConnectionConfig, LoggingConfig};
use geodrive::protocol::channels::RC_CHANNEL_VALUE_NEUTRAL;
use geodrive::protocol::Channel;
use geodrive::telemetry::TelemetryRecorder;

/// Throttle at the top of the demo ramp
const RAMP_PEAK: u16 = 1700;

/// Telemetry polls from neutral to peak (and back)
const RAMP_HALF_STEPS: usize = 20;

/// Polls between status log messages
const LOG_INTERVAL_POLLS: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading config {}", path))?,
        None => Config::default(),
    };

    let _log_guard = init_logging(&config.logging)?;

    info!("Geodrive v{} starting...", env!("CARGO_PKG_VERSION"));

    run(&config).await
}

/// Initializes tracing; the returned guard flushes the log file on drop.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log filter")?;

    let (file_layer, guard) = match &logging.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "geodrive.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Throttle for a given poll: a triangle from neutral up to the peak and back.
///
/// Returns `None` once the ramp is complete.
fn ramp_throttle(step: usize) -> Option<u16> {
    let total = RAMP_HALF_STEPS * 2;
    if step > total {
        return None;
    }
    let distance = if step <= RAMP_HALF_STEPS { step } else { total - step };
    let span = usize::from(RAMP_PEAK - RC_CHANNEL_VALUE_NEUTRAL);
    let offset = span * distance / RAMP_HALF_STEPS;
    // offset <= span, which fits u16
    Some(RC_CHANNEL_VALUE_NEUTRAL + offset as u16)
}

/// Turns a refused connect (`Ok(false)`) into an error.
fn ensure_connected(connected: bool, connection: &ConnectionConfig) -> Result<()> {
    if !connected {
        bail!(
            "rover at {}:{} refused the connection",
            connection.host,
            connection.port
        );
    }
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    let client = AsyncRoverClient::from_config(SimulatedRover::new(), config);
    info!(
        "Connecting to simulated rover (configured target {}:{})",
        config.connection.host, config.connection.port
    );
    ensure_connected(client.connect().await?, &config.connection)?;

    let mut recorder = if config.telemetry.enabled {
        Some(TelemetryRecorder::from_config(&config.telemetry)?)
    } else {
        None
    };

    client.movement().start_rc_stream().await;
    let channels = client.movement().rc_channels().clone();

    let mut poll = interval(Duration::from_millis(config.telemetry.poll_interval_ms));
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Running throttle ramp to {}", RAMP_PEAK);
    info!("Press Ctrl+C to exit");

    let mut step = 0;

    // Main control loop
    loop {
        tokio::select! {
            _ = poll.tick() => {
                let Some(throttle) = ramp_throttle(step) else {
                    info!("Throttle ramp complete");
                    break;
                };
                channels.set(Channel::Throttle, throttle)?;

                let telemetry = client.get_telemetry().await?;
                debug!("Telemetry: {:?}", telemetry);
                if let Some(recorder) = recorder.as_mut() {
                    recorder.record(&telemetry)?;
                }

                if step % LOG_INTERVAL_POLLS == 0 {
                    info!(
                        "throttle={} position=({:.2}, {:.2}) battery={:.2}V",
                        throttle,
                        telemetry.position[0],
                        telemetry.position[1],
                        client.get_battery_voltage().await?
                    );
                }
                step += 1;
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Err(e) = client.movement().stop_rc_stream().await {
        error!("RC stream ended with error: {}", e);
    }
    client.disconnect().await?;

    if let Some(recorder) = recorder.as_ref() {
        info!("Recorded {} telemetry samples", recorder.total_records());
    }
    info!("Total polls: {}", step);

    Ok(())
}
