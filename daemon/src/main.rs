//! alarm-receiver-daemon: Contact-ID alarm receiver for a single phone line
//!
//! This daemon runs on the receiver board and provides:
//! - DTMF symbol decoding from the decoder chip's latch strobe
//! - The handshake, receive and kiss-off cycle on a dedicated timing thread
//! - Dial tone and kiss-off generation by software PWM
//! - A control socket for status queries, resets and test frames

mod config;
mod decoder;
mod events;
mod frame;
mod hardware;
mod ipc;
mod lifecycle;
mod line;
mod logging;
mod status;
mod tone;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{Backend, Config};
use crate::decoder::{install_edge_handler, SymbolLatch};
use crate::events::LineEvent;
use crate::hardware::{HardwareIo, SimulatedHardware, SysfsGpio};
use crate::ipc::{ControlContext, Server};
use crate::lifecycle::ShutdownSignal;
use crate::line::{spawn_timing_thread, LineStateMachine};
use crate::status::StatusPort;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let log_control = logging::init(config.debug_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "alarm-receiver-daemon starting"
    );
    info!(?config.socket_path, backend = ?config.backend, "configuration loaded");
    config.ensure_dirs()?;

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let hardware: Arc<dyn HardwareIo> = match config.backend {
        Backend::Sysfs => Arc::new(
            SysfsGpio::open(&config.gpio, &config.pins).context("failed to open GPIO")?,
        ),
        Backend::Sim => {
            warn!("running on simulated hardware, no line will be answered");
            Arc::new(SimulatedHardware::new(config.pins))
        }
    };

    // Decoder strobe -> symbol latch
    let latch = Arc::new(SymbolLatch::new());
    install_edge_handler(Arc::clone(&hardware), config.pins, Arc::clone(&latch))
        .context("failed to install latch edge handler")?;

    let status = StatusPort::new(i64::from(config.debug_level));

    // Timing thread -> control server and event log
    let (event_tx, _) = broadcast::channel::<LineEvent>(64);
    let (line_handle, line_commands) = line::channel(16);

    let machine = LineStateMachine::new(
        Arc::clone(&hardware),
        config.pins,
        latch,
        config.tones,
        config.timings,
        status.clone(),
        event_tx.clone(),
    );
    let timing = spawn_timing_thread(machine, line_commands, config.rt_priority)
        .context("failed to spawn timing thread")?;

    let context = ControlContext::new(
        status,
        line_handle.clone(),
        event_tx.clone(),
        Some(log_control),
    );
    let server = Server::new(&config.socket_path, context)?;

    let mut event_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Trace every line event
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => debug!(%event, "line event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "line event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("line event stream closed");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    line_handle.shutdown().await;
    match tokio::task::spawn_blocking(move || timing.join()).await {
        Ok(Ok(())) => debug!("timing thread joined"),
        Ok(Err(_)) => error!("timing thread panicked"),
        Err(e) => error!(?e, "failed to join timing thread"),
    }

    server.shutdown().await;
    hardware.shutdown();

    info!("alarm-receiver-daemon stopped");

    Ok(())
}
