//! Line state machine module
//!
//! Provides the handshake/receive/acknowledge cycle:
//! - Idle: dial tone, polling for off-hook
//! - AwaitingOffHook: 1000 ms while the panel dials
//! - HandshakeDelay: 550 ms of panel handshake tones
//! - ReceivingDigits: sixteen 50 ms digit samples
//! - Acknowledging: 800 ms kiss-off

mod machine;
mod state;
mod task;

pub use machine::{LineCommand, LineStateMachine};
pub use state::{LineState, LineTimings};
pub use task::spawn_timing_thread;

use tokio::sync::{mpsc, oneshot};

use crate::decoder::Symbol;
use crate::frame::{Frame, FrameError};

#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("line timing task is not running")]
    Stopped,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Sending side of the timing task's command channel
#[derive(Debug, Clone)]
pub struct LineHandle {
    commands: mpsc::Sender<LineCommand>,
}

/// Create a command channel for a [`LineStateMachine`]
pub fn channel(capacity: usize) -> (LineHandle, mpsc::Receiver<LineCommand>) {
    let (tx, rx) = mpsc::channel(capacity);
    (LineHandle { commands: tx }, rx)
}

impl LineHandle {
    /// Force the line back to Idle, dropping any unfinished frame
    pub async fn reset(&self) -> Result<(), LineError> {
        self.commands
            .send(LineCommand::Reset)
            .await
            .map_err(|_| LineError::Stopped)
    }

    /// Publish a diagnostic frame as if it had been received
    pub async fn inject_test_frame(&self, symbols: Vec<Symbol>) -> Result<Frame, LineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(LineCommand::InjectTestFrame { symbols, reply })
            .await
            .map_err(|_| LineError::Stopped)?;
        let frame = response.await.map_err(|_| LineError::Stopped)??;
        Ok(frame)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(LineCommand::Shutdown).await;
    }
}
