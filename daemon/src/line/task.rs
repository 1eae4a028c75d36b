//! Dedicated timing thread
//!
//! The state machine runs on its own OS thread with a single-threaded
//! runtime, so control-channel traffic on the main runtime never delays a
//! digit sample. The thread asks for SCHED_FIFO and carries on at normal
//! priority when the platform refuses.

use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::machine::{LineCommand, LineStateMachine};

#[derive(Debug, thiserror::Error)]
pub enum PriorityError {
    #[error("real-time priority disabled by configuration")]
    Disabled,

    #[error("priority {0} outside the SCHED_FIFO range")]
    OutOfRange(i32),

    #[error("scheduler refused SCHED_FIFO: {0}")]
    Refused(std::io::Error),

    #[error("real-time scheduling is not supported on this platform")]
    Unsupported,
}

/// Request SCHED_FIFO at `priority` for the calling thread. 0 disables.
pub fn request_realtime_priority(priority: i32) -> Result<(), PriorityError> {
    if priority == 0 {
        return Err(PriorityError::Disabled);
    }
    set_fifo(priority)
}

#[cfg(target_os = "linux")]
fn set_fifo(priority: i32) -> Result<(), PriorityError> {
    // SAFETY: plain queries with a valid policy constant
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    if priority < min || priority > max {
        return Err(PriorityError::OutOfRange(priority));
    }

    // SAFETY: sched_param is plain data; zeroed is a valid value
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;

    // SAFETY: param outlives the call and pthread_self is the calling thread
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(PriorityError::Refused(std::io::Error::from_raw_os_error(rc)));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_fifo(_priority: i32) -> Result<(), PriorityError> {
    Err(PriorityError::Unsupported)
}

/// Start `machine` on the `line-timing` thread
pub fn spawn_timing_thread(
    mut machine: LineStateMachine,
    commands: mpsc::Receiver<LineCommand>,
    rt_priority: i32,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("line-timing".to_string())
        .spawn(move || {
            match request_realtime_priority(rt_priority) {
                Ok(()) => info!(priority = rt_priority, "timing thread running with SCHED_FIFO"),
                Err(PriorityError::Disabled) => debug!("real-time priority disabled"),
                Err(e) => warn!(error = %e, "continuing at normal priority"),
            }

            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(?e, "failed to build timing runtime");
                    return;
                }
            };

            runtime.block_on(machine.run(commands));
            debug!(state = %machine.state(), "timing thread exiting");
        })
}
