//! Line state machine
//!
//! Runs one receive cycle at a time: dial tone while Idle, the fixed
//! off-hook and handshake windows, sixteen digit samples and the kiss-off.
//! Every wait is a deadline on the tokio clock raced against the command
//! channel, so a reset or shutdown cuts a wait short immediately.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::decoder::{Symbol, SymbolLatch};
use crate::events::{FrameSource, LineEvent};
use crate::frame::{checksum_digit, Frame, FrameAssembler, FrameError, FRAME_LEN};
use crate::hardware::{HardwareError, HardwareIo, Pin, PinMap};
use crate::status::StatusPort;
use crate::tone::{ToneClass, ToneError, ToneSynthesizer, ToneTable};

use super::state::{LineState, LineTimings};

/// Requests delivered to the timing task
#[derive(Debug)]
pub enum LineCommand {
    /// Abort the current cycle and return to Idle
    Reset,
    /// Publish a frame built from `symbols` without a line event
    InjectTestFrame {
        symbols: Vec<Symbol>,
        reply: oneshot::Sender<Result<Frame, FrameError>>,
    },
    Shutdown,
}

/// How a wait ended
enum Wake {
    Elapsed,
    Reset,
    Stop,
}

/// Outcome of running the current state
enum Step {
    Next(LineState),
    Stay,
    Reset,
    Stop,
}

/// Hardware paths whose faults are tracked separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    LineRead,
    ToneOutput,
}

/// Outstanding faults, so each is logged once until it recovers
#[derive(Debug, Default)]
struct Faults {
    line_read: bool,
    tone_output: bool,
}

impl Faults {
    fn flag(&mut self, fault: Fault) -> &mut bool {
        match fault {
            Fault::LineRead => &mut self.line_read,
            Fault::ToneOutput => &mut self.tone_output,
        }
    }
}

impl Wake {
    fn then(self, next: Step) -> Step {
        match self {
            Wake::Elapsed => next,
            Wake::Reset => Step::Reset,
            Wake::Stop => Step::Stop,
        }
    }
}

pub struct LineStateMachine {
    state: LineState,
    state_entered_at: Instant,
    hw: Arc<dyn HardwareIo>,
    line_pin: Pin,
    latch: Arc<SymbolLatch>,
    tone: ToneSynthesizer,
    assembler: FrameAssembler,
    status: StatusPort,
    timings: LineTimings,
    event_tx: broadcast::Sender<LineEvent>,
    faults: Faults,
}

impl LineStateMachine {
    pub fn new(
        hw: Arc<dyn HardwareIo>,
        pins: PinMap,
        latch: Arc<SymbolLatch>,
        tones: ToneTable,
        timings: LineTimings,
        status: StatusPort,
        event_tx: broadcast::Sender<LineEvent>,
    ) -> Self {
        Self {
            state: LineState::Idle,
            state_entered_at: Instant::now(),
            tone: ToneSynthesizer::new(Arc::clone(&hw), pins.tone, tones),
            hw,
            line_pin: pins.line,
            latch,
            assembler: FrameAssembler::new(),
            status,
            timings,
            event_tx,
            faults: Faults::default(),
        }
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    /// Run until shutdown or until every command sender is dropped
    pub async fn run(&mut self, mut commands: mpsc::Receiver<LineCommand>) {
        info!("line state machine started in Idle state");
        self.state = LineState::Idle;
        self.state_entered_at = Instant::now();
        self.status.set_line_state(LineState::Idle);
        self.enter(LineState::Idle);

        loop {
            let step = match self.state {
                LineState::Idle => self.poll_line(&mut commands).await,
                LineState::AwaitingOffHook => {
                    let settle = self.timings.off_hook_settle();
                    self.wait(settle, &mut commands)
                        .await
                        .then(Step::Next(LineState::HandshakeDelay))
                }
                LineState::HandshakeDelay => {
                    let handshake = self.timings.handshake();
                    self.wait(handshake, &mut commands)
                        .await
                        .then(Step::Next(LineState::ReceivingDigits))
                }
                LineState::ReceivingDigits => self.receive_digits(&mut commands).await,
                LineState::Acknowledging => self.acknowledge(&mut commands).await,
            };

            match step {
                Step::Next(next) => self.transition_to(next),
                Step::Stay => {}
                Step::Reset => self.reset(),
                Step::Stop => break,
            }
        }

        self.apply_tone(ToneClass::None);
        info!("line state machine stopped");
    }

    /// Idle: re-arm a dial tone lost to a tone fault, check the line, then
    /// sleep one poll interval
    async fn poll_line(&mut self, commands: &mut mpsc::Receiver<LineCommand>) -> Step {
        if self.faults.tone_output {
            self.apply_tone(ToneClass::DialTone);
        }

        match self.hw.read_digital(self.line_pin) {
            Ok(true) => {
                self.clear_fault(Fault::LineRead);
                return Step::Next(LineState::AwaitingOffHook);
            }
            Ok(false) => self.clear_fault(Fault::LineRead),
            Err(e) => self.hardware_fault(Fault::LineRead, e),
        }

        let poll = self.timings.poll_interval();
        self.wait(poll, commands).await.then(Step::Stay)
    }

    /// Sample the latched symbol once per digit period, sixteen times
    async fn receive_digits(&mut self, commands: &mut mpsc::Receiver<LineCommand>) -> Step {
        let period = self.timings.digit_period();
        let mut deadline = Instant::now();

        while !self.assembler.is_complete() {
            let position = self.assembler.collected();
            let symbol = self.latch.current();
            if symbol.is_error() {
                warn!(position, "undecodable symbol sampled");
                self.emit(LineEvent::DecodeError { position });
            } else {
                debug!(position, %symbol, "sampled symbol");
            }

            if let Err(e) = self.assembler.push_symbol(symbol) {
                error!(?e, position, "frame assembly failed");
                break;
            }

            deadline += period;
            match self.wait_until(deadline, commands).await {
                Wake::Elapsed => {}
                Wake::Reset => return Step::Reset,
                Wake::Stop => return Step::Stop,
            }
        }

        match self.assembler.finalize() {
            Ok(frame) => self.publish(&frame, FrameSource::Line),
            Err(e) => error!(?e, "frame could not be finalized"),
        }
        Step::Next(LineState::Acknowledging)
    }

    /// Hold the kiss-off, silence it, then follow the line level
    async fn acknowledge(&mut self, commands: &mut mpsc::Receiver<LineCommand>) -> Step {
        let hold = self.timings.kiss_off();
        match self.wait(hold, commands).await {
            Wake::Elapsed => {}
            Wake::Reset => return Step::Reset,
            Wake::Stop => return Step::Stop,
        }
        self.apply_tone(ToneClass::None);

        match self.hw.read_digital(self.line_pin) {
            Ok(true) => {
                info!("line still off-hook after kiss-off, expecting retransmission");
                Step::Next(LineState::AwaitingOffHook)
            }
            Ok(false) => Step::Next(LineState::Idle),
            Err(e) => {
                self.hardware_fault(Fault::LineRead, e);
                Step::Next(LineState::Idle)
            }
        }
    }

    async fn wait(&mut self, period: Duration, commands: &mut mpsc::Receiver<LineCommand>) -> Wake {
        self.wait_until(Instant::now() + period, commands).await
    }

    /// Sleep until `deadline`. Test-frame injections are served without
    /// ending the wait; reset and shutdown end it at once.
    async fn wait_until(
        &mut self,
        deadline: Instant,
        commands: &mut mpsc::Receiver<LineCommand>,
    ) -> Wake {
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(LineCommand::Reset) => return Wake::Reset,
                    Some(LineCommand::InjectTestFrame { symbols, reply }) => {
                        self.inject(symbols, reply);
                    }
                    Some(LineCommand::Shutdown) | None => return Wake::Stop,
                },
                _ = &mut sleep => return Wake::Elapsed,
            }
        }
    }

    fn transition_to(&mut self, next: LineState) {
        let from = self.state;
        let dwell_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(from = %from, to = %next, dwell_ms, "line state transition");

        self.state = next;
        self.state_entered_at = Instant::now();
        self.status.set_line_state(next);
        self.emit(LineEvent::StateChanged {
            from,
            to: next,
            dwell_ms,
        });
        self.enter(next);
    }

    /// Entry actions
    fn enter(&mut self, state: LineState) {
        match state {
            LineState::Idle => self.apply_tone(ToneClass::DialTone),
            LineState::AwaitingOffHook => self.apply_tone(ToneClass::None),
            LineState::HandshakeDelay => {}
            LineState::ReceivingDigits => self.assembler.begin_frame(),
            LineState::Acknowledging => self.apply_tone(ToneClass::KissOff),
        }
    }

    /// Silence first, drop any partial frame, then re-arm Idle
    fn reset(&mut self) {
        info!(state = %self.state, "reset requested");
        self.apply_tone(ToneClass::None);

        if self.assembler.in_progress() {
            warn!(
                collected = self.assembler.collected(),
                "discarding unfinished frame"
            );
        }
        let discarded = self.assembler.discard();
        self.status.clear_error();
        self.emit(LineEvent::Reset { discarded });

        if self.state == LineState::Idle {
            self.enter(LineState::Idle);
        } else {
            self.transition_to(LineState::Idle);
        }
    }

    fn inject(&mut self, symbols: Vec<Symbol>, reply: oneshot::Sender<Result<Frame, FrameError>>) {
        let result = Frame::from_symbols(&symbols);
        match &result {
            Ok(frame) => {
                info!(%frame, "test frame injected");
                self.publish(frame, FrameSource::Injected);
            }
            Err(e) => warn!(?e, "rejected test frame"),
        }
        let _ = reply.send(result);
    }

    fn publish(&mut self, frame: &Frame, source: FrameSource) {
        let message = frame.message();
        if frame.checksum_valid() {
            info!(
                %frame,
                account = %message.account,
                event_code = %message.event_code,
                zone = %message.zone,
                ?source,
                "contact-id report received"
            );
        } else {
            let expected = checksum_digit(&frame.symbols()[..FRAME_LEN - 1]);
            warn!(
                %frame,
                ?source,
                ?expected,
                decode_errors = frame.decode_errors(),
                "checksum mismatch"
            );
        }
        if !message.is_known_message_type() {
            warn!(message_type = %message.message_type, "unexpected message type");
        }

        self.status.publish_frame(frame);
        self.emit(LineEvent::FrameReceived {
            symbols: frame.to_string(),
            checksum_valid: frame.checksum_valid(),
            source,
        });
    }

    fn apply_tone(&mut self, class: ToneClass) {
        match self.tone.set_tone(class) {
            Ok(()) => self.clear_fault(Fault::ToneOutput),
            Err(ToneError::UnsupportedFrequency(class)) => {
                warn!(%class, "tone unavailable, line stays silent");
                self.status
                    .raise_error(format!("no tone parameters configured for {class}"));
            }
            Err(ToneError::Hardware(e)) => self.hardware_fault(Fault::ToneOutput, e),
        }
    }

    fn hardware_fault(&mut self, fault: Fault, e: HardwareError) {
        let active = self.faults.flag(fault);
        if *active {
            return;
        }
        *active = true;
        error!(error = %e, ?fault, state = %self.state, "hardware fault");
        self.status.raise_error(e.to_string());
        self.emit(LineEvent::HardwareFault {
            message: e.to_string(),
        });
    }

    fn clear_fault(&mut self, fault: Fault) {
        let active = self.faults.flag(fault);
        if *active {
            *active = false;
            info!(?fault, "hardware access recovered");
        }
    }

    fn emit(&self, event: LineEvent) {
        debug!(?event, "emitting line event");
        let _ = self.event_tx.send(event);
    }
}
