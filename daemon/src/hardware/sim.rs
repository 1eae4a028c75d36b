//! In-memory hardware backend
//!
//! Holds line levels in a map, fires edge handlers on demand and records
//! every PWM write with a timestamp from the tokio clock, so paused-time
//! tests can check tone timing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::io::{EdgeHandler, HardwareError, HardwareIo, Pin, PinMap};

/// One recorded call to [`HardwareIo::set_pwm_tone`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmWrite {
    pub pin: Pin,
    pub on_value: u32,
    pub period_range: u32,
    pub at: Instant,
}

/// Simulated receiver board
pub struct SimulatedHardware {
    pins: PinMap,
    levels: Mutex<HashMap<Pin, bool>>,
    handlers: Mutex<HashMap<Pin, Vec<Arc<dyn Fn() + Send + Sync>>>>,
    pwm_writes: Mutex<Vec<PwmWrite>>,
    fail_reads: AtomicBool,
    fail_edge_registration: AtomicBool,
    fail_pwm: AtomicBool,
}

impl SimulatedHardware {
    pub fn new(pins: PinMap) -> Self {
        Self {
            pins,
            levels: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            pwm_writes: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_edge_registration: AtomicBool::new(false),
            fail_pwm: AtomicBool::new(false),
        }
    }

    pub fn set_level(&self, pin: Pin, high: bool) {
        self.levels.lock().insert(pin, high);
    }

    /// Put the panel's line off-hook (`true`) or back on-hook
    pub fn set_off_hook(&self, off_hook: bool) {
        self.set_level(self.pins.line, off_hook);
    }

    /// Present `register` on the data lines and raise the latch strobe
    pub fn pulse_latch(&self, register: u8) {
        for (bit, pin) in self.pins.data_lines().into_iter().enumerate() {
            self.set_level(pin, register & (1 << bit) != 0);
        }
        self.set_level(self.pins.latch, true);
        self.fire_rising_edge(self.pins.latch);
        self.set_level(self.pins.latch, false);
    }

    /// Invoke every handler registered for `pin`
    pub fn fire_rising_edge(&self, pin: Pin) {
        let handlers = self.handlers.lock().get(&pin).cloned().unwrap_or_default();
        trace!(pin, count = handlers.len(), "simulated rising edge");
        for handler in handlers {
            handler();
        }
    }

    /// Make subsequent reads fail, to exercise hardware-fault handling
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_edge_registration(&self, fail: bool) {
        self.fail_edge_registration.store(fail, Ordering::SeqCst);
    }

    /// Make tone writes fail; failed writes are not recorded
    pub fn fail_pwm(&self, fail: bool) {
        self.fail_pwm.store(fail, Ordering::SeqCst);
    }

    pub fn pwm_writes(&self) -> Vec<PwmWrite> {
        self.pwm_writes.lock().clone()
    }

    /// Most recent PWM parameters, if any were written
    pub fn last_pwm(&self) -> Option<(u32, u32)> {
        self.pwm_writes
            .lock()
            .last()
            .map(|w| (w.on_value, w.period_range))
    }
}

impl HardwareIo for SimulatedHardware {
    fn read_digital(&self, pin: Pin) -> Result<bool, HardwareError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(HardwareError::Read {
                pin,
                reason: "simulated read failure".to_string(),
            });
        }
        Ok(self.levels.lock().get(&pin).copied().unwrap_or(false))
    }

    fn on_rising_edge(&self, pin: Pin, handler: EdgeHandler) -> Result<(), HardwareError> {
        if self.fail_edge_registration.load(Ordering::SeqCst) {
            return Err(HardwareError::EdgeRegistration {
                pin,
                reason: "simulated registration failure".to_string(),
            });
        }
        self.handlers
            .lock()
            .entry(pin)
            .or_default()
            .push(Arc::from(handler));
        Ok(())
    }

    fn set_pwm_tone(
        &self,
        pin: Pin,
        on_value: u32,
        period_range: u32,
    ) -> Result<(), HardwareError> {
        if self.fail_pwm.load(Ordering::SeqCst) {
            return Err(HardwareError::Pwm {
                pin,
                reason: "simulated tone output failure".to_string(),
            });
        }
        self.pwm_writes.lock().push(PwmWrite {
            pin,
            on_value,
            period_range,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_levels_default_low() {
        let hw = SimulatedHardware::new(PinMap::default());
        assert!(!hw.read_digital(4).unwrap());
        hw.set_off_hook(true);
        assert!(hw.read_digital(PinMap::default().line).unwrap());
    }

    #[test]
    fn test_pulse_latch_sets_data_lines_and_fires() {
        let pins = PinMap::default();
        let hw = Arc::new(SimulatedHardware::new(pins));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        hw.on_rising_edge(pins.latch, Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        hw.pulse_latch(0b1010);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!hw.read_digital(pins.q1).unwrap());
        assert!(hw.read_digital(pins.q2).unwrap());
        assert!(!hw.read_digital(pins.q3).unwrap());
        assert!(hw.read_digital(pins.q4).unwrap());
        assert!(!hw.read_digital(pins.latch).unwrap());
    }

    #[test]
    fn test_read_failure() {
        let hw = SimulatedHardware::new(PinMap::default());
        hw.fail_reads(true);
        assert!(matches!(hw.read_digital(4), Err(HardwareError::Read { pin: 4, .. })));
    }

    #[test]
    fn test_pwm_failure_is_not_recorded() {
        let pins = PinMap::default();
        let hw = SimulatedHardware::new(pins);
        hw.fail_pwm(true);
        assert!(matches!(
            hw.set_pwm_tone(pins.tone, 12, 25),
            Err(HardwareError::Pwm { .. })
        ));
        assert_eq!(hw.last_pwm(), None);

        hw.fail_pwm(false);
        hw.set_pwm_tone(pins.tone, 12, 25).unwrap();
        assert_eq!(hw.last_pwm(), Some((12, 25)));
    }
}
