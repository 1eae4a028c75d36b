//! Call-progress tone synthesis
//!
//! Tones are square-wave approximations produced by the backend's software
//! PWM. Each tone class maps to an (on-value, period-range) pair in 100 µs
//! pulse units, so the effective frequency is `10_000 / period_range` Hz.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hardware::{HardwareError, HardwareIo, Pin};

/// Tone classes a central station produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneClass {
    /// Output disabled
    None,
    /// 400 Hz continuous tone; the panel only goes off-hook while it is present
    DialTone,
    /// 1400 Hz acknowledgment sent after a report is received
    KissOff,
}

impl fmt::Display for ToneClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToneClass::None => write!(f, "None"),
            ToneClass::DialTone => write!(f, "DialTone"),
            ToneClass::KissOff => write!(f, "KissOff"),
        }
    }
}

/// Software-PWM approximation of one tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PwmParams {
    pub on_value: u32,
    pub period_range: u32,
}

impl PwmParams {
    pub const fn new(on_value: u32, period_range: u32) -> Self {
        Self {
            on_value,
            period_range,
        }
    }

    /// Frequency actually produced with 100 µs pulses
    pub fn frequency_hz(&self) -> f64 {
        if self.period_range == 0 {
            return 0.0;
        }
        10_000.0 / f64::from(self.period_range)
    }

    pub fn is_valid(&self) -> bool {
        self.on_value > 0 && self.on_value < self.period_range
    }
}

/// Parameter pairs for the audible tone classes.
///
/// A class without an entry cannot be synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToneTable {
    pub dial_tone: Option<PwmParams>,
    pub kiss_off: Option<PwmParams>,
}

impl Default for ToneTable {
    fn default() -> Self {
        Self {
            // 2.5 ms period, 400 Hz
            dial_tone: Some(PwmParams::new(12, 25)),
            // 0.7 ms period, ~1429 Hz for the 1400 Hz kiss-off
            kiss_off: Some(PwmParams::new(4, 7)),
        }
    }
}

impl ToneTable {
    pub fn params(&self, class: ToneClass) -> Option<PwmParams> {
        match class {
            ToneClass::None => None,
            ToneClass::DialTone => self.dial_tone,
            ToneClass::KissOff => self.kiss_off,
        }
        .filter(PwmParams::is_valid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToneError {
    #[error("no PWM parameters configured for {0}")]
    UnsupportedFrequency(ToneClass),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// Drives the tone output line
pub struct ToneSynthesizer {
    hw: Arc<dyn HardwareIo>,
    pin: Pin,
    table: ToneTable,
    /// Last class applied to the hardware; `None` until the first write
    current: Option<ToneClass>,
}

impl ToneSynthesizer {
    pub fn new(hw: Arc<dyn HardwareIo>, pin: Pin, table: ToneTable) -> Self {
        Self {
            hw,
            pin,
            table,
            current: None,
        }
    }

    /// Class currently on the output, if any has been applied
    pub fn current(&self) -> Option<ToneClass> {
        self.current
    }

    /// Switch the output to `class`.
    ///
    /// Re-issuing the active class does not touch the hardware. An unmapped
    /// class silences the output and returns [`ToneError::UnsupportedFrequency`].
    pub fn set_tone(&mut self, class: ToneClass) -> Result<(), ToneError> {
        if self.current == Some(class) {
            return Ok(());
        }

        if class == ToneClass::None {
            return self.silence();
        }

        let Some(params) = self.table.params(class) else {
            warn!(%class, "tone class has no PWM parameters, falling back to silence");
            if let Err(e) = self.silence() {
                warn!(?e, "failed to silence tone output");
            }
            return Err(ToneError::UnsupportedFrequency(class));
        };

        self.hw
            .set_pwm_tone(self.pin, params.on_value, params.period_range)?;
        debug!(
            %class,
            on_value = params.on_value,
            period_range = params.period_range,
            frequency_hz = params.frequency_hz(),
            "tone output set"
        );
        self.current = Some(class);
        Ok(())
    }

    fn silence(&mut self) -> Result<(), ToneError> {
        self.hw.set_pwm_tone(self.pin, 0, 0)?;
        debug!("tone output disabled");
        self.current = Some(ToneClass::None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{PinMap, SimulatedHardware};

    fn synth(table: ToneTable) -> (ToneSynthesizer, Arc<SimulatedHardware>) {
        let pins = PinMap::default();
        let sim = Arc::new(SimulatedHardware::new(pins));
        (ToneSynthesizer::new(sim.clone(), pins.tone, table), sim)
    }

    #[test]
    fn test_default_frequencies() {
        let table = ToneTable::default();
        let dial = table.params(ToneClass::DialTone).unwrap();
        let kiss = table.params(ToneClass::KissOff).unwrap();
        assert_eq!(dial.frequency_hz(), 400.0);
        assert!((kiss.frequency_hz() - 1400.0).abs() < 50.0);
        assert_eq!(table.params(ToneClass::None), None);
    }

    #[test]
    fn test_dial_tone_params() {
        let (mut synth, sim) = synth(ToneTable::default());
        synth.set_tone(ToneClass::DialTone).unwrap();
        assert_eq!(sim.last_pwm(), Some((12, 25)));
        assert_eq!(synth.current(), Some(ToneClass::DialTone));
    }

    #[test]
    fn test_repeated_set_is_idempotent() {
        let (mut synth, sim) = synth(ToneTable::default());
        synth.set_tone(ToneClass::DialTone).unwrap();
        let after_one = sim.last_pwm();

        synth.set_tone(ToneClass::DialTone).unwrap();
        synth.set_tone(ToneClass::DialTone).unwrap();
        assert_eq!(sim.last_pwm(), after_one);
        assert_eq!(sim.pwm_writes().len(), 1);
    }

    #[test]
    fn test_none_disables_output() {
        let (mut synth, sim) = synth(ToneTable::default());
        synth.set_tone(ToneClass::KissOff).unwrap();
        assert_eq!(sim.last_pwm(), Some((4, 7)));

        synth.set_tone(ToneClass::None).unwrap();
        assert_eq!(sim.last_pwm(), Some((0, 0)));
        assert_eq!(synth.current(), Some(ToneClass::None));
    }

    #[test]
    fn test_unsupported_class_falls_back_to_silence() {
        let table = ToneTable {
            kiss_off: None,
            ..ToneTable::default()
        };
        let (mut synth, sim) = synth(table);
        synth.set_tone(ToneClass::DialTone).unwrap();

        let err = synth.set_tone(ToneClass::KissOff).unwrap_err();
        assert!(matches!(err, ToneError::UnsupportedFrequency(ToneClass::KissOff)));
        assert_eq!(sim.last_pwm(), Some((0, 0)));
        assert_eq!(synth.current(), Some(ToneClass::None));
    }

    #[test]
    fn test_invalid_params_are_unsupported() {
        let table = ToneTable {
            dial_tone: Some(PwmParams::new(30, 25)),
            ..ToneTable::default()
        };
        let (mut synth, _) = synth(table);
        assert!(matches!(
            synth.set_tone(ToneClass::DialTone),
            Err(ToneError::UnsupportedFrequency(ToneClass::DialTone))
        ));
    }
}
