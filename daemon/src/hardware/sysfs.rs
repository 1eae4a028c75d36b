//! Linux sysfs GPIO backend
//!
//! Lines are exported under `/sys/class/gpio`. Rising edges on watched
//! lines are detected by a dedicated watcher thread per line, and tones are
//! produced by a software-PWM thread toggling the output line in 100 µs
//! pulse units.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::io::{EdgeHandler, HardwareError, HardwareIo, Pin, PinMap};

/// Software-PWM pulse unit
const PWM_PULSE: Duration = Duration::from_micros(100);

/// How long the PWM thread parks between checks while silent
const PWM_IDLE_POLL: Duration = Duration::from_millis(5);

/// sysfs backend options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SysfsOptions {
    /// sysfs GPIO class directory
    pub root: PathBuf,
    /// Polling period of the edge watcher threads
    pub edge_poll_us: u64,
}

impl Default for SysfsOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/class/gpio"),
            edge_poll_us: 500,
        }
    }
}

/// Parameters shared between the caller and a PWM thread
struct SoftPwm {
    on_value: AtomicU32,
    period_range: AtomicU32,
    /// Last write error while the output line is failing
    fault: Mutex<Option<String>>,
}

impl SoftPwm {
    /// Drive the output level, logging failure and recovery once each.
    /// Returns whether the write landed.
    fn write_level(&self, value: &File, pin: Pin, high: bool) -> bool {
        let level: &[u8] = if high { b"1" } else { b"0" };
        match value.write_at(level, 0) {
            Ok(_) => {
                if self.fault.lock().take().is_some() {
                    info!(pin, "tone output writable again");
                }
                true
            }
            Err(e) => {
                let mut fault = self.fault.lock();
                if fault.is_none() {
                    warn!(pin, error = %e, "tone output write failed");
                }
                *fault = Some(e.to_string());
                false
            }
        }
    }
}

/// GPIO access through the sysfs class interface
pub struct SysfsGpio {
    root: PathBuf,
    edge_poll: Duration,
    running: Arc<AtomicBool>,
    pwm: Mutex<HashMap<Pin, Arc<SoftPwm>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SysfsGpio {
    /// Export and configure every line in `pins`
    pub fn open(options: &SysfsOptions, pins: &PinMap) -> Result<Self, HardwareError> {
        let gpio = Self {
            root: options.root.clone(),
            edge_poll: Duration::from_micros(options.edge_poll_us.max(50)),
            running: Arc::new(AtomicBool::new(true)),
            pwm: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
        };

        for pin in pins.data_lines().into_iter().chain([pins.latch, pins.line]) {
            gpio.export(pin, "in")?;
        }
        gpio.export(pins.tone, "out")?;

        info!(root = ?gpio.root, "sysfs GPIO backend ready");
        Ok(gpio)
    }

    fn pin_dir(&self, pin: Pin) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&self, pin: Pin, direction: &str) -> Result<(), HardwareError> {
        let setup_err = |e: std::io::Error| HardwareError::Setup {
            pin,
            reason: e.to_string(),
        };

        let dir = self.pin_dir(pin);
        if !dir.exists() {
            fs::write(self.root.join("export"), pin.to_string()).map_err(setup_err)?;
        }
        fs::write(dir.join("direction"), direction).map_err(setup_err)?;
        debug!(pin, direction, "exported gpio line");
        Ok(())
    }

    fn spawn(&self, name: String, body: impl FnOnce() + Send + 'static) -> std::io::Result<()> {
        let handle = thread::Builder::new().name(name).spawn(body)?;
        self.threads.lock().push(handle);
        Ok(())
    }

    fn start_pwm_thread(&self, pin: Pin) -> Result<Arc<SoftPwm>, HardwareError> {
        let pwm_err = |reason: String| HardwareError::Pwm { pin, reason };

        let value = OpenOptions::new()
            .write(true)
            .open(self.pin_dir(pin).join("value"))
            .map_err(|e| pwm_err(e.to_string()))?;

        let shared = Arc::new(SoftPwm {
            on_value: AtomicU32::new(0),
            period_range: AtomicU32::new(0),
            fault: Mutex::new(None),
        });
        let params = Arc::clone(&shared);
        let running = Arc::clone(&self.running);

        self.spawn(format!("soft-pwm-{pin}"), move || {
            run_soft_pwm(pin, value, params, running);
        })
        .map_err(|e| pwm_err(e.to_string()))?;

        Ok(shared)
    }
}

fn read_value(path: &Path) -> std::io::Result<bool> {
    Ok(fs::read_to_string(path)?.trim() == "1")
}

fn run_soft_pwm(pin: Pin, value: File, params: Arc<SoftPwm>, running: Arc<AtomicBool>) {
    let mut high = false;
    while running.load(Ordering::SeqCst) {
        let on = params.on_value.load(Ordering::Acquire);
        let range = params.period_range.load(Ordering::Acquire);

        if on == 0 || range <= on {
            if high && params.write_level(&value, pin, false) {
                high = false;
            }
            thread::sleep(PWM_IDLE_POLL);
            continue;
        }

        params.write_level(&value, pin, true);
        high = true;
        thread::sleep(PWM_PULSE * on);
        high = !params.write_level(&value, pin, false);
        thread::sleep(PWM_PULSE * (range - on));
    }
    params.write_level(&value, pin, false);
}

impl HardwareIo for SysfsGpio {
    fn read_digital(&self, pin: Pin) -> Result<bool, HardwareError> {
        read_value(&self.pin_dir(pin).join("value")).map_err(|e| HardwareError::Read {
            pin,
            reason: e.to_string(),
        })
    }

    fn on_rising_edge(&self, pin: Pin, handler: EdgeHandler) -> Result<(), HardwareError> {
        let path = self.pin_dir(pin).join("value");
        let mut previous = read_value(&path).map_err(|e| HardwareError::EdgeRegistration {
            pin,
            reason: e.to_string(),
        })?;

        let running = Arc::clone(&self.running);
        let poll = self.edge_poll;

        self.spawn(format!("gpio-edge-{pin}"), move || {
            debug!(pin, "edge watcher started");
            let mut failing = false;
            while running.load(Ordering::SeqCst) {
                match read_value(&path) {
                    Ok(level) => {
                        if failing {
                            failing = false;
                            info!(pin, "edge watcher reads recovered");
                        }
                        if level && !previous {
                            handler();
                        }
                        previous = level;
                    }
                    Err(e) => {
                        if !failing {
                            failing = true;
                            warn!(pin, error = %e, "edge watcher read failed");
                        }
                    }
                }
                thread::sleep(poll);
            }
            debug!(pin, "edge watcher stopped");
        })
        .map_err(|e| HardwareError::EdgeRegistration {
            pin,
            reason: e.to_string(),
        })
    }

    fn set_pwm_tone(
        &self,
        pin: Pin,
        on_value: u32,
        period_range: u32,
    ) -> Result<(), HardwareError> {
        let existing = self.pwm.lock().get(&pin).cloned();
        let pwm = match existing {
            Some(pwm) => pwm,
            None => {
                let pwm = self.start_pwm_thread(pin)?;
                self.pwm.lock().insert(pin, Arc::clone(&pwm));
                pwm
            }
        };

        pwm.period_range.store(period_range, Ordering::Release);
        pwm.on_value.store(on_value, Ordering::Release);

        // the thread keeps retrying with the new parameters; report the
        // outstanding fault until a write succeeds
        let fault = pwm.fault.lock().clone();
        match fault {
            Some(reason) => Err(HardwareError::Pwm { pin, reason }),
            None => Ok(()),
        }
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
        info!("sysfs GPIO backend stopped");
    }
}
