//! Configuration loading and management
//!
//! Layers, lowest to highest precedence: built-in defaults, an optional
//! TOML file, then `ALARM_RECEIVER_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::hardware::{PinMap, SysfsOptions};
use crate::line::LineTimings;
use crate::status::clamp_debug_level;
use crate::tone::ToneTable;

const CONFIG_ENV: &str = "ALARM_RECEIVER_CONFIG";
const SOCKET_ENV: &str = "ALARM_RECEIVER_SOCKET";
const BACKEND_ENV: &str = "ALARM_RECEIVER_BACKEND";
const DEBUG_LEVEL_ENV: &str = "ALARM_RECEIVER_DEBUG_LEVEL";
const RT_PRIORITY_ENV: &str = "ALARM_RECEIVER_RT_PRIORITY";

const DEFAULT_RT_PRIORITY: i32 = 50;
const DEFAULT_DEBUG_LEVEL: u8 = 2;

/// Which hardware backend drives the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Linux sysfs GPIO
    Sysfs,
    /// In-memory simulation, no real line
    Sim,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(Backend::Sysfs),
            "sim" => Ok(Backend::Sim),
            other => bail!("unknown hardware backend {other:?} (expected sysfs or sim)"),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for the control channel
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub backend: Backend,
    pub pins: PinMap,
    pub timings: LineTimings,
    pub tones: ToneTable,
    pub gpio: SysfsOptions,

    /// SCHED_FIFO priority for the timing thread, 0 to leave it unchanged
    pub rt_priority: i32,

    /// Initial verbosity, 0-5
    pub debug_level: u8,
}

/// On-disk form; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    socket_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    backend: Option<Backend>,
    pins: PinMap,
    timings: LineTimings,
    tones: ToneTable,
    gpio: SysfsOptions,
    rt_priority: Option<i32>,
    debug_level: Option<i64>,
}

impl Config {
    /// Load configuration from the config file, environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::load_with(Path::new(&home), |key| std::env::var(key).ok())
    }

    /// Layered load with `home` and an environment `lookup`
    fn load_with(home: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = match lookup(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let default = default_config_path(home);
                default.exists().then_some(default)
            }
        };

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::from_toml(&text, home)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => Self::from_file(ConfigFile::default(), home),
        };

        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Parse a TOML document, filling gaps with defaults rooted at `home`
    pub fn from_toml(text: &str, home: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        file.timings.validate()?;
        Ok(Self::from_file(file, home))
    }

    fn from_file(file: ConfigFile, home: &Path) -> Self {
        let data_dir = file.data_dir.unwrap_or_else(|| {
            home.join(".local").join("share").join("alarm-receiver")
        });
        let socket_path = file
            .socket_path
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        Self {
            socket_path,
            data_dir,
            backend: file.backend.unwrap_or(Backend::Sysfs),
            pins: file.pins,
            timings: file.timings,
            tones: file.tones,
            gpio: file.gpio,
            rt_priority: file.rt_priority.unwrap_or(DEFAULT_RT_PRIORITY),
            debug_level: file
                .debug_level
                .map(clamp_debug_level)
                .unwrap_or(DEFAULT_DEBUG_LEVEL),
        }
    }

    /// Apply `ALARM_RECEIVER_*` overrides from `lookup`
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(socket) = lookup(SOCKET_ENV) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(backend) = lookup(BACKEND_ENV) {
            self.backend = backend.parse()?;
        }
        if let Some(level) = lookup(DEBUG_LEVEL_ENV) {
            let level: i64 = level
                .trim()
                .parse()
                .with_context(|| format!("{DEBUG_LEVEL_ENV} must be an integer"))?;
            self.debug_level = clamp_debug_level(level);
        }
        if let Some(priority) = lookup(RT_PRIORITY_ENV) {
            self.rt_priority = priority
                .trim()
                .parse()
                .with_context(|| format!("{RT_PRIORITY_ENV} must be an integer"))?;
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn default_config_path(home: &Path) -> PathBuf {
    home.join(".config").join("alarm-receiver").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "alarm-receiver-config-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_from_config_env_file() {
        let dir = scratch_dir("file");
        let file = dir.join("receiver.toml");
        std::fs::write(&file, "backend = \"sim\"\ndebug_level = 3\n").unwrap();

        let path = file.to_string_lossy().into_owned();
        let config = Config::load_with(
            &dir,
            env(&[(CONFIG_ENV, path.as_str()), (DEBUG_LEVEL_ENV, "4")]),
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Sim);
        assert_eq!(config.debug_level, 4);
        assert_eq!(
            config.socket_path,
            dir.join(".local/share/alarm-receiver/daemon.sock")
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = scratch_dir("nofile");
        let config = Config::load_with(&dir, env(&[])).unwrap();
        assert_eq!(config.backend, Backend::Sysfs);
        assert_eq!(config.debug_level, 2);
        assert_eq!(config.data_dir, dir.join(".local/share/alarm-receiver"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let dir = scratch_dir("missing");
        let path = dir.join("absent.toml").to_string_lossy().into_owned();
        assert!(Config::load_with(&dir, env(&[(CONFIG_ENV, path.as_str())])).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_zero_timing_window_rejected() {
        let text = "[timings]\nhandshake_ms = 0\n";
        assert!(Config::from_toml(text, Path::new("/home/op")).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("", Path::new("/home/op")).unwrap();
        assert_eq!(
            config.socket_path,
            PathBuf::from("/home/op/.local/share/alarm-receiver/daemon.sock")
        );
        assert_eq!(config.backend, Backend::Sysfs);
        assert_eq!(config.pins, PinMap::default());
        assert_eq!(config.timings, LineTimings::default());
        assert_eq!(config.rt_priority, 50);
        assert_eq!(config.debug_level, 2);
    }

    #[test]
    fn test_file_overrides() {
        let text = r#"
            backend = "sim"
            debug_level = 42
            rt_priority = 0

            [pins]
            line = 17

            [timings]
            kiss_off_ms = 900

            [tones]
            kiss_off = { on_value = 3, period_range = 7 }
        "#;
        let config = Config::from_toml(text, Path::new("/home/op")).unwrap();
        assert_eq!(config.backend, Backend::Sim);
        assert_eq!(config.debug_level, 5);
        assert_eq!(config.rt_priority, 0);
        assert_eq!(config.pins.line, 17);
        assert_eq!(config.pins.latch, PinMap::default().latch);
        assert_eq!(config.timings.kiss_off_ms, 900);
        assert_eq!(config.tones.kiss_off.unwrap().on_value, 3);
        assert_eq!(config.tones.dial_tone, ToneTable::default().dial_tone);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("sokcet_path = \"/tmp/x\"", Path::new("/home/op")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml("", Path::new("/home/op")).unwrap();
        config
            .apply_env(env(&[
                (SOCKET_ENV, "/run/alarm.sock"),
                (BACKEND_ENV, "SIM"),
                (DEBUG_LEVEL_ENV, "-4"),
                (RT_PRIORITY_ENV, "80"),
            ]))
            .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/alarm.sock"));
        assert_eq!(config.backend, Backend::Sim);
        assert_eq!(config.debug_level, 0);
        assert_eq!(config.rt_priority, 80);
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = Config::from_toml("", Path::new("/home/op")).unwrap();
        assert!(config.apply_env(env(&[(BACKEND_ENV, "gpiod")])).is_err());
        assert!(config.apply_env(env(&[(DEBUG_LEVEL_ENV, "loud")])).is_err());
    }
}
