use ae400_hw::sim::{SimDevice, SimDriver};
use ae400_hw::{CameraConfig, Driver};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_CONFIG_PATH: &str = "/etc/ae400/ae400d.toml";

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Simulated device the `sim` driver exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// `ae400` or `d400`.
    pub model: String,
    pub serial: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            model: "ae400".into(),
            serial: "SIM000001".into(),
        }
    }
}

/// Daemon configuration: a TOML file plus `AE400_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Driver backend name.
    pub driver: String,
    pub bus: BusKind,
    pub sim: SimConfig,
    pub camera: CameraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: "sim".into(),
            bus: BusKind::default(),
            sim: SimConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Config {
    /// Load from `AE400_CONFIG` (or the default path), then apply the environment.
    ///
    /// A missing file means defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var("AE400_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "no config file; using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Override fields from `AE400_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = &var;
        if let Some(driver) = var("AE400_DRIVER") {
            self.driver = driver;
        }
        self.bus = env_parse(var, "AE400_BUS", self.bus);
        if let Some(serial) = var("AE400_SERIAL_NUMBER") {
            self.camera.serial_number = Some(serial);
        }
        if let Some(serial) = var("AE400_SIM_SERIAL") {
            self.sim.serial = serial;
        }
        if let Some(model) = var("AE400_SIM_MODEL") {
            self.sim.model = model;
        }

        let camera = &mut self.camera;
        camera.dev_index = env_parse(var, "AE400_DEV_INDEX", camera.dev_index);
        camera.align_to_color = env_bool(var, "AE400_ALIGN_TO_COLOR", camera.align_to_color);
        camera.frame_queue_size = env_parse(var, "AE400_FRAME_QUEUE_SIZE", camera.frame_queue_size);
        camera.auto_exposure_priority = env_bool(
            var,
            "AE400_AUTO_EXPOSURE_PRIORITY",
            camera.auto_exposure_priority,
        );
        camera.laser_power = env_parse(var, "AE400_LASER_POWER", camera.laser_power);
        camera.enable_auto_exposure =
            env_bool(var, "AE400_ENABLE_AUTO_EXPOSURE", camera.enable_auto_exposure);
        camera.enable_depth_laser =
            env_bool(var, "AE400_ENABLE_DEPTH_LASER", camera.enable_depth_laser);

        let streams = &mut camera.streams;
        streams.rows = env_parse(var, "AE400_ROWS", streams.rows);
        streams.cols = env_parse(var, "AE400_COLS", streams.cols);
        streams.color_framerate = env_parse(var, "AE400_COLOR_FRAMERATE", streams.color_framerate);
        streams.depth_framerate = env_parse(var, "AE400_DEPTH_FRAMERATE", streams.depth_framerate);
        streams.ir_framerate = env_parse(var, "AE400_IR_FRAMERATE", streams.ir_framerate);
        streams.enable_color = env_bool(var, "AE400_ENABLE_COLOR", streams.enable_color);
        streams.enable_depth = env_bool(var, "AE400_ENABLE_DEPTH", streams.enable_depth);
        streams.enable_ir_stereo =
            env_bool(var, "AE400_ENABLE_IR_STEREO", streams.enable_ir_stereo);
        streams.enable_imu = env_bool(var, "AE400_ENABLE_IMU", streams.enable_imu);
    }

    /// Instantiate the configured driver backend.
    pub fn build_driver(&self) -> Result<Box<dyn Driver>> {
        match self.driver.as_str() {
            "sim" => {
                let device = match self.sim.model.as_str() {
                    "ae400" => SimDevice::ae400(&self.sim.serial),
                    "d400" => SimDevice::d400(&self.sim.serial),
                    other => bail!("unknown simulated model {other:?} (expected ae400 or d400)"),
                };
                Ok(Box::new(SimDriver::new().with_device(device.realtime(true))))
            }
            other => bail!("unknown driver {other:?}; available drivers: sim"),
        }
    }
}

fn env_parse<T: FromStr>(var: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable environment override");
            default
        }),
        None => default,
    }
}

fn env_bool(var: &dyn Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    var(key).map(|v| v != "0" && v != "false").unwrap_or(default)
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

    #[test]
    fn test_defaults_use_sim_on_system_bus() {
        let config = Config::default();
        assert_eq!(config.driver, "sim");
        assert_eq!(config.bus, BusKind::System);
        assert!(config.build_driver().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            bus = "session"

            [sim]
            model = "d400"

            [camera]
            serial_number = "SN55"
            enable_ir_stereo = true
            ir_framerate = 15
            depth_framerate = 15
            "#,
        )
        .unwrap();
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.sim.model, "d400");
        assert_eq!(config.sim.serial, "SIM000001");
        assert_eq!(config.camera.serial_number.as_deref(), Some("SN55"));
        assert_eq!(config.camera.streams.ir_framerate, 15);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("AE400_BUS", "session"),
            ("AE400_ENABLE_IR_STEREO", "1"),
            ("AE400_ENABLE_COLOR", "0"),
            ("AE400_LASER_POWER", "90"),
        ]));
        assert_eq!(config.bus, BusKind::Session);
        assert!(config.camera.streams.enable_ir_stereo);
        assert!(!config.camera.streams.enable_color);
        assert_eq!(config.camera.laser_power, 90);
    }

    #[test]
    fn test_env_overrides_stream_geometry_and_queue() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("AE400_ROWS", "480"),
            ("AE400_COLS", "848"),
            ("AE400_COLOR_FRAMERATE", "15"),
            ("AE400_DEPTH_FRAMERATE", "6"),
            ("AE400_IR_FRAMERATE", "6"),
            ("AE400_FRAME_QUEUE_SIZE", "4"),
            ("AE400_AUTO_EXPOSURE_PRIORITY", "true"),
        ]));
        let streams = &config.camera.streams;
        assert_eq!((streams.rows, streams.cols), (480, 848));
        assert_eq!(streams.color_framerate, 15);
        assert_eq!(streams.depth_framerate, 6);
        assert_eq!(streams.ir_framerate, 6);
        assert_eq!(config.camera.frame_queue_size, 4);
        assert!(config.camera.auto_exposure_priority);
    }

    #[test]
    fn test_bad_env_value_keeps_default() {
        let mut config = Config::default();
        config.apply_env(env(&[("AE400_LASER_POWER", "lots"), ("AE400_BUS", "party")]));
        assert_eq!(config.camera.laser_power, 150);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let config = Config {
            driver: "usb".into(),
            ..Config::default()
        };
        assert!(config.build_driver().is_err());
    }

    #[test]
    fn test_unknown_sim_model_rejected() {
        let mut config = Config::default();
        config.sim.model = "d999".into();
        assert!(config.build_driver().is_err());
    }
}
