//! Camera lifecycle: open, configure, start, tick, stop.

use crate::capture::{CycleReport, FrameBundler, Publisher, ToggleControls};
use crate::clock::HostClock;
use crate::driver::{Driver, DriverError};
use crate::frame::FrameError;
use crate::profiles::{profile_for, DeviceProfile};
use crate::session::{DeviceDescriptor, DeviceSelector, InitialOptions, Session};
use crate::streams::{EnabledStreams, StreamOrchestrator, StreamSettings};
use ae400_core::{ChannelKind, Pose3};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("failed to open device: {0}")]
    DeviceOpen(DriverError),
    #[error("no frame set within {0:?}")]
    FrameTimeout(Duration),
    #[error("driver call failed: {0}")]
    Driver(#[from] DriverError),
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
    #[error("camera is stopped")]
    Inactive,
}

const MAX_FRAME_QUEUE_SIZE: u32 = 32;
const MAX_LASER_POWER: u32 = 360;
const LASER_POWER_STEP: u32 = 30;

/// Everything needed to bring a camera up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Enumeration index, used when no serial number is given.
    pub dev_index: usize,
    /// Takes precedence over `dev_index` when non-empty.
    pub serial_number: Option<String>,
    pub align_to_color: bool,
    pub frame_queue_size: u32,
    pub auto_exposure_priority: bool,
    /// Milliwatts, 0–360 in steps of 30.
    pub laser_power: u32,
    pub enable_auto_exposure: bool,
    pub enable_depth_laser: bool,
    #[serde(flatten)]
    pub streams: StreamSettings,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            dev_index: 0,
            serial_number: None,
            align_to_color: false,
            frame_queue_size: 16,
            auto_exposure_priority: false,
            laser_power: 150,
            enable_auto_exposure: true,
            enable_depth_laser: true,
            streams: StreamSettings::default(),
        }
    }
}

impl CameraConfig {
    /// Reject values the hardware would refuse, before any device is touched.
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.frame_queue_size > MAX_FRAME_QUEUE_SIZE {
            return Err(CameraError::Configuration(format!(
                "frame_queue_size {} exceeds {MAX_FRAME_QUEUE_SIZE}",
                self.frame_queue_size
            )));
        }
        if self.laser_power > MAX_LASER_POWER || self.laser_power % LASER_POWER_STEP != 0 {
            return Err(CameraError::Configuration(format!(
                "laser_power {} must be 0-{MAX_LASER_POWER} in steps of {LASER_POWER_STEP}",
                self.laser_power
            )));
        }

        let s = &self.streams;
        if s.rows == 0 || s.cols == 0 {
            return Err(CameraError::Configuration(format!(
                "image size {}x{} must be non-zero",
                s.cols, s.rows
            )));
        }
        for (enabled, name, rate) in [
            (s.enable_color, "color_framerate", s.color_framerate),
            (s.enable_depth, "depth_framerate", s.depth_framerate),
            (s.enable_ir_stereo, "ir_framerate", s.ir_framerate),
        ] {
            if enabled && rate == 0 {
                return Err(CameraError::Configuration(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    pub fn selector(&self) -> DeviceSelector {
        match self.serial_number.as_deref() {
            Some(serial) if !serial.is_empty() => DeviceSelector::serial(serial),
            _ => DeviceSelector::index(self.dev_index),
        }
    }

    pub fn initial_options(&self) -> InitialOptions {
        InitialOptions {
            frame_queue_size: self.frame_queue_size,
            auto_exposure_priority: self.auto_exposure_priority,
            emitter_enabled: self.enable_depth_laser,
            laser_power: self.laser_power,
        }
    }
}

/// A running camera. Stops capture and releases the device on drop.
pub struct Camera {
    session: Session,
    streams: StreamOrchestrator,
    bundler: FrameBundler,
    controls: ToggleControls,
    clock: Box<dyn HostClock>,
    profile: &'static DeviceProfile,
    announced: bool,
}

impl Camera {
    /// Open the configured device through `driver` and start capture.
    pub fn open(
        driver: &mut dyn Driver,
        config: &CameraConfig,
        clock: Box<dyn HostClock>,
    ) -> Result<Self, CameraError> {
        config.validate()?;

        let mut session = Session::open(driver, &config.selector())?;
        match Self::start(&mut session, config) {
            Ok((streams, bundler, profile)) => {
                let mut controls = ToggleControls::new(config.enable_auto_exposure);
                controls.sync(session.sensors_mut());
                Ok(Self {
                    session,
                    streams,
                    bundler,
                    controls,
                    clock,
                    profile,
                    announced: false,
                })
            }
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    fn start(
        session: &mut Session,
        config: &CameraConfig,
    ) -> Result<(StreamOrchestrator, FrameBundler, &'static DeviceProfile), CameraError> {
        let profile = profile_for(session.info())
            .ok_or_else(|| CameraError::Configuration("no device profiles available".into()))?;
        let plan = StreamOrchestrator::plan(&config.streams, profile)?;

        session.configure(&config.initial_options());

        let bundler = FrameBundler::new(&plan, config.align_to_color);
        let streams = StreamOrchestrator::start(session, plan)?;
        Ok((streams, bundler, profile))
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.session.descriptor()
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    pub fn enabled_streams(&self) -> EnabledStreams {
        self.streams.plan_ref().enabled
    }

    /// Right-to-left infrared transform, when stereo infrared runs.
    pub fn ir_extrinsics(&self) -> Option<Pose3> {
        self.streams.ir_extrinsics()
    }

    pub fn auto_exposure(&self) -> bool {
        self.controls.auto_exposure()
    }

    /// Takes effect on the next [`Camera::tick`].
    pub fn set_auto_exposure(&mut self, enabled: bool) {
        self.controls.set_auto_exposure(enabled);
    }

    pub fn is_active(&self) -> bool {
        self.streams.is_active()
    }

    /// One capture cycle.
    ///
    /// The first cycle also publishes the infrared extrinsics as a static
    /// transform. With no streams enabled this returns an empty report.
    pub fn tick(&mut self, publisher: &mut dyn Publisher) -> Result<CycleReport, CameraError> {
        if !self.streams.is_active() {
            return Err(CameraError::Inactive);
        }
        if !self.announced {
            if let Some(pose) = self.streams.ir_extrinsics() {
                publisher.publish_static_pose(
                    ChannelKind::InfraredRight,
                    ChannelKind::InfraredLeft,
                    pose,
                );
            }
            self.announced = true;
        }

        self.controls.sync(self.session.sensors_mut());

        match self.streams.pipeline_mut() {
            Some(pipeline) => self
                .bundler
                .capture(pipeline, self.clock.as_ref(), publisher),
            None => Ok(CycleReport::default()),
        }
    }

    /// Stop capture and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.streams.is_active() {
            tracing::info!(serial = %self.session.descriptor().serial, "stopping camera");
        }
        self.streams.stop();
        self.session.close();
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::driver::OptionKind;
    use crate::sim::{CollectingPublisher, SimDevice, SimDriver, SimEvent};

    fn clock() -> Box<dyn HostClock> {
        Box::new(ManualClock::new(5_000_000_000))
    }

    fn small() -> CameraConfig {
        CameraConfig {
            streams: StreamSettings {
                rows: 4,
                cols: 6,
                ..StreamSettings::default()
            },
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_config_defaults_validate() {
        assert!(CameraConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_queue_size() {
        let config = CameraConfig {
            frame_queue_size: 33,
            ..CameraConfig::default()
        };
        assert!(matches!(config.validate(), Err(CameraError::Configuration(_))));
    }

    #[test]
    fn test_config_rejects_laser_off_grid() {
        for laser_power in [155, 390] {
            let config = CameraConfig {
                laser_power,
                ..CameraConfig::default()
            };
            assert!(matches!(config.validate(), Err(CameraError::Configuration(_))));
        }
    }

    #[test]
    fn test_config_rejects_zero_rate_only_when_enabled() {
        let mut config = CameraConfig::default();
        config.streams.ir_framerate = 0;
        assert!(config.validate().is_ok());
        config.streams.enable_ir_stereo = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serial_takes_precedence() {
        let mut config = CameraConfig {
            dev_index: 3,
            serial_number: Some(String::new()),
            ..CameraConfig::default()
        };
        assert_eq!(config.selector(), DeviceSelector::index(3));
        config.serial_number = Some("SN42".into());
        assert_eq!(config.selector(), DeviceSelector::serial("SN42"));
    }

    #[test]
    fn test_config_from_toml_flattens_streams() {
        let config: CameraConfig = toml::from_str(
            r#"
            serial_number = "SN7"
            laser_power = 90
            rows = 480
            enable_ir_stereo = true
            "#,
        )
        .unwrap();
        assert_eq!(config.laser_power, 90);
        assert_eq!(config.streams.rows, 480);
        assert_eq!(config.streams.cols, 640);
        assert!(config.streams.enable_ir_stereo);
    }

    #[test]
    fn test_invalid_config_never_touches_device() {
        let device = SimDevice::ae400("SN1");
        let log = device.log();
        let mut driver = SimDriver::new().with_device(device);
        let config = CameraConfig {
            laser_power: 17,
            ..small()
        };
        assert!(Camera::open(&mut driver, &config, clock()).is_err());
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_open_writes_initial_options_then_auto_exposure() {
        let device = SimDevice::ae400("SN1");
        let log = device.log();
        let mut driver = SimDriver::new().with_device(device);
        let _camera = Camera::open(&mut driver, &small(), clock()).unwrap();

        let writes = log.option_writes();
        assert!(writes.contains(&("Stereo Module".into(), OptionKind::LaserPower, 150.0)));
        assert!(writes.contains(&("RGB Camera".into(), OptionKind::FramesQueueSize, 16.0)));
        // Auto exposure goes out once, after the pipeline started.
        let started = log
            .events()
            .iter()
            .position(|e| matches!(e, SimEvent::PipelineStarted(_)))
            .unwrap();
        let first_ae = log
            .events()
            .iter()
            .position(|e| {
                matches!(
                    e,
                    SimEvent::OptionSet {
                        option: OptionKind::EnableAutoExposure,
                        ..
                    }
                )
            })
            .unwrap();
        assert!(first_ae > started);
    }

    #[test]
    fn test_laser_power_skipped_with_emitter_off() {
        let device = SimDevice::ae400("SN1");
        let log = device.log();
        let mut driver = SimDriver::new().with_device(device);
        let config = CameraConfig {
            enable_depth_laser: false,
            ..small()
        };
        let _camera = Camera::open(&mut driver, &config, clock()).unwrap();
        assert!(!log
            .option_writes()
            .iter()
            .any(|(_, o, _)| *o == OptionKind::LaserPower));
    }

    #[test]
    fn test_start_failure_releases_device() {
        let device = SimDevice::ae400("SN1").failing_start(
            "rs2_pipeline_start_with_config",
            "pipe",
            "Couldn't resolve requests",
        );
        let log = device.log();
        let mut driver = SimDriver::new().with_device(device);
        let err = Camera::open(&mut driver, &small(), clock()).err().unwrap();
        assert!(matches!(err, CameraError::DeviceOpen(_)));
        assert!(log.events().contains(&SimEvent::ReleaseAttempted));
    }

    #[test]
    fn test_motion_on_plain_variant_is_configuration_error() {
        let mut driver = SimDriver::new().with_device(SimDevice::d400("SN2"));
        let mut config = small();
        config.streams.enable_imu = true;
        let err = Camera::open(&mut driver, &config, clock()).err().unwrap();
        assert!(matches!(err, CameraError::Configuration(_)));
    }

    #[test]
    fn test_first_tick_announces_extrinsics_once() {
        let mut driver = SimDriver::new().with_device(SimDevice::ae400("SN1"));
        let mut config = small();
        config.streams.enable_ir_stereo = true;
        let mut camera = Camera::open(&mut driver, &config, clock()).unwrap();
        let mut out = CollectingPublisher::default();

        camera.tick(&mut out).unwrap();
        camera.tick(&mut out).unwrap();

        assert_eq!(out.static_poses.len(), 1);
        let (from, to, pose) = out.static_poses[0];
        assert_eq!((from, to), (ChannelKind::InfraredRight, ChannelKind::InfraredLeft));
        assert!(pose.translation[0] > 0.0);
        assert_eq!(out.bundles.len(), 4);
    }

    #[test]
    fn test_auto_exposure_change_applied_on_next_tick() {
        let device = SimDevice::ae400("SN1");
        let log = device.log();
        let mut driver = SimDriver::new().with_device(device);
        let mut camera = Camera::open(&mut driver, &small(), clock()).unwrap();
        let mut out = CollectingPublisher::default();

        camera.tick(&mut out).unwrap();
        camera.set_auto_exposure(false);
        assert!(!camera.auto_exposure());
        camera.tick(&mut out).unwrap();

        let ae: Vec<f32> = log
            .option_writes()
            .into_iter()
            .filter(|(_, o, _)| *o == OptionKind::EnableAutoExposure)
            .map(|(_, _, v)| v)
            .collect();
        assert_eq!(ae, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_no_streams_ticks_publish_nothing() {
        let mut driver = SimDriver::new().with_device(SimDevice::ae400("SN1"));
        let mut config = small();
        config.streams.enable_color = false;
        config.streams.enable_depth = false;
        let mut camera = Camera::open(&mut driver, &config, clock()).unwrap();
        let mut out = CollectingPublisher::default();

        let report = camera.tick(&mut out).unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(out.bundles.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent_and_ticks_fail_after() {
        let device = SimDevice::ae400("SN1");
        let log = device.log();
        let mut driver = SimDriver::new().with_device(device);
        let mut camera = Camera::open(&mut driver, &small(), clock()).unwrap();

        camera.stop();
        camera.stop();
        assert!(!camera.is_active());
        assert!(matches!(
            camera.tick(&mut CollectingPublisher::default()),
            Err(CameraError::Inactive)
        ));
        drop(camera);

        let events = log.events();
        let count = |target: &SimEvent| events.iter().filter(|e| *e == target).count();
        assert_eq!(count(&SimEvent::StopAttempted), 1);
        assert_eq!(count(&SimEvent::ReleaseAttempted), 1);
    }
}
