//! Simulated driver backend.
//!
//! Produces synthetic frame sets with one device clock per stream group,
//! and can be scripted to time out, jump its clocks, reject options, or fail
//! to start and stop. Used by the tests, the daemon's `sim` driver, and CLI
//! diagnostics.

use crate::capture::Publisher;
use crate::driver::{
    Device, DeviceInfo, Driver, DriverError, FrameSet, OptionKind, OptionRange, Pipeline,
    PixelFormat, RawFrame, RawMotion, Sensor, StreamKind, StreamRequest, VideoProfile, WaitError,
};
use ae400_core::{ChannelKind, FrameBundle, ImuSample, Pose3, StreamGroup};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Device clock at the first color/depth frame.
const RGBD_CLOCK_START_NS: i64 = 1_000_000_000;
/// Device clock at the first infrared frame; a separate timing domain.
const IR_CLOCK_START_NS: i64 = 250_000_000_000;
/// How long `wait_for_frames` claims to have waited on a scripted timeout.
const SIM_TIMEOUT: Duration = Duration::from_millis(5000);
/// Right-to-left infrared baseline, metres.
const SIM_BASELINE_M: f32 = 0.05;
/// Horizontal shift between the simulated infrared images, pixels.
const SIM_DISPARITY_PX: u32 = 8;

/// Something the simulated hardware was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    OptionSet {
        sensor: String,
        option: OptionKind,
        value: f32,
    },
    PipelineStarted(Vec<StreamKind>),
    StopAttempted,
    ReleaseAttempted,
}

/// Shared record of [`SimEvent`]s, cloneable into every simulated part.
#[derive(Debug, Clone, Default)]
pub struct SimLog(Arc<Mutex<Vec<SimEvent>>>);

impl SimLog {
    fn push(&self, event: SimEvent) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Successful option writes as `(sensor, option, value)`.
    pub fn option_writes(&self) -> Vec<(String, OptionKind, f32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::OptionSet {
                    sensor,
                    option,
                    value,
                } => Some((sensor, option, value)),
                _ => None,
            })
            .collect()
    }
}

/// A simulated sensor with a fixed option table.
#[derive(Debug, Clone)]
pub struct SimSensor {
    name: String,
    options: Vec<(OptionKind, OptionRange)>,
    rejects: Vec<OptionKind>,
    log: SimLog,
}

impl SimSensor {
    pub fn new(name: impl Into<String>, log: SimLog) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
            rejects: Vec::new(),
            log,
        }
    }

    pub fn with_option(mut self, option: OptionKind, range: OptionRange) -> Self {
        self.options.push((option, range));
        self
    }

    /// Fail every write of `option`, whatever the value.
    pub fn rejecting(mut self, option: OptionKind) -> Self {
        self.rejects.push(option);
        self
    }

    fn range(&self, option: OptionKind) -> Option<OptionRange> {
        self.options
            .iter()
            .find(|(o, _)| *o == option)
            .map(|(_, r)| *r)
    }
}

impl Sensor for SimSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, option: OptionKind) -> bool {
        self.range(option).is_some()
    }

    fn option_range(&self, option: OptionKind) -> Result<OptionRange, DriverError> {
        self.range(option).ok_or_else(|| {
            DriverError::new(
                "rs2_get_option_range",
                format!("{}, {option}", self.name),
                "option not supported by this sensor",
            )
        })
    }

    fn set_option(&mut self, option: OptionKind, value: f32) -> Result<(), DriverError> {
        let args = format!("{}, {option}, {value}", self.name);
        let range = self.option_range(option)?;
        if self.rejects.contains(&option) {
            return Err(DriverError::new(
                "rs2_set_option",
                args,
                "hardware refused the request",
            ));
        }
        if !range.accepts(value) {
            return Err(DriverError::new(
                "rs2_set_option",
                args,
                "value out of range",
            ));
        }
        self.log.push(SimEvent::OptionSet {
            sensor: self.name.clone(),
            option,
            value,
        });
        Ok(())
    }
}

/// Scripted device-clock epoch change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockJump {
    pub group: StreamGroup,
    /// Zero-based `wait_for_frames` call the jump happens before.
    pub at_cycle: u64,
    /// New device clock value, milliseconds.
    pub to_ms: f64,
}

#[derive(Debug, Clone, Default)]
struct SimScript {
    depth_skew_ns: i64,
    timeouts: Vec<u64>,
    jumps: Vec<ClockJump>,
    realtime: bool,
}

/// Description of a simulated device; each enumeration hands out a fresh instance.
#[derive(Debug, Clone)]
pub struct SimDevice {
    info: DeviceInfo,
    sensors: Vec<SimSensor>,
    streams: Vec<StreamKind>,
    script: SimScript,
    start_error: Option<DriverError>,
    fail_stop: bool,
    fail_release: bool,
    fail_extrinsics: bool,
    log: SimLog,
}

fn range(min: f32, max: f32, step: f32, default: f32) -> OptionRange {
    OptionRange {
        min,
        max,
        step,
        default,
    }
}

impl SimDevice {
    pub fn new(name: &str, serial: &str, product_line: &str) -> Self {
        Self {
            info: DeviceInfo {
                name: name.into(),
                serial: serial.into(),
                product_line: product_line.into(),
                firmware_version: "5.12.7.100".into(),
                recommended_firmware_version: "5.12.7.100".into(),
            },
            sensors: Vec::new(),
            streams: Vec::new(),
            script: SimScript::default(),
            start_error: None,
            fail_stop: false,
            fail_release: false,
            fail_extrinsics: false,
            log: SimLog::default(),
        }
    }

    /// Extended variant: color, depth, stereo infrared, motion.
    pub fn ae400(serial: &str) -> Self {
        let mut device = Self::new("Intel RealSense AE400", serial, "AE400");
        device.streams = vec![
            StreamKind::Color,
            StreamKind::Depth,
            StreamKind::InfraredLeft,
            StreamKind::InfraredRight,
            StreamKind::Motion,
        ];
        device.with_standard_sensors(true)
    }

    /// Plain stereo depth variant: color and depth only.
    pub fn d400(serial: &str) -> Self {
        let mut device = Self::new("Intel RealSense D435", serial, "D400");
        device.streams = vec![StreamKind::Color, StreamKind::Depth];
        device.with_standard_sensors(false)
    }

    fn with_standard_sensors(mut self, motion: bool) -> Self {
        let log = self.log.clone();
        let queue = range(0.0, 32.0, 1.0, 16.0);
        let toggle = range(0.0, 1.0, 1.0, 1.0);

        self.sensors.push(
            SimSensor::new("Stereo Module", log.clone())
                .with_option(OptionKind::FramesQueueSize, queue)
                .with_option(OptionKind::EmitterEnabled, range(0.0, 2.0, 1.0, 1.0))
                .with_option(OptionKind::LaserPower, range(0.0, 360.0, 30.0, 150.0))
                .with_option(OptionKind::EnableAutoExposure, toggle),
        );
        self.sensors.push(
            SimSensor::new("RGB Camera", log.clone())
                .with_option(OptionKind::FramesQueueSize, queue)
                .with_option(OptionKind::AutoExposurePriority, toggle)
                .with_option(OptionKind::EnableAutoExposure, toggle),
        );
        if motion {
            self.sensors.push(
                SimSensor::new("Motion Module", log)
                    .with_option(OptionKind::FramesQueueSize, queue),
            );
        }
        self
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Handle onto everything this device (and its pipelines) records.
    pub fn log(&self) -> SimLog {
        self.log.clone()
    }

    /// Copies of this device's sensors recording into `log`.
    pub fn sensors_with_log(&self, log: &SimLog) -> Vec<SimSensor> {
        self.sensors
            .iter()
            .cloned()
            .map(|mut s| {
                s.log = log.clone();
                s
            })
            .collect()
    }

    pub fn with_firmware(mut self, current: &str, recommended: &str) -> Self {
        self.info.firmware_version = current.into();
        self.info.recommended_firmware_version = recommended.into();
        self
    }

    /// Depth frames are stamped this much later than color on the device clock.
    pub fn with_depth_skew_ms(mut self, skew_ms: f64) -> Self {
        self.script.depth_skew_ns = (skew_ms * 1_000_000.0).round() as i64;
        self
    }

    pub fn with_clock_jump(mut self, jump: ClockJump) -> Self {
        self.script.jumps.push(jump);
        self
    }

    /// Zero-based cycles whose frame set never arrives.
    pub fn with_timeouts(mut self, cycles: &[u64]) -> Self {
        self.script.timeouts.extend_from_slice(cycles);
        self
    }

    /// Pace `wait_for_frames` to the requested framerate.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.script.realtime = realtime;
        self
    }

    pub fn failing_start(mut self, function: &str, args: &str, message: &str) -> Self {
        self.start_error = Some(DriverError::new(function, args, message));
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Fail every calibration query on pipelines this device starts.
    pub fn failing_extrinsics(mut self) -> Self {
        self.fail_extrinsics = true;
        self
    }
}

/// Driver enumerating a fixed list of simulated devices.
#[derive(Debug, Clone, Default)]
pub struct SimDriver {
    devices: Vec<SimDevice>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: SimDevice) -> Self {
        self.devices.push(device);
        self
    }
}

impl Driver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    fn query_devices(&mut self) -> Result<Vec<Box<dyn Device>>, DriverError> {
        Ok(self
            .devices
            .iter()
            .map(|spec| {
                Box::new(SimDeviceHandle {
                    sensors: spec
                        .sensors
                        .iter()
                        .cloned()
                        .map(|s| Box::new(s) as Box<dyn Sensor>)
                        .collect(),
                    spec: spec.clone(),
                }) as Box<dyn Device>
            })
            .collect())
    }
}

struct SimDeviceHandle {
    spec: SimDevice,
    sensors: Vec<Box<dyn Sensor>>,
}

impl Device for SimDeviceHandle {
    fn info(&self) -> &DeviceInfo {
        &self.spec.info
    }

    fn sensors_mut(&mut self) -> &mut [Box<dyn Sensor>] {
        &mut self.sensors
    }

    fn start(&mut self, streams: &[StreamRequest]) -> Result<Box<dyn Pipeline>, DriverError> {
        if let Some(err) = &self.spec.start_error {
            return Err(err.clone());
        }

        let args = format!("{}, {} streams", self.spec.info.serial, streams.len());
        if let Some(missing) = streams
            .iter()
            .find(|r| !self.spec.streams.contains(&r.kind))
        {
            return Err(DriverError::new(
                "rs2_pipeline_start_with_config",
                args,
                format!("{:?} stream not provided by this device", missing.kind),
            ));
        }
        let rate = |kind: StreamKind| streams.iter().find(|r| r.kind == kind).map(|r| r.framerate);
        if let (Some(depth), Some(ir)) = (rate(StreamKind::Depth), rate(StreamKind::InfraredLeft)) {
            if depth != ir {
                return Err(DriverError::new(
                    "rs2_pipeline_start_with_config",
                    args,
                    "Couldn't resolve requests",
                ));
            }
        }

        self.spec.log.push(SimEvent::PipelineStarted(
            streams.iter().map(|r| r.kind).collect(),
        ));
        tracing::debug!(
            serial = %self.spec.info.serial,
            streams = streams.len(),
            "sim pipeline started"
        );

        let rgbd_rate = rate(StreamKind::Color)
            .or_else(|| rate(StreamKind::Depth))
            .unwrap_or(30);
        let ir_rate = rate(StreamKind::InfraredLeft).unwrap_or(30);

        Ok(Box::new(SimPipeline {
            requests: streams.to_vec(),
            script: self.spec.script.clone(),
            cycle: 0,
            clocks: BTreeMap::from([
                (StreamGroup::ColorDepth, RGBD_CLOCK_START_NS),
                (StreamGroup::StereoInfrared, IR_CLOCK_START_NS),
            ]),
            periods: BTreeMap::from([
                (StreamGroup::ColorDepth, period_ns(rgbd_rate)),
                (StreamGroup::StereoInfrared, period_ns(ir_rate)),
            ]),
            pending_motion: None,
            fail_stop: self.spec.fail_stop,
            fail_extrinsics: self.spec.fail_extrinsics,
            log: self.spec.log.clone(),
        }))
    }

    fn release(&mut self) -> Result<(), DriverError> {
        self.spec.log.push(SimEvent::ReleaseAttempted);
        if self.spec.fail_release {
            return Err(DriverError::new(
                "rs2_delete_device",
                self.spec.info.serial.clone(),
                "device disconnected",
            ));
        }
        Ok(())
    }
}

fn period_ns(framerate: u32) -> i64 {
    1_000_000_000 / i64::from(framerate.max(1))
}

struct SimPipeline {
    requests: Vec<StreamRequest>,
    script: SimScript,
    cycle: u64,
    clocks: BTreeMap<StreamGroup, i64>,
    periods: BTreeMap<StreamGroup, i64>,
    pending_motion: Option<RawMotion>,
    fail_stop: bool,
    fail_extrinsics: bool,
    log: SimLog,
}

impl SimPipeline {
    fn requested(&self, kind: StreamKind) -> bool {
        self.requests.iter().any(|r| r.kind == kind)
    }

    fn clock(&self, group: StreamGroup) -> i64 {
        self.clocks.get(&group).copied().unwrap_or_default()
    }
}

impl Pipeline for SimPipeline {
    fn wait_for_frames(&mut self) -> Result<FrameSet, WaitError> {
        let cycle = self.cycle;
        self.cycle += 1;

        for jump in self.script.jumps.iter().filter(|j| j.at_cycle == cycle) {
            self.clocks
                .insert(jump.group, (jump.to_ms * 1_000_000.0).round() as i64);
        }

        let rgbd_ns = self.clock(StreamGroup::ColorDepth);
        let ir_ns = self.clock(StreamGroup::StereoInfrared);
        let frames = self
            .requests
            .iter()
            .filter(|r| r.kind != StreamKind::Motion)
            .map(|r| {
                let device_ns = match r.kind {
                    StreamKind::Depth => rgbd_ns + self.script.depth_skew_ns,
                    StreamKind::InfraredLeft | StreamKind::InfraredRight => ir_ns,
                    _ => rgbd_ns,
                };
                synth_frame(r, device_ns, cycle)
            })
            .collect();

        for (group, period) in &self.periods {
            if let Some(clock) = self.clocks.get_mut(group) {
                *clock += period;
            }
        }

        if self.script.realtime {
            if let Some(period) = self.periods.get(&StreamGroup::ColorDepth) {
                std::thread::sleep(Duration::from_nanos(*period as u64));
            }
        }

        if self.script.timeouts.contains(&cycle) {
            self.pending_motion = None;
            return Err(WaitError::Timeout(SIM_TIMEOUT));
        }

        if self.requested(StreamKind::Motion) {
            self.pending_motion = Some(RawMotion {
                timestamp_ms: rgbd_ns as f64 / 1_000_000.0,
                accel: [0.0, 9.81, 0.0],
                gyro: [0.0, 0.0, 0.01],
            });
        }

        Ok(FrameSet { frames })
    }

    fn align_to(
        &mut self,
        mut frames: FrameSet,
        target: StreamKind,
    ) -> Result<FrameSet, DriverError> {
        let target_profile = frames
            .get(target)
            .map(|f| f.profile)
            .ok_or_else(|| {
                DriverError::new(
                    "rs2_process_frame",
                    format!("align to {target:?}"),
                    "target stream missing from frame set",
                )
            })?;

        for frame in frames
            .frames
            .iter_mut()
            .filter(|f| f.profile.kind == StreamKind::Depth)
        {
            if (frame.profile.width, frame.profile.height)
                != (target_profile.width, target_profile.height)
            {
                return Err(DriverError::new(
                    "rs2_process_frame",
                    format!("align to {target:?}"),
                    "simulated alignment requires matching resolutions",
                ));
            }
            frame.profile = VideoProfile {
                kind: StreamKind::Depth,
                format: frame.profile.format,
                ..target_profile
            };
        }
        Ok(frames)
    }

    fn extrinsics(&self, from: StreamKind, to: StreamKind) -> Result<Pose3, DriverError> {
        let args = format!("{from:?}, {to:?}");
        if self.fail_extrinsics {
            return Err(DriverError::new(
                "rs2_get_extrinsics",
                args,
                "calibration table unreadable",
            ));
        }
        if !self.requested(from) || !self.requested(to) {
            return Err(DriverError::new(
                "rs2_get_extrinsics",
                args,
                "stream not active",
            ));
        }
        let baseline = match (from, to) {
            _ if from == to => 0.0,
            (StreamKind::InfraredRight, StreamKind::InfraredLeft) => SIM_BASELINE_M,
            (StreamKind::InfraredLeft, StreamKind::InfraredRight) => -SIM_BASELINE_M,
            _ => {
                return Err(DriverError::new(
                    "rs2_get_extrinsics",
                    args,
                    "no calibration between these streams",
                ))
            }
        };
        Ok(Pose3 {
            translation: [baseline, 0.0, 0.0],
            ..Pose3::identity()
        })
    }

    fn poll_motion(&mut self) -> Option<RawMotion> {
        self.pending_motion.take()
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.log.push(SimEvent::StopAttempted);
        if self.fail_stop {
            return Err(DriverError::new(
                "rs2_pipeline_stop",
                "pipe",
                "device disconnected",
            ));
        }
        Ok(())
    }
}

fn synth_frame(request: &StreamRequest, device_ns: i64, cycle: u64) -> RawFrame {
    let w = request.width;
    let h = request.height;
    let focal = match request.kind {
        StreamKind::Color => 0.95 * f64::from(w),
        _ => 0.6 * f64::from(w),
    };
    let profile = VideoProfile {
        kind: request.kind,
        width: w,
        height: h,
        format: request.format,
        fx: focal,
        fy: focal,
        ppx: (f64::from(w) - 1.0) / 2.0,
        ppy: (f64::from(h) - 1.0) / 2.0,
    };

    let c = (cycle % 256) as u32;
    let (stride, data) = match request.format {
        PixelFormat::Rgb8 => {
            // Padded rows, as the hardware delivers them.
            let stride = w as usize * 3 + 4;
            let mut data = vec![0u8; stride * h as usize];
            for y in 0..h {
                for x in 0..w {
                    let i = y as usize * stride + x as usize * 3;
                    data[i..i + 3].copy_from_slice(&[x as u8, y as u8, c as u8]);
                }
            }
            (stride, data)
        }
        PixelFormat::Z16 => {
            let stride = w as usize * 2;
            let mut data = Vec::with_capacity(stride * h as usize);
            for y in 0..h {
                for x in 0..w {
                    let mm = (1000 + x + y) as u16;
                    data.extend_from_slice(&mm.to_le_bytes());
                }
            }
            (stride, data)
        }
        PixelFormat::Y8 => {
            let shift = if request.kind == StreamKind::InfraredRight {
                SIM_DISPARITY_PX
            } else {
                0
            };
            let data = (0..h)
                .flat_map(|y| (0..w).map(move |x| (x + shift + y + c) as u8))
                .collect();
            (w as usize, data)
        }
        PixelFormat::MotionXyz32f => (0, Vec::new()),
    };

    RawFrame {
        profile,
        timestamp_ms: device_ns as f64 / 1_000_000.0,
        stride,
        data,
    }
}

/// Publisher that keeps everything in memory.
#[derive(Debug, Default)]
pub struct CollectingPublisher {
    pub bundles: Vec<FrameBundle>,
    pub static_poses: Vec<(ChannelKind, ChannelKind, Pose3)>,
    pub imu: Vec<ImuSample>,
}

impl CollectingPublisher {
    /// The `n`th bundle published for `group`.
    pub fn bundle(&self, group: StreamGroup, n: usize) -> Option<&FrameBundle> {
        self.bundles.iter().filter(|b| b.group == group).nth(n)
    }
}

impl Publisher for CollectingPublisher {
    fn publish_bundle(&mut self, bundle: FrameBundle) {
        self.bundles.push(bundle);
    }

    fn publish_static_pose(&mut self, from: ChannelKind, to: ChannelKind, pose: Pose3) {
        self.static_poses.push((from, to, pose));
    }

    fn publish_imu(&mut self, sample: ImuSample) {
        self.imu.push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: StreamKind, format: PixelFormat, framerate: u32) -> StreamRequest {
        StreamRequest {
            kind,
            width: 4,
            height: 2,
            format,
            framerate,
        }
    }

    fn start(device: SimDevice, requests: &[StreamRequest]) -> Box<dyn Pipeline> {
        let mut driver = SimDriver::new().with_device(device);
        let mut devices = driver.query_devices().unwrap();
        devices.remove(0).start(requests).map_err(|e| e.to_string()).unwrap()
    }

    #[test]
    fn test_query_returns_fresh_devices() {
        let mut driver = SimDriver::new()
            .with_device(SimDevice::ae400("A"))
            .with_device(SimDevice::d400("B"));
        let devices = driver.query_devices().unwrap();
        let serials: Vec<&str> = devices.iter().map(|d| d.info().serial.as_str()).collect();
        assert_eq!(serials, vec!["A", "B"]);
    }

    #[test]
    fn test_device_clock_advances_per_cycle() {
        let mut pipeline = start(
            SimDevice::ae400("A"),
            &[request(StreamKind::Color, PixelFormat::Rgb8, 30)],
        );
        let a = pipeline.wait_for_frames().unwrap();
        let b = pipeline.wait_for_frames().unwrap();
        let ta = a.get(StreamKind::Color).unwrap().timestamp_ms;
        let tb = b.get(StreamKind::Color).unwrap().timestamp_ms;
        assert!((ta - 1000.0).abs() < 1e-9);
        assert!((tb - ta - 33.333333).abs() < 1e-6);
    }

    #[test]
    fn test_color_frames_are_padded() {
        let mut pipeline = start(
            SimDevice::ae400("A"),
            &[request(StreamKind::Color, PixelFormat::Rgb8, 30)],
        );
        let frames = pipeline.wait_for_frames().unwrap();
        let color = frames.get(StreamKind::Color).unwrap();
        assert_eq!(color.stride, 4 * 3 + 4);
        assert_eq!(color.data.len(), color.stride * 2);
    }

    #[test]
    fn test_start_rejects_streams_device_lacks() {
        let mut driver = SimDriver::new().with_device(SimDevice::d400("B"));
        let mut devices = driver.query_devices().unwrap();
        let err = devices
            .remove(0)
            .start(&[request(StreamKind::InfraredLeft, PixelFormat::Y8, 30)])
            .err()
            .unwrap();
        assert_eq!(err.function, "rs2_pipeline_start_with_config");
    }

    #[test]
    fn test_start_rejects_mismatched_depth_and_ir_rates() {
        let mut driver = SimDriver::new().with_device(SimDevice::ae400("A"));
        let mut devices = driver.query_devices().unwrap();
        let err = devices
            .remove(0)
            .start(&[
                request(StreamKind::Depth, PixelFormat::Z16, 30),
                request(StreamKind::InfraredLeft, PixelFormat::Y8, 15),
            ])
            .err()
            .unwrap();
        assert_eq!(err.message, "Couldn't resolve requests");
    }

    #[test]
    fn test_scripted_timeout_consumes_cycle() {
        let mut pipeline = start(
            SimDevice::ae400("A").with_timeouts(&[0]),
            &[request(StreamKind::Depth, PixelFormat::Z16, 30)],
        );
        assert!(matches!(
            pipeline.wait_for_frames(),
            Err(WaitError::Timeout(_))
        ));
        assert!(pipeline.wait_for_frames().is_ok());
    }

    #[test]
    fn test_align_requires_target() {
        let mut pipeline = start(
            SimDevice::ae400("A"),
            &[request(StreamKind::Depth, PixelFormat::Z16, 30)],
        );
        let frames = pipeline.wait_for_frames().unwrap();
        let err = pipeline.align_to(frames, StreamKind::Color).unwrap_err();
        assert_eq!(err.function, "rs2_process_frame");
    }

    #[test]
    fn test_extrinsics_need_active_streams() {
        let pipeline = start(
            SimDevice::ae400("A"),
            &[request(StreamKind::Color, PixelFormat::Rgb8, 30)],
        );
        assert!(pipeline
            .extrinsics(StreamKind::InfraredRight, StreamKind::InfraredLeft)
            .is_err());
    }

    #[test]
    fn test_motion_reading_handed_out_once() {
        let mut pipeline = start(
            SimDevice::ae400("A"),
            &[
                request(StreamKind::Color, PixelFormat::Rgb8, 30),
                request(StreamKind::Motion, PixelFormat::MotionXyz32f, 0),
            ],
        );
        pipeline.wait_for_frames().unwrap();
        assert!(pipeline.poll_motion().is_some());
        assert!(pipeline.poll_motion().is_none());
    }
}
