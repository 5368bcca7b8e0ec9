//! Vendor driver boundary.
//!
//! The camera SDK is reached only through these object-safe traits. Every
//! native failure comes back as a [`DriverError`] naming the failing call,
//! its arguments and the SDK's message.

use ae400_core::{ChannelKind, Pose3};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A failed native driver call.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{function}({args}): {message}")]
pub struct DriverError {
    pub function: String,
    pub args: String,
    pub message: String,
}

impl DriverError {
    pub fn new(
        function: impl Into<String>,
        args: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            function: function.into(),
            args: args.into(),
            message: message.into(),
        }
    }
}

/// Why `wait_for_frames` returned without a frame set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("no frame set within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Sensor controls this driver knows how to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    FramesQueueSize,
    AutoExposurePriority,
    EmitterEnabled,
    LaserPower,
    EnableAutoExposure,
}

impl OptionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FramesQueueSize => "Frames Queue Size",
            Self::AutoExposurePriority => "Auto Exposure Priority",
            Self::EmitterEnabled => "Emitter Enabled",
            Self::LaserPower => "Laser Power",
            Self::EnableAutoExposure => "Enable Auto Exposure",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Valid values for one option on one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

impl OptionRange {
    /// True if `value` lies within bounds and on the step grid.
    pub fn accepts(&self, value: f32) -> bool {
        if value < self.min || value > self.max {
            return false;
        }
        if self.step <= 0.0 {
            return true;
        }
        let steps = (value - self.min) / self.step;
        (steps - steps.round()).abs() < 1e-4
    }
}

/// Identification strings reported by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub product_line: String,
    pub firmware_version: String,
    pub recommended_firmware_version: String,
}

/// Hardware streams that can be requested from a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Color,
    Depth,
    InfraredLeft,
    InfraredRight,
    Motion,
}

impl StreamKind {
    /// The image channel this stream feeds, if any.
    pub fn channel(&self) -> Option<ChannelKind> {
        match self {
            Self::Color => Some(ChannelKind::Color),
            Self::Depth => Some(ChannelKind::Depth),
            Self::InfraredLeft => Some(ChannelKind::InfraredLeft),
            Self::InfraredRight => Some(ChannelKind::InfraredRight),
            Self::Motion => None,
        }
    }

    pub fn for_channel(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Color => Self::Color,
            ChannelKind::Depth => Self::Depth,
            ChannelKind::InfraredLeft => Self::InfraredLeft,
            ChannelKind::InfraredRight => Self::InfraredRight,
        }
    }
}

/// Wire pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGB, 3 bytes/pixel.
    Rgb8,
    /// 16-bit little-endian depth in device units.
    Z16,
    /// 8-bit infrared intensity.
    Y8,
    /// Three `f32` axes per motion sample.
    MotionXyz32f,
}

/// One stream the pipeline is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub framerate: u32,
}

/// Geometry and format of a delivered video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProfile {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
}

/// A raw frame as the driver hands it over.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub profile: VideoProfile,
    /// Device clock, milliseconds.
    pub timestamp_ms: f64,
    /// Bytes per row, including padding.
    pub stride: usize,
    pub data: Vec<u8>,
}

/// Frames the driver delivered together.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    pub frames: Vec<RawFrame>,
}

impl FrameSet {
    pub fn get(&self, kind: StreamKind) -> Option<&RawFrame> {
        self.frames.iter().find(|f| f.profile.kind == kind)
    }
}

/// One motion sensor reading in device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMotion {
    /// Device clock, milliseconds.
    pub timestamp_ms: f64,
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
}

/// A physical sensor inside a device (stereo module, RGB camera, ...).
pub trait Sensor: Send {
    fn name(&self) -> &str;
    fn supports(&self, option: OptionKind) -> bool;
    fn option_range(&self, option: OptionKind) -> Result<OptionRange, DriverError>;
    fn set_option(&mut self, option: OptionKind, value: f32) -> Result<(), DriverError>;
}

/// An enumerated device.
pub trait Device: Send {
    fn info(&self) -> &DeviceInfo;
    fn sensors_mut(&mut self) -> &mut [Box<dyn Sensor>];
    /// Start a capture pipeline producing `streams`.
    fn start(&mut self, streams: &[StreamRequest]) -> Result<Box<dyn Pipeline>, DriverError>;
    /// Release the host-held device handle.
    fn release(&mut self) -> Result<(), DriverError>;
}

/// A running capture pipeline.
pub trait Pipeline: Send {
    /// Block until the next frame set, bounded by the driver's own timeout.
    fn wait_for_frames(&mut self) -> Result<FrameSet, WaitError>;
    /// Spatially align every frame in `frames` to the `target` stream.
    fn align_to(&mut self, frames: FrameSet, target: StreamKind) -> Result<FrameSet, DriverError>;
    /// Fixed transform taking points in `from` sensor coordinates to `to`.
    fn extrinsics(&self, from: StreamKind, to: StreamKind) -> Result<Pose3, DriverError>;
    /// Latest motion reading not yet handed out.
    fn poll_motion(&mut self) -> Option<RawMotion>;
    fn stop(&mut self) -> Result<(), DriverError>;
}

/// Entry point of a driver backend.
pub trait Driver: Send {
    fn name(&self) -> &str;
    fn query_devices(&mut self) -> Result<Vec<Box<dyn Device>>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display_names_call() {
        let err = DriverError::new("rs2_pipeline_start", "pipe:0x1", "Couldn't resolve requests");
        assert_eq!(
            err.to_string(),
            "rs2_pipeline_start(pipe:0x1): Couldn't resolve requests"
        );
    }

    #[test]
    fn test_option_range_accepts_step_grid() {
        let laser = OptionRange {
            min: 0.0,
            max: 360.0,
            step: 30.0,
            default: 150.0,
        };
        assert!(laser.accepts(0.0));
        assert!(laser.accepts(150.0));
        assert!(laser.accepts(360.0));
        assert!(!laser.accepts(155.0));
        assert!(!laser.accepts(390.0));
        assert!(!laser.accepts(-30.0));
    }

    #[test]
    fn test_stream_channel_mapping() {
        for kind in [
            ChannelKind::Color,
            ChannelKind::Depth,
            ChannelKind::InfraredLeft,
            ChannelKind::InfraredRight,
        ] {
            assert_eq!(StreamKind::for_channel(kind).channel(), Some(kind));
        }
        assert_eq!(StreamKind::Motion.channel(), None);
    }
}
