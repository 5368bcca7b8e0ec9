//! Stream negotiation and ownership of the running pipeline.

use crate::camera::CameraError;
use crate::driver::{Pipeline, PixelFormat, StreamKind, StreamRequest};
use crate::profiles::{DeviceProfile, GroupSpec};
use crate::session::Session;
use ae400_core::{ChannelKind, Pose3};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-facing structural stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Image height shared by color and depth.
    pub rows: u32,
    /// Image width shared by color and depth.
    pub cols: u32,
    pub color_framerate: u32,
    pub depth_framerate: u32,
    pub ir_framerate: u32,
    pub enable_color: bool,
    pub enable_depth: bool,
    pub enable_ir_stereo: bool,
    pub enable_imu: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            rows: 360,
            cols: 640,
            color_framerate: 30,
            depth_framerate: 30,
            ir_framerate: 30,
            enable_color: true,
            enable_depth: true,
            enable_ir_stereo: false,
            enable_imu: false,
        }
    }
}

bitflags! {
    /// Set of enabled hardware streams.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnabledStreams: u8 {
        const COLOR = 1;
        const DEPTH = 1 << 1;
        /// Left and right infrared, always enabled as a pair.
        const INFRARED = 1 << 2;
        const MOTION = 1 << 3;
    }
}

impl EnabledStreams {
    pub fn has_channel(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Color => self.contains(Self::COLOR),
            ChannelKind::Depth => self.contains(Self::DEPTH),
            ChannelKind::InfraredLeft | ChannelKind::InfraredRight => {
                self.contains(Self::INFRARED)
            }
        }
    }
}

impl fmt::Display for EnabledStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        f.write_str(&names.join("+"))
    }
}

/// Resolved stream set, ready to start.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPlan {
    pub enabled: EnabledStreams,
    pub requests: Vec<StreamRequest>,
    /// Groups with at least one enabled channel, restricted to those channels.
    pub groups: Vec<GroupSpec>,
}

/// Owns the capture pipeline for the lifetime of a session.
pub struct StreamOrchestrator {
    plan: StreamPlan,
    pipeline: Option<Box<dyn Pipeline>>,
    ir_extrinsics: Option<Pose3>,
    active: bool,
}

impl StreamOrchestrator {
    /// Resolve `settings` against the device profile.
    pub fn plan(
        settings: &StreamSettings,
        profile: &DeviceProfile,
    ) -> Result<StreamPlan, CameraError> {
        // Depth is reconstructed from the infrared pair, so both run at one rate.
        if settings.enable_ir_stereo
            && settings.enable_depth
            && settings.ir_framerate != settings.depth_framerate
        {
            return Err(CameraError::Configuration(format!(
                "infrared ({} fps) and depth ({} fps) must use the same framerate",
                settings.ir_framerate, settings.depth_framerate
            )));
        }

        let mut enabled = EnabledStreams::empty();
        let mut requests = Vec::new();
        let mut request = |kind: StreamKind, format: PixelFormat, framerate: u32| {
            let channel = kind.channel();
            if let Some(channel) = channel {
                if !profile.supports(channel) {
                    return Err(CameraError::Configuration(format!(
                        "{channel} stream is not available on {} devices",
                        profile.name()
                    )));
                }
            }
            requests.push(StreamRequest {
                kind,
                width: if channel.is_some() { settings.cols } else { 0 },
                height: if channel.is_some() { settings.rows } else { 0 },
                format,
                framerate,
            });
            Ok(())
        };

        if settings.enable_color {
            request(StreamKind::Color, PixelFormat::Rgb8, settings.color_framerate)?;
            enabled.insert(EnabledStreams::COLOR);
        }
        if settings.enable_depth {
            request(StreamKind::Depth, PixelFormat::Z16, settings.depth_framerate)?;
            enabled.insert(EnabledStreams::DEPTH);
        }
        if settings.enable_ir_stereo {
            request(StreamKind::InfraredLeft, PixelFormat::Y8, settings.ir_framerate)?;
            request(StreamKind::InfraredRight, PixelFormat::Y8, settings.ir_framerate)?;
            enabled.insert(EnabledStreams::INFRARED);
        }
        if settings.enable_imu {
            if !profile.supports_motion() {
                return Err(CameraError::Configuration(format!(
                    "motion stream is not available on {} devices",
                    profile.name()
                )));
            }
            request(StreamKind::Motion, PixelFormat::MotionXyz32f, 0)?;
            enabled.insert(EnabledStreams::MOTION);
        }

        let groups = profile
            .groups
            .iter()
            .filter_map(|spec| {
                let channels: Vec<ChannelKind> = spec
                    .channels
                    .iter()
                    .copied()
                    .filter(|c| enabled.has_channel(*c))
                    .collect();
                (!channels.is_empty()).then(|| GroupSpec {
                    group: spec.group,
                    channels,
                })
            })
            .collect();

        if enabled.is_empty() {
            tracing::warn!("no streams enabled; capture cycles will publish nothing");
        }

        Ok(StreamPlan {
            enabled,
            requests,
            groups,
        })
    }

    /// Start capture for `plan` on the session's device.
    ///
    /// An empty plan starts no pipeline; ticks then do nothing.
    pub fn start(session: &mut Session, plan: StreamPlan) -> Result<Self, CameraError> {
        if plan.requests.is_empty() {
            return Ok(Self {
                plan,
                pipeline: None,
                ir_extrinsics: None,
                active: true,
            });
        }

        let mut pipeline = session.start(&plan.requests).map_err(|e| {
            tracing::error!(
                function = %e.function,
                args = %e.args,
                message = %e.message,
                "capture pipeline failed to start"
            );
            CameraError::DeviceOpen(e)
        })?;

        let mut ir_extrinsics = None;
        if plan.enabled.contains(EnabledStreams::INFRARED) {
            match pipeline.extrinsics(StreamKind::InfraredRight, StreamKind::InfraredLeft) {
                Ok(pose) => ir_extrinsics = Some(pose),
                Err(e) => {
                    if let Err(stop_err) = pipeline.stop() {
                        tracing::warn!(
                            error = %stop_err,
                            "pipeline stop failed after extrinsics error"
                        );
                    }
                    return Err(CameraError::DeviceOpen(e));
                }
            }
        }

        tracing::info!(streams = %plan.enabled, "capture pipeline started");

        Ok(Self {
            plan,
            pipeline: Some(pipeline),
            ir_extrinsics,
            active: true,
        })
    }

    pub fn plan_ref(&self) -> &StreamPlan {
        &self.plan
    }

    /// Right-to-left infrared transform, fixed for the session.
    pub fn ir_extrinsics(&self) -> Option<Pose3> {
        self.ir_extrinsics
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut (dyn Pipeline + 'static)> {
        self.pipeline.as_deref_mut()
    }

    /// Stop capture. Safe to call repeatedly; driver failures are logged.
    pub fn stop(&mut self) {
        self.active = false;
        if let Some(mut pipeline) = self.pipeline.take() {
            match pipeline.stop() {
                Ok(()) => tracing::info!("capture pipeline stopped"),
                Err(e) => tracing::warn!(error = %e, "capture pipeline stop failed"),
            }
        }
    }
}
