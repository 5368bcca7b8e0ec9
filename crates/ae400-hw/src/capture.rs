//! Per-cycle capture: toggle-able control sync, frame extraction, and
//! per-group timestamp assignment.

use crate::camera::CameraError;
use crate::clock::HostClock;
use crate::driver::{OptionKind, Pipeline, RawMotion, Sensor, StreamKind, WaitError};
use crate::frame;
use crate::options::{self, flag};
use crate::profiles::GroupSpec;
use crate::streams::{EnabledStreams, StreamPlan};
use ae400_core::{
    Channel, ChannelKind, FrameBundle, ImuSample, Pose3, StreamGroup, TimestampSynchronizer,
    DEPTH_RANGE,
};

/// Output boundary for everything a camera produces.
pub trait Publisher {
    fn publish_bundle(&mut self, bundle: FrameBundle);
    /// A transform that never changes for the rest of the session.
    fn publish_static_pose(&mut self, from: ChannelKind, to: ChannelKind, pose: Pose3);
    fn publish_imu(&mut self, sample: ImuSample);
}

/// What one capture cycle published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub bundles: usize,
    pub channels: usize,
    pub imu: bool,
}

/// Controls that may change while streaming, with the last value written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleControls {
    auto_exposure: bool,
    applied_auto_exposure: Option<bool>,
}

impl ToggleControls {
    /// Nothing is marked applied, so the first sync always writes.
    pub fn new(auto_exposure: bool) -> Self {
        Self {
            auto_exposure,
            applied_auto_exposure: None,
        }
    }

    pub fn auto_exposure(&self) -> bool {
        self.auto_exposure
    }

    pub fn set_auto_exposure(&mut self, enabled: bool) {
        self.auto_exposure = enabled;
    }

    /// Write controls whose desired value differs from the last one applied.
    ///
    /// Returns true if anything was sent to the sensors.
    pub fn sync(&mut self, sensors: &mut [Box<dyn Sensor>]) -> bool {
        if self.applied_auto_exposure == Some(self.auto_exposure) {
            return false;
        }
        for sensor in sensors.iter_mut() {
            options::apply(
                sensor.as_mut(),
                OptionKind::EnableAutoExposure,
                flag(self.auto_exposure),
            );
        }
        tracing::info!(enabled = self.auto_exposure, "auto exposure updated");
        self.applied_auto_exposure = Some(self.auto_exposure);
        true
    }
}

/// Turns frame sets into per-group bundles.
pub struct FrameBundler {
    groups: Vec<GroupSpec>,
    enabled: EnabledStreams,
    align_to_color: bool,
    sync: TimestampSynchronizer,
}

impl FrameBundler {
    pub fn new(plan: &StreamPlan, align_to_color: bool) -> Self {
        Self {
            groups: plan.groups.clone(),
            enabled: plan.enabled,
            align_to_color,
            sync: TimestampSynchronizer::new(plan.groups.iter().map(|g| g.group)),
        }
    }

    pub fn synchronizer(&self) -> &TimestampSynchronizer {
        &self.sync
    }

    /// Run one capture cycle against `pipeline`.
    ///
    /// Nothing is published unless every enabled channel converted cleanly.
    pub fn capture(
        &mut self,
        pipeline: &mut dyn Pipeline,
        clock: &dyn HostClock,
        publisher: &mut dyn Publisher,
    ) -> Result<CycleReport, CameraError> {
        let mut frames = match pipeline.wait_for_frames() {
            Ok(frames) => frames,
            Err(WaitError::Timeout(after)) => {
                tracing::warn!(?after, "timed out waiting for frames; skipping cycle");
                return Err(CameraError::FrameTimeout(after));
            }
            Err(WaitError::Driver(e)) => return Err(CameraError::Driver(e)),
        };
        let host_now = clock.now_ns();

        if self.align_to_color && self.enabled.contains(EnabledStreams::COLOR) {
            frames = pipeline.align_to(frames, StreamKind::Color)?;
        }

        let mut pending: Vec<(StreamGroup, i64, Vec<Channel>)> =
            Vec::with_capacity(self.groups.len());
        for spec in &self.groups {
            let mut raw_ns = None;
            let mut channels = Vec::with_capacity(spec.channels.len());
            for &kind in &spec.channels {
                let Some(raw) = frames.get(StreamKind::for_channel(kind)) else {
                    continue;
                };
                // First channel present in priority order stamps the group.
                raw_ns.get_or_insert_with(|| ms_to_ns(raw.timestamp_ms));
                channels.push(frame::to_channel(raw)?);
            }
            match raw_ns {
                Some(raw_ns) => pending.push((spec.group, raw_ns, channels)),
                None => tracing::debug!(group = %spec.group, "no frames for group this cycle"),
            }
        }

        let mut report = CycleReport::default();
        for (group, raw_ns, channels) in pending {
            let timestamp_ns = self.sync.translate(group, raw_ns, host_now);
            let depth_range = channels
                .iter()
                .any(|c| c.kind == ChannelKind::Depth)
                .then_some(DEPTH_RANGE);
            report.bundles += 1;
            report.channels += channels.len();
            publisher.publish_bundle(FrameBundle {
                group,
                timestamp_ns,
                channels,
                depth_range,
            });
        }

        if self.enabled.contains(EnabledStreams::MOTION) {
            if let Some(raw) = pipeline.poll_motion() {
                publisher.publish_imu(imu_sample(&raw));
                report.imu = true;
            }
        }

        Ok(report)
    }
}

fn ms_to_ns(ms: f64) -> i64 {
    (ms * 1_000_000.0).round() as i64
}

fn imu_sample(raw: &RawMotion) -> ImuSample {
    ImuSample {
        timestamp_s: raw.timestamp_ms / 1_000.0,
        accel: raw.accel,
        gyro: raw.gyro,
    }
}
