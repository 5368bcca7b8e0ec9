//! ae400-core — Frame bundle types and timestamp synchronization.
//!
//! Hardware-independent half of the AE400 driver: the payloads published
//! each capture cycle and the per-group device-to-host clock translation.

pub mod timestamp;
pub mod types;

pub use timestamp::{TimestampState, TimestampSynchronizer, MAX_DELTA_NS};
pub use types::{
    BundleError, Channel, ChannelImage, ChannelKind, DepthImage, DepthRange, FrameBundle,
    ImuSample, Pinhole, Pose3, StreamGroup, DEPTH_RANGE, DEPTH_SCALE_METERS,
};
