use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Depth image in metres, one `f32` per pixel.
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Metres per raw Z16 depth unit.
pub const DEPTH_SCALE_METERS: f32 = 0.001;

/// Valid range annotation attached to every depth bundle.
pub const DEPTH_RANGE: DepthRange = DepthRange {
    min_meters: 0.0,
    max_meters: 10.0,
};

/// Logical stream group: channels sharing one device timing domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamGroup {
    /// Color and depth, serviced by the RGB/stereo timing domain.
    ColorDepth,
    /// Left and right infrared imagers.
    StereoInfrared,
}

impl StreamGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColorDepth => "color_depth",
            Self::StereoInfrared => "stereo_infrared",
        }
    }
}

impl fmt::Display for StreamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image channel the camera can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Color,
    Depth,
    InfraredLeft,
    InfraredRight,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Depth => "depth",
            Self::InfraredLeft => "infrared_left",
            Self::InfraredRight => "infrared_right",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pinhole intrinsics of one image stream, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pinhole {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    /// Principal point, x coordinate.
    pub ppx: f64,
    /// Principal point, y coordinate.
    pub ppy: f64,
}

/// Rigid transform between two sensors.
///
/// `rotation` is row-major; `translation` is in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3 {
    pub rotation: [[f32; 3]; 3],
    pub translation: [f32; 3],
}

impl Pose3 {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }
}

/// Minimum and maximum plausible depth, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub min_meters: f32,
    pub max_meters: f32,
}

/// Pixel payload of a channel.
#[derive(Debug, Clone)]
pub enum ChannelImage {
    Rgb(RgbImage),
    Gray(GrayImage),
    Depth(DepthImage),
}

impl ChannelImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Rgb(img) => img.dimensions(),
            Self::Gray(img) => img.dimensions(),
            Self::Depth(img) => img.dimensions(),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BundleError {
    #[error("{kind} channel cannot carry a {payload} image")]
    PayloadMismatch {
        kind: ChannelKind,
        payload: &'static str,
    },
    #[error("{kind} image is {width}x{height}, intrinsics say {pinhole_width}x{pinhole_height}")]
    SizeMismatch {
        kind: ChannelKind,
        width: u32,
        height: u32,
        pinhole_width: u32,
        pinhole_height: u32,
    },
}

/// One image plus the intrinsics of the stream that produced it.
#[derive(Debug, Clone)]
pub struct Channel {
    pub kind: ChannelKind,
    pub image: ChannelImage,
    pub pinhole: Pinhole,
}

impl Channel {
    /// Build a channel, checking that the payload suits the channel kind
    /// and that the image matches the intrinsics' resolution.
    pub fn new(
        kind: ChannelKind,
        image: ChannelImage,
        pinhole: Pinhole,
    ) -> Result<Self, BundleError> {
        let payload = match &image {
            ChannelImage::Rgb(_) => "rgb",
            ChannelImage::Gray(_) => "gray",
            ChannelImage::Depth(_) => "depth",
        };
        let compatible = matches!(
            (kind, &image),
            (ChannelKind::Color, ChannelImage::Rgb(_))
                | (ChannelKind::Depth, ChannelImage::Depth(_))
                | (ChannelKind::InfraredLeft, ChannelImage::Gray(_))
                | (ChannelKind::InfraredRight, ChannelImage::Gray(_))
        );
        if !compatible {
            return Err(BundleError::PayloadMismatch { kind, payload });
        }

        let (width, height) = image.dimensions();
        if width != pinhole.width || height != pinhole.height {
            return Err(BundleError::SizeMismatch {
                kind,
                width,
                height,
                pinhole_width: pinhole.width,
                pinhole_height: pinhole.height,
            });
        }

        Ok(Self {
            kind,
            image,
            pinhole,
        })
    }
}

/// Everything one stream group produced in one capture cycle.
///
/// Every channel shares `timestamp_ns`, the host-aligned acquisition time.
#[derive(Debug, Clone)]
pub struct FrameBundle {
    pub group: StreamGroup,
    pub timestamp_ns: i64,
    pub channels: Vec<Channel>,
    /// Present whenever the bundle carries a depth channel.
    pub depth_range: Option<DepthRange>,
}

impl FrameBundle {
    pub fn channel(&self, kind: ChannelKind) -> Option<&Channel> {
        self.channels.iter().find(|c| c.kind == kind)
    }
}

/// One reading from the auxiliary motion sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Device timestamp in seconds.
    pub timestamp_s: f64,
    /// Linear acceleration, m/s².
    pub accel: [f32; 3],
    /// Angular velocity, rad/s.
    pub gyro: [f32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinhole(width: u32, height: u32) -> Pinhole {
        Pinhole {
            width,
            height,
            fx: 380.0,
            fy: 380.0,
            ppx: width as f64 / 2.0,
            ppy: height as f64 / 2.0,
        }
    }

    #[test]
    fn test_channel_accepts_matching_payload() {
        let image = ChannelImage::Rgb(RgbImage::new(4, 2));
        let channel = Channel::new(ChannelKind::Color, image, pinhole(4, 2)).unwrap();
        assert_eq!(channel.kind, ChannelKind::Color);
    }

    #[test]
    fn test_channel_rejects_wrong_payload() {
        let image = ChannelImage::Gray(GrayImage::new(4, 2));
        let err = Channel::new(ChannelKind::Depth, image, pinhole(4, 2)).unwrap_err();
        assert_eq!(
            err,
            BundleError::PayloadMismatch {
                kind: ChannelKind::Depth,
                payload: "gray"
            }
        );
    }

    #[test]
    fn test_channel_rejects_size_mismatch() {
        let image = ChannelImage::Depth(DepthImage::new(4, 2));
        let err = Channel::new(ChannelKind::Depth, image, pinhole(8, 2)).unwrap_err();
        assert!(matches!(err, BundleError::SizeMismatch { width: 4, pinhole_width: 8, .. }));
    }

    #[test]
    fn test_pose_identity_leaves_point() {
        let p = [0.5, -1.0, 2.0];
        assert_eq!(Pose3::identity().transform_point(p), p);
    }

    #[test]
    fn test_pose_translation() {
        let pose = Pose3 {
            translation: [0.05, 0.0, 0.0],
            ..Pose3::identity()
        };
        let out = pose.transform_point([0.0, 0.0, 1.0]);
        assert!((out[0] - 0.05).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_group_and_channel_serde_names() {
        assert_eq!(
            serde_json::to_string(&StreamGroup::StereoInfrared).unwrap(),
            "\"stereo_infrared\""
        );
        let kind: ChannelKind = serde_json::from_str("\"infrared_right\"").unwrap();
        assert_eq!(kind, ChannelKind::InfraredRight);
        assert_eq!(kind.to_string(), "infrared_right");
    }
}
