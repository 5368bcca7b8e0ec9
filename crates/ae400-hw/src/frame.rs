//! Raw frame extraction: stride removal, depth scaling, intrinsics.

use crate::driver::{PixelFormat, RawFrame, StreamKind, VideoProfile};
use ae400_core::{BundleError, Channel, ChannelImage, DepthImage, Pinhole, DEPTH_SCALE_METERS};
use image::{GrayImage, RgbImage};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("stride {stride} shorter than row of {row_bytes} bytes")]
    StrideTooSmall { stride: usize, row_bytes: usize },
    #[error("{kind:?} stream delivered unexpected format {format:?}")]
    UnexpectedFormat { kind: StreamKind, format: PixelFormat },
    #[error("{0:?} stream carries no image")]
    NotAnImage(StreamKind),
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

/// Pinhole intrinsics from a stream's video profile.
pub fn pinhole(profile: &VideoProfile) -> Pinhole {
    Pinhole {
        width: profile.width,
        height: profile.height,
        fx: profile.fx,
        fy: profile.fy,
        ppx: profile.ppx,
        ppy: profile.ppy,
    }
}

/// Copy `height` rows of `row_bytes` out of a strided buffer.
fn packed_rows(
    data: &[u8],
    row_bytes: usize,
    height: usize,
    stride: usize,
) -> Result<Vec<u8>, FrameError> {
    if stride < row_bytes {
        return Err(FrameError::StrideTooSmall { stride, row_bytes });
    }
    if height == 0 {
        return Ok(Vec::new());
    }
    // The last row need not carry padding.
    let expected = stride * (height - 1) + row_bytes;
    if data.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }
    if stride == row_bytes {
        return Ok(data[..row_bytes * height].to_vec());
    }
    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in data.chunks(stride).take(height) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Ok(packed)
}

/// RGB8 frame to an owned image.
pub fn rgb8_to_image(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<RgbImage, FrameError> {
    let packed = packed_rows(data, width as usize * 3, height as usize, stride)?;
    let len = packed.len();
    RgbImage::from_raw(width, height, packed).ok_or(FrameError::InvalidLength {
        expected: (width * height * 3) as usize,
        actual: len,
    })
}

/// Y8 infrared frame to an owned image.
pub fn y8_to_image(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<GrayImage, FrameError> {
    let packed = packed_rows(data, width as usize, height as usize, stride)?;
    let len = packed.len();
    GrayImage::from_raw(width, height, packed).ok_or(FrameError::InvalidLength {
        expected: (width * height) as usize,
        actual: len,
    })
}

/// Z16 depth (little-endian device units) to metres.
pub fn z16_to_meters(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    scale: f32,
) -> Result<DepthImage, FrameError> {
    let packed = packed_rows(data, width as usize * 2, height as usize, stride)?;
    let meters: Vec<f32> = packed
        .chunks_exact(2)
        .map(|px| u16::from_le_bytes([px[0], px[1]]) as f32 * scale)
        .collect();
    let len = meters.len();
    DepthImage::from_raw(width, height, meters).ok_or(FrameError::InvalidLength {
        expected: (width * height) as usize,
        actual: len,
    })
}

/// Convert one raw frame into a published channel.
pub fn to_channel(frame: &RawFrame) -> Result<Channel, FrameError> {
    let profile = &frame.profile;
    let kind = profile
        .kind
        .channel()
        .ok_or(FrameError::NotAnImage(profile.kind))?;

    let image = match (profile.kind, profile.format) {
        (StreamKind::Color, PixelFormat::Rgb8) => ChannelImage::Rgb(rgb8_to_image(
            &frame.data,
            profile.width,
            profile.height,
            frame.stride,
        )?),
        (StreamKind::Depth, PixelFormat::Z16) => ChannelImage::Depth(z16_to_meters(
            &frame.data,
            profile.width,
            profile.height,
            frame.stride,
            DEPTH_SCALE_METERS,
        )?),
        (StreamKind::InfraredLeft | StreamKind::InfraredRight, PixelFormat::Y8) => {
            ChannelImage::Gray(y8_to_image(
                &frame.data,
                profile.width,
                profile.height,
                frame.stride,
            )?)
        }
        (kind, format) => return Err(FrameError::UnexpectedFormat { kind, format }),
    };

    Ok(Channel::new(kind, image, pinhole(profile))?)
}
