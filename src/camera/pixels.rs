//! Pixel layouts capture devices deliver, and their conversion to RGB.
#![cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]

use image::{ImageFormat, RgbImage};

use super::CameraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8 bit RGB
    Rgb3,
    /// Motion JPEG, one JPEG image per buffer
    Mjpg,
    /// Packed 4:2:2 YUV, two pixels per `Y0 U Y1 V` quad
    Yuyv,
}

impl PixelFormat {
    /// Formats to ask a device for, best first.
    pub const PREFERRED: [PixelFormat; 3] = [PixelFormat::Rgb3, PixelFormat::Mjpg, PixelFormat::Yuyv];

    pub fn fourcc(self) -> &'static [u8; 4] {
        match self {
            PixelFormat::Rgb3 => b"RGB3",
            PixelFormat::Mjpg => b"MJPG",
            PixelFormat::Yuyv => b"YUYV",
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|f| f.fourcc() == fourcc)
    }

    /// Converts one captured buffer of a `width` x `height` frame.
    pub fn decode(self, width: u32, height: u32, buf: &[u8]) -> Result<RgbImage, CameraError> {
        match self {
            PixelFormat::Rgb3 => {
                let len = width as usize * height as usize * 3;
                let pixels = buf.get(..len).ok_or_else(|| short_frame(buf))?;
                RgbImage::from_raw(width, height, pixels.to_vec())
                    .ok_or_else(|| CameraError::Acquisition("frame size mismatch".into()))
            }
            PixelFormat::Mjpg => {
                Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
            }
            PixelFormat::Yuyv => yuyv_to_rgb(width, height, buf),
        }
    }
}

fn short_frame(buf: &[u8]) -> CameraError {
    CameraError::Acquisition(format!("short frame of {} bytes", buf.len()))
}

fn yuyv_to_rgb(width: u32, height: u32, buf: &[u8]) -> Result<RgbImage, CameraError> {
    if width % 2 != 0 {
        return Err(CameraError::Acquisition(format!(
            "YUYV frames need an even width, got {}",
            width
        )));
    }
    let len = width as usize * height as usize * 2;
    let packed = buf.get(..len).ok_or_else(|| short_frame(buf))?;

    let mut rgb = Vec::with_capacity(len / 2 * 3);
    for quad in packed.chunks_exact(4) {
        let (u, v) = (quad[1], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(quad[0], u, v));
        rgb.extend_from_slice(&yuv_to_rgb(quad[2], u, v));
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CameraError::Acquisition("frame size mismatch".into()))
}

/// BT.601 studio swing to full range RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (i32::from(y) - 16);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e + 128),
        clamp(c - 100 * d - 208 * e + 128),
        clamp(c + 516 * d + 128),
    ]
}
