//! Local capture devices through V4L2.
//!
//! Devices are addressed by index, `/dev/video{port}`. Packed RGB is preferred, MJPG and
//! YUYV frames are converted on capture.

use async_trait::async_trait;
use ouroboros::self_referencing;
use tracing::{debug, warn};

use super::{pixels::PixelFormat, CameraError, CameraProvider, Frame, FrameSource};
use crate::config::ConfigCamera;

const BUFFER_COUNT: u32 = 4;

pub struct V4lCameras {
    width: u32,
    height: u32,
}

impl V4lCameras {
    pub fn new(config: &ConfigCamera) -> Self {
        Self {
            width: config.width,
            height: config.height,
        }
    }
}

#[async_trait]
impl CameraProvider for V4lCameras {
    type Source = V4lCamera;

    async fn open(&self, port: u32) -> Result<V4lCamera, CameraError> {
        let (width, height) = (self.width, self.height);
        tokio::task::block_in_place(|| V4lCamera::open(port, width, height))
    }
}

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4lCamera {
    port: u32,
    width: u32,
    height: u32,
    pixels: PixelFormat,
    state: Option<CaptureState>,
}

/// Asks the device for each known layout in turn and keeps the first it accepts.
fn negotiate(
    device: &v4l::Device,
    port: u32,
    width: u32,
    height: u32,
) -> Result<(v4l::Format, PixelFormat), CameraError> {
    use v4l::video::Capture;

    for wanted in PixelFormat::PREFERRED {
        let mut format = device.format()?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(wanted.fourcc());
        match device.set_format(&format) {
            Ok(format) => {
                if let Some(pixels) = PixelFormat::from_fourcc(&format.fourcc.repr) {
                    return Ok((format, pixels));
                }
                debug!(port, "Device offered {} when asked for {:?}", format.fourcc, wanted);
            }
            Err(e) => warn!(port, "Failed to set capture format {:?}: {}", wanted, e),
        }
    }
    let current = device.format()?;
    Err(CameraError::Unsupported(format!(
        "device {} delivers {}, expected RGB3, MJPG or YUYV",
        port, current.fourcc
    )))
}

impl V4lCamera {
    fn open(port: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        use v4l::buffer::Type;

        let device = v4l::Device::new(port as usize)?;
        let (format, pixels) = negotiate(&device, port, width, height)?;

        let state = CaptureStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()?;
        debug!(
            port,
            width = format.width,
            height = format.height,
            format = ?pixels,
            "Capture started"
        );

        Ok(Self {
            port,
            width: format.width,
            height: format.height,
            pixels,
            state: Some(state),
        })
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CameraError::Acquisition("camera closed".into()))?;
        let raw = state.with_mut(|fields| -> Result<Vec<u8>, CameraError> {
            let (buf, meta) = fields.stream.next()?;
            // Some drivers leave bytesused at zero for fixed size formats
            let used = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            Ok(buf[..used].to_vec())
        })?;
        self.pixels
            .decode(self.width, self.height, &raw)
            .map(Frame::new)
    }
}

#[async_trait]
impl FrameSource for V4lCamera {
    async fn read(&mut self) -> Result<Frame, CameraError> {
        tokio::task::block_in_place(|| self.capture())
    }

    async fn close(&mut self) {
        if self.state.take().is_some() {
            debug!(port = self.port, "Capture stopped");
        }
    }
}
