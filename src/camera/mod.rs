mod font;
mod overlay;
mod pixels;
mod replay;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{info, trace};

pub use overlay::Overlay;
pub use replay::ReplaySource;

/// One captured image. Owned by a single scheduling cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait FrameSource: Send {
    async fn read(&mut self) -> Result<Frame, CameraError>;
    /// Releases the device. Reads after closing fail.
    async fn close(&mut self);
}

#[async_trait]
impl FrameSource for Box<dyn FrameSource> {
    async fn read(&mut self) -> Result<Frame, CameraError> {
        (**self).read().await
    }
    async fn close(&mut self) {
        (**self).close().await
    }
}

/// Opens cameras by device index.
#[cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]
#[async_trait]
pub trait CameraProvider: Sync {
    type Source: FrameSource;
    async fn open(&self, port: u32) -> Result<Self::Source, CameraError>;
}

/// Resolves which camera to use. An explicit port must deliver a frame; otherwise ports
/// `0..probe_ports` are tried and exactly one of them may deliver a frame.
/// Every probed device is closed again before returning.
#[cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]
pub async fn select_camera<P: CameraProvider>(
    provider: &P,
    port: Option<u32>,
    probe_ports: u32,
) -> Result<u32, CameraError> {
    if let Some(port) = port {
        return match probe(provider, port).await {
            Ok(()) => Ok(port),
            Err(e) => Err(CameraError::Unreadable(port, e.to_string())),
        };
    }

    let mut found = Vec::new();
    for port in 0..probe_ports {
        match probe(provider, port).await {
            Ok(()) => found.push(port),
            Err(e) => trace!(port, "No usable camera: {}", e),
        }
    }
    match found.as_slice() {
        [] => Err(CameraError::NoDeviceFound),
        [port] => Ok(*port),
        _ => Err(CameraError::AmbiguousDevice(found)),
    }
}

async fn probe<P: CameraProvider>(provider: &P, port: u32) -> Result<(), CameraError> {
    let mut source = provider.open(port).await?;
    let read = source.read().await;
    source.close().await;
    let frame = read?;
    info!(
        "Camera found on port {}. Resolution = ({} x {})",
        port,
        frame.image.width(),
        frame.image.height()
    );
    Ok(())
}

quick_error! {
    #[derive(Debug)]
    pub enum CameraError {
        NoDeviceFound {
            display("No camera found!")
        }
        AmbiguousDevice(ports: Vec<u32>) {
            display("More than one camera found (ports {:?})! Use the --camera-port option.", ports)
        }
        Unreadable(port: u32, reason: String) {
            display("Couldn't initialize camera on port {}: {}", port, reason)
        }
        Unsupported(reason: String) {
            display("Camera capture unavailable: {}", reason)
        }
        Acquisition(reason: String) {
            display("Unable to read frame: {}", reason)
        }
        Io(error: std::io::Error) {
            display("Camera I/O failed: {}", error)
            from()
            source(error)
        }
        Decode(error: image::ImageError) {
            display("Frame could not be decoded: {}", error)
            from()
            source(error)
        }
        EndOfStream {
            display("Frame source has no more frames")
        }
    }
}
