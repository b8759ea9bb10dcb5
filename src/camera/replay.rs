use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{CameraError, Frame, FrameSource};

/// Plays back the images of a directory in file name order, once.
pub struct ReplaySource {
    frames: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_image(path))
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(CameraError::NoDeviceFound);
        }
        info!(dir=?dir, frames = frames.len(), "Replaying recorded frames");
        Ok(Self { frames, next: 0 })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn read(&mut self) -> Result<Frame, CameraError> {
        let path = self
            .frames
            .get(self.next)
            .cloned()
            .ok_or(CameraError::EndOfStream)?;
        self.next += 1;
        let image = tokio::task::spawn_blocking(move || image::open(path))
            .await
            .map_err(|e| CameraError::Acquisition(e.to_string()))??;
        Ok(Frame::new(image.to_rgb8()))
    }

    async fn close(&mut self) {
        self.next = self.frames.len();
        debug!("Replay closed");
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use image::RgbImage;

    use super::ReplaySource;
    use crate::camera::{CameraError, FrameSource};

    fn frame_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lugnut-replay-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_replays_in_name_order() {
        let dir = frame_dir();
        RgbImage::new(4, 3).save(dir.join("b.png")).unwrap();
        RgbImage::new(6, 5).save(dir.join("a.png")).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();

        let mut source = ReplaySource::open(&dir).unwrap();
        assert_eq!(source.read().await.unwrap().image.dimensions(), (6, 5));
        assert_eq!(source.read().await.unwrap().image.dimensions(), (4, 3));
        assert!(matches!(source.read().await, Err(CameraError::EndOfStream)));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_closed_source_is_exhausted() {
        let dir = frame_dir();
        RgbImage::new(2, 2).save(dir.join("a.png")).unwrap();
        let mut source = ReplaySource::open(&dir).unwrap();
        source.close().await;
        assert!(matches!(source.read().await, Err(CameraError::EndOfStream)));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_frame_fails() {
        let dir = frame_dir();
        std::fs::write(dir.join("a.jpg"), b"garbage").unwrap();
        let mut source = ReplaySource::open(&dir).unwrap();
        assert!(matches!(source.read().await, Err(CameraError::Decode(_))));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_empty_dir() {
        let dir = frame_dir();
        assert!(matches!(
            ReplaySource::open(&dir),
            Err(CameraError::NoDeviceFound)
        ));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
