mod features;
mod model;
mod protocol;
mod runner;

use std::{io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::camera::Frame;

pub use features::InputShape;
pub use model::ModelInfo;
pub use runner::ImpulseRunner;

/// Turns one frame into labeled boxes.
#[async_trait]
pub trait Detector: Send {
    async fn classify(&mut self, frame: &Frame) -> Result<DetectionResult, RunnerError>;
    /// Releases the model runtime. Called once during teardown.
    async fn stop(&mut self);
}

/// One labeled bounding box, in frame coordinates.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Detection {
    pub fn new(label: &str, confidence: f32, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct DetectionResult {
    /// `None` when the model does not do object detection
    pub boxes: Option<Vec<Detection>>,
    pub timing: Option<Timing>,
}

/// Milliseconds spent in each stage of the model
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Timing {
    pub dsp: i64,
    pub classification: i64,
    pub anomaly: i64,
}

quick_error! {
    #[derive(Debug)]
    pub enum RunnerError {
        ModelMissing(path: PathBuf) {
            display("Model file not found: {}", path.display())
        }
        Spawn(error: io::Error) {
            display("Unable to launch model runner: {}", error)
            source(error)
        }
        Exited(status: String) {
            display("Model runner exited: {}", status)
        }
        SocketTimeout(path: PathBuf, waited: Duration) {
            display("Model runner socket {} did not appear within {:?}", path.display(), waited)
        }
        Io(error: io::Error) {
            display("Model runner I/O failed: {}", error)
            from()
            source(error)
        }
        Closed {
            display("Model runner closed the connection")
        }
        InvalidResponse(error: serde_json::Error) {
            display("Model runner returned malformed JSON: {}", error)
            from()
            source(error)
        }
        IdMismatch(sent: u64, received: u64) {
            display("Model runner answered request {} with id {}", sent, received)
        }
        Failed(reason: String) {
            display("Model runner reported an error: {}", reason)
        }
        NotImageModel(sensor: i64) {
            display("Model is not suitable for image recognition (sensor {})", sensor)
        }
    }
}
