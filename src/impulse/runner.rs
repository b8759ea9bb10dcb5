use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    net::UnixStream,
    process::{Child, Command},
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
    protocol::RunnerLink, Detection, DetectionResult, Detector, InputShape, ModelInfo,
    RunnerError, Timing,
};
use crate::{camera::Frame, config::ConfigRunner};

/// An `.eim` model executable, driven over the Unix socket it listens on.
pub struct ImpulseRunner {
    child: Option<Child>,
    socket: SocketFile,
    link: RunnerLink<UnixStream>,
    shape: InputShape,
}

/// Removes the runner socket once the runner, or a start that never finished, goes away.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    result: ClassifyResult,
    #[serde(default)]
    timing: Option<Timing>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResult {
    #[serde(default)]
    bounding_boxes: Option<Vec<RawBox>>,
}

#[derive(Debug, Deserialize)]
struct RawBox {
    label: String,
    value: f32,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

impl ImpulseRunner {
    /// Launches the model, performs the handshake and checks it is an image model.
    pub async fn start(
        model_path: &Path,
        config: &ConfigRunner,
    ) -> Result<(ImpulseRunner, ModelInfo), RunnerError> {
        if !model_path.is_file() {
            return Err(RunnerError::ModelMissing(model_path.to_path_buf()));
        }
        let socket = SocketFile(
            std::env::temp_dir().join(format!("lugnut-runner-{}.sock", Uuid::new_v4())),
        );

        let mut child = Command::new(model_path)
            .arg(&socket.0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunnerError::Spawn)?;
        debug!(socket=?socket.0, "Model runner launched");

        let stream = match wait_for_socket(&mut child, &socket.0, config.socket_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        let mut runner = ImpulseRunner {
            child: Some(child),
            socket,
            link: RunnerLink::new(stream),
            shape: InputShape {
                width: 0,
                height: 0,
                channels: 3,
            },
        };
        match runner.hello().await {
            Ok(info) => Ok((runner, info)),
            Err(e) => {
                runner.stop().await;
                Err(e)
            }
        }
    }

    async fn hello(&mut self) -> Result<ModelInfo, RunnerError> {
        let mut request = serde_json::Map::new();
        request.insert("hello".into(), 1.into());
        let info: ModelInfo = self.link.request(request).await?;
        info.ensure_image_model()?;
        self.shape = info.input_shape();
        info!(
            owner=%info.project.owner,
            project=%info.project.name,
            input=?self.shape,
            "Model runner ready"
        );
        Ok(info)
    }
}

async fn wait_for_socket(
    child: &mut Child,
    socket_path: &Path,
    timeout: Duration,
) -> Result<UnixStream, RunnerError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if socket_path.exists() {
            return Ok(UnixStream::connect(socket_path).await?);
        }
        if let Some(status) = child.try_wait()? {
            return Err(RunnerError::Exited(status.to_string()));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RunnerError::SocketTimeout(socket_path.to_path_buf(), timeout));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[async_trait]
impl Detector for ImpulseRunner {
    async fn classify(&mut self, frame: &Frame) -> Result<DetectionResult, RunnerError> {
        let prepared = self.shape.prepare(&frame.image);
        let mut request = serde_json::Map::new();
        request.insert("classify".into(), serde_json::json!(prepared.features));
        let response: ClassifyResponse = self.link.request(request).await?;
        trace!(timing=?response.timing, "Frame classified");

        let boxes = response.result.bounding_boxes.map(|boxes| {
            boxes
                .into_iter()
                .map(|b| {
                    let (x, y, width, height) = prepared.crop.map_box(b.x, b.y, b.width, b.height);
                    Detection::new(&b.label, b.value, x, y, width, height)
                })
                .collect()
        });
        Ok(DetectionResult {
            boxes,
            timing: response.timing,
        })
    }

    async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Unable to stop model runner: {}", e);
            } else {
                debug!("Model runner stopped");
            }
        }
        let _ = std::fs::remove_file(&self.socket.0);
    }
}
