use serde::{Deserialize, Serialize};

use super::{InputShape, RunnerError};

/// Sensor id the runner reports for camera models
const SENSOR_CAMERA: i64 = 3;

/// Answer to the runner's `hello` handshake.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ModelInfo {
    pub project: ProjectInfo,
    pub model_parameters: ModelParameters,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ProjectInfo {
    pub id: u64,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub deploy_version: Option<u64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ModelParameters {
    pub labels: Vec<String>,
    pub image_input_width: u32,
    pub image_input_height: u32,
    pub image_channel_count: u32,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub sensor: Option<i64>,
}

impl ModelInfo {
    pub fn labels(&self) -> &[String] {
        &self.model_parameters.labels
    }

    pub fn input_shape(&self) -> InputShape {
        InputShape {
            width: self.model_parameters.image_input_width,
            height: self.model_parameters.image_input_height,
            channels: self.model_parameters.image_channel_count,
        }
    }

    /// Rejects audio and other non-camera models, and image sizes that cannot be fed.
    pub fn ensure_image_model(&self) -> Result<(), RunnerError> {
        match self.model_parameters.sensor {
            Some(sensor) if sensor != SENSOR_CAMERA => Err(RunnerError::NotImageModel(sensor)),
            _ if self.model_parameters.image_input_width == 0
                || self.model_parameters.image_input_height == 0 =>
            {
                Err(RunnerError::Failed(
                    "model reports an empty image input size".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}
