use serde::{Deserialize, Serialize};

use super::ConnectionString;
use crate::pipeline::AlertMessage;

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

impl MqttMessage {
    pub fn new(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }

    /// Device-to-cloud telemetry for an alert. Message id, content type and custom
    /// properties travel in the topic's property bag, the text is the body.
    pub fn telemetry(connection: &ConnectionString, message: &AlertMessage) -> Self {
        let mut properties = vec![
            format!("$.mid={}", urlencoding::encode(&message.id)),
            format!("$.ct={}", urlencoding::encode(&message.content_type)),
            "$.ce=utf-8".to_string(),
        ];
        for (key, value) in &message.custom_properties {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            properties.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&value)
            ));
        }
        MqttMessage::new(
            format!("{}{}", connection.telemetry_topic(), properties.join("&")),
            message.text.as_str(),
        )
    }

    pub fn render(self) -> Vec<u8> {
        self.payload.into()
    }
}
