use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Verdict;

pub const ALERT_CONTENT_TYPE: &str = "application/json";

/// A single missing-target notification. Lives for exactly one send.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub deficit: u32,
    pub counted: u32,
    pub target_label: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(verdict: &Verdict, target_label: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            deficit: verdict.deficit,
            counted: verdict.counted,
            target_label: target_label.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Transport independent shape of the alert as the hub receives it
    pub fn message(&self) -> AlertMessage {
        let mut custom_properties = BTreeMap::new();
        custom_properties.insert("counted".to_string(), serde_json::json!(self.counted));
        AlertMessage {
            id: self.id.to_string(),
            text: format!("Found {} missing {}s!", self.deficit, self.target_label),
            content_type: ALERT_CONTENT_TYPE.to_string(),
            custom_properties,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct AlertMessage {
    pub id: String,
    pub text: String,
    pub content_type: String,
    pub custom_properties: BTreeMap<String, serde_json::Value>,
}
