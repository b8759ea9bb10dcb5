use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Environment variable the CLI reads the hub credential from.
pub const CONNECTION_STRING_ENV: &str = "IOTHUB_DEVICE_CONNECTION_STRING";

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub system: ConfigSystem,
    pub labels: ConfigLabels,
    pub pipeline: ConfigPipeline,
    pub camera: ConfigCamera,
    pub runner: ConfigRunner,
    pub hub: ConfigHub,
    pub display: ConfigDisplay,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigSystem {
    pub log_level: String,
}

impl Default for ConfigSystem {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

/// Which model labels are counted and which one gates the alert.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigLabels {
    pub target: String,
    pub reference: String,
}

impl Default for ConfigLabels {
    fn default() -> Self {
        Self {
            target: "lug_nut".into(),
            reference: "wheel".into(),
        }
    }
}

impl ConfigLabels {
    /// Checks both labels against the label set reported by the loaded model.
    pub fn validate(&self, available: &[String]) -> Result<(), ConfigError> {
        if self.target == self.reference {
            return Err(ConfigError::LabelsIdentical(self.target.clone()));
        }
        for (role, label) in [("target", &self.target), ("reference", &self.reference)] {
            if !available.iter().any(|l| l == label) {
                return Err(ConfigError::LabelUnknown(
                    role,
                    label.clone(),
                    available.to_vec(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigPipeline {
    pub frame_period_ms: u64,
    pub send_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
}

impl Default for ConfigPipeline {
    fn default() -> Self {
        Self {
            // 20 fps max
            frame_period_ms: 50,
            send_timeout_ms: 10_000,
            disconnect_timeout_ms: 2_000,
        }
    }
}

impl ConfigPipeline {
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms)
    }
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigCamera {
    /// Number of device indices probed when no port is given
    pub probe_ports: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ConfigCamera {
    fn default() -> Self {
        Self {
            probe_ports: 5,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigRunner {
    pub socket_timeout_ms: u64,
}

impl Default for ConfigRunner {
    fn default() -> Self {
        Self {
            socket_timeout_ms: 10_000,
        }
    }
}

impl ConfigRunner {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigHub {
    pub sas_ttl_secs: u64,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ConfigHub {
    fn default() -> Self {
        Self {
            sas_ttl_secs: 86_400,
            keep_alive_secs: 30,
            connect_timeout_ms: 15_000,
        }
    }
}

impl ConfigHub {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigDisplay {
    pub preview_path: String,
}

impl Default for ConfigDisplay {
    fn default() -> Self {
        Self {
            preview_path: "preview.jpg".into(),
        }
    }
}

/// Loads settings from `LUGNUT_` prefixed environment variables and the TOML file at `path`.
/// A missing file leaves every value at its default.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let cfg: Config = Figment::new()
        .merge(Env::prefixed("LUGNUT_").split("__"))
        .merge(Toml::file(path))
        .extract()?;

    if cfg.pipeline.frame_period_ms == 0 {
        return Err(ConfigError::Invalid(
            "pipeline.frame_period_ms must be greater than zero".into(),
        ));
    }
    Ok(cfg)
}

/// The credential is mandatory; an empty value counts as missing.
pub fn require_credential(value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::CredentialMissing)
}

quick_error! {
    #[derive(Debug)]
    pub enum ConfigError {
        Load(error: figment::Error) {
            display("Unable to load configuration: {}", error)
            from()
            source(error)
        }
        Invalid(reason: String) {
            display("Invalid configuration: {}", reason)
        }
        CredentialMissing {
            display("No Azure IoT connection string found! Use --connection-string or set {}", CONNECTION_STRING_ENV)
        }
        LabelsIdentical(label: String) {
            display("Target and reference labels must differ, both are `{}`", label)
        }
        LabelUnknown(role: &'static str, label: String, available: Vec<String>) {
            display("The {} label `{}` is not known to the model. Labels: {:?}", role, label, available)
        }
    }
}
