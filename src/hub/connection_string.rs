use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::HubError;

/// API version announced in the MQTT username.
pub const API_VERSION: &str = "2021-04-12";

/// Parsed `HostName=...;DeviceId=...;SharedAccessKey=...` device connection string.
#[derive(PartialEq, Eq, Clone)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_key: String,
    pub shared_access_key_name: Option<String>,
}

impl ConnectionString {
    /// MQTT username expected by the hub for device connections
    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.host_name, self.device_id, API_VERSION
        )
    }

    /// Device-to-cloud telemetry topic, without the property bag
    pub fn telemetry_topic(&self) -> String {
        format!("devices/{}/messages/events/", self.device_id)
    }

    /// Builds a shared access signature valid until `expiry` (unix seconds).
    pub fn sas_token(&self, expiry: i64) -> Result<String, HubError> {
        type HmacSha256 = Hmac<Sha256>;

        let resource = format!("{}/devices/{}", self.host_name, self.device_id);
        let resource = urlencoding::encode(&resource);
        let key = STANDARD
            .decode(&self.shared_access_key)
            .map_err(|e| HubError::KeyInvalid(e.to_string()))?;
        let mut mac =
            HmacSha256::new_from_slice(&key).map_err(|e| HubError::KeyInvalid(e.to_string()))?;
        mac.update(format!("{}\n{}", resource, expiry).as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let mut token = format!(
            "SharedAccessSignature sr={}&sig={}&se={}",
            resource,
            urlencoding::encode(&signature),
            expiry
        );
        if let Some(name) = &self.shared_access_key_name {
            token.push_str("&skn=");
            token.push_str(&urlencoding::encode(name));
        }
        Ok(token)
    }
}

// The key never ends up in logs
impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("shared_access_key", &"[redacted]")
            .field("shared_access_key_name", &self.shared_access_key_name)
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut shared_access_key_name = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys are base64 and may contain '=' themselves
            let (key, value) = part.split_once('=').ok_or_else(|| {
                HubError::ConnectionStringInvalid(format!("`{}` is not a key=value pair", part))
            })?;
            let value = Some(value.to_string());
            match key {
                "HostName" => host_name = value,
                "DeviceId" => device_id = value,
                "SharedAccessKey" => shared_access_key = value,
                "SharedAccessKeyName" => shared_access_key_name = value,
                // Gateway and module settings do not apply to a leaf device
                _ => {}
            }
        }

        let require = |field: Option<String>, name: &str| {
            field
                .filter(|v| !v.is_empty())
                .ok_or_else(|| HubError::ConnectionStringInvalid(format!("{} is missing", name)))
        };
        Ok(ConnectionString {
            host_name: require(host_name, "HostName")?,
            device_id: require(device_id, "DeviceId")?,
            shared_access_key: require(shared_access_key, "SharedAccessKey")?,
            shared_access_key_name,
        })
    }
}
