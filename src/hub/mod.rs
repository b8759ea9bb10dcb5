mod connection;
mod connection_string;
mod message;

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{ConnectReturnCode, ConnectionError};

use crate::pipeline::Alert;

pub use connection::HubMessenger;
pub use connection_string::ConnectionString;

/// Authenticated channel to the remote hub that receives alerts.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    /// Resolves once the hub has accepted the alert.
    async fn send(&self, alert: &Alert) -> Result<(), DispatchError>;
    async fn disconnect(&self) -> Result<(), HubError>;
    fn is_connected(&self) -> bool;
}

quick_error! {
    #[derive(Debug)]
    pub enum HubError {
        ConnectionStringInvalid(reason: String) {
            display("Connection string is invalid: {}", reason)
        }
        KeyInvalid(reason: String) {
            display("Shared access key could not be used: {}", reason)
        }
        AuthenticationFailed(code: ConnectReturnCode) {
            display("IoT hub rejected the device credentials: {:?}", code)
        }
        ConnectionFailed(error: String) {
            display("Unable to connect to IoT hub: {}", error)
        }
        ConnectTimeout(waited: Duration) {
            display("IoT hub did not accept the connection within {:?}", waited)
        }
        Client(error: rumqttc::ClientError) {
            display("MQTT client request failed: {}", error)
            source(error)
        }
    }
}

impl From<ConnectionError> for HubError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::ConnectionRefused(
                code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
            ) => HubError::AuthenticationFailed(code),
            other => HubError::ConnectionFailed(other.to_string()),
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum DispatchError {
        NotConnected {
            display("Not connected to IoT hub")
        }
        Publish(error: rumqttc::ClientError) {
            display("Unable to publish alert: {}", error)
            source(error)
        }
        Interrupted {
            display("Connection dropped before the hub acknowledged the alert")
        }
        TimedOut(waited: Duration) {
            display("Hub did not acknowledge the alert within {:?}", waited)
        }
    }
}
