use std::path::PathBuf;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Problems with the add-on options. These are fatal: the bridge never starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read options file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse options file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid option `{field}`: {reason}")]
    Invalid { field: String, reason: String },
    #[error("Invalid JSONPath `{expression}` for sensor `{unique_id}`: {reason}")]
    JsonPath {
        unique_id: String,
        expression: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Invalid WebSocket header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("No WebSocket traffic for {0:?}")]
    Idle(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT request queue is full. Dropped message for `{topic}`")]
    QueueFull { topic: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for application process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}
