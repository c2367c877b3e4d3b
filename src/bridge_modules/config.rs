use crate::bridge_modules::error::ConfigError;
use crate::bridge_modules::transform::Transform;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Where the Supervisor writes the add-on options inside the container.
pub const DEFAULT_OPTIONS_PATH: &str = "/data/options.json";
pub const OPTIONS_PATH_ENV: &str = "BRIDGE_OPTIONS_PATH";

#[derive(Deserialize, Debug, Clone)]
pub struct BridgeOptions {
    pub ws_url: String,
    #[serde(default, deserialize_with = "stringified_headers")]
    pub ws_headers: BTreeMap<String, String>,
    pub base_topic: String,
    pub device_id: String,
    pub device_name: String,
    pub mqtt: MqttSettings,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mappings: Vec<SensorMapping>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub debug: DebugOptions,
    /// Default tracing directive when `RUST_LOG` is not set.
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct MqttSettings {
    pub host: String,
    #[serde(deserialize_with = "port_number")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
}

// Keeps the broker password out of the logs.
impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("discovery_prefix", &self.discovery_prefix)
            .finish()
    }
}

/// One Home Assistant sensor fed from a JSONPath into the printer frames.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SensorMapping {
    pub name: String,
    pub unique_id: String,
    pub jsonpath: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub state_class: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub transform: Transform,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct DebugOptions {
    #[serde(default)]
    pub log_raw_frames: bool,
    #[serde(default)]
    pub raw_frames_limit: u32,
}

impl DebugOptions {
    /// Number of raw frames that may be logged over the process lifetime.
    pub fn raw_frame_budget(&self) -> u32 {
        if self.log_raw_frames {
            self.raw_frames_limit
        } else {
            0
        }
    }
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn stringified_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}

fn port_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    let port = match Port::deserialize(deserializer)? {
        Port::Number(n) => u16::try_from(n).map_err(|_| format!("port {n} is out of range")),
        Port::Text(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("port `{s}` is not a number: {e}")),
    }
    .map_err(<D::Error as serde::de::Error>::custom)?;

    if port == 0 {
        return Err(serde::de::Error::custom("port must be between 1 and 65535"));
    }
    Ok(port)
}

impl BridgeOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The `log_level` option, if it holds a directive.
    pub fn log_filter(&self) -> Option<&str> {
        self.log_level
            .as_deref()
            .map(str::trim)
            .filter(|level| !level.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws_url = self.ws_url.trim();
        if ws_url.is_empty() {
            return Err(ConfigError::invalid("ws_url", "must not be empty"));
        }
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(ConfigError::invalid(
                "ws_url",
                format!("`{ws_url}` must start with ws:// or wss://"),
            ));
        }

        for (field, value) in [
            ("base_topic", &self.base_topic),
            ("device_id", &self.device_id),
            ("mqtt.host", &self.mqtt.host),
            ("mqtt.discovery_prefix", &self.mqtt.discovery_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }

        let mut seen = HashSet::new();
        for (index, mapping) in self.mappings.iter().enumerate() {
            if mapping.unique_id.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("mappings[{index}].unique_id"),
                    "must not be empty",
                ));
            }
            if !seen.insert(mapping.unique_id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("mappings[{index}].unique_id"),
                    format!("`{}` is used by more than one sensor", mapping.unique_id),
                ));
            }
        }

        Ok(())
    }
}

/// Reads, parses and validates the add-on options file.
pub fn load_options(path: &Path) -> Result<BridgeOptions, ConfigError> {
    info!(path = ?path, "Attempting to load options.");

    let contents = fs::read_to_string(path).map_err(|e| {
        error!(path = ?path, error = %e, "Failed to read options file.");
        ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        }
    })?;

    let options = BridgeOptions::from_json(&contents).map_err(|e| {
        error!(path = ?path, error = %e, "Failed to parse options file.");
        ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        }
    })?;

    options.validate()?;

    info!(
        ws_url = %options.ws_url,
        mqtt = ?options.mqtt,
        sensors = options.mappings.len(),
        "Loaded options successfully."
    );
    Ok(options)
}
