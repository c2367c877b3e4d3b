//! Home Assistant MQTT discovery payloads and the topic layout of the bridge.

use crate::bridge_modules::config::{BridgeOptions, SensorMapping};
use serde::Serialize;
use serde_json::Value;

pub const MANUFACTURER: &str = "Creality";
pub const MODEL: &str = "K1/K1 Max (WS Bridge)";
pub const DEFAULT_ICON: &str = "mdi:printer-3d";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub name: String,
    pub model: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DiscoveryPayload {
    pub name: String,
    pub state_topic: String,
    pub unique_id: String,
    pub device: DeviceInfo,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

pub fn discovery_topic(discovery_prefix: &str, device_id: &str, unique_id: &str) -> String {
    format!("{discovery_prefix}/sensor/{device_id}/{unique_id}/config")
}

pub fn state_topic(base_topic: &str, unique_id: &str) -> String {
    format!("{base_topic}/state/{unique_id}")
}

pub fn build_discovery(sensor: &SensorMapping, options: &BridgeOptions) -> DiscoveryPayload {
    DiscoveryPayload {
        name: sensor.name.clone(),
        state_topic: state_topic(&options.base_topic, &sensor.unique_id),
        unique_id: sensor.unique_id.clone(),
        device: DeviceInfo {
            identifiers: vec![options.device_id.clone()],
            manufacturer: MANUFACTURER.to_string(),
            name: options.device_name.clone(),
            model: MODEL.to_string(),
        },
        icon: non_empty(&sensor.icon).unwrap_or_else(|| DEFAULT_ICON.to_string()),
        unit_of_measurement: non_empty(&sensor.unit),
        device_class: non_empty(&sensor.device_class),
        state_class: non_empty(&sensor.state_class),
    }
}

/// Discovery `(topic, compact JSON payload)` pairs for every configured sensor.
pub fn discovery_messages(
    options: &BridgeOptions,
) -> Result<Vec<(String, String)>, serde_json::Error> {
    options
        .mappings
        .iter()
        .map(|sensor| {
            let topic = discovery_topic(
                &options.mqtt.discovery_prefix,
                &options.device_id,
                &sensor.unique_id,
            );
            let payload = serde_json::to_string(&build_discovery(sensor, options))?;
            Ok((topic, payload))
        })
        .collect()
}

/// Text published on a state topic. Absent values clear the state with an empty payload.
pub fn render_state_payload(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
