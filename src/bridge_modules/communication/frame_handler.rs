use crate::bridge_modules::discovery::{render_state_payload, state_topic};
use crate::bridge_modules::mapping::{extract_values, CompiledMapping};
use crate::bridge_modules::mqtt::{MqttPublisher, QoS};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw frame log lines are cut to this many characters.
pub const RAW_FRAME_LOG_CHARS: usize = 500;

/// How many raw frames may still be written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrameBudget {
    remaining: u32,
}

impl RawFrameBudget {
    pub fn new(limit: u32) -> Self {
        Self { remaining: limit }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Spends one unit of budget; `false` once it is exhausted.
    pub fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was JSON; this many state messages were published.
    Published(usize),
    /// The frame was not JSON and was dropped.
    NotJson,
}

/// Turns printer frames into MQTT state updates.
pub struct FrameHandler<P: MqttPublisher + ?Sized> {
    publisher: Arc<P>,
    mappings: Vec<CompiledMapping>,
    base_topic: String,
    raw_budget: RawFrameBudget,
}

impl<P: MqttPublisher + ?Sized> FrameHandler<P> {
    pub fn new(
        publisher: Arc<P>,
        mappings: Vec<CompiledMapping>,
        base_topic: String,
        raw_budget: RawFrameBudget,
    ) -> Self {
        Self {
            publisher,
            mappings,
            base_topic,
            raw_budget,
        }
    }

    pub fn raw_budget(&self) -> RawFrameBudget {
        self.raw_budget
    }

    pub async fn handle_text(&mut self, text: &str) -> FrameOutcome {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => {
                self.log_non_json(text);
                return FrameOutcome::NotJson;
            }
        };

        if self.raw_budget.take() {
            let rendered = frame.to_string();
            info!(
                "RAW(json) = {}",
                truncate_chars(&rendered, RAW_FRAME_LOG_CHARS)
            );
        }

        FrameOutcome::Published(self.publish_states(&frame).await)
    }

    /// Binary frames are treated as text when they hold UTF-8.
    pub async fn handle_binary(&mut self, bytes: &[u8]) -> FrameOutcome {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.handle_text(text).await,
            Err(_) => {
                self.log_non_json(&String::from_utf8_lossy(bytes));
                FrameOutcome::NotJson
            }
        }
    }

    fn log_non_json(&mut self, text: &str) {
        if self.raw_budget.take() {
            info!(
                "RAW(nonjson) = {}",
                truncate_chars(text, RAW_FRAME_LOG_CHARS)
            );
        } else {
            debug!(len = text.len(), "Skipping non-JSON frame.");
        }
    }

    async fn publish_states(&self, frame: &Value) -> usize {
        let mut published = 0;
        for (unique_id, value) in extract_values(&self.mappings, frame) {
            let topic = state_topic(&self.base_topic, unique_id);
            let payload = render_state_payload(value.as_ref());
            match self
                .publisher
                .publish(&topic, payload, QoS::AtMostOnce, true)
                .await
            {
                Ok(()) => published += 1,
                Err(e) => warn!(topic = %topic, error = %e, "Failed to publish state."),
            }
        }
        published
    }
}
