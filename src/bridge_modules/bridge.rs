use crate::bridge_modules::communication::connection::build_request;
use crate::bridge_modules::communication::{self, FrameHandler, RawFrameBudget};
use crate::bridge_modules::config::BridgeOptions;
use crate::bridge_modules::discovery::discovery_messages;
use crate::bridge_modules::error::{ConfigError, ConnectionError};
use crate::bridge_modules::mapping::compile_mappings;
use crate::bridge_modules::mqtt::{MqttPublisher, QoS};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, error, info, warn};

const INITIAL_RECONNECT_DELAY_SECONDS: u64 = 2;
const MAX_RECONNECT_DELAY_SECONDS: u64 = 60;
const PING_INTERVAL_SECONDS: u64 = 20;
const PONG_TIMEOUT_SECONDS: u64 = 20;

/// Exponential reconnect delay: 2s, 4s, 8s ... capped at 60s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(INITIAL_RECONNECT_DELAY_SECONDS),
            Duration::from_secs(MAX_RECONNECT_DELAY_SECONDS),
        )
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max,
        }
    }

    /// Delay to sleep now; doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Liveness check for a connected printer. A Ping goes out every
/// `ping_interval`; the connection is dropped when nothing at all has been
/// received for `idle_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(PING_INTERVAL_SECONDS),
            idle_timeout: Duration::from_secs(PING_INTERVAL_SECONDS + PONG_TIMEOUT_SECONDS),
        }
    }
}

/// Printer WebSocket to MQTT bridge.
pub struct Bridge<P: MqttPublisher + ?Sized> {
    ws_url: String,
    ws_headers: BTreeMap<String, String>,
    discovery: Vec<(String, String)>,
    publisher: Arc<P>,
    frames: FrameHandler<P>,
    backoff: Backoff,
    keepalive: Keepalive,
}

impl<P: MqttPublisher + ?Sized> Bridge<P> {
    /// Compiles mappings and discovery payloads up front so that bad options
    /// fail before any connection is attempted.
    pub fn new(options: &BridgeOptions, publisher: Arc<P>) -> Result<Self, ConfigError> {
        build_request(&options.ws_url, &options.ws_headers)
            .map_err(|e| ConfigError::invalid("ws_url/ws_headers", e.to_string()))?;

        let mappings = compile_mappings(&options.mappings)?;
        let discovery = discovery_messages(options)
            .map_err(|e| ConfigError::invalid("mappings", e.to_string()))?;
        let frames = FrameHandler::new(
            publisher.clone(),
            mappings,
            options.base_topic.clone(),
            RawFrameBudget::new(options.debug.raw_frame_budget()),
        );

        Ok(Self {
            ws_url: options.ws_url.clone(),
            ws_headers: options.ws_headers.clone(),
            discovery,
            publisher,
            frames,
            backoff: Backoff::default(),
            keepalive: Keepalive::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub async fn publish_discovery(&self) {
        for (topic, payload) in &self.discovery {
            match self
                .publisher
                .publish(topic, payload.clone(), QoS::AtLeastOnce, true)
                .await
            {
                Ok(()) => info!(topic = %topic, "Published discovery."),
                Err(e) => error!(topic = %topic, error = %e, "Failed to publish discovery."),
            }
        }
    }

    /// Connects, pumps frames, and reconnects with backoff. Never returns.
    pub async fn run(&mut self) {
        loop {
            self.run_once().await;

            let delay = self.backoff.next_delay();
            warn!(delay_seconds = delay.as_secs_f32(), "Retrying WebSocket connection.");
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection attempt. On success discovery is republished, the
    /// backoff starts over, and frames are pumped until the connection ends.
    pub async fn run_once(&mut self) {
        info!(url = %self.ws_url, "Connecting to WebSocket.");
        match communication::connect(&self.ws_url, &self.ws_headers).await {
            Ok(ws_stream) => {
                info!("WebSocket connected.");
                self.publish_discovery().await;
                self.backoff.reset();
                let (sink, stream) = ws_stream.split();
                match self.pump(sink, stream).await {
                    Ok(()) => warn!("WebSocket stream ended."),
                    Err(e) => warn!(error = %e, "WebSocket error."),
                }
            }
            Err(e) => warn!(error = %e, "WebSocket connection failed."),
        }
    }

    /// Feeds frames to the handler until the peer closes, the stream fails, or
    /// the peer goes silent for longer than the keepalive allows.
    pub async fn pump<Si, St>(
        &mut self,
        mut sink: Si,
        mut stream: St,
    ) -> Result<(), ConnectionError>
    where
        Si: Sink<WsMessage, Error = WsError> + Unpin,
        St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        let Keepalive {
            ping_interval,
            idle_timeout,
        } = self.keepalive;
        let mut pings = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        break;
                    };
                    last_seen = Instant::now();
                    match message? {
                        WsMessage::Text(text) => {
                            self.frames.handle_text(text.as_str()).await;
                        }
                        WsMessage::Binary(bytes) => {
                            self.frames.handle_binary(&bytes).await;
                        }
                        WsMessage::Close(frame) => {
                            info!(?frame, "WebSocket connection closed by server.");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = pings.tick() => {
                    debug!("Sending WebSocket ping.");
                    sink.send(WsMessage::Ping(Vec::new().into())).await?;
                }
                _ = tokio::time::sleep_until(last_seen + idle_timeout) => {
                    return Err(ConnectionError::Idle(idle_timeout));
                }
            }
        }
        Ok(())
    }
}
