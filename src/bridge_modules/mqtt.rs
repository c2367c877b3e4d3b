use crate::bridge_modules::config::MqttSettings;
use crate::bridge_modules::error::PublishError;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use rumqttc::QoS;

const KEEP_ALIVE_SECONDS: u64 = 60;
const REQUEST_CHANNEL_CAPACITY: usize = 128;
const RECONNECT_DELAY_SECONDS: u64 = 5;
const SHUTDOWN_TIMEOUT_SECONDS: u64 = 3;

/// Sink for everything the bridge sends to the broker.
#[async_trait]
pub trait MqttPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError>;
}

pub fn client_id() -> String {
    format!("k1max-bridge-{}", Utc::now().timestamp())
}

/// `rumqttc` backed publisher. The client event loop runs on its own task and
/// reconnects to the broker by itself.
pub struct RumqttPublisher {
    client: AsyncClient,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttPublisher {
    pub fn connect(settings: &MqttSettings) -> Self {
        let client_id = client_id();
        info!(host = %settings.host, port = settings.port, client_id = %client_id, "Connecting to MQTT broker.");

        let mut mqtt_options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        mqtt_options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECONDS));
        if !settings.username.is_empty() {
            mqtt_options.set_credentials(settings.username.clone(), settings.password.clone());
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let event_task = tokio::spawn(drive_event_loop(event_loop));

        Self {
            client,
            event_task: Mutex::new(Some(event_task)),
        }
    }

    /// Sends DISCONNECT and waits briefly for the event loop to flush it.
    /// Never blocks on a full request queue; the event task is aborted instead.
    pub async fn shutdown(&self) {
        let Some(handle) = self.event_task.lock().await.take() else {
            return;
        };
        let abort = handle.abort_handle();

        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "Failed to queue MQTT disconnect. Aborting event loop.");
            abort.abort();
            return;
        }
        if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECONDS), handle)
            .await
            .is_err()
        {
            warn!("MQTT event loop did not stop in time. Aborting it.");
            abort.abort();
        }
        info!("MQTT client disconnected.");
    }
}

// Publishing only queues the request. While the broker is unreachable the
// queue fills up and further messages are rejected rather than awaited.
#[async_trait]
impl MqttPublisher for RumqttPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, qos, retain, payload.into_bytes())
            .map_err(|e| match e {
                ClientError::TryRequest(_) => PublishError::QueueFull {
                    topic: topic.to_string(),
                },
                other => PublishError::Client(other),
            })
    }
}

async fn drive_event_loop(mut event_loop: EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "MQTT connection established.");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent. Stopping event loop.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, delay_seconds = RECONNECT_DELAY_SECONDS, "MQTT connection error. Retrying.");
                tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECONDS)).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Published {
        pub topic: String,
        pub payload: String,
        pub qos: QoS,
        pub retain: bool,
    }

    /// Records every publish instead of talking to a broker.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub messages: StdMutex<Vec<Published>>,
    }

    impl RecordingPublisher {
        pub fn take(&self) -> Vec<Published> {
            std::mem::take(&mut *self.messages.lock().unwrap())
        }
    }

    #[async_trait]
    impl MqttPublisher for RecordingPublisher {
        async fn publish(
            &self,
            topic: &str,
            payload: String,
            qos: QoS,
            retain: bool,
        ) -> Result<(), PublishError> {
            self.messages.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_prefix() {
        let id = client_id();
        let suffix = id.strip_prefix("k1max-bridge-").unwrap();
        assert!(suffix.parse::<i64>().unwrap() > 0);
    }

    fn unreachable_broker() -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: String::new(),
            password: String::new(),
            discovery_prefix: "homeassistant".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_never_blocks_without_broker() {
        let publisher = RumqttPublisher::connect(&unreachable_broker());

        let mut rejected = 0;
        for i in 0..(REQUEST_CHANNEL_CAPACITY * 2) {
            let result = tokio::time::timeout(
                Duration::from_millis(500),
                publisher.publish("k1max/state/k1_progress", i.to_string(), QoS::AtMostOnce, true),
            )
            .await
            .expect("publish must not wait for the broker");
            if let Err(e) = result {
                assert!(matches!(e, PublishError::QueueFull { .. }));
                rejected += 1;
            }
        }
        assert!(rejected > 0);

        tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_TIMEOUT_SECONDS + 2),
            publisher.shutdown(),
        )
        .await
        .expect("shutdown must finish without a broker");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let publisher = RumqttPublisher::connect(&unreachable_broker());
        publisher.shutdown().await;
        tokio::time::timeout(Duration::from_millis(500), publisher.shutdown())
            .await
            .unwrap();
    }
}
