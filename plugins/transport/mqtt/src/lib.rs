//! MQTT subscription as a [`MessageSource`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ingest_api::{IngestError, MessageSource, TransportMessage};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// ═══════════════════════════════════════════════════════════════
//  MqttConfig
// ═══════════════════════════════════════════════════════════════

fn default_host() -> String {
    "mqtt.pqopen.com".to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_topic() -> String {
    "private/#".to_string()
}

fn default_client_id() -> String {
    "pqopen-ingest".to_string()
}

fn default_tls() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_capacity() -> usize {
    64
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Subscription filter, e.g. `private/#`.
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Request channel capacity of the client.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Topic prefix depth. Derived from `topic` when absent.
    #[serde(default)]
    pub prefix_segments: Option<usize>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            topic: default_topic(),
            client_id: default_client_id(),
            tls: default_tls(),
            qos: default_qos(),
            keep_alive_secs: default_keep_alive_secs(),
            capacity: default_capacity(),
            prefix_segments: None,
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("mqtt host must not be empty".to_string());
        }
        if self.topic.trim().is_empty() {
            return Err("mqtt topic must not be empty".to_string());
        }
        if self.client_id.trim().is_empty() {
            return Err("mqtt client_id must not be empty".to_string());
        }
        if self.keep_alive_secs < 5 {
            return Err("mqtt keep_alive_secs must be >= 5".to_string());
        }
        if self.capacity == 0 {
            return Err("mqtt capacity must be > 0".to_string());
        }
        map_qos(self.qos).map(|_| ())
    }

    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

pub fn map_qos(qos: u8) -> Result<QoS, String> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(format!("unsupported MQTT QoS level: {other}")),
    }
}

// ═══════════════════════════════════════════════════════════════
//  MqttSource
// ═══════════════════════════════════════════════════════════════

/// Subscribed MQTT client.
///
/// A poller task owns the event loop and keeps it running independently of
/// the consumer, so keep-alives, acks and reconnects proceed while a message
/// is being processed. Publishes queue in an unbounded channel until `recv`
/// takes them.
pub struct MqttSource {
    client: AsyncClient,
    messages: mpsc::UnboundedReceiver<TransportMessage>,
    poller: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    topic: String,
}

impl MqttSource {
    /// Connect and subscribe. Returns once the broker acknowledged the
    /// subscription; any failure before that is fatal.
    pub async fn connect(config: &MqttConfig) -> Result<Self, IngestError> {
        config.validate().map_err(IngestError::Config)?;
        let qos = map_qos(config.qos).map_err(IngestError::Config)?;
        let (client, mut event_loop) = AsyncClient::new(config.options(), config.capacity);

        client
            .subscribe(config.topic.clone(), qos)
            .await
            .map_err(|e| IngestError::Transport(format!("subscribe request: {e}")))?;

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!(host = %config.host, port = config.port, code = ?ack.code, "connected");
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                        return Err(IngestError::Transport(format!(
                            "broker rejected subscription to '{}'",
                            config.topic
                        )));
                    }
                    tracing::info!(topic = %config.topic, qos = config.qos, "subscribed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(IngestError::Transport(format!(
                        "connect {}:{}: {e}",
                        config.host, config.port
                    )));
                }
            }
        }

        Ok(Self::start(client, event_loop, config.topic.clone(), qos))
    }

    /// Hand the event loop to a poller task.
    fn start(client: AsyncClient, event_loop: EventLoop, topic: String, qos: QoS) -> Self {
        let (tx, messages) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let subscription = Subscription { client: client.clone(), topic: topic.clone(), qos };
        let poller = tokio::spawn(poll_events(event_loop, subscription, tx, shutdown.clone()));
        Self {
            client,
            messages,
            poller: Some(poller),
            shutdown,
            topic,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Subscription {
    client: AsyncClient,
    topic: String,
    qos: QoS,
}

impl Subscription {
    /// Re-subscribe after a reconnect that did not resume the session.
    fn renew(&self) {
        match self.client.try_subscribe(self.topic.clone(), self.qos) {
            Ok(()) => tracing::info!(topic = %self.topic, "resubscribing after reconnect"),
            Err(e) => tracing::error!(topic = %self.topic, error = %e, "resubscribe failed"),
        }
    }
}

/// Drive the event loop until the broker or the client ends the session,
/// the receiver goes away, or `shutdown` fires. Dropping `tx` on return
/// ends the message stream.
async fn poll_events(
    mut event_loop: EventLoop,
    subscription: Subscription,
    tx: mpsc::UnboundedSender<TransportMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = TransportMessage::new(publish.topic, publish.payload.to_vec());
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if !ack.session_present {
                    subscription.renew();
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("broker sent disconnect");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                // The event loop reconnects on the next poll.
                tracing::warn!(error = %e, "mqtt connection error");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    tracing::debug!("mqtt poller stopped");
}

impl MessageSource for MqttSource {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<TransportMessage>> + Send + '_>> {
        Box::pin(self.messages.recv())
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.messages.close();
            let Some(mut poller) = self.poller.take() else {
                return;
            };
            if let Err(e) = self.client.try_disconnect() {
                tracing::debug!(error = %e, "disconnect request");
                self.shutdown.cancel();
            }
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut poller).await.is_err() {
                tracing::debug!("mqtt disconnect timed out");
                self.shutdown.cancel();
                poller.abort();
            }
        })
    }
}
