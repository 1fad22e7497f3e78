use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use tempdisplay_common::BrokerConfig;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("mqtt request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("timed out waiting for broker acknowledgement")]
    AckTimeout,
    #[error("broker closed the session")]
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// The broker session as the supervisor sees it. One production
/// implementation wraps `rumqttc`; tests script a fake.
pub trait BrokerSession {
    async fn connect(&mut self) -> Result<(), SessionError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), SessionError>;

    /// Re-establishes a dropped session. Subscriptions are durable across a
    /// reconnect in this broker's session model, so `resubscribe` is
    /// normally `false`.
    async fn reconnect(&mut self, resubscribe: bool) -> Result<(), SessionError>;

    fn is_connected(&self) -> bool;

    /// One bounded read. `Ok(None)` means the bound elapsed or a
    /// non-message event arrived; a silent broker is not an error, but a
    /// broker-initiated disconnect is.
    async fn poll_bounded(&mut self, bound: Duration)
        -> Result<Option<InboundMessage>, SessionError>;

    async fn publish(&mut self, topic: &str, payload: String, qos: QoS)
        -> Result<(), SessionError>;
}

/// `rumqttc`-backed session. The supervisor drives the event loop itself,
/// so the process stays one cooperative loop with no spawned tasks.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: bool,
    subscriptions: Vec<(String, QoS)>,
    connect_timeout: Duration,
    reconnect_timeout: Duration,
}

impl MqttSession {
    pub fn new(
        config: &BrokerConfig,
        connect_timeout: Duration,
        reconnect_timeout: Duration,
    ) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        Self {
            client,
            eventloop,
            connected: false,
            subscriptions: Vec::new(),
            connect_timeout,
            reconnect_timeout,
        }
    }

    /// Drives the event loop until the broker acknowledges the connection.
    /// The event loop re-dials on poll, so this serves both the initial
    /// connect and a reconnect after a dropped session.
    async fn wait_for_connack(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::AckTimeout);
            }
            match tokio::time::timeout(remaining, self.eventloop.poll()).await {
                Err(_) => return Err(SessionError::AckTimeout),
                Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => {
                    self.connected = true;
                    return Ok(());
                }
                Ok(Ok(event)) => debug!("pre-connack event: {event:?}"),
                Ok(Err(err)) => {
                    self.connected = false;
                    return Err(err.into());
                }
            }
        }
    }
}

impl BrokerSession for MqttSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.wait_for_connack(self.connect_timeout).await
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        self.client.subscribe(topic, qos).await?;
        self.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    async fn reconnect(&mut self, resubscribe: bool) -> Result<(), SessionError> {
        self.connected = false;
        self.wait_for_connack(self.reconnect_timeout).await?;
        if resubscribe {
            for (topic, qos) in self.subscriptions.clone() {
                self.client.subscribe(topic, qos).await?;
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn poll_bounded(
        &mut self,
        bound: Duration,
    ) -> Result<Option<InboundMessage>, SessionError> {
        match tokio::time::timeout(bound, self.eventloop.poll()).await {
            Err(_) => Ok(None),
            Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => Ok(Some(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            })),
            Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => {
                // The event loop re-dialed underneath us.
                self.connected = true;
                Ok(None)
            }
            Ok(Ok(Event::Incoming(Incoming::Disconnect))) => {
                warn!("broker sent disconnect");
                self.connected = false;
                Err(SessionError::Disconnected)
            }
            Ok(Ok(_)) => Ok(None),
            Ok(Err(err)) => {
                self.connected = false;
                Err(err.into())
            }
        }
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: String,
        qos: QoS,
    ) -> Result<(), SessionError> {
        self.client.publish(topic, qos, false, payload).await?;
        Ok(())
    }
}
