//! MQTT bus client with auto-reconnect.
//!
//! Connects to the broker, (re)subscribes to the configured topics on every
//! successful handshake, and forwards inbound publishes plus connection
//! lifecycle changes through a [`tokio::sync::mpsc`] channel. Reconnection
//! uses exponential backoff + jitter; after `max_retries` consecutive
//! failures a single [`BusEvent::Exhausted`] is emitted and the loop keeps
//! retrying at the backoff cap until cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatekeep_api::bus::{BusConfig, BusHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (bus, mut events) = BusHandle::spawn(BusConfig::default(), ReconnectConfig::default(), cancel.clone());
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//!
//! bus.shutdown();
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── Channel capacities ───────────────────────────────────────────────

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── BusMessage / BusEvent ────────────────────────────────────────────

/// An inbound publish, decoded as UTF-8 text (lossy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    fn from_publish(publish: &rumqttc::Publish) -> Self {
        Self {
            topic: publish.topic.clone(),
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
        }
    }
}

/// Connection lifecycle and traffic observed by the bus loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Broker accepted the session; subscriptions have been (re)issued.
    Connected,
    /// An inbound publish on one of the subscribed topics.
    Message(BusMessage),
    /// The connection failed or dropped; a retry follows after `retry_in`.
    Disconnected {
        attempt: u32,
        reason: String,
        retry_in: Duration,
    },
    /// `max_retries` consecutive failures. Emitted once per outage.
    Exhausted { attempts: u32 },
}

// ── Config ───────────────────────────────────────────────────────────

/// Broker endpoint and session settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound on a single connect attempt (TCP + CONNACK).
    pub connect_timeout: Duration,
    /// Topics subscribed after every successful handshake.
    pub subscriptions: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".into(),
            port: 1883,
            client_id: "gatekeep".into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            subscriptions: Vec::new(),
        }
    }
}

/// Exponential backoff configuration for bus reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Consecutive failures before [`BusEvent::Exhausted`] is raised.
    /// `None` means never report exhaustion.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: Some(10),
        }
    }
}

// ── BusHandle ────────────────────────────────────────────────────────

/// Handle to a running bus connection.
///
/// Cheaply cloneable; publishing never awaits the network. Call
/// [`shutdown`](Self::shutdown) to tear down the background task.
#[derive(Clone)]
pub struct BusHandle {
    client: AsyncClient,
    cancel: CancellationToken,
}

impl BusHandle {
    /// Create the MQTT client and spawn the connection loop.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Lifecycle and inbound messages arrive on the receiver.
    pub fn spawn(
        config: BusConfig,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<BusEvent>) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let task_client = client.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            bus_loop(eventloop, task_client, config, reconnect, event_tx, task_cancel).await;
        });

        (Self { client, cancel }, event_rx)
    }

    /// Queue a publish without waiting for the broker (QoS 0).
    ///
    /// Fails only when the request queue is full or the loop has stopped.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| Error::BusPublish {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "bus disconnect request not queued");
        }
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn bus_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    config: BusConfig,
    reconnect: ReconnectConfig,
    event_tx: mpsc::Sender<BusEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let mut connected = false;
    let mut exhausted = false;

    loop {
        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = poll_once(&mut eventloop, connected, config.connect_timeout) => polled,
        };

        let outgoing = match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!(host = %config.host, port = config.port, "Bus connected");
                attempt = 0;
                connected = true;
                exhausted = false;
                subscribe_all(&client, &config.subscriptions);
                Some(BusEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                Some(BusEvent::Message(BusMessage::from_publish(&publish)))
            }
            Ok(_) => None,
            Err(e) => {
                connected = false;
                tracing::warn!(error = %e, attempt, "Bus connection error");

                let delay = calculate_backoff(attempt, &reconnect);
                let disconnected = BusEvent::Disconnected {
                    attempt,
                    reason: e.to_string(),
                    retry_in: delay,
                };
                if event_tx.send(disconnected).await.is_err() {
                    break;
                }

                attempt = attempt.saturating_add(1);
                if let Some(max) = reconnect.max_retries {
                    if attempt >= max && !exhausted {
                        tracing::error!(max_retries = max, "Bus reconnection limit reached, degrading");
                        exhausted = true;
                        if event_tx.send(BusEvent::Exhausted { attempts: attempt }).await.is_err() {
                            break;
                        }
                    }
                }

                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "Waiting before bus reconnect"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                None
            }
        };

        // Receiver gone means the consumer shut down first; every send
        // above stops the loop the same way.
        if let Some(event) = outgoing {
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    }

    tracing::debug!("Bus loop exiting");
}

/// Drive the event loop once. Connect attempts are bounded by `connect_timeout`.
async fn poll_once(
    eventloop: &mut EventLoop,
    connected: bool,
    connect_timeout: Duration,
) -> Result<Event, Error> {
    if connected {
        return eventloop.poll().await.map_err(Error::from);
    }
    match tokio::time::timeout(connect_timeout, eventloop.poll()).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout {
            timeout_secs: connect_timeout.as_secs(),
        }),
    }
}

fn subscribe_all(client: &AsyncClient, topics: &[String]) {
    if topics.is_empty() {
        return;
    }
    let filters = topics
        .iter()
        .map(|t| SubscribeFilter::new(t.clone(), QoS::AtMostOnce));
    if let Err(e) = client.try_subscribe_many(filters) {
        tracing::warn!(error = %e, "Bus subscribe request not queued");
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(31)).unwrap_or(31);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
