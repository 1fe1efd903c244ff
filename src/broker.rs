// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent connection to the message broker (C1).
//!
//! `devices/+/data` is modeled as a durable topic exchange named `devices`
//! with a queue bound to routing key `devices.*.data`; commands publish to
//! `devices.<id>.commands` with persistent delivery mode so a device that
//! is offline still finds its commands queued on reconnect. Messages the
//! ingest worker cannot process (malformed payloads, permanent storage
//! failures) are routed to a durable `device-data-dead-letter` queue via
//! [`BrokerClient::dead_letter`].
//!
//! Only one device-data handler can be registered at a time and the
//! consumer loop processes deliveries sequentially, which trivially
//! preserves per-device ordering. Running multiple ingest workers in
//! parallel (each with its own consumer, partitioned by `device_id`) is
//! not implemented here; see `CORE_INGEST_WORKER_COUNT` in
//! [`crate::config::Config`] for the accepted-but-currently-single-worker
//! knob.
//!
//! # Examples
//!
//! ```no_run
//! use device_core::broker::BrokerClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = BrokerClient::builder()
//!     .host("localhost")
//!     .port(5672)
//!     .credentials("guest", "guest")
//!     .build()
//!     .await?;
//!
//! broker
//!     .subscribe_device_data(|device_id, payload| {
//!         Box::pin(async move {
//!             println!("{device_id}: {} bytes", payload.len());
//!             device_core::broker::MessageOutcome::Ack
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;

use crate::error::BrokerError;

/// Topic exchange devices publish telemetry to and commands are routed through.
const DEVICES_EXCHANGE: &str = "devices";
/// Durable queue the ingest worker consumes device data from.
const DEVICE_DATA_QUEUE: &str = "device-data";
/// Routing key pattern matching `devices/+/data`.
const DEVICE_DATA_ROUTING_KEY: &str = "devices.*.data";
/// Durable queue malformed/unpersistable messages are routed to.
const DEAD_LETTER_QUEUE: &str = "device-data-dead-letter";
/// Maximum serialized command payload size.
const MAX_PAYLOAD_BYTES: usize = 10 * 1024;
/// Initial reconnect backoff.
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
/// Reconnect backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// What the ingest worker decided to do with a device-data message, once
/// the broker-facing consumer loop needs to know how to acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processing succeeded; acknowledge the message.
    Ack,
    /// A transient failure (e.g. a database outage); do not acknowledge,
    /// so the broker redelivers after its visibility timeout.
    NackRequeue,
    /// A permanent failure (malformed payload, constraint violation); route
    /// the raw payload to the dead-letter queue, then acknowledge.
    DeadLetter,
}

type HandlerFuture = Pin<Box<dyn Future<Output = MessageOutcome> + Send>>;

/// A handler invoked for every device-data message: the extracted device id
/// (the routing key's second segment) and the raw payload bytes. Returns
/// the acknowledgement decision once processing completes.
pub type DataHandler = Arc<dyn Fn(String, Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Connection configuration for the broker client.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    username: String,
    password: String,
    vhost: String,
    confirm_timeout: Duration,
    prefetch: u16,
}

/// Counters for the broker client's observable side effects.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    /// Number of successful (re)connections.
    pub connects: AtomicU64,
    /// Number of observed disconnects.
    pub disconnects: AtomicU64,
    /// Number of device-data messages consumed.
    pub messages_consumed: AtomicU64,
    /// Number of commands whose publish was confirmed.
    pub commands_published_ok: AtomicU64,
    /// Number of commands whose publish failed.
    pub commands_published_failed: AtomicU64,
}

struct Inner {
    config: BrokerConfig,
    channel: RwLock<Option<Channel>>,
    connected: AtomicBool,
    handler: RwLock<Option<DataHandler>>,
    metrics: BrokerMetrics,
}

/// A persistent, auto-reconnecting connection to the broker.
///
/// Cheaply cloneable: all state lives behind an `Arc`.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    /// Creates a new builder for configuring a broker connection.
    #[must_use]
    pub fn builder() -> BrokerClientBuilder {
        BrokerClientBuilder::default()
    }

    /// Returns whether the client currently holds a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the broker's observable counters.
    #[must_use]
    pub fn metrics(&self) -> &BrokerMetrics {
        &self.inner.metrics
    }

    /// Registers the handler invoked for every device-data message and
    /// starts consuming. Calling this again replaces the handler and is
    /// used internally to resume consumption after a reconnect.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotConnected` if no channel is currently live.
    pub async fn subscribe_device_data<F>(&self, handler: F) -> Result<(), BrokerError>
    where
        F: Fn(String, Vec<u8>) -> HandlerFuture + Send + Sync + 'static,
    {
        let handler: DataHandler = Arc::new(handler);
        *self.inner.handler.write().await = Some(handler);
        self.start_consumer().await
    }

    /// Publishes `payload` to the dead-letter queue, bypassing the topic
    /// exchange: dead-lettered messages are routed by queue name alone.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotConnected` if there is no live channel, or
    /// `BrokerError::PublishFailed` if the broker rejects the publish.
    pub async fn dead_letter(&self, device_id: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let channel = self
            .inner
            .channel
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)?;

        channel
            .basic_publish(
                "",
                DEAD_LETTER_QUEUE,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        tracing::warn!(device_id, "device-data message routed to dead-letter queue");
        Ok(())
    }

    async fn start_consumer(&self) -> Result<(), BrokerError> {
        let channel = self
            .inner
            .channel
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)?;

        channel
            .basic_qos(self.inner.config.prefetch, lapin::options::BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        channel
            .queue_declare(
                DEVICE_DATA_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        channel
            .queue_bind(
                DEVICE_DATA_QUEUE,
                DEVICES_EXCHANGE,
                DEVICE_DATA_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        channel
            .queue_declare(
                DEAD_LETTER_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        let consumer = channel
            .basic_consume(
                DEVICE_DATA_QUEUE,
                "device-core-ingest",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        let client = self.clone();
        tokio::spawn(async move {
            use futures_lite::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else {
                    tracing::warn!("device-data consumer stream error");
                    break;
                };

                client.handle_delivery(delivery).await;
            }
        });

        Ok(())
    }

    async fn handle_delivery(&self, delivery: lapin::message::Delivery) {
        let device_id = delivery
            .routing_key
            .as_str()
            .split('.')
            .nth(1)
            .map(str::to_string);

        let Some(device_id) = device_id else {
            tracing::warn!(
                routing_key = %delivery.routing_key.as_str(),
                "device-data message with unparseable routing key, acking without requeue"
            );
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                tracing::error!(error = %e, "failed to ack unparseable device-data message");
            }
            return;
        };

        self.inner.metrics.messages_consumed.fetch_add(1, Ordering::Relaxed);

        let handler = self.inner.handler.read().await.clone();
        let Some(handler) = handler else {
            tracing::error!(device_id, "device-data message received with no handler registered");
            return;
        };

        let outcome = handler(device_id.clone(), delivery.data.clone()).await;

        match outcome {
            MessageOutcome::Ack => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    tracing::error!(error = %e, "failed to ack device-data message");
                }
            }
            MessageOutcome::DeadLetter => {
                if let Err(e) = self.dead_letter(&device_id, &delivery.data).await {
                    tracing::error!(device_id, error = %e, "failed to publish to dead-letter queue");
                }
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    tracing::error!(error = %e, "failed to ack dead-lettered device-data message");
                }
            }
            MessageOutcome::NackRequeue => {
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                {
                    tracing::error!(error = %e, "failed to nack device-data message");
                }
            }
        }
    }

    /// Publishes a command to `devices/<device_id>/commands` and waits for
    /// the broker's publish confirmation.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::PayloadTooLarge` if `payload` exceeds 10 KiB,
    /// `BrokerError::NotConnected` if there is no live channel,
    /// `BrokerError::ConfirmTimeout` if the broker does not confirm within
    /// the configured timeout, or `BrokerError::PublishFailed` otherwise.
    pub async fn publish_command(&self, device_id: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(BrokerError::PayloadTooLarge {
                actual: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let channel = self
            .inner
            .channel
            .read()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)?;

        let routing_key = format!("devices.{device_id}.commands");
        let properties = BasicProperties::default().with_delivery_mode(2);

        let publish = channel.basic_publish(
            DEVICES_EXCHANGE,
            &routing_key,
            BasicPublishOptions::default(),
            payload,
            properties,
        );

        let confirm_timeout = self.inner.config.confirm_timeout;
        let result = tokio::time::timeout(confirm_timeout, async {
            let confirm = publish
                .await
                .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;
            confirm
                .await
                .map_err(|e| BrokerError::PublishFailed(e.to_string()))
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.inner.metrics.commands_published_ok.fetch_add(1, Ordering::Relaxed);
                tracing::info!(device_id, "command publish confirmed");
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.metrics.commands_published_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(device_id, error = %e, "command publish failed");
                Err(e)
            }
            Err(_) => {
                self.inner.metrics.commands_published_failed.fetch_add(1, Ordering::Relaxed);
                let millis = u64::try_from(confirm_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(device_id, timeout_ms = millis, "command publish confirm timed out");
                Err(BrokerError::ConfirmTimeout(millis))
            }
        }
    }

    async fn connect_once(config: &BrokerConfig) -> Result<Channel, BrokerError> {
        let uri = format!(
            "amqp://{}:{}@{}:{}{}",
            config.username,
            config.password,
            config.host,
            config.port,
            config.vhost
        );

        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(&uri, properties)
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        channel
            .exchange_declare(
                DEVICES_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        Ok(channel)
    }

    /// Runs the reconnect supervisor: connects once up front (the builder
    /// surfaces that failure directly), then watches for channel/connection
    /// error and reconnects with exponential backoff, resuming the device
    /// data consumer each time.
    fn spawn_supervisor(self) {
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let channel_closed = {
                    let channel = self.inner.channel.read().await;
                    match channel.as_ref() {
                        Some(channel) => channel.status().closed(),
                        None => true,
                    }
                };

                if channel_closed {
                    self.inner.connected.store(false, Ordering::Release);
                    if attempt > 0 {
                        self.inner.metrics.disconnects.fetch_add(1, Ordering::Relaxed);
                    }

                    let delay = backoff_delay(attempt);
                    tracing::warn!(attempt, delay_s = delay.as_secs(), "broker disconnected, reconnecting");
                    tokio::time::sleep(delay).await;

                    match Self::connect_once(&self.inner.config).await {
                        Ok(channel) => {
                            *self.inner.channel.write().await = Some(channel);
                            self.inner.connected.store(true, Ordering::Release);
                            self.inner.metrics.connects.fetch_add(1, Ordering::Relaxed);
                            tracing::info!("broker reconnected");
                            if self.inner.handler.read().await.is_some() {
                                match self.start_consumer().await {
                                    Ok(()) => attempt = 0,
                                    Err(e) => {
                                        tracing::error!(error = %e, "failed to resume device-data consumer");
                                        attempt = attempt.saturating_add(1);
                                    }
                                }
                            } else {
                                attempt = 0;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "broker reconnect attempt failed");
                            attempt = attempt.saturating_add(1);
                        }
                    }
                }

                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Exponential backoff starting at 2s, doubling to a 60s ceiling.
fn backoff_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return INITIAL_BACKOFF;
    }
    let millis = INITIAL_BACKOFF.as_millis().saturating_mul(1u128 << attempt.min(16));
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)).min(MAX_BACKOFF)
}

/// Builder for a [`BrokerClient`].
#[derive(Debug, Default)]
pub struct BrokerClientBuilder {
    host: String,
    port: u16,
    username: String,
    password: String,
    vhost: String,
    confirm_timeout: Option<Duration>,
    prefetch: Option<u16>,
}

impl BrokerClientBuilder {
    /// Sets the broker host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the virtual host (default `/`).
    #[must_use]
    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    /// Sets the publish confirmation timeout (default 10s).
    #[must_use]
    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    /// Sets the number of unacknowledged device-data messages the broker
    /// will deliver before pausing (default 10). Bounds how much ingest
    /// work can be in flight at once without requiring multiple consumers.
    #[must_use]
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Connects to the broker and starts the reconnect supervisor.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::ConnectFailed` if the initial connection fails.
    pub async fn build(self) -> Result<BrokerClient, BrokerError> {
        if self.host.is_empty() {
            return Err(BrokerError::ConnectFailed("broker host is required".into()));
        }

        let vhost = if self.vhost.is_empty() { "/".to_string() } else { self.vhost };
        let config = BrokerConfig {
            host: self.host,
            port: if self.port == 0 { 5672 } else { self.port },
            username: self.username,
            password: self.password,
            vhost,
            confirm_timeout: self.confirm_timeout.unwrap_or(Duration::from_secs(10)),
            prefetch: self.prefetch.unwrap_or(10),
        };

        let channel = BrokerClient::connect_once(&config).await?;

        let inner = Arc::new(Inner {
            config,
            channel: RwLock::new(Some(channel)),
            connected: AtomicBool::new(true),
            handler: RwLock::new(None),
            metrics: BrokerMetrics::default(),
        });
        inner.metrics.connects.fetch_add(1, Ordering::Relaxed);

        let client = BrokerClient { inner };
        tracing::info!(host = %client.inner.config.host, port = client.inner.config.port, "connected to broker");
        client.clone().spawn_supervisor();

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_ceiling() {
        assert_eq!(backoff_delay(0), Duration::from_secs(2));
        assert_eq!(backoff_delay(1), Duration::from_secs(4));
        assert_eq!(backoff_delay(2), Duration::from_secs(8));
        assert_eq!(backoff_delay(3), Duration::from_secs(16));
        assert_eq!(backoff_delay(4), Duration::from_secs(32));
        assert_eq!(backoff_delay(5), Duration::from_secs(60));
        assert_eq!(backoff_delay(20), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let result = BrokerClientBuilder::default().build().await;
        assert!(matches!(result, Err(BrokerError::ConnectFailed(_))));
    }
}
