// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event fan-out hub (C5): delivers events to connected push-channel
//! subscribers.
//!
//! Unlike a broadcast channel, where one slow receiver causes every other
//! receiver to lag, each subscriber here owns its own bounded buffer. A
//! full buffer evicts only that subscriber — ingest and other subscribers
//! are never affected.
//!
//! # Examples
//!
//! ```
//! use device_core::fanout::Hub;
//!
//! # async fn example() {
//! let hub = Hub::new(256);
//! let (_id, mut rx) = hub.subscribe(Vec::new()).await;
//!
//! // The hub already enqueued a `hello` event ahead of anything else.
//! let _hello = rx.recv().await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::model::{DeviceEvent, DeviceSummary};

/// Opaque handle identifying a subscriber, server-generated at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

struct Subscriber {
    tx: mpsc::Sender<DeviceEvent>,
}

/// The event fan-out hub.
///
/// Cheaply cloneable: all state lives behind an `Arc`.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

struct Inner {
    buffer_size: usize,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl Hub {
    /// Creates a new hub; `buffer_size` bounds each subscriber's outbound
    /// queue.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer_size,
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a new subscriber, enqueues a `hello` event carrying
    /// `devices` (the current device list summary, fetched by the caller
    /// from the registry) so the subscriber never needs a separate
    /// bootstrap round trip, and returns its id along with the receiving
    /// end of its buffer.
    pub async fn subscribe(&self, devices: Vec<DeviceSummary>) -> (SubscriberId, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(self.inner.buffer_size);
        let id = SubscriberId(Uuid::new_v4());

        if let Err(e) = tx.try_send(DeviceEvent::Hello { ts: Utc::now(), devices }) {
            tracing::warn!(subscriber_id = %id.0, error = %e, "failed to enqueue hello event for new subscriber");
        }

        self.inner.subscribers.write().await.insert(id, Subscriber { tx });
        tracing::debug!(subscriber_id = %id.0, "subscriber connected");
        (id, rx)
    }

    /// Returns the number of currently connected subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Publishes an event to every connected subscriber.
    ///
    /// Delivery is best-effort and non-blocking: a subscriber whose buffer
    /// is full is evicted rather than allowed to stall the publisher.
    pub async fn publish(&self, event: DeviceEvent) {
        let mut stale = Vec::new();
        {
            let subscribers = self.inner.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::info!(subscriber_id = %id.0, "subscriber buffer full, evicting");
                        stale.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(subscriber_id = %id.0, "subscriber channel closed");
                        stale.push(*id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.inner.subscribers.write().await;
            for id in stale {
                subscribers.remove(&id);
            }
        }
    }

    /// Removes a subscriber explicitly, e.g. when its transport closes.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.inner.subscribers.write().await.remove(&id);
        tracing::debug!(subscriber_id = %id.0, "subscriber disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn telemetry_event() -> DeviceEvent {
        DeviceEvent::Hello {
            ts: Utc::now(),
            devices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let hub = Hub::new(8);
        let (_id, mut rx) = hub.subscribe(Vec::new()).await;

        // First message on the channel is always the subscriber's own hello.
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Hello { .. })));

        hub.publish(telemetry_event()).await;

        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let hub = Hub::new(8);
        let (_id1, mut rx1) = hub.subscribe(Vec::new()).await;
        let (_id2, mut rx2) = hub.subscribe(Vec::new()).await;
        rx1.recv().await;
        rx2.recv().await;

        hub.publish(telemetry_event()).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_buffer_evicts_only_that_subscriber() {
        let hub = Hub::new(1);
        let (_slow_id, mut slow) = hub.subscribe(Vec::new()).await;
        let (_fast_id, mut fast) = hub.subscribe(Vec::new()).await;

        // Each subscriber's single slot is already occupied by its own
        // hello; drain both before exercising eviction.
        slow.recv().await;
        fast.recv().await;

        // Both buffers have a single slot; fill both.
        hub.publish(telemetry_event()).await;
        assert_eq!(hub.subscriber_count().await, 2);

        // Fast drains its slot, freeing room; slow does not.
        assert!(fast.recv().await.is_some());

        // Second publish: fast has room and receives it, slow is still full
        // and gets evicted instead of blocking the publisher.
        hub.publish(telemetry_event()).await;

        assert_eq!(hub.subscriber_count().await, 1);
        assert!(fast.recv().await.is_some());

        // The slow subscriber only ever got the first event before eviction.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted_on_next_publish() {
        let hub = Hub::new(8);
        let (_id, rx) = hub.subscribe(Vec::new()).await;
        drop(rx);

        hub.publish(telemetry_event()).await;

        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscriber() {
        let hub = Hub::new(8);
        let (id, _rx) = hub.subscribe(Vec::new()).await;
        assert_eq!(hub.subscriber_count().await, 1);

        hub.unsubscribe(id).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
