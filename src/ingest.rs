// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ingest worker (C2): turns raw device-data messages handed off by the
//! broker client (C1) into persisted telemetry and registry updates.
//!
//! Device ordering is preserved because the broker delivers every message
//! for a given device to the same consumer in publish order; this worker
//! never reorders or batches across devices.

use chrono::{DateTime, Utc};

use crate::broker::{BrokerClient, MessageOutcome};
use crate::error::{BrokerError, IngestError};
use crate::fanout::Hub;
use crate::model::{Device, DeviceEvent, DeviceId};
use crate::registry::Registry;
use crate::storage::Storage;

/// Consumes device-data messages and drives the registry, storage, and
/// fan-out hub in response.
///
/// Cheaply cloneable: all state lives behind its collaborators' own `Arc`s.
#[derive(Clone)]
pub struct IngestWorker {
    storage: Storage,
    registry: Registry,
    hub: Hub,
}

impl IngestWorker {
    /// Creates a new ingest worker.
    #[must_use]
    pub fn new(storage: Storage, registry: Registry, hub: Hub) -> Self {
        Self {
            storage,
            registry,
            hub,
        }
    }

    /// Registers this worker as the broker's device-data handler and
    /// starts consuming.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotConnected` if the broker has no live
    /// channel to consume on.
    pub async fn spawn(self, broker: &BrokerClient) -> Result<(), BrokerError> {
        broker
            .subscribe_device_data(move |raw_device_id, payload| {
                let worker = self.clone();
                Box::pin(async move { worker.process_message(&raw_device_id, payload).await })
            })
            .await
    }

    /// Processes one device-data message end to end, returning how the
    /// broker client should acknowledge it.
    async fn process_message(&self, raw_device_id: &str, payload: Vec<u8>) -> MessageOutcome {
        let device_id = match DeviceId::parse(raw_device_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(raw_device_id, error = %e, "malformed device id in routing key, acking without requeue");
                return MessageOutcome::Ack;
            }
        };

        match self.ingest(&device_id, &payload).await {
            Ok(()) => MessageOutcome::Ack,
            Err(IngestError::MalformedPayload(e)) => {
                tracing::warn!(device_id = %device_id, error = %e, "malformed telemetry payload, dead-lettering");
                MessageOutcome::DeadLetter
            }
            Err(IngestError::Storage(e)) if e.is_transient() => {
                tracing::warn!(device_id = %device_id, error = %e, "transient storage error, leaving message for redelivery");
                MessageOutcome::NackRequeue
            }
            Err(IngestError::Storage(e)) => {
                tracing::error!(device_id = %device_id, error = %e, "permanent storage error, dead-lettering");
                MessageOutcome::DeadLetter
            }
            Err(IngestError::Registry(e)) => {
                tracing::warn!(device_id = %device_id, error = %e, "registry error, leaving message for redelivery");
                MessageOutcome::NackRequeue
            }
            Err(IngestError::MalformedTopic(e)) => {
                tracing::warn!(device_id = %device_id, reason = %e, "malformed topic, acking without requeue");
                MessageOutcome::Ack
            }
        }
    }

    async fn ingest(&self, device_id: &DeviceId, payload: &[u8]) -> Result<(), IngestError> {
        let body: serde_json::Value = serde_json::from_slice(payload)?;

        let device = match self.registry.get(device_id).await {
            Some(device) => device,
            None => {
                self.registry
                    .ensure_registered(device_id, &default_display_name(device_id))
                    .await?
            }
        };

        let device_timestamp = body
            .get("timestamp")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let received_at = clock_skew_adjusted_now(&device);

        let record = self
            .storage
            .insert_telemetry(device_id, received_at, device_timestamp, &body)
            .await?;
        tracing::debug!(device_id = %device_id, telemetry_id = record.id, "telemetry persisted");

        self.registry.touch(device_id, received_at).await?;

        self.hub
            .publish(DeviceEvent::Telemetry {
                ts: received_at,
                device_id: device_id.clone(),
                data: body,
            })
            .await;

        Ok(())
    }
}

/// `now()`, unless the device's `last_seen_at` is already at or past it —
/// in which case we fall back to `last_seen_at` rather than record
/// telemetry that appears to have arrived before the device's last known
/// message, tolerating ordinary clock skew between workers.
fn clock_skew_adjusted_now(device: &Device) -> DateTime<Utc> {
    let now = Utc::now();
    match device.last_seen_at {
        Some(last_seen_at) if last_seen_at >= now => last_seen_at,
        _ => now,
    }
}

fn default_display_name(device_id: &DeviceId) -> String {
    format!("device-{device_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_skew_adjusted_now_falls_back_to_last_seen() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(30);
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let mut device = Device::new_registered(id, "node", now);
        device.last_seen_at = Some(future);

        assert_eq!(clock_skew_adjusted_now(&device), future);
    }

    #[test]
    fn clock_skew_adjusted_now_uses_now_when_last_seen_is_older() {
        let now = Utc::now();
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let mut device = Device::new_registered(id, "node", now);
        device.last_seen_at = Some(now - chrono::Duration::seconds(30));

        let adjusted = clock_skew_adjusted_now(&device);
        assert!(adjusted >= now);
    }

    #[test]
    fn default_display_name_includes_device_id() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        assert_eq!(default_display_name(&id), "device-AABBCCDDEEFF");
    }
}
