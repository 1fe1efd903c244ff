// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Events broadcast to push-channel subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeliveryState, DeviceId, DeviceStatus};

/// Events emitted to the fan-out hub (C5) by the ingest worker (C2), the
/// registry's liveness sweep (C3), and the command dispatcher (C4).
///
/// Serializes as `{type, ts, ...}` with `type` tagging the variant, matching
/// the push-channel protocol's wire schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// Sent once per new subscriber connection, carrying a device-list
    /// summary so clients don't need a separate bootstrap round trip.
    Hello {
        /// Event timestamp.
        ts: DateTime<Utc>,
        /// Summary of every known device's id and current status.
        devices: Vec<DeviceSummary>,
    },
    /// A telemetry message was ingested and persisted.
    Telemetry {
        /// Event timestamp.
        ts: DateTime<Utc>,
        /// Originating device.
        device_id: DeviceId,
        /// The opaque payload, as ingested.
        data: serde_json::Value,
    },
    /// A device's liveness status changed.
    StatusChange {
        /// Event timestamp.
        ts: DateTime<Utc>,
        /// Device whose status changed.
        device_id: DeviceId,
        /// Status before the transition.
        from: DeviceStatus,
        /// Status after the transition.
        to: DeviceStatus,
    },
    /// A previously unseen device was auto-registered.
    DeviceRegistered {
        /// Event timestamp.
        ts: DateTime<Utc>,
        /// Newly registered device.
        device_id: DeviceId,
        /// Default display name assigned at registration.
        display_name: String,
    },
    /// A dispatched command reached a terminal delivery state.
    CommandAck {
        /// Event timestamp.
        ts: DateTime<Utc>,
        /// Target device.
        device_id: DeviceId,
        /// The command's id.
        command_id: String,
        /// The resulting delivery state.
        delivery_state: DeliveryState,
    },
}

/// A device id and its current status, used in the `hello` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// The device id.
    pub device_id: DeviceId,
    /// Its current liveness status.
    pub status: DeviceStatus,
}

impl DeviceEvent {
    /// Returns the device id this event concerns, if any (`Hello` carries
    /// no single device id).
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::Hello { .. } => None,
            Self::Telemetry { device_id, .. }
            | Self::StatusChange { device_id, .. }
            | Self::DeviceRegistered { device_id, .. }
            | Self::CommandAck { device_id, .. } => Some(device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_event_device_id() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let event = DeviceEvent::Telemetry {
            ts: Utc::now(),
            device_id: id.clone(),
            data: serde_json::json!({}),
        };
        assert_eq!(event.device_id(), Some(&id));
    }

    #[test]
    fn hello_event_has_no_device_id() {
        let event = DeviceEvent::Hello {
            ts: Utc::now(),
            devices: Vec::new(),
        };
        assert_eq!(event.device_id(), None);
    }

    #[test]
    fn serializes_with_type_tag() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let event = DeviceEvent::DeviceRegistered {
            ts: Utc::now(),
            device_id: id,
            display_name: "node".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"device_registered""#));
    }

    #[test]
    fn status_change_serializes_from_and_to() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let event = DeviceEvent::StatusChange {
            ts: Utc::now(),
            device_id: id,
            from: DeviceStatus::Online,
            to: DeviceStatus::Offline,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""from":"online""#));
        assert!(json.contains(r#""to":"offline""#));
    }
}
