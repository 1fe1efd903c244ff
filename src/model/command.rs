// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command entity and wire payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DeviceId;

/// Delivery state of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Persisted, not yet published or awaiting confirm.
    Queued,
    /// The broker confirmed the publish.
    BrokerAcked,
    /// Publishing failed after exhausting retries.
    Failed,
}

/// An instruction sent from the server to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Globally unique, server-generated id: `cmd_<unix_millis>_<random12hex>`.
    pub command_id: String,
    /// Target device.
    pub device_id: DeviceId,
    /// Short action identifier, e.g. `REBOOT`, `LIGHT_CONTROL`.
    pub action: String,
    /// Action-specific parameters.
    pub parameters: serde_json::Value,
    /// When the command was issued.
    pub issued_at: DateTime<Utc>,
    /// Tag identifying the calling subsystem.
    pub source: String,
    /// Current delivery state.
    pub delivery_state: DeliveryState,
}

impl Command {
    /// Builds a new, unpersisted command in the `Queued` state, generating
    /// a fresh `command_id`.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        action: impl Into<String>,
        parameters: serde_json::Value,
        source: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            command_id: generate_command_id(issued_at),
            device_id,
            action: action.into(),
            parameters,
            issued_at,
            source: source.into(),
            delivery_state: DeliveryState::Queued,
        }
    }

    /// Serializes the wire payload sent to the device over the command
    /// topic: `{action, parameters, command_id, issued_at, source}`.
    #[must_use]
    pub fn wire_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "action": self.action,
            "parameters": self.parameters,
            "command_id": self.command_id,
            "issued_at": self.issued_at.to_rfc3339(),
            "source": self.source,
        })
    }
}

/// Generates a `cmd_<unix_millis>_<random12hex>` command id.
fn generate_command_id(issued_at: DateTime<Utc>) -> String {
    let millis = issued_at.timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("cmd_{millis}_{}", &suffix[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_id_has_expected_shape() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let cmd = Command::new(id, "REBOOT", serde_json::json!({}), "test", Utc::now());

        let parts: Vec<&str> = cmd.command_id.split('_').collect();
        assert_eq!(parts[0], "cmd");
        assert_eq!(parts[2].len(), 12);
    }

    #[test]
    fn wire_payload_carries_required_fields() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let cmd = Command::new(
            id,
            "LIGHT_CONTROL",
            serde_json::json!({"state": true}),
            "rest",
            Utc::now(),
        );

        let payload = cmd.wire_payload();
        assert_eq!(payload["action"], "LIGHT_CONTROL");
        assert_eq!(payload["command_id"], cmd.command_id);
        assert_eq!(payload["source"], "rest");
        assert_eq!(payload["parameters"]["state"], true);
    }

    #[test]
    fn two_commands_get_distinct_ids() {
        let id = DeviceId::parse("AABBCCDDEEFF").unwrap();
        let a = Command::new(id.clone(), "REBOOT", serde_json::json!({}), "t", Utc::now());
        let b = Command::new(id, "REBOOT", serde_json::json!({}), "t", Utc::now());
        assert_ne!(a.command_id, b.command_id);
    }
}
