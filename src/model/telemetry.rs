// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telemetry record entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DeviceId;

/// A single timestamped observation ingested from a device.
///
/// The server does not validate `payload` beyond well-formedness; keys
/// are device-defined and preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Monotonic row id, assigned by storage.
    pub id: i64,
    /// Device this observation came from.
    pub device_id: DeviceId,
    /// Server timestamp at ingest.
    pub received_at: DateTime<Utc>,
    /// Device-reported timestamp, if the payload carried one.
    pub device_timestamp: Option<DateTime<Utc>>,
    /// The raw, opaque payload.
    pub payload: serde_json::Value,
}
