// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device entity and its liveness state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DeviceId;

/// Liveness status of a device, as tracked by the registry.
///
/// `Unknown` is only observed for in-memory records loaded at startup,
/// before the first liveness sweep has run; callers must not treat it
/// as equivalent to `Online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Not yet reconciled by a liveness sweep since process start.
    Unknown,
    /// `now - last_seen_at <= offline_threshold`.
    Online,
    /// `now - last_seen_at > offline_threshold`.
    Offline,
}

/// A registered device and its current liveness/metadata state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier (hex MAC).
    pub device_id: DeviceId,
    /// Human-readable name, defaulted at auto-registration.
    pub display_name: String,
    /// When this device was first observed.
    pub first_seen_at: DateTime<Utc>,
    /// Timestamp of the most recent accepted message, if any.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Current liveness status.
    pub status: DeviceStatus,
    /// Capabilities the device has declared (opaque strings).
    pub declared_capabilities: Vec<String>,
    /// Opaque metadata key-value pairs.
    pub metadata: HashMap<String, String>,
}

impl Device {
    /// Creates a newly auto-registered device: `status = Online`,
    /// `first_seen_at = last_seen_at = now`.
    #[must_use]
    pub fn new_registered(device_id: DeviceId, display_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id,
            display_name: display_name.into(),
            first_seen_at: now,
            last_seen_at: Some(now),
            status: DeviceStatus::Online,
            declared_capabilities: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Returns true if `now - last_seen_at > threshold`, the liveness
    /// sweep's offline condition. A device that has never been seen is
    /// treated as stale.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        match self.last_seen_at {
            Some(last_seen_at) => now - last_seen_at > threshold,
            None => true,
        }
    }
}
