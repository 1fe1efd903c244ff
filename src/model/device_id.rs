// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifier type.

use std::fmt;

use crate::error::IngestError;

/// Unique identifier for a device: its MAC address, hex-encoded as 12
/// uppercase characters with no separators (e.g. `AABBCCDDEEFF`).
///
/// This is a wrapper around `String` that provides a distinct type for
/// device identification and validates the expected shape at construction.
///
/// # Examples
///
/// ```
/// use device_core::model::DeviceId;
///
/// let id = DeviceId::parse("aabbccddeeff").unwrap();
/// assert_eq!(id.as_str(), "AABBCCDDEEFF");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Parses and validates a device id: exactly 12 hex characters.
    /// Lowercase input is normalized to uppercase, matching the canonical
    /// form devices are stored and broadcast under.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MalformedTopic` if the string is not 12
    /// hex characters.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        if raw.len() != 12 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IngestError::MalformedTopic(format!(
                "invalid device id: {raw}"
            )));
        }
        Ok(Self(raw.to_ascii_uppercase()))
    }

    /// Returns the device id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
