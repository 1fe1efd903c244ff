// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity and event types shared across the core: devices, telemetry,
//! commands, and the events broadcast to push-channel subscribers.

mod command;
mod device;
mod device_id;
mod event;
mod telemetry;

pub use command::{Command, DeliveryState};
pub use device::{Device, DeviceStatus};
pub use device_id::DeviceId;
pub use event::{DeviceEvent, DeviceSummary};
pub use telemetry::TelemetryRecord;
