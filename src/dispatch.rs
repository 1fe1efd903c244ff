// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command dispatcher (C4): accepts command requests from the REST façade
//! and delivers them to the target device via the broker client (C1).

use std::time::Duration;

use chrono::Utc;

use crate::broker::BrokerClient;
use crate::error::{BrokerError, DispatchError};
use crate::fanout::Hub;
use crate::model::{Command, DeliveryState, DeviceEvent, DeviceId};
use crate::registry::Registry;
use crate::storage::Storage;

/// First retry delay for `not_connected` / `confirm_timeout` failures;
/// doubles on each subsequent attempt (1s, 2s, 4s, ...).
const FIRST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Dispatches commands to devices and tracks their delivery state.
#[derive(Clone)]
pub struct Dispatcher {
    broker: BrokerClient,
    storage: Storage,
    registry: Registry,
    hub: Hub,
    max_retries: u32,
}

impl Dispatcher {
    /// Creates a new dispatcher. `max_retries` bounds how many times a
    /// retryable publish failure is retried, with delays doubling from
    /// [`FIRST_RETRY_DELAY`].
    #[must_use]
    pub fn new(broker: BrokerClient, storage: Storage, registry: Registry, hub: Hub, max_retries: u32) -> Self {
        Self {
            broker,
            storage,
            registry,
            hub,
            max_retries,
        }
    }

    /// Dispatches a command to `device_id`, returning its id and final
    /// delivery state once the broker has acked or delivery has failed.
    ///
    /// Retries `NotConnected` and `ConfirmTimeout` up to `max_retries` times
    /// with doubling delays starting at 1s. `PayloadTooLarge` and
    /// `UnknownDevice` are not retried.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownDevice` if the registry has no record
    /// of `device_id`, or the broker's final classification after retries
    /// are exhausted.
    pub async fn dispatch(
        &self,
        device_id: DeviceId,
        action: impl Into<String>,
        parameters: serde_json::Value,
        source: impl Into<String>,
    ) -> Result<(String, DeliveryState), DispatchError> {
        if self.registry.get(&device_id).await.is_none() {
            return Err(DispatchError::UnknownDevice(device_id.to_string()));
        }

        let issued_at = Utc::now();
        let command = Command::new(device_id.clone(), action, parameters, source, issued_at);
        self.storage.insert_command(&command).await?;

        let payload = serde_json::to_vec(&command.wire_payload())
            .expect("wire_payload is always serializable");

        let outcome = self.publish_with_retry(&device_id, &payload).await;

        let final_state = match &outcome {
            Ok(()) => DeliveryState::BrokerAcked,
            Err(_) => DeliveryState::Failed,
        };
        self.storage
            .update_command_state(&command.command_id, final_state)
            .await?;

        self.hub
            .publish(DeviceEvent::CommandAck {
                ts: Utc::now(),
                device_id: device_id.clone(),
                command_id: command.command_id.clone(),
                delivery_state: final_state,
            })
            .await;

        match outcome {
            Ok(()) => Ok((command.command_id, final_state)),
            Err(e) => {
                tracing::warn!(
                    device_id = %device_id,
                    command_id = %command.command_id,
                    error = %e,
                    "command dispatch failed"
                );
                Err(e)
            }
        }
    }

    async fn publish_with_retry(&self, device_id: &DeviceId, payload: &[u8]) -> Result<(), DispatchError> {
        let mut last_err = None;
        let retry_delays = (0..self.max_retries).map(|attempt| FIRST_RETRY_DELAY * 2u32.pow(attempt));

        for delay in std::iter::once(None).chain(retry_delays.map(Some)) {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match self.broker.publish_command(device_id.as_str(), payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let classified = classify(e);
                    let retryable = classified.is_retryable();
                    last_err = Some(classified);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_err.expect("at least one publish attempt always runs"))
    }
}

/// Maps a broker-level error onto the dispatcher's retry classification.
/// `ConnectFailed`/`PublishFailed` carry broker-internal detail that isn't
/// meaningful to the caller; both collapse to `NotConnected`, which is
/// retryable.
fn classify(err: BrokerError) -> DispatchError {
    match err {
        BrokerError::NotConnected => DispatchError::NotConnected,
        BrokerError::ConfirmTimeout(ms) => DispatchError::ConfirmTimeout(ms),
        BrokerError::PayloadTooLarge { actual, max } => DispatchError::PayloadTooLarge { actual, max },
        BrokerError::ConnectFailed(msg) | BrokerError::PublishFailed(msg) => {
            tracing::debug!(reason = %msg, "broker error classified as not_connected for retry purposes");
            DispatchError::NotConnected
        }
    }
}
