// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry and liveness monitor (C3).
//!
//! Authoritative in-memory index of known devices, backed by [`Storage`].
//! The map is guarded by a single `RwLock`, but the lock is never held
//! across a database await: every mutation (registration, touch, offline
//! transition) persists to `Storage` first and only re-acquires the lock
//! afterward to swap in the already-confirmed state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::fanout::Hub;
use crate::model::{Device, DeviceEvent, DeviceId, DeviceStatus, DeviceSummary};
use crate::storage::Storage;

/// Backoff used when a sweep's persistence write fails.
const SWEEP_RETRY_BACKOFF: StdDuration = StdDuration::from_secs(1);
/// Maximum retries for a single device's persistence write within one sweep.
const SWEEP_MAX_RETRIES: u32 = 3;

/// The device registry.
///
/// Cheaply cloneable: all state lives behind an `Arc`.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

struct Inner {
    devices: RwLock<HashMap<DeviceId, Device>>,
    storage: Storage,
    hub: Hub,
    offline_threshold: Duration,
}

impl Registry {
    /// Loads every persisted device and builds the in-memory index.
    /// Devices are loaded with `unknown` status is never set here; the
    /// caller's first liveness sweep reconciles any stale `online` rows.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Storage` if the initial load fails.
    pub async fn load(
        storage: Storage,
        hub: Hub,
        offline_threshold: StdDuration,
    ) -> Result<Self, RegistryError> {
        let loaded = storage.load_devices().await?;
        let devices = loaded.into_iter().map(|d| (d.device_id.clone(), d)).collect();

        Ok(Self {
            inner: Arc::new(Inner {
                devices: RwLock::new(devices),
                storage,
                hub,
                offline_threshold: Duration::from_std(offline_threshold)
                    .unwrap_or_else(|_| Duration::seconds(15)),
            }),
        })
    }

    /// Returns the device with the given id, registering it with
    /// `default_name` if it does not yet exist.
    ///
    /// Idempotent under concurrent calls for the same `device_id`: the
    /// persist step (`insert_device_if_absent`) dedupes at the storage
    /// layer, so racing callers agree on the same persisted row. Only the
    /// caller that wins the in-memory insert emits `device_registered`; the
    /// map is never locked across the database await.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Storage` if persisting a new device fails.
    pub async fn ensure_registered(
        &self,
        device_id: &DeviceId,
        default_name: &str,
    ) -> Result<Device, RegistryError> {
        if let Some(existing) = self.inner.devices.read().await.get(device_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let device = Device::new_registered(device_id.clone(), default_name, now);
        let persisted = self.inner.storage.insert_device_if_absent(&device).await?;

        let newly_inserted = {
            let mut devices = self.inner.devices.write().await;
            let newly_inserted = !devices.contains_key(device_id);
            devices.entry(device_id.clone()).or_insert_with(|| persisted.clone());
            newly_inserted
        };

        if newly_inserted {
            self.inner
                .hub
                .publish(DeviceEvent::DeviceRegistered {
                    ts: now,
                    device_id: device_id.clone(),
                    display_name: persisted.display_name.clone(),
                })
                .await;
        }

        Ok(persisted)
    }

    /// Records that a message was received from `device_id` at `timestamp`.
    ///
    /// `last_seen_at` advances monotonically: a timestamp older than the
    /// current value is ignored for ordering purposes but still flips a
    /// previously offline device back online, since receiving anything at
    /// all is evidence of liveness.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Storage` if persisting the update fails.
    pub async fn touch(&self, device_id: &DeviceId, timestamp: DateTime<Utc>) -> Result<(), RegistryError> {
        let (new_last_seen, was_offline, new_status) = {
            let devices = self.inner.devices.read().await;
            let Some(device) = devices.get(device_id) else {
                return Ok(());
            };

            let new_last_seen = match device.last_seen_at {
                Some(existing) if existing >= timestamp => existing,
                _ => timestamp,
            };
            let was_offline = device.status == DeviceStatus::Offline;
            let new_status = if was_offline { DeviceStatus::Online } else { device.status };
            (new_last_seen, was_offline, new_status)
        };

        self.inner
            .storage
            .touch_device(device_id, new_last_seen, new_status)
            .await?;

        {
            let mut devices = self.inner.devices.write().await;
            if let Some(device) = devices.get_mut(device_id) {
                device.last_seen_at = Some(new_last_seen);
                device.status = new_status;
            }
        }

        if was_offline {
            self.inner
                .hub
                .publish(DeviceEvent::StatusChange {
                    ts: timestamp,
                    device_id: device_id.clone(),
                    from: DeviceStatus::Offline,
                    to: DeviceStatus::Online,
                })
                .await;
        }

        Ok(())
    }

    /// Returns a snapshot of a single device, if known.
    pub async fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.inner.devices.read().await.get(device_id).cloned()
    }

    /// Returns a snapshot of every known device.
    pub async fn list(&self) -> Vec<Device> {
        self.inner.devices.read().await.values().cloned().collect()
    }

    /// Returns the `hello` summary of every known device, for a
    /// newly-connected push-channel subscriber.
    pub async fn summaries(&self) -> Vec<DeviceSummary> {
        self.inner
            .devices
            .read()
            .await
            .values()
            .map(|d| DeviceSummary {
                device_id: d.device_id.clone(),
                status: d.status,
            })
            .collect()
    }

    async fn mark_offline(&self, device_id: &DeviceId, at: DateTime<Utc>) -> Result<(), RegistryError> {
        let mut attempt = 0;
        loop {
            match self.inner.storage.mark_device_offline(device_id).await {
                Ok(()) => break,
                Err(e) if attempt < SWEEP_MAX_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        device_id = %device_id,
                        attempt,
                        error = %e,
                        "persisting offline transition failed, retrying"
                    );
                    tokio::time::sleep(SWEEP_RETRY_BACKOFF).await;
                }
                Err(e) => return Err(RegistryError::Storage(e)),
            }
        }

        let mut devices = self.inner.devices.write().await;
        if let Some(device) = devices.get_mut(device_id) {
            device.status = DeviceStatus::Offline;
        }
        drop(devices);

        self.inner
            .hub
            .publish(DeviceEvent::StatusChange {
                ts: at,
                device_id: device_id.clone(),
                from: DeviceStatus::Online,
                to: DeviceStatus::Offline,
            })
            .await;

        Ok(())
    }

    /// Runs one liveness sweep: any device currently `online` whose
    /// `last_seen_at` is stale by more than the configured threshold is
    /// transitioned to `offline`. Called periodically by
    /// [`Registry::spawn_liveness_sweep`], and directly by tests.
    pub async fn sweep_once(&self) {
        let now = Utc::now();
        let threshold = self.inner.offline_threshold;

        let stale: Vec<DeviceId> = self
            .inner
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.status == DeviceStatus::Online && d.is_stale(now, threshold))
            .map(|d| d.device_id.clone())
            .collect();

        for device_id in stale {
            if let Err(e) = self.mark_offline(&device_id, now).await {
                tracing::error!(device_id = %device_id, error = %e, "giving up on offline transition for this sweep");
            }
        }
    }

    /// Spawns the background liveness sweep task, running every `interval`.
    #[must_use]
    pub fn spawn_liveness_sweep(self, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

// `Registry`'s operations are thin coordination over `Storage` (a real
// database) and `Hub`; they're covered by the scenario integration tests
// under tests/, not unit tests here. The state-machine logic they
// coordinate — staleness, the strict `>` boundary, never-seen devices — is
// unit-tested directly on `Device` in model::device.
