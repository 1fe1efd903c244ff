// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `device_core` - the core device communication and liveness subsystem of
//! a fleet IoT platform.
//!
//! Five components cooperate to ingest telemetry, track device liveness,
//! dispatch commands, and fan out real-time events to web clients:
//!
//! - [`broker`] (C1) - persistent AMQP connection; device-data consumption
//!   and command publishing with delivery confirmation.
//! - [`ingest`] (C2) - turns consumed messages into persisted telemetry and
//!   registry updates.
//! - [`registry`] (C3) - authoritative in-memory device index and liveness
//!   sweep.
//! - [`dispatch`] (C4) - command dispatch with retry and delivery tracking.
//! - [`fanout`] (C5) - event fan-out to push-channel subscribers, immune to
//!   slow subscribers.
//!
//! [`Core`] composes C3, C4, and C5 into the operations an external REST
//! façade calls; C1 and C2 run as background tasks wired up in the
//! `device-core` binary (see `src/bin/core.rs`).
//!
//! # Quick Start
//!
//! ```no_run
//! use device_core::{Config, Core};
//! use device_core::broker::BrokerClient;
//! use device_core::fanout::Hub;
//! use device_core::ingest::IngestWorker;
//! use device_core::registry::Registry;
//! use device_core::storage::Storage;
//!
//! #[tokio::main]
//! async fn main() -> device_core::Result<()> {
//!     let config = Config::from_env()?;
//!     Config::init(config);
//!     let config = Config::get();
//!
//!     let storage = Storage::connect(&config.database_url).await?;
//!     let hub = Hub::new(config.fanout_buffer_size);
//!     let registry = Registry::load(storage.clone(), hub.clone(), config.liveness_offline_threshold).await?;
//!     registry.clone().spawn_liveness_sweep(config.liveness_sweep_interval);
//!
//!     let broker = BrokerClient::builder()
//!         .host(config.broker_address.as_str())
//!         .port(config.broker_port)
//!         .credentials(config.broker_username.as_str(), config.broker_password.as_str())
//!         .vhost(config.broker_vhost.as_str())
//!         .confirm_timeout(config.command_publish_timeout)
//!         .build()
//!         .await?;
//!
//!     IngestWorker::new(storage.clone(), registry.clone(), hub.clone())
//!         .spawn(&broker)
//!         .await?;
//!
//!     let core = Core::new(registry, broker, storage, hub, config.command_max_retries);
//!     let _devices = core.list_devices().await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod ingest;
pub mod model;
pub mod registry;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};

use model::{DeliveryState, Device, DeviceEvent, DeviceId, DeviceSummary};

use broker::BrokerClient;
use dispatch::Dispatcher;
use error::DispatchError;
use fanout::{Hub, SubscriberId};
use registry::Registry;
use storage::Storage;

/// Shared handle exposing the operations an external REST façade needs:
/// reading the device registry, dispatching commands, and registering
/// push-channel subscribers.
///
/// Cheaply cloneable: every field is itself a cheaply cloneable handle.
#[derive(Clone)]
pub struct Core {
    registry: Registry,
    dispatcher: Dispatcher,
    hub: Hub,
}

impl Core {
    /// Assembles a `Core` handle from its already-constructed collaborators.
    /// `command_max_retries` bounds [`Dispatcher`]'s retry count for
    /// transient publish failures.
    #[must_use]
    pub fn new(
        registry: Registry,
        broker: BrokerClient,
        storage: Storage,
        hub: Hub,
        command_max_retries: u32,
    ) -> Self {
        let dispatcher = Dispatcher::new(broker, storage, registry.clone(), hub.clone(), command_max_retries);
        Self {
            registry,
            dispatcher,
            hub,
        }
    }

    /// Returns the id and status of every known device.
    pub async fn list_devices(&self) -> Vec<DeviceSummary> {
        self.registry.summaries().await
    }

    /// Returns the full record for `device_id`, or `None` if unknown.
    pub async fn get_device(&self, device_id: &DeviceId) -> Option<Device> {
        self.registry.get(device_id).await
    }

    /// Dispatches a command to `device_id`.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn dispatch_command(
        &self,
        device_id: DeviceId,
        action: impl Into<String>,
        parameters: serde_json::Value,
        source: impl Into<String>,
    ) -> std::result::Result<(String, DeliveryState), DispatchError> {
        self.dispatcher.dispatch(device_id, action, parameters, source).await
    }

    /// Registers a new push-channel subscriber, returning its id and the
    /// receiving end of its event buffer. A `hello` event carrying the
    /// current device list is already enqueued on the returned channel.
    pub async fn subscribe_events(&self) -> (SubscriberId, tokio::sync::mpsc::Receiver<DeviceEvent>) {
        let devices = self.registry.summaries().await;
        self.hub.subscribe(devices).await
    }

    /// Removes a push-channel subscriber, e.g. on transport disconnect.
    pub async fn unsubscribe_events(&self, id: SubscriberId) {
        self.hub.unsubscribe(id).await;
    }
}
