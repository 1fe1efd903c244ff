// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary entry point: wires the five components together and keeps the
//! process alive for an external REST façade to drive via [`Core`].

use device_core::broker::BrokerClient;
use device_core::fanout::Hub;
use device_core::ingest::IngestWorker;
use device_core::registry::Registry;
use device_core::storage::Storage;
use device_core::{Config, Core};

#[tokio::main]
async fn main() -> device_core::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    Config::init(config);
    let config = Config::get();

    let storage = Storage::connect(&config.database_url).await?;
    tracing::info!("connected to database");

    let hub = Hub::new(config.fanout_buffer_size);

    let registry = Registry::load(storage.clone(), hub.clone(), config.liveness_offline_threshold).await?;
    registry.clone().spawn_liveness_sweep(config.liveness_sweep_interval);
    tracing::info!("liveness sweep running");

    let broker = BrokerClient::builder()
        .host(config.broker_address.as_str())
        .port(config.broker_port)
        .credentials(config.broker_username.as_str(), config.broker_password.as_str())
        .vhost(config.broker_vhost.as_str())
        .confirm_timeout(config.command_publish_timeout)
        .prefetch(config.ingest_prefetch)
        .build()
        .await?;

    IngestWorker::new(storage.clone(), registry.clone(), hub.clone())
        .spawn(&broker)
        .await?;
    tracing::info!(prefetch = config.ingest_prefetch, "ingest worker started");

    let core = Core::new(registry, broker, storage, hub, config.command_max_retries);
    let _ = &core;

    // The REST façade that drives `Core` lives outside this crate; this
    // binary's job ends at standing up the five components and the
    // background tasks they run on.
    std::future::pending::<()>().await;
    Ok(())
}
