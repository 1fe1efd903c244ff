// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent storage for devices, telemetry, and commands.
//!
//! Backed by a `sqlx` connection pool against the three tables named in
//! the persisted state layout: `devices`, `telemetry`, `commands`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::StorageError;
use crate::model::{Command, DeliveryState, Device, DeviceId, DeviceStatus, TelemetryRecord};

/// Default size of the database connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Thin wrapper around a `sqlx` connection pool exposing the queries the
/// registry, ingest worker, and dispatcher need.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connects to the database and runs a trivial ping, failing fast if
    /// the connection string or network is bad.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_POOL_SIZE)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Loads every persisted device, for the registry to seed its
    /// in-memory map at startup.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the query fails.
    pub async fn load_devices(&self) -> Result<Vec<Device>, StorageError> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT device_id, display_name, first_seen_at, last_seen_at, status, \
             capabilities_json, metadata_json FROM devices",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.into_iter().map(DeviceRow::into_device).collect()
    }

    /// Inserts a newly auto-registered device, or returns the existing row
    /// if another caller won the race — `ensure_registered`'s idempotence
    /// is enforced here with `ON CONFLICT DO NOTHING` plus a follow-up
    /// `SELECT`, not in application logic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the query fails.
    pub async fn insert_device_if_absent(&self, device: &Device) -> Result<Device, StorageError> {
        sqlx::query(
            "INSERT INTO devices (device_id, display_name, first_seen_at, last_seen_at, \
             status, capabilities_json, metadata_json) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (device_id) DO NOTHING",
        )
        .bind(device.device_id.as_str())
        .bind(&device.display_name)
        .bind(device.first_seen_at)
        .bind(device.last_seen_at)
        .bind(status_str(device.status))
        .bind(serde_json::to_value(&device.declared_capabilities).unwrap_or_default())
        .bind(serde_json::to_value(&device.metadata).unwrap_or_default())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        let row = sqlx::query_as::<_, DeviceRow>(
            "SELECT device_id, display_name, first_seen_at, last_seen_at, status, \
             capabilities_json, metadata_json FROM devices WHERE device_id = $1",
        )
        .bind(device.device_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        row.into_device()
    }

    /// Updates `last_seen_at` and, when present, `status` for a device.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the query fails, or `NotFound` if
    /// the device does not exist.
    pub async fn touch_device(
        &self,
        device_id: &DeviceId,
        last_seen_at: DateTime<Utc>,
        status: DeviceStatus,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE devices SET last_seen_at = $2, status = $3 WHERE device_id = $1",
        )
        .bind(device_id.as_str())
        .bind(last_seen_at)
        .bind(status_str(status))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// Marks a device offline, called only by the liveness sweep.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the query fails.
    pub async fn mark_device_offline(&self, device_id: &DeviceId) -> Result<(), StorageError> {
        sqlx::query("UPDATE devices SET status = 'offline' WHERE device_id = $1")
            .bind(device_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;
        Ok(())
    }

    /// Inserts a telemetry record, returning the persisted row with its
    /// assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the insert fails (e.g. a foreign
    /// key violation because the device row does not exist, invariant 4).
    pub async fn insert_telemetry(
        &self,
        device_id: &DeviceId,
        received_at: DateTime<Utc>,
        device_timestamp: Option<DateTime<Utc>>,
        payload: &serde_json::Value,
    ) -> Result<TelemetryRecord, StorageError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO telemetry (device_id, received_at, device_timestamp, payload_json) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(device_id.as_str())
        .bind(received_at)
        .bind(device_timestamp)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(TelemetryRecord {
            id: row.0,
            device_id: device_id.clone(),
            received_at,
            device_timestamp,
            payload: payload.clone(),
        })
    }

    /// Inserts a command row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the insert fails.
    pub async fn insert_command(&self, command: &Command) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO commands (command_id, device_id, action, parameters_json, \
             issued_at, source, delivery_state) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&command.command_id)
        .bind(command.device_id.as_str())
        .bind(&command.action)
        .bind(&command.parameters)
        .bind(command.issued_at)
        .bind(&command.source)
        .bind(delivery_state_str(command.delivery_state))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;
        Ok(())
    }

    /// Updates a command's delivery state. Idempotent: updating the same
    /// `command_id` to the same state twice is a no-op on the stored row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the update fails.
    pub async fn update_command_state(
        &self,
        command_id: &str,
        state: DeliveryState,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE commands SET delivery_state = $2 WHERE command_id = $1")
            .bind(command_id)
            .bind(delivery_state_str(state))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;
        Ok(())
    }
}

fn status_str(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Unknown => "unknown",
        DeviceStatus::Online => "online",
        DeviceStatus::Offline => "offline",
    }
}

fn delivery_state_str(state: DeliveryState) -> &'static str {
    match state {
        DeliveryState::Queued => "queued",
        DeliveryState::BrokerAcked => "broker_acked",
        DeliveryState::Failed => "failed",
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    device_id: String,
    display_name: String,
    first_seen_at: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
    status: String,
    capabilities_json: serde_json::Value,
    metadata_json: serde_json::Value,
}

impl DeviceRow {
    fn into_device(self) -> Result<Device, StorageError> {
        let status = match self.status.as_str() {
            "online" => DeviceStatus::Online,
            "offline" => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        };
        let device_id = DeviceId::parse(&self.device_id)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        Ok(Device {
            device_id,
            display_name: self.display_name,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
            status,
            declared_capabilities: serde_json::from_value(self.capabilities_json)
                .unwrap_or_default(),
            metadata: serde_json::from_value(self.metadata_json).unwrap_or_default(),
        })
    }
}
