// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the device communication core.
//!
//! This module provides a comprehensive error hierarchy for handling failures
//! across the crate: broker communication, ingest processing, registry
//! persistence, command dispatch, storage access, and configuration loading.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while communicating with the message broker.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Error occurred while ingesting a device message.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Error occurred in the device registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Error occurred while dispatching a command.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Error occurred while accessing persistent storage.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error occurred while loading configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No device exists with the given id.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Errors related to the broker connection (C1).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker connection is currently down and has not yet reconnected.
    #[error("not connected to broker")]
    NotConnected,

    /// The broker did not confirm the publish within the configured timeout.
    #[error("publish confirm timed out after {0}ms")]
    ConfirmTimeout(u64),

    /// The serialized payload exceeds the broker's maximum message size.
    #[error("payload of {actual} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the payload that was rejected.
        actual: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// The initial connection to the broker failed.
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(String),

    /// A publish attempt failed for a reason other than timeout or size.
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// Errors related to ingest processing (C2).
#[derive(Debug, Error)]
pub enum IngestError {
    /// The message topic did not match the expected `devices/<id>/<kind>` shape.
    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    /// The message body was not well-formed JSON.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Persisting the ingested message failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The registry rejected or failed to service the registration/touch call.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors related to the device registry and liveness monitor (C3).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A persistence failure occurred while applying a status transition.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors related to command dispatch (C4).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The broker connection is currently down.
    #[error("not connected to broker")]
    NotConnected,

    /// The broker did not confirm the publish within the configured timeout.
    #[error("publish confirm timed out after {0}ms")]
    ConfirmTimeout(u64),

    /// The serialized command payload exceeds the broker's maximum message size.
    #[error("payload of {actual} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the payload that was rejected.
        actual: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// No device exists with the given id.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Persisting the command row failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DispatchError {
    /// Collapses the dispatch error into the three REST-facing outcomes:
    /// the broker accepted the command, it could not be reached in time,
    /// or the request itself was invalid.
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. } | Self::UnknownDevice(_)
        )
    }

    /// Whether this failure is eligible for retry by the dispatcher.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ConfirmTimeout(_))
    }
}

/// Errors related to the persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not obtain or use a database connection.
    #[error("database connection error: {0}")]
    Connection(String),

    /// A query failed to execute.
    #[error("query failed: {0}")]
    Query(String),

    /// The requested row does not exist.
    #[error("not found")]
    NotFound,
}

impl StorageError {
    /// Whether this failure is transient (the broker should redeliver and
    /// retry) rather than permanent (the message should be dead-lettered).
    /// Connection loss is the only condition expected to self-resolve;
    /// a query failure (constraint violation, schema mismatch) will fail
    /// identically on redelivery.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Errors related to configuration loading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// The environment variable that failed to parse.
        var: &'static str,
        /// Description of the parsing failure.
        reason: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_error_display() {
        let err = BrokerError::PayloadTooLarge {
            actual: 11_000,
            max: 10_240,
        };
        assert_eq!(
            err.to_string(),
            "payload of 11000 bytes exceeds the 10240 byte limit"
        );
    }

    #[test]
    fn error_from_broker_error() {
        let broker_err = BrokerError::NotConnected;
        let err: Error = broker_err.into();
        assert!(matches!(err, Error::Broker(BrokerError::NotConnected)));
    }

    #[test]
    fn ingest_error_wraps_storage_error() {
        let err = IngestError::Storage(StorageError::NotFound);
        assert_eq!(err.to_string(), "not found");
    }

    #[test]
    fn dispatch_error_bad_request_classification() {
        assert!(DispatchError::UnknownDevice("X".into()).is_bad_request());
        assert!(
            DispatchError::PayloadTooLarge {
                actual: 1,
                max: 1
            }
            .is_bad_request()
        );
        assert!(!DispatchError::NotConnected.is_bad_request());
    }

    #[test]
    fn dispatch_error_retryable_classification() {
        assert!(DispatchError::NotConnected.is_retryable());
        assert!(DispatchError::ConfirmTimeout(10_000).is_retryable());
        assert!(!DispatchError::UnknownDevice("X".into()).is_retryable());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::MissingVar("CORE_DATABASE_URL");
        assert_eq!(
            err.to_string(),
            "missing required environment variable: CORE_DATABASE_URL"
        );
    }
}
