// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the edge mapper.
//!
//! The hierarchy follows the failure domains of the mapper: configuration,
//! synchronization with the edge core, device adapters, desired-value
//! validation, telemetry sinks and device lifecycle misuse.
//!
//! Only configuration and registration failures are meant to reach the top
//! of the process. Adapter and sink errors are absorbed at their boundary and
//! turned into logs and per-device counters.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ResourceId;
use crate::sync::StatusCode;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Communication with the edge core failed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A protocol adapter call failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// A desired value was rejected.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A telemetry sink failed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// A device lifecycle operation failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Device is not registered in the manager.
    #[error("device not found: {0}")]
    DeviceNotFound(ResourceId),

    /// Device model is not known to the manager.
    #[error("device model not found: {0}")]
    ModelNotFound(ResourceId),

    /// A device with the same identity is already registered.
    #[error("device already registered: {0}")]
    DuplicateDevice(ResourceId),

    /// The device manager has shut down and accepts no more devices.
    #[error("device manager is shut down")]
    ShutDown,

    /// Local I/O failure, e.g. binding the HTTP API.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the expected schema.
    #[error("cannot parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A field holds a value the mapper cannot run with.
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Errors on the synchronization channel with the edge core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The exchange did not finish before its deadline.
    #[error("{operation} timed out after {millis} ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        millis: u64,
    },

    /// The peer closed the connection before answering.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer answered with a non-OK status.
    #[error("remote returned {code}: {message}")]
    Remote {
        /// Status code of the response.
        code: StatusCode,
        /// Message attached to the response.
        message: String,
    },

    /// The response does not belong to the request that was sent.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A wire payload cannot be turned into internal types.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Errors reported by protocol client adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call exceeded the adapter timeout.
    #[error("adapter call timed out after {0} ms")]
    Timeout(u64),

    /// The call was abandoned because the device is stopping.
    #[error("adapter call cancelled")]
    Cancelled,

    /// The client was already stopped.
    #[error("adapter client is stopped")]
    Stopped,

    /// The protocol or visitor configuration cannot be used.
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),

    /// Local I/O failure, typically spawning a poller process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external poller exited unsuccessfully.
    #[error("poller exited with {code:?}: {stderr}")]
    Command {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The device refused or failed the operation.
    #[error("device failure: {0}")]
    Device(String),
}

/// A desired value that cannot be written to its property.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Value is not an integer.
    #[error("`{value}` is not a valid integer")]
    NotAnInteger {
        /// The rejected value.
        value: String,
    },

    /// Value is not a finite floating point number.
    #[error("`{value}` is not a valid number")]
    NotANumber {
        /// The rejected value.
        value: String,
    },

    /// Value is not one of `true`, `false`, `1`, `0`.
    #[error("`{value}` is not a valid boolean")]
    NotABoolean {
        /// The rejected value.
        value: String,
    },

    /// Numeric value outside the declared range.
    #[error("`{value}` is outside the range [{}, {}]", .minimum.as_deref().unwrap_or("-inf"), .maximum.as_deref().unwrap_or("+inf"))]
    OutOfRange {
        /// The rejected value.
        value: String,
        /// Declared minimum, if any.
        minimum: Option<String>,
        /// Declared maximum, if any.
        maximum: Option<String>,
    },

    /// The model declares a bound that is not a number.
    #[error("declared bound `{bound}` is not a number")]
    InvalidBound {
        /// The offending bound.
        bound: String,
    },

    /// The property is read-only.
    #[error("property `{property}` is read-only")]
    NotWritable {
        /// Name of the property.
        property: String,
    },

    /// The device has no twin for this property.
    #[error("unknown property `{property}`")]
    UnknownProperty {
        /// Name of the property.
        property: String,
    },
}

/// Errors from telemetry sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT publish failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Remote endpoint answered with an error status.
    #[error("endpoint rejected record with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// Sink address cannot be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Record could not be serialized.
    #[error("cannot serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors related to device lifecycle operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device was freed and cannot be started again.
    #[error("device {0} has been freed")]
    Freed(ResourceId),

    /// No driver is registered for the protocol.
    #[error("unsupported protocol `{0}`")]
    UnsupportedProtocol(String),

    /// The adapter client could not be created or initialized.
    #[error("cannot initialize device {id}: {source}")]
    Init {
        /// The device that failed.
        id: ResourceId,
        /// Adapter failure.
        #[source]
        source: AdapterError,
    },
}

/// Result type alias for mapper operations.
pub type Result<T> = std::result::Result<T, Error>;
