// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol client adapters.
//!
//! A [`ProtocolDriver`] knows one device protocol and creates a
//! [`ProtocolClient`] per device. The mapper core only ever talks to devices
//! through this interface, and every call it makes is bounded by a timeout
//! and raced against the device's cancellation token (see [`bounded`]).
//!
//! Two drivers ship with the crate:
//!
//! - [`VirtualDriver`] (`virtual`): in-memory registers, used for simulation
//!   and testing
//! - [`ExecDriver`] (`exec`): delegates every operation to an external
//!   poller program
//!
//! Dropping the client handle releases it; there is no separate free call.

mod exec;
mod virtual_driver;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AdapterError, DeviceError};
use crate::model::{ProtocolConfig, VisitorConfig};

pub use exec::ExecDriver;
pub use virtual_driver::{VirtualBus, VirtualDriver};

/// Health of a device as seen by its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// The device answers.
    Healthy,
    /// The device does not answer or reports a fault.
    Unhealthy,
    /// The adapter cannot tell.
    Unknown,
}

impl HealthState {
    /// Returns `true` for [`HealthState::Healthy`].
    #[must_use]
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

/// Handle on one device, created by a [`ProtocolDriver`].
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Prepares the device for I/O.
    async fn init(&self) -> Result<(), AdapterError>;

    /// Reads the raw value a visitor points at.
    async fn read(&self, visitor: &VisitorConfig) -> Result<Vec<u8>, AdapterError>;

    /// Writes a value through a device method.
    async fn write(
        &self,
        visitor: &VisitorConfig,
        method: &str,
        property: &str,
        value: &str,
    ) -> Result<(), AdapterError>;

    /// Aborts in-flight work and releases device-side resources.
    async fn stop(&self) -> Result<(), AdapterError>;

    /// Queries device health.
    async fn health(&self) -> HealthState;
}

/// Factory of [`ProtocolClient`]s for one protocol.
pub trait ProtocolDriver: Send + Sync {
    /// Protocol name this driver answers to.
    fn name(&self) -> &str;

    /// Creates a client for a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol configuration is unusable.
    fn new_client(&self, config: &ProtocolConfig) -> Result<Box<dyn ProtocolClient>, AdapterError>;
}

/// Drivers available to the mapper, keyed by protocol name.
///
/// # Examples
///
/// ```
/// use edge_mapper::driver::{DriverRegistry, VirtualDriver};
///
/// let registry = DriverRegistry::new().with_driver(VirtualDriver::new());
/// assert!(registry.get("virtual").is_some());
/// assert!(registry.get("modbus").is_none());
/// ```
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn ProtocolDriver>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `virtual` and `exec` drivers.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self::new()
            .with_driver(VirtualDriver::new())
            .with_driver(ExecDriver::new())
    }

    /// Adds a driver, replacing any driver with the same name.
    #[must_use]
    pub fn with_driver(mut self, driver: impl ProtocolDriver + 'static) -> Self {
        self.register(Arc::new(driver));
        self
    }

    /// Adds a shared driver, replacing any driver with the same name.
    pub fn register(&mut self, driver: Arc<dyn ProtocolDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    /// Looks up a driver by protocol name.
    #[must_use]
    pub fn get(&self, protocol: &str) -> Option<&Arc<dyn ProtocolDriver>> {
        self.drivers.get(protocol)
    }

    /// Returns the registered protocol names.
    #[must_use]
    pub fn protocols(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Creates a client for a device's protocol configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnsupportedProtocol`] if no driver matches, or
    /// the driver's error wrapped in [`crate::Error::Adapter`].
    pub fn new_client(&self, config: &ProtocolConfig) -> crate::Result<Arc<dyn ProtocolClient>> {
        let driver = self
            .get(&config.protocol_name)
            .ok_or_else(|| DeviceError::UnsupportedProtocol(config.protocol_name.clone()))?;
        Ok(Arc::from(driver.new_client(config)?))
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

/// Runs an adapter call with a deadline, abandoning it if `token` fires.
///
/// Dropping the call future is how in-flight work is aborted, so adapters
/// must release resources on drop (the exec driver kills its child process).
///
/// # Errors
///
/// Returns [`AdapterError::Cancelled`] or [`AdapterError::Timeout`], or the
/// call's own error.
pub async fn bounded<T, F>(
    timeout: Duration,
    token: &CancellationToken,
    call: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(AdapterError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(AdapterError::Timeout(duration_millis(timeout))),
        },
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
