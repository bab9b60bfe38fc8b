// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory register driver.
//!
//! Every client of a [`VirtualDriver`] shares one [`VirtualBus`], a map of
//! named registers. A visitor selects its register with
//! `{"register": "<name>"}` and may provide a `"default"` returned while the
//! register has never been written. The protocol configuration may seed
//! registers with `{"registers": {"<name>": <value>}}` and isolate a device
//! with `{"scope": "<prefix>"}`.
//!
//! The bus exposes fault injection and handle accounting, which makes the
//! driver usable as a device simulator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{HealthState, ProtocolClient, ProtocolDriver};
use crate::error::AdapterError;
use crate::model::{ProtocolConfig, VisitorConfig};

#[derive(Debug)]
struct Faults {
    init: bool,
    read: bool,
    write: bool,
    health: HealthState,
    read_delay: Duration,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            init: false,
            read: false,
            write: false,
            health: HealthState::Healthy,
            read_delay: Duration::ZERO,
        }
    }
}

/// Shared register space of the virtual driver.
///
/// # Examples
///
/// ```
/// use edge_mapper::driver::VirtualBus;
///
/// let bus = VirtualBus::new();
/// bus.set("temp", "21");
/// assert_eq!(bus.get("temp").as_deref(), Some("21"));
/// assert_eq!(bus.open_handles(), 0);
/// ```
#[derive(Debug, Default)]
pub struct VirtualBus {
    registers: Mutex<HashMap<String, String>>,
    pinned: Mutex<HashMap<String, String>>,
    faults: Mutex<Faults>,
    open_handles: AtomicUsize,
    allocated: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl VirtualBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a register.
    pub fn set(&self, register: impl Into<String>, value: impl Into<String>) {
        self.registers.lock().insert(register.into(), value.into());
    }

    /// Returns a register's value.
    #[must_use]
    pub fn get(&self, register: &str) -> Option<String> {
        self.registers.lock().get(register).cloned()
    }

    /// Makes a register ignore writes and always hold `value`, like a device
    /// that clamps or overrides what it is told.
    pub fn pin(&self, register: impl Into<String>, value: impl Into<String>) {
        let register = register.into();
        let value = value.into();
        self.set(register.clone(), value.clone());
        self.pinned.lock().insert(register, value);
    }

    /// Makes `init` fail.
    pub fn fail_init(&self, fail: bool) {
        self.faults.lock().init = fail;
    }

    /// Makes every read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.lock().read = fail;
    }

    /// Makes every write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.faults.lock().write = fail;
    }

    /// Sets the health state reported by every client.
    pub fn set_health(&self, health: HealthState) {
        self.faults.lock().health = health;
    }

    /// Delays every read, e.g. to trigger adapter timeouts.
    pub fn set_read_delay(&self, delay: Duration) {
        self.faults.lock().read_delay = delay;
    }

    /// Number of clients that are initialized and not stopped.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Number of client handles not yet dropped.
    #[must_use]
    pub fn allocated_clients(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Number of successful reads.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes that reached the bus.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn seed(&self, scope: Option<&str>, registers: &serde_json::Map<String, Value>) {
        let mut map = self.registers.lock();
        for (name, value) in registers {
            map.entry(scoped(scope, name))
                .or_insert_with(|| value_text(value));
        }
    }
}

/// Driver for the `virtual` protocol.
#[derive(Debug, Clone, Default)]
pub struct VirtualDriver {
    bus: Arc<VirtualBus>,
}

impl VirtualDriver {
    /// Protocol name.
    pub const PROTOCOL: &'static str = "virtual";

    /// Creates a driver with its own bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver on an existing bus.
    #[must_use]
    pub fn with_bus(bus: Arc<VirtualBus>) -> Self {
        Self { bus }
    }

    /// Returns the bus shared by this driver's clients.
    #[must_use]
    pub fn bus(&self) -> &Arc<VirtualBus> {
        &self.bus
    }
}

impl ProtocolDriver for VirtualDriver {
    fn name(&self) -> &str {
        Self::PROTOCOL
    }

    fn new_client(&self, config: &ProtocolConfig) -> Result<Box<dyn ProtocolClient>, AdapterError> {
        let scope = match config.config_data.get("scope") {
            None | Some(Value::Null) => None,
            Some(Value::String(scope)) => Some(scope.clone()),
            Some(other) => {
                return Err(AdapterError::InvalidConfig(format!(
                    "scope must be a string, got {other}"
                )));
            }
        };
        if let Some(registers) = config.config_data.get("registers") {
            let registers = registers.as_object().ok_or_else(|| {
                AdapterError::InvalidConfig("registers must be an object".to_string())
            })?;
            self.bus.seed(scope.as_deref(), registers);
        }

        self.bus.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VirtualClient {
            bus: Arc::clone(&self.bus),
            scope,
            open: AtomicBool::new(false),
        }))
    }
}

struct VirtualClient {
    bus: Arc<VirtualBus>,
    scope: Option<String>,
    open: AtomicBool,
}

impl VirtualClient {
    fn register(&self, visitor: &VisitorConfig) -> Result<String, AdapterError> {
        visitor
            .config_data
            .get("register")
            .and_then(Value::as_str)
            .map(|name| scoped(self.scope.as_deref(), name))
            .ok_or_else(|| AdapterError::InvalidConfig("visitor has no register".to_string()))
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::Stopped)
        }
    }
}

#[async_trait]
impl ProtocolClient for VirtualClient {
    async fn init(&self) -> Result<(), AdapterError> {
        if self.bus.faults.lock().init {
            return Err(AdapterError::Device("init refused".to_string()));
        }
        if !self.open.swap(true, Ordering::SeqCst) {
            self.bus.open_handles.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn read(&self, visitor: &VisitorConfig) -> Result<Vec<u8>, AdapterError> {
        self.ensure_open()?;
        let register = self.register(visitor)?;

        let (fail, delay) = {
            let faults = self.bus.faults.lock();
            (faults.read, faults.read_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(AdapterError::Device(format!("read of {register} failed")));
        }

        let value = self
            .bus
            .get(&register)
            .or_else(|| visitor.config_data.get("default").map(value_text))
            .ok_or_else(|| AdapterError::Device(format!("register {register} is empty")))?;
        self.bus.reads.fetch_add(1, Ordering::SeqCst);
        Ok(value.into_bytes())
    }

    async fn write(
        &self,
        visitor: &VisitorConfig,
        method: &str,
        property: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let register = self.register(visitor)?;
        if self.bus.faults.lock().write {
            return Err(AdapterError::Device(format!("write of {register} failed")));
        }

        tracing::trace!(%register, %method, %property, %value, "Virtual write");
        self.bus.writes.fetch_add(1, Ordering::SeqCst);
        if !self.bus.pinned.lock().contains_key(&register) {
            self.bus.set(register, value);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.bus.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn health(&self) -> HealthState {
        if !self.open.load(Ordering::SeqCst) {
            return HealthState::Unknown;
        }
        self.bus.faults.lock().health
    }
}

impl Drop for VirtualClient {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.bus.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
        self.bus.allocated.fetch_sub(1, Ordering::SeqCst);
    }
}

fn scoped(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) => format!("{scope}/{name}"),
        None => name.to_string(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn visitor(register: &str) -> VisitorConfig {
        VisitorConfig::new("virtual", json!({ "register": register }))
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let driver = VirtualDriver::new();
        let client = driver
            .new_client(&ProtocolConfig::new("virtual", json!({})))
            .unwrap();
        client.init().await.unwrap();

        client
            .write(&visitor("temp"), "SetProperty", "temp", "30")
            .await
            .unwrap();
        assert_eq!(client.read(&visitor("temp")).await.unwrap(), b"30");
        assert_eq!(driver.bus().writes(), 1);
    }

    #[tokio::test]
    async fn registers_are_seeded_and_scoped() {
        let driver = VirtualDriver::new();
        let config = ProtocolConfig::new(
            "virtual",
            json!({ "scope": "dev1", "registers": { "level": 3, "name": "tank" } }),
        );
        let client = driver.new_client(&config).unwrap();
        client.init().await.unwrap();

        assert_eq!(driver.bus().get("dev1/level").as_deref(), Some("3"));
        assert_eq!(client.read(&visitor("name")).await.unwrap(), b"tank");
    }

    #[tokio::test]
    async fn missing_register_uses_visitor_default() {
        let driver = VirtualDriver::new();
        let client = driver
            .new_client(&ProtocolConfig::new("virtual", json!({})))
            .unwrap();
        client.init().await.unwrap();

        let with_default = VisitorConfig::new("virtual", json!({ "register": "x", "default": 0 }));
        assert_eq!(client.read(&with_default).await.unwrap(), b"0");
        assert!(client.read(&visitor("y")).await.is_err());
    }

    #[tokio::test]
    async fn pinned_register_ignores_writes() {
        let driver = VirtualDriver::new();
        driver.bus().pin("temp", "25");
        let client = driver
            .new_client(&ProtocolConfig::new("virtual", json!({})))
            .unwrap();
        client.init().await.unwrap();

        client
            .write(&visitor("temp"), "SetProperty", "temp", "30")
            .await
            .unwrap();
        assert_eq!(driver.bus().get("temp").as_deref(), Some("25"));
    }

    #[tokio::test]
    async fn handles_are_accounted() {
        let driver = VirtualDriver::new();
        let client = driver
            .new_client(&ProtocolConfig::new("virtual", json!({})))
            .unwrap();
        assert_eq!(driver.bus().allocated_clients(), 1);
        assert_eq!(driver.bus().open_handles(), 0);

        client.init().await.unwrap();
        client.init().await.unwrap();
        assert_eq!(driver.bus().open_handles(), 1);

        client.stop().await.unwrap();
        assert_eq!(driver.bus().open_handles(), 0);
        assert!(matches!(
            client.read(&visitor("temp")).await,
            Err(AdapterError::Stopped)
        ));

        client.init().await.unwrap();
        drop(client);
        assert_eq!(driver.bus().open_handles(), 0);
        assert_eq!(driver.bus().allocated_clients(), 0);
    }

    #[tokio::test]
    async fn injected_faults_surface() {
        let driver = VirtualDriver::new();
        let client = driver
            .new_client(&ProtocolConfig::new("virtual", json!({})))
            .unwrap();

        driver.bus().fail_init(true);
        assert!(client.init().await.is_err());
        driver.bus().fail_init(false);
        client.init().await.unwrap();

        driver.bus().set_health(HealthState::Unhealthy);
        assert_eq!(client.health().await, HealthState::Unhealthy);

        driver.bus().fail_writes(true);
        assert!(
            client
                .write(&visitor("a"), "SetProperty", "a", "1")
                .await
                .is_err()
        );
    }

    #[test]
    fn non_object_registers_are_rejected() {
        let driver = VirtualDriver::new();
        let config = ProtocolConfig::new("virtual", json!({ "registers": [1, 2] }));
        assert!(matches!(
            driver.new_client(&config),
            Err(AdapterError::InvalidConfig(_))
        ));
    }
}
