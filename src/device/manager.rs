// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of devices and device models.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;

use super::{Device, DeviceContext, DeviceStatus};
use crate::driver::DriverRegistry;
use crate::error::{Error, Result, ValidationError};
use crate::event::DeviceEvent;
use crate::model::{DeviceInstance, DeviceModel, ResourceId, Twin};

const INITIAL_CAPACITY: usize = 10;

/// Current reported value of a twin, as served by the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwinResult {
    /// Reported value, empty if never read.
    pub value: String,
    /// Declared type of the property.
    pub data_type: String,
    /// When the value was reported, in Unix milliseconds.
    pub timestamp_ms: i64,
}

/// One parameter of a device method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodParameter {
    /// Property written by the method.
    pub property_name: String,
    /// Declared type of the property.
    pub value_type: String,
}

/// A device method with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    /// Method name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Properties the method writes.
    pub parameters: Vec<MethodParameter>,
}

/// Registry of the mapper's devices and models.
///
/// Devices are kept in insertion order behind a single lock and looked up
/// linearly. Lookups return `Arc<Device>` handles and never wait on device
/// I/O. The registry lock is only held to insert, remove or clone handles;
/// starting, stopping and freeing devices always happens outside of it.
///
/// # Examples
///
/// ```
/// use edge_mapper::device::{DeviceContext, DeviceManager, DeviceSettings};
/// use edge_mapper::driver::DriverRegistry;
/// use edge_mapper::model::ResourceId;
///
/// let manager = DeviceManager::new(
///     DriverRegistry::with_builtin(),
///     DeviceContext::new(DeviceSettings::default()),
/// );
///
/// assert!(manager.is_empty());
/// assert!(manager.get(&ResourceId::new("default", "dev1")).is_none());
/// ```
#[derive(Debug)]
pub struct DeviceManager {
    devices: Mutex<Vec<Arc<Device>>>,
    models: RwLock<HashMap<ResourceId, DeviceModel>>,
    drivers: DriverRegistry,
    context: DeviceContext,
    shut_down: AtomicBool,
}

impl DeviceManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(drivers: DriverRegistry, context: DeviceContext) -> Self {
        Self {
            devices: Mutex::new(Vec::with_capacity(INITIAL_CAPACITY)),
            models: RwLock::new(HashMap::new()),
            drivers,
            context,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the services shared by all devices.
    #[must_use]
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Returns the driver registry.
    #[must_use]
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Subscribes to device events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.context.events.subscribe()
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Creates a stopped device for `instance`, with a client from the
    /// driver registry.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnsupportedProtocol`](crate::error::DeviceError::UnsupportedProtocol)
    /// if no driver handles the instance's protocol, or the driver's error.
    pub fn build_device(&self, model: DeviceModel, instance: DeviceInstance) -> Result<Device> {
        let client = self.drivers.new_client(&instance.protocol)?;
        for property in &instance.properties {
            if let Some(method) = &property.db_method
                && !self.context.sinks.has_route(method)
            {
                tracing::warn!(
                    device = %instance.id,
                    property = %property.name,
                    db_method = %method,
                    "Database method not configured, values go to global sinks only"
                );
            }
        }
        Ok(Device::new(model, instance, client, self.context.clone()))
    }

    /// Adds a device without starting it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateDevice`] if a device with the same id
    /// exists, or [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn add(&self, device: Device) -> Result<Arc<Device>> {
        let id = device.id().clone();
        let device = Arc::new(device);
        {
            let mut devices = self.devices.lock();
            if self.is_shut_down() {
                return Err(Error::ShutDown);
            }
            if devices.iter().any(|d| d.id() == &id) {
                return Err(Error::DuplicateDevice(id));
            }
            devices.push(Arc::clone(&device));
        }

        tracing::info!(device = %id, "Device added");
        self.context.events.publish(DeviceEvent::device_added(id));
        Ok(device)
    }

    /// Adds or replaces a device and starts it.
    ///
    /// A replaced device is freed after it left the registry. A start failure
    /// is logged and leaves the new device registered and offline.
    ///
    /// # Errors
    ///
    /// Returns an error if no client can be created for the instance, or
    /// [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn upsert(&self, model: DeviceModel, instance: DeviceInstance) -> Result<Arc<Device>> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let device = Arc::new(self.build_device(model, instance)?);
        let id = device.id().clone();

        let previous = {
            let mut devices = self.devices.lock();
            // Checked under the lock so shutdown either sees this device or
            // this call sees the flag.
            if self.is_shut_down() {
                return Err(Error::ShutDown);
            }
            match devices.iter().position(|d| d.id() == &id) {
                Some(index) => Some(std::mem::replace(&mut devices[index], Arc::clone(&device))),
                None => {
                    devices.push(Arc::clone(&device));
                    None
                }
            }
        };
        match previous {
            Some(previous) => {
                tracing::info!(device = %id, "Replacing device");
                previous.free().await;
            }
            None => {
                tracing::info!(device = %id, "Device added");
                self.context.events.publish(DeviceEvent::device_added(id.clone()));
            }
        }

        if let Err(e) = device.start().await {
            tracing::warn!(device = %id, error = %e, "Device registered but not started");
        }
        Ok(device)
    }

    /// Removes and frees a device.
    ///
    /// Handles held elsewhere stay valid; the adapter handle is released
    /// when the last one is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if no device matches `id`.
    pub async fn remove(&self, id: &ResourceId) -> Result<()> {
        let removed = {
            let mut devices = self.devices.lock();
            Self::position(&devices, id).map(|index| devices.remove(index))
        };
        let device = removed.ok_or_else(|| Error::DeviceNotFound(id.clone()))?;

        device.free().await;
        tracing::info!(device = %device.id(), "Device removed");
        self.context
            .events
            .publish(DeviceEvent::device_removed(device.id().clone()));
        Ok(())
    }

    /// Returns a device.
    ///
    /// An id without namespace matches a device by name in any namespace.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<Arc<Device>> {
        let devices = self.devices.lock();
        Self::position(&devices, id).map(|index| Arc::clone(&devices[index]))
    }

    /// Returns `true` if a device matches `id`.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        Self::position(&self.devices.lock(), id).is_some()
    }

    fn position(devices: &[Arc<Device>], id: &ResourceId) -> Option<usize> {
        devices.iter().position(|d| id.matches(d.id()))
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    /// Returns `true` if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Returns the ids of all devices, in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<ResourceId> {
        self.devices.lock().iter().map(|d| d.id().clone()).collect()
    }

    /// Returns handles to all devices, in insertion order.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.lock().clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts every device concurrently.
    ///
    /// Returns the number of devices started successfully.
    pub async fn start_all(&self) -> usize {
        if self.shut_down.load(Ordering::SeqCst) {
            return 0;
        }
        let devices = self.devices();
        let total = devices.len();

        let results = join_all(devices.iter().map(|device| async move {
            let result = device.start().await;
            if let Err(e) = &result {
                tracing::warn!(device = %device.id(), error = %e, "Device failed to start");
            }
            result.is_ok()
        }))
        .await;

        let started = results.into_iter().filter(|ok| *ok).count();
        tracing::info!(started, failed = total - started, "Devices started");
        started
    }

    /// Stops every device concurrently. Idempotent.
    pub async fn stop_all(&self) {
        let devices = self.devices();
        join_all(devices.iter().map(|device| device.stop())).await;
        tracing::debug!(count = devices.len(), "Devices stopped");
    }

    /// Checks the health of every running device.
    pub async fn health_check_all(&self) {
        let devices = self.devices();
        join_all(devices.iter().map(|device| device.health_check())).await;
    }

    /// Frees every device and clears the registry. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let devices = std::mem::take(&mut *self.devices.lock());
        join_all(devices.iter().map(|device| device.free())).await;
        tracing::info!(count = devices.len(), "Device manager shut down");
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Replaces the model index.
    pub fn load_models(&self, models: impl IntoIterator<Item = DeviceModel>) {
        let mut index = self.models.write();
        index.clear();
        index.extend(models.into_iter().map(|m| (m.id.clone(), m)));
        tracing::debug!(count = index.len(), "Models loaded");
    }

    /// Adds or replaces a model. Returns `true` if it was new.
    pub fn upsert_model(&self, model: DeviceModel) -> bool {
        self.models.write().insert(model.id.clone(), model).is_none()
    }

    /// Returns a model.
    #[must_use]
    pub fn model(&self, id: &ResourceId) -> Option<DeviceModel> {
        self.models.read().get(id).cloned()
    }

    /// Removes a model. Devices built from it keep their snapshot.
    pub fn remove_model(&self, id: &ResourceId) -> Option<DeviceModel> {
        self.models.write().remove(id)
    }

    /// Returns the number of models.
    #[must_use]
    pub fn model_count(&self) -> usize {
        self.models.read().len()
    }

    // =========================================================================
    // Panel
    // =========================================================================

    fn require(&self, id: &ResourceId) -> Result<Arc<Device>> {
        self.get(id).ok_or_else(|| Error::DeviceNotFound(id.clone()))
    }

    /// Returns the reported value of a property without device I/O.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] or
    /// [`ValidationError::UnknownProperty`].
    pub fn twin_result(&self, id: &ResourceId, property: &str) -> Result<TwinResult> {
        let device = self.require(id)?;
        let instance = device.instance();
        let twin = instance
            .twin(property)
            .ok_or_else(|| ValidationError::UnknownProperty {
                property: property.to_string(),
            })?;
        let data_type = instance
            .property_of(twin)
            .map_or("string", |p| p.data_type.as_str())
            .to_string();

        Ok(TwinResult {
            value: twin.reported.value.clone(),
            data_type,
            timestamp_ms: twin.reported.metadata.timestamp_ms,
        })
    }

    /// Sets a desired value and writes it right away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`], validation errors, or the adapter
    /// error of the write.
    pub async fn write_device(
        &self,
        id: &ResourceId,
        method: &str,
        property: &str,
        value: &str,
    ) -> Result<Twin> {
        let device = self.require(id)?;
        let twin = device.write_property(method, property, value).await?;
        tracing::info!(device = %id, method, property, value, "Property written");
        Ok(twin)
    }

    /// Returns the methods of a device with their parameter types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`].
    pub fn device_methods(&self, id: &ResourceId) -> Result<Vec<MethodInfo>> {
        let instance = self.require(id)?.instance();
        Ok(instance
            .methods
            .iter()
            .map(|method| MethodInfo {
                name: method.name.clone(),
                description: method.description.clone(),
                parameters: method
                    .property_names
                    .iter()
                    .map(|name| MethodParameter {
                        property_name: name.clone(),
                        value_type: instance
                            .property(name)
                            .map_or("string", |p| p.data_type.as_str())
                            .to_string(),
                    })
                    .collect(),
            })
            .collect())
    }

    /// Returns the model a device was built with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`].
    pub fn device_model(&self, id: &ResourceId) -> Result<DeviceModel> {
        Ok(self.require(id)?.model().clone())
    }

    /// Returns the number of devices in each status.
    #[must_use]
    pub fn status_counts(&self) -> HashMap<DeviceStatus, usize> {
        let mut counts = HashMap::new();
        for device in self.devices() {
            *counts.entry(device.status()).or_insert(0) += 1;
        }
        counts
    }
}
