// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A managed device: instance, adapter handle, status and worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{DeviceContext, DeviceStatus, status::StatusCell};
use crate::driver::{ProtocolClient, bounded};
use crate::error::{DeviceError, Result, ValidationError};
use crate::event::DeviceEvent;
use crate::model::{
    DeviceInstance, DeviceMethod, DeviceModel, ProtocolConfig, ResourceId, Twin, TwinValue,
};
use crate::twin::{CycleReport, TwinReconciler, validate};

/// Running worker of a device.
struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between a [`Device`] and its worker task.
struct DeviceInner {
    id: ResourceId,
    model: DeviceModel,
    instance: RwLock<DeviceInstance>,
    client: Arc<dyn ProtocolClient>,
    reconciler: TwinReconciler,
    status: StatusCell,
    /// Serializes reconciliation cycles with on-demand writes.
    cycle_lock: Mutex<()>,
    failures: AtomicU32,
    running: AtomicBool,
    token: parking_lot::Mutex<CancellationToken>,
    context: DeviceContext,
}

impl DeviceInner {
    fn set_status(&self, next: DeviceStatus) {
        if let Some(previous) = self.status.transition(next) {
            tracing::info!(device = %self.id, %previous, current = %next, "Device status changed");
            self.context
                .events
                .publish(DeviceEvent::status_changed(self.id.clone(), previous, next));
        }
    }

    fn current_token(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    async fn run_cycle(&self) -> CycleReport {
        let report = {
            let _cycle = self.cycle_lock.lock().await;
            let token = self.current_token();
            self.reconciler
                .run_cycle(&self.id, &self.instance, &token)
                .await
        };
        self.absorb(&report);
        report
    }

    /// Publishes the cycle's outcome and tracks consecutive failing cycles.
    fn absorb(&self, report: &CycleReport) {
        self.publish_reported(report.changed.clone());
        for (property, reason) in &report.rejected {
            self.context.events.publish(DeviceEvent::DesiredRejected {
                device_id: self.id.clone(),
                property: property.clone(),
                reason: reason.clone(),
            });
        }

        if report.cancelled {
            return;
        }
        if report.is_clean() {
            self.failures.store(0, Ordering::SeqCst);
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = self.context.settings.failure_threshold;
        if threshold > 0 && failures >= threshold && self.status.get() == DeviceStatus::Online {
            tracing::warn!(device = %self.id, failures, "Failure threshold crossed");
            self.set_status(DeviceStatus::Offline);
        }
    }

    fn publish_reported(&self, mut twins: Vec<Twin>) {
        {
            let instance = self.instance.read();
            twins.retain(|twin| {
                instance
                    .property(&twin.property_name)
                    .is_some_and(|p| p.report_to_cloud)
            });
        }
        if !twins.is_empty() {
            self.context.events.publish(DeviceEvent::TwinsReported {
                device_id: self.id.clone(),
                twins,
            });
        }
    }
}

/// One managed device.
///
/// Devices are shared as `Arc<Device>`: the manager, the sync server and the
/// HTTP API may all hold a handle while the device is removed. The adapter
/// handle is released when the last handle is dropped.
///
/// The worker runs one reconciliation cycle per
/// [`cycle_interval`](super::DeviceSettings::cycle_interval) while the device
/// is [`Online`](DeviceStatus::Online). It keeps running, idle, while the
/// device is offline so that a passing health check resumes it.
pub struct Device {
    inner: Arc<DeviceInner>,
    lifecycle: Mutex<Option<Worker>>,
}

impl Device {
    /// Creates a stopped device in the [`Unknown`](DeviceStatus::Unknown)
    /// state.
    #[must_use]
    pub fn new(
        model: DeviceModel,
        instance: DeviceInstance,
        client: Arc<dyn ProtocolClient>,
        context: DeviceContext,
    ) -> Self {
        let reconciler = TwinReconciler::new(
            Arc::clone(&client),
            context.sinks.clone(),
            context.settings.verify_policy,
            context.settings.adapter_timeout,
        );
        Self {
            inner: Arc::new(DeviceInner {
                id: instance.id.clone(),
                model,
                instance: RwLock::new(instance),
                client,
                reconciler,
                status: StatusCell::new(),
                cycle_lock: Mutex::new(()),
                failures: AtomicU32::new(0),
                running: AtomicBool::new(false),
                token: parking_lot::Mutex::new(CancellationToken::new()),
                context,
            }),
            lifecycle: Mutex::new(None),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the device identity.
    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.inner.id
    }

    /// Returns the model snapshot the device was built with.
    #[must_use]
    pub fn model(&self) -> &DeviceModel {
        &self.inner.model
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        self.inner.status.get()
    }

    /// Watches status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<DeviceStatus> {
        self.inner.status.subscribe()
    }

    /// Returns `true` while the worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Returns the number of consecutive cycles with adapter failures.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Returns a copy of the device instance.
    #[must_use]
    pub fn instance(&self) -> DeviceInstance {
        self.inner.instance.read().clone()
    }

    /// Returns the protocol configuration.
    #[must_use]
    pub fn protocol(&self) -> ProtocolConfig {
        self.inner.instance.read().protocol.clone()
    }

    /// Returns copies of all twins.
    #[must_use]
    pub fn twins(&self) -> Vec<Twin> {
        self.inner.instance.read().twins.clone()
    }

    /// Returns a copy of one twin.
    #[must_use]
    pub fn twin(&self, property: &str) -> Option<Twin> {
        self.inner.instance.read().twin(property).cloned()
    }

    /// Returns the device methods.
    #[must_use]
    pub fn methods(&self) -> Vec<DeviceMethod> {
        self.inner.instance.read().methods.clone()
    }

    // =========================================================================
    // Twins
    // =========================================================================

    /// Sets the desired value of a property. The next cycle writes it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownProperty`] if the device has no
    /// twin for `property`.
    pub fn set_desired(&self, property: &str, value: impl Into<String>) -> Result<()> {
        let mut instance = self.inner.instance.write();
        let value_type = instance
            .property(property)
            .map(|p| p.data_type.as_str().to_string())
            .unwrap_or_default();
        let twin = instance
            .twin_mut(property)
            .ok_or_else(|| ValidationError::UnknownProperty {
                property: property.to_string(),
            })?;
        twin.observed_desired = TwinValue::now(value, value_type);
        Ok(())
    }

    /// Runs one reconciliation cycle now, serialized with the worker.
    pub async fn reconcile_once(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    /// Sets a desired value and writes it immediately through `method`.
    ///
    /// A value that fails validation is rejected before it becomes the
    /// desired value.
    ///
    /// # Errors
    ///
    /// Returns validation errors without touching the device, and adapter
    /// errors from the write or its verification.
    pub async fn write_property(&self, method: &str, property: &str, value: &str) -> Result<Twin> {
        let result = match self.check_write(property, value) {
            Ok(()) => self.write_desired(method, property, value).await,
            Err(e) => Err(e.into()),
        };

        if let Err(crate::Error::Validation(reason)) = &result {
            self.inner.context.events.publish(DeviceEvent::DesiredRejected {
                device_id: self.inner.id.clone(),
                property: property.to_string(),
                reason: reason.clone(),
            });
        }
        result
    }

    fn check_write(&self, property: &str, value: &str) -> std::result::Result<(), ValidationError> {
        let instance = self.inner.instance.read();
        let Some(target) = instance.property(property) else {
            return Err(ValidationError::UnknownProperty {
                property: property.to_string(),
            });
        };
        if !target.is_writable() {
            return Err(ValidationError::NotWritable {
                property: property.to_string(),
            });
        }
        validate(target, value)
    }

    async fn write_desired(&self, method: &str, property: &str, value: &str) -> Result<Twin> {
        self.set_desired(property, value)?;

        let _cycle = self.inner.cycle_lock.lock().await;
        let before = self.twin(property).map(|twin| twin.revision());
        let token = self.inner.current_token();
        let result = self
            .inner
            .reconciler
            .reconcile_property(&self.inner.id, &self.inner.instance, property, method, &token)
            .await;
        if let Ok(twin) = &result
            && Some(twin.revision()) != before
        {
            self.inner.publish_reported(vec![twin.clone()]);
        }
        result
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initializes the adapter and starts the worker.
    ///
    /// Twins are rebuilt from properties first if the set is empty or a twin
    /// is unbound. Starting a running device is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Freed`] for a freed device and
    /// [`DeviceError::Init`] if the adapter fails to initialize; the device
    /// is then [`Offline`](DeviceStatus::Offline).
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.lifecycle.lock().await;
        let id = &self.inner.id;

        if self.status() == DeviceStatus::Freed {
            return Err(DeviceError::Freed(id.clone()).into());
        }
        if let Some(running) = worker.as_ref()
            && !running.handle.is_finished()
        {
            tracing::debug!(device = %id, "Device already running");
            return Ok(());
        }

        if self.inner.instance.write().ensure_twins() {
            tracing::info!(device = %id, "Rebuilt twins from properties");
        }

        let token = CancellationToken::new();
        *self.inner.token.lock() = token.clone();

        let settings = self.inner.context.settings;
        if let Err(source) = bounded(settings.adapter_timeout, &token, self.inner.client.init()).await
        {
            tracing::warn!(device = %id, error = %source, "Adapter initialization failed");
            self.inner.set_status(DeviceStatus::Offline);
            return Err(DeviceError::Init {
                id: id.clone(),
                source,
            }
            .into());
        }

        self.inner.failures.store(0, Ordering::SeqCst);
        self.inner.set_status(DeviceStatus::Online);
        let handle = tokio::spawn(work(Arc::clone(&self.inner), token.clone()));
        *worker = Some(Worker { token, handle });
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::debug!(device = %id, "Device worker started");
        Ok(())
    }

    /// Stops the worker and the adapter. Idempotent.
    ///
    /// The worker is cancelled, the adapter is told to abort, and the worker
    /// gets the grace period to finish before it is aborted.
    pub async fn stop(&self) {
        let mut worker = self.lifecycle.lock().await;
        self.stop_worker(&mut worker).await;
    }

    async fn stop_worker(&self, worker: &mut Option<Worker>) {
        let Some(Worker { token, handle }) = worker.take() else {
            return;
        };
        let id = &self.inner.id;
        let settings = self.inner.context.settings;

        self.inner.running.store(false, Ordering::SeqCst);
        token.cancel();

        match tokio::time::timeout(settings.adapter_timeout, self.inner.client.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(device = %id, error = %e, "Adapter stop failed"),
            Err(_) => tracing::warn!(device = %id, "Adapter stop timed out"),
        }

        let abort = handle.abort_handle();
        match tokio::time::timeout(settings.grace_period, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(device = %id, error = %e, "Device worker panicked"),
            Err(_) => {
                abort.abort();
                tracing::warn!(
                    device = %id,
                    grace_ms = settings.grace_period.as_millis(),
                    "Device worker did not stop in time, forced termination"
                );
            }
        }

        self.inner.set_status(DeviceStatus::Offline);
        tracing::debug!(device = %id, "Device stopped");
    }

    /// Queries adapter health and updates the status of a running device.
    ///
    /// Stopped devices and devices in the middle of a start or stop are left
    /// untouched. Returns the resulting status.
    pub async fn health_check(&self) -> DeviceStatus {
        let Ok(worker) = self.lifecycle.try_lock() else {
            return self.status();
        };
        if worker.is_none() {
            return self.status();
        }

        let timeout = self.inner.context.settings.adapter_timeout;
        let healthy = tokio::time::timeout(timeout, self.inner.client.health())
            .await
            .is_ok_and(crate::driver::HealthState::is_healthy);

        if healthy {
            self.inner.failures.store(0, Ordering::SeqCst);
            self.inner.set_status(DeviceStatus::Online);
        } else {
            if self.status() == DeviceStatus::Online {
                tracing::warn!(device = %self.inner.id, "Health check failed");
            }
            self.inner.set_status(DeviceStatus::Offline);
        }
        drop(worker);
        self.status()
    }

    /// Stops the device and marks it [`Freed`](DeviceStatus::Freed).
    ///
    /// Runs under the lifecycle lock, so a concurrent [`start`](Self::start)
    /// either finishes first and is stopped here, or sees the device freed.
    pub async fn free(&self) {
        let mut worker = self.lifecycle.lock().await;
        self.stop_worker(&mut worker).await;
        self.inner.token.lock().cancel();
        self.inner.set_status(DeviceStatus::Freed);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(worker) = self.lifecycle.get_mut().take() {
            worker.token.cancel();
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn work(inner: Arc<DeviceInner>, token: CancellationToken) {
    let period = inner
        .context
        .settings
        .cycle_interval
        .max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        if inner.status.get() != DeviceStatus::Online {
            continue;
        }
        let report = inner.run_cycle().await;
        if report.cancelled {
            break;
        }
        if !report.changed.is_empty() || !report.is_clean() {
            tracing::debug!(
                device = %inner.id,
                changed = report.changed.len(),
                failures = report.adapter_failures,
                unverified = report.unverified,
                "Cycle finished"
            );
        }
    }

    tracing::debug!(device = %inner.id, "Device worker exited");
}
