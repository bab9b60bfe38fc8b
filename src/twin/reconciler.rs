// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device reconciliation cycle.
//!
//! For every twin of a device, one cycle either
//!
//! - writes the desired value, when the property is writable and desired
//!   differs from reported, then verifies it with a read, or
//! - samples the property, when its collect cycle has elapsed.
//!
//! A desired value that fails validation, or whose write fails, does not
//! stop sampling: the twin falls back to a plain read in the same cycle.
//! A rejected desired value is reported once and skipped until it changes.
//!
//! Twin state is snapshotted under the device's lock, adapter I/O runs
//! without it, and results are committed back only if the reported value has
//! not moved in the meantime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{VerifyPolicy, normalize_reading, to_wire, validate};
use crate::driver::{ProtocolClient, bounded};
use crate::error::{AdapterError, Error, ValidationError};
use crate::model::{DeviceInstance, DeviceProperty, ResourceId, Twin, TwinValue};
use crate::sink::{SinkSet, TelemetryRecord};

/// Device method used for cycle-driven writes.
pub const SET_PROPERTY: &str = "SetProperty";

/// Outcome of one reconciliation cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Twins whose reported value changed, as committed.
    pub changed: Vec<Twin>,
    /// Desired values rejected by validation, by property.
    pub rejected: Vec<(String, ValidationError)>,
    /// Number of divergent twins a write was attempted for, including
    /// rejected ones.
    pub writes: usize,
    /// Number of adapter calls that failed or timed out.
    pub adapter_failures: usize,
    /// Writes the device accepted but whose verification read failed, so
    /// the reported value was left as it was.
    pub unverified: usize,
    /// The cycle stopped early because the device is stopping.
    pub cancelled: bool,
}

impl CycleReport {
    /// Returns `true` if no adapter call failed, verification reads
    /// included.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.adapter_failures == 0 && self.unverified == 0
    }
}

/// Twin state copied out of the device lock for one twin.
/// Result of a write attempt that reached the device.
#[derive(Debug)]
enum WriteOutcome {
    /// The verified value, committed if it changed anything.
    Verified(Option<Twin>),
    /// The write succeeded but reading it back failed.
    Unverified(AdapterError),
}

#[derive(Debug, Clone)]
struct Slot {
    index: usize,
    property: DeviceProperty,
    desired: String,
    reported: String,
    revision: u64,
}

impl Slot {
    fn diverges(&self) -> bool {
        !self.desired.is_empty() && self.desired != self.reported
    }
}

/// Runs reconciliation cycles for one device.
pub struct TwinReconciler {
    client: Arc<dyn ProtocolClient>,
    sinks: SinkSet,
    verify_policy: VerifyPolicy,
    adapter_timeout: Duration,
    last_sampled: Mutex<HashMap<String, Instant>>,
    rejected: Mutex<HashMap<String, String>>,
}

impl TwinReconciler {
    /// Creates a reconciler driving `client`.
    #[must_use]
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        sinks: SinkSet,
        verify_policy: VerifyPolicy,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            client,
            sinks,
            verify_policy,
            adapter_timeout,
            last_sampled: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one cycle over every twin of the device.
    ///
    /// Adapter failures are logged and counted; they never stop the cycle.
    /// Cancellation stops it before the next twin.
    pub async fn run_cycle(
        &self,
        device: &ResourceId,
        instance: &RwLock<DeviceInstance>,
        token: &CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        for slot in snapshot(instance) {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let result = if slot.property.is_writable() && slot.diverges() {
                self.reconcile_slot(device, instance, &slot, token, &mut report)
                    .await
            } else {
                self.forget_rejection(&slot);
                self.sample(device, instance, &slot, token).await
            };

            match result {
                Ok(Some(twin)) => report.changed.push(twin),
                Ok(None) => {}
                Err(Error::Adapter(AdapterError::Cancelled)) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        %device,
                        property = %slot.property.name,
                        error = %e,
                        "Adapter call failed"
                    );
                    report.adapter_failures += 1;
                }
            }
        }

        report
    }

    /// Writes the desired value of one property right away.
    ///
    /// Returns the twin after the attempt. A twin whose desired value
    /// already matches reported is returned untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`]s for unknown, read-only or invalid
    /// values, and adapter errors from the write or a strict verification.
    pub async fn reconcile_property(
        &self,
        device: &ResourceId,
        instance: &RwLock<DeviceInstance>,
        property_name: &str,
        method: &str,
        token: &CancellationToken,
    ) -> crate::Result<Twin> {
        let slot = snapshot(instance)
            .into_iter()
            .find(|slot| slot.property.name == property_name)
            .ok_or_else(|| ValidationError::UnknownProperty {
                property: property_name.to_string(),
            })?;

        if !slot.property.is_writable() {
            return Err(ValidationError::NotWritable {
                property: property_name.to_string(),
            }
            .into());
        }

        if slot.diverges() {
            match self
                .write_desired(device, instance, &slot, method, token)
                .await?
            {
                WriteOutcome::Verified(Some(twin)) => return Ok(twin),
                WriteOutcome::Verified(None) => {}
                WriteOutcome::Unverified(e) => {
                    tracing::warn!(%device, property = %property_name, error = %e, "Verification read failed, keeping reported value");
                    return Err(e.into());
                }
            }
        }

        instance
            .read()
            .twin(property_name)
            .cloned()
            .ok_or_else(|| {
                ValidationError::UnknownProperty {
                    property: property_name.to_string(),
                }
                .into()
            })
    }

    /// Handles one divergent writable twin inside a cycle.
    ///
    /// Rejected or failed writes fall back to sampling the property.
    async fn reconcile_slot(
        &self,
        device: &ResourceId,
        instance: &RwLock<DeviceInstance>,
        slot: &Slot,
        token: &CancellationToken,
        report: &mut CycleReport,
    ) -> crate::Result<Option<Twin>> {
        if self.is_rejected(slot) {
            return self.sample(device, instance, slot, token).await;
        }

        report.writes += 1;
        match self
            .write_desired(device, instance, slot, SET_PROPERTY, token)
            .await
        {
            Ok(WriteOutcome::Verified(twin)) => {
                self.forget_rejection(slot);
                Ok(twin)
            }
            Ok(WriteOutcome::Unverified(e)) => {
                tracing::warn!(
                    %device,
                    property = %slot.property.name,
                    written = %slot.desired,
                    error = %e,
                    "Write accepted but not verified, reported value unchanged"
                );
                report.unverified += 1;
                Ok(None)
            }
            Err(Error::Validation(reason)) => {
                tracing::warn!(
                    %device,
                    property = %slot.property.name,
                    desired = %slot.desired,
                    error = %reason,
                    "Desired value rejected"
                );
                self.rejected
                    .lock()
                    .insert(slot.property.name.clone(), slot.desired.clone());
                report.rejected.push((slot.property.name.clone(), reason));
                self.sample(device, instance, slot, token).await
            }
            Err(Error::Adapter(AdapterError::Cancelled)) => Err(AdapterError::Cancelled.into()),
            Err(e) => {
                tracing::warn!(
                    %device,
                    property = %slot.property.name,
                    error = %e,
                    "Write failed, sampling instead"
                );
                report.adapter_failures += 1;
                self.sample(device, instance, slot, token).await
            }
        }
    }

    async fn write_desired(
        &self,
        device: &ResourceId,
        instance: &RwLock<DeviceInstance>,
        slot: &Slot,
        method: &str,
        token: &CancellationToken,
    ) -> crate::Result<WriteOutcome> {
        let property = &slot.property;
        validate(property, &slot.desired)?;
        let wire = to_wire(&property.data_type, &slot.desired);

        tracing::debug!(%device, property = %property.name, value = %wire, %method, "Writing desired value");
        bounded(
            self.adapter_timeout,
            token,
            self.client
                .write(&property.visitor, method, &property.name, &wire),
        )
        .await?;
        self.mark_sampled(&property.name);

        let verified = match bounded(
            self.adapter_timeout,
            token,
            self.client.read(&property.visitor),
        )
        .await
        {
            Ok(raw) => normalize_reading(&property.data_type, &raw),
            Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled.into()),
            Err(e) => match self.verify_policy {
                VerifyPolicy::Strict => return Ok(WriteOutcome::Unverified(e)),
                VerifyPolicy::Optimistic => {
                    tracing::warn!(%device, property = %property.name, error = %e, "Verification read failed, reporting written value");
                    wire
                }
            },
        };

        if verified != slot.desired {
            tracing::debug!(
                %device,
                property = %property.name,
                desired = %slot.desired,
                verified = %verified,
                "Device reports a different value than written"
            );
        }

        Ok(WriteOutcome::Verified(
            self.commit(device, instance, slot, verified),
        ))
    }

    async fn sample(
        &self,
        device: &ResourceId,
        instance: &RwLock<DeviceInstance>,
        slot: &Slot,
        token: &CancellationToken,
    ) -> crate::Result<Option<Twin>> {
        let property = &slot.property;
        if !self.is_due(property) {
            return Ok(None);
        }

        let raw = bounded(
            self.adapter_timeout,
            token,
            self.client.read(&property.visitor),
        )
        .await?;
        self.mark_sampled(&property.name);

        let value = normalize_reading(&property.data_type, &raw);
        if value == slot.reported {
            return Ok(None);
        }
        Ok(self.commit(device, instance, slot, value))
    }

    /// Stores `value` as reported unless another writer moved the twin
    /// since `slot` was taken. Records committed changes to the sinks.
    fn commit(
        &self,
        device: &ResourceId,
        instance: &RwLock<DeviceInstance>,
        slot: &Slot,
        value: String,
    ) -> Option<Twin> {
        let committed = {
            let mut guard = instance.write();
            let twin = guard
                .twins
                .get_mut(slot.index)
                .filter(|twin| twin.property_name == slot.property.name)?;

            if twin.reported.value == value {
                return None;
            }
            let reported = TwinValue::now(value, slot.property.data_type.as_str());
            if !twin.commit_reported(slot.revision, reported) {
                tracing::debug!(%device, property = %slot.property.name, "Reported value moved during cycle, dropping stale result");
                return None;
            }
            twin.clone()
        };

        tracing::debug!(%device, property = %committed.property_name, value = %committed.reported.value, "Reported value updated");
        self.sinks.dispatch_to(
            TelemetryRecord::new(
                device,
                &committed.property_name,
                &committed.reported.value,
                committed.reported.metadata.timestamp_ms,
            )
            .with_data_type(slot.property.data_type.as_str()),
            slot.property.db_method.as_deref(),
        );
        Some(committed)
    }

    fn is_rejected(&self, slot: &Slot) -> bool {
        self.rejected.lock().get(&slot.property.name) == Some(&slot.desired)
    }

    fn forget_rejection(&self, slot: &Slot) {
        self.rejected.lock().remove(&slot.property.name);
    }

    fn is_due(&self, property: &DeviceProperty) -> bool {
        if property.collect_cycle.is_zero() {
            return true;
        }
        self.last_sampled
            .lock()
            .get(&property.name)
            .is_none_or(|last| last.elapsed() >= property.collect_cycle)
    }

    fn mark_sampled(&self, property: &str) {
        self.last_sampled
            .lock()
            .insert(property.to_string(), Instant::now());
    }
}

impl std::fmt::Debug for TwinReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwinReconciler")
            .field("verify_policy", &self.verify_policy)
            .field("adapter_timeout", &self.adapter_timeout)
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}

fn snapshot(instance: &RwLock<DeviceInstance>) -> Vec<Slot> {
    let guard = instance.read();
    guard
        .twins
        .iter()
        .enumerate()
        .filter_map(|(index, twin)| {
            let Some(property) = guard.property_of(twin) else {
                tracing::debug!(device = %guard.id, property = %twin.property_name, "Skipping unbound twin");
                return None;
            };
            Some(Slot {
                index,
                property: property.clone(),
                desired: twin.observed_desired.value.clone(),
                reported: twin.reported.value.clone(),
                revision: twin.revision(),
            })
        })
        .collect()
}
