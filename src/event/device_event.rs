// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use crate::device::DeviceStatus;
use crate::error::ValidationError;
use crate::model::{ResourceId, Twin};

/// Events emitted by devices and the device manager.
///
/// The mapper's reporter forwards [`StatusChanged`](Self::StatusChanged) and
/// [`TwinsReported`](Self::TwinsReported) to the edge core; other
/// subscribers can use them for monitoring.
///
/// # Examples
///
/// ```
/// use edge_mapper::device::DeviceStatus;
/// use edge_mapper::event::DeviceEvent;
/// use edge_mapper::model::ResourceId;
///
/// let device_id = ResourceId::new("default", "dev1");
///
/// let added = DeviceEvent::device_added(device_id.clone());
/// assert!(added.is_lifecycle());
///
/// let online = DeviceEvent::status_changed(
///     device_id.clone(),
///     DeviceStatus::Offline,
///     DeviceStatus::Online,
/// );
/// assert_eq!(online.device_id(), &device_id);
/// ```
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device was added to the manager.
    DeviceAdded {
        /// The added device.
        device_id: ResourceId,
    },

    /// A device was removed from the manager.
    DeviceRemoved {
        /// The removed device.
        device_id: ResourceId,
    },

    /// A device changed lifecycle state.
    StatusChanged {
        /// The device.
        device_id: ResourceId,
        /// State before the transition.
        previous: DeviceStatus,
        /// State after the transition.
        current: DeviceStatus,
    },

    /// Reported values changed during a reconciliation.
    ///
    /// Only twins whose property is reported to the cloud are included.
    TwinsReported {
        /// The device.
        device_id: ResourceId,
        /// Snapshot of the changed twins.
        twins: Vec<Twin>,
    },

    /// A desired value failed validation and was not written.
    DesiredRejected {
        /// The device.
        device_id: ResourceId,
        /// Property whose desired value was rejected.
        property: String,
        /// Why it was rejected.
        reason: ValidationError,
    },
}

impl DeviceEvent {
    /// Returns the device this event is about.
    #[must_use]
    pub fn device_id(&self) -> &ResourceId {
        match self {
            Self::DeviceAdded { device_id }
            | Self::DeviceRemoved { device_id }
            | Self::StatusChanged { device_id, .. }
            | Self::TwinsReported { device_id, .. }
            | Self::DesiredRejected { device_id, .. } => device_id,
        }
    }

    /// Returns `true` for added/removed events.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::DeviceAdded { .. } | Self::DeviceRemoved { .. })
    }

    /// Creates a device added event.
    #[must_use]
    pub fn device_added(device_id: ResourceId) -> Self {
        Self::DeviceAdded { device_id }
    }

    /// Creates a device removed event.
    #[must_use]
    pub fn device_removed(device_id: ResourceId) -> Self {
        Self::DeviceRemoved { device_id }
    }

    /// Creates a status change event.
    #[must_use]
    pub fn status_changed(
        device_id: ResourceId,
        previous: DeviceStatus,
        current: DeviceStatus,
    ) -> Self {
        Self::StatusChanged {
            device_id,
            previous,
            current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_exposes_its_device() {
        let id = ResourceId::new("ns", "d");
        let events = [
            DeviceEvent::device_added(id.clone()),
            DeviceEvent::device_removed(id.clone()),
            DeviceEvent::status_changed(id.clone(), DeviceStatus::Unknown, DeviceStatus::Online),
            DeviceEvent::TwinsReported {
                device_id: id.clone(),
                twins: Vec::new(),
            },
            DeviceEvent::DesiredRejected {
                device_id: id.clone(),
                property: "p".to_string(),
                reason: ValidationError::NotWritable {
                    property: "p".to_string(),
                },
            },
        ];

        for event in &events {
            assert_eq!(event.device_id(), &id);
        }
        assert_eq!(events.iter().filter(|e| e.is_lifecycle()).count(), 2);
    }
}
