// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device lifecycle states.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a managed device.
///
/// ```text
/// Unknown ──► Offline ◄──► Online
///    │           │           │
///    └───────────┴─────┬─────┘
///                      ▼
///                    Freed
/// ```
///
/// A device that starts successfully may also go straight from `Unknown` to
/// `Online`. `Freed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceStatus {
    /// Registered, never started.
    #[default]
    Unknown,
    /// Not started, stopped, or failing.
    Offline,
    /// Worker running and last health check passed.
    Online,
    /// Released; cannot be started again.
    Freed,
}

impl DeviceStatus {
    /// Returns `true` if moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: DeviceStatus) -> bool {
        match (self, next) {
            (Self::Freed, _) => false,
            (_, Self::Freed) => true,
            (Self::Unknown | Self::Online, Self::Offline) => true,
            (Self::Unknown | Self::Offline, Self::Online) => true,
            _ => false,
        }
    }

    /// Returns the state string reported to the edge core.
    #[must_use]
    pub fn report_state(self) -> &'static str {
        match self {
            Self::Online => "ok",
            Self::Offline | Self::Freed => "offline",
            Self::Unknown => "unknown",
        }
    }

    /// Returns a lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Freed => "freed",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a device, observable through a watch channel.
#[derive(Debug)]
pub(crate) struct StatusCell {
    tx: watch::Sender<DeviceStatus>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(DeviceStatus::Unknown);
        Self { tx }
    }

    pub(crate) fn get(&self) -> DeviceStatus {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.tx.subscribe()
    }

    /// Moves to `next` if legal and different. Returns the previous state
    /// when a transition happened.
    pub(crate) fn transition(&self, next: DeviceStatus) -> Option<DeviceStatus> {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if *current == next || !current.can_transition_to(next) {
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_is_terminal() {
        for next in [
            DeviceStatus::Unknown,
            DeviceStatus::Offline,
            DeviceStatus::Online,
            DeviceStatus::Freed,
        ] {
            assert!(!DeviceStatus::Freed.can_transition_to(next));
        }
    }

    #[test]
    fn online_and_offline_alternate() {
        assert!(DeviceStatus::Offline.can_transition_to(DeviceStatus::Online));
        assert!(DeviceStatus::Online.can_transition_to(DeviceStatus::Offline));
        assert!(!DeviceStatus::Online.can_transition_to(DeviceStatus::Unknown));
    }

    #[test]
    fn cell_ignores_same_state() {
        let cell = StatusCell::new();
        let mut rx = cell.subscribe();

        assert_eq!(cell.transition(DeviceStatus::Offline), Some(DeviceStatus::Unknown));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        assert_eq!(cell.transition(DeviceStatus::Offline), None);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn cell_refuses_to_leave_freed() {
        let cell = StatusCell::new();
        cell.transition(DeviceStatus::Freed);

        assert_eq!(cell.transition(DeviceStatus::Online), None);
        assert_eq!(cell.get(), DeviceStatus::Freed);
    }

    #[test]
    fn report_state_strings() {
        assert_eq!(DeviceStatus::Online.report_state(), "ok");
        assert_eq!(DeviceStatus::Offline.report_state(), "offline");
        assert_eq!(DeviceStatus::Unknown.report_state(), "unknown");
    }
}
