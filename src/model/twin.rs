// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Desired/reported value pairs for device properties.

use chrono::Utc;

/// Metadata attached to a twin value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TwinMetadata {
    /// Milliseconds since the Unix epoch when the value was set.
    pub timestamp_ms: i64,
    /// Declared type name of the value.
    pub value_type: String,
}

/// A twin value with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TwinValue {
    /// The value as text.
    pub value: String,
    /// When and as what the value was set.
    pub metadata: TwinMetadata,
}

impl TwinValue {
    /// Creates a value stamped with the current time.
    #[must_use]
    pub fn now(value: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            metadata: TwinMetadata {
                timestamp_ms: Utc::now().timestamp_millis(),
                value_type: value_type.into(),
            },
        }
    }

    /// Returns `true` if no value is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Per-property twin: what the cloud wants and what the device confirmed.
///
/// The twin refers to its property by position in the owning
/// [`DeviceInstance`](super::DeviceInstance)'s property list. The index is
/// `None` while unbound and is repaired by
/// [`DeviceInstance::rebind_twins`](super::DeviceInstance::rebind_twins).
///
/// Every change of `reported` bumps a revision counter so that a writer
/// holding an older snapshot cannot overwrite a newer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Twin {
    /// Name of the property this twin mirrors.
    pub property_name: String,
    /// Index into the owning instance's properties.
    pub property: Option<usize>,
    /// Value requested by the cloud.
    pub observed_desired: TwinValue,
    /// Value confirmed by the device.
    pub reported: TwinValue,
    revision: u64,
}

impl Twin {
    /// Creates an unbound twin with empty values.
    #[must_use]
    pub fn new(property_name: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            property: None,
            observed_desired: TwinValue::default(),
            reported: TwinValue::default(),
            revision: 0,
        }
    }

    /// Sets the desired value.
    #[must_use]
    pub fn with_desired(mut self, desired: TwinValue) -> Self {
        self.observed_desired = desired;
        self
    }

    /// Sets the reported value.
    #[must_use]
    pub fn with_reported(mut self, reported: TwinValue) -> Self {
        self.reported = reported;
        self
    }

    /// Returns the revision of the reported value.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns `true` if the desired value is set and differs byte-for-byte
    /// from the reported value.
    #[must_use]
    pub fn diverges(&self) -> bool {
        !self.observed_desired.is_empty() && self.observed_desired.value != self.reported.value
    }

    /// Replaces the reported value if it is still at `expected_revision`.
    ///
    /// Returns `false`, leaving the twin untouched, when another writer got
    /// there first.
    pub(crate) fn commit_reported(&mut self, expected_revision: u64, reported: TwinValue) -> bool {
        if self.revision != expected_revision {
            return false;
        }
        self.reported = reported;
        self.revision += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_desired_never_diverges() {
        let twin = Twin::new("temp").with_reported(TwinValue::now("20", "int"));
        assert!(!twin.diverges());
    }

    #[test]
    fn divergence_is_byte_exact() {
        let twin = Twin::new("temp")
            .with_desired(TwinValue::now("30", "int"))
            .with_reported(TwinValue::now("30.0", "int"));
        assert!(twin.diverges());
    }

    #[test]
    fn stale_commit_is_refused() {
        let mut twin = Twin::new("temp");
        let seen = twin.revision();

        assert!(twin.commit_reported(seen, TwinValue::now("1", "int")));
        assert!(!twin.commit_reported(seen, TwinValue::now("2", "int")));
        assert_eq!(twin.reported.value, "1");
        assert_eq!(twin.revision(), seen + 1);
    }
}
