// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime settings and shared services handed to every device.

use std::time::Duration;

use crate::event::EventBus;
use crate::sink::SinkSet;
use crate::twin::VerifyPolicy;

/// Timing and failure policy of device workers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use edge_mapper::device::DeviceSettings;
/// use edge_mapper::twin::VerifyPolicy;
///
/// let settings = DeviceSettings::default()
///     .with_cycle_interval(Duration::from_millis(500))
///     .with_failure_threshold(5)
///     .with_verify_policy(VerifyPolicy::Optimistic);
///
/// assert_eq!(settings.cycle_interval, Duration::from_millis(500));
/// assert_eq!(settings.adapter_timeout, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Delay between two reconciliation cycles.
    pub cycle_interval: Duration,
    /// Upper bound of every adapter call.
    pub adapter_timeout: Duration,
    /// How long a stopping worker may take before it is aborted.
    pub grace_period: Duration,
    /// Consecutive failing cycles before the device goes offline. Zero
    /// disables the threshold.
    pub failure_threshold: u32,
    /// What to report when a verification read fails.
    pub verify_policy: VerifyPolicy,
}

impl DeviceSettings {
    /// Default cycle interval.
    pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(5);
    /// Default adapter timeout.
    pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(3);
    /// Default grace period.
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
    /// Default failure threshold.
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    /// Sets the cycle interval.
    #[must_use]
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// Sets the adapter timeout.
    #[must_use]
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Sets the grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the verification policy.
    #[must_use]
    pub fn with_verify_policy(mut self, policy: VerifyPolicy) -> Self {
        self.verify_policy = policy;
        self
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Self::DEFAULT_CYCLE_INTERVAL,
            adapter_timeout: Self::DEFAULT_ADAPTER_TIMEOUT,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            failure_threshold: Self::DEFAULT_FAILURE_THRESHOLD,
            verify_policy: VerifyPolicy::Strict,
        }
    }
}

/// Services shared by all devices of a mapper.
#[derive(Debug, Clone, Default)]
pub struct DeviceContext {
    /// Where status and twin events go.
    pub events: EventBus,
    /// Where reported values are recorded.
    pub sinks: SinkSet,
    /// Worker settings.
    pub settings: DeviceSettings,
}

impl DeviceContext {
    /// Creates a context with a fresh event bus and no sinks.
    #[must_use]
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            events: EventBus::new(),
            sinks: SinkSet::new(),
            settings,
        }
    }

    /// Sets the sinks.
    #[must_use]
    pub fn with_sinks(mut self, sinks: SinkSet) -> Self {
        self.sinks = sinks;
        self
    }

    /// Sets the event bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}
