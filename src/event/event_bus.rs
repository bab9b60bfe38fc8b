// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting device events.

use tokio::sync::broadcast;

use super::DeviceEvent;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel shared by every device of a mapper.
///
/// Cloning the bus yields another handle on the same channel, which is how
/// devices, the manager and the reporter all publish into one stream.
///
/// A subscriber that falls more than the capacity behind loses the oldest
/// events and observes `RecvError::Lagged`.
///
/// # Examples
///
/// ```
/// use edge_mapper::event::{DeviceEvent, EventBus};
/// use edge_mapper::model::ResourceId;
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(DeviceEvent::device_added(ResourceId::new("default", "dev1")));
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event. Without subscribers the event is dropped.
    pub fn publish(&self, event: DeviceEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;
    use crate::model::ResourceId;

    fn dev1() -> ResourceId {
        ResourceId::new("default", "dev1")
    }

    #[test]
    fn subscribers_are_counted() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let rx = bus.subscribe();
        let _rx2 = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::new().publish(DeviceEvent::device_removed(dev1()));
    }

    #[tokio::test]
    async fn clones_share_one_stream() {
        let bus = EventBus::new();
        let publisher = bus.clone();
        let mut rx = bus.subscribe();

        publisher.publish(DeviceEvent::status_changed(
            dev1(),
            DeviceStatus::Unknown,
            DeviceStatus::Online,
        ));

        match rx.recv().await.unwrap() {
            DeviceEvent::StatusChanged { current, .. } => {
                assert_eq!(current, DeviceStatus::Online);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for _ in 0..3 {
            bus.publish(DeviceEvent::device_added(dev1()));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
