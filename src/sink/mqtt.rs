// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sink publishing records to an MQTT broker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{TelemetryRecord, TelemetrySink};
use crate::error::SinkError;

/// Counter for unique client IDs.
static CLIENT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Publishes each record as JSON on
/// `<prefix>/<namespace>/<device>/<property>`.
///
/// The connection is owned by a background task that reconnects on error.
/// Records published while the broker is unreachable are queued by the
/// client up to its capacity, then rejected.
pub struct MqttSink {
    client: AsyncClient,
    topic_prefix: String,
    qos: QoS,
    token: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Creates the client and starts its connection task.
    ///
    /// # Arguments
    ///
    /// * `broker` - `mqtt://host:port`, `tcp://host:port` or `host[:port]`
    /// * `topic_prefix` - Prefix of every topic, may be empty
    /// * `qos` - 0, 1 or 2
    /// * `client_id` - Fixed client ID, generated when `None`
    ///
    /// # Errors
    ///
    /// Returns an error if the broker address or QoS is invalid.
    pub fn connect(
        broker: &str,
        topic_prefix: &str,
        qos: u8,
        client_id: Option<&str>,
    ) -> Result<Self, SinkError> {
        let (host, port) = parse_mqtt_url(broker)?;
        let qos = match qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => return Err(SinkError::InvalidAddress(format!("invalid QoS {other}"))),
        };

        let client_id = client_id.map_or_else(
            || {
                let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
                format!("edge_mapper_{}_{counter}", std::process::id())
            },
            str::to_string,
        );

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, 64);
        let token = CancellationToken::new();
        let handle = tokio::spawn(drive_event_loop(event_loop, token.clone()));

        Ok(Self {
            client,
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
            qos,
            token,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    fn topic_for(&self, record: &TelemetryRecord) -> String {
        let suffix = format!(
            "{}/{}/{}",
            record.namespace, record.device_name, record.property_name
        );
        if self.topic_prefix.is_empty() {
            suffix
        } else {
            format!("{}/{suffix}", self.topic_prefix)
        }
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn record(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let topic = self.topic_for(record);
        let payload = serde_json::to_vec(record)?;

        tracing::debug!(topic = %topic, "Publishing telemetry");
        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(SinkError::Mqtt)
    }

    async fn close(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect failed");
        }
        self.token.cancel();
        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for MqttSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSink")
            .field("topic_prefix", &self.topic_prefix)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), SinkError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| SinkError::InvalidAddress(format!("invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    if host.is_empty() {
        return Err(SinkError::InvalidAddress("missing host".to_string()));
    }
    Ok((host, port))
}

async fn drive_event_loop(mut event_loop: EventLoop, token: CancellationToken) {
    use rumqttc::{Event, Packet};

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    tracing::info!(?connack, "MQTT sink connected");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "MQTT sink connection error");
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceId;

    #[test]
    fn parse_mqtt_url_variants() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker:1884").unwrap(),
            ("broker".to_string(), 1884)
        );
        assert_eq!(
            parse_mqtt_url("tcp://broker").unwrap(),
            ("broker".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("10.0.0.1").unwrap(),
            ("10.0.0.1".to_string(), 1883)
        );
        assert!(parse_mqtt_url("broker:port").is_err());
    }

    #[tokio::test]
    async fn topic_includes_prefix() {
        let sink = MqttSink::connect("localhost:1", "edge/", 1, Some("t")).unwrap();
        let record = TelemetryRecord::new(&ResourceId::new("ns", "dev"), "temp", "1", 0);

        assert_eq!(sink.topic_for(&record), "edge/ns/dev/temp");
        sink.close().await;
    }

    #[tokio::test]
    async fn invalid_qos_is_rejected() {
        assert!(MqttSink::connect("localhost", "", 3, None).is_err());
    }
}
