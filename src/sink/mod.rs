// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telemetry sinks.
//!
//! Every reported value change is handed to a [`SinkSet`], which forwards it
//! to each global [`TelemetrySink`] on its own task. Properties naming a
//! database method are also recorded by the sink registered under that name.
//! Delivery is best effort: failures are logged and the record is dropped.

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
mod influxdb;
mod log;
#[cfg(feature = "mqtt")]
mod mqtt;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{DbMethodConfig, SinkConfig};
use crate::error::{ConfigError, SinkError};
use crate::model::ResourceId;

#[cfg(feature = "http")]
pub use http::HttpSink;
#[cfg(feature = "http")]
pub use influxdb::InfluxDbSink;
pub use log::LogSink;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttSink;

/// One reported value of one device property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Device namespace.
    pub namespace: String,
    /// Device name.
    pub device_name: String,
    /// Property name.
    pub property_name: String,
    /// Reported value.
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Declared type of the property, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl TelemetryRecord {
    /// Creates a record for a device property.
    #[must_use]
    pub fn new(
        device: &ResourceId,
        property_name: impl Into<String>,
        value: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            namespace: device.namespace().to_string(),
            device_name: device.name().to_string(),
            property_name: property_name.into(),
            value: value.into(),
            timestamp_ms,
            data_type: None,
        }
    }

    /// Sets the declared type of the property.
    #[must_use]
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }
}

/// Destination for telemetry records.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Stores or forwards one record.
    async fn record(&self, record: &TelemetryRecord) -> Result<(), SinkError>;

    /// Flushes and releases connections. Called once at shutdown.
    async fn close(&self) {}
}

/// Fan-out over the configured sinks.
///
/// Global sinks receive every record. Routed sinks are registered under a
/// database method name and only receive records dispatched to that name.
///
/// # Examples
///
/// ```
/// use edge_mapper::sink::{LogSink, SinkSet};
///
/// let sinks = SinkSet::new()
///     .with_sink(LogSink::new())
///     .with_route("history", LogSink::new());
/// assert_eq!(sinks.len(), 2);
/// assert!(sinks.has_route("history"));
/// ```
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn TelemetrySink>>,
    routes: BTreeMap<String, Arc<dyn TelemetrySink>>,
}

impl SinkSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Adds a shared sink.
    #[must_use]
    pub fn with_shared(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Registers a sink under a database method name, replacing any sink
    /// with the same name.
    #[must_use]
    pub fn with_route(
        mut self,
        name: impl Into<String>,
        sink: impl TelemetrySink + 'static,
    ) -> Self {
        self.routes.insert(name.into(), Arc::new(sink));
        self
    }

    /// Returns `true` if a sink is registered under `name`.
    #[must_use]
    pub fn has_route(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Returns the number of sinks, routed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len() + self.routes.len()
    }

    /// Returns `true` if there is no sink.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty() && self.routes.is_empty()
    }

    /// Hands a record to every global sink without waiting for delivery.
    pub fn dispatch(&self, record: TelemetryRecord) {
        self.dispatch_to(record, None);
    }

    /// Hands a record to every global sink and, when `route` names one, to
    /// the routed sink, without waiting for delivery.
    pub fn dispatch_to(&self, record: TelemetryRecord, route: Option<&str>) {
        let routed = route.and_then(|name| {
            let sink = self.routes.get(name);
            if sink.is_none() {
                tracing::debug!(db_method = name, "No sink registered for database method");
            }
            sink
        });
        if self.sinks.is_empty() && routed.is_none() {
            return;
        }
        let record = Arc::new(record);
        for sink in self.sinks.iter().chain(routed) {
            let sink = Arc::clone(sink);
            let record = Arc::clone(&record);
            tokio::spawn(async move {
                if let Err(e) = sink.record(&record).await {
                    tracing::warn!(
                        sink = sink.name(),
                        namespace = %record.namespace,
                        device = %record.device_name,
                        property = %record.property_name,
                        error = %e,
                        "Telemetry record dropped"
                    );
                }
            });
        }
    }

    /// Closes every sink.
    pub async fn close(&self) {
        futures::future::join_all(
            self.sinks
                .iter()
                .chain(self.routes.values())
                .map(|sink| sink.close()),
        )
        .await;
    }
}

impl std::fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSet")
            .field(
                "sinks",
                &self.sinks.iter().map(|sink| sink.name()).collect::<Vec<_>>(),
            )
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds the sinks and database methods listed in the configuration.
///
/// Must be called inside a Tokio runtime: the MQTT sink spawns its
/// connection task immediately.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for a sink whose address is unusable or
/// whose feature is not compiled in.
pub fn build(
    configs: &[SinkConfig],
    db_methods: &BTreeMap<String, DbMethodConfig>,
) -> Result<SinkSet, ConfigError> {
    let mut set = SinkSet::new();
    for (name, config) in db_methods {
        set = match config {
            #[cfg(feature = "http")]
            DbMethodConfig::Influxdb2(influx) => set.with_route(
                name,
                InfluxDbSink::from_config(influx)
                    .map_err(|e| ConfigError::invalid("db_methods.url", e.to_string()))?,
            ),
            #[allow(unreachable_patterns)]
            other => {
                return Err(ConfigError::invalid(
                    "db_methods.type",
                    format!("{} database method is not compiled in", other.kind()),
                ));
            }
        };
    }

    for config in configs {
        set = match config {
            SinkConfig::Log => set.with_sink(LogSink::new()),
            #[cfg(feature = "http")]
            SinkConfig::Http {
                endpoint,
                timeout_ms,
            } => set.with_sink(
                HttpSink::new(endpoint, std::time::Duration::from_millis(*timeout_ms))
                    .map_err(|e| ConfigError::invalid("sinks.endpoint", e.to_string()))?,
            ),
            #[cfg(feature = "mqtt")]
            SinkConfig::Mqtt {
                broker,
                topic_prefix,
                qos,
                client_id,
            } => set.with_sink(
                MqttSink::connect(broker, topic_prefix, *qos, client_id.as_deref())
                    .map_err(|e| ConfigError::invalid("sinks.broker", e.to_string()))?,
            ),
            #[allow(unreachable_patterns)]
            other => {
                return Err(ConfigError::invalid(
                    "sinks.type",
                    format!("{} sink is not compiled in", other.kind()),
                ));
            }
        };
    }
    Ok(set)
}
