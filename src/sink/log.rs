// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sink writing records to the log.

use async_trait::async_trait;

use super::{TelemetryRecord, TelemetrySink};
use crate::error::SinkError;

/// Logs every record at `info` level under the `edge_mapper::telemetry`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl LogSink {
    /// Creates the sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn record(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        tracing::info!(
            target: "edge_mapper::telemetry",
            namespace = %record.namespace,
            device = %record.device_name,
            property = %record.property_name,
            value = %record.value,
            timestamp_ms = record.timestamp_ms,
            "Telemetry"
        );
        Ok(())
    }
}
