// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sink posting records to an HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{TelemetryRecord, TelemetrySink};
use crate::error::SinkError;

/// Posts each record as JSON to
/// `<endpoint>/<namespace>/<device>/<property>`.
///
/// Path segments are percent-encoded. Any non-2xx answer is a failure.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use edge_mapper::sink::HttpSink;
///
/// let sink = HttpSink::new("http://collector:8080/telemetry", Duration::from_secs(2)).unwrap();
/// assert_eq!(sink.endpoint(), "http://collector:8080/telemetry");
/// ```
#[derive(Debug, Clone)]
pub struct HttpSink {
    endpoint: String,
    client: Client,
}

impl HttpSink {
    /// Creates a sink for an endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an HTTP(S) URL or the client
    /// cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(SinkError::InvalidAddress(endpoint));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    /// Returns the endpoint without trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url_for(&self, record: &TelemetryRecord) -> String {
        format!(
            "{}/{}/{}/{}",
            self.endpoint,
            urlencoding::encode(&record.namespace),
            urlencoding::encode(&record.device_name),
            urlencoding::encode(&record.property_name)
        )
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn record(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let url = self.url_for(record);
        tracing::debug!(url = %url, "Posting telemetry");

        let response = self.client.post(&url).json(record).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceId;

    #[test]
    fn url_segments_are_encoded() {
        let sink = HttpSink::new("http://host/base/", Duration::from_secs(1)).unwrap();
        let record = TelemetryRecord::new(&ResourceId::new("ns", "my dev"), "a/b", "1", 0);

        assert_eq!(sink.url_for(&record), "http://host/base/ns/my%20dev/a%2Fb");
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        assert!(matches!(
            HttpSink::new("ftp://host", Duration::from_secs(1)),
            Err(SinkError::InvalidAddress(_))
        ));
    }
}
