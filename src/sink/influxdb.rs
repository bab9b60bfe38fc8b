// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Database method writing records to InfluxDB 2.x.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{TelemetryRecord, TelemetrySink};
use crate::config::InfluxDbConfig;
use crate::error::SinkError;
use crate::model::DataType;

/// Writes each record as one line of InfluxDB line protocol to
/// `<url>/api/v2/write`, with millisecond precision.
///
/// The measurement defaults to the device name. Each line is tagged with
/// the namespace and device, and carries the property as its only field,
/// typed after the property's declared data type.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use edge_mapper::sink::InfluxDbSink;
///
/// let sink = InfluxDbSink::new("http://influx:8086", "edge", "telemetry", Duration::from_secs(2))
///     .unwrap()
///     .with_token("secret");
/// assert_eq!(
///     sink.write_url(),
///     "http://influx:8086/api/v2/write?org=edge&bucket=telemetry&precision=ms",
/// );
/// ```
#[derive(Debug, Clone)]
pub struct InfluxDbSink {
    write_url: String,
    token: Option<String>,
    measurement: Option<String>,
    client: Client,
}

impl InfluxDbSink {
    /// Creates a sink writing to `bucket` of `org` on the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidAddress`] if `url` is not an HTTP(S) URL,
    /// or the client build error.
    pub fn new(
        url: impl Into<String>,
        org: &str,
        bucket: &str,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let url = url.into().trim_end_matches('/').to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SinkError::InvalidAddress(url));
        }

        let write_url = format!(
            "{url}/api/v2/write?org={}&bucket={}&precision=ms",
            urlencoding::encode(org),
            urlencoding::encode(bucket)
        );
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            write_url,
            token: None,
            measurement: None,
            client,
        })
    }

    /// Builds a sink from its configuration entry.
    ///
    /// The token is taken from `token`, or else from the environment
    /// variable named by `token_env`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_config(config: &InfluxDbConfig) -> Result<Self, SinkError> {
        let mut sink = Self::new(
            &config.url,
            &config.org,
            &config.bucket,
            Duration::from_millis(config.timeout_ms),
        )?;

        let token = config.token.clone().or_else(|| {
            let name = config.token_env.as_deref()?;
            let token = std::env::var(name).ok();
            if token.is_none() {
                tracing::warn!(variable = name, "InfluxDB token variable is not set, writing without token");
            }
            token
        });
        sink.token = token;
        sink.measurement.clone_from(&config.measurement);
        Ok(sink)
    }

    /// Authenticates writes with an API token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Writes every record to a fixed measurement instead of the device
    /// name.
    #[must_use]
    pub fn with_measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = Some(measurement.into());
        self
    }

    /// Returns the write endpoint, query included.
    #[must_use]
    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    fn line(&self, record: &TelemetryRecord) -> String {
        let measurement = self
            .measurement
            .as_deref()
            .unwrap_or(&record.device_name);
        format!(
            "{},namespace={},device={} {}={} {}",
            escape(measurement, &[',', ' ']),
            escape(&record.namespace, &[',', '=', ' ']),
            escape(&record.device_name, &[',', '=', ' ']),
            escape(&record.property_name, &[',', '=', ' ']),
            field_value(record),
            record.timestamp_ms
        )
    }
}

/// Backslash-escapes `special` characters.
fn escape(text: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Renders the value as a typed field. Values that do not parse as their
/// declared type are written as strings.
fn field_value(record: &TelemetryRecord) -> String {
    let value = record.value.trim();
    let data_type = record
        .data_type
        .as_deref()
        .map_or(DataType::String, DataType::parse);

    match data_type {
        DataType::Int if value.parse::<i64>().is_ok() => format!("{value}i"),
        DataType::Float | DataType::Double
            if value.parse::<f64>().is_ok_and(f64::is_finite) =>
        {
            value.to_string()
        }
        DataType::Boolean if value == "true" || value == "false" => value.to_string(),
        _ => format!("\"{}\"", escape(&record.value, &['"'])),
    }
}

#[async_trait]
impl TelemetrySink for InfluxDbSink {
    fn name(&self) -> &str {
        "influxdb2"
    }

    async fn record(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let line = self.line(record);
        tracing::debug!(line = %line, "Writing to InfluxDB");

        let mut request = self
            .client
            .post(&self.write_url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }

        let response = request.send().await?;
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
