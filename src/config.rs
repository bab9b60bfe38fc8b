// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapper configuration, loaded once from YAML.
//!
//! Every section and field has a default, so an empty document is a valid
//! configuration:
//!
//! ```yaml
//! grpc_server: { socket_path: /etc/kubeedge/edge_mapper.sock }
//! common:
//!   name: edge-mapper
//!   edgecore_sock: /etc/kubeedge/dmi.sock
//!   http_port: 7777        # 0 disables the HTTP API
//! runtime:
//!   cycle_interval_ms: 5000
//!   verify_policy: strict  # strict | optimistic
//! registration: { attempts: 3, initial_backoff_ms: 1000 }
//! sinks:
//!   - { type: log }
//!   - { type: mqtt, broker: mqtt://broker:1883, topic_prefix: edge, qos: 1 }
//! db_methods:              # selected per property by `pushMethod.dbMethod`
//!   history:
//!     type: influxdb2
//!     url: http://influxdb:8086
//!     org: edge
//!     bucket: telemetry
//!     token_env: INFLUXDB_TOKEN
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::device::DeviceSettings;
use crate::error::ConfigError;
use crate::sync::MapperInfo;
use crate::twin::VerifyPolicy;

/// Full mapper configuration.
///
/// # Examples
///
/// ```
/// use edge_mapper::config::Config;
///
/// let config = Config::from_yaml("common: { name: lab-mapper, http_port: 0 }").unwrap();
///
/// assert_eq!(config.common.name, "lab-mapper");
/// assert_eq!(config.runtime.cycle_interval_ms, 5000);
/// assert_eq!(
///     config.advertised_address(),
///     config.grpc_server.socket_path.display().to_string(),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound socket served to the edge core.
    pub grpc_server: GrpcServerSection,
    /// Mapper identity and outward endpoints.
    pub common: CommonSection,
    /// Worker timing and failure policy.
    pub runtime: RuntimeSection,
    /// Registration retries.
    pub registration: RegistrationSection,
    /// Telemetry sinks receiving every record.
    pub sinks: Vec<SinkConfig>,
    /// Named database methods, receiving the records of the properties
    /// that select them.
    pub db_methods: BTreeMap<String, DbMethodConfig>,
}

/// Inbound socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GrpcServerSection {
    /// Path of the socket the edge core calls.
    pub socket_path: PathBuf,
}

impl Default for GrpcServerSection {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/etc/kubeedge/edge_mapper.sock"),
        }
    }
}

/// Mapper identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommonSection {
    /// Mapper name.
    pub name: String,
    /// Mapper version.
    pub version: String,
    /// Protocol API version.
    pub api_version: String,
    /// Protocol the mapper serves.
    pub protocol: String,
    /// Address advertised on registration. Defaults to the socket path.
    pub address: String,
    /// Socket of the edge core.
    pub edgecore_sock: PathBuf,
    /// Port of the HTTP API, 0 to disable it.
    pub http_port: u16,
}

impl Default for CommonSection {
    fn default() -> Self {
        Self {
            name: "edge-mapper".to_string(),
            version: "v1.0.0".to_string(),
            api_version: "v1.0.0".to_string(),
            protocol: "virtual".to_string(),
            address: String::new(),
            edgecore_sock: PathBuf::from("/etc/kubeedge/dmi.sock"),
            http_port: 7777,
        }
    }
}

/// Worker timing and failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Delay between reconciliation cycles.
    pub cycle_interval_ms: u64,
    /// Delay between health checks.
    pub health_interval_ms: u64,
    /// Time a stopping worker gets before it is aborted.
    pub grace_period_ms: u64,
    /// Upper bound of every adapter call.
    pub adapter_timeout_ms: u64,
    /// Consecutive failing cycles before a device goes offline, 0 to never.
    pub failure_threshold: u32,
    /// What to report when a verification read fails.
    pub verify_policy: VerifyPolicy,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 5000,
            health_interval_ms: 30_000,
            grace_period_ms: 2000,
            adapter_timeout_ms: 3000,
            failure_threshold: DeviceSettings::DEFAULT_FAILURE_THRESHOLD,
            verify_policy: VerifyPolicy::Strict,
        }
    }
}

/// Registration retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistrationSection {
    /// Number of attempts before giving up.
    pub attempts: u32,
    /// Delay before the second attempt, doubled after each failure.
    pub initial_backoff_ms: u64,
    /// Ask the core for existing devices and models.
    pub with_data: bool,
}

impl Default for RegistrationSection {
    fn default() -> Self {
        Self {
            attempts: 1,
            initial_backoff_ms: 1000,
            with_data: true,
        }
    }
}

/// One telemetry sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Log every record.
    Log,
    /// POST every record as JSON.
    Http {
        /// Base URL, `/<namespace>/<device>/<property>` is appended.
        endpoint: String,
        /// Request timeout.
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
    /// Publish every record on an MQTT broker.
    Mqtt {
        /// Broker address, e.g. `mqtt://broker:1883`.
        broker: String,
        /// Topic prefix.
        #[serde(default)]
        topic_prefix: String,
        /// Quality of service, 0 to 2.
        #[serde(default)]
        qos: u8,
        /// Fixed client id, generated when absent.
        #[serde(default)]
        client_id: Option<String>,
    },
}

fn default_http_timeout_ms() -> u64 {
    2000
}

/// One named database method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DbMethodConfig {
    /// InfluxDB 2.x over its HTTP write API.
    Influxdb2(InfluxDbConfig),
}

impl DbMethodConfig {
    /// Returns the method type as written in the configuration.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Influxdb2(_) => "influxdb2",
        }
    }
}

/// InfluxDB 2.x connection and target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfluxDbConfig {
    /// Server URL, e.g. `http://influxdb:8086`.
    pub url: String,
    /// Organization owning the bucket.
    pub org: String,
    /// Target bucket.
    pub bucket: String,
    /// API token.
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the API token, used when `token` is
    /// unset.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Fixed measurement; the device name when unset.
    #[serde(default)]
    pub measurement: Option<String>,
    /// Request timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl SinkConfig {
    /// Returns the sink type as written in the configuration.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Http { .. } => "http",
            Self::Mqtt { .. } => "mqtt",
        }
    }
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, and the
    /// errors of [`from_yaml`](Self::from_yaml).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&contents)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] for a malformed document and
    /// [`ConfigError::Invalid`] for values the mapper cannot run with.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grpc_server.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("grpc_server.socket_path", "must not be empty"));
        }
        if self.common.name.trim().is_empty() {
            return Err(ConfigError::invalid("common.name", "must not be empty"));
        }
        if self.common.edgecore_sock.as_os_str().is_empty() {
            return Err(ConfigError::invalid("common.edgecore_sock", "must not be empty"));
        }

        let runtime = &self.runtime;
        for (field, value) in [
            ("runtime.cycle_interval_ms", runtime.cycle_interval_ms),
            ("runtime.health_interval_ms", runtime.health_interval_ms),
            ("runtime.adapter_timeout_ms", runtime.adapter_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }

        if self.registration.attempts == 0 {
            return Err(ConfigError::invalid("registration.attempts", "must be at least 1"));
        }

        for sink in &self.sinks {
            match sink {
                SinkConfig::Log => {}
                SinkConfig::Http { endpoint, .. } if endpoint.trim().is_empty() => {
                    return Err(ConfigError::invalid("sinks.endpoint", "must not be empty"));
                }
                SinkConfig::Mqtt { broker, .. } if broker.trim().is_empty() => {
                    return Err(ConfigError::invalid("sinks.broker", "must not be empty"));
                }
                SinkConfig::Mqtt { qos, .. } if *qos > 2 => {
                    return Err(ConfigError::invalid("sinks.qos", format!("{qos} is not 0, 1 or 2")));
                }
                SinkConfig::Http { .. } | SinkConfig::Mqtt { .. } => {}
            }
        }

        for (name, method) in &self.db_methods {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("db_methods", "names must not be empty"));
            }
            let DbMethodConfig::Influxdb2(influx) = method;
            for (field, value) in [
                ("db_methods.url", &influx.url),
                ("db_methods.org", &influx.org),
                ("db_methods.bucket", &influx.bucket),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::invalid(field, format!("must not be empty in `{name}`")));
                }
            }
        }
        Ok(())
    }

    /// Returns the address advertised to the edge core: `common.address`,
    /// or the inbound socket path when unset.
    #[must_use]
    pub fn advertised_address(&self) -> String {
        if self.common.address.is_empty() {
            self.grpc_server.socket_path.display().to_string()
        } else {
            self.common.address.clone()
        }
    }

    /// Returns the worker settings.
    #[must_use]
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings::default()
            .with_cycle_interval(Duration::from_millis(self.runtime.cycle_interval_ms))
            .with_adapter_timeout(Duration::from_millis(self.runtime.adapter_timeout_ms))
            .with_grace_period(Duration::from_millis(self.runtime.grace_period_ms))
            .with_failure_threshold(self.runtime.failure_threshold)
            .with_verify_policy(self.runtime.verify_policy)
    }

    /// Returns the delay between health checks.
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.health_interval_ms)
    }

    /// Returns the identity sent on registration.
    #[must_use]
    pub fn mapper_info(&self) -> MapperInfo {
        MapperInfo {
            name: self.common.name.clone(),
            version: self.common.version.clone(),
            api_version: self.common.api_version.clone(),
            protocol: self.common.protocol.clone(),
            address: self.advertised_address(),
            state: "ok".to_string(),
        }
    }
}
