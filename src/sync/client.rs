// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Calls from the mapper to the edge core.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use super::codec::ClientCodec;
use super::convert::wire_twin;
use super::message::{
    MapperInfo, RegisterParams, RegisterResult, ReportStatesParams, ReportStatusParams, Request,
    RequestFrame, StatusCode, WireDevice, WireDeviceModel,
};
use crate::driver::duration_millis;
use crate::error::SyncError;
use crate::model::Twin;

/// Deadline of a registration, connect included.
pub const REGISTER_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline of a status or state report.
pub const REPORT_DEADLINE: Duration = Duration::from_secs(1);

/// Client of the edge core's socket.
///
/// Every call opens its own connection, so the client is cheap to share and
/// survives core restarts.
///
/// # Examples
///
/// ```no_run
/// use edge_mapper::sync::{MapperInfo, SyncClient};
///
/// # async fn example() -> Result<(), edge_mapper::error::SyncError> {
/// let client = SyncClient::new(
///     "/etc/kubeedge/dmi.sock",
///     MapperInfo {
///         name: "edge-mapper".to_string(),
///         address: "/etc/kubeedge/edge_mapper.sock".to_string(),
///         ..MapperInfo::default()
///     },
/// );
///
/// let (devices, models) = client.register(true).await?;
/// println!("{} devices, {} models", devices.len(), models.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SyncClient {
    core_socket: PathBuf,
    mapper: MapperInfo,
}

impl SyncClient {
    /// Creates a client for the core listening on `core_socket`.
    #[must_use]
    pub fn new(core_socket: impl Into<PathBuf>, mapper: MapperInfo) -> Self {
        Self {
            core_socket: core_socket.into(),
            mapper,
        }
    }

    /// Returns the socket of the edge core.
    #[must_use]
    pub fn core_socket(&self) -> &Path {
        &self.core_socket
    }

    /// Returns the identity sent on registration.
    #[must_use]
    pub fn mapper(&self) -> &MapperInfo {
        &self.mapper
    }

    /// Registers the mapper, returning the devices and models the core
    /// assigns to it when `with_data` is set.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the core is unreachable, refuses the
    /// registration or does not answer within [`REGISTER_DEADLINE`].
    pub async fn register(
        &self,
        with_data: bool,
    ) -> Result<(Vec<WireDevice>, Vec<WireDeviceModel>), SyncError> {
        let request = Request::MapperRegister(RegisterParams {
            with_data,
            mapper: self.mapper.clone(),
        });
        let result = self
            .call(request, REGISTER_DEADLINE, "MapperRegister")
            .await?;

        let lists: RegisterResult = match result {
            Some(value) => serde_json::from_value(value)?,
            None => RegisterResult::default(),
        };
        tracing::info!(
            mapper = %self.mapper.name,
            devices = lists.device_list.len(),
            models = lists.model_list.len(),
            "Mapper registered"
        );
        Ok((lists.device_list, lists.model_list))
    }

    /// Calls [`register`](Self::register) up to `attempts` times, doubling
    /// the delay between attempts from `initial_delay`.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn register_with_backoff(
        &self,
        with_data: bool,
        attempts: u32,
        initial_delay: Duration,
    ) -> Result<(Vec<WireDevice>, Vec<WireDeviceModel>), SyncError> {
        let attempts = attempts.max(1);
        let mut delay = initial_delay;
        let mut attempt = 1;
        loop {
            match self.register(with_data).await {
                Ok(lists) => return Ok(lists),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        retry_in_ms = duration_millis(delay),
                        error = %e,
                        "Registration failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reports changed twins of a device.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the report is not acknowledged within
    /// [`REPORT_DEADLINE`].
    pub async fn report_status(
        &self,
        namespace: &str,
        device_name: &str,
        twins: &[Twin],
    ) -> Result<(), SyncError> {
        let request = Request::ReportDeviceStatus(ReportStatusParams {
            namespace: namespace.to_string(),
            device_name: device_name.to_string(),
            twins: twins.iter().map(wire_twin).collect(),
        });
        self.call(request, REPORT_DEADLINE, "ReportDeviceStatus")
            .await
            .map(drop)
    }

    /// Reports the lifecycle state of a device.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the report is not acknowledged within
    /// [`REPORT_DEADLINE`].
    pub async fn report_states(
        &self,
        namespace: &str,
        device_name: &str,
        state: &str,
    ) -> Result<(), SyncError> {
        let request = Request::ReportDeviceStates(ReportStatesParams {
            namespace: namespace.to_string(),
            device_name: device_name.to_string(),
            state: state.to_string(),
        });
        self.call(request, REPORT_DEADLINE, "ReportDeviceStates")
            .await
            .map(drop)
    }

    async fn call(
        &self,
        request: Request,
        deadline: Duration,
        operation: &'static str,
    ) -> Result<Option<serde_json::Value>, SyncError> {
        let exchange = async {
            let stream = UnixStream::connect(&self.core_socket).await?;
            let mut framed = Framed::new(stream, ClientCodec::new());

            let frame = RequestFrame::new(request);
            let id = frame.id;
            framed.send(frame).await?;

            let response = framed.next().await.ok_or(SyncError::ConnectionClosed)??;
            if response.id != id {
                return Err(SyncError::UnexpectedResponse(format!(
                    "expected id {id}, got {}",
                    response.id
                )));
            }
            if response.code != StatusCode::Ok {
                return Err(SyncError::Remote {
                    code: response.code,
                    message: response.message,
                });
            }
            Ok(response.result)
        };

        tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| SyncError::Timeout {
                operation,
                millis: duration_millis(deadline),
            })?
    }
}
