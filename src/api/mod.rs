// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP API for inspecting and writing devices.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /api/v1/ping` | Liveness |
//! | `GET /api/v1/device/{namespace}/{name}/{property}` | Reported value and type |
//! | `GET /api/v1/devicemethod/{namespace}/{name}` | Methods and parameters |
//! | `PUT\|POST /api/v1/devicemethod/{namespace}/{name}/{method}/{property}/{data}` | Write a property |
//! | `GET /api/v1/meta/model/{namespace}/{name}` | Model of a device |
//!
//! Values are served from the twin store; only writes reach the device.

mod response;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceManager, MethodInfo, TwinResult};
use crate::model::ResourceId;
use crate::sync::{WireDeviceModel, convert};

pub use response::{API_VERSION, ApiError, ApiResponse, Envelope};

type Manager = State<Arc<DeviceManager>>;
type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Builds the API router.
pub fn router(manager: Arc<DeviceManager>) -> Router {
    Router::new()
        .route("/api/v1/ping", get(ping))
        .route("/api/v1/device/:namespace/:name/:property", get(device_property))
        .route("/api/v1/devicemethod/:namespace/:name", get(device_methods))
        .route(
            "/api/v1/devicemethod/:namespace/:name/:method/:property/:data",
            axum::routing::put(write_property).post(write_property),
        )
        .route("/api/v1/meta/model/:namespace/:name", get(device_model))
        .with_state(manager)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MethodList {
    methods: Vec<MethodInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    property_name: String,
    desired: String,
    reported: String,
}

async fn ping() -> ApiResponse<&'static str> {
    ApiResponse("pong")
}

async fn device_property(
    State(manager): Manager,
    Path((namespace, name, property)): Path<(String, String, String)>,
) -> ApiResult<TwinResult> {
    let id = ResourceId::new(namespace, name);
    Ok(ApiResponse(manager.twin_result(&id, &property)?))
}

async fn device_methods(
    State(manager): Manager,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<MethodList> {
    let id = ResourceId::new(namespace, name);
    Ok(ApiResponse(MethodList {
        methods: manager.device_methods(&id)?,
    }))
}

async fn write_property(
    State(manager): Manager,
    Path((namespace, name, method, property, data)): Path<(String, String, String, String, String)>,
) -> ApiResult<WriteResult> {
    let id = ResourceId::new(namespace, name);
    let twin = manager.write_device(&id, &method, &property, &data).await?;
    Ok(ApiResponse(WriteResult {
        property_name: twin.property_name,
        desired: twin.observed_desired.value,
        reported: twin.reported.value,
    }))
}

async fn device_model(
    State(manager): Manager,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<WireDeviceModel> {
    let id = ResourceId::new(namespace, name);
    Ok(ApiResponse(convert::wire_model(&manager.device_model(&id)?)))
}

/// Running HTTP API.
#[derive(Debug)]
pub struct ApiServer {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ApiServer {
    /// Binds `addr` and serves the API until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, manager: Arc<DeviceManager>) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let token = CancellationToken::new();
        let shutdown = token.clone();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router(manager))
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "HTTP API failed");
            }
        });
        tracing::info!(%local_addr, "HTTP API listening");

        Ok(Self {
            local_addr,
            token,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops serving after in-flight requests finish. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "HTTP API task panicked");
            }
            tracing::info!(local_addr = %self.local_addr, "HTTP API stopped");
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
