// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dispatch of calls from the edge core to the device manager.

use std::sync::Arc;

use serde::Serialize;

use super::convert;
use super::message::{
    DeviceNameResult, GetDeviceResult, ModelNameResult, ModelParams, Request, RequestFrame,
    ResourceRef, ResponseFrame, StatusCode, WireDevice,
};
use crate::device::DeviceManager;
use crate::error::Error;
use crate::model::ResourceId;

type Outcome = Result<Option<serde_json::Value>, (StatusCode, String)>;

/// Serves core → mapper calls against a [`DeviceManager`].
///
/// Wire payloads are parsed before the manager is touched, so a malformed
/// request never holds the registry.
#[derive(Debug, Clone)]
pub struct SyncHandler {
    manager: Arc<DeviceManager>,
}

impl SyncHandler {
    /// Creates a handler for `manager`.
    #[must_use]
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        Self { manager }
    }

    /// Returns the manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<DeviceManager> {
        &self.manager
    }

    /// Serves one call.
    pub async fn handle(&self, frame: RequestFrame) -> ResponseFrame {
        let method = frame.request.method();
        tracing::debug!(id = %frame.id, method, "Serving request");

        let outcome = match frame.request {
            Request::RegisterDevice(params) => self.register_device(&params.device).await,
            Request::UpdateDevice(params) => self.apply_device(&params.device).await,
            Request::RemoveDevice(reference) => self.remove_device(&reference).await,
            Request::CreateDeviceModel(params) => self.create_model(&params),
            Request::UpdateDeviceModel(params) => self.update_model(&params),
            Request::RemoveDeviceModel(reference) => {
                self.remove_model(&reference);
                Ok(None)
            }
            Request::GetDevice(reference) => self.get_device(&reference),
            Request::MapperRegister(_)
            | Request::ReportDeviceStatus(_)
            | Request::ReportDeviceStates(_) => Err((
                StatusCode::InvalidArgument,
                format!("{method} is not served by the mapper"),
            )),
        };

        match outcome {
            Ok(result) => ResponseFrame::ok(frame.id, result),
            Err((code, message)) => {
                tracing::warn!(id = %frame.id, method, %code, %message, "Request failed");
                ResponseFrame::error(frame.id, code, message)
            }
        }
    }

    async fn register_device(&self, wire: &WireDevice) -> Outcome {
        let id = device_id(wire)?;
        if self.manager.contains(&id) {
            tracing::debug!(device = %id, "Device already registered");
            return to_result(&DeviceNameResult {
                device_name: id.name().to_string(),
            });
        }
        self.apply_device(wire).await
    }

    async fn apply_device(&self, wire: &WireDevice) -> Outcome {
        let id = device_id(wire)?;
        let model_id = ResourceId::new(id.namespace(), &wire.spec.device_model_reference);
        let model = self.manager.model(&model_id).ok_or_else(|| {
            (
                StatusCode::NotFound,
                Error::ModelNotFound(model_id.clone()).to_string(),
            )
        })?;
        let instance = convert::device_instance(wire, &model)
            .map_err(|e| (StatusCode::Internal, e.to_string()))?;

        self.manager
            .upsert(model, instance)
            .await
            .map_err(|e| (status_of(&e), e.to_string()))?;

        to_result(&DeviceNameResult {
            device_name: id.name().to_string(),
        })
    }

    async fn remove_device(&self, reference: &ResourceRef) -> Outcome {
        let id = resource_id(reference)?;
        self.manager
            .remove(&id)
            .await
            .map_err(|e| (status_of(&e), e.to_string()))?;
        Ok(None)
    }

    fn create_model(&self, params: &ModelParams) -> Outcome {
        if params.model.name.is_empty() {
            return Err(missing_name("device model"));
        }
        let model = convert::device_model(&params.model)
            .map_err(|e| (StatusCode::Internal, e.to_string()))?;
        let name = model.id.name().to_string();

        if !self.manager.upsert_model(model) {
            tracing::debug!(model = %name, "Model replaced on create");
        }
        to_result(&ModelNameResult {
            device_model_name: name,
        })
    }

    fn update_model(&self, params: &ModelParams) -> Outcome {
        if params.model.name.is_empty() {
            return Err(missing_name("device model"));
        }
        let model = convert::device_model(&params.model)
            .map_err(|e| (StatusCode::Internal, e.to_string()))?;
        if self.manager.model(&model.id).is_none() {
            return Err((
                StatusCode::NotFound,
                Error::ModelNotFound(model.id).to_string(),
            ));
        }
        self.manager.upsert_model(model);
        Ok(None)
    }

    fn remove_model(&self, reference: &ResourceRef) {
        let id = ResourceId::new(&reference.namespace, &reference.name);
        if self.manager.remove_model(&id).is_none() {
            tracing::debug!(model = %id, "Removing unknown model");
        }
    }

    fn get_device(&self, reference: &ResourceRef) -> Outcome {
        let id = resource_id(reference)?;
        let device = self
            .manager
            .get(&id)
            .ok_or_else(|| (StatusCode::NotFound, Error::DeviceNotFound(id).to_string()))?;
        to_result(&GetDeviceResult {
            device: convert::wire_device(&device.instance()),
        })
    }
}

fn device_id(wire: &WireDevice) -> Result<ResourceId, (StatusCode, String)> {
    if wire.name.is_empty() {
        return Err(missing_name("device"));
    }
    Ok(ResourceId::new(&wire.namespace, &wire.name))
}

fn resource_id(reference: &ResourceRef) -> Result<ResourceId, (StatusCode, String)> {
    if reference.name.is_empty() {
        return Err(missing_name("device"));
    }
    Ok(ResourceId::new(&reference.namespace, &reference.name))
}

fn missing_name(what: &str) -> (StatusCode, String) {
    (StatusCode::InvalidArgument, format!("{what} name is required"))
}

fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::DeviceNotFound(_) | Error::ModelNotFound(_) => StatusCode::NotFound,
        Error::Validation(_) => StatusCode::InvalidArgument,
        Error::ShutDown => StatusCode::Unavailable,
        _ => StatusCode::Internal,
    }
}

fn to_result(value: &impl Serialize) -> Outcome {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| (StatusCode::Internal, e.to_string()))
}
