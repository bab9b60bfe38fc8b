// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire messages exchanged with the edge core.
//!
//! Every field is optional on decode so that a missing name surfaces as
//! [`StatusCode::InvalidArgument`] instead of a framing error.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Devices
// =============================================================================

/// A device as described by the edge core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireDevice {
    /// Device name.
    pub name: String,
    /// Device namespace.
    pub namespace: String,
    /// Desired configuration.
    pub spec: DeviceSpec,
    /// Observed state.
    pub status: WireDeviceStatus,
}

/// Configuration part of a [`WireDevice`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSpec {
    /// Name of the device model, in the device's namespace.
    pub device_model_reference: String,
    /// Driver selection.
    pub protocol: ProtocolSpec,
    /// Properties with visitors and cadence.
    pub properties: Vec<PropertySpec>,
    /// Writable methods.
    pub methods: Vec<MethodSpec>,
}

/// Driver name and configuration. `config_data` may be an object or a
/// JSON document encoded as a string.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSpec {
    /// Driver name.
    pub protocol_name: String,
    /// Driver configuration.
    pub config_data: serde_json::Value,
}

/// Visitor of one property; same shape as [`ProtocolSpec`].
pub type VisitorSpec = ProtocolSpec;

/// One property of a [`WireDevice`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertySpec {
    /// Property name.
    pub name: String,
    /// Value requested by the cloud.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<WireTwinValue>,
    /// Where the driver finds the value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitors: Option<VisitorSpec>,
    /// Sampling cadence in milliseconds.
    pub collect_cycle: u64,
    /// Reporting cadence in milliseconds.
    pub report_cycle: u64,
    /// Whether changes are reported.
    pub report_to_cloud: bool,
    /// Where reported values are recorded besides the global sinks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_method: Option<PushMethodSpec>,
}

/// Per-property recording target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushMethodSpec {
    /// Name of a database method configured on the mapper.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_method: Option<String>,
}

/// One method of a [`WireDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MethodSpec {
    /// Method name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Properties written by the method.
    pub property_names: Vec<String>,
}

/// Observed state of a [`WireDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireDeviceStatus {
    /// Current twins.
    pub twins: Vec<WireTwin>,
}

/// A twin on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireTwin {
    /// Property the twin mirrors.
    pub property_name: String,
    /// Value requested by the cloud.
    pub observed_desired: WireTwinValue,
    /// Value confirmed by the device.
    pub reported: WireTwinValue,
}

/// A twin value with free-form metadata, usually `timestamp` and `type`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireTwinValue {
    /// The value as text.
    pub value: String,
    /// Value metadata.
    pub metadata: HashMap<String, String>,
}

// =============================================================================
// Models
// =============================================================================

/// A device model as described by the edge core.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireDeviceModel {
    /// Model name.
    pub name: String,
    /// Model namespace.
    pub namespace: String,
    /// Free-text description.
    pub description: String,
    /// Property schema.
    pub spec: ModelSpec,
}

/// Schema part of a [`WireDeviceModel`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSpec {
    /// Declared properties.
    pub properties: Vec<ModelPropertySpec>,
}

/// One declared property of a [`WireDeviceModel`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelPropertySpec {
    /// Property name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Declared type, e.g. `int`.
    #[serde(rename = "type")]
    pub data_type: String,
    /// `ReadOnly` or `ReadWrite`.
    pub access_mode: String,
    /// Inclusive lower bound, empty if unbounded.
    pub minimum: String,
    /// Inclusive upper bound, empty if unbounded.
    pub maximum: String,
    /// Unit of measure.
    pub unit: String,
}

// =============================================================================
// Mapper
// =============================================================================

/// Identity of this mapper as registered with the edge core.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapperInfo {
    /// Mapper name.
    pub name: String,
    /// Mapper version.
    pub version: String,
    /// Protocol API version.
    pub api_version: String,
    /// Protocol the mapper serves.
    pub protocol: String,
    /// Socket path the edge core calls back on.
    pub address: String,
    /// Mapper state, e.g. `ok`.
    pub state: String,
}

// =============================================================================
// Requests
// =============================================================================

/// Parameters of [`Request::MapperRegister`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterParams {
    /// Ask the edge core to return existing devices and models.
    pub with_data: bool,
    /// The registering mapper.
    pub mapper: MapperInfo,
}

/// Parameters carrying a device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParams {
    /// The device.
    pub device: WireDevice,
}

/// Parameters carrying a device model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// The model.
    pub model: WireDeviceModel,
}

/// A device or model reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRef {
    /// Namespace, `default` when empty.
    pub namespace: String,
    /// Name.
    pub name: String,
}

/// Parameters of [`Request::ReportDeviceStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportStatusParams {
    /// Device namespace.
    pub namespace: String,
    /// Device name.
    pub device_name: String,
    /// Twins whose reported value changed.
    pub twins: Vec<WireTwin>,
}

/// Parameters of [`Request::ReportDeviceStates`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportStatesParams {
    /// Device namespace.
    pub namespace: String,
    /// Device name.
    pub device_name: String,
    /// Device state, e.g. `ok` or `offline`.
    pub state: String,
}

/// A call on the synchronization channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Mapper → core: announce the mapper.
    MapperRegister(RegisterParams),
    /// Mapper → core: changed twins of a device.
    ReportDeviceStatus(ReportStatusParams),
    /// Mapper → core: lifecycle state of a device.
    ReportDeviceStates(ReportStatesParams),
    /// Core → mapper: create a device.
    RegisterDevice(DeviceParams),
    /// Core → mapper: delete a device.
    RemoveDevice(ResourceRef),
    /// Core → mapper: replace a device.
    UpdateDevice(DeviceParams),
    /// Core → mapper: create a model.
    CreateDeviceModel(ModelParams),
    /// Core → mapper: replace a model.
    UpdateDeviceModel(ModelParams),
    /// Core → mapper: delete a model.
    RemoveDeviceModel(ResourceRef),
    /// Core → mapper: fetch a device with its twins.
    GetDevice(ResourceRef),
}

impl Request {
    /// Returns the method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::MapperRegister(_) => "MapperRegister",
            Self::ReportDeviceStatus(_) => "ReportDeviceStatus",
            Self::ReportDeviceStates(_) => "ReportDeviceStates",
            Self::RegisterDevice(_) => "RegisterDevice",
            Self::RemoveDevice(_) => "RemoveDevice",
            Self::UpdateDevice(_) => "UpdateDevice",
            Self::CreateDeviceModel(_) => "CreateDeviceModel",
            Self::UpdateDeviceModel(_) => "UpdateDeviceModel",
            Self::RemoveDeviceModel(_) => "RemoveDeviceModel",
            Self::GetDevice(_) => "GetDevice",
        }
    }
}

/// A request with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, echoed in the response.
    pub id: Uuid,
    /// The call.
    #[serde(flatten)]
    pub request: Request,
}

impl RequestFrame {
    /// Wraps a request with a fresh id.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Outcome of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// The call succeeded.
    Ok,
    /// The request is malformed or incomplete.
    InvalidArgument,
    /// The referenced device or model does not exist.
    NotFound,
    /// The receiver failed to apply the request.
    Internal,
    /// The receiver cannot serve the request right now.
    Unavailable,
}

impl StatusCode {
    /// Returns the name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to a [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the request being answered.
    pub id: Uuid,
    /// Outcome.
    pub code: StatusCode,
    /// Human-readable detail, empty on success.
    #[serde(default)]
    pub message: String,
    /// Method-specific result.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl ResponseFrame {
    /// Creates a successful response.
    #[must_use]
    pub fn ok(id: Uuid, result: Option<serde_json::Value>) -> Self {
        Self {
            id,
            code: StatusCode::Ok,
            message: String::new(),
            result,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub fn error(id: Uuid, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
            result: None,
        }
    }
}

/// Result of [`Request::MapperRegister`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterResult {
    /// Devices assigned to this mapper.
    pub device_list: Vec<WireDevice>,
    /// Models referenced by those devices.
    pub model_list: Vec<WireDeviceModel>,
}

/// Result of [`Request::RegisterDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNameResult {
    /// Name of the registered device.
    pub device_name: String,
}

/// Result of [`Request::CreateDeviceModel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelNameResult {
    /// Name of the created model.
    pub device_model_name: String,
}

/// Result of [`Request::GetDevice`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDeviceResult {
    /// The device with its current twins.
    pub device: WireDevice,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_layout() {
        let frame = RequestFrame::new(Request::RemoveDevice(ResourceRef {
            namespace: "default".to_string(),
            name: "dev1".to_string(),
        }));

        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["method"], "RemoveDevice");
        assert_eq!(value["params"]["name"], "dev1");
        assert_eq!(value["id"], frame.id.to_string());
    }

    #[test]
    fn decodes_device_with_missing_fields() {
        let raw = json!({
            "id": "6f1c2f6e-8a57-4bb4-9d43-0a8f6c1b2a90",
            "method": "RegisterDevice",
            "params": {
                "device": {
                    "name": "dev1",
                    "spec": {
                        "deviceModelReference": "m1",
                        "protocol": { "protocolName": "virtual" },
                        "properties": [
                            { "name": "temp", "desired": { "value": "30" } }
                        ]
                    }
                }
            }
        });

        let frame: RequestFrame = serde_json::from_value(raw).unwrap();

        let Request::RegisterDevice(params) = frame.request else {
            panic!("wrong method");
        };
        assert_eq!(params.device.namespace, "");
        assert_eq!(params.device.spec.properties[0].desired.as_ref().unwrap().value, "30");
        assert!(params.device.status.twins.is_empty());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let raw = json!({
            "id": "6f1c2f6e-8a57-4bb4-9d43-0a8f6c1b2a90",
            "method": "Reboot",
            "params": {}
        });

        assert!(serde_json::from_value::<RequestFrame>(raw).is_err());
    }

    #[test]
    fn model_property_type_field() {
        let property: ModelPropertySpec =
            serde_json::from_value(json!({ "name": "temp", "type": "int", "accessMode": "ReadWrite" }))
                .unwrap();

        assert_eq!(property.data_type, "int");
        assert_eq!(property.access_mode, "ReadWrite");
        assert!(property.minimum.is_empty());
    }

    #[test]
    fn status_code_display_matches_wire() {
        assert_eq!(StatusCode::NotFound.to_string(), "NotFound");
        assert_eq!(serde_json::to_value(StatusCode::NotFound).unwrap(), "NotFound");
    }
}
