// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversions between wire messages and the device model.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use super::message::{
    DeviceSpec, MethodSpec, ModelPropertySpec, ModelSpec, PropertySpec, ProtocolSpec,
    PushMethodSpec, WireDevice, WireDeviceModel, WireDeviceStatus, WireTwin, WireTwinValue,
};
use crate::driver::duration_millis;
use crate::error::SyncError;
use crate::model::{
    AccessMode, DataType, DeviceInstance, DeviceMethod, DeviceModel, DeviceProperty,
    ModelProperty, ProtocolConfig, ResourceId, Twin, TwinMetadata, TwinValue, VisitorConfig,
};

const META_TIMESTAMP: &str = "timestamp";
const META_TYPE: &str = "type";

/// Converts a wire model.
///
/// # Errors
///
/// Returns [`SyncError::InvalidPayload`] if the model has no name.
pub fn device_model(wire: &WireDeviceModel) -> Result<DeviceModel, SyncError> {
    if wire.name.is_empty() {
        return Err(SyncError::InvalidPayload("device model has no name".to_string()));
    }

    let properties = wire
        .spec
        .properties
        .iter()
        .map(|p| ModelProperty {
            name: p.name.clone(),
            description: p.description.clone(),
            data_type: DataType::parse(&p.data_type),
            access_mode: AccessMode::parse(&p.access_mode),
            minimum: non_empty(&p.minimum),
            maximum: non_empty(&p.maximum),
            unit: non_empty(&p.unit),
        })
        .collect();

    Ok(DeviceModel {
        id: ResourceId::new(&wire.namespace, &wire.name),
        description: wire.description.clone(),
        properties,
    })
}

/// Converts a wire protocol section.
///
/// # Errors
///
/// Returns [`SyncError::InvalidPayload`] if the protocol has no name or its
/// configuration is a string that is not JSON.
pub fn protocol_config(wire: &ProtocolSpec) -> Result<ProtocolConfig, SyncError> {
    if wire.protocol_name.is_empty() {
        return Err(SyncError::InvalidPayload("protocol has no name".to_string()));
    }
    let config_data = match &wire.config_data {
        Value::Null => Value::Object(serde_json::Map::new()),
        Value::String(raw) if raw.trim().is_empty() => Value::Object(serde_json::Map::new()),
        Value::String(raw) => serde_json::from_str(raw).map_err(|e| {
            SyncError::InvalidPayload(format!("protocol config is not JSON: {e}"))
        })?,
        other => other.clone(),
    };
    Ok(ProtocolConfig::new(&wire.protocol_name, config_data))
}

/// Converts a property visitor. Visitors are opaque to the mapper, so a
/// string that is not JSON is passed to the driver as is.
fn visitor_config(wire: Option<&ProtocolSpec>, protocol: &str) -> VisitorConfig {
    let Some(wire) = wire else {
        return VisitorConfig::new(protocol, Value::Object(serde_json::Map::new()));
    };
    let config_data = match &wire.config_data {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| wire.config_data.clone()),
        other => other.clone(),
    };
    let name = if wire.protocol_name.is_empty() {
        protocol
    } else {
        &wire.protocol_name
    };
    VisitorConfig::new(name, config_data)
}

/// Converts a wire device resolved against its model.
///
/// Twins come from the device status, desired values from the property
/// specs. Twins naming an unknown property are dropped and every property
/// without a twin gets an empty one.
///
/// # Errors
///
/// Returns [`SyncError::InvalidPayload`] if the device has no name or its
/// protocol section is unusable.
pub fn device_instance(wire: &WireDevice, model: &DeviceModel) -> Result<DeviceInstance, SyncError> {
    if wire.name.is_empty() {
        return Err(SyncError::InvalidPayload("device has no name".to_string()));
    }
    let protocol = protocol_config(&wire.spec.protocol)?;
    let id = ResourceId::new(&wire.namespace, &wire.name);

    let mut instance = DeviceInstance::new(id, &wire.spec.device_model_reference, protocol);

    for spec in &wire.spec.properties {
        let visitor = visitor_config(spec.visitors.as_ref(), &instance.protocol.protocol_name);
        let property = DeviceProperty::resolve(&spec.name, visitor, model)
            .with_collect_cycle(Duration::from_millis(spec.collect_cycle))
            .with_report_to_cloud(spec.report_to_cloud);
        instance.properties.push(DeviceProperty {
            report_cycle: Duration::from_millis(spec.report_cycle),
            db_method: spec
                .push_method
                .as_ref()
                .and_then(|push| push.db_method.clone())
                .filter(|name| !name.is_empty()),
            ..property
        });
    }

    instance.twins = wire.status.twins.iter().map(twin).collect();
    for spec in &wire.spec.properties {
        let Some(desired) = &spec.desired else {
            continue;
        };
        match instance.twin_mut(&spec.name) {
            Some(existing) if existing.observed_desired.is_empty() => {
                existing.observed_desired = twin_value(desired);
            }
            Some(_) => {}
            None => instance
                .twins
                .push(Twin::new(&spec.name).with_desired(twin_value(desired))),
        }
    }
    if instance.rebind_twins() > 0 {
        instance.twins.retain(|t| t.property.is_some());
    }
    let missing: Vec<_> = instance
        .properties
        .iter()
        .filter(|p| instance.twin(&p.name).is_none())
        .map(|p| Twin::new(&p.name))
        .collect();
    instance.twins.extend(missing);
    instance.rebind_twins();

    instance.methods = wire
        .spec
        .methods
        .iter()
        .map(|m| DeviceMethod {
            name: m.name.clone(),
            description: m.description.clone(),
            property_names: m.property_names.clone(),
        })
        .collect();

    Ok(instance)
}

fn twin(wire: &WireTwin) -> Twin {
    Twin::new(&wire.property_name)
        .with_desired(twin_value(&wire.observed_desired))
        .with_reported(twin_value(&wire.reported))
}

fn twin_value(wire: &WireTwinValue) -> TwinValue {
    TwinValue {
        value: wire.value.clone(),
        metadata: TwinMetadata {
            timestamp_ms: wire
                .metadata
                .get(META_TIMESTAMP)
                .and_then(|ts| ts.parse().ok())
                .unwrap_or_default(),
            value_type: wire.metadata.get(META_TYPE).cloned().unwrap_or_default(),
        },
    }
}

fn wire_value(value: &TwinValue) -> WireTwinValue {
    let mut metadata = HashMap::new();
    if value.metadata.timestamp_ms != 0 {
        metadata.insert(
            META_TIMESTAMP.to_string(),
            value.metadata.timestamp_ms.to_string(),
        );
    }
    if !value.metadata.value_type.is_empty() {
        metadata.insert(META_TYPE.to_string(), value.metadata.value_type.clone());
    }
    WireTwinValue {
        value: value.value.clone(),
        metadata,
    }
}

/// Converts a twin for reporting.
#[must_use]
pub fn wire_twin(twin: &Twin) -> WireTwin {
    WireTwin {
        property_name: twin.property_name.clone(),
        observed_desired: wire_value(&twin.observed_desired),
        reported: wire_value(&twin.reported),
    }
}

/// Converts a device instance, with its current twins as status.
#[must_use]
pub fn wire_device(instance: &DeviceInstance) -> WireDevice {
    let properties = instance
        .properties
        .iter()
        .map(|p| PropertySpec {
            name: p.name.clone(),
            desired: instance
                .twin(&p.name)
                .filter(|t| !t.observed_desired.is_empty())
                .map(|t| wire_value(&t.observed_desired)),
            visitors: Some(ProtocolSpec {
                protocol_name: p.visitor.protocol_name.clone(),
                config_data: p.visitor.config_data.clone(),
            }),
            collect_cycle: duration_millis(p.collect_cycle),
            report_cycle: duration_millis(p.report_cycle),
            report_to_cloud: p.report_to_cloud,
            push_method: p.db_method.as_ref().map(|name| PushMethodSpec {
                db_method: Some(name.clone()),
            }),
        })
        .collect();

    WireDevice {
        name: instance.id.name().to_string(),
        namespace: instance.id.namespace().to_string(),
        spec: DeviceSpec {
            device_model_reference: instance.model.clone(),
            protocol: ProtocolSpec {
                protocol_name: instance.protocol.protocol_name.clone(),
                config_data: instance.protocol.config_data.clone(),
            },
            properties,
            methods: instance
                .methods
                .iter()
                .map(|m| MethodSpec {
                    name: m.name.clone(),
                    description: m.description.clone(),
                    property_names: m.property_names.clone(),
                })
                .collect(),
        },
        status: WireDeviceStatus {
            twins: instance.twins.iter().map(wire_twin).collect(),
        },
    }
}

/// Converts a model.
#[must_use]
pub fn wire_model(model: &DeviceModel) -> WireDeviceModel {
    WireDeviceModel {
        name: model.id.name().to_string(),
        namespace: model.id.namespace().to_string(),
        description: model.description.clone(),
        spec: ModelSpec {
            properties: model
                .properties
                .iter()
                .map(|p| ModelPropertySpec {
                    name: p.name.clone(),
                    description: p.description.clone(),
                    data_type: p.data_type.as_str().to_string(),
                    access_mode: p.access_mode.as_str().to_string(),
                    minimum: p.minimum.clone().unwrap_or_default(),
                    maximum: p.maximum.clone().unwrap_or_default(),
                    unit: p.unit.clone().unwrap_or_default(),
                })
                .collect(),
        },
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_model_m1() -> WireDeviceModel {
        serde_json::from_value(json!({
            "name": "m1",
            "namespace": "default",
            "spec": {
                "properties": [
                    { "name": "temp", "type": "int", "accessMode": "ReadWrite",
                      "minimum": "0", "maximum": "100", "unit": "C" },
                    { "name": "label", "type": "string", "accessMode": "ReadOnly" }
                ]
            }
        }))
        .unwrap()
    }

    fn wire_dev1() -> WireDevice {
        serde_json::from_value(json!({
            "name": "dev1",
            "namespace": "default",
            "spec": {
                "deviceModelReference": "m1",
                "protocol": { "protocolName": "virtual", "configData": "{\"scope\":\"lab\"}" },
                "properties": [
                    { "name": "temp", "desired": { "value": "30" },
                      "visitors": { "protocolName": "virtual", "configData": { "register": "temp" } },
                      "collectCycle": 1000, "reportToCloud": true },
                    { "name": "label", "collectCycle": 0,
                      "pushMethod": { "dbMethod": "history" } }
                ],
                "methods": [ { "name": "SetProperty", "propertyNames": ["temp"] } ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn model_bounds_and_modes() {
        let model = device_model(&wire_model_m1()).unwrap();

        let temp = model.property("temp").unwrap();
        assert_eq!(temp.data_type, DataType::Int);
        assert_eq!(temp.access_mode, AccessMode::ReadWrite);
        assert_eq!(temp.minimum.as_deref(), Some("0"));
        assert_eq!(temp.unit.as_deref(), Some("C"));
        assert_eq!(model.property("label").unwrap().maximum, None);
    }

    #[test]
    fn model_without_name_is_invalid() {
        assert!(device_model(&WireDeviceModel::default()).is_err());
    }

    #[test]
    fn protocol_config_accepts_string_or_object() {
        let from_string = protocol_config(&ProtocolSpec {
            protocol_name: "virtual".to_string(),
            config_data: json!("{\"a\":1}"),
        })
        .unwrap();
        assert_eq!(from_string.config_data, json!({ "a": 1 }));

        let empty = protocol_config(&ProtocolSpec {
            protocol_name: "virtual".to_string(),
            config_data: Value::Null,
        })
        .unwrap();
        assert_eq!(empty.config_data, json!({}));

        assert!(
            protocol_config(&ProtocolSpec {
                protocol_name: "virtual".to_string(),
                config_data: json!("{oops"),
            })
            .is_err()
        );
        assert!(protocol_config(&ProtocolSpec::default()).is_err());
    }

    #[test]
    fn instance_derives_twins_from_desired_values() {
        let model = device_model(&wire_model_m1()).unwrap();

        let instance = device_instance(&wire_dev1(), &model).unwrap();

        assert_eq!(instance.protocol.config_data, json!({ "scope": "lab" }));
        assert_eq!(instance.twins.len(), 2);
        let temp = instance.twin("temp").unwrap();
        assert_eq!(temp.observed_desired.value, "30");
        assert_eq!(instance.property_of(temp).unwrap().collect_cycle, Duration::from_secs(1));
        assert!(instance.property("temp").unwrap().is_writable());
        assert_eq!(instance.methods[0].property_names, vec!["temp".to_string()]);
    }

    #[test]
    fn push_method_names_the_db_method() {
        let model = device_model(&wire_model_m1()).unwrap();
        let instance = device_instance(&wire_dev1(), &model).unwrap();

        assert_eq!(instance.property("label").unwrap().db_method.as_deref(), Some("history"));
        assert_eq!(instance.property("temp").unwrap().db_method, None);

        let wire = wire_device(&instance);
        let label = wire.spec.properties.iter().find(|p| p.name == "label").unwrap();
        assert_eq!(
            label.push_method.as_ref().and_then(|p| p.db_method.as_deref()),
            Some("history")
        );
        assert!(wire.spec.properties[0].push_method.is_none());
    }

    #[test]
    fn unbound_status_twins_are_rebuilt() {
        let model = device_model(&wire_model_m1()).unwrap();
        let mut wire = wire_dev1();
        wire.status.twins.push(WireTwin {
            property_name: "ghost".to_string(),
            ..WireTwin::default()
        });

        let instance = device_instance(&wire, &model).unwrap();

        assert!(instance.twin("ghost").is_none());
        assert!(instance.twins.iter().all(|t| t.property.is_some()));
        assert_eq!(instance.twin("temp").unwrap().observed_desired.value, "30");
    }

    #[test]
    fn wire_device_carries_twins() {
        let model = device_model(&wire_model_m1()).unwrap();
        let instance = device_instance(&wire_dev1(), &model).unwrap();

        let wire = wire_device(&instance);

        assert_eq!(wire.spec.device_model_reference, "m1");
        assert_eq!(wire.status.twins.len(), 2);
        assert_eq!(wire.spec.properties[0].collect_cycle, 1000);
        assert_eq!(wire.spec.properties[0].desired.as_ref().unwrap().value, "30");
    }

    #[test]
    fn twin_metadata_on_the_wire() {
        let twin = Twin::new("temp").with_reported(TwinValue {
            value: "30".to_string(),
            metadata: TwinMetadata {
                timestamp_ms: 1_700_000_000_000,
                value_type: "int".to_string(),
            },
        });

        let wire = wire_twin(&twin);

        assert_eq!(wire.reported.metadata["timestamp"], "1700000000000");
        assert_eq!(wire.reported.metadata["type"], "int");
        assert!(wire.observed_desired.metadata.is_empty());
    }
}
