// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device instances: properties, twins and methods of one device.

use std::time::Duration;

use serde::Serialize;

use super::{AccessMode, DataType, DeviceModel, ResourceId, Twin};

/// Protocol selection and opaque driver configuration for a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolConfig {
    /// Name of the driver handling this device.
    pub protocol_name: String,
    /// Driver-specific configuration.
    pub config_data: serde_json::Value,
}

impl ProtocolConfig {
    /// Creates a protocol configuration.
    #[must_use]
    pub fn new(protocol_name: impl Into<String>, config_data: serde_json::Value) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            config_data,
        }
    }
}

/// Per-property driver configuration telling the adapter where the value
/// lives on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VisitorConfig {
    /// Name of the driver this visitor is written for.
    pub protocol_name: String,
    /// Driver-specific configuration.
    pub config_data: serde_json::Value,
}

impl VisitorConfig {
    /// Creates a visitor configuration.
    #[must_use]
    pub fn new(protocol_name: impl Into<String>, config_data: serde_json::Value) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            config_data,
        }
    }
}

/// A property of a concrete device: the model's declaration resolved
/// together with the device's visitor and cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProperty {
    /// Property name.
    pub name: String,
    /// Where the adapter finds the value.
    pub visitor: VisitorConfig,
    /// Minimum delay between two sampling reads. Zero samples every cycle.
    pub collect_cycle: Duration,
    /// Reporting cadence requested by the cloud.
    pub report_cycle: Duration,
    /// Whether changes are reported to the edge core.
    pub report_to_cloud: bool,
    /// Declared type, from the model.
    pub data_type: DataType,
    /// Declared access mode, from the model.
    pub access_mode: AccessMode,
    /// Declared lower bound, from the model.
    pub minimum: Option<String>,
    /// Declared upper bound, from the model.
    pub maximum: Option<String>,
    /// Unit of measure, from the model.
    pub unit: Option<String>,
    /// Named database method recording this property's values, on top of
    /// the global sinks.
    pub db_method: Option<String>,
}

impl DeviceProperty {
    /// Creates a read-only string property reported to the cloud.
    #[must_use]
    pub fn new(name: impl Into<String>, visitor: VisitorConfig) -> Self {
        Self {
            name: name.into(),
            visitor,
            collect_cycle: Duration::ZERO,
            report_cycle: Duration::ZERO,
            report_to_cloud: true,
            data_type: DataType::String,
            access_mode: AccessMode::ReadOnly,
            minimum: None,
            maximum: None,
            unit: None,
            db_method: None,
        }
    }

    /// Creates a property whose declaration is taken from `model`.
    ///
    /// A property the model does not declare is kept as a read-only string,
    /// so it is sampled but never written.
    #[must_use]
    pub fn resolve(name: impl Into<String>, visitor: VisitorConfig, model: &DeviceModel) -> Self {
        let mut property = Self::new(name, visitor);
        match model.property(&property.name) {
            Some(declared) => {
                property.data_type = declared.data_type.clone();
                property.access_mode = declared.access_mode;
                property.minimum.clone_from(&declared.minimum);
                property.maximum.clone_from(&declared.maximum);
                property.unit.clone_from(&declared.unit);
            }
            None => {
                tracing::warn!(
                    model = %model.id,
                    property = %property.name,
                    "Property not declared by model, treating as read-only string"
                );
            }
        }
        property
    }

    /// Sets the sampling cadence.
    #[must_use]
    pub fn with_collect_cycle(mut self, collect_cycle: Duration) -> Self {
        self.collect_cycle = collect_cycle;
        self
    }

    /// Sets whether changes are reported upward.
    #[must_use]
    pub fn with_report_to_cloud(mut self, report_to_cloud: bool) -> Self {
        self.report_to_cloud = report_to_cloud;
        self
    }

    /// Records values through the named database method.
    #[must_use]
    pub fn with_db_method(mut self, db_method: impl Into<String>) -> Self {
        self.db_method = Some(db_method.into());
        self
    }

    /// Returns `true` if the property accepts desired values.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.access_mode == AccessMode::ReadWrite
    }
}

/// A named group of properties exposed for writing, e.g. `SetProperty`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceMethod {
    /// Method name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Properties the method writes.
    pub property_names: Vec<String>,
}

/// Everything the mapper knows about one device.
///
/// # Examples
///
/// ```
/// use edge_mapper::model::{
///     DeviceInstance, DeviceModel, DeviceProperty, ProtocolConfig, ResourceId, VisitorConfig,
/// };
///
/// let model = DeviceModel::new(ResourceId::new("default", "sensor"));
/// let mut instance = DeviceInstance::new(
///     ResourceId::new("default", "dev1"),
///     "sensor",
///     ProtocolConfig::new("virtual", serde_json::json!({})),
/// )
/// .with_property(DeviceProperty::resolve("level", VisitorConfig::default(), &model));
///
/// // Twins are derived from properties on demand
/// assert!(instance.ensure_twins());
/// assert_eq!(instance.twins[0].property, Some(0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInstance {
    /// Device identity.
    pub id: ResourceId,
    /// Name of the device model in the device's namespace.
    pub model: String,
    /// Driver selection.
    pub protocol: ProtocolConfig,
    /// Resolved properties.
    pub properties: Vec<DeviceProperty>,
    /// Twins, each bound to one property.
    pub twins: Vec<Twin>,
    /// Writable methods.
    pub methods: Vec<DeviceMethod>,
}

impl DeviceInstance {
    /// Creates an instance without properties.
    #[must_use]
    pub fn new(id: ResourceId, model: impl Into<String>, protocol: ProtocolConfig) -> Self {
        Self {
            id,
            model: model.into(),
            protocol,
            properties: Vec::new(),
            twins: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Appends a property.
    #[must_use]
    pub fn with_property(mut self, property: DeviceProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Appends a twin. Call [`rebind_twins`](Self::rebind_twins) afterwards.
    #[must_use]
    pub fn with_twin(mut self, twin: Twin) -> Self {
        self.twins.push(twin);
        self
    }

    /// Appends a method.
    #[must_use]
    pub fn with_method(mut self, method: DeviceMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Returns the model identity, which lives in the device's namespace.
    #[must_use]
    pub fn model_id(&self) -> ResourceId {
        ResourceId::new(self.id.namespace(), self.model.clone())
    }

    /// Returns the position of a property.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Returns a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&DeviceProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns the property a twin is bound to.
    #[must_use]
    pub fn property_of(&self, twin: &Twin) -> Option<&DeviceProperty> {
        twin.property
            .and_then(|index| self.properties.get(index))
            .filter(|p| p.name == twin.property_name)
    }

    /// Returns the twin of a property.
    #[must_use]
    pub fn twin(&self, property_name: &str) -> Option<&Twin> {
        self.twins.iter().find(|t| t.property_name == property_name)
    }

    /// Returns the twin of a property for modification.
    pub fn twin_mut(&mut self, property_name: &str) -> Option<&mut Twin> {
        self.twins
            .iter_mut()
            .find(|t| t.property_name == property_name)
    }

    /// Points every twin at the property with its name.
    ///
    /// Returns the number of twins left unbound because no such property
    /// exists.
    pub fn rebind_twins(&mut self) -> usize {
        let mut unbound = 0;
        for twin in &mut self.twins {
            twin.property = self
                .properties
                .iter()
                .position(|p| p.name == twin.property_name);
            if twin.property.is_none() {
                unbound += 1;
            }
        }
        unbound
    }

    /// Rebuilds twins from properties when the set is empty or a twin cannot
    /// be bound. Existing desired and reported values are kept by name.
    ///
    /// Returns `true` if the twin set was rebuilt.
    pub fn ensure_twins(&mut self) -> bool {
        if !self.twins.is_empty() && self.rebind_twins() == 0 {
            return false;
        }

        let mut previous = std::mem::take(&mut self.twins);
        self.twins = self
            .properties
            .iter()
            .enumerate()
            .map(|(index, property)| {
                let mut twin = previous
                    .iter()
                    .position(|t| t.property_name == property.name)
                    .map_or_else(|| Twin::new(&property.name), |pos| previous.swap_remove(pos));
                twin.property = Some(index);
                twin
            })
            .collect();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelProperty, TwinValue};

    fn instance_with(names: &[&str]) -> DeviceInstance {
        let model = DeviceModel::new(ResourceId::new("default", "m1"));
        names.iter().fold(
            DeviceInstance::new(
                ResourceId::new("default", "dev1"),
                "m1",
                ProtocolConfig::new("virtual", serde_json::Value::Null),
            ),
            |instance, name| {
                instance.with_property(DeviceProperty::resolve(
                    *name,
                    VisitorConfig::default(),
                    &model,
                ))
            },
        )
    }

    #[test]
    fn resolve_copies_model_declaration() {
        let model = DeviceModel::new(ResourceId::new("default", "m1")).with_property(
            ModelProperty::new("temp", DataType::Int)
                .with_access_mode(AccessMode::ReadWrite)
                .with_range("0", "100")
                .with_unit("C"),
        );
        let property = DeviceProperty::resolve("temp", VisitorConfig::default(), &model);

        assert_eq!(property.data_type, DataType::Int);
        assert!(property.is_writable());
        assert_eq!(property.maximum.as_deref(), Some("100"));
        assert_eq!(property.unit.as_deref(), Some("C"));
    }

    #[test]
    fn resolve_unknown_property_is_read_only_string() {
        let model = DeviceModel::new(ResourceId::new("default", "m1"));
        let property = DeviceProperty::resolve("ghost", VisitorConfig::default(), &model);

        assert_eq!(property.data_type, DataType::String);
        assert!(!property.is_writable());
    }

    #[test]
    fn ensure_twins_derives_from_properties() {
        let mut instance = instance_with(&["a", "b"]);

        assert!(instance.ensure_twins());
        let names: Vec<_> = instance.twins.iter().map(|t| t.property_name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(instance.twins[1].property, Some(1));
    }

    #[test]
    fn ensure_twins_keeps_bound_set() {
        let mut instance = instance_with(&["a"]).with_twin(Twin::new("a"));

        assert!(!instance.ensure_twins());
        assert_eq!(instance.twins[0].property, Some(0));
    }

    #[test]
    fn ensure_twins_repairs_dangling_twin_and_keeps_values() {
        let mut instance = instance_with(&["a", "b"])
            .with_twin(Twin::new("b").with_desired(TwinValue::now("7", "string")))
            .with_twin(Twin::new("gone"));

        assert!(instance.ensure_twins());
        assert_eq!(instance.twins.len(), 2);
        let b = instance.twin("b").unwrap();
        assert_eq!(b.property, Some(1));
        assert_eq!(b.observed_desired.value, "7");
        assert!(instance.twin("gone").is_none());
    }

    #[test]
    fn rebind_follows_property_reordering() {
        let mut instance = instance_with(&["a", "b"]);
        instance.ensure_twins();
        instance.properties.reverse();

        assert_eq!(instance.rebind_twins(), 0);
        let a = instance.twin("a").unwrap();
        assert_eq!(a.property, Some(1));
        assert_eq!(instance.property_of(a).unwrap().name, "a");
    }

    #[test]
    fn property_of_rejects_stale_index() {
        let mut instance = instance_with(&["a", "b"]);
        instance.ensure_twins();
        instance.properties.reverse();

        let a = instance.twin("a").unwrap();
        assert!(instance.property_of(a).is_none());
    }
}
