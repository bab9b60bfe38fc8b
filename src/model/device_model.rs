// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device models: the typed property schema shared by devices.

use std::fmt;

use super::ResourceId;

/// Declared data type of a model property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// Double precision number, validated like [`DataType::Float`].
    Double,
    /// Boolean, canonically `"true"` or `"false"`.
    Boolean,
    /// Free text.
    String,
    /// Opaque bytes carried as text.
    Bytes,
    /// Any other declared type, handled as free text.
    Other(String),
}

impl DataType {
    /// Parses a declared type name. Matching is case-insensitive and never
    /// fails: unknown names are kept in [`DataType::Other`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "int32" | "int64" => Self::Int,
            "float" | "float32" => Self::Float,
            "double" | "float64" => Self::Double,
            "boolean" | "bool" => Self::Boolean,
            "string" | "" => Self::String,
            "bytes" => Self::Bytes,
            _ => Self::Other(name.trim().to_string()),
        }
    }

    /// Returns the canonical name used on the wire and in twin metadata.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Other(name) => name,
        }
    }

    /// Returns `true` for types that carry a numeric range.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a property accepts desired values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Telemetry only.
    #[default]
    ReadOnly,
    /// Accepts writes of desired values.
    ReadWrite,
}

impl AccessMode {
    /// Parses an access mode. Anything that is not recognizably read-write
    /// is read-only.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "readwrite" | "read_write" | "rw" => Self::ReadWrite,
            _ => Self::ReadOnly,
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "ReadOnly",
            Self::ReadWrite => "ReadWrite",
        }
    }
}

/// One property of a device model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProperty {
    /// Property name, unique within the model.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Declared type.
    pub data_type: DataType,
    /// Declared access mode.
    pub access_mode: AccessMode,
    /// Inclusive lower bound for numeric types.
    pub minimum: Option<String>,
    /// Inclusive upper bound for numeric types.
    pub maximum: Option<String>,
    /// Unit of measure.
    pub unit: Option<String>,
}

impl ModelProperty {
    /// Creates a read-only property of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            data_type,
            access_mode: AccessMode::ReadOnly,
            minimum: None,
            maximum: None,
            unit: None,
        }
    }

    /// Sets the access mode.
    #[must_use]
    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// Sets both range bounds.
    #[must_use]
    pub fn with_range(mut self, minimum: impl Into<String>, maximum: impl Into<String>) -> Self {
        self.minimum = Some(minimum.into());
        self.maximum = Some(maximum.into());
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A device model as delivered by the edge core.
///
/// # Examples
///
/// ```
/// use edge_mapper::model::{AccessMode, DataType, DeviceModel, ModelProperty, ResourceId};
///
/// let model = DeviceModel::new(ResourceId::new("default", "thermostat"))
///     .with_property(
///         ModelProperty::new("temp", DataType::Int)
///             .with_access_mode(AccessMode::ReadWrite)
///             .with_range("0", "100"),
///     );
///
/// assert!(model.property("temp").is_some());
/// assert!(model.property("humidity").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceModel {
    /// Model identity.
    pub id: ResourceId,
    /// Free-text description.
    pub description: String,
    /// Ordered property schema.
    pub properties: Vec<ModelProperty>,
}

impl DeviceModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            description: String::new(),
            properties: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a property.
    #[must_use]
    pub fn with_property(mut self, property: ModelProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&ModelProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_parse_is_case_insensitive() {
        assert_eq!(DataType::parse("INT"), DataType::Int);
        assert_eq!(DataType::parse("Boolean"), DataType::Boolean);
        assert_eq!(DataType::parse(" double "), DataType::Double);
    }

    #[test]
    fn unknown_data_type_is_preserved() {
        let ty = DataType::parse("geo-point");
        assert_eq!(ty, DataType::Other("geo-point".to_string()));
        assert_eq!(ty.as_str(), "geo-point");
        assert!(!ty.is_numeric());
    }

    #[test]
    fn access_mode_defaults_to_read_only() {
        assert_eq!(AccessMode::parse("ReadWrite"), AccessMode::ReadWrite);
        assert_eq!(AccessMode::parse("ReadOnly"), AccessMode::ReadOnly);
        assert_eq!(AccessMode::parse(""), AccessMode::ReadOnly);
        assert_eq!(AccessMode::parse("writeonly"), AccessMode::ReadOnly);
    }
}
