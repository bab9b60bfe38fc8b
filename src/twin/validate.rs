// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Desired-value validation and value normalization.

use crate::error::ValidationError;
use crate::model::{DataType, DeviceProperty};

/// Checks a desired value against the property's declared type and range.
///
/// Integers must parse completely, floats must be finite numbers and
/// booleans must be one of `true`, `false`, `1`, `0` (any case). For numeric
/// types each declared bound is enforced inclusively when present. Other
/// types accept any text.
///
/// # Errors
///
/// Returns the first rule the value breaks.
///
/// # Examples
///
/// ```
/// use edge_mapper::model::{AccessMode, DataType, DeviceModel, DeviceProperty,
///     ModelProperty, ResourceId, VisitorConfig};
/// use edge_mapper::twin::validate;
///
/// let model = DeviceModel::new(ResourceId::new("default", "m1")).with_property(
///     ModelProperty::new("temp", DataType::Int)
///         .with_access_mode(AccessMode::ReadWrite)
///         .with_range("0", "100"),
/// );
/// let temp = DeviceProperty::resolve("temp", VisitorConfig::default(), &model);
///
/// assert!(validate(&temp, "42").is_ok());
/// assert!(validate(&temp, "150").is_err());
/// assert!(validate(&temp, "abc").is_err());
/// ```
pub fn validate(property: &DeviceProperty, value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    let number = match property.data_type {
        DataType::Int => {
            let parsed: i64 = trimmed.parse().map_err(|_| ValidationError::NotAnInteger {
                value: value.to_string(),
            })?;
            int_as_f64(parsed)
        }
        DataType::Float | DataType::Double => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| ValidationError::NotANumber {
                value: value.to_string(),
            })?,
        DataType::Boolean => {
            return parse_boolean(trimmed).map(|_| ()).ok_or_else(|| {
                ValidationError::NotABoolean {
                    value: value.to_string(),
                }
            });
        }
        DataType::String | DataType::Bytes | DataType::Other(_) => return Ok(()),
    };

    check_range(property, value, number)
}

fn check_range(property: &DeviceProperty, value: &str, number: f64) -> Result<(), ValidationError> {
    let minimum = bound(property.minimum.as_deref())?;
    let maximum = bound(property.maximum.as_deref())?;

    let below = minimum.is_some_and(|min| number < min);
    let above = maximum.is_some_and(|max| number > max);
    if below || above {
        return Err(ValidationError::OutOfRange {
            value: value.to_string(),
            minimum: property.minimum.clone(),
            maximum: property.maximum.clone(),
        });
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn int_as_f64(value: i64) -> f64 {
    value as f64
}

fn bound(raw: Option<&str>) -> Result<Option<f64>, ValidationError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ValidationError::InvalidBound {
                bound: text.to_string(),
            }),
    }
}

fn parse_boolean(value: &str) -> Option<bool> {
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Canonicalizes a raw boolean reading: `1` and `true` in any case become
/// `"true"`, everything else becomes `"false"`.
///
/// # Examples
///
/// ```
/// use edge_mapper::twin::normalize_boolean;
///
/// assert_eq!(normalize_boolean("TRUE"), "true");
/// assert_eq!(normalize_boolean("1"), "true");
/// assert_eq!(normalize_boolean("yes"), "false");
/// ```
#[must_use]
pub fn normalize_boolean(raw: &str) -> &'static str {
    let raw = raw.trim();
    if raw == "1" || raw.eq_ignore_ascii_case("true") {
        "true"
    } else {
        "false"
    }
}

/// Normalizes a value read from a device before it is compared with or
/// stored as the reported value.
#[must_use]
pub fn normalize_reading(data_type: &DataType, raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match data_type {
        DataType::Boolean => normalize_boolean(&text).to_string(),
        DataType::Bytes => text.into_owned(),
        _ => text.trim().to_string(),
    }
}

/// Converts a validated desired value into what the adapter expects on the
/// wire.
#[must_use]
pub fn to_wire(data_type: &DataType, value: &str) -> String {
    match data_type {
        DataType::Boolean => normalize_boolean(value).to_string(),
        DataType::Int | DataType::Float | DataType::Double => value.trim().to_string(),
        DataType::String | DataType::Bytes | DataType::Other(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccessMode, DeviceModel, ModelProperty, ResourceId, VisitorConfig};

    fn property(data_type: DataType, range: Option<(&str, &str)>) -> DeviceProperty {
        let mut declared = ModelProperty::new("p", data_type).with_access_mode(AccessMode::ReadWrite);
        if let Some((min, max)) = range {
            declared = declared.with_range(min, max);
        }
        let model = DeviceModel::new(ResourceId::new("default", "m")).with_property(declared);
        DeviceProperty::resolve("p", VisitorConfig::default(), &model)
    }

    #[test]
    fn int_range_is_enforced() {
        let p = property(DataType::Int, Some(("0", "100")));

        assert!(validate(&p, "42").is_ok());
        assert!(validate(&p, "0").is_ok());
        assert!(validate(&p, "100").is_ok());
        assert!(matches!(
            validate(&p, "150"),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            validate(&p, "-1"),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn int_must_parse_completely() {
        let p = property(DataType::Int, None);

        assert!(matches!(
            validate(&p, "abc"),
            Err(ValidationError::NotAnInteger { .. })
        ));
        assert!(validate(&p, "12abc").is_err());
        assert!(validate(&p, "4.5").is_err());
        assert!(validate(&p, " 12 ").is_ok());
    }

    #[test]
    fn float_accepts_decimals_and_rejects_nan() {
        let p = property(DataType::Float, Some(("-1.5", "1.5")));

        assert!(validate(&p, "1.25").is_ok());
        assert!(validate(&p, "1.75").is_err());
        assert!(validate(&p, "NaN").is_err());
        assert!(validate(&p, "inf").is_err());
    }

    #[test]
    fn single_bound_is_enforced() {
        let mut p = property(DataType::Double, None);
        p.minimum = Some("10".to_string());

        assert!(validate(&p, "9").is_err());
        assert!(validate(&p, "1e6").is_ok());
    }

    #[test]
    fn malformed_bound_is_reported() {
        let mut p = property(DataType::Int, None);
        p.maximum = Some("lots".to_string());

        assert_eq!(
            validate(&p, "1"),
            Err(ValidationError::InvalidBound {
                bound: "lots".to_string()
            })
        );
    }

    #[test]
    fn boolean_accepts_four_spellings() {
        let p = property(DataType::Boolean, None);

        for ok in ["true", "FALSE", "1", "0"] {
            assert!(validate(&p, ok).is_ok(), "{ok} should be accepted");
        }
        assert!(validate(&p, "yes").is_err());
    }

    #[test]
    fn string_accepts_anything() {
        let p = property(DataType::String, Some(("0", "1")));
        assert!(validate(&p, "whatever 99").is_ok());
    }

    #[test]
    fn boolean_normalization() {
        assert_eq!(normalize_boolean("1"), "true");
        assert_eq!(normalize_boolean("true"), "true");
        assert_eq!(normalize_boolean("TRUE"), "true");
        assert_eq!(normalize_boolean("0"), "false");
        assert_eq!(normalize_boolean("on"), "false");
        assert_eq!(normalize_boolean(""), "false");
    }

    #[test]
    fn readings_are_trimmed_except_bytes() {
        assert_eq!(normalize_reading(&DataType::Int, b" 42\n"), "42");
        assert_eq!(normalize_reading(&DataType::Boolean, b"1\n"), "true");
        assert_eq!(normalize_reading(&DataType::Bytes, b" raw "), " raw ");
    }

    #[test]
    fn wire_form_canonicalizes_booleans() {
        assert_eq!(to_wire(&DataType::Boolean, "1"), "true");
        assert_eq!(to_wire(&DataType::Boolean, "False"), "false");
        assert_eq!(to_wire(&DataType::Int, " 7 "), "7");
        assert_eq!(to_wire(&DataType::String, " 7 "), " 7 ");
    }
}
