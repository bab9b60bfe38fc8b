// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Namespaced identity of devices and device models.

use std::fmt;
use std::str::FromStr;

/// Identity of a device or a device model: `namespace/name`.
///
/// A *short* identity carries only a name. It never names a registered
/// resource; it is accepted by lookups as a convenience and matches the
/// first resource with that name in any namespace.
///
/// # Examples
///
/// ```
/// use edge_mapper::model::ResourceId;
///
/// let id: ResourceId = "plant/boiler".parse().unwrap();
/// assert_eq!(id.namespace(), "plant");
/// assert_eq!(id.name(), "boiler");
/// assert_eq!(id.to_string(), "plant/boiler");
///
/// let short = ResourceId::short("boiler");
/// assert!(short.is_short());
/// assert!(short.matches(&id));
///
/// // Resources coming from the core without a namespace land in `default`
/// assert_eq!(ResourceId::new("", "pump").to_string(), "default/pump");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    namespace: String,
    name: String,
}

impl ResourceId {
    /// Namespace assigned to resources that arrive without one.
    pub const DEFAULT_NAMESPACE: &'static str = "default";

    /// Creates a full identity. An empty namespace becomes
    /// [`DEFAULT_NAMESPACE`](Self::DEFAULT_NAMESPACE).
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                Self::DEFAULT_NAMESPACE.to_string()
            } else {
                namespace
            },
            name: name.into(),
        }
    }

    /// Creates a name-only identity used for fallback lookups.
    #[must_use]
    pub fn short(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Returns the namespace, empty for short identities.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if this identity has no namespace.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Returns `true` if `other` is the resource this identity designates.
    ///
    /// Full identities must be equal. A short identity matches any resource
    /// with the same name.
    #[must_use]
    pub fn matches(&self, other: &ResourceId) -> bool {
        if self.is_short() {
            self.name == other.name
        } else {
            self == other
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_short() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ResourceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::short(s),
        })
    }
}
