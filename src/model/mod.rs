// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared data model: identities, device models, device instances and twins.
//!
//! These types are plain data. Runtime behavior (workers, adapters, locking)
//! lives in [`crate::device`]; conversion from the wire representation lives
//! in [`crate::sync`].

mod device_model;
mod instance;
mod resource_id;
mod twin;

pub use device_model::{AccessMode, DataType, DeviceModel, ModelProperty};
pub use instance::{DeviceInstance, DeviceMethod, DeviceProperty, ProtocolConfig, VisitorConfig};
pub use resource_id::ResourceId;
pub use twin::{Twin, TwinMetadata, TwinValue};
