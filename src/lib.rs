// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Edge Mapper - keeps physical devices in sync with their digital twins.
//!
//! A mapper sits between an edge core, which holds device definitions and
//! desired state, and the devices themselves. For every device it runs a
//! reconciliation loop: read each property through a protocol adapter,
//! record the reported value, and write desired values that differ.
//!
//! # Components
//!
//! - [`model`]: device models, instances and twins
//! - [`twin`]: value validation and the reconciliation cycle
//! - [`driver`]: the [`ProtocolClient`](driver::ProtocolClient) seam and
//!   the built-in adapters
//! - [`device`]: per-device lifecycle and the [`DeviceManager`](device::DeviceManager)
//! - [`sync`]: registration and management calls exchanged with the core
//! - [`api`]: HTTP endpoints for reading and writing devices
//! - [`sink`]: telemetry push to logs, HTTP collectors and MQTT brokers
//! - [`app`]: the [`Mapper`](app::Mapper) wiring it all together
//!
//! # Quick Start
//!
//! ```no_run
//! use edge_mapper::device::{DeviceContext, DeviceManager, DeviceSettings};
//! use edge_mapper::driver::DriverRegistry;
//! use edge_mapper::model::{
//!     AccessMode, DataType, DeviceInstance, DeviceModel, DeviceProperty, ModelProperty,
//!     ProtocolConfig, ResourceId, VisitorConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> edge_mapper::Result<()> {
//!     let manager = DeviceManager::new(
//!         DriverRegistry::with_builtin(),
//!         DeviceContext::new(DeviceSettings::default()),
//!     );
//!
//!     let model = DeviceModel::new(ResourceId::new("default", "thermo")).with_property(
//!         ModelProperty::new("temp", DataType::Int).with_access_mode(AccessMode::ReadWrite),
//!     );
//!     let visitor = VisitorConfig::new("virtual", json!({ "register": "temp" }));
//!     let instance = DeviceInstance::new(
//!         ResourceId::new("default", "dev1"),
//!         "thermo",
//!         ProtocolConfig::new("virtual", json!({})),
//!     )
//!     .with_property(DeviceProperty::resolve("temp", visitor, &model));
//!
//!     manager.upsert(model, instance).await?;
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod event;
pub mod model;
pub mod sink;
pub mod sync;
pub mod twin;

pub use error::{Error, Result};
