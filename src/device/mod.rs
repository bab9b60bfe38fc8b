// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Managed devices and the registry that owns them.
//!
//! A [`Device`] couples a [`DeviceInstance`](crate::model::DeviceInstance)
//! with a protocol client, a status and a worker task running the
//! reconciliation cycle. The [`DeviceManager`] keeps devices and models by
//! [`ResourceId`](crate::model::ResourceId) and hands out `Arc<Device>`
//! handles.
//!
//! # Lifecycle
//!
//! ```text
//! Unknown ──start ok──▶ Online ◀──health ok── Offline
//!    │                    │                      ▲
//!    └────start failed────┼──────────────────────┘
//!                         └─stop / health failed / threshold─▶ Offline
//! any ──free──▶ Freed
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use edge_mapper::device::{DeviceContext, DeviceManager, DeviceSettings};
//! use edge_mapper::driver::DriverRegistry;
//! use edge_mapper::model::{DeviceInstance, DeviceModel, ProtocolConfig, ResourceId};
//!
//! # async fn example() -> edge_mapper::Result<()> {
//! let manager = DeviceManager::new(
//!     DriverRegistry::with_builtin(),
//!     DeviceContext::new(DeviceSettings::default()),
//! );
//!
//! let model = DeviceModel::new(ResourceId::new("default", "thermometer"));
//! let instance = DeviceInstance::new(
//!     ResourceId::new("default", "dev1"),
//!     "thermometer",
//!     ProtocolConfig::new("virtual", serde_json::json!({})),
//! );
//! let device = manager.upsert(model, instance).await?;
//! println!("{} is {}", device.id(), device.status());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod managed_device;
mod manager;
mod settings;
mod status;

pub use managed_device::Device;
pub use manager::{DeviceManager, MethodInfo, MethodParameter, TwinResult};
pub use settings::{DeviceContext, DeviceSettings};
pub use status::DeviceStatus;
