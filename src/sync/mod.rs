// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronization with the edge core over Unix domain sockets.
//!
//! Both directions use the same framing: a 4-byte big-endian length followed
//! by a JSON document. A call is one [`RequestFrame`] answered by one
//! [`ResponseFrame`] carrying the same id.
//!
//! - [`SyncClient`] registers the mapper and reports device state to the
//!   core.
//! - [`SyncServer`] receives device and model management calls from the core
//!   and applies them through a [`SyncHandler`].

mod client;
mod codec;
pub mod convert;
mod handler;
mod message;
mod server;

pub use client::{REGISTER_DEADLINE, REPORT_DEADLINE, SyncClient};
pub use codec::{ClientCodec, JsonFrameCodec, ServerCodec};
pub use handler::SyncHandler;
pub use message::{
    DeviceNameResult, DeviceParams, DeviceSpec, GetDeviceResult, MapperInfo, MethodSpec,
    ModelNameResult, ModelParams, ModelPropertySpec, ModelSpec, PropertySpec, ProtocolSpec,
    PushMethodSpec, RegisterParams, RegisterResult, ReportStatesParams, ReportStatusParams, Request,
    RequestFrame, ResourceRef, ResponseFrame, StatusCode, VisitorSpec, WireDevice,
    WireDeviceModel, WireDeviceStatus, WireTwin, WireTwinValue,
};
pub use server::SyncServer;
