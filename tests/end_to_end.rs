// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Full mapper against a fake edge core.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use common::{FakeCore, RecordingSink, eventually, wire_device, wire_model};
use edge_mapper::app::Mapper;
use edge_mapper::config::Config;
use edge_mapper::device::DeviceStatus;
use edge_mapper::driver::{DriverRegistry, HealthState, VirtualBus, VirtualDriver};
use edge_mapper::model::ResourceId;
use edge_mapper::sink::SinkSet;
use edge_mapper::sync::{
    ClientCodec, GetDeviceResult, Request, RequestFrame, ResourceRef, StatusCode,
};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.grpc_server.socket_path = dir.join("mapper.sock");
    config.common.edgecore_sock = dir.join("core.sock");
    config.common.http_port = 0;
    config.runtime.cycle_interval_ms = 20;
    config.runtime.health_interval_ms = 50;
    config.runtime.adapter_timeout_ms = 500;
    config.runtime.grace_period_ms = 500;
    config
}

fn mapper(dir: &Path, bus: &Arc<VirtualBus>, sink: &RecordingSink) -> Mapper {
    let drivers = DriverRegistry::new().with_driver(VirtualDriver::with_bus(Arc::clone(bus)));
    let sinks = SinkSet::new().with_sink(sink.clone());
    Mapper::new(test_config(dir), drivers, sinks)
}

async fn get_device(socket: &Path, name: &str) -> GetDeviceResult {
    let stream = UnixStream::connect(socket).await.unwrap();
    let mut framed = Framed::new(stream, ClientCodec::new());
    framed
        .send(RequestFrame::new(Request::GetDevice(ResourceRef {
            namespace: "default".to_string(),
            name: name.to_string(),
        })))
        .await
        .unwrap();

    let response = framed.next().await.unwrap().unwrap();
    assert_eq!(response.code, StatusCode::Ok, "{}", response.message);
    serde_json::from_value(response.result.unwrap()).unwrap()
}

#[tokio::test]
async fn desired_value_reaches_device_core_and_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let core = FakeCore::start(
        dir.path(),
        vec![wire_device("dev1", "m1", Some("30"))],
        vec![wire_model("m1")],
    );
    let bus = Arc::new(VirtualBus::new());
    let sink = RecordingSink::default();
    let mapper = mapper(dir.path(), &bus, &sink);

    mapper.start().await.unwrap();

    let device = mapper.manager().get(&ResourceId::new("default", "dev1")).unwrap();
    assert_eq!(device.status(), DeviceStatus::Online);

    assert!(eventually(WAIT, || bus.get("dev1/temp").as_deref() == Some("30")).await);
    assert!(eventually(WAIT, || sink.has_value("dev1", "temp", "30")).await);
    assert!(eventually(WAIT, || core.saw_reported("dev1", "temp", "30")).await);
    assert!(eventually(WAIT, || core.saw_state("dev1", "ok")).await);

    let fetched = get_device(&mapper.config().grpc_server.socket_path, "dev1").await;
    let twin = fetched
        .device
        .status
        .twins
        .iter()
        .find(|t| t.property_name == "temp")
        .unwrap();
    assert_eq!(twin.reported.value, "30");
    assert_eq!(twin.observed_desired.value, "30");

    mapper.shutdown().await;
}

#[tokio::test]
async fn registration_is_the_first_call() {
    let dir = tempfile::tempdir().unwrap();
    let core = FakeCore::start(dir.path(), Vec::new(), Vec::new());
    let bus = Arc::new(VirtualBus::new());
    let mapper = mapper(dir.path(), &bus, &RecordingSink::default());

    mapper.start().await.unwrap();

    let requests = core.requests();
    match requests.first() {
        Some(Request::MapperRegister(params)) => {
            assert!(params.with_data);
            assert_eq!(params.mapper.name, "edge-mapper");
            assert_eq!(params.mapper.protocol, "virtual");
        }
        other => panic!("expected registration, got {other:?}"),
    }
    assert!(mapper.manager().is_empty());

    mapper.shutdown().await;
}

#[tokio::test]
async fn devices_with_unknown_models_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let _core = FakeCore::start(
        dir.path(),
        vec![
            wire_device("dev1", "m1", None),
            wire_device("orphan", "missing", None),
        ],
        vec![wire_model("m1")],
    );
    let bus = Arc::new(VirtualBus::new());
    let mapper = mapper(dir.path(), &bus, &RecordingSink::default());

    mapper.start().await.unwrap();

    assert_eq!(mapper.manager().ids(), vec![ResourceId::new("default", "dev1")]);

    mapper.shutdown().await;
}

#[tokio::test]
async fn start_fails_without_core() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(VirtualBus::new());
    let mapper = mapper(dir.path(), &bus, &RecordingSink::default());

    let err = mapper.start().await.unwrap_err();

    assert!(matches!(err, edge_mapper::Error::Sync(_)));
    assert!(!mapper.config().grpc_server.socket_path.exists());
}

#[tokio::test]
async fn shutdown_releases_devices_and_socket() {
    let dir = tempfile::tempdir().unwrap();
    let _core = FakeCore::start(
        dir.path(),
        vec![wire_device("dev1", "m1", None), wire_device("dev2", "m1", None)],
        vec![wire_model("m1")],
    );
    let bus = Arc::new(VirtualBus::new());
    let mapper = mapper(dir.path(), &bus, &RecordingSink::default());
    mapper.start().await.unwrap();
    assert_eq!(bus.open_handles(), 2);
    let socket = mapper.config().grpc_server.socket_path.clone();
    assert!(socket.exists());

    mapper.shutdown().await;
    mapper.shutdown().await;

    assert_eq!(bus.open_handles(), 0);
    assert!(mapper.manager().is_shut_down());
    assert!(mapper.manager().is_empty());
    assert!(!socket.exists());
}

#[tokio::test]
async fn final_status_changes_reach_the_core() {
    let dir = tempfile::tempdir().unwrap();
    let core = FakeCore::start(
        dir.path(),
        vec![wire_device("dev1", "m1", None)],
        vec![wire_model("m1")],
    );
    let bus = Arc::new(VirtualBus::new());
    let mapper = mapper(dir.path(), &bus, &RecordingSink::default());
    mapper.start().await.unwrap();
    assert!(eventually(WAIT, || core.saw_state("dev1", "ok")).await);
    assert!(!core.saw_state("dev1", "offline"));

    mapper.shutdown().await;

    assert!(core.saw_state("dev1", "offline"));
}

#[tokio::test]
async fn offline_device_recovers_through_health_checks() {
    let dir = tempfile::tempdir().unwrap();
    let core = FakeCore::start(
        dir.path(),
        vec![wire_device("dev1", "m1", None)],
        vec![wire_model("m1")],
    );
    let bus = Arc::new(VirtualBus::new());
    let mapper = mapper(dir.path(), &bus, &RecordingSink::default());
    mapper.start().await.unwrap();
    let device = mapper.manager().get(&ResourceId::new("default", "dev1")).unwrap();

    bus.set_health(HealthState::Unhealthy);
    assert!(eventually(WAIT, || device.status() == DeviceStatus::Offline).await);
    assert!(eventually(WAIT, || core.saw_state("dev1", "offline")).await);

    bus.set_health(HealthState::Healthy);
    assert!(eventually(WAIT, || device.status() == DeviceStatus::Online).await);

    mapper.shutdown().await;
}
