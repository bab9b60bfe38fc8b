// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the HTTP API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use common::{eventually, wire_device, wire_model};
use edge_mapper::api::{ApiServer, router};
use edge_mapper::device::{DeviceContext, DeviceManager, DeviceSettings};
use edge_mapper::driver::{DriverRegistry, VirtualBus, VirtualDriver};
use edge_mapper::model::ResourceId;
use edge_mapper::sync::convert;

async fn manager_with_device(bus: &Arc<VirtualBus>) -> Arc<DeviceManager> {
    let drivers = DriverRegistry::new().with_driver(VirtualDriver::with_bus(Arc::clone(bus)));
    let settings = DeviceSettings::default().with_cycle_interval(Duration::from_millis(20));
    let manager = Arc::new(DeviceManager::new(drivers, DeviceContext::new(settings)));

    let model = convert::device_model(&wire_model("m1")).unwrap();
    let instance = convert::device_instance(&wire_device("dev1", "m1", None), &model).unwrap();
    let device = manager.upsert(model, instance).await.unwrap();
    assert!(
        eventually(Duration::from_secs(5), || device
            .twin("temp")
            .is_some_and(|t| t.reported.value == "20"))
        .await
    );
    manager
}

async fn send(manager: &Arc<DeviceManager>, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router(Arc::clone(manager)).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn ping_answers_pong() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (status, body) = send(&manager, Method::GET, "/api/v1/ping").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "pong");
    assert_eq!(body["apiVersion"], "v1");
    assert_eq!(body["statusCode"], 200);
    manager.shutdown().await;
}

#[tokio::test]
async fn property_returns_reported_value_and_type() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (status, body) = send(&manager, Method::GET, "/api/v1/device/default/dev1/temp").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "20");
    assert_eq!(body["data"]["dataType"], "int");
    manager.shutdown().await;
}

#[tokio::test]
async fn unknown_device_and_property_are_not_found() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (device, body) = send(&manager, Method::GET, "/api/v1/device/default/ghost/temp").await;
    let (property, _) = send(&manager, Method::GET, "/api/v1/device/default/dev1/pressure").await;

    assert_eq!(device, StatusCode::NOT_FOUND);
    assert_eq!(body["statusCode"], 404);
    assert!(body["message"].as_str().unwrap().contains("ghost"));
    assert!(body.get("data").is_none());
    assert_eq!(property, StatusCode::NOT_FOUND);
    manager.shutdown().await;
}

#[tokio::test]
async fn methods_list_parameters() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (status, body) = send(&manager, Method::GET, "/api/v1/devicemethod/default/dev1").await;

    assert_eq!(status, StatusCode::OK);
    let methods = body["data"]["methods"].as_array().unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0]["name"], "SetTemp");
    assert_eq!(methods[0]["parameters"][0]["propertyName"], "temp");
    assert_eq!(methods[0]["parameters"][0]["valueType"], "int");
    manager.shutdown().await;
}

#[tokio::test]
async fn write_reaches_the_device() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (status, body) = send(
        &manager,
        Method::PUT,
        "/api/v1/devicemethod/default/dev1/SetTemp/temp/35",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["propertyName"], "temp");
    assert_eq!(body["data"]["desired"], "35");
    assert_eq!(body["data"]["reported"], "35");
    assert_eq!(bus.get("dev1/temp").as_deref(), Some("35"));
    manager.shutdown().await;
}

#[tokio::test]
async fn invalid_value_is_a_bad_request() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (not_int, _) = send(
        &manager,
        Method::POST,
        "/api/v1/devicemethod/default/dev1/SetTemp/temp/warm",
    )
    .await;
    let (read_only, _) = send(
        &manager,
        Method::POST,
        "/api/v1/devicemethod/default/dev1/SetTemp/humidity/50",
    )
    .await;

    assert_eq!(not_int, StatusCode::BAD_REQUEST);
    assert_eq!(read_only, StatusCode::BAD_REQUEST);
    assert_eq!(bus.get("dev1/temp").as_deref(), Some("20"));
    manager.shutdown().await;
}

#[tokio::test]
async fn model_of_a_device() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;

    let (status, body) = send(&manager, Method::GET, "/api/v1/meta/model/default/dev1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "m1");
    let properties = body["data"]["spec"]["properties"].as_array().unwrap();
    assert_eq!(properties.len(), 2);
    assert_eq!(properties[0]["accessMode"], "ReadWrite");
    manager.shutdown().await;
}

#[tokio::test]
async fn server_serves_until_stopped() {
    let bus = Arc::new(VirtualBus::new());
    let manager = manager_with_device(&bus).await;
    let server = ApiServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&manager))
        .await
        .unwrap();
    let addr = server.local_addr();

    let stream = tokio::net::TcpStream::connect(addr).await;
    assert!(stream.is_ok());
    drop(stream);

    server.stop().await;
    server.stop().await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());

    let id = ResourceId::new("default", "dev1");
    assert!(manager.contains(&id));
    manager.shutdown().await;
}
