// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the HTTP telemetry sink using wiremock.

#![cfg(feature = "http")]

use std::time::Duration;

use edge_mapper::error::SinkError;
use edge_mapper::model::ResourceId;
use edge_mapper::sink::{HttpSink, InfluxDbSink, SinkSet, TelemetryRecord, TelemetrySink};
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(value: &str) -> TelemetryRecord {
    TelemetryRecord::new(&ResourceId::new("default", "dev1"), "temp", value, 1_700_000_000_000)
}

#[tokio::test]
async fn record_is_posted_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/telemetry/default/dev1/temp"))
        .and(body_json(serde_json::json!({
            "namespace": "default",
            "deviceName": "dev1",
            "propertyName": "temp",
            "value": "30",
            "timestampMs": 1_700_000_000_000_i64
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let sink = HttpSink::new(format!("{}/telemetry", server.uri()), Duration::from_secs(2)).unwrap();

    sink.record(&record("30")).await.unwrap();
}

#[tokio::test]
async fn error_status_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let sink = HttpSink::new(server.uri(), Duration::from_secs(2)).unwrap();

    let err = sink.record(&record("30")).await.unwrap_err();

    assert!(matches!(err, SinkError::Rejected { status: 503 }));
}

#[tokio::test]
async fn slow_collector_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let sink = HttpSink::new(server.uri(), Duration::from_millis(100)).unwrap();

    assert!(sink.record(&record("30")).await.is_err());
}

#[tokio::test]
async fn sink_set_delivers_in_background() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/default/dev1/temp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;
    let sinks = SinkSet::new()
        .with_sink(HttpSink::new(server.uri(), Duration::from_secs(2)).unwrap());

    sinks.dispatch(record("30"));
    sinks.dispatch(record("31"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.received_requests().await.unwrap_or_default().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "records not delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sinks.close().await;
}

#[tokio::test]
async fn influxdb_receives_line_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "edge"))
        .and(query_param("bucket", "telemetry"))
        .and(query_param("precision", "ms"))
        .and(header("authorization", "Token secret"))
        .and(body_string(
            "dev1,namespace=default,device=dev1 temp=30i 1700000000000",
        ))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let sink = InfluxDbSink::new(server.uri(), "edge", "telemetry", Duration::from_secs(2))
        .unwrap()
        .with_token("secret");

    sink.record(&record("30").with_data_type("int")).await.unwrap();
}

#[tokio::test]
async fn routed_records_reach_only_their_database() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&collector)
        .await;
    let influx = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&influx)
        .await;
    let sinks = SinkSet::new()
        .with_sink(HttpSink::new(collector.uri(), Duration::from_secs(2)).unwrap())
        .with_route(
            "history",
            InfluxDbSink::new(influx.uri(), "edge", "telemetry", Duration::from_secs(2)).unwrap(),
        );

    sinks.dispatch_to(record("30"), Some("history"));
    sinks.dispatch_to(record("31"), None);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while collector.received_requests().await.unwrap_or_default().len() < 2
        || influx.received_requests().await.unwrap_or_default().is_empty()
    {
        assert!(tokio::time::Instant::now() < deadline, "records not delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    let written = influx.received_requests().await.unwrap_or_default();
    assert_eq!(written.len(), 1);
    assert!(String::from_utf8_lossy(&written[0].body).contains("temp=\"30\""));
    sinks.close().await;
}
