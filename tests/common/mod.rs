// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::UnixListener;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use edge_mapper::error::SinkError;
use edge_mapper::sink::{TelemetryRecord, TelemetrySink};
use edge_mapper::sync::{
    RegisterResult, Request, ResponseFrame, ServerCodec, WireDevice, WireDeviceModel,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Model `m1` with a writable integer `temp` and a read-only float
/// `humidity`.
pub fn wire_model(name: &str) -> WireDeviceModel {
    serde_json::from_value(json!({
        "name": name,
        "namespace": "default",
        "spec": {
            "properties": [
                { "name": "temp", "type": "int", "accessMode": "ReadWrite",
                  "minimum": "0", "maximum": "100" },
                { "name": "humidity", "type": "float", "accessMode": "ReadOnly" }
            ]
        }
    }))
    .unwrap()
}

/// Device on the `virtual` protocol whose registers live under its own
/// scope. `temp` has `desired` as desired value when given.
pub fn wire_device(name: &str, model: &str, desired: Option<&str>) -> WireDevice {
    let mut temp = json!({
        "name": "temp",
        "reportToCloud": true,
        "visitors": { "protocolName": "virtual", "configData": { "register": "temp" } }
    });
    if let Some(desired) = desired {
        temp["desired"] = json!({ "value": desired });
    }

    serde_json::from_value(json!({
        "name": name,
        "namespace": "default",
        "spec": {
            "deviceModelReference": model,
            "protocol": {
                "protocolName": "virtual",
                "configData": { "scope": name, "registers": { "temp": "20", "humidity": "40.5" } }
            },
            "properties": [
                temp,
                {
                    "name": "humidity",
                    "reportToCloud": true,
                    "visitors": { "protocolName": "virtual", "configData": { "register": "humidity" } }
                }
            ],
            "methods": [
                { "name": "SetTemp", "description": "Sets the target temperature", "propertyNames": ["temp"] }
            ]
        }
    }))
    .unwrap()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Recording sink
// ============================================================================

/// Sink keeping every record in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().clone()
    }

    pub fn has_value(&self, device: &str, property: &str, value: &str) -> bool {
        self.records.lock().iter().any(|r| {
            r.device_name == device && r.property_name == property && r.value == value
        })
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn record(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Fake edge core
// ============================================================================

/// Edge core answering registration with fixed lists and acknowledging
/// every report.
pub struct FakeCore {
    path: PathBuf,
    requests: Arc<Mutex<Vec<Request>>>,
    token: CancellationToken,
}

impl FakeCore {
    /// Listens on `<dir>/core.sock`.
    pub fn start(dir: &Path, devices: Vec<WireDevice>, models: Vec<WireDeviceModel>) -> Self {
        let path = dir.join("core.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let lists = serde_json::to_value(RegisterResult {
            device_list: devices,
            model_list: models,
        })
        .unwrap();

        let seen = Arc::clone(&requests);
        let cancel = token.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    () = cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                };
                let seen = Arc::clone(&seen);
                let lists = lists.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, ServerCodec::new());
                    while let Some(Ok(frame)) = framed.next().await {
                        let result = match &frame.request {
                            Request::MapperRegister(_) => Some(lists.clone()),
                            _ => None,
                        };
                        seen.lock().push(frame.request);
                        if framed.send(ResponseFrame::ok(frame.id, result)).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            path,
            requests,
            token,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Returns `true` if `device` was reported with `property` at `value`.
    pub fn saw_reported(&self, device: &str, property: &str, value: &str) -> bool {
        self.requests.lock().iter().any(|request| match request {
            Request::ReportDeviceStatus(params) => {
                params.device_name == device
                    && params
                        .twins
                        .iter()
                        .any(|t| t.property_name == property && t.reported.value == value)
            }
            _ => false,
        })
    }

    /// Returns `true` if `device` was reported in `state`.
    pub fn saw_state(&self, device: &str, state: &str) -> bool {
        self.requests.lock().iter().any(|request| {
            matches!(request, Request::ReportDeviceStates(params)
                if params.device_name == device && params.state == state)
        })
    }
}

impl Drop for FakeCore {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
