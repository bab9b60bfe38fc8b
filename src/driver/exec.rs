// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver delegating device I/O to an external poller program.
//!
//! The protocol configuration names the program:
//!
//! ```json
//! { "command": "/usr/lib/mapper/modbus-poll", "args": ["--port", "/dev/ttyS0"] }
//! ```
//!
//! Each operation runs the program once with the operation appended to the
//! configured arguments:
//!
//! | operation | extra arguments                                   |
//! |-----------|---------------------------------------------------|
//! | init      | `init`                                            |
//! | read      | `read <visitor-json>`                             |
//! | write     | `write <visitor-json> <method> <property> <value>`|
//! | health    | `health`                                          |
//!
//! A zero exit status means success; for `read` the trimmed standard output
//! is the value. The child is killed when the call future is dropped, so
//! adapter timeouts and cancellation terminate it.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{HealthState, ProtocolClient, ProtocolDriver};
use crate::error::AdapterError;
use crate::model::{ProtocolConfig, VisitorConfig};

/// Driver for the `exec` protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecDriver;

impl ExecDriver {
    /// Protocol name.
    pub const PROTOCOL: &'static str = "exec";

    /// Creates the driver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolDriver for ExecDriver {
    fn name(&self) -> &str {
        Self::PROTOCOL
    }

    fn new_client(&self, config: &ProtocolConfig) -> Result<Box<dyn ProtocolClient>, AdapterError> {
        let program = config
            .config_data
            .get("command")
            .and_then(Value::as_str)
            .filter(|command| !command.is_empty())
            .ok_or_else(|| AdapterError::InvalidConfig("exec needs a command".to_string()))?
            .to_string();

        let args = match config.config_data.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        AdapterError::InvalidConfig(format!("argument {item} is not a string"))
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(AdapterError::InvalidConfig(format!(
                    "args must be an array, got {other}"
                )));
            }
        };

        Ok(Box::new(ExecClient {
            program,
            args,
            stopped: AtomicBool::new(false),
        }))
    }
}

struct ExecClient {
    program: String,
    args: Vec<String>,
    stopped: AtomicBool,
}

impl ExecClient {
    async fn run(&self, operation: &[&str]) -> Result<Vec<u8>, AdapterError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AdapterError::Stopped);
        }

        tracing::trace!(program = %self.program, ?operation, "Running poller");
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(operation)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(AdapterError::Command {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ProtocolClient for ExecClient {
    async fn init(&self) -> Result<(), AdapterError> {
        self.stopped.store(false, Ordering::SeqCst);
        self.run(&["init"]).await.map(|_| ())
    }

    async fn read(&self, visitor: &VisitorConfig) -> Result<Vec<u8>, AdapterError> {
        let visitor = serde_json::to_string(visitor)
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        let mut stdout = self.run(&["read", visitor.as_str()]).await?;
        while stdout.last().is_some_and(u8::is_ascii_whitespace) {
            stdout.pop();
        }
        Ok(stdout)
    }

    async fn write(
        &self,
        visitor: &VisitorConfig,
        method: &str,
        property: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        let visitor = serde_json::to_string(visitor)
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        self.run(&["write", visitor.as_str(), method, property, value])
            .await
            .map(|_| ())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> HealthState {
        match self.run(&["health"]).await {
            Ok(_) => HealthState::Healthy,
            Err(AdapterError::Stopped) => HealthState::Unknown,
            Err(e) => {
                tracing::debug!(program = %self.program, error = %e, "Poller health check failed");
                HealthState::Unhealthy
            }
        }
    }
}
