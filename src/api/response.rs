// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Response envelope of the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{Error, ValidationError};

/// Version string carried by every response.
pub const API_VERSION: &str = "v1";

/// Body of every response: `data` on success, `message` on failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Always [`API_VERSION`].
    pub api_version: &'static str,
    /// HTTP status, repeated in the body.
    pub status_code: u16,
    /// Response time, RFC 3339.
    pub time_stamp: String,
    /// Payload of a successful call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error description of a failed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    fn new(status: StatusCode, data: Option<T>, message: Option<String>) -> Self {
        Self {
            api_version: API_VERSION,
            status_code: status.as_u16(),
            time_stamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
            message,
        }
    }
}

/// A successful response.
#[derive(Debug)]
pub struct ApiResponse<T>(pub T);

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::OK;
        (status, Json(Envelope::new(status, Some(self.0), None))).into_response()
    }
}

/// A failed call with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates an error response.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::DeviceNotFound(_)
            | Error::ModelNotFound(_)
            | Error::Validation(ValidationError::UnknownProperty { .. }) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, message = %self.message, "API call failed");
        }
        let body = Envelope::<()>::new(self.status, None, Some(self.message));
        (self.status, Json(body)).into_response()
    }
}
