// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Plugin JSON axum extractor.

use std::fmt::Debug;

use axum::{
    extract::{FromRequest, Request, rejection::BytesRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use libnetwork_observability::{MessageDirection, log_json_message};
use serde::{Serialize, de::DeserializeOwned};

use crate::api::{error::PluginError, model::PLUGIN_MEDIA_TYPE};

/// JSON body of a plugin request or response.
///
/// The engine does not reliably set a content type, so none is required. An empty body
/// decodes like `{}`.
pub struct PluginJson<T>(pub T);

impl<T> PluginJson<T> {
    /// Extract the inner message.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Debug> Debug for PluginJson<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PluginJson").field(&self.0).finish()
    }
}

impl<T> std::ops::Deref for PluginJson<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S, T> FromRequest<S> for PluginJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = PluginJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(PluginJsonRejection::BytesRejection)?;

        let value = decode_body(&bytes).map_err(PluginJsonRejection::DecodingFailed)?;
        log_json_message(MessageDirection::Request, &value);

        let message = serde_json::from_value(value).map_err(PluginJsonRejection::DecodingFailed)?;
        Ok(PluginJson(message))
    }
}

/// Parses a request body, treating an empty body and `null` as an empty object.
fn decode_body(bytes: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Object(Default::default()));
    }
    match serde_json::from_slice(bytes)? {
        serde_json::Value::Null => Ok(serde_json::Value::Object(Default::default())),
        value => Ok(value),
    }
}

impl<T: Serialize> IntoResponse for PluginJson<T> {
    fn into_response(self) -> Response {
        let PluginJson(message) = self;
        log_json_message(MessageDirection::Response, &message);

        match serde_json::to_vec(&message) {
            Ok(body) => {
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, PLUGIN_MEDIA_TYPE)],
                    body,
                )
                    .into_response()
            }
            Err(e) => {
                PluginError::BackendUnavailable(format!("failed to encode response: {e}"))
                    .into_response()
            }
        }
    }
}

impl<T> From<T> for PluginJson<T> {
    fn from(value: T) -> Self {
        PluginJson(value)
    }
}

/// Possible rejections when extracting a plugin request.
#[derive(Debug)]
pub enum PluginJsonRejection {
    /// Failed to read the body.
    BytesRejection(BytesRejection),
    /// The body is not valid JSON or misses required fields.
    DecodingFailed(serde_json::Error),
}

impl From<PluginJsonRejection> for PluginError {
    fn from(rejection: PluginJsonRejection) -> Self {
        match rejection {
            PluginJsonRejection::BytesRejection(e) => {
                PluginError::MalformedRequest(format!("failed to read body: {}", e.body_text()))
            }
            PluginJsonRejection::DecodingFailed(e) => PluginError::MalformedRequest(e.to_string()),
        }
    }
}

impl IntoResponse for PluginJsonRejection {
    fn into_response(self) -> Response {
        PluginError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Message {
        #[serde(rename = "PoolID")]
        pool_id: String,
        #[serde(rename = "Address", default)]
        address: String,
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Empty {}

    async fn extract<T: DeserializeOwned>(body: &'static str) -> Result<T, PluginJsonRejection> {
        let request = Request::post("/IpamDriver.RequestAddress")
            .body(Body::from(body))
            .unwrap();
        PluginJson::<T>::from_request(request, &())
            .await
            .map(PluginJson::into_inner)
    }

    #[test_log::test(tokio::test)]
    async fn decodes_body_without_content_type() {
        let message: Message = extract(r#"{"PoolID":"CalicoPoolIPv4"}"#).await.unwrap();
        assert_eq!(
            message,
            Message {
                pool_id: "CalicoPoolIPv4".to_string(),
                address: String::new()
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn empty_body_decodes_as_empty_object() {
        assert_eq!(extract::<Empty>("").await.unwrap(), Empty {});
        assert_eq!(extract::<Empty>(" null ").await.unwrap(), Empty {});
    }

    #[test_log::test(tokio::test)]
    async fn missing_fields_and_bad_json_are_malformed() {
        let err = PluginError::from(extract::<Message>("{}").await.unwrap_err());
        assert!(
            matches!(&err, PluginError::MalformedRequest(msg) if msg.contains("PoolID")),
            "got {err:?}"
        );

        let err = PluginError::from(extract::<Message>("{not json").await.unwrap_err());
        assert!(matches!(err, PluginError::MalformedRequest(_)), "got {err:?}");

        let err = PluginError::from(extract::<Message>(r#"{"PoolID": 4}"#).await.unwrap_err());
        assert!(matches!(err, PluginError::MalformedRequest(_)), "got {err:?}");
    }
}
