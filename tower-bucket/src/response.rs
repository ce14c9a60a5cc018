use bytes::Bytes;
use http::HeaderMap;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;

use crate::RestError;

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A response body, parsed according to its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Bytes(Bytes),
}

impl ApiResponse {
    pub(crate) fn from_http(response: http::Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    pub fn is_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"))
    }

    /// Deserializes the body as `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// JSON bodies become [`ResponseBody::Json`], anything else is passed through.
    /// An empty JSON body (e.g. `204 No Content`) is `null`.
    pub fn parse(self) -> Result<ResponseBody, RestError> {
        if !self.is_json() {
            return Ok(ResponseBody::Bytes(self.body));
        }
        if self.body.is_empty() {
            return Ok(ResponseBody::Json(serde_json::Value::Null));
        }
        Ok(ResponseBody::Json(serde_json::from_slice(&self.body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::HeaderValue;
    use serde::Deserialize;

    fn response(content_type: &'static str, body: &'static str) -> ApiResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        ApiResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn json_bodies_are_parsed() {
        let parsed = response("application/json; charset=utf-8", r#"{"id":"1"}"#)
            .parse()
            .unwrap();
        assert_eq!(parsed, ResponseBody::Json(serde_json::json!({ "id": "1" })));
    }

    #[test]
    fn other_bodies_pass_through() {
        let parsed = response("image/png", "png").parse().unwrap();
        assert_eq!(parsed, ResponseBody::Bytes(Bytes::from_static(b"png")));
    }

    #[test]
    fn typed_decoding_reports_errors() {
        #[derive(Debug, Deserialize)]
        struct Thing {
            #[allow(dead_code)]
            id: u64,
        }

        let response = response("application/json", r#"{"id":"x"}"#);
        assert!(matches!(response.json::<Thing>(), Err(RestError::Decode(_))));
    }
}
