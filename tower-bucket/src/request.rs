use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use http::header::AUTHORIZATION;
use http::header::CONTENT_TYPE;
use http::header::USER_AGENT;
use serde::Serialize;

use crate::RestError;
use crate::options::RestOptions;

const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Per attempt timeout, attached to every outgoing request for transports
/// that want to enforce it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    None,
    Json(serde_json::Value),
    Bytes { content_type: String, data: Bytes },
}

/// Everything about a request except where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestData {
    pub(crate) body: RequestBody,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: HeaderMap,
    pub(crate) auth: bool,
    pub(crate) reason: Option<String>,
    pub(crate) deadline: Option<Duration>,
}

impl Default for RequestData {
    fn default() -> Self {
        Self {
            body: RequestBody::None,
            query: Vec::new(),
            headers: HeaderMap::new(),
            auth: true,
            reason: None,
            deadline: None,
        }
    }
}

impl RequestData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, RestError> {
        self.body = RequestBody::Json(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the authorization header is sent. Defaults to `true`.
    pub fn with_auth(mut self, auth: bool) -> Self {
        self.auth = auth;
        self
    }

    /// Reason recorded in the audit log.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Upper bound on the whole request, queueing and retries included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A request as handed to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) data: RequestData,
}

impl ApiRequest {
    /// `path` is relative to the versioned API root, e.g. `/gateway/bot`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            data: RequestData::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn with_data(mut self, data: RequestData) -> Self {
        self.data = data;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &RequestData {
        &self.data
    }

    pub(crate) fn url(&self, options: &RestOptions) -> String {
        let mut url = format!("{}/v{}{}", options.api, options.version, self.path);
        for (i, (key, value)) in self.data.query.iter().enumerate() {
            url.push(if i == 0 && !self.path.contains('?') { '?' } else { '&' });
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// Builds one attempt of this request.
    pub(crate) fn to_http(
        &self,
        options: &RestOptions,
        token: Option<&str>,
        user_agent: &HeaderValue,
    ) -> Result<http::Request<Bytes>, RestError> {
        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.url(options))
            .extension(RequestTimeout(options.timeout));

        let headers = builder
            .headers_mut()
            .ok_or_else(|| RestError::InvalidRequest(format!("invalid uri {}", self.path)))?;
        headers.insert(USER_AGENT, user_agent.clone());
        headers.extend(options.headers.clone());
        headers.extend(self.data.headers.clone());

        if self.data.auth {
            let token = token.ok_or(RestError::MissingToken)?;
            headers.insert(
                AUTHORIZATION,
                header_value(&format!("{} {token}", options.auth_prefix))?,
            );
        }
        if let Some(reason) = &self.data.reason {
            headers.insert(
                HeaderName::from_static(AUDIT_LOG_REASON),
                header_value(&urlencoding::encode(reason))?,
            );
        }

        let body = match &self.data.body {
            RequestBody::None => Bytes::new(),
            RequestBody::Json(value) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Bytes::from(serde_json::to_vec(value)?)
            }
            RequestBody::Bytes { content_type, data } => {
                headers.insert(CONTENT_TYPE, header_value(content_type)?);
                data.clone()
            }
        };

        builder
            .body(body)
            .map_err(|e| RestError::InvalidRequest(e.to_string()))
    }
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, RestError> {
    HeaderValue::from_str(value).map_err(|e| RestError::InvalidRequest(e.to_string()))
}
