use std::time::Duration;

use bucket_limit::RateLimitScope;
use http::Method;
use http::StatusCode;

/// Why a request gave up on the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkFailure {
    /// The transport did not answer within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server kept answering with a 5xx status.
    #[error("server error {status}")]
    Server { status: StatusCode },

    /// The transport itself failed.
    ///
    /// The string contains the `Display` representation of the transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors produced by the request scheduler.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The request hit a rate limit and the caller asked not to wait for it.
    #[error("{method} {route} is rate limited ({scope}); retry after {retry_after:?}")]
    RateLimited {
        method: Method,
        route: String,
        major_parameter: String,
        /// `global`, `user` or `shared`.
        scope: String,
        global: bool,
        retry_after: Duration,
        /// The bucket limit, if the server reported one.
        limit: Option<u32>,
    },

    /// A 4xx response other than 429. Never retried.
    #[error("{method} {path} failed with {status}")]
    Http {
        method: Method,
        path: String,
        status: StatusCode,
        body: bytes::Bytes,
    },

    /// Timeouts, transport failures or 5xx responses outlasted every retry.
    #[error("{method} {path} failed after {attempts} attempt(s): {failure}")]
    Network {
        method: Method,
        path: String,
        attempts: u32,
        #[source]
        failure: NetworkFailure,
    },

    /// The request deadline passed before it completed.
    #[error("{method} {path} did not complete before its deadline")]
    DeadlineExceeded { method: Method, path: String },

    /// The request needs authorization and no token was set.
    #[error("no token was set for a request that needs authorization")]
    MissingToken,

    /// The request could not be turned into an HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body was not the JSON the caller asked for.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RestError {
    pub(crate) fn rate_limited(
        method: &Method,
        route: &str,
        major_parameter: &str,
        scope: Option<RateLimitScope>,
        global: bool,
        retry_after: Duration,
        limit: Option<u32>,
    ) -> Self {
        let scope = scope.map_or_else(
            || if global { "global" } else { "user" }.to_string(),
            |scope| scope.to_string(),
        );
        Self::RateLimited {
            method: method.clone(),
            route: route.to_string(),
            major_parameter: major_parameter.to_string(),
            scope,
            global,
            retry_after,
            limit,
        }
    }

    /// True for errors a caller could reasonably retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// The status of the response that caused this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::Http { status, .. } => Some(*status),
            Self::Network {
                failure: NetworkFailure::Server { status },
                ..
            } => Some(*status),
            _ => None,
        }
    }
}
