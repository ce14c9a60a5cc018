use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::HeaderMap;
use http::header::RETRY_AFTER;

const BUCKET: &str = "x-ratelimit-bucket";
const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const SCOPE: &str = "x-ratelimit-scope";

/// The longest wait a server supplied value can impose.
pub const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24);

/// Who a 429 was charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    /// The per-route limit of this client.
    User,
    /// The global limit of this client.
    Global,
    /// A limit shared with every client of the resource.
    Shared,
}

impl FromStr for RateLimitScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "user" => Ok(Self::User),
            "global" => Ok(Self::Global),
            "shared" => Ok(Self::Shared),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Global => "global",
            Self::Shared => "shared",
        })
    }
}

/// Rate limit metadata of one response, normalised from its headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// The server assigned bucket hash.
    pub bucket: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the bucket window resets.
    pub reset_after: Option<Duration>,
    /// Time to wait before retrying a 429.
    pub retry_after: Option<Duration>,
    pub global: bool,
    pub scope: Option<RateLimitScope>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let scope = text(headers, SCOPE).and_then(|s| s.parse().ok());

        Self {
            bucket: text(headers, BUCKET).map(str::to_string),
            limit: text(headers, LIMIT).and_then(|v| v.trim().parse().ok()),
            remaining: text(headers, REMAINING).and_then(|v| v.trim().parse().ok()),
            reset_after: text(headers, RESET_AFTER).and_then(seconds),
            retry_after: text(headers, RETRY_AFTER.as_str()).and_then(seconds),
            global: text(headers, GLOBAL).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
                || scope == Some(RateLimitScope::Global),
            scope,
        }
    }

    /// Converts a server supplied number of seconds into a wait, capped at
    /// [`MAX_WAIT`]. Negative and NaN values are rejected.
    pub fn wait_from_secs(secs: f64) -> Option<Duration> {
        if secs.is_nan() || secs < 0.0 {
            return None;
        }
        Some(Duration::try_from_secs_f64(secs).map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT)))
    }

    /// True when the response carried any bucket information at all.
    pub fn has_bucket_info(&self) -> bool {
        self.bucket.is_some()
            || self.limit.is_some()
            || self.remaining.is_some()
            || self.reset_after.is_some()
    }
}

fn text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn seconds(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(RateLimitHeaders::wait_from_secs)
}
