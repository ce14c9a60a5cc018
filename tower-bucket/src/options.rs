use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bucket_limit::Strategy;
use http::HeaderMap;

use crate::events::RateLimitData;

const DEFAULT_API: &str = "https://discord.com/api";
const DEFAULT_VERSION: &str = "10";

/// Decides whether a rate limited request fails instead of waiting.
#[derive(Clone, Default)]
pub enum RejectOnRateLimit {
    /// Always wait.
    #[default]
    Never,
    /// Fail requests whose route starts with any of these prefixes (case insensitive).
    Prefixes(Vec<String>),
    /// Fail requests for which the predicate returns `true`.
    Predicate(Arc<dyn Fn(&RateLimitData) -> bool + Send + Sync>),
}

impl RejectOnRateLimit {
    pub fn should_reject(&self, data: &RateLimitData) -> bool {
        match self {
            Self::Never => false,
            Self::Prefixes(prefixes) => {
                let route = data.route.to_lowercase();
                prefixes
                    .iter()
                    .any(|prefix| route.starts_with(&prefix.to_lowercase()))
            }
            Self::Predicate(predicate) => predicate(data),
        }
    }
}

impl fmt::Debug for RejectOnRateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Prefixes(prefixes) => f.debug_tuple("Prefixes").field(prefixes).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Configuration for [`Rest`](crate::Rest).
///
/// Start from [`RestOptions::default`] and adjust with the `with_*` methods.
#[derive(Clone)]
pub struct RestOptions {
    pub(crate) api: String,
    pub(crate) version: String,
    pub(crate) auth_prefix: String,
    pub(crate) global_requests_per_second: Option<NonZeroUsize>,
    pub(crate) global_strategy: Option<Arc<dyn Strategy + Send + Sync>>,
    pub(crate) offset: Duration,
    pub(crate) retries: u32,
    pub(crate) timeout: Duration,
    pub(crate) hash_lifetime: Duration,
    pub(crate) hash_sweep_interval: Duration,
    pub(crate) handler_sweep_interval: Duration,
    pub(crate) invalid_request_warning_interval: u64,
    pub(crate) reject_on_rate_limit: RejectOnRateLimit,
    pub(crate) headers: HeaderMap,
    pub(crate) user_agent_appendix: String,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            api: DEFAULT_API.to_string(),
            version: DEFAULT_VERSION.to_string(),
            auth_prefix: "Bot".to_string(),
            global_requests_per_second: NonZeroUsize::new(50),
            global_strategy: None,
            offset: Duration::from_millis(50),
            retries: 3,
            timeout: Duration::from_secs(15),
            hash_lifetime: Duration::from_secs(60 * 60 * 24),
            hash_sweep_interval: Duration::from_secs(60 * 60 * 4),
            handler_sweep_interval: Duration::from_secs(60 * 60),
            invalid_request_warning_interval: 0,
            reject_on_rate_limit: RejectOnRateLimit::Never,
            headers: HeaderMap::new(),
            user_agent_appendix: "tokio".to_string(),
        }
    }
}

impl fmt::Debug for RestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestOptions")
            .field("api", &self.api)
            .field("version", &self.version)
            .field("auth_prefix", &self.auth_prefix)
            .field("global_requests_per_second", &self.global_requests_per_second)
            .field("global_strategy", &self.global_strategy)
            .field("offset", &self.offset)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("hash_lifetime", &self.hash_lifetime)
            .field("hash_sweep_interval", &self.hash_sweep_interval)
            .field("handler_sweep_interval", &self.handler_sweep_interval)
            .field(
                "invalid_request_warning_interval",
                &self.invalid_request_warning_interval,
            )
            .field("reject_on_rate_limit", &self.reject_on_rate_limit)
            .field("user_agent_appendix", &self.user_agent_appendix)
            .finish_non_exhaustive()
    }
}

impl RestOptions {
    /// Base URL of the API, without the version segment.
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Scheme put in front of the token in the authorization header.
    pub fn with_auth_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auth_prefix = prefix.into();
        self
    }

    /// Requests allowed per second across every bucket. `None` removes the cap,
    /// though global rate limits reported by the server still apply.
    pub fn with_global_requests_per_second(mut self, limit: Option<NonZeroUsize>) -> Self {
        self.global_requests_per_second = limit;
        self
    }

    /// Replaces the built in global limiter.
    pub fn with_global_strategy(mut self, strategy: Arc<dyn Strategy + Send + Sync>) -> Self {
        self.global_strategy = Some(strategy);
        self
    }

    /// Extra time to wait past a bucket reset before sending again.
    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    /// How often a request is retried after a 5xx, a timeout or a transport error.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Timeout of a single attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_hash_lifetime(mut self, lifetime: Duration) -> Self {
        self.hash_lifetime = lifetime;
        self
    }

    /// Zero disables the background hash sweeper.
    pub fn with_hash_sweep_interval(mut self, interval: Duration) -> Self {
        self.hash_sweep_interval = interval;
        self
    }

    /// Zero disables the background handler sweeper.
    pub fn with_handler_sweep_interval(mut self, interval: Duration) -> Self {
        self.handler_sweep_interval = interval;
        self
    }

    /// Emit a warning at every multiple of `interval` invalid requests. Zero disables.
    pub fn with_invalid_request_warning_interval(mut self, interval: u64) -> Self {
        self.invalid_request_warning_interval = interval;
        self
    }

    pub fn with_reject_on_rate_limit(mut self, reject: RejectOnRateLimit) -> Self {
        self.reject_on_rate_limit = reject;
        self
    }

    /// Headers added to every request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_user_agent_appendix(mut self, appendix: impl Into<String>) -> Self {
        self.user_agent_appendix = appendix.into();
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn user_agent(&self) -> String {
        let agent = format!(
            "DiscordBot ({}, {})",
            env!("CARGO_PKG_REPOSITORY"),
            env!("CARGO_PKG_VERSION")
        );
        if self.user_agent_appendix.is_empty() {
            agent
        } else {
            format!("{agent} {}", self.user_agent_appendix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::Method;

    fn data(route: &str) -> RateLimitData {
        RateLimitData {
            time_to_reset: Duration::from_secs(1),
            limit: Some(5),
            method: Method::POST,
            hash: "abc".to_string(),
            url: format!("https://discord.com/api/v10{route}"),
            route: route.to_string(),
            major_parameter: "global".to_string(),
            global: false,
            scope: None,
        }
    }

    #[test]
    fn prefixes_match_case_insensitively() {
        let reject = RejectOnRateLimit::Prefixes(vec!["/Channels".to_string()]);

        assert!(reject.should_reject(&data("/channels/:id/messages")));
        assert!(!reject.should_reject(&data("/guilds/:id")));
    }

    #[test]
    fn predicates_see_the_rate_limit() {
        let reject = RejectOnRateLimit::Predicate(Arc::new(|data| data.limit == Some(5)));

        assert!(reject.should_reject(&data("/guilds/:id")));
        assert!(!RejectOnRateLimit::Never.should_reject(&data("/guilds/:id")));
    }

    #[test]
    fn defaults_match_the_api() {
        let options = RestOptions::default();

        assert_eq!(options.api, "https://discord.com/api");
        assert_eq!(options.retries(), 3);
        assert_eq!(options.timeout(), Duration::from_secs(15));
        assert_eq!(options.global_requests_per_second, NonZeroUsize::new(50));
        assert!(options.user_agent().ends_with(" tokio"));
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let options = RestOptions::default().with_api("http://localhost:8080/api/");
        assert_eq!(options.api, "http://localhost:8080/api");
    }
}
