use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use http::Method;
use regex::Regex;

/// Milliseconds between the unix epoch and the first snowflake.
const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// Messages older than this are deleted through a separate server-side bucket.
const OLD_MESSAGE_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 14);

static WEBHOOK_MAJOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/webhooks/(\d{17,20}/[^/?]+)").expect("webhook major parameter pattern")
});

static MAJOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:channels|guilds|webhooks)/(\d{17,20})").expect("major parameter pattern")
});

static SNOWFLAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{17,20}").expect("snowflake pattern"));

static WEBHOOK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/webhooks/:id/[^/?]+").expect("webhook token pattern")
});

static REACTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/reactions/(.*)").expect("reactions pattern"));

/// The rate limit scope of an endpoint family before its bucket hash is known.
///
/// Two requests with equal keys always share a server-side hash, but two
/// different keys may turn out to share one as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub bucket_route: String,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.bucket_route)
    }
}

/// Everything the scheduler needs to know about where a request is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteData {
    pub key: RouteKey,
    /// The id that splits this route into independently limited instances,
    /// or `global` when the route has none.
    pub major_parameter: String,
    /// The path the route was derived from, without query string.
    pub original: String,
}

impl RouteData {
    /// Derives the route data for `path`, e.g. `/channels/123.../messages`.
    pub fn new(method: &Method, path: &str) -> Self {
        let path = path.split('?').next().unwrap_or_default();

        let major_parameter = WEBHOOK_MAJOR
            .captures(path)
            .or_else(|| MAJOR.captures(path))
            .and_then(|captures| captures.get(1))
            .map_or_else(|| "global".to_string(), |m| m.as_str().to_string());

        let bucket_route = SNOWFLAKE.replace_all(path, ":id");
        let bucket_route = REACTIONS.replace(&bucket_route, "/reactions/:reaction");
        let mut bucket_route = WEBHOOK_TOKEN
            .replace(&bucket_route, "/webhooks/:id/:token")
            .into_owned();

        if method == Method::DELETE
            && bucket_route == "/channels/:id/messages/:id"
            && is_old_message(path)
        {
            bucket_route.push_str("/delete-old-message");
        }

        Self {
            key: RouteKey {
                method: method.clone(),
                bucket_route,
            },
            major_parameter,
            original: path.to_string(),
        }
    }

    /// The route path used for rate limit reporting and `reject_on_rate_limit` prefixes.
    pub fn route(&self) -> &str {
        &self.key.bucket_route
    }
}

/// The creation time encoded in a snowflake id.
pub(crate) fn snowflake_timestamp(id: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis((id >> 22) + SNOWFLAKE_EPOCH_MS)
}

fn is_old_message(path: &str) -> bool {
    let Some(id) = path.rsplit('/').next().and_then(|s| s.parse::<u64>().ok()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(snowflake_timestamp(id))
        .is_ok_and(|age| age > OLD_MESSAGE_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snowflake_aged(age: Duration) -> u64 {
        let created = SystemTime::now() - age;
        let ms = created.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64;
        (ms - SNOWFLAKE_EPOCH_MS) << 22
    }

    #[test]
    fn channel_routes_keep_their_major_parameter() {
        let route = RouteData::new(
            &Method::GET,
            "/channels/123456789012345678/messages/223456789012345678",
        );

        assert_eq!(route.major_parameter, "123456789012345678");
        assert_eq!(route.key.bucket_route, "/channels/:id/messages/:id");
        assert_eq!(route.key.to_string(), "GET:/channels/:id/messages/:id");
    }

    #[test]
    fn routes_without_major_parameter_are_global() {
        let route = RouteData::new(&Method::GET, "/gateway/bot");

        assert_eq!(route.major_parameter, "global");
        assert_eq!(route.key.bucket_route, "/gateway/bot");
    }

    #[test]
    fn query_strings_are_ignored() {
        let route = RouteData::new(&Method::GET, "/guilds/123456789012345678/members?limit=10");

        assert_eq!(route.key.bucket_route, "/guilds/:id/members");
        assert_eq!(route.original, "/guilds/123456789012345678/members");
    }

    #[test]
    fn reactions_collapse_to_one_route() {
        let a = RouteData::new(
            &Method::PUT,
            "/channels/123456789012345678/messages/223456789012345678/reactions/%F0%9F%91%8D/@me",
        );
        let b = RouteData::new(
            &Method::PUT,
            "/channels/123456789012345678/messages/223456789012345678/reactions/custom:323456789012345678/@me",
        );

        assert_eq!(a.key, b.key);
        assert_eq!(
            a.key.bucket_route,
            "/channels/:id/messages/:id/reactions/:reaction"
        );
    }

    #[test]
    fn webhook_token_is_part_of_the_major_parameter() {
        let route = RouteData::new(&Method::POST, "/webhooks/123456789012345678/a-secret-token");

        assert_eq!(route.major_parameter, "123456789012345678/a-secret-token");
        assert_eq!(route.key.bucket_route, "/webhooks/:id/:token");
    }

    #[test]
    fn deleting_old_messages_uses_its_own_route() {
        let old = snowflake_aged(Duration::from_secs(60 * 60 * 24 * 15));
        let new = snowflake_aged(Duration::from_secs(60));

        let old_route = RouteData::new(
            &Method::DELETE,
            &format!("/channels/123456789012345678/messages/{old}"),
        );
        let new_route = RouteData::new(
            &Method::DELETE,
            &format!("/channels/123456789012345678/messages/{new}"),
        );

        assert_eq!(
            old_route.key.bucket_route,
            "/channels/:id/messages/:id/delete-old-message"
        );
        assert_eq!(new_route.key.bucket_route, "/channels/:id/messages/:id");
    }

    #[test]
    fn methods_split_routes() {
        let get = RouteData::new(&Method::GET, "/channels/123456789012345678");
        let patch = RouteData::new(&Method::PATCH, "/channels/123456789012345678");

        assert_ne!(get.key, patch.key);
        assert_eq!(get.major_parameter, patch.major_parameter);
    }
}
