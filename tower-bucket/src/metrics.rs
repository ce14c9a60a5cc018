use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

#[derive(Clone, Debug)]
pub(crate) struct RestMetrics {
    requests: Counter<u64>,
    rate_limited: Counter<u64>,
    retries: Counter<u64>,
    invalid_requests: Counter<u64>,
}

impl RestMetrics {
    pub(crate) fn new() -> Self {
        let meter = global::meter("tower_bucket");
        Self {
            requests: meter.u64_counter("requests").build(),
            rate_limited: meter.u64_counter("rate_limited").build(),
            retries: meter.u64_counter("retries").build(),
            invalid_requests: meter.u64_counter("invalid_requests").build(),
        }
    }

    pub(crate) fn request(&self, route: &str, status: u16) {
        self.requests.add(
            1,
            &[
                KeyValue::new("route", route.to_string()),
                KeyValue::new("status", i64::from(status)),
            ],
        );
    }

    pub(crate) fn rate_limited(&self, route: &str, global: bool) {
        let scope = if global { "global" } else { "bucket" };
        self.rate_limited.add(
            1,
            &[
                KeyValue::new("route", route.to_string()),
                KeyValue::new("scope", scope),
            ],
        );
    }

    pub(crate) fn retry(&self, route: &str) {
        self.retries
            .add(1, &[KeyValue::new("route", route.to_string())]);
    }

    pub(crate) fn invalid_request(&self, status: u16) {
        self.invalid_requests
            .add(1, &[KeyValue::new("status", i64::from(status))]);
    }
}
