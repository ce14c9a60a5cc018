use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60 * 10);

/// Emitted every time the invalid request count crosses a multiple of the
/// configured interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRequestWarning {
    /// Invalid requests in the current window.
    pub count: u64,
    /// Time until the window (and the count) resets.
    pub remaining_time: Duration,
}

#[derive(Debug, Default)]
struct Window {
    count: u64,
    resets_at: Option<Instant>,
}

/// Counts 401, 403 and 429 responses in a trailing ten minute window.
///
/// The server bans clients that produce too many of these, so the count is
/// surfaced as a warning. It never holds requests back.
#[derive(Debug)]
pub struct InvalidRequestCounter {
    interval: u64,
    window: Duration,
    state: Mutex<Window>,
}

impl InvalidRequestCounter {
    /// Warns at every `interval` invalid requests. `0` disables warnings.
    pub fn new(interval: u64) -> Self {
        Self::with_window(interval, WINDOW)
    }

    pub fn with_window(interval: u64, window: Duration) -> Self {
        Self {
            interval,
            window,
            state: Mutex::new(Window::default()),
        }
    }

    pub fn is_invalid(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        )
    }

    /// Counts `status` if it is an invalid request, returning a warning when one is due.
    pub fn record(&self, status: StatusCode) -> Option<InvalidRequestWarning> {
        if !Self::is_invalid(status) {
            return None;
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        let resets_at = match state.resets_at.filter(|resets_at| *resets_at > now) {
            Some(resets_at) => resets_at,
            None => {
                state.count = 0;
                *state.resets_at.insert(now + self.window)
            }
        };
        state.count += 1;

        (self.interval > 0 && state.count % self.interval == 0).then(|| InvalidRequestWarning {
            count: state.count,
            remaining_time: resets_at - now,
        })
    }

    /// Invalid requests in the current window.
    pub fn count(&self) -> u64 {
        let state = self.state.lock();
        match state.resets_at {
            Some(resets_at) if resets_at > Instant::now() => state.count,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::advance;
    use tokio::time::pause;

    #[tokio::test]
    async fn it_warns_at_each_multiple() {
        pause();
        let counter = InvalidRequestCounter::new(2);

        assert_eq!(counter.record(StatusCode::UNAUTHORIZED), None);
        let warning = counter.record(StatusCode::FORBIDDEN).expect("second is a multiple");
        assert_eq!(warning.count, 2);
        assert_eq!(warning.remaining_time, WINDOW);

        advance(Duration::from_secs(60)).await;
        assert_eq!(counter.record(StatusCode::TOO_MANY_REQUESTS), None);
        let warning = counter
            .record(StatusCode::TOO_MANY_REQUESTS)
            .expect("fourth is a multiple");
        assert_eq!(warning.count, 4);
        assert_eq!(warning.remaining_time, WINDOW - Duration::from_secs(60));
    }

    #[tokio::test]
    async fn valid_statuses_are_not_counted() {
        let counter = InvalidRequestCounter::new(1);

        assert_eq!(counter.record(StatusCode::OK), None);
        assert_eq!(counter.record(StatusCode::NOT_FOUND), None);
        assert_eq!(counter.record(StatusCode::INTERNAL_SERVER_ERROR), None);
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn zero_disables_warnings() {
        let counter = InvalidRequestCounter::new(0);

        for _ in 0..10 {
            assert_eq!(counter.record(StatusCode::UNAUTHORIZED), None);
        }
        assert_eq!(counter.count(), 10);
    }

    #[tokio::test]
    async fn the_count_resets_with_the_window() {
        pause();
        let counter = InvalidRequestCounter::new(3);

        counter.record(StatusCode::UNAUTHORIZED);
        counter.record(StatusCode::UNAUTHORIZED);
        assert_eq!(counter.count(), 2);

        advance(WINDOW).await;
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.record(StatusCode::UNAUTHORIZED), None);
        assert_eq!(counter.count(), 1);
    }
}
