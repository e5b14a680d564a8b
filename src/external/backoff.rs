//! Shared rate-limit and retry protocol of the oracle drivers
//!
//! - 2xx: success.
//! - 403 with `X-RateLimit-Remaining: 0`: sleep until `X-RateLimit-Reset`,
//!   retry without counting a failure.
//! - 408, 429, 5xx or a transport error: sleep `2^failures` seconds; more
//!   than [`MAX_FAILURES`] failures is fatal.
//! - 404: NoMatch.
//! - Anything else: an API error the caller decides about.
//!
//! Every sleep polls the cancellation token.

use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::Response;
use reqwest::StatusCode;

use super::{CancelToken, MatchError};

pub(super) const MAX_FAILURES: u32 = 8;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(super) struct Backoff<'a> {
    cancel: &'a CancelToken,
    failures: u32,
}

impl<'a> Backoff<'a> {
    pub(super) fn new(cancel: &'a CancelToken) -> Backoff<'a> {
        Backoff {
            cancel,
            failures: 0,
        }
    }

    /// Keep issuing the request until it succeeds, proves unmatchable, or the
    /// retry budget runs out.
    pub(super) fn execute<F>(&mut self, mut send: F) -> Result<Response, MatchError>
    where
        F: FnMut() -> reqwest::Result<Response>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(MatchError::Cancelled);
            }
            match send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::FORBIDDEN && rate_limit_hit(&response) {
                        self.sleep_until_reset(&response)?;
                        continue;
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(MatchError::NoMatch);
                    }
                    if is_retryable(status) {
                        self.penalty_sleep(&format!("HTTP {}", status))?;
                        continue;
                    }
                    return Err(MatchError::Api(format!("HTTP {}", status)));
                }
                Err(err) => {
                    self.penalty_sleep(&err.to_string())?;
                }
            }
        }
    }

    /// Exponential penalty for a retryable failure.
    fn penalty_sleep(&mut self, reason: &str) -> Result<(), MatchError> {
        let delay = Duration::from_secs(1u64 << self.failures);
        tracing::warn!(
            "{}; sleeping {}s before retry {} of {}",
            reason,
            delay.as_secs(),
            self.failures + 1,
            MAX_FAILURES + 1,
        );
        sleep_cancellable(delay, self.cancel)?;
        self.failures += 1;
        if self.failures > MAX_FAILURES {
            return Err(MatchError::RetriesExhausted(format!(
                "{} after {} failures",
                reason, self.failures
            )));
        }
        Ok(())
    }

    /// The service told us exactly when the quota resets; wait it out without
    /// burning a failure.
    fn sleep_until_reset(&self, response: &Response) -> Result<(), MatchError> {
        let reset = header(response, "x-ratelimit-reset")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| MatchError::Api("bad X-RateLimit-Reset header".to_string()))?;
        let wait = reset + 1 - Utc::now().timestamp();
        if wait > 0 {
            tracing::warn!("rate limit was hit, waiting {}s until the reset", wait);
            sleep_cancellable(Duration::from_secs(wait as u64), self.cancel)?;
        }
        Ok(())
    }
}

fn rate_limit_hit(response: &Response) -> bool {
    header(response, "x-ratelimit-remaining").as_deref() == Some("0")
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Sleep in short slices so cancellation takes effect promptly.
pub(super) fn sleep_cancellable(total: Duration, cancel: &CancelToken) -> Result<(), MatchError> {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.is_cancelled() {
            return Err(MatchError::Cancelled);
        }
        let slice = remaining.min(CANCEL_POLL_INTERVAL);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    if cancel.is_cancelled() {
        return Err(MatchError::Cancelled);
    }
    Ok(())
}
