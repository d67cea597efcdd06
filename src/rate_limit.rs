//! Per-device token bucket rate limiting for sinks.
//!
//! Tilt hydrometers broadcast every few seconds while the values they carry
//! change slowly. Sinks talking to hosted services throttle themselves with a
//! [`RateLimiter`] so each device is forwarded at most `rate` times per
//! `period`.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Too many requests for this key; skip quietly.
    RateLimited,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

/// Errors returned for an unusable rate limiter configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateLimitError {
    #[error("rate must be at least 1, got {0}")]
    RateTooLow(f64),
    #[error("period must be greater than zero")]
    ZeroPeriod,
}

/// Token bucket state for a single key.
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Tokens available, always within `[0, rate]`
    allowance: f64,
    last_check: Instant,
}

/// A token bucket per key (device color).
///
/// Each bucket starts full, so the first request for a key is always
/// admitted. Buckets are created on first use and kept for the life of the
/// limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate: f64,
    period: Duration,
    buckets: HashMap<String, TokenBucket>,
}

impl RateLimiter {
    /// Create a limiter admitting `rate` requests per `period` for each key.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use tilt_relay::rate_limit::{Admission, RateLimiter};
    ///
    /// let mut limiter = RateLimiter::new(1.0, Duration::from_secs(60)).unwrap();
    /// assert_eq!(limiter.admit("yellow"), Admission::Admitted);
    /// assert_eq!(limiter.admit("yellow"), Admission::RateLimited);
    /// ```
    pub fn new(rate: f64, period: Duration) -> Result<Self, RateLimitError> {
        if rate.is_nan() || rate < 1.0 {
            return Err(RateLimitError::RateTooLow(rate));
        }
        if period.is_zero() {
            return Err(RateLimitError::ZeroPeriod);
        }
        Ok(RateLimiter {
            rate,
            period,
            buckets: HashMap::new(),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Request one token for `key` at the current time.
    pub fn admit(&mut self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// Request one token for `key` as if the current time were `now`.
    pub fn admit_at(&mut self, key: &str, now: Instant) -> Admission {
        let rate = self.rate;
        let per_second = rate / self.period.as_secs_f64();

        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket {
                allowance: rate,
                last_check: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_check);
        bucket.last_check = now;
        bucket.allowance = (bucket.allowance + elapsed.as_secs_f64() * per_second).clamp(0.0, rate);

        if bucket.allowance < 1.0 {
            Admission::RateLimited
        } else {
            bucket.allowance -= 1.0;
            Admission::Admitted
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use tilt_relay::rate_limit::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
/// assert_eq!(parse_duration("10ms").unwrap(), Duration::from_millis(10));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, "milliseconds")
    } else if let Some(num) = src.strip_suffix('h') {
        (num, "hours")
    } else if let Some(num) = src.strip_suffix('m') {
        (num, "minutes")
    } else if let Some(num) = src.strip_suffix('s') {
        (num, "seconds")
    } else {
        (src, "duration")
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;

    let secs = match unit {
        "milliseconds" => return Ok(Duration::from_millis(value)),
        "hours" => value.checked_mul(3600),
        "minutes" => value.checked_mul(60),
        _ => Some(value),
    };
    secs.map(Duration::from_secs)
        .ok_or_else(|| format!("{unit} out of range: {num}"))
}

/// Serde adapter accepting either a duration string ("15m") or whole seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}
