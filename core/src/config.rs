//! Operational configuration for the relay and the inbound consumer.
//!
//! Nothing here is hard-coded at call sites: binaries either construct the
//! configs explicitly, chain the `with_*` builders, or read the
//! `CONVEYOR_*` environment variables via `from_env`.

use std::time::Duration;

/// Configuration for the outbox relay.
///
/// # Example
///
/// ```
/// use conveyor_core::config::RelayConfig;
/// use std::time::Duration;
///
/// let config = RelayConfig::default()
///     .with_poll_interval(Duration::from_millis(250))
///     .with_max_retry_count(3);
///
/// assert_eq!(config.max_retry_count, 3);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Delay between relay ticks.
    pub poll_interval: Duration,

    /// How long one publish may wait for broker acknowledgment.
    pub publish_timeout: Duration,

    /// Retry ceiling; a message failing this many times is parked.
    pub max_retry_count: i32,

    /// Maximum messages fetched per tick.
    pub batch_size: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(10),
            max_retry_count: 5,
            batch_size: 100,
        }
    }
}

impl RelayConfig {
    /// Set the delay between relay ticks.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-publish acknowledgment timeout.
    #[must_use]
    pub const fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the retry ceiling after which a message is parked.
    #[must_use]
    pub const fn with_max_retry_count(mut self, count: i32) -> Self {
        self.max_retry_count = count;
        self
    }

    /// Set the maximum messages fetched per tick.
    #[must_use]
    pub const fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    /// Build a config from `CONVEYOR_*` environment variables, falling back
    /// to defaults for unset or unparseable values:
    ///
    /// - `CONVEYOR_RELAY_POLL_INTERVAL_MS`
    /// - `CONVEYOR_PUBLISH_TIMEOUT_MS`
    /// - `CONVEYOR_MAX_RETRY_COUNT`
    /// - `CONVEYOR_RELAY_BATCH_SIZE`
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_duration_ms("CONVEYOR_RELAY_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval),
            publish_timeout: env_duration_ms("CONVEYOR_PUBLISH_TIMEOUT_MS")
                .unwrap_or(defaults.publish_timeout),
            max_retry_count: env_parse("CONVEYOR_MAX_RETRY_COUNT")
                .unwrap_or(defaults.max_retry_count),
            batch_size: env_parse("CONVEYOR_RELAY_BATCH_SIZE").unwrap_or(defaults.batch_size),
        }
    }
}

/// Configuration for inbound consumer workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Delay before retrying a delivery whose effect failed retryably.
    pub retry_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ConsumerConfig {
    /// Set the delay before retrying a retryably failed delivery.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Build a config from `CONVEYOR_CONSUMER_RETRY_DELAY_MS`, falling back
    /// to the default for an unset or unparseable value.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry_delay: env_duration_ms("CONVEYOR_CONSUMER_RETRY_DELAY_MS")
                .unwrap_or(defaults.retry_delay),
        }
    }
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.publish_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retry_count, 5);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn relay_builders() {
        let config = RelayConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_publish_timeout(Duration::from_secs(2))
            .with_max_retry_count(2)
            .with_batch_size(10);

        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.publish_timeout, Duration::from_secs(2));
        assert_eq!(config.max_retry_count, 2);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn consumer_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.retry_delay, Duration::from_millis(500));
    }
}
