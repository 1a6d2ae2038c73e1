//! Exponential backoff with jitter.

use crate::component::{FieldSpec, ParsedConfig};
use crate::errors::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration of an exponential backoff sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First interval handed out after a reset.
    pub initial_interval: Duration,
    /// Cap on the un-randomized interval.
    pub max_interval: Duration,
    /// Stop once the elapsed time since reset plus the next interval exceeds
    /// this. Zero disables the limit.
    pub max_elapsed_time: Duration,
    /// Jitter applied as `interval * (1 ± factor)`.
    pub randomization_factor: f64,
    /// Growth factor between intervals.
    pub multiplier: f64,
    /// Stop after this many intervals. Zero disables the limit.
    pub max_retries: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Duration::from_secs(30),
            randomization_factor: 0.5,
            multiplier: 1.5,
            max_retries: 0,
        }
    }
}

impl BackoffConfig {
    /// Creates a config with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial interval.
    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the maximum interval.
    #[must_use]
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Sets the maximum elapsed time.
    #[must_use]
    pub fn with_max_elapsed_time(mut self, elapsed: Duration) -> Self {
        self.max_elapsed_time = elapsed;
        self
    }

    /// Sets the randomization factor.
    #[must_use]
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u64) -> Self {
        self.max_retries = retries;
        self
    }

    /// Returns true if the sequence never ends on its own.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.max_retries == 0 && self.max_elapsed_time.is_zero()
    }

    /// The settings fields read by [`BackoffConfig::from_parsed`].
    #[must_use]
    pub fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::int("max_retries")
                .description("The maximum number of retries before giving up. Zero means no limit.")
                .default(0)
                .advanced(),
            FieldSpec::object(
                "backoff",
                vec![
                    FieldSpec::duration("initial_interval")
                        .description("The initial period to wait between retry attempts.")
                        .default("1s"),
                    FieldSpec::duration("max_interval")
                        .description("The maximum period to wait between retry attempts.")
                        .default("5s"),
                    FieldSpec::duration("max_elapsed_time")
                        .description(
                            "The maximum period to keep retrying. Zero means retrying forever.",
                        )
                        .default("30s"),
                    FieldSpec::float("randomization_factor")
                        .description("Jitter applied to each interval, between 0 and 1.")
                        .default(0.5)
                        .advanced(),
                ],
            )
            .description("Control time intervals between retry attempts.")
            .advanced(),
        ]
    }

    /// Builds a config from settings validated against [`BackoffConfig::fields`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a field is missing or out of range.
    pub fn from_parsed(parsed: &ParsedConfig) -> Result<Self, ConfigError> {
        let max_retries = u64::try_from(parsed.field_int("max_retries")?)
            .map_err(|_| ConfigError::new("max_retries", "must not be negative"))?;
        let backoff = parsed.namespace("backoff");
        let config = Self::new()
            .with_max_retries(max_retries)
            .with_initial_interval(backoff.field_duration("initial_interval")?)
            .with_max_interval(backoff.field_duration("max_interval")?)
            .with_max_elapsed_time(backoff.field_duration("max_elapsed_time")?)
            .with_randomization_factor(backoff.field_float("randomization_factor")?);
        config.validate()?;
        Ok(config)
    }

    /// Checks that the intervals and factors are usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_interval.is_zero() {
            return Err(ConfigError::new("backoff.initial_interval", "must be greater than zero"));
        }
        if self.max_interval < self.initial_interval {
            return Err(ConfigError::new(
                "backoff.max_interval",
                "must not be smaller than the initial interval",
            ));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(ConfigError::new(
                "backoff.randomization_factor",
                "must be between 0 and 1",
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::new("backoff.multiplier", "must be at least 1"));
        }
        Ok(())
    }
}

/// An exponential backoff generator.
///
/// Elapsed time is measured from the last [`reset`](Self::reset), on the
/// tokio clock so paused-time tests stay deterministic.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_interval: Duration,
    start: Instant,
    tries: u64,
}

impl ExponentialBackoff {
    /// Creates a generator in its reset state.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_interval: config.initial_interval,
            config,
            start: Instant::now(),
            tries: 0,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Restarts the sequence from the initial interval.
    pub fn reset(&mut self) {
        self.current_interval = self.config.initial_interval;
        self.start = Instant::now();
        self.tries = 0;
    }

    /// Time since the last reset.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the next interval, or `None` once the sequence is exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.config.max_retries > 0 {
            if self.tries >= self.config.max_retries {
                return None;
            }
            self.tries += 1;
        }

        let elapsed = self.elapsed();
        let next = self.randomized_interval();
        self.increment_interval();

        let limit = self.config.max_elapsed_time;
        if !limit.is_zero() && elapsed + next > limit {
            return None;
        }
        Some(next)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn randomized_interval(&self) -> Duration {
        let factor = self.config.randomization_factor;
        if factor == 0.0 {
            return self.current_interval;
        }
        let current = self.current_interval.as_nanos() as f64;
        let delta = factor * current;
        let low = current - delta;
        let high = current + delta;
        let nanos = rand::thread_rng().gen_range(low..=high);
        Duration::from_nanos(nanos as u64)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn increment_interval(&mut self) {
        let current = self.current_interval.as_nanos() as f64;
        let max = self.config.max_interval.as_nanos() as f64;
        let multiplier = self.config.multiplier;
        self.current_interval = if current >= max / multiplier {
            self.config.max_interval
        } else {
            Duration::from_nanos((current * multiplier) as u64)
        };
    }
}
