//! Backoff policy for readiness polling.
//!
//! Defines the delay schedule between probe attempts and the bound on the
//! number of attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Readiness polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Maximum probe attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout of a single probe attempt.
    #[serde(default = "default_attempt_timeout")]
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,

    /// Delay schedule between attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_max_attempts() -> u32 {
    30
}

const fn default_attempt_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout: default_attempt_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay between attempts.
    Fixed {
        /// Delay duration.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,

        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay after a given attempt number (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                #[allow(clippy::cast_possible_wrap)] // attempt count won't exceed i32
                let exponent = attempt.saturating_sub(1).min(64) as i32;
                let delay_secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                if !delay_secs.is_finite() || delay_secs >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(delay_secs.max(0.0))
            },
        }
    }

    /// Rejects schedules that would shrink or misbehave.
    ///
    /// # Errors
    ///
    /// Returns a description of the offending field.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Fixed { .. } => Ok(()),
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(format!(
                        "backoff multiplier must be a finite number of at least 1.0, got {multiplier}"
                    ));
                }
                if initial_delay > max_delay {
                    return Err("backoff initial_delay must not exceed max_delay".to_string());
                }
                Ok(())
            },
        }
    }

    /// Upper bound on total waiting across `attempts` attempts.
    #[must_use]
    pub fn total_delay(&self, attempts: u32) -> Duration {
        (1..attempts).map(|a| self.delay_for_attempt(a)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = BackoffConfig::Exponential {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));

        // Should cap at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_fixed_backoff() {
        let config = BackoffConfig::Fixed {
            delay: Duration::from_millis(500),
        };
        assert_eq!(config.delay_for_attempt(7), Duration::from_millis(500));
        assert_eq!(config.total_delay(3), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        for multiplier in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let config = BackoffConfig::Exponential {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier,
            };
            assert!(config.validate().is_err(), "multiplier {multiplier}");
        }
        assert!(BackoffConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_multiplier_does_not_panic() {
        let config = BackoffConfig::Exponential {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: -2.0,
        };
        assert_eq!(config.delay_for_attempt(2), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_parse_readiness_toml() {
        let toml = r#"
            max_attempts = 5
            attempt_timeout = "500ms"

            [backoff]
            type = "fixed"
            delay = "1s"
        "#;
        let cfg: ReadinessConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.attempt_timeout, Duration::from_millis(500));
        assert_eq!(
            cfg.backoff,
            BackoffConfig::Fixed {
                delay: Duration::from_secs(1)
            }
        );
    }
}
