//! Configuration types.
//!
//! Every struct has a `Default` and a `from_env()` that reads `ONBOARDING_*`
//! variables. Unparseable values fall back to the default.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::error::ConfigError;

/// Longest accepted delivery offset: ten years.
pub const MAX_OFFSET_HOURS: i64 = 10 * 365 * 24;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Timing parameters for a single onboarding run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay before the personal follow-up is delivered.
    pub followup_delay_hours: i64,
    /// Delay before the creator guide is delivered.
    pub creator_guide_delay_hours: i64,
    /// Delay before the interesting-markets digest is delivered.
    pub markets_delay_hours: i64,
    /// Last UTC hour on Monday that still falls inside the weekly blackout.
    pub blackout_last_monday_hour: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            followup_delay_hours: 48,
            creator_guide_delay_hours: 96,
            markets_delay_hours: 24,
            blackout_last_monday_hour: 19,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            followup_delay_hours: env_or("ONBOARDING_FOLLOWUP_HOURS", d.followup_delay_hours),
            creator_guide_delay_hours: env_or(
                "ONBOARDING_CREATOR_GUIDE_HOURS",
                d.creator_guide_delay_hours,
            ),
            markets_delay_hours: env_or("ONBOARDING_MARKETS_HOURS", d.markets_delay_hours),
            blackout_last_monday_hour: env_or(
                "ONBOARDING_BLACKOUT_MONDAY_HOUR",
                d.blackout_last_monday_hour,
            ),
        }
    }

    pub fn followup_delay(&self) -> ChronoDuration {
        ChronoDuration::hours(self.followup_delay_hours)
    }

    pub fn creator_guide_delay(&self) -> ChronoDuration {
        ChronoDuration::hours(self.creator_guide_delay_hours)
    }

    pub fn markets_delay(&self) -> ChronoDuration {
        ChronoDuration::hours(self.markets_delay_hours)
    }

    /// Reject negative or oversized offsets and out-of-range hours.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, hours) in [
            ("followup_delay_hours", self.followup_delay_hours),
            ("creator_guide_delay_hours", self.creator_guide_delay_hours),
            ("markets_delay_hours", self.markets_delay_hours),
        ] {
            if hours < 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must not be negative (got {hours})"),
                });
            }
            if hours > MAX_OFFSET_HOURS {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be at most {MAX_OFFSET_HOURS} hours (got {hours})"),
                });
            }
        }
        if self.blackout_last_monday_hour > 23 {
            return Err(ConfigError::InvalidValue {
                key: "blackout_last_monday_hour".to_string(),
                message: format!("must be 0-23 (got {})", self.blackout_last_monday_hour),
            });
        }
        Ok(())
    }
}

/// Event consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Bounded queue capacity for pending events.
    pub queue_capacity: usize,
    /// Maximum number of onboarding runs in flight at once.
    pub max_concurrent_runs: usize,
    /// Attempts per event before it is dead-lettered.
    pub max_attempts: u32,
    /// Base delay for exponential redelivery backoff.
    pub retry_base_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_concurrent_runs: 16,
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_capacity: env_or("ONBOARDING_QUEUE_CAPACITY", d.queue_capacity),
            max_concurrent_runs: env_or("ONBOARDING_MAX_CONCURRENT", d.max_concurrent_runs),
            max_attempts: env_or("ONBOARDING_MAX_ATTEMPTS", d.max_attempts),
            retry_base_delay: Duration::from_millis(env_or(
                "ONBOARDING_RETRY_BASE_MS",
                d.retry_base_delay.as_millis() as u64,
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_runs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// League cohort assignment.
#[derive(Debug, Clone)]
pub struct LeagueConfig {
    /// Maximum members per cohort before a new one is opened.
    pub cohort_capacity: i64,
    /// Year of the first league season.
    pub season_epoch_year: i32,
    /// Month (1-12) of the first league season.
    pub season_epoch_month: u32,
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self {
            cohort_capacity: 40,
            season_epoch_year: 2023,
            season_epoch_month: 5,
        }
    }
}

impl LeagueConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cohort_capacity: env_or("ONBOARDING_COHORT_CAPACITY", d.cohort_capacity),
            season_epoch_year: env_or("ONBOARDING_SEASON_EPOCH_YEAR", d.season_epoch_year),
            season_epoch_month: env_or("ONBOARDING_SEASON_EPOCH_MONTH", d.season_epoch_month),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cohort_capacity < 1 {
            return Err(ConfigError::InvalidValue {
                key: "cohort_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(1..=12).contains(&self.season_epoch_month) {
            return Err(ConfigError::InvalidValue {
                key: "season_epoch_month".to_string(),
                message: format!("must be 1-12 (got {})", self.season_epoch_month),
            });
        }
        Ok(())
    }
}

/// Content ranking limits.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Number of trending items embedded in the markets digest.
    pub trending_limit: usize,
    /// Number of items seeded into a new user's feed.
    pub feed_seed_limit: usize,
    /// How many open contracts the personalizer considers.
    pub feed_candidate_pool: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            trending_limit: 20,
            feed_seed_limit: 20,
            feed_candidate_pool: 500,
        }
    }
}

impl ContentConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            trending_limit: env_or("ONBOARDING_TRENDING_LIMIT", d.trending_limit),
            feed_seed_limit: env_or("ONBOARDING_FEED_SEED_LIMIT", d.feed_seed_limit),
            feed_candidate_pool: env_or("ONBOARDING_FEED_CANDIDATES", d.feed_candidate_pool),
        }
    }
}

/// HTTP server and storage location.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/onboarding.db"),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            port: env_or("ONBOARDING_PORT", d.port),
            db_path: std::env::var("ONBOARDING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offsets() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.followup_delay(), ChronoDuration::hours(48));
        assert_eq!(config.creator_guide_delay(), ChronoDuration::hours(96));
        assert_eq!(config.markets_delay(), ChronoDuration::hours(24));
        assert_eq!(config.blackout_last_monday_hour, 19);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_offset_rejected() {
        let config = OrchestratorConfig {
            markets_delay_hours: -1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("markets_delay_hours"));
    }

    #[test]
    fn oversized_offset_rejected() {
        let at_limit = OrchestratorConfig {
            creator_guide_delay_hours: MAX_OFFSET_HOURS,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let config = OrchestratorConfig {
            followup_delay_hours: i64::MAX,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("followup_delay_hours"));
    }

    #[test]
    fn blackout_hour_out_of_range() {
        let config = OrchestratorConfig {
            blackout_last_monday_hour: 24,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn consumer_requires_attempts() {
        assert!(ConsumerConfig::default().validate().is_ok());
        let config = ConsumerConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn league_month_range() {
        assert!(LeagueConfig::default().validate().is_ok());
        let config = LeagueConfig {
            season_epoch_month: 13,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
