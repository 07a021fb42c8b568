use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoordinationError;

// =============================================================================
// Configuration errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] CoordinationError),
}

// =============================================================================
// Delay ranges
// =============================================================================

/// DelayRange: an inclusive millisecond range that think/eat/serve delays are
/// sampled from. Exact durations carry no meaning, only the bounds do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..=self.max_ms))
    }

    fn validate(&self, parameter: &'static str) -> Result<(), CoordinationError> {
        if self.min_ms > self.max_ms {
            return Err(CoordinationError::invalid(
                parameter,
                format!("min_ms {} exceeds max_ms {}", self.min_ms, self.max_ms),
            ));
        }
        Ok(())
    }
}

/// RingPacing: how long ring workers linger in each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingPacing {
    pub think: DelayRange,
    pub eat: DelayRange,
    pub pause: DelayRange,
    /// Gap between taking the left and the right fork in a naive run. This is
    /// the race window that lets every seat end up holding its left fork.
    pub grab_gap_ms: u64,
    pub naive_eat_ms: u64,
}

impl Default for RingPacing {
    fn default() -> Self {
        Self {
            think: DelayRange::new(5, 15),
            eat: DelayRange::new(5, 15),
            pause: DelayRange::new(5, 15),
            grab_gap_ms: 10,
            naive_eat_ms: 20,
        }
    }
}

impl RingPacing {
    /// No delays at all; useful for stress runs.
    pub const fn immediate() -> Self {
        Self {
            think: DelayRange::fixed(0),
            eat: DelayRange::fixed(0),
            pause: DelayRange::fixed(0),
            grab_gap_ms: 0,
            naive_eat_ms: 0,
        }
    }

    pub fn grab_gap(&self) -> Duration {
        Duration::from_millis(self.grab_gap_ms)
    }

    pub fn naive_eat(&self) -> Duration {
        Duration::from_millis(self.naive_eat_ms)
    }
}

// =============================================================================
// Scenario sections
// =============================================================================

// Counts are signed so that negative values coming from a file are reported
// as invalid configuration instead of a parse failure.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSection {
    pub seats: i64,
    pub meals: i64,
    pub naive_timeout_ms: i64,
    pub pacing: RingPacing,
}

impl Default for RingSection {
    fn default() -> Self {
        Self {
            seats: 5,
            meals: 3,
            naive_timeout_ms: 500,
            pacing: RingPacing::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffSection {
    pub capacity: i64,
    pub producers: i64,
    pub consumers: i64,
    pub items_per_producer: i64,
    pub produce_delay: DelayRange,
    pub consume_delay: DelayRange,
}

impl Default for HandoffSection {
    fn default() -> Self {
        Self {
            capacity: 5,
            producers: 4,
            consumers: 4,
            items_per_producer: 25,
            produce_delay: DelayRange::fixed(2),
            consume_delay: DelayRange::fixed(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarberSection {
    pub chairs: i64,
    pub customers: i64,
    pub service: DelayRange,
    /// How long the shop stays open after the last customer returned.
    pub linger_ms: u64,
}

impl Default for BarberSection {
    fn default() -> Self {
        Self {
            chairs: 2,
            customers: 10,
            service: DelayRange::fixed(20),
            linger_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub worker_threads: i64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get() as i64,
        }
    }
}

/// LabConfig: everything the driver needs to run the three scenarios.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub ring: RingSection,
    pub handoff: HandoffSection,
    pub barber: BarberSection,
    pub runtime: RuntimeSection,
}

// =============================================================================
// Validated view
// =============================================================================

/// Settings: `LabConfig` after range checks, with counts as `usize`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub seats: usize,
    pub meals: usize,
    pub naive_timeout: Duration,
    pub pacing: RingPacing,
    pub capacity: usize,
    pub producers: usize,
    pub consumers: usize,
    pub items_per_producer: usize,
    /// `producers * items_per_producer`, checked for overflow.
    pub total_items: usize,
    pub produce_delay: DelayRange,
    pub consume_delay: DelayRange,
    pub chairs: usize,
    pub customers: usize,
    pub service: DelayRange,
    pub linger: Duration,
    pub worker_threads: usize,
}

fn at_least(parameter: &'static str, value: i64, min: i64) -> Result<usize, CoordinationError> {
    if value < min {
        return Err(CoordinationError::invalid(
            parameter,
            format!("must be at least {min}, got {value}"),
        ));
    }
    usize::try_from(value)
        .map_err(|_| CoordinationError::invalid(parameter, format!("{value} does not fit in usize")))
}

impl LabConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reads `path` (or takes the defaults when there is none) and validates
    /// it in one step.
    pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(config.validate()?)
    }

    pub fn settings_from_toml_str(content: &str) -> Result<Settings, ConfigError> {
        Ok(Self::from_toml_str(content)?.validate()?)
    }

    pub fn validate(&self) -> Result<Settings, CoordinationError> {
        let pacing = self.ring.pacing;
        pacing.think.validate("ring.pacing.think")?;
        pacing.eat.validate("ring.pacing.eat")?;
        pacing.pause.validate("ring.pacing.pause")?;
        self.handoff.produce_delay.validate("handoff.produce_delay")?;
        self.handoff.consume_delay.validate("handoff.consume_delay")?;
        self.barber.service.validate("barber.service")?;

        let producers = at_least("handoff.producers", self.handoff.producers, 1)?;
        let consumers = at_least("handoff.consumers", self.handoff.consumers, 1)?;
        let items_per_producer = at_least("handoff.items_per_producer", self.handoff.items_per_producer, 0)?;
        let total_items = producers
            .checked_mul(items_per_producer)
            .ok_or_else(|| CoordinationError::invalid("handoff.items_per_producer", "total item count overflows"))?;
        if total_items % consumers != 0 {
            return Err(CoordinationError::invalid(
                "handoff.consumers",
                format!("{total_items} items cannot be split evenly across {consumers} consumers"),
            ));
        }

        Ok(Settings {
            seats: at_least("ring.seats", self.ring.seats, 2)?,
            meals: at_least("ring.meals", self.ring.meals, 1)?,
            naive_timeout: Duration::from_millis(
                at_least("ring.naive_timeout_ms", self.ring.naive_timeout_ms, 1)? as u64,
            ),
            pacing,
            capacity: at_least("handoff.capacity", self.handoff.capacity, 1)?,
            producers,
            consumers,
            items_per_producer,
            total_items,
            produce_delay: self.handoff.produce_delay,
            consume_delay: self.handoff.consume_delay,
            chairs: at_least("barber.chairs", self.barber.chairs, 0)?,
            customers: at_least("barber.customers", self.barber.customers, 0)?,
            service: self.barber.service,
            linger: Duration::from_millis(self.barber.linger_ms),
            worker_threads: at_least("runtime.worker_threads", self.runtime.worker_threads, 1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_lab_scenarios() {
        let settings = LabConfig::default().validate().unwrap();
        assert_eq!(settings.seats, 5);
        assert_eq!(settings.meals, 3);
        assert_eq!(settings.naive_timeout, Duration::from_millis(500));
        assert_eq!(settings.capacity, 5);
        assert_eq!(settings.total_items, 100);
        assert_eq!(settings.chairs, 2);
        assert_eq!(settings.customers, 10);
        assert!(settings.worker_threads >= 1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = LabConfig::from_toml_str(
            r#"
            [ring]
            seats = 7

            [barber]
            chairs = 0
            service = { min_ms = 1, max_ms = 3 }
            "#,
        )
        .unwrap();

        assert_eq!(config.ring.seats, 7);
        assert_eq!(config.ring.meals, 3);
        assert_eq!(config.barber.chairs, 0);
        assert_eq!(config.barber.service, DelayRange::new(1, 3));
        assert_eq!(config.handoff, HandoffSection::default());
        assert_eq!(config.validate().unwrap().chairs, 0);
    }

    #[test]
    fn negative_chairs_are_invalid_configuration() {
        let mut config = LabConfig::default();
        config.barber.chairs = -1;
        match config.validate() {
            Err(CoordinationError::InvalidConfiguration { parameter, .. }) => {
                assert_eq!(parameter, "barber.chairs")
            }
            other => panic!("expected invalid configuration, got {other:?}"),
        }
    }

    #[test]
    fn single_seat_and_zero_capacity_are_rejected() {
        let mut config = LabConfig::default();
        config.ring.seats = 1;
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::InvalidConfiguration { parameter: "ring.seats", .. })
        ));

        let mut config = LabConfig::default();
        config.handoff.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::InvalidConfiguration { parameter: "handoff.capacity", .. })
        ));
    }

    #[test]
    fn overflowing_item_total_is_rejected() {
        let mut config = LabConfig::default();
        config.handoff.producers = i64::MAX;
        config.handoff.items_per_producer = 4;
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::InvalidConfiguration {
                parameter: "handoff.items_per_producer",
                ..
            })
        ));
    }

    #[test]
    fn uneven_split_across_consumers_is_rejected() {
        let mut config = LabConfig::default();
        config.handoff.consumers = 3;
        assert!(matches!(
            config.validate(),
            Err(CoordinationError::InvalidConfiguration { parameter: "handoff.consumers", .. })
        ));
    }

    #[test]
    fn validation_failures_surface_as_config_errors() {
        let err = LabConfig::settings_from_toml_str("[barber]\nchairs = -2\n").unwrap_err();
        match err {
            ConfigError::Invalid(CoordinationError::InvalidConfiguration { parameter, .. }) => {
                assert_eq!(parameter, "barber.chairs")
            }
            other => panic!("expected invalid configuration, got {other:?}"),
        }

        let settings = LabConfig::settings_from_toml_str("[ring]\nseats = 3\n").unwrap();
        assert_eq!(settings.seats, 3);
    }

    #[test]
    fn load_settings_without_a_file_uses_defaults() {
        let settings = LabConfig::load_settings(None).unwrap();
        assert_eq!(settings, LabConfig::default().validate().unwrap());

        let missing = Path::new("/definitely/not/here/lab.toml");
        assert!(matches!(
            LabConfig::load_settings(Some(missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn inverted_delay_range_is_rejected() {
        let mut config = LabConfig::default();
        config.ring.pacing.eat = DelayRange::new(20, 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = LabConfig::from_toml_str("[ring\nseats = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn sample_stays_in_bounds() {
        let range = DelayRange::new(5, 15);
        for _ in 0..200 {
            let delay = range.sample();
            assert!(delay >= Duration::from_millis(5) && delay <= Duration::from_millis(15));
        }
        assert_eq!(DelayRange::fixed(3).sample(), Duration::from_millis(3));
    }
}
