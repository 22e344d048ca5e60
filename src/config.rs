//! Pool configuration
//!
//! Tuning knobs for sizing, population throttle and idle expiry.
//! [`PoolConfig`] deserializes from an owner's config file; the dial and
//! health-check collaborators are supplied separately through the
//! [`Dialer`](crate::Dialer) trait and swapped together with the config
//! during [`Pool::restart`](crate::Pool::restart).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::constants::pool::{DEFAULT_MAX_IDLE, DEFAULT_MIN_IDLE};

fn default_max_idle() -> usize {
    DEFAULT_MAX_IDLE
}

fn default_min_idle() -> usize {
    DEFAULT_MIN_IDLE
}

/// Pool tuning parameters
///
/// `max_idle = 0` disables idle storage entirely: the pool never populates
/// and every acquisition dials fresh. These fields may only be changed on a
/// live pool through [`Pool::restart`](crate::Pool::restart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Capacity ceiling for stored idle connections
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Low-water mark; draining to or below it re-triggers population
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    /// New connections opened per one-second tick during population
    /// (0 = unthrottled)
    #[serde(default)]
    pub dial_rate: usize,

    /// Maximum time a connection may sit idle before it is discarded
    /// instead of reused; `None` means idle connections never expire.
    /// Serialized as whole seconds.
    #[serde(
        default,
        with = "option_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_ttl: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: default_max_idle(),
            min_idle: default_min_idle(),
            dial_rate: 0,
            idle_ttl: None,
        }
    }
}

impl PoolConfig {
    /// Log advisories for combinations that behave surprisingly
    ///
    /// Nothing is rejected; the pool runs with whatever it is given.
    pub fn warn_on_suspect(&self) {
        if self.max_idle > 0 && self.min_idle >= self.max_idle {
            warn!(
                min_idle = self.min_idle,
                max_idle = self.max_idle,
                "min_idle >= max_idle: every acquisition will re-trigger population"
            );
        }
    }
}

/// Helper for (de)serializing `Option<Duration>` as whole seconds
pub mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
