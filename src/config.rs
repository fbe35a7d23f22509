//! Runtime configuration for the room registry
//!
//! Protocol limits that every client must agree on live in
//! [`crate::constants`]. The values here only tune the hosting process and
//! can be overridden through `LIVEPOLL_*` environment variables or a `.env`
//! file.

use std::{env, str::FromStr};

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Settings for a [`crate::registry::Registry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Maximum number of rooms that may be open at the same time
    #[garde(range(min = 1))]
    pub max_rooms: usize,
    /// Maximum number of respondents connected to a single room at once
    #[garde(range(min = 1, max = constants::room::MAX_RESPONDENT_COUNT))]
    pub max_respondents: usize,
    /// Maximum number of names listed in a roster update
    #[garde(range(min = 1, max = constants::room::MAX_RESPONDENT_COUNT))]
    pub roster_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_respondents: constants::room::MAX_RESPONDENT_COUNT,
            roster_limit: constants::room::ROSTER_LIMIT,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Missing or unparsable variables fall back to the defaults, and a
    /// configuration that fails validation is replaced by the defaults as a
    /// whole.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup
    pub fn from_lookup<L: Fn(&str) -> Option<String>>(lookup: L) -> Self {
        let defaults = Self::default();

        let config = Self {
            max_rooms: parse_or(&lookup, "LIVEPOLL_MAX_ROOMS", defaults.max_rooms),
            max_respondents: parse_or(
                &lookup,
                "LIVEPOLL_MAX_RESPONDENTS",
                defaults.max_respondents,
            ),
            roster_limit: parse_or(&lookup, "LIVEPOLL_ROSTER_LIMIT", defaults.roster_limit),
        };

        match config.validate() {
            Ok(()) => config,
            Err(report) => {
                tracing::warn!(%report, "invalid runtime configuration, using defaults");
                defaults
            }
        }
    }
}

fn parse_or<L: Fn(&str) -> Option<String>, V: FromStr>(lookup: &L, key: &str, default: V) -> V {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparsable configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_lookup_gives_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("LIVEPOLL_MAX_ROOMS", "12"),
            ("LIVEPOLL_MAX_RESPONDENTS", " 40 "),
            ("LIVEPOLL_ROSTER_LIMIT", "5"),
        ]));

        assert_eq!(config.max_rooms, 12);
        assert_eq!(config.max_respondents, 40);
        assert_eq!(config.roster_limit, 5);
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("LIVEPOLL_MAX_ROOMS", "many"),
            ("LIVEPOLL_ROSTER_LIMIT", "7"),
        ]));

        assert_eq!(config.max_rooms, Config::default().max_rooms);
        assert_eq!(config.roster_limit, 7);
    }

    #[test]
    fn test_invalid_configuration_is_replaced() {
        let config = Config::from_lookup(lookup_from(&[("LIVEPOLL_MAX_RESPONDENTS", "0")]));
        assert_eq!(config, Config::default());

        let config = Config::from_lookup(lookup_from(&[("LIVEPOLL_MAX_RESPONDENTS", "100000")]));
        assert_eq!(config, Config::default());
    }
}
