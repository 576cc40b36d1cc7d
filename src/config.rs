// Runtime configuration from environment variables.
//
// Every variable has a default; an unset variable is logged and defaulted,
// a malformed one is a startup error.

use anyhow::{Context, Result};
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};
use tracing::info;

use crate::engine::DEFAULT_MAX_ATTEMPTS;

pub const PORT_VAR: &str = "TOWNHALL_PORT";
pub const DB_PATH_VAR: &str = "TOWNHALL_DB_PATH";
pub const VOTE_RETRIES_VAR: &str = "TOWNHALL_VOTE_RETRIES";
pub const CODE_TTL_VAR: &str = "TOWNHALL_CODE_TTL_SECS";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub vote_max_attempts: u32,
    pub code_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in `load`)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let code_ttl_secs: u64 = try_load(&lookup, CODE_TTL_VAR, "300")?;

        Ok(Self {
            port: try_load(&lookup, PORT_VAR, "5000")?,
            db_path: try_load(&lookup, DB_PATH_VAR, "townhall.db")?,
            vote_max_attempts: try_load(&lookup, VOTE_RETRIES_VAR, &DEFAULT_MAX_ATTEMPTS.to_string())?,
            code_ttl: Duration::from_secs(code_ttl_secs),
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.db_path, PathBuf::from("townhall.db"));
        assert_eq!(config.vote_max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.code_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            (PORT_VAR, "8080"),
            (DB_PATH_VAR, "/var/lib/townhall/data.db"),
            (VOTE_RETRIES_VAR, " 9 "),
            (CODE_TTL_VAR, "60"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/townhall/data.db"));
        assert_eq!(config.vote_max_attempts, 9);
        assert_eq!(config.code_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[(PORT_VAR, "eighty")])).unwrap_err();
        assert!(err.to_string().contains(PORT_VAR));
    }
}
