use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the `skillswapd` host, read from `SKILLSWAP_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Upper bound on waiting for a skill, calendar, or account lock.
    pub lock_timeout: Duration,
    /// Journal appends after which the compactor rewrites the file.
    pub compact_threshold: u64,
    pub expiry_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            lock_timeout: Duration::from_secs(5),
            compact_threshold: 1000,
            expiry_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("SKILLSWAP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SKILLSWAP_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            lock_timeout: parsed("SKILLSWAP_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compact_threshold: parsed("SKILLSWAP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            expiry_interval: parsed("SKILLSWAP_EXPIRY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.expiry_interval),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("skillswap.journal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.journal_path(), PathBuf::from("./data/skillswap.journal"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SKILLSWAP_DATA_DIR", "/var/lib/skillswap"),
            ("SKILLSWAP_METRICS_PORT", "9100"),
            ("SKILLSWAP_LOCK_TIMEOUT_MS", "250"),
            ("SKILLSWAP_COMPACT_THRESHOLD", "50"),
            ("SKILLSWAP_EXPIRY_INTERVAL_SECS", "5"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/skillswap"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.expiry_interval, Duration::from_secs(5));
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("SKILLSWAP_LOCK_TIMEOUT_MS", "soon"),
            ("SKILLSWAP_COMPACT_THRESHOLD", "-4"),
            ("SKILLSWAP_METRICS_PORT", "99999"),
        ]));
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
    }
}
