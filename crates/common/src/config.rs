use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Session-wide bridge configuration.
///
/// Registration options may override `deferred_release` per factory; everything else is
/// read by every factory created in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub statistics_enabled: bool,
    pub distinct_count_enabled: bool,
    pub use_threads: bool,
    pub deferred_release: bool,
    pub batch_size_rows: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            statistics_enabled: true,
            distinct_count_enabled: false,
            use_threads: true,
            deferred_release: false,
            batch_size_rows: 8192,
        }
    }
}

pub const ENV_ENABLE_STATISTICS: &str = "SCANBRIDGE_ENABLE_STATISTICS";
pub const ENV_ENABLE_DISTINCT_COUNT: &str = "SCANBRIDGE_ENABLE_DISTINCT_COUNT";
pub const ENV_USE_THREADS: &str = "SCANBRIDGE_USE_THREADS";
pub const ENV_DEFERRED_RELEASE: &str = "SCANBRIDGE_DEFERRED_RELEASE";
pub const ENV_BATCH_SIZE_ROWS: &str = "SCANBRIDGE_BATCH_SIZE_ROWS";

impl BridgeConfig {
    /// Defaults overlaid with `SCANBRIDGE_*` environment variables.
    ///
    /// Unparseable values are reported, not ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let pairs = [
            (ENV_ENABLE_STATISTICS, "statistics_enabled"),
            (ENV_ENABLE_DISTINCT_COUNT, "distinct_count_enabled"),
            (ENV_USE_THREADS, "use_threads"),
            (ENV_DEFERRED_RELEASE, "deferred_release"),
            (ENV_BATCH_SIZE_ROWS, "batch_size_rows"),
        ];
        for (env_key, key) in pairs {
            if let Some(value) = lookup(env_key) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Parses a JSON-encoded config; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| BridgeError::InvalidConfig(format!("invalid config JSON: {e}")))
    }

    /// Applies `key=value` pairs separated by `,` or `;`.
    pub fn apply_kv(&mut self, kv: &str) -> Result<()> {
        for pair in kv
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let Some((k, v)) = pair.split_once('=') else {
                return Err(BridgeError::InvalidConfig(format!(
                    "invalid config pair '{pair}', expected key=value"
                )));
            };
            self.set(&k.trim().to_ascii_lowercase(), v.trim())?;
        }
        Ok(())
    }

    /// Sets one option by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "statistics_enabled" => self.statistics_enabled = parse_bool(value)?,
            "distinct_count_enabled" => self.distinct_count_enabled = parse_bool(value)?,
            "use_threads" => self.use_threads = parse_bool(value)?,
            "deferred_release" => self.deferred_release = parse_bool(value)?,
            "batch_size_rows" => {
                let rows: usize = value.parse().map_err(|e| {
                    BridgeError::InvalidConfig(format!("invalid batch_size_rows '{value}': {e}"))
                })?;
                if rows == 0 {
                    return Err(BridgeError::InvalidConfig(
                        "batch_size_rows must be greater than zero".to_string(),
                    ));
                }
                self.batch_size_rows = rows;
            }
            other => {
                return Err(BridgeError::InvalidConfig(format!(
                    "unknown config key '{other}'"
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(BridgeError::InvalidConfig(format!(
            "invalid bool value '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_enable_statistics_but_not_distinct() {
        let cfg = BridgeConfig::default();
        assert!(cfg.statistics_enabled);
        assert!(!cfg.distinct_count_enabled);
        assert!(cfg.use_threads);
        assert!(!cfg.deferred_release);
    }

    #[test]
    fn parse_kv_updates_config() {
        let mut cfg = BridgeConfig::default();
        cfg.apply_kv("distinct_count_enabled=1; use_threads=off,batch_size_rows=1024")
            .expect("kv parse");
        assert!(cfg.distinct_count_enabled);
        assert!(!cfg.use_threads);
        assert_eq!(cfg.batch_size_rows, 1024);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let mut cfg = BridgeConfig::default();
        let err = cfg.apply_kv("spill_dir=/tmp").expect_err("unknown key");
        assert!(err.to_string().contains("unknown config key 'spill_dir'"));
        let err = cfg.apply_kv("use_threads=maybe").expect_err("bad bool");
        assert!(err.to_string().contains("invalid bool value"));
        assert!(cfg.apply_kv("batch_size_rows=0").is_err());
    }

    #[test]
    fn env_values_overlay_defaults() {
        let env = HashMap::from([
            (ENV_ENABLE_STATISTICS, "0"),
            (ENV_ENABLE_DISTINCT_COUNT, "1"),
        ]);
        let mut cfg = BridgeConfig::default();
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .expect("env overlay");
        assert!(!cfg.statistics_enabled);
        assert!(cfg.distinct_count_enabled);
        assert!(cfg.use_threads);
    }

    #[test]
    fn json_config_keeps_missing_defaults() {
        let cfg = BridgeConfig::from_json(r#"{"deferred_release": true}"#).expect("json");
        assert!(cfg.deferred_release);
        assert_eq!(cfg.batch_size_rows, 8192);
    }
}
