//! Engine configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use shelflife_core::StoreId;
use shelflife_pricing::DEFAULT_PRICE_EPSILON;

use crate::automation::AutomationSchedule;
use crate::sync::ProcessorConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A downstream system to push price changes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Postgres queue when set, in-memory queue otherwise.
    pub database_url: Option<String>,
    /// Stores that get a periodic driver.
    pub stores: Vec<StoreId>,
    pub schedule: AutomationSchedule,
    pub targets: Vec<TargetConfig>,
    pub processor: ProcessorConfig,
    pub sync_batch: usize,
    pub price_epsilon: Decimal,
    pub bind_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            stores: Vec::new(),
            schedule: AutomationSchedule::default(),
            targets: Vec::new(),
            processor: ProcessorConfig::default(),
            sync_batch: 50,
            price_epsilon: DEFAULT_PRICE_EPSILON,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, test map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = EngineConfig::default();

        cfg.database_url = get("SHELFLIFE_DATABASE_URL");

        if let Some(raw) = get("SHELFLIFE_STORES") {
            cfg.stores = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    StoreId::from_str(s)
                        .map_err(|e| ConfigError::invalid("SHELFLIFE_STORES", s, e.to_string()))
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(v) = get("SHELFLIFE_PRICING_INTERVAL_SECS") {
            cfg.schedule.pricing_interval = secs("SHELFLIFE_PRICING_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SHELFLIFE_WASTE_INTERVAL_SECS") {
            cfg.schedule.waste_interval = secs("SHELFLIFE_WASTE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SHELFLIFE_CORRELATION_INTERVAL_SECS") {
            cfg.schedule.correlation_interval = secs("SHELFLIFE_CORRELATION_INTERVAL_SECS", &v)?;
        }

        if let Some(raw) = get("SHELFLIFE_SYNC_TARGETS") {
            cfg.targets = parse_targets(&raw)?;
        }
        if let Some(v) = get("SHELFLIFE_SYNC_TIMEOUT_SECS") {
            cfg.processor.target_timeout = secs("SHELFLIFE_SYNC_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("SHELFLIFE_SYNC_MAX_ATTEMPTS") {
            cfg.processor.max_attempts = positive("SHELFLIFE_SYNC_MAX_ATTEMPTS", &v)? as u32;
        }
        if let Some(v) = get("SHELFLIFE_SYNC_STALE_SECS") {
            cfg.processor.stale_after = secs("SHELFLIFE_SYNC_STALE_SECS", &v)?;
        }
        if let Some(v) = get("SHELFLIFE_SYNC_MAX_IN_FLIGHT_PER_TARGET") {
            cfg.processor.max_in_flight_per_target =
                positive("SHELFLIFE_SYNC_MAX_IN_FLIGHT_PER_TARGET", &v)? as usize;
        }
        if let Some(v) = get("SHELFLIFE_SYNC_CONCURRENCY") {
            cfg.processor.max_concurrency = positive("SHELFLIFE_SYNC_CONCURRENCY", &v)? as usize;
        }
        if let Some(v) = get("SHELFLIFE_SYNC_BATCH") {
            cfg.sync_batch = positive("SHELFLIFE_SYNC_BATCH", &v)? as usize;
        }

        if let Some(v) = get("SHELFLIFE_PRICE_EPSILON") {
            let eps = Decimal::from_str(v.trim())
                .map_err(|e| ConfigError::invalid("SHELFLIFE_PRICE_EPSILON", &v, e.to_string()))?;
            if eps.is_sign_negative() {
                return Err(ConfigError::invalid("SHELFLIFE_PRICE_EPSILON", &v, "must be >= 0"));
            }
            cfg.price_epsilon = eps;
        }

        if let Some(v) = get("SHELFLIFE_BIND_ADDR") {
            cfg.bind_addr = v
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| {
                    ConfigError::invalid("SHELFLIFE_BIND_ADDR", &v, e.to_string())
                })?;
        }

        if cfg.targets.is_empty() {
            warn!("SHELFLIFE_SYNC_TARGETS not set; price changes will not be enqueued for any system");
        }
        if cfg.database_url.is_none() {
            warn!("SHELFLIFE_DATABASE_URL not set; using the in-memory sync queue");
        }

        Ok(cfg)
    }
}

fn positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(key, raw, "must be > 0")),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(key, raw, e.to_string())),
    }
}

fn secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    positive(key, raw).map(Duration::from_secs)
}

/// `name=url,name=url`
fn parse_targets(raw: &str) -> Result<Vec<TargetConfig>, ConfigError> {
    let mut targets: Vec<TargetConfig> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, url)) = entry.split_once('=') else {
            return Err(ConfigError::invalid("SHELFLIFE_SYNC_TARGETS", entry, "expected name=url"));
        };
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "SHELFLIFE_SYNC_TARGETS",
                entry,
                "expected name=http(s)://...",
            ));
        }
        if targets.iter().any(|t| t.name == name) {
            return Err(ConfigError::invalid("SHELFLIFE_SYNC_TARGETS", entry, "duplicate target name"));
        }
        targets.push(TargetConfig {
            name: name.to_string(),
            url: url.to_string(),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.schedule.pricing_interval, Duration::from_secs(3600));
        assert_eq!(cfg.schedule.waste_interval, Duration::from_secs(21600));
        assert_eq!(cfg.schedule.correlation_interval, Duration::from_secs(86400));
        assert_eq!(cfg.processor.max_attempts, 3);
        assert_eq!(cfg.processor.stale_after, Duration::from_secs(300));
        assert_eq!(cfg.processor.target_timeout, Duration::from_secs(10));
        assert_eq!(cfg.sync_batch, 50);
        assert_eq!(cfg.price_epsilon, Decimal::new(1, 2));
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn parses_targets_and_stores() {
        let store = StoreId::new();
        let store_raw = store.to_string();
        let cfg = from(&[
            ("SHELFLIFE_SYNC_TARGETS", "pos=http://pos.local/prices, delivery=https://d.example/api"),
            ("SHELFLIFE_STORES", store_raw.as_str()),
            ("SHELFLIFE_PRICE_EPSILON", "0.05"),
        ])
        .unwrap();

        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.targets[1].name, "delivery");
        assert_eq!(cfg.stores, vec![store]);
        assert_eq!(cfg.price_epsilon, Decimal::new(5, 2));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(from(&[("SHELFLIFE_SYNC_MAX_ATTEMPTS", "zero")]).is_err());
        assert!(from(&[("SHELFLIFE_SYNC_BATCH", "0")]).is_err());
        assert!(from(&[("SHELFLIFE_SYNC_TARGETS", "pos")]).is_err());
        assert!(from(&[("SHELFLIFE_SYNC_TARGETS", "pos=ftp://x")]).is_err());
        assert!(from(&[("SHELFLIFE_STORES", "not-a-uuid")]).is_err());
        assert!(from(&[("SHELFLIFE_PRICE_EPSILON", "-1")]).is_err());
        assert!(from(&[("SHELFLIFE_BIND_ADDR", "localhost")]).is_err());
    }
}
