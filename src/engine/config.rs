// lidlink Engine — Resolver Configuration
// ResolverConfig, StrategyConfig, CacheConfig, load_config

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Constants ──────────────────────────────────────────────────────────

pub const CONFIG_ENV: &str = "LIDLINK_CONFIG";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
const DEFAULT_CONFIG_FILE: &str = "lidlink.toml";

// ── Config Structs ─────────────────────────────────────────────────────

/// Which correlation strategies run, and how strict the fuzzy pass is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub exact: bool,
    pub fuzzy: bool,
    pub group_backfill: bool,
    /// Similarity threshold in [0, 1] for the fuzzy pass (default: 0.8)
    pub fuzzy_threshold: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            exact: true,
            fuzzy: true,
            group_backfill: true,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

/// TTLs for the three resolver caches, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub group_snapshot_ttl_secs: u64,
    pub participant_ttl_secs: u64,
    pub contact_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            group_snapshot_ttl_secs: GROUP_SNAPSHOT_TTL_SECS,
            participant_ttl_secs: PARTICIPANT_TTL_SECS,
            contact_ttl_secs: CONTACT_TTL_SECS,
        }
    }
}

/// Evolution API connection used for group membership fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Evolution API base URL (default: "http://127.0.0.1:8085")
    pub api_url: String,
    pub api_key: String,
    /// Instance name for Evolution API (default: "lidlink")
    pub instance_name: String,
    /// Port for the local webhook listener (default: 8086)
    pub webhook_port: u16,
    /// Port for the query listener; 0 disables it (default: 8087)
    pub query_port: u16,
    /// Groups fetched once at startup to seed the registry.
    pub backfill_groups: Vec<String>,
    pub backfill_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            api_url: "http://127.0.0.1:8085".into(),
            api_key: String::new(),
            instance_name: "lidlink".into(),
            webhook_port: 8086,
            query_port: 8087,
            backfill_groups: vec![],
            backfill_timeout_secs: BACKFILL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Directory holding the snapshot file. `DATA_DIR` overrides it.
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    pub flush_interval_secs: u64,
    pub pending_retention_secs: u64,
    pub pending_sweep_interval_secs: u64,
    /// Country code substituted for a leading trunk `0` (e.g. "62"). Off when None.
    pub trunk_country_code: Option<String>,
    pub strategies: StrategyConfig,
    pub cache: CacheConfig,
    pub transport: TransportConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("lidlink"))
            .unwrap_or_else(|| PathBuf::from("."));
        ResolverConfig {
            data_dir,
            snapshot_file: SNAPSHOT_FILE_NAME.into(),
            flush_interval_secs: FLUSH_INTERVAL_SECS,
            pending_retention_secs: PENDING_RETENTION_SECS,
            pending_sweep_interval_secs: PENDING_SWEEP_INTERVAL_SECS,
            trunk_country_code: None,
            strategies: StrategyConfig::default(),
            cache: CacheConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Config rooted at `data_dir`, everything else default. Handy for tests.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        ResolverConfig { data_dir: data_dir.into(), ..Default::default() }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_sweep_interval_secs.max(1))
    }

    pub fn pending_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_retention_secs as i64)
    }

    pub fn backfill_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.backfill_timeout_secs.max(1))
    }

    pub fn validate(&self) -> EngineResult<()> {
        let t = self.strategies.fuzzy_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(EngineError::Config(format!("fuzzy_threshold {} outside [0, 1]", t)));
        }
        if self.snapshot_file.trim().is_empty() {
            return Err(EngineError::Config("snapshot_file is empty".into()));
        }
        Ok(())
    }
}

// ── Config Loading ─────────────────────────────────────────────────────

/// Parse a TOML config file. Missing keys fall back to defaults.
pub fn load_config_file(path: &Path) -> EngineResult<ResolverConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: ResolverConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// Resolve the daemon config: `$LIDLINK_CONFIG` or `./lidlink.toml` if it
/// exists, otherwise defaults. `$DATA_DIR` always wins for the data directory.
pub fn load_config() -> EngineResult<ResolverConfig> {
    let path = std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut config = if path.exists() {
        info!("[config] Loading {}", path.display());
        load_config_file(&path)?
    } else {
        if std::env::var(CONFIG_ENV).is_ok() {
            warn!("[config] {} not found, using defaults", path.display());
        }
        ResolverConfig::default()
    };

    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            config.data_dir = PathBuf::from(dir);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let c = ResolverConfig::default();
        assert_eq!(c.flush_interval_secs, 300);
        assert_eq!(c.pending_retention_secs, 86_400);
        assert_eq!(c.cache.group_snapshot_ttl_secs, 300);
        assert_eq!(c.cache.participant_ttl_secs, 1800);
        assert_eq!(c.cache.contact_ttl_secs, 3600);
        assert!((c.strategies.fuzzy_threshold - 0.8).abs() < f64::EPSILON);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c: ResolverConfig = toml::from_str(
            r#"
            data_dir = "/tmp/lid"
            [strategies]
            fuzzy = false
            [transport]
            backfill_groups = ["1203630@g.us"]
            "#,
        )
        .unwrap();
        assert_eq!(c.snapshot_path(), PathBuf::from("/tmp/lid/lid_phone_mappings.json"));
        assert!(!c.strategies.fuzzy);
        assert!(c.strategies.exact);
        assert_eq!(c.transport.backfill_groups.len(), 1);
        assert_eq!(c.transport.webhook_port, 8086);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut c = ResolverConfig::default();
        c.strategies.fuzzy_threshold = 1.5;
        assert!(matches!(c.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lidlink.toml");
        std::fs::write(&path, "flush_interval_secs = 60\n").unwrap();
        let c = load_config_file(&path).unwrap();
        assert_eq!(c.flush_interval_secs, 60);
    }

    #[test]
    fn example_file_parses() {
        let c: ResolverConfig = toml::from_str(include_str!("../../lidlink.example.toml")).unwrap();
        assert!(c.validate().is_ok());
        assert_eq!(c.transport.query_port, 8087);
    }
}
