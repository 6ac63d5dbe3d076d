use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crease_adapters::{
    AdapterRuntime, SourceSettings, CRICBUZZ_BASE_URL, CRICBUZZ_ENDPOINTS, CRICBUZZ_SOURCE_ID,
};
use crease_storage::{BackoffPolicy, HttpClientConfig, DEFAULT_USER_AGENT};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

pub const SOURCES_FILE: &str = "sources.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    /// Adapter settings; Cricbuzz fills unset fields with its public site.
    pub fn settings(&self) -> SourceSettings {
        let is_cricbuzz = self.source_id == CRICBUZZ_SOURCE_ID;
        let base_url = match &self.base_url {
            Some(url) => url.clone(),
            None if is_cricbuzz => CRICBUZZ_BASE_URL.to_string(),
            None => String::new(),
        };
        let endpoints = if self.endpoints.is_empty() && is_cricbuzz {
            CRICBUZZ_ENDPOINTS.iter().map(ToString::to_string).collect()
        } else {
            self.endpoints.clone()
        };
        SourceSettings {
            source_id: self.source_id.clone(),
            base_url,
            endpoints,
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig {
                source_id: CRICBUZZ_SOURCE_ID.to_string(),
                display_name: "Cricbuzz".to_string(),
                enabled: true,
                base_url: None,
                endpoints: Vec::new(),
                headers: BTreeMap::new(),
            }],
        }
    }
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text)?;
        let mut seen = HashSet::new();
        for source in &registry.sources {
            if source.source_id.trim().is_empty() {
                bail!("source with display name {:?} has an empty source_id", source.display_name);
            }
            if !seen.insert(source.source_id.as_str()) {
                bail!("duplicate source_id {:?}", source.source_id);
            }
        }
        Ok(registry)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Reads `sources.yaml` under the workspace root. A missing file means the
/// built-in registry; a file that exists but doesn't parse is an error.
pub async fn load_source_registry(workspace_root: &Path) -> Result<SourceRegistry> {
    let path = workspace_root.join(SOURCES_FILE);
    match fs::read_to_string(&path).await {
        Ok(text) => {
            SourceRegistry::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no source registry found; using built-in default");
            Ok(SourceRegistry::default())
        }
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub http_max_attempts: usize,
    pub cache_ttl: Duration,
    pub stale_live_after: chrono::Duration,
    pub sync_interval: Duration,
    pub sweep_interval: Duration,
    pub scheduler_enabled: bool,
    pub synthetic_seed: Option<u64>,
    pub workspace_root: PathBuf,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://crease.db".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(10),
            http_max_attempts: 3,
            cache_ttl: Duration::from_secs(300),
            stale_live_after: chrono::Duration::hours(8),
            sync_interval: Duration::from_secs(6 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            scheduler_enabled: false,
            synthetic_seed: None,
            workspace_root: PathBuf::from("."),
            web_port: 8000,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys take defaults;
    /// set-but-malformed keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let stale_hours: i64 = parse_positive(&get, "CREASE_STALE_LIVE_HOURS", 8)?;
        let stale_live_after = chrono::Duration::try_hours(stale_hours)
            .ok_or_else(|| anyhow!("invalid CREASE_STALE_LIVE_HOURS={stale_hours}: out of range"))?;
        let sync_hours: u64 = parse_positive(&get, "CREASE_SYNC_INTERVAL_HOURS", 6)?;
        let sweep_minutes: u64 = parse_positive(&get, "CREASE_SWEEP_INTERVAL_MINUTES", 60)?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            user_agent: get("CREASE_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout: Duration::from_secs(parse_positive(
                &get,
                "CREASE_HTTP_TIMEOUT_SECS",
                10,
            )?),
            http_max_attempts: parse_positive(&get, "CREASE_HTTP_MAX_ATTEMPTS", 3)?,
            cache_ttl: Duration::from_secs(parse_or(&get, "CREASE_CACHE_TTL_SECS", 300)?),
            stale_live_after,
            sync_interval: scaled_secs("CREASE_SYNC_INTERVAL_HOURS", sync_hours, 60 * 60)?,
            sweep_interval: scaled_secs("CREASE_SWEEP_INTERVAL_MINUTES", sweep_minutes, 60)?,
            scheduler_enabled: match get("CREASE_SCHEDULER_ENABLED") {
                Some(v) => parse_flag("CREASE_SCHEDULER_ENABLED", &v)?,
                None => defaults.scheduler_enabled,
            },
            synthetic_seed: get("CREASE_SYNTHETIC_SEED")
                .map(|v| parse_value("CREASE_SYNTHETIC_SEED", &v))
                .transpose()?,
            workspace_root: get("CREASE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            web_port: parse_or(&get, "CREASE_WEB_PORT", defaults.web_port)?,
        })
    }

    pub fn adapter_runtime(&self) -> AdapterRuntime {
        AdapterRuntime {
            http: HttpClientConfig {
                timeout: self.http_timeout,
                user_agent: Some(self.user_agent.clone()),
                backoff: BackoffPolicy::default().with_max_attempts(self.http_max_attempts),
                ..Default::default()
            },
            cache_ttl: self.cache_ttl,
            synthetic_seed: self.synthetic_seed,
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|err| anyhow!("invalid {key}={raw:?}: {err}"))
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_positive<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default + Display,
    T::Err: Display,
{
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        bail!("invalid {key}={value}: must be greater than zero");
    }
    Ok(value)
}

fn scaled_secs(key: &str, value: u64, secs_per_unit: u64) -> Result<Duration> {
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("invalid {key}={value}: out of range"))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid {key}={raw:?}: expected true or false"),
    }
}
