//! Source adapter contract, the Cricbuzz adapter and the offline synthetic
//! adapter. Adapters never fail a run over fetch problems: unusable pages
//! are recorded as fallbacks and synthetic data fills the gap.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crease_core::CandidateBatch;
use crease_storage::{HttpClientConfig, HttpFetcher, ResponseCache};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod extract;
pub mod reference;
pub mod synthetic;

pub use extract::{extract_card, extract_card_with_fallback, extract_page, Outcome};
pub use reference::{known_team, KnownTeam, KNOWN_TEAMS, ROSTER};

pub const CRATE_NAME: &str = "crease-adapters";

pub const CRICBUZZ_SOURCE_ID: &str = "cricbuzz";
pub const SYNTHETIC_SOURCE_ID: &str = "synthetic";
pub const CRICBUZZ_BASE_URL: &str = "https://www.cricbuzz.com";
pub const CRICBUZZ_ENDPOINTS: [&str; 4] = [
    "/cricket-match/live-scores",
    "/cricket-schedule/upcoming-matches",
    "/cricket-schedule/series",
    "/cricket-scorecard-archives",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
}

/// Why a fetched target was not used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackReason {
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected content type {0:?}")]
    NotHtml(Option<String>),
    #[error("error page signature")]
    ErrorPage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMaterial {
    Page {
        url: String,
        html: String,
        from_cache: bool,
    },
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, Default)]
pub struct CollectedBatch {
    pub source_id: String,
    pub batch: CandidateBatch,
    pub pages_used: usize,
    pub fallbacks: Vec<FallbackReason>,
    pub synthetic_matches: bool,
}

impl CollectedBatch {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.synthetic_matches || !self.fallbacks.is_empty()
    }
}

/// Where a source lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub source_id: String,
    pub base_url: String,
    pub endpoints: Vec<String>,
    pub headers: Vec<(String, String)>,
}

impl SourceSettings {
    pub fn cricbuzz() -> Self {
        Self {
            source_id: CRICBUZZ_SOURCE_ID.to_string(),
            base_url: CRICBUZZ_BASE_URL.to_string(),
            endpoints: CRICBUZZ_ENDPOINTS.iter().map(ToString::to_string).collect(),
            headers: Vec::new(),
        }
    }
}

/// Process-wide knobs shared by every adapter.
#[derive(Debug, Clone)]
pub struct AdapterRuntime {
    pub http: HttpClientConfig,
    pub cache_ttl: Duration,
    pub synthetic_seed: Option<u64>,
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self {
            http: HttpClientConfig::default(),
            cache_ttl: Duration::from_secs(300),
            synthetic_seed: None,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    /// Gathers one run's candidates. Network trouble is reported through
    /// [`CollectedBatch::fallbacks`], not as an error.
    async fn collect(&self, ctx: &AdapterContext) -> Result<CollectedBatch, AdapterError>;
}

fn seeded_rng(seed: Option<u64>) -> Mutex<StdRng> {
    Mutex::new(match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    })
}

pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

#[derive(Debug)]
pub struct CricbuzzAdapter {
    settings: SourceSettings,
    fetcher: HttpFetcher,
    cache: ResponseCache,
    rng: Mutex<StdRng>,
}

impl CricbuzzAdapter {
    pub fn new(settings: SourceSettings, runtime: &AdapterRuntime) -> Result<Self> {
        let mut http = runtime.http.clone();
        http.headers.extend(settings.headers.iter().cloned());
        Ok(Self {
            fetcher: HttpFetcher::new(http)?,
            cache: ResponseCache::new(runtime.cache_ttl),
            rng: seeded_rng(runtime.synthetic_seed),
            settings,
        })
    }

    /// Cached page, fresh page, or the reason the target can't be used.
    /// Only usable HTML is cached.
    pub async fn fetch(&self, ctx: &AdapterContext, url: &str) -> RawMaterial {
        if let Some(hit) = self.cache.get(url).await {
            debug!(url, "response cache hit");
            return RawMaterial::Page {
                url: hit.final_url.clone(),
                html: hit.text(),
                from_cache: true,
            };
        }

        let resp = match self
            .fetcher
            .fetch_bytes(ctx.run_id, &self.settings.source_id, url)
            .await
        {
            Ok(resp) => resp,
            Err(err) => return RawMaterial::Fallback(FallbackReason::Network(err.to_string())),
        };
        if !resp.is_html() {
            return RawMaterial::Fallback(FallbackReason::NotHtml(resp.content_type.clone()));
        }
        let html = resp.text();
        if extract::is_error_page(&html) {
            return RawMaterial::Fallback(FallbackReason::ErrorPage);
        }

        let final_url = resp.final_url.clone();
        self.cache.insert(url, resp).await;
        RawMaterial::Page {
            url: final_url,
            html,
            from_cache: false,
        }
    }

    fn synthesize(&self, now: DateTime<Utc>, with_matches: bool) -> CandidateBatch {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        CandidateBatch {
            teams: synthetic::reference_teams(),
            players: synthetic::roster_players(&mut *rng),
            matches: if with_matches {
                synthetic::synthetic_matches(&mut *rng, now)
            } else {
                Vec::new()
            },
        }
    }
}

#[async_trait]
impl SourceAdapter for CricbuzzAdapter {
    fn source_id(&self) -> &str {
        &self.settings.source_id
    }

    async fn collect(&self, ctx: &AdapterContext) -> Result<CollectedBatch, AdapterError> {
        let mut collected = CollectedBatch::new(self.source_id());
        let mut extracted = CandidateBatch::default();
        let expired = self.cache.purge_expired().await;
        if expired > 0 {
            debug!(expired, "purged expired responses");
        }

        for endpoint in &self.settings.endpoints {
            let url = endpoint_url(&self.settings.base_url, endpoint);
            match self.fetch(ctx, &url).await {
                RawMaterial::Page {
                    url,
                    html,
                    from_cache,
                } => {
                    let candidates = extract::extract_page(&html, ctx.started_at);
                    debug!(%url, from_cache, candidates = candidates.len(), "page extracted");
                    candidates.into_iter().for_each(|c| extracted.push(c));
                    collected.pages_used += 1;
                }
                RawMaterial::Fallback(reason) => {
                    warn!(
                        source_id = %self.settings.source_id,
                        %url,
                        %reason,
                        "source target unusable; synthetic data will fill in"
                    );
                    collected.fallbacks.push(reason);
                }
            }
        }

        collected.synthetic_matches = extracted.matches.is_empty();
        if collected.synthetic_matches {
            info!(
                source_id = %self.settings.source_id,
                "no matches extracted; generating synthetic fixtures"
            );
        }
        collected.batch = self.synthesize(ctx.started_at, collected.synthetic_matches);
        collected.batch.extend(extracted);
        Ok(collected)
    }
}

/// Always-offline source: reference data plus synthetic fixtures.
#[derive(Debug)]
pub struct SyntheticAdapter {
    rng: Mutex<StdRng>,
}

impl SyntheticAdapter {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded_rng(seed),
        }
    }
}

#[async_trait]
impl SourceAdapter for SyntheticAdapter {
    fn source_id(&self) -> &str {
        SYNTHETIC_SOURCE_ID
    }

    async fn collect(&self, ctx: &AdapterContext) -> Result<CollectedBatch, AdapterError> {
        let batch = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            synthetic::synthetic_batch(&mut *rng, ctx.started_at)
        };
        Ok(CollectedBatch {
            source_id: SYNTHETIC_SOURCE_ID.to_string(),
            batch,
            pages_used: 0,
            fallbacks: Vec::new(),
            synthetic_matches: true,
        })
    }
}

pub fn adapter_for_source(
    settings: SourceSettings,
    runtime: &AdapterRuntime,
) -> Result<Option<Box<dyn SourceAdapter>>> {
    match settings.source_id.as_str() {
        CRICBUZZ_SOURCE_ID => Ok(Some(Box::new(CricbuzzAdapter::new(settings, runtime)?))),
        SYNTHETIC_SOURCE_ID => Ok(Some(Box::new(SyntheticAdapter::new(runtime.synthetic_seed)))),
        _ => Ok(None),
    }
}
