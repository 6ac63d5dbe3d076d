//! Single-flight ingestion runs: collect, merge, sweep, record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use crease_adapters::{adapter_for_source, AdapterContext, AdapterRuntime, SourceAdapter};
use crease_core::CandidateBatch;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SourceRegistry;
use crate::reconcile::{self, MergeOutcome, ReconcileError};
use crate::store::{RunFinish, RunState, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub running: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub pages_used: usize,
    pub fallbacks: Vec<String>,
    pub synthetic_matches: bool,
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources: Vec<SourceReport>,
    pub outcome: MergeOutcome,
    pub swept: Vec<i64>,
}

impl RunReport {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            sources: Vec::new(),
            outcome: MergeOutcome::default(),
            swept: Vec::new(),
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.synthetic_matches || !s.fallbacks.is_empty())
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run was already active.
    Rejected,
    Failed { report: RunReport, error: anyhow::Error },
}

/// Clears the running flag when dropped, however the run ends.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Health {
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Inner {
    store: Store,
    adapters: Vec<Box<dyn SourceAdapter>>,
    stale_live_after: chrono::Duration,
    running: Arc<AtomicBool>,
    health: RwLock<Health>,
}

#[derive(Clone)]
pub struct IngestCoordinator {
    inner: Arc<Inner>,
}

impl IngestCoordinator {
    pub fn new(
        store: Store,
        adapters: Vec<Box<dyn SourceAdapter>>,
        stale_live_after: chrono::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                adapters,
                stale_live_after,
                running: Arc::new(AtomicBool::new(false)),
                health: RwLock::new(Health::default()),
            }),
        }
    }

    /// One adapter per enabled source. An enabled source nobody can serve
    /// is a configuration error.
    pub fn from_registry(
        store: Store,
        registry: &SourceRegistry,
        runtime: &AdapterRuntime,
        stale_live_after: chrono::Duration,
    ) -> Result<Self> {
        let mut adapters = Vec::new();
        for source in registry.enabled() {
            match adapter_for_source(source.settings(), runtime)
                .with_context(|| format!("building adapter for {}", source.source_id))?
            {
                Some(adapter) => adapters.push(adapter),
                None => bail!("no adapter registered for {}", source.source_id),
            }
        }
        if adapters.is_empty() {
            warn!("no enabled sources; runs will only sweep");
        }
        Ok(Self::new(store, adapters, stale_live_after))
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub async fn run_status(&self) -> RunStatus {
        let health = self.inner.health.read().await;
        RunStatus {
            running: self.is_running(),
            last_update: health.last_update,
            last_error: health.last_error.clone(),
        }
    }

    /// Loads `last_update` from the newest successful run on record.
    pub async fn restore_last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let last = self
            .inner
            .store
            .last_successful_run()
            .await
            .context("loading last successful run")?;
        self.inner.health.write().await.last_update = last;
        Ok(last)
    }

    /// Starts a run in the background. Rejected, not queued, while another
    /// run is active.
    pub fn trigger_run(&self) -> TriggerResponse {
        let Some(guard) = RunGuard::acquire(&self.inner.running) else {
            info!("run requested while another is active; rejected");
            return TriggerResponse { accepted: false };
        };
        let coordinator = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            coordinator.execute().await;
        });
        TriggerResponse { accepted: true }
    }

    /// Runs to completion in the caller's task.
    pub async fn run_once(&self) -> RunOutcome {
        let Some(_guard) = RunGuard::acquire(&self.inner.running) else {
            info!("run already active; skipping");
            return RunOutcome::Rejected;
        };
        self.execute().await
    }

    /// Closes stale live matches. Does not touch the running flag.
    pub async fn sweep(&self) -> Result<Vec<i64>> {
        let swept = self
            .inner
            .store
            .sweep_stale_live(Utc::now(), self.inner.stale_live_after)
            .await
            .context("sweeping stale live matches")?;
        if swept.is_empty() {
            info!("sweep found no stale live matches");
        } else {
            info!(count = swept.len(), ids = ?swept, "stale live matches completed");
        }
        Ok(swept)
    }

    async fn execute(&self) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let mut report = RunReport::new(run_id, Utc::now());
        let span = info_span!("ingest_run", %run_id);

        async move {
            info!("ingest run started");
            let result = self.pipeline(&mut report).await;
            let finished_at = Utc::now();

            let (state, error) = match &result {
                Ok(()) => (RunState::Succeeded, None),
                Err(err) => (RunState::Failed, Some(format!("{err:#}"))),
            };
            let finish = RunFinish {
                finished_at,
                state,
                error: error.clone(),
                outcome: report.outcome,
                swept: report.swept.len(),
                used_fallback: report.used_fallback(),
            };
            if let Err(err) = self.inner.store.record_run_finished(run_id, &finish).await {
                warn!(error = %err, "could not record run result");
            }

            let mut health = self.inner.health.write().await;
            match result {
                Ok(()) => {
                    report.finished_at = Some(finished_at);
                    health.last_update = Some(finished_at);
                    health.last_error = None;
                    info!(
                        swept = report.swept.len(),
                        used_fallback = report.used_fallback(),
                        "ingest run completed"
                    );
                    RunOutcome::Completed(report)
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "ingest run failed");
                    health.last_error = error;
                    RunOutcome::Failed { report, error: err }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn pipeline(&self, report: &mut RunReport) -> Result<()> {
        self.inner
            .store
            .record_run_started(report.run_id, report.started_at)
            .await
            .context("recording run start")?;

        let ctx = AdapterContext {
            run_id: report.run_id,
            started_at: report.started_at,
        };
        let mut batch = CandidateBatch::default();
        for adapter in &self.inner.adapters {
            let collected = adapter
                .collect(&ctx)
                .await
                .with_context(|| format!("collecting from {}", adapter.source_id()))?;
            for reason in &collected.fallbacks {
                warn!(source_id = %collected.source_id, %reason, "fallback used");
            }
            info!(
                source_id = %collected.source_id,
                pages = collected.pages_used,
                candidates = collected.batch.len(),
                synthesized = collected.batch.synthesized_count(),
                "source collected"
            );
            report.sources.push(SourceReport {
                source_id: collected.source_id.clone(),
                pages_used: collected.pages_used,
                fallbacks: collected.fallbacks.iter().map(ToString::to_string).collect(),
                synthetic_matches: collected.synthetic_matches,
                candidates: collected.batch.len(),
            });
            batch.extend(collected.batch);
        }

        match reconcile::merge(self.inner.store.pool(), &batch).await {
            Ok(outcome) => report.outcome = outcome,
            Err(err) => {
                let ReconcileError::Persistence { partial, .. } = &err;
                report.outcome = *partial;
                return Err(err.into());
            }
        }

        report.swept = self.sweep().await?;
        Ok(())
    }

    /// Full runs every `sync_interval`, sweeps every `sweep_interval`.
    pub async fn start_scheduler(
        &self,
        sync_interval: Duration,
        sweep_interval: Duration,
    ) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let coordinator = self.clone();
        let sync_job = Job::new_repeated_async(sync_interval, move |_uuid, _l| {
            let coordinator = coordinator.clone();
            Box::pin(async move {
                match coordinator.run_once().await {
                    RunOutcome::Rejected => info!("scheduled run skipped; another run is active"),
                    RunOutcome::Failed { error, .. } => {
                        warn!(error = %format!("{error:#}"), "scheduled run failed")
                    }
                    RunOutcome::Completed(_) => {}
                }
            })
        })
        .with_context(|| format!("creating sync job every {sync_interval:?}"))?;
        sched.add(sync_job).await.context("adding sync job")?;

        let coordinator = self.clone();
        let sweep_job = Job::new_repeated_async(sweep_interval, move |_uuid, _l| {
            let coordinator = coordinator.clone();
            Box::pin(async move {
                if let Err(err) = coordinator.sweep().await {
                    warn!(error = %format!("{err:#}"), "scheduled sweep failed");
                }
            })
        })
        .with_context(|| format!("creating sweep job every {sweep_interval:?}"))?;
        sched.add(sweep_job).await.context("adding sweep job")?;

        sched.start().await.context("starting scheduler")?;
        info!(?sync_interval, ?sweep_interval, "scheduler started");
        Ok(sched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use crease_adapters::{AdapterError, CollectedBatch, SyntheticAdapter};
    use crease_core::{MatchCandidate, MatchStatus, Sourced, TeamCandidate};
    use tokio::sync::Notify;
    use tokio::time::timeout;

    async fn store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn wait_idle(coordinator: &IngestCoordinator) {
        timeout(Duration::from_secs(5), async {
            while coordinator.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run did not finish");
    }

    struct GatedAdapter {
        started: Arc<Notify>,
        release: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceAdapter for GatedAdapter {
        fn source_id(&self) -> &str {
            "gated"
        }

        async fn collect(&self, _ctx: &AdapterContext) -> Result<CollectedBatch, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(CollectedBatch::new("gated"))
        }
    }

    struct FlakyAdapter {
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SourceAdapter for FlakyAdapter {
        fn source_id(&self) -> &str {
            "flaky"
        }

        async fn collect(&self, _ctx: &AdapterContext) -> Result<CollectedBatch, AdapterError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AdapterError::Message("parser exploded".into()));
            }
            Ok(CollectedBatch::new("flaky"))
        }
    }

    #[tokio::test]
    async fn second_request_is_rejected_while_running() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = IngestCoordinator::new(
            store().await,
            vec![Box::new(GatedAdapter {
                started: started.clone(),
                release: release.clone(),
                calls: calls.clone(),
            })],
            chrono::Duration::hours(8),
        );

        assert!(coordinator.trigger_run().accepted);
        timeout(Duration::from_secs(5), started.notified()).await.unwrap();

        assert!(coordinator.run_status().await.running);
        assert!(!coordinator.trigger_run().accepted);
        assert!(matches!(coordinator.run_once().await, RunOutcome::Rejected));

        release.notify_one();
        wait_idle(&coordinator).await;

        let status = coordinator.run_status().await;
        assert!(!status.running);
        assert!(status.last_update.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_runs_while_a_full_run_is_active() {
        let store = store().await;
        let now = Utc::now();
        let batch = CandidateBatch {
            teams: vec![
                Sourced::Extracted(TeamCandidate::named("India")),
                Sourced::Extracted(TeamCandidate::named("England")),
            ],
            matches: vec![Sourced::Extracted(MatchCandidate {
                external_id: "cb_stale".into(),
                status: Some(MatchStatus::Live),
                format: None,
                team1: "India".into(),
                team2: "England".into(),
                winner: None,
                team1_score: None,
                team2_score: None,
                result: None,
                venue: None,
                competition: None,
                start_time: Some(now - chrono::Duration::hours(9)),
            })],
            ..Default::default()
        };
        reconcile::merge(store.pool(), &batch).await.unwrap();

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let coordinator = IngestCoordinator::new(
            store,
            vec![Box::new(GatedAdapter {
                started: started.clone(),
                release: release.clone(),
                calls: Arc::new(AtomicUsize::new(0)),
            })],
            chrono::Duration::hours(8),
        );

        assert!(coordinator.trigger_run().accepted);
        timeout(Duration::from_secs(5), started.notified()).await.unwrap();
        let swept = coordinator.sweep().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert!(coordinator.is_running());

        release.notify_one();
        wait_idle(&coordinator).await;
        let m = coordinator
            .store()
            .get_match_by_external_id("cb_stale")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.status, MatchStatus::Completed);
    }

    #[tokio::test]
    async fn failed_run_releases_flag_and_keeps_last_update() {
        let coordinator = IngestCoordinator::new(
            store().await,
            vec![Box::new(FlakyAdapter {
                fail: Arc::new(AtomicBool::new(true)),
            })],
            chrono::Duration::hours(8),
        );

        let RunOutcome::Failed { report, error } = coordinator.run_once().await else {
            panic!("expected a failed run");
        };
        assert!(format!("{error:#}").contains("parser exploded"));

        let status = coordinator.run_status().await;
        assert!(!status.running);
        assert_eq!(status.last_update, None);
        assert!(status.last_error.as_deref().unwrap().contains("parser exploded"));

        let (state, recorded) = coordinator
            .store()
            .run_state(report.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, "failed");
        assert!(recorded.unwrap().contains("parser exploded"));
        assert_eq!(coordinator.restore_last_update().await.unwrap(), None);
    }

    #[tokio::test]
    async fn success_clears_previous_error() {
        let fail = Arc::new(AtomicBool::new(true));
        let adapter = Box::new(FlakyAdapter { fail: fail.clone() });
        let coordinator =
            IngestCoordinator::new(store().await, vec![adapter], chrono::Duration::hours(8));
        assert!(matches!(coordinator.run_once().await, RunOutcome::Failed { .. }));
        assert!(coordinator.run_status().await.last_error.is_some());

        fail.store(false, Ordering::SeqCst);
        assert!(matches!(coordinator.run_once().await, RunOutcome::Completed(_)));
        let status = coordinator.run_status().await;
        assert!(status.last_error.is_none());
        assert!(status.last_update.is_some());
        assert_eq!(coordinator.restore_last_update().await.unwrap(), status.last_update);
    }

    #[tokio::test]
    async fn synthetic_run_populates_the_store() {
        let coordinator = IngestCoordinator::new(
            store().await,
            vec![Box::new(SyntheticAdapter::new(Some(7)))],
            chrono::Duration::hours(8),
        );
        let RunOutcome::Completed(report) = coordinator.run_once().await else {
            panic!("expected a completed run");
        };
        assert!(report.used_fallback());
        assert_eq!(report.outcome.teams.created, 14);
        assert_eq!(report.outcome.players.created, 26);
        assert_eq!(report.outcome.matches.created, 5);

        let counts = coordinator.store().counts().await.unwrap();
        assert_eq!((counts.teams, counts.players, counts.matches), (14, 26, 5));

        let again = coordinator.run_once().await;
        assert!(matches!(again, RunOutcome::Completed(_)));
        assert_eq!(coordinator.store().counts().await.unwrap().teams, 14);
    }
}
