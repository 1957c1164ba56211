//! Runs every configured source through fetch, normalize, persist, classify
//! and the moderation log, isolating failures per item and per source.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::adapter::SourceAdapter;
use crate::classify::{Classifier, SentimentLabel};
use crate::error::{
    AdapterError, ClassificationError, ModerationWriteError, OrchestratorError, PersistenceError,
    SourceFailure,
};
use crate::model::{Comment, Platform, Post, RawPost, Source, TimeWindow};
use crate::moderation::{FlaggedComment, ModerationLog};
use crate::normalize::{has_publish_time, normalize_comment, normalize_post, SourceKey};
use crate::relevance::{is_relevant, matched_keywords};
use crate::report::{RunReport, RunSummary, SourceCounts, SourceReport, SourceState};
use crate::store::ContentStore;

/// One configured source for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTarget {
    pub platform: Platform,
    pub source_id: String,
    pub keywords: Vec<String>,
    /// Also walk comments of posts stored by an earlier run.
    pub recheck_known_posts: bool,
}

impl SourceTarget {
    pub fn new(platform: Platform, source_id: impl Into<String>) -> Self {
        Self {
            platform,
            source_id: source_id.into(),
            keywords: Vec::new(),
            recheck_known_posts: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub window: TimeWindow,
    pub comment_limit: usize,
    pub fetch_timeout: Duration,
    pub max_parallel_sources: usize,
    /// Consecutive store failures after which a source is abandoned. 0 never gives up.
    pub max_consecutive_item_failures: usize,
    pub error_max_chars: usize,
    pub title_max_chars: usize,
}

/// Set once, observed by every clone.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal nobody can trigger.
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProgress {
    pub platform: Platform,
    pub source_id: String,
    pub state: SourceState,
}

#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    pub running: bool,
    pub progress: Vec<SourceProgress>,
    pub last_run: Option<RunSummary>,
}

pub struct Orchestrator {
    adapters: HashMap<Platform, Arc<dyn SourceAdapter>>,
    store: Arc<dyn ContentStore>,
    classifier: Arc<dyn Classifier>,
    moderation: Arc<dyn ModerationLog>,
    run_lock: Mutex<()>,
    status: StdMutex<RunStatus>,
}

/// Counts consecutive store failures within one source.
struct FailureStreak {
    max: usize,
    count: usize,
}

impl FailureStreak {
    fn new(max: usize) -> Self {
        Self { max, count: 0 }
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    fn record(&mut self, err: &PersistenceError) -> Result<(), SourceFailure> {
        self.count += 1;
        if self.max > 0 && self.count >= self.max {
            return Err(SourceFailure::TooManyFailures {
                count: self.count,
                last: err.to_string(),
            });
        }
        Ok(())
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        classifier: Arc<dyn Classifier>,
        moderation: Arc<dyn ModerationLog>,
    ) -> Self {
        Self {
            adapters: HashMap::new(),
            store,
            classifier,
            moderation,
            run_lock: Mutex::new(()),
            status: StdMutex::new(RunStatus::default()),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn status(&self) -> RunStatus {
        let mut status = self
            .status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        status.running = self.run_lock.try_lock().is_err();
        status
    }

    fn update_status(&self, f: impl FnOnce(&mut RunStatus)) {
        if let Ok(mut status) = self.status.lock() {
            f(&mut status);
        }
    }

    fn set_state(&self, index: usize, state: SourceState) {
        self.update_status(|status| {
            if let Some(progress) = status.progress.get_mut(index) {
                progress.state = state;
            }
        });
    }

    /// One run over `targets`. Only one run may be in progress at a time; the
    /// lock is released on every exit path.
    pub async fn run(
        &self,
        targets: &[SourceTarget],
        config: &RunConfig,
        cancel: &CancelSignal,
    ) -> Result<RunReport, OrchestratorError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| OrchestratorError::AlreadyRunning)?;

        let started_at = Utc::now();
        self.update_status(|status| {
            status.progress = targets
                .iter()
                .map(|t| SourceProgress {
                    platform: t.platform,
                    source_id: t.source_id.clone(),
                    state: SourceState::Pending,
                })
                .collect();
        });
        info!(
            sources = targets.len(),
            window_start = %config.window.start,
            window_end = %config.window.end,
            "starting run"
        );

        let reports: Vec<SourceReport> = if config.max_parallel_sources <= 1 {
            let mut reports = Vec::with_capacity(targets.len());
            for (index, target) in targets.iter().enumerate() {
                reports.push(self.run_source(index, target, config, cancel).await);
            }
            reports
        } else {
            stream::iter(targets.iter().enumerate())
                .map(|(index, target)| self.run_source(index, target, config, cancel))
                .buffered(config.max_parallel_sources)
                .collect()
                .await
        };

        let report = RunReport::new(started_at, Utc::now(), reports);
        info!(
            posts_new = report.total.posts_new,
            comments_new = report.total.comments_new,
            moderation_written = report.total.moderation_written,
            failed_sources = report.failed_sources(),
            "run completed"
        );
        self.update_status(|status| status.last_run = Some(report.summary()));
        Ok(report)
    }

    async fn run_source(
        &self,
        index: usize,
        target: &SourceTarget,
        config: &RunConfig,
        cancel: &CancelSignal,
    ) -> SourceReport {
        let mut counts = SourceCounts::default();

        let outcome = if cancel.is_cancelled() {
            Err(SourceFailure::NotStarted)
        } else {
            self.set_state(index, SourceState::Running);
            info!(platform = %target.platform, source = %target.source_id, "fetching source");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SourceFailure::Cancelled),
                result = self.ingest_source(target, config, &mut counts) => result,
            }
        };

        match outcome {
            Ok(()) => {
                self.set_state(index, SourceState::Succeeded);
                info!(
                    platform = %target.platform,
                    source = %target.source_id,
                    posts_seen = counts.posts_seen,
                    posts_new = counts.posts_new,
                    comments_new = counts.comments_new,
                    moderation_written = counts.moderation_written,
                    item_errors = counts.item_errors,
                    "source done"
                );
                SourceReport::succeeded(target.platform, &target.source_id, counts)
            }
            Err(failure) => {
                self.set_state(index, SourceState::Failed);
                error!(
                    platform = %target.platform,
                    source = %target.source_id,
                    error = %failure,
                    "source failed"
                );
                SourceReport::failed(
                    target.platform,
                    &target.source_id,
                    counts,
                    &failure.to_string(),
                    config.error_max_chars,
                )
            }
        }
    }

    async fn ingest_source(
        &self,
        target: &SourceTarget,
        config: &RunConfig,
        counts: &mut SourceCounts,
    ) -> Result<(), SourceFailure> {
        let adapter = self.adapters.get(&target.platform).ok_or_else(|| {
            AdapterError::new(
                &target.source_id,
                format!("no adapter for platform {}", target.platform),
            )
        })?;
        let key = SourceKey::new(target.platform, target.source_id.clone());
        let mut source: Option<Source> = None;
        let mut streak = FailureStreak::new(config.max_consecutive_item_failures);

        let mut posts = adapter.fetch(&target.source_id, config.window);
        loop {
            let next = tokio::time::timeout(config.fetch_timeout, posts.next())
                .await
                .map_err(|_| AdapterError::timeout(&target.source_id, config.fetch_timeout))?;
            let Some(raw) = next else { break };
            let raw = raw?;

            let mut draft = match normalize_post(&key, &raw, Utc::now()) {
                Ok(draft) => draft,
                Err(e) => {
                    counts.item_errors += 1;
                    warn!(source = %target.source_id, error = %e, "skipping malformed post");
                    continue;
                }
            };

            // Undated posts carry the ingestion time and are always in the window.
            if has_publish_time(raw.published.as_ref()) {
                if config.window.is_before_start(draft.publish_time) {
                    debug!(source = %target.source_id, "reached window start");
                    break;
                }
                if config.window.is_after_end(draft.publish_time) {
                    debug!(post_id = %draft.platform_post_id, "newer than window end");
                    continue;
                }
            }
            counts.posts_seen += 1;

            let matched = matched_keywords(&draft.text, &target.keywords);
            if !is_relevant(&target.keywords, &matched) {
                counts.posts_filtered += 1;
                debug!(post_id = %draft.platform_post_id, "no keyword match");
                continue;
            }
            draft.keywords = matched;

            if source.is_none() {
                source = Some(self.ensure_source(adapter.as_ref(), target).await?);
            }
            let Some(source_row) = source.as_ref() else {
                continue;
            };

            let (post, is_new) = match self.store.upsert_post(source_row, draft).await {
                Ok(stored) => {
                    streak.reset();
                    stored
                }
                Err(e) => {
                    counts.item_errors += 1;
                    warn!(source = %target.source_id, error = %e, "could not store post");
                    streak.record(&e)?;
                    continue;
                }
            };

            if is_new {
                counts.posts_new += 1;
            } else if post.comments_synced() && !target.recheck_known_posts {
                debug!(post_id = %post.platform_post_id, "post already stored");
                continue;
            }

            let complete = self
                .ingest_comments(adapter.as_ref(), target, config, &raw, &post, counts, &mut streak)
                .await?;
            if !complete || post.comments_synced() {
                continue;
            }
            if let Err(e) = self.store.mark_comments_synced(&post).await {
                counts.item_errors += 1;
                warn!(
                    post_id = %post.platform_post_id,
                    error = %e,
                    "could not mark comments synced"
                );
                streak.record(&e)?;
            }
        }

        Ok(())
    }

    /// Description failures are logged; the source row is created regardless.
    async fn ensure_source(
        &self,
        adapter: &dyn SourceAdapter,
        target: &SourceTarget,
    ) -> Result<Source, SourceFailure> {
        let info = match adapter.describe(&target.source_id).await {
            Ok(info) => info.unwrap_or_default(),
            Err(e) => {
                warn!(source = %target.source_id, error = %e, "could not describe source");
                Default::default()
            }
        };

        self.store
            .upsert_source(target.platform, &target.source_id, info)
            .await
            .map_err(SourceFailure::SourceRow)
    }

    /// Returns whether every comment of the post went through without an item
    /// error.
    #[allow(clippy::too_many_arguments)]
    async fn ingest_comments(
        &self,
        adapter: &dyn SourceAdapter,
        target: &SourceTarget,
        config: &RunConfig,
        raw: &RawPost,
        post: &Post,
        counts: &mut SourceCounts,
        streak: &mut FailureStreak,
    ) -> Result<bool, SourceFailure> {
        let errors_before = counts.item_errors;
        let mut comments = adapter.fetch_comments(&target.source_id, raw, config.comment_limit);

        loop {
            let next = match tokio::time::timeout(config.fetch_timeout, comments.next()).await {
                Ok(next) => next,
                Err(_) => {
                    counts.item_errors += 1;
                    warn!(post_id = %post.platform_post_id, "comment fetch timed out");
                    break;
                }
            };
            let raw_comment = match next {
                None => break,
                Some(Ok(raw_comment)) => raw_comment,
                Some(Err(e)) => {
                    counts.item_errors += 1;
                    warn!(post_id = %post.platform_post_id, error = %e, "comment fetch failed");
                    break;
                }
            };
            counts.comments_seen += 1;

            let draft = match normalize_comment(post, &raw_comment, Utc::now()) {
                Ok(draft) => draft,
                Err(e) => {
                    counts.item_errors += 1;
                    warn!(
                        post_id = %post.platform_post_id,
                        error = %e,
                        "skipping malformed comment"
                    );
                    continue;
                }
            };

            let sentiment = match self.classify(draft.text.clone()).await {
                Ok(label) => label,
                Err(e) => {
                    counts.item_errors += 1;
                    warn!(
                        post_id = %post.platform_post_id,
                        comment_id = %draft.platform_comment_id,
                        error = %e,
                        "classification failed, skipping comment"
                    );
                    continue;
                }
            };

            let (comment, is_new) = match self
                .store
                .upsert_comment(post, draft.classified(sentiment))
                .await
            {
                Ok(stored) => {
                    streak.reset();
                    stored
                }
                Err(e) => {
                    counts.item_errors += 1;
                    warn!(post_id = %post.platform_post_id, error = %e, "could not store comment");
                    streak.record(&e)?;
                    continue;
                }
            };

            if is_new {
                counts.comments_new += 1;
            }

            // Stored flagged comments are offered again; the log drops duplicates.
            if !comment.sentiment.is_flagged() {
                continue;
            }
            match self.queue_for_moderation(post, &comment, config).await {
                Ok(true) => counts.moderation_written += 1,
                Ok(false) => debug!(comment_id = %comment.platform_comment_id, "already queued"),
                Err(e) => {
                    counts.item_errors += 1;
                    error!(
                        post_id = %post.platform_post_id,
                        comment_id = %comment.platform_comment_id,
                        error = %e,
                        "moderation log write failed, comment stays stored"
                    );
                }
            }
        }

        Ok(counts.item_errors == errors_before)
    }

    async fn classify(&self, text: String) -> Result<SentimentLabel, ClassificationError> {
        let classifier = Arc::clone(&self.classifier);
        tokio::task::spawn_blocking(move || classifier.classify(&text))
            .await
            .map_err(|e| ClassificationError::Failed(e.to_string()))?
    }

    async fn queue_for_moderation(
        &self,
        post: &Post,
        comment: &Comment,
        config: &RunConfig,
    ) -> Result<bool, ModerationWriteError> {
        let entry = FlaggedComment::new(post, comment, config.title_max_chars);
        let log = Arc::clone(&self.moderation);
        tokio::task::spawn_blocking(move || log.append_if_absent(entry)).await?
    }
}
