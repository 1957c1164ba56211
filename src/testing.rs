// Test doubles for the pipeline seams:
// - ScriptedAdapter (SourceAdapter): per-source posts with their comments,
//   plus sources that fail or never answer
// - ScriptedClassifier (Classifier): lexicon labels, fails on a marker word
// - UnavailableModerationLog (ModerationLog): every write fails
// - FaultyStore (ContentStore): sqlite store with injected post failures

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tempfile::TempDir;

use crate::adapter::{RecordStream, SourceAdapter};
use crate::classify::{Classifier, LexiconClassifier, SentimentLabel};
use crate::error::{AdapterError, ClassificationError, ModerationWriteError, PersistenceError};
use crate::model::{
    Comment, Engagement, NewComment, NewPost, Platform, PlatformData, Post, RawComment, RawPost,
    RawTimestamp, Source, SourceInfo, TimeWindow,
};
use crate::moderation::{FlaggedComment, ModerationEntry, ModerationLog};
use crate::store::{ContentStore, SqliteStore};

pub const CLASSIFIER_DOWN: &str = "CLASSIFIER_DOWN";

pub fn temp_store(dir: &TempDir) -> SqliteStore {
    let path = dir.path().join("newswatch.db");
    SqliteStore::open(path.to_str().unwrap(), 4, 2000, Duration::from_secs(5)).unwrap()
}

pub fn raw_post(
    platform: Platform,
    native_id: &str,
    text: &str,
    published: DateTime<Utc>,
) -> RawPost {
    RawPost {
        platform,
        native_id: Some(native_id.to_string()),
        title: None,
        text: text.to_string(),
        url: Some(format!("https://example.org/{platform}/{native_id}")),
        author: None,
        published: Some(RawTimestamp::Unix(published.timestamp())),
        engagement: Engagement {
            likes: 3,
            ..Default::default()
        },
        platform_data: PlatformData::default(),
    }
}

pub fn raw_comment(native_id: &str, text: &str) -> RawComment {
    RawComment {
        native_id: Some(native_id.to_string()),
        user_id: Some(format!("user-{native_id}")),
        text: text.to_string(),
        published: None,
        likes: 0,
        platform_data: PlatformData::default(),
    }
}

// ---------------------------------------------------------------------------
// ScriptedAdapter
// ---------------------------------------------------------------------------

/// Posts are yielded in insertion order; comments are matched by native id.
pub struct ScriptedAdapter {
    platform: Platform,
    posts: HashMap<String, Vec<(RawPost, Vec<RawComment>)>>,
    failing: HashSet<String>,
    stalled: HashSet<String>,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            posts: HashMap::new(),
            failing: HashSet::new(),
            stalled: HashSet::new(),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_post(mut self, source_id: &str, post: RawPost, comments: Vec<RawComment>) -> Self {
        self.posts
            .entry(source_id.to_string())
            .or_default()
            .push((post, comments));
        self
    }

    /// Every fetch for `source_id` errors.
    pub fn failing(mut self, source_id: &str) -> Self {
        self.failing.insert(source_id.to_string());
        self
    }

    /// Every fetch for `source_id` never yields.
    pub fn stalled(mut self, source_id: &str) -> Self {
        self.stalled.insert(source_id.to_string());
        self
    }

    /// Number of posts handed out so far, across all sources.
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        self.pulled.clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn describe(&self, source_id: &str) -> Result<Option<SourceInfo>, AdapterError> {
        Ok(Some(SourceInfo {
            display_name: Some(format!("scripted {source_id}")),
            source_type: Some("scripted".into()),
        }))
    }

    fn fetch<'a>(&'a self, source_id: &'a str, _window: TimeWindow) -> RecordStream<'a, RawPost> {
        if self.failing.contains(source_id) {
            return stream::once(async move { Err(AdapterError::new(source_id, "scripted outage")) })
                .boxed();
        }
        if self.stalled.contains(source_id) {
            return stream::pending().boxed();
        }

        let posts = self.posts.get(source_id).map(Vec::as_slice).unwrap_or_default();
        let pulled = self.pulled.clone();
        stream::iter(posts.iter().map(move |(post, _)| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(post.clone())
        }))
        .boxed()
    }

    fn fetch_comments<'a>(
        &'a self,
        source_id: &'a str,
        post: &'a RawPost,
        limit: usize,
    ) -> RecordStream<'a, RawComment> {
        let comments: Vec<RawComment> = self
            .posts
            .get(source_id)
            .and_then(|posts| posts.iter().find(|(p, _)| p.native_id == post.native_id))
            .map(|(_, comments)| comments.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        stream::iter(comments.into_iter().map(Ok)).boxed()
    }
}

// ---------------------------------------------------------------------------
// ScriptedClassifier
// ---------------------------------------------------------------------------

/// "обман"/"безобразие" are negative, "спасибо" positive, the rest neutral.
/// Text containing [`CLASSIFIER_DOWN`] fails.
pub struct ScriptedClassifier {
    lexicon: LexiconClassifier,
}

pub fn scripted_classifier() -> ScriptedClassifier {
    ScriptedClassifier {
        lexicon: LexiconClassifier::new(
            &["обман".into(), "безобразие".into()],
            &["спасибо".into()],
        )
        .unwrap(),
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, text: &str) -> Result<SentimentLabel, ClassificationError> {
        if text.contains(CLASSIFIER_DOWN) {
            return Err(ClassificationError::Unavailable("scripted".into()));
        }
        self.lexicon.classify(text)
    }
}

// ---------------------------------------------------------------------------
// UnavailableModerationLog
// ---------------------------------------------------------------------------

pub struct UnavailableModerationLog;

impl ModerationLog for UnavailableModerationLog {
    fn append_if_absent(&self, _entry: FlaggedComment) -> Result<bool, ModerationWriteError> {
        Err(ModerationWriteError::Io(std::io::Error::other("disk gone")))
    }

    fn prune(&self, _max_age_days: i64) -> Result<usize, ModerationWriteError> {
        Err(ModerationWriteError::Io(std::io::Error::other("disk gone")))
    }

    fn recent(&self, _limit: usize) -> Result<Vec<ModerationEntry>, ModerationWriteError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// FaultyStore
// ---------------------------------------------------------------------------

pub struct FaultyStore {
    inner: SqliteStore,
    fail_posts: bool,
}

impl FaultyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_posts: false,
        }
    }

    pub fn failing_posts(mut self) -> Self {
        self.fail_posts = true;
        self
    }
}

#[async_trait]
impl ContentStore for FaultyStore {
    async fn upsert_source(
        &self,
        platform: Platform,
        source_id: &str,
        info: SourceInfo,
    ) -> Result<Source, PersistenceError> {
        self.inner.upsert_source(platform, source_id, info).await
    }

    async fn upsert_post(
        &self,
        source: &Source,
        post: NewPost,
    ) -> Result<(Post, bool), PersistenceError> {
        if self.fail_posts {
            return Err(PersistenceError::Pool("injected failure".into()));
        }
        self.inner.upsert_post(source, post).await
    }

    async fn upsert_comment(
        &self,
        post: &Post,
        comment: NewComment,
    ) -> Result<(Comment, bool), PersistenceError> {
        self.inner.upsert_comment(post, comment).await
    }

    async fn mark_comments_synced(&self, post: &Post) -> Result<Post, PersistenceError> {
        self.inner.mark_comments_synced(post).await
    }
}
