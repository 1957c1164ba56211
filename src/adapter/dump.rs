use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use super::{RecordStream, SourceAdapter};
use crate::error::AdapterError;
use crate::model::{Platform, RawComment, RawPost, SourceInfo, TimeWindow};
use crate::normalize::fingerprint;

/// One line of a dump file: a post with its comments inline.
#[derive(Debug, Deserialize)]
struct DumpRecord {
    #[serde(flatten)]
    post: RawPost,
    #[serde(default)]
    comments: Vec<RawComment>,
}

enum ReadState {
    Unopened(PathBuf),
    Reading(Lines<BufReader<File>>, usize),
    Done,
}

/// Replays already-fetched records from `<root>/<platform>/<source_id>.jsonl`,
/// the source id percent-encoded.
///
/// An optional `<source_id>.meta.json` next to it describes the source.
/// Inline comments are held only for the post most recently yielded per
/// source; `fetch_comments` for any earlier post comes back empty.
pub struct DumpAdapter {
    platform: Platform,
    root: PathBuf,
    pending_comments: Mutex<HashMap<String, PendingComments>>,
}

struct PendingComments {
    post_key: String,
    comments: Vec<RawComment>,
}

impl DumpAdapter {
    pub fn new(platform: Platform, root: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            root: root.into(),
            pending_comments: Mutex::new(HashMap::new()),
        }
    }

    fn source_path(&self, source_id: &str, extension: &str) -> PathBuf {
        let file_name = urlencoding::encode(source_id);
        self.root
            .join(self.platform.to_string())
            .join(format!("{file_name}.{extension}"))
    }

    fn post_key(post: &RawPost) -> String {
        match post.native_id.as_deref() {
            Some(id) => id.to_string(),
            None => fingerprint(&[&post.text, post.url.as_deref().unwrap_or_default()]),
        }
    }

    /// Replaces whatever the previous post of `source_id` left behind.
    fn stash(&self, source_id: &str, record: DumpRecord) -> Result<RawPost, AdapterError> {
        let pending = PendingComments {
            post_key: Self::post_key(&record.post),
            comments: record.comments,
        };
        self.pending_comments
            .lock()
            .map_err(|_| AdapterError::new(source_id, "comment cache poisoned"))?
            .insert(source_id.to_string(), pending);
        Ok(record.post)
    }
}

#[async_trait]
impl SourceAdapter for DumpAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn describe(&self, source_id: &str) -> Result<Option<SourceInfo>, AdapterError> {
        let path = self.source_path(source_id, "meta.json");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| AdapterError::new(source_id, format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdapterError::new(source_id, e)),
        }
    }

    fn fetch<'a>(&'a self, source_id: &'a str, _window: TimeWindow) -> RecordStream<'a, RawPost> {
        let path = self.source_path(source_id, "jsonl");

        stream::unfold(ReadState::Unopened(path), move |state| async move {
            let (mut lines, mut line_no) = match state {
                ReadState::Done => return None,
                ReadState::Reading(lines, line_no) => (lines, line_no),
                ReadState::Unopened(path) => match File::open(&path).await {
                    Ok(file) => (BufReader::new(file).lines(), 0),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!(path = %path.display(), "no dump file, nothing to replay");
                        return None;
                    }
                    Err(e) => return Some((Err(AdapterError::new(source_id, e)), ReadState::Done)),
                },
            };

            loop {
                line_no += 1;
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return None,
                    Err(e) => return Some((Err(AdapterError::new(source_id, e)), ReadState::Done)),
                };
                if line.trim().is_empty() {
                    continue;
                }

                let item = serde_json::from_str::<DumpRecord>(&line)
                    .map_err(|e| AdapterError::new(source_id, format!("line {line_no}: {e}")))
                    .and_then(|record| self.stash(source_id, record));
                let next = match item {
                    Ok(_) => ReadState::Reading(lines, line_no),
                    Err(_) => ReadState::Done,
                };
                return Some((item, next));
            }
        })
        .boxed()
    }

    fn fetch_comments<'a>(
        &'a self,
        source_id: &'a str,
        post: &'a RawPost,
        limit: usize,
    ) -> RecordStream<'a, RawComment> {
        let post_key = Self::post_key(post);
        let comments = match self.pending_comments.lock() {
            Ok(mut pending) => match pending.get(source_id) {
                Some(entry) if entry.post_key == post_key => pending
                    .remove(source_id)
                    .map(|entry| entry.comments)
                    .unwrap_or_default(),
                _ => Vec::new(),
            },
            Err(_) => {
                return stream::once(async move {
                    Err(AdapterError::new(source_id, "comment cache poisoned"))
                })
                .boxed()
            }
        };

        stream::iter(comments.into_iter().take(limit).map(Ok)).boxed()
    }
}
