//! Append-only moderation log of flagged comments.
//!
//! One JSON object per line in a file kept apart from the relational store.
//! There is no shared transaction with the store: a comment can be committed
//! and still be missing here if the process dies between the two writes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::classify::SentimentLabel;
use crate::error::ModerationWriteError;
use crate::model::{Comment, Platform, Post};
use crate::normalize::clip;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationEntry {
    pub platform_comment_id: String,
    pub post_id: String,
    pub post_title: String,
    pub post_url: String,
    pub text: String,
    pub user_id: String,
    pub publish_time: DateTime<Utc>,
    pub platform: Platform,
    pub sentiment: SentimentLabel,
    pub detection_time: DateTime<Utc>,
}

/// What the caller hands over; `detection_time` is stamped by the log.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedComment {
    pub platform_comment_id: String,
    pub post_id: String,
    pub post_title: String,
    pub post_url: String,
    pub text: String,
    pub user_id: String,
    pub publish_time: DateTime<Utc>,
    pub platform: Platform,
    pub sentiment: SentimentLabel,
}

impl FlaggedComment {
    /// `post_title` is the post text cut to `title_max_chars`, with `...`
    /// appended when something was cut.
    pub fn new(post: &Post, comment: &Comment, title_max_chars: usize) -> Self {
        let mut post_title = clip(&post.text, title_max_chars);
        if post_title.len() < post.text.len() {
            post_title.push_str("...");
        }

        Self {
            platform_comment_id: comment.platform_comment_id.clone(),
            post_id: post.platform_post_id.clone(),
            post_title,
            post_url: post.url.clone(),
            text: comment.text.clone(),
            user_id: comment.platform_user_id.clone(),
            publish_time: comment.publish_time,
            platform: post.platform,
            sentiment: comment.sentiment,
        }
    }

    fn stamped(self, detection_time: DateTime<Utc>) -> ModerationEntry {
        ModerationEntry {
            platform_comment_id: self.platform_comment_id,
            post_id: self.post_id,
            post_title: self.post_title,
            post_url: self.post_url,
            text: self.text,
            user_id: self.user_id,
            publish_time: self.publish_time,
            platform: self.platform,
            sentiment: self.sentiment,
            detection_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    platform: Platform,
    post_id: String,
    platform_comment_id: String,
}

impl From<&ModerationEntry> for EntryKey {
    fn from(entry: &ModerationEntry) -> Self {
        Self {
            platform: entry.platform,
            post_id: entry.post_id.clone(),
            platform_comment_id: entry.platform_comment_id.clone(),
        }
    }
}

impl From<&FlaggedComment> for EntryKey {
    fn from(entry: &FlaggedComment) -> Self {
        Self {
            platform: entry.platform,
            post_id: entry.post_id.clone(),
            platform_comment_id: entry.platform_comment_id.clone(),
        }
    }
}

pub trait ModerationLog: Send + Sync {
    /// Writes the entry unless its `(platform, post_id, platform_comment_id)`
    /// is already anywhere in the log. Returns whether it was written.
    fn append_if_absent(&self, entry: FlaggedComment) -> Result<bool, ModerationWriteError>;

    /// Drops entries detected more than `max_age_days` days ago. Entries
    /// exactly at the threshold stay. Returns how many were removed.
    fn prune(&self, max_age_days: i64) -> Result<usize, ModerationWriteError>;

    /// Newest entries first by detection time.
    fn recent(&self, limit: usize) -> Result<Vec<ModerationEntry>, ModerationWriteError>;
}

/// JSON Lines file with an in-memory index of the keys it holds.
pub struct JsonlModerationLog {
    path: PathBuf,
    keys: Mutex<HashSet<EntryKey>>,
}

impl JsonlModerationLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ModerationWriteError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let keys: HashSet<EntryKey> = read_lines(&path)?
            .iter()
            .filter_map(|line| parse_entry(&path, line))
            .map(|entry| EntryKey::from(&entry))
            .collect();
        debug!(path = %path.display(), entries = keys.len(), "opened moderation log");

        Ok(Self {
            path,
            keys: Mutex::new(keys),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashSet<EntryKey>>, ModerationWriteError> {
        self.keys.lock().map_err(|_| ModerationWriteError::Poisoned)
    }

    pub(crate) fn append_if_absent_at(
        &self,
        entry: FlaggedComment,
        now: DateTime<Utc>,
    ) -> Result<bool, ModerationWriteError> {
        let mut keys = self.lock()?;
        let key = EntryKey::from(&entry);
        if keys.contains(&key) {
            return Ok(false);
        }

        let mut line = serde_json::to_string(&entry.stamped(now))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        keys.insert(key);
        Ok(true)
    }

    pub(crate) fn prune_at(
        &self,
        max_age_days: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, ModerationWriteError> {
        let mut keys = self.lock()?;
        let max_age = Duration::days(max_age_days);

        let lines = read_lines(&self.path)?;
        let mut kept = Vec::with_capacity(lines.len());
        let mut removed = 0;
        for line in lines {
            match parse_entry(&self.path, &line) {
                Some(entry) if now - entry.detection_time > max_age => removed += 1,
                _ => kept.push(line),
            }
        }

        if removed == 0 {
            return Ok(0);
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            for line in &kept {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        *keys = kept
            .iter()
            .filter_map(|line| parse_entry(&self.path, line))
            .map(|entry| EntryKey::from(&entry))
            .collect();

        info!(removed, max_age_days, "pruned moderation log");
        Ok(removed)
    }
}

impl ModerationLog for JsonlModerationLog {
    fn append_if_absent(&self, entry: FlaggedComment) -> Result<bool, ModerationWriteError> {
        self.append_if_absent_at(entry, Utc::now())
    }

    fn prune(&self, max_age_days: i64) -> Result<usize, ModerationWriteError> {
        self.prune_at(max_age_days, Utc::now())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ModerationEntry>, ModerationWriteError> {
        let _guard = self.lock()?;
        let mut entries: Vec<ModerationEntry> = read_lines(&self.path)?
            .iter()
            .filter_map(|line| parse_entry(&self.path, line))
            .collect();
        entries.sort_by(|a, b| b.detection_time.cmp(&a.detection_time));
        entries.truncate(limit);
        Ok(entries)
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, ModerationWriteError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Unreadable lines are reported and left in place, never dropped.
fn parse_entry(path: &Path, line: &str) -> Option<ModerationEntry> {
    match serde_json::from_str(line) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable moderation entry");
            None
        }
    }
}
