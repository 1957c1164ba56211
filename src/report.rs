use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::AddAssign;
use strum::Display;

use crate::model::Platform;
use crate::normalize::clip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl SourceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    pub posts_seen: u64,
    pub posts_new: u64,
    pub posts_filtered: u64,
    pub comments_seen: u64,
    pub comments_new: u64,
    pub moderation_written: u64,
    pub item_errors: u64,
}

impl AddAssign<&SourceCounts> for SourceCounts {
    fn add_assign(&mut self, other: &SourceCounts) {
        self.posts_seen += other.posts_seen;
        self.posts_new += other.posts_new;
        self.posts_filtered += other.posts_filtered;
        self.comments_seen += other.comments_seen;
        self.comments_new += other.comments_new;
        self.moderation_written += other.moderation_written;
        self.item_errors += other.item_errors;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub platform: Platform,
    pub source_id: String,
    pub state: SourceState,
    #[serde(flatten)]
    pub counts: SourceCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    pub fn succeeded(platform: Platform, source_id: &str, counts: SourceCounts) -> Self {
        Self {
            platform,
            source_id: source_id.to_string(),
            state: SourceState::Succeeded,
            counts,
            error: None,
        }
    }

    /// Partial counts are kept: rows committed before the failure stay committed.
    pub fn failed(
        platform: Platform,
        source_id: &str,
        counts: SourceCounts,
        error: &str,
        error_max_chars: usize,
    ) -> Self {
        Self {
            platform,
            source_id: source_id.to_string(),
            state: SourceState::Failed,
            counts,
            error: Some(truncate_error(error, error_max_chars)),
        }
    }
}

pub fn truncate_error(error: &str, max_chars: usize) -> String {
    let clipped = clip(error, max_chars);
    if clipped.len() < error.len() {
        format!("{clipped}...")
    } else {
        clipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub total: SourceCounts,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        sources: Vec<SourceReport>,
    ) -> Self {
        let mut total = SourceCounts::default();
        for source in &sources {
            total += &source.counts;
        }
        Self {
            started_at,
            finished_at,
            sources,
            total,
        }
    }

    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.state == SourceState::Failed)
            .count()
    }

    pub fn source(&self, platform: Platform, source_id: &str) -> Option<&SourceReport> {
        self.sources
            .iter()
            .find(|s| s.platform == platform && s.source_id == source_id)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            finished_at: self.finished_at,
            sources: self.sources.len(),
            failed_sources: self.failed_sources(),
            total: self.total,
        }
    }
}

/// What is remembered about the last completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub finished_at: DateTime<Utc>,
    pub sources: usize,
    pub failed_sources: usize,
    pub total: SourceCounts,
}
