use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::classify::SentimentLabel;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum Platform {
    #[serde(rename = "telegram")]
    #[strum(serialize = "telegram")]
    Telegram,
    #[serde(rename = "vk")]
    #[strum(serialize = "vk")]
    Vk,
    #[serde(rename = "ok")]
    #[strum(serialize = "ok")]
    Odnoklassniki,
    #[serde(rename = "web")]
    #[strum(serialize = "web")]
    Web,
}

/// How a platform's post identity key is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// Native message/post id, fingerprint only when the adapter has none.
    Native,
    /// Always the content fingerprint; scraped ids are not stable.
    Fingerprint,
}

impl Platform {
    pub fn identity_rule(self) -> IdentityRule {
        match self {
            Self::Telegram | Self::Vk => IdentityRule::Native,
            Self::Odnoklassniki | Self::Web => IdentityRule::Fingerprint,
        }
    }
}

/// Inclusive fetch window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn last_hours(end: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }

    pub fn is_before_start(&self, t: DateTime<Utc>) -> bool {
        t < self.start
    }

    pub fn is_after_end(&self, t: DateTime<Utc>) -> bool {
        t > self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        !self.is_before_start(t) && !self.is_after_end(t)
    }
}

/// Platform-specific extras. The core never reads these; they are stored as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformDetails {
    #[default]
    Unspecified,
    Telegram {
        channel: Option<String>,
        message_id: Option<i64>,
        reply_to: Option<i64>,
    },
    Vk {
        owner_id: Option<i64>,
        item_id: Option<i64>,
        from_id: Option<i64>,
    },
    Odnoklassniki {
        element_id: Option<String>,
    },
    Web {
        page_url: Option<String>,
        site: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformData {
    #[serde(default)]
    pub details: PlatformDetails,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl PlatformData {
    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }
}

/// Timestamp as an adapter received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTimestamp {
    Unix(i64),
    Rfc3339(String),
    Local { text: String, utc_offset_secs: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub reposts: i64,
    #[serde(default)]
    pub views: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub platform: Platform,
    #[serde(default)]
    pub native_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published: Option<RawTimestamp>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub platform_data: PlatformData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    #[serde(default)]
    pub native_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub published: Option<RawTimestamp>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub platform_data: PlatformData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: i64,
    pub platform: Platform,
    pub source_id: String,
    pub display_name: Option<String>,
    pub source_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Display metadata an adapter may know about a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
}

/// A normalized post that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub platform: Platform,
    pub platform_post_id: String,
    pub title: String,
    pub text: String,
    pub url: String,
    pub author: Option<String>,
    pub publish_time: DateTime<Utc>,
    pub engagement: Engagement,
    pub keywords: Vec<String>,
    pub platform_data: PlatformData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub source_ref: i64,
    pub platform: Platform,
    pub platform_post_id: String,
    pub title: String,
    pub text: String,
    pub url: String,
    pub author: Option<String>,
    pub publish_time: DateTime<Utc>,
    pub engagement: Engagement,
    pub keywords: Vec<String>,
    pub platform_data: PlatformData,
    pub created_at: DateTime<Utc>,
    /// Set once a comment pass over this post finished without item errors.
    pub comments_synced_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn comments_synced(&self) -> bool {
        self.comments_synced_at.is_some()
    }
}

/// A normalized comment awaiting its sentiment label.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentDraft {
    pub platform_comment_id: String,
    pub platform_user_id: String,
    pub text: String,
    pub publish_time: DateTime<Utc>,
    pub likes: i64,
    pub platform_data: PlatformData,
}

impl CommentDraft {
    pub fn classified(self, sentiment: SentimentLabel) -> NewComment {
        NewComment {
            original_text: self.text.clone(),
            platform_comment_id: self.platform_comment_id,
            platform_user_id: self.platform_user_id,
            text: self.text,
            sentiment,
            publish_time: self.publish_time,
            likes: self.likes,
            platform_data: self.platform_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub platform_comment_id: String,
    pub platform_user_id: String,
    pub text: String,
    pub original_text: String,
    pub sentiment: SentimentLabel,
    pub publish_time: DateTime<Utc>,
    pub likes: i64,
    pub platform_data: PlatformData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub post_ref: i64,
    pub platform_comment_id: String,
    pub platform_user_id: String,
    pub text: String,
    pub original_text: String,
    pub sentiment: SentimentLabel,
    pub publish_time: DateTime<Utc>,
    pub likes: i64,
    pub platform_data: PlatformData,
    pub created_at: DateTime<Utc>,
}
