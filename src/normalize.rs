//! Pure mapping from adapter records to canonical posts and comments.
//!
//! Nothing here touches the store or the classifier. Any error returned is a
//! malformed record, never an I/O failure; callers skip the single item.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tracing::warn;

use crate::error::NormalizationError;
use crate::model::{
    CommentDraft, Engagement, IdentityRule, NewPost, Platform, Post, RawComment, RawPost,
    RawTimestamp, Source,
};

pub const TITLE_MAX_CHARS: usize = 500;
pub const URL_MAX_CHARS: usize = 500;
pub const AUTHOR_MAX_CHARS: usize = 200;
pub const USER_ID_MAX_CHARS: usize = 100;
pub const NATIVE_ID_MAX_CHARS: usize = 200;

pub const FINGERPRINT_PREFIX: &str = "fp_";
const FINGERPRINT_HEX_LEN: usize = 32;

const UNKNOWN_USER: &str = "unknown";
const LOCAL_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d.%m.%Y %H:%M"];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// The `(platform, sourceId)` pair a record was fetched under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub platform: Platform,
    pub source_id: String,
}

impl SourceKey {
    pub fn new(platform: Platform, source_id: impl Into<String>) -> Self {
        Self {
            platform,
            source_id: source_id.into(),
        }
    }
}

impl From<&Source> for SourceKey {
    fn from(source: &Source) -> Self {
        Self::new(source.platform, source.source_id.clone())
    }
}

/// Truncates to at most `max_chars` characters, never splitting a char.
pub fn clip(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Content-derived identity: same parts in, same key out.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        let collapsed = WHITESPACE.replace_all(part.trim(), " ");
        hasher.update(collapsed.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{FINGERPRINT_PREFIX}{}", &digest[..FINGERPRINT_HEX_LEN])
}

pub fn normalize_timestamp(
    raw: Option<&RawTimestamp>,
    ingested_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, NormalizationError> {
    let Some(raw) = raw else {
        return Ok(ingested_at);
    };

    match raw {
        RawTimestamp::Unix(secs) if *secs <= 0 => Ok(ingested_at),
        RawTimestamp::Unix(secs) => DateTime::from_timestamp(*secs, 0)
            .ok_or_else(|| NormalizationError::InvalidTimestamp(secs.to_string())),
        RawTimestamp::Rfc3339(text) if text.trim().is_empty() => Ok(ingested_at),
        RawTimestamp::Rfc3339(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| NormalizationError::InvalidTimestamp(text.clone())),
        RawTimestamp::Local { text, .. } if text.trim().is_empty() => Ok(ingested_at),
        RawTimestamp::Local {
            text,
            utc_offset_secs,
        } => parse_local(text.trim(), *utc_offset_secs)
            .ok_or_else(|| NormalizationError::InvalidTimestamp(text.clone())),
    }
}

/// False when `normalize_timestamp` would fall back to the ingestion time.
pub fn has_publish_time(raw: Option<&RawTimestamp>) -> bool {
    match raw {
        None => false,
        Some(RawTimestamp::Unix(secs)) => *secs > 0,
        Some(RawTimestamp::Rfc3339(text)) | Some(RawTimestamp::Local { text, .. }) => {
            !text.trim().is_empty()
        }
    }
}

fn parse_local(text: &str, utc_offset_secs: i32) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn clamp_engagement(raw: Engagement) -> Engagement {
    Engagement {
        likes: raw.likes.max(0),
        comments: raw.comments.max(0),
        reposts: raw.reposts.max(0),
        views: raw.views.max(0),
    }
}

fn derive_title(raw_title: Option<&str>, text: &str) -> String {
    let title = non_empty(raw_title)
        .or_else(|| text.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or_default();
    clip(title, TITLE_MAX_CHARS)
}

fn post_identity(
    source: &SourceKey,
    native_id: Option<&str>,
    text: &str,
    url: &str,
) -> Result<String, NormalizationError> {
    if source.platform.identity_rule() == IdentityRule::Native {
        if let Some(native) = native_id {
            let native = clip(native, NATIVE_ID_MAX_CHARS);
            return Ok(match source.platform {
                Platform::Telegram => format!("{}/{}", source.source_id, native),
                _ => native,
            });
        }
        warn!(
            platform = %source.platform,
            source = %source.source_id,
            "record has no native id, falling back to fingerprint"
        );
    }

    if text.is_empty() && url.is_empty() {
        return Err(NormalizationError::MissingIdentity);
    }
    Ok(fingerprint(&[text, url]))
}

pub fn normalize_post(
    source: &SourceKey,
    raw: &RawPost,
    ingested_at: DateTime<Utc>,
) -> Result<NewPost, NormalizationError> {
    if raw.platform != source.platform {
        return Err(NormalizationError::PlatformMismatch {
            expected: source.platform,
            found: raw.platform,
        });
    }

    let text = raw.text.trim().to_string();
    let url = clip(non_empty(raw.url.as_deref()).unwrap_or_default(), URL_MAX_CHARS);
    let native_id = non_empty(raw.native_id.as_deref());

    let platform_post_id = post_identity(source, native_id, &text, &url)?;
    let publish_time = normalize_timestamp(raw.published.as_ref(), ingested_at)?;

    let mut platform_data = raw.platform_data.clone();
    if let (IdentityRule::Fingerprint, Some(native)) =
        (source.platform.identity_rule(), native_id)
    {
        platform_data = platform_data.with_extra("scraped_id", clip(native, NATIVE_ID_MAX_CHARS));
    }

    Ok(NewPost {
        platform: source.platform,
        platform_post_id,
        title: derive_title(raw.title.as_deref(), &text),
        author: non_empty(raw.author.as_deref()).map(|a| clip(a, AUTHOR_MAX_CHARS)),
        text,
        url,
        publish_time,
        engagement: clamp_engagement(raw.engagement),
        keywords: Vec::new(),
        platform_data,
    })
}

pub fn normalize_comment(
    post: &Post,
    raw: &RawComment,
    ingested_at: DateTime<Utc>,
) -> Result<CommentDraft, NormalizationError> {
    let text = raw.text.trim();
    if text.is_empty() {
        return Err(NormalizationError::EmptyComment);
    }

    let user_id = clip(
        non_empty(raw.user_id.as_deref()).unwrap_or(UNKNOWN_USER),
        USER_ID_MAX_CHARS,
    );

    let native_id = non_empty(raw.native_id.as_deref());
    let mut platform_data = raw.platform_data.clone();
    let platform_comment_id = match (post.platform.identity_rule(), native_id) {
        (IdentityRule::Native, Some(native)) => clip(native, NATIVE_ID_MAX_CHARS),
        (IdentityRule::Fingerprint, Some(native)) => {
            platform_data =
                platform_data.with_extra("scraped_id", clip(native, NATIVE_ID_MAX_CHARS));
            fingerprint(&[text, &user_id])
        }
        (_, None) => fingerprint(&[text, &user_id]),
    };

    let publish_time = normalize_timestamp(raw.published.as_ref(), ingested_at)?;

    Ok(CommentDraft {
        platform_comment_id,
        platform_user_id: user_id,
        text: text.to_string(),
        publish_time,
        likes: raw.likes.max(0),
        platform_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlatformData, PlatformDetails};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn raw_post(platform: Platform, text: &str) -> RawPost {
        RawPost {
            platform,
            native_id: None,
            title: None,
            text: text.to_string(),
            url: Some("https://example.org/news/1".into()),
            author: None,
            published: None,
            engagement: Engagement::default(),
            platform_data: PlatformData::default(),
        }
    }

    fn stored(post: NewPost) -> Post {
        Post {
            id: 1,
            source_ref: 1,
            platform: post.platform,
            platform_post_id: post.platform_post_id,
            title: post.title,
            text: post.text,
            url: post.url,
            author: post.author,
            publish_time: post.publish_time,
            engagement: post.engagement,
            keywords: post.keywords,
            platform_data: post.platform_data,
            created_at: now(),
            comments_synced_at: None,
        }
    }

    fn raw_comment(text: &str) -> RawComment {
        RawComment {
            native_id: None,
            user_id: Some("id42".into()),
            text: text.to_string(),
            published: None,
            likes: 0,
            platform_data: PlatformData::default(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let source = SourceKey::new(Platform::Web, "https://example.org");
        let raw = raw_post(Platform::Web, "Плановое отключение  электроэнергии");

        let first = normalize_post(&source, &raw, now()).unwrap();
        let second = normalize_post(&source, &raw, now() + Duration::hours(3)).unwrap();

        assert_eq!(first.platform_post_id, second.platform_post_id);
        assert!(first.platform_post_id.starts_with(FINGERPRINT_PREFIX));
        assert_eq!(
            first.platform_post_id.len(),
            FINGERPRINT_PREFIX.len() + FINGERPRINT_HEX_LEN
        );
    }

    #[test]
    fn test_fingerprint_ignores_whitespace_noise() {
        assert_eq!(
            fingerprint(&["a  b\n c ", "u"]),
            fingerprint(&["a b c", "u"])
        );
        assert_ne!(fingerprint(&["a", "u1"]), fingerprint(&["a", "u2"]));
        assert_ne!(fingerprint(&["ab", ""]), fingerprint(&["a", "b"]));
    }

    #[test]
    fn test_telegram_id_is_qualified_by_channel() {
        let source = SourceKey::new(Platform::Telegram, "tns_energo_nn");
        let mut raw = raw_post(Platform::Telegram, "text");
        raw.native_id = Some(" 1234 ".into());

        let post = normalize_post(&source, &raw, now()).unwrap();
        assert_eq!(post.platform_post_id, "tns_energo_nn/1234");
    }

    #[test]
    fn test_vk_uses_native_id_verbatim() {
        let source = SourceKey::new(Platform::Vk, "moynnov");
        let mut raw = raw_post(Platform::Vk, "text");
        raw.native_id = Some("-123_456".into());

        let post = normalize_post(&source, &raw, now()).unwrap();
        assert_eq!(post.platform_post_id, "-123_456");
    }

    #[test]
    fn test_native_platform_without_id_falls_back_to_fingerprint() {
        let source = SourceKey::new(Platform::Vk, "moynnov");
        let raw = raw_post(Platform::Vk, "text");

        let post = normalize_post(&source, &raw, now()).unwrap();
        assert!(post.platform_post_id.starts_with(FINGERPRINT_PREFIX));
    }

    #[test]
    fn test_scraped_platform_ignores_native_id() {
        let source = SourceKey::new(Platform::Odnoklassniki, "group/1");
        let mut a = raw_post(Platform::Odnoklassniki, "same text");
        a.native_id = Some("data-id-1".into());
        let mut b = a.clone();
        b.native_id = Some("data-id-2".into());

        let pa = normalize_post(&source, &a, now()).unwrap();
        let pb = normalize_post(&source, &b, now()).unwrap();
        assert_eq!(pa.platform_post_id, pb.platform_post_id);
        assert_eq!(pa.platform_data.extras["scraped_id"], "data-id-1");
    }

    #[test]
    fn test_missing_identity_is_an_error() {
        let source = SourceKey::new(Platform::Web, "site");
        let mut raw = raw_post(Platform::Web, "   ");
        raw.url = None;

        assert_eq!(
            normalize_post(&source, &raw, now()),
            Err(NormalizationError::MissingIdentity)
        );
    }

    #[test]
    fn test_platform_mismatch_is_an_error() {
        let source = SourceKey::new(Platform::Vk, "group");
        let raw = raw_post(Platform::Telegram, "text");
        assert!(matches!(
            normalize_post(&source, &raw, now()),
            Err(NormalizationError::PlatformMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_timestamp_defaults_to_ingestion_time() {
        assert_eq!(normalize_timestamp(None, now()).unwrap(), now());
        assert_eq!(
            normalize_timestamp(Some(&RawTimestamp::Unix(0)), now()).unwrap(),
            now()
        );
        assert_eq!(
            normalize_timestamp(Some(&RawTimestamp::Rfc3339(" ".into())), now()).unwrap(),
            now()
        );
    }

    #[test]
    fn test_undated_records_are_recognised() {
        assert!(!has_publish_time(None));
        assert!(!has_publish_time(Some(&RawTimestamp::Unix(0))));
        assert!(!has_publish_time(Some(&RawTimestamp::Rfc3339(" ".into()))));
        assert!(!has_publish_time(Some(&RawTimestamp::Local {
            text: String::new(),
            utc_offset_secs: 10800,
        })));
        assert!(has_publish_time(Some(&RawTimestamp::Unix(1_700_000_000))));
        assert!(has_publish_time(Some(&RawTimestamp::Rfc3339(
            "2025-06-01T10:00:00+03:00".into()
        ))));
    }

    #[test]
    fn test_timestamps_become_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 5, 30, 7, 15, 0).unwrap();

        let unix = RawTimestamp::Unix(expected.timestamp());
        let rfc = RawTimestamp::Rfc3339("2025-05-30T10:15:00+03:00".into());
        let local = RawTimestamp::Local {
            text: "2025-05-30 10:15".into(),
            utc_offset_secs: 3 * 3600,
        };

        for raw in [unix, rfc, local] {
            assert_eq!(normalize_timestamp(Some(&raw), now()).unwrap(), expected);
        }
    }

    #[test]
    fn test_unparseable_timestamp_is_an_error() {
        let raw = RawTimestamp::Local {
            text: "вчера".into(),
            utc_offset_secs: 0,
        };
        assert!(matches!(
            normalize_timestamp(Some(&raw), now()),
            Err(NormalizationError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_long_fields_are_clipped() {
        let source = SourceKey::new(Platform::Web, "site");
        let mut raw = raw_post(Platform::Web, &"ж".repeat(TITLE_MAX_CHARS + 50));
        raw.url = Some(format!("https://example.org/{}", "q".repeat(URL_MAX_CHARS)));
        raw.author = Some("a".repeat(AUTHOR_MAX_CHARS * 2));

        let post = normalize_post(&source, &raw, now()).unwrap();
        assert_eq!(post.title.chars().count(), TITLE_MAX_CHARS);
        assert_eq!(post.url.chars().count(), URL_MAX_CHARS);
        assert_eq!(post.author.unwrap().chars().count(), AUTHOR_MAX_CHARS);
        assert_eq!(post.text.chars().count(), TITLE_MAX_CHARS + 50);
    }

    #[test]
    fn test_title_from_first_line_and_counters_clamped() {
        let source = SourceKey::new(Platform::Vk, "group");
        let mut raw = raw_post(Platform::Vk, "\n  Заголовок  \nтело новости");
        raw.native_id = Some("1_2".into());
        raw.engagement = Engagement {
            likes: -5,
            comments: 3,
            reposts: -1,
            views: 10,
        };

        let post = normalize_post(&source, &raw, now()).unwrap();
        assert_eq!(post.title, "Заголовок");
        assert_eq!(post.engagement.likes, 0);
        assert_eq!(post.engagement.reposts, 0);
        assert_eq!(post.engagement.comments, 3);
        assert_eq!(post.engagement.views, 10);
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        assert_eq!(clip("привет", 3), "при");
        assert_eq!(clip("hi", 10), "hi");
        assert_eq!(clip("", 0), "");
    }

    #[test]
    fn test_comment_identity() {
        let source = SourceKey::new(Platform::Vk, "group");
        let mut raw = raw_post(Platform::Vk, "post");
        raw.native_id = Some("1_2".into());
        let post = stored(normalize_post(&source, &raw, now()).unwrap());

        let mut native = raw_comment("Когда починят?");
        native.native_id = Some("777".into());
        assert_eq!(
            normalize_comment(&post, &native, now()).unwrap().platform_comment_id,
            "777"
        );

        let anonymous = raw_comment("Когда починят?");
        let a = normalize_comment(&post, &anonymous, now()).unwrap();
        let b = normalize_comment(&post, &anonymous, now()).unwrap();
        assert_eq!(a.platform_comment_id, b.platform_comment_id);
        assert!(a.platform_comment_id.starts_with(FINGERPRINT_PREFIX));
    }

    #[test]
    fn test_scraped_platform_comments_always_fingerprinted() {
        let source = SourceKey::new(Platform::Odnoklassniki, "group");
        let scraped = raw_post(Platform::Odnoklassniki, "p");
        let post = stored(normalize_post(&source, &scraped, now()).unwrap());

        let mut raw = raw_comment("ужас");
        raw.native_id = Some("volatile-7".into());
        raw.platform_data = PlatformData {
            details: PlatformDetails::Odnoklassniki { element_id: None },
            ..Default::default()
        };

        let draft = normalize_comment(&post, &raw, now()).unwrap();
        assert!(draft.platform_comment_id.starts_with(FINGERPRINT_PREFIX));
        assert_eq!(draft.platform_data.extras["scraped_id"], "volatile-7");
    }

    #[test]
    fn test_empty_comment_is_an_error() {
        let source = SourceKey::new(Platform::Web, "site");
        let post = stored(normalize_post(&source, &raw_post(Platform::Web, "p"), now()).unwrap());

        assert_eq!(
            normalize_comment(&post, &raw_comment(" \n "), now()),
            Err(NormalizationError::EmptyComment)
        );

        let mut anonymous = raw_comment("text");
        anonymous.user_id = None;
        assert_eq!(
            normalize_comment(&post, &anonymous, now()).unwrap().platform_user_id,
            "unknown"
        );
    }
}
