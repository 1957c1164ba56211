//! Idempotent persistence of sources, posts and comments.
//!
//! Every upsert is one immediate sqlite transaction: look the identity key up,
//! insert when absent. The unique indexes are the only concurrency control; a
//! unique violation means another writer won and its row is read back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use diesel::QueryResult;
use std::time::Duration;
use tracing::debug;

use crate::db::{self, DbPool, NewCommentRow, NewPostRow, NewSourceRow, TableCounts};
use crate::error::PersistenceError;
use crate::classify::SentimentLabel;
use crate::model::{Comment, NewComment, NewPost, Platform, Post, Source, SourceInfo};

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Existing row for `(platform, source_id)` or a fresh one. Missing
    /// display metadata is backfilled, present values are never replaced.
    async fn upsert_source(
        &self,
        platform: Platform,
        source_id: &str,
        info: SourceInfo,
    ) -> Result<Source, PersistenceError>;

    /// Returns the stored post and whether this call created it.
    async fn upsert_post(
        &self,
        source: &Source,
        post: NewPost,
    ) -> Result<(Post, bool), PersistenceError>;

    async fn upsert_comment(
        &self,
        post: &Post,
        comment: NewComment,
    ) -> Result<(Comment, bool), PersistenceError>;

    /// Records that every comment of `post` has been processed. Posts without
    /// the mark get their comments walked again, however they were created.
    async fn mark_comments_synced(&self, post: &Post) -> Result<Post, PersistenceError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    timeout: Duration,
}

impl SqliteStore {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Opens the pool and applies pending migrations.
    pub fn open(
        database_url: &str,
        pool_size: u32,
        busy_timeout_ms: u64,
        timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let pool = db::establish_pool(database_url, pool_size, busy_timeout_ms)?;
        let applied = db::run_migrations(&pool)?;
        if applied > 0 {
            debug!(applied, "applied migrations");
        }
        Ok(Self::new(pool, timeout))
    }

    pub async fn counts(&self) -> Result<TableCounts, PersistenceError> {
        self.with_conn(|conn| Ok(db::count_rows(conn)?)).await
    }

    pub async fn recent_posts(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Post>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            db::recent_posts(conn, since.timestamp(), limit)?
                .into_iter()
                .map(Post::try_from)
                .collect()
        })
        .await
    }

    pub async fn comments_by_sentiment(
        &self,
        label: SentimentLabel,
        limit: usize,
    ) -> Result<Vec<(Comment, Post)>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            db::comments_by_sentiment(conn, label.into(), limit)?
                .into_iter()
                .map(|(comment, post)| -> Result<_, PersistenceError> {
                    Ok((Comment::try_from(comment)?, Post::try_from(post)?))
                })
                .collect()
        })
        .await
    }

    /// Runs `f` on a pooled connection off the async runtime, bounded by the
    /// store timeout. A timed-out call still commits or rolls back on its own.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, PersistenceError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(PersistenceError::Timeout(self.timeout)),
        }
    }
}

/// Find-or-insert in one transaction, resolving a lost insert race by
/// re-reading the winner.
fn find_or_insert<T>(
    conn: &mut SqliteConnection,
    find: impl Fn(&mut SqliteConnection) -> QueryResult<Option<T>>,
    insert: impl FnOnce(&mut SqliteConnection) -> QueryResult<T>,
) -> QueryResult<(T, bool)> {
    let attempt = conn.immediate_transaction(|conn| {
        if let Some(existing) = find(conn)? {
            return Ok((existing, false));
        }
        insert(conn).map(|row| (row, true))
    });

    match attempt {
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            let winner = find(conn)?.ok_or(DieselError::NotFound)?;
            Ok((winner, false))
        }
        other => other,
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn upsert_source(
        &self,
        platform: Platform,
        source_id: &str,
        info: SourceInfo,
    ) -> Result<Source, PersistenceError> {
        let source_id = source_id.to_string();

        self.with_conn(move |conn| {
            let platform_name: &str = platform.into();
            let (row, created) = find_or_insert(
                conn,
                |conn| db::find_source(conn, platform_name, &source_id),
                |conn| {
                    db::insert_source(
                        conn,
                        &NewSourceRow {
                            platform: platform_name,
                            source_id: &source_id,
                            display_name: info.display_name.as_deref(),
                            source_type: info.source_type.as_deref(),
                            created_at: Utc::now().timestamp(),
                        },
                    )
                },
            )?;

            let needs_backfill = (row.display_name.is_none() && info.display_name.is_some())
                || (row.source_type.is_none() && info.source_type.is_some());
            if created || !needs_backfill {
                return Source::try_from(row);
            }

            let row = conn.immediate_transaction(|conn| {
                db::backfill_source(
                    conn,
                    row.id,
                    info.display_name.as_deref(),
                    info.source_type.as_deref(),
                )?;
                db::get_source(conn, row.id)
            })?;
            debug!(source = %source_id, "backfilled source metadata");
            Source::try_from(row)
        })
        .await
    }

    async fn upsert_post(
        &self,
        source: &Source,
        post: NewPost,
    ) -> Result<(Post, bool), PersistenceError> {
        let row = NewPostRow {
            platform: post.platform.to_string(),
            platform_post_id: post.platform_post_id,
            source_ref: source.id,
            title: post.title,
            text: post.text,
            url: post.url,
            author: post.author,
            publish_time: post.publish_time.timestamp(),
            likes_count: post.engagement.likes,
            comments_count: post.engagement.comments,
            reposts_count: post.engagement.reposts,
            views_count: post.engagement.views,
            keywords: serde_json::to_string(&post.keywords)?,
            platform_data: serde_json::to_string(&post.platform_data)?,
            created_at: Utc::now().timestamp(),
        };

        self.with_conn(move |conn| {
            let (stored, is_new) = find_or_insert(
                conn,
                |conn| db::find_post(conn, &row.platform, &row.platform_post_id),
                |conn| db::insert_post(conn, &row),
            )?;
            Ok((Post::try_from(stored)?, is_new))
        })
        .await
    }

    async fn upsert_comment(
        &self,
        post: &Post,
        comment: NewComment,
    ) -> Result<(Comment, bool), PersistenceError> {
        let row = NewCommentRow {
            post_ref: post.id,
            platform_comment_id: comment.platform_comment_id,
            platform_user_id: comment.platform_user_id,
            text: comment.text,
            original_text: comment.original_text,
            sentiment: comment.sentiment.to_string(),
            publish_time: comment.publish_time.timestamp(),
            likes_count: comment.likes,
            platform_data: serde_json::to_string(&comment.platform_data)?,
            created_at: Utc::now().timestamp(),
        };

        self.with_conn(move |conn| {
            let (stored, is_new) = find_or_insert(
                conn,
                |conn| db::find_comment(conn, row.post_ref, &row.platform_comment_id),
                |conn| db::insert_comment(conn, &row),
            )?;
            Ok((Comment::try_from(stored)?, is_new))
        })
        .await
    }

    async fn mark_comments_synced(&self, post: &Post) -> Result<Post, PersistenceError> {
        let id = post.id;
        self.with_conn(move |conn| {
            let row = db::mark_comments_synced(conn, id, Utc::now().timestamp())?;
            Post::try_from(row)
        })
        .await
    }
}
