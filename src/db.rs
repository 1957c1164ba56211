use crate::classify::SentimentLabel;
use crate::error::PersistenceError;
use crate::model::{Comment, Engagement, Platform, Post, Source};
use crate::schema::{comments, posts, sources};
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::str::FromStr;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Clone, Copy)]
struct Pragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        configure_connection(conn, self.busy_timeout_ms).map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn establish_pool(
    database_url: &str,
    max_size: u32,
    busy_timeout_ms: u64,
) -> Result<DbPool, PersistenceError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(Pragmas { busy_timeout_ms }))
        .build(manager)?;
    Ok(pool)
}

/// Applied to every pooled connection; sqlite pragmas are per-connection.
pub fn configure_connection(conn: &mut SqliteConnection, busy_timeout_ms: u64) -> QueryResult<()> {
    conn.batch_execute(&format!("PRAGMA busy_timeout = {busy_timeout_ms};"))?;
    conn.batch_execute("PRAGMA journal_mode = WAL;")?;
    conn.batch_execute("PRAGMA synchronous = NORMAL;")?;
    conn.batch_execute("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

pub fn run_migrations(pool: &DbPool) -> Result<usize, PersistenceError> {
    let mut conn = pool.get()?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| PersistenceError::Migration(e.to_string()))?;
    Ok(applied.len())
}

fn to_utc(secs: i64) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PersistenceError::InvalidRow(format!("timestamp {secs} out of range")))
}

fn parse_platform(value: &str) -> Result<Platform, PersistenceError> {
    Platform::from_str(value)
        .map_err(|_| PersistenceError::InvalidRow(format!("unknown platform {value:?}")))
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = sources)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SourceRow {
    pub id: i64,
    pub platform: String,
    pub source_id: String,
    pub display_name: Option<String>,
    pub source_type: Option<String>,
    pub created_at: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = sources)]
pub struct NewSourceRow<'a> {
    pub platform: &'a str,
    pub source_id: &'a str,
    pub display_name: Option<&'a str>,
    pub source_type: Option<&'a str>,
    pub created_at: i64,
}

impl TryFrom<SourceRow> for Source {
    type Error = PersistenceError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        Ok(Source {
            id: row.id,
            platform: parse_platform(&row.platform)?,
            source_id: row.source_id,
            display_name: row.display_name,
            source_type: row.source_type,
            created_at: to_utc(row.created_at)?,
        })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = posts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PostRow {
    pub id: i64,
    pub platform: String,
    pub platform_post_id: String,
    pub source_ref: i64,
    pub title: String,
    pub text: String,
    pub url: String,
    pub author: Option<String>,
    pub publish_time: i64,
    pub likes_count: i64,
    pub comments_count: i64,
    pub reposts_count: i64,
    pub views_count: i64,
    pub keywords: String,
    pub platform_data: String,
    pub created_at: i64,
    pub comments_synced_at: Option<i64>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = posts)]
pub struct NewPostRow {
    pub platform: String,
    pub platform_post_id: String,
    pub source_ref: i64,
    pub title: String,
    pub text: String,
    pub url: String,
    pub author: Option<String>,
    pub publish_time: i64,
    pub likes_count: i64,
    pub comments_count: i64,
    pub reposts_count: i64,
    pub views_count: i64,
    pub keywords: String,
    pub platform_data: String,
    pub created_at: i64,
}

impl TryFrom<PostRow> for Post {
    type Error = PersistenceError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Post {
            id: row.id,
            source_ref: row.source_ref,
            platform: parse_platform(&row.platform)?,
            platform_post_id: row.platform_post_id,
            title: row.title,
            text: row.text,
            url: row.url,
            author: row.author,
            publish_time: to_utc(row.publish_time)?,
            engagement: Engagement {
                likes: row.likes_count,
                comments: row.comments_count,
                reposts: row.reposts_count,
                views: row.views_count,
            },
            keywords: serde_json::from_str(&row.keywords)?,
            platform_data: serde_json::from_str(&row.platform_data)?,
            created_at: to_utc(row.created_at)?,
            comments_synced_at: row.comments_synced_at.map(to_utc).transpose()?,
        })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = comments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CommentRow {
    pub id: i64,
    pub post_ref: i64,
    pub platform_comment_id: String,
    pub platform_user_id: String,
    pub text: String,
    pub original_text: String,
    pub sentiment: String,
    pub publish_time: i64,
    pub likes_count: i64,
    pub platform_data: String,
    pub created_at: i64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = comments)]
pub struct NewCommentRow {
    pub post_ref: i64,
    pub platform_comment_id: String,
    pub platform_user_id: String,
    pub text: String,
    pub original_text: String,
    pub sentiment: String,
    pub publish_time: i64,
    pub likes_count: i64,
    pub platform_data: String,
    pub created_at: i64,
}

impl TryFrom<CommentRow> for Comment {
    type Error = PersistenceError;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        let sentiment = SentimentLabel::from_str(&row.sentiment).map_err(|_| {
            PersistenceError::InvalidRow(format!("unknown sentiment {:?}", row.sentiment))
        })?;
        Ok(Comment {
            id: row.id,
            post_ref: row.post_ref,
            platform_comment_id: row.platform_comment_id,
            platform_user_id: row.platform_user_id,
            text: row.text,
            original_text: row.original_text,
            sentiment,
            publish_time: to_utc(row.publish_time)?,
            likes: row.likes_count,
            platform_data: serde_json::from_str(&row.platform_data)?,
            created_at: to_utc(row.created_at)?,
        })
    }
}

pub fn find_source(
    conn: &mut SqliteConnection,
    platform_val: &str,
    source_id_val: &str,
) -> QueryResult<Option<SourceRow>> {
    use crate::schema::sources::dsl::*;

    sources
        .filter(platform.eq(platform_val))
        .filter(source_id.eq(source_id_val))
        .select(SourceRow::as_select())
        .first(conn)
        .optional()
}

pub fn insert_source(conn: &mut SqliteConnection, row: &NewSourceRow) -> QueryResult<SourceRow> {
    diesel::insert_into(sources::table)
        .values(row)
        .returning(SourceRow::as_returning())
        .get_result(conn)
}

/// Fills `display_name`/`source_type` only where they are still NULL.
pub fn backfill_source(
    conn: &mut SqliteConnection,
    id_val: i64,
    display_name_val: Option<&str>,
    source_type_val: Option<&str>,
) -> QueryResult<usize> {
    use crate::schema::sources::dsl::*;

    let mut updated = 0;
    if let Some(name) = display_name_val {
        updated += diesel::update(sources.find(id_val).filter(display_name.is_null()))
            .set(display_name.eq(name))
            .execute(conn)?;
    }
    if let Some(kind) = source_type_val {
        updated += diesel::update(sources.find(id_val).filter(source_type.is_null()))
            .set(source_type.eq(kind))
            .execute(conn)?;
    }
    Ok(updated)
}

pub fn get_source(conn: &mut SqliteConnection, id_val: i64) -> QueryResult<SourceRow> {
    sources::table
        .find(id_val)
        .select(SourceRow::as_select())
        .first(conn)
}

pub fn find_post(
    conn: &mut SqliteConnection,
    platform_val: &str,
    platform_post_id_val: &str,
) -> QueryResult<Option<PostRow>> {
    use crate::schema::posts::dsl::*;

    posts
        .filter(platform.eq(platform_val))
        .filter(platform_post_id.eq(platform_post_id_val))
        .select(PostRow::as_select())
        .first(conn)
        .optional()
}

pub fn insert_post(conn: &mut SqliteConnection, row: &NewPostRow) -> QueryResult<PostRow> {
    diesel::insert_into(posts::table)
        .values(row)
        .returning(PostRow::as_returning())
        .get_result(conn)
}

pub fn mark_comments_synced(
    conn: &mut SqliteConnection,
    id_val: i64,
    synced_at: i64,
) -> QueryResult<PostRow> {
    use crate::schema::posts::dsl::*;

    diesel::update(posts.find(id_val))
        .set(comments_synced_at.eq(Some(synced_at)))
        .returning(PostRow::as_returning())
        .get_result(conn)
}

/// Posts published at or after `since`, newest first.
pub fn recent_posts(
    conn: &mut SqliteConnection,
    since: i64,
    max_rows: i64,
) -> QueryResult<Vec<PostRow>> {
    use crate::schema::posts::dsl::*;

    posts
        .filter(publish_time.ge(since))
        .order((publish_time.desc(), id.desc()))
        .limit(max_rows)
        .select(PostRow::as_select())
        .load(conn)
}

pub fn find_comment(
    conn: &mut SqliteConnection,
    post_ref_val: i64,
    platform_comment_id_val: &str,
) -> QueryResult<Option<CommentRow>> {
    use crate::schema::comments::dsl::*;

    comments
        .filter(post_ref.eq(post_ref_val))
        .filter(platform_comment_id.eq(platform_comment_id_val))
        .select(CommentRow::as_select())
        .first(conn)
        .optional()
}

pub fn insert_comment(conn: &mut SqliteConnection, row: &NewCommentRow) -> QueryResult<CommentRow> {
    diesel::insert_into(comments::table)
        .values(row)
        .returning(CommentRow::as_returning())
        .get_result(conn)
}

/// Comments carrying `label`, newest first, each with its post.
pub fn comments_by_sentiment(
    conn: &mut SqliteConnection,
    label: &str,
    max_rows: i64,
) -> QueryResult<Vec<(CommentRow, PostRow)>> {
    comments::table
        .inner_join(posts::table)
        .filter(comments::sentiment.eq(label))
        .order((comments::publish_time.desc(), comments::id.desc()))
        .limit(max_rows)
        .select((CommentRow::as_select(), PostRow::as_select()))
        .load(conn)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub sources: i64,
    pub posts: i64,
    pub comments: i64,
}

pub fn count_rows(conn: &mut SqliteConnection) -> QueryResult<TableCounts> {
    Ok(TableCounts {
        sources: sources::table.count().get_result(conn)?,
        posts: posts::table.count().get_result(conn)?,
        comments: comments::table.count().get_result(conn)?,
    })
}
