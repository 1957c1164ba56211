use console::{measure_text_width, Style};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::classify::SentimentLabel;
use crate::db::TableCounts;
use crate::model::{Comment, Post};
use crate::moderation::ModerationEntry;
use crate::report::{RunReport, SourceReport, SourceState};

pub const TREE_BRANCH: char = '\u{251C}';
pub const TREE_END: char = '\u{2514}';
pub const TREE_HORIZ: char = '\u{2500}';
pub const TREE_VERT: char = '\u{2502}';

const TREE_PREFIX_WIDTH: usize = 4;
const VALUE_COLUMN: usize = 25;
const PREVIEW_CHARS: usize = 60;

fn tree_branch() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_BRANCH, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_end() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_END, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_indent() -> String {
    dim().apply_to(format!("{}   ", TREE_VERT)).to_string()
}

fn tree_space() -> String {
    " ".repeat(TREE_PREFIX_WIDTH)
}

fn branch(is_last: bool) -> String {
    if is_last {
        tree_end()
    } else {
        tree_branch()
    }
}

pub fn dim() -> Style {
    Style::new().dim()
}

fn blue() -> Style {
    Style::new().blue()
}

fn magenta() -> Style {
    Style::new().magenta()
}

fn cyan() -> Style {
    Style::new().cyan()
}

fn green() -> Style {
    Style::new().green()
}

fn red() -> Style {
    Style::new().red()
}

fn yellow() -> Style {
    Style::new().yellow()
}

fn bold() -> Style {
    Style::new().bold()
}

fn init_prefix() -> String {
    blue().apply_to("[INIT]").to_string()
}

fn run_prefix() -> String {
    magenta().apply_to("[RUN]").to_string()
}

fn mod_prefix() -> String {
    red().apply_to("[MOD]").to_string()
}

fn ml_prefix() -> String {
    yellow().apply_to("[ML]").to_string()
}

/// Compact `tracing` output filtered by `RUST_LOG`, `newswatch=info` by default.
pub fn init_tracing() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("newswatch=info".parse()?))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        );
    set_global_default(subscriber)?;
    Ok(())
}

pub fn pad_label(label: &str, depth: usize) -> String {
    let prefix_width = depth * TREE_PREFIX_WIDTH;
    let target_width = VALUE_COLUMN.saturating_sub(prefix_width);
    let current_width = measure_text_width(label);
    if current_width < target_width {
        format!("{}{}", label, " ".repeat(target_width - current_width))
    } else {
        format!("{} ", label)
    }
}

/// Single-line preview, cut at `PREVIEW_CHARS`.
pub fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > PREVIEW_CHARS {
        format!("{}...", flat.chars().take(PREVIEW_CHARS - 3).collect::<String>())
    } else {
        flat
    }
}

pub fn log_init(database_url: &str, moderation_log: &str, sources: usize, classifier: &str) {
    println!(
        "{} starting newswatch with {} sources...",
        init_prefix(),
        bold().apply_to(sources),
    );
    println!("{}{} {}", tree_branch(), pad_label("store", 1), cyan().apply_to(database_url));
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("moderation log", 1),
        cyan().apply_to(moderation_log)
    );
    println!("{}{} {}", tree_end(), pad_label("classifier", 1), cyan().apply_to(classifier));
}

pub fn log_db_ready(counts: &TableCounts) {
    println!(
        "{} store ready: {} sources, {} posts, {} comments",
        init_prefix(),
        bold().apply_to(counts.sources),
        bold().apply_to(counts.posts),
        bold().apply_to(counts.comments)
    );
}

pub fn log_ml_loading() {
    println!("{} loading sentiment model in background...", ml_prefix());
}

fn state_style(state: SourceState) -> Style {
    match state {
        SourceState::Succeeded => green(),
        SourceState::Failed => red(),
        SourceState::Running => yellow(),
        SourceState::Pending => dim(),
    }
}

/// Sources are never the last branch; the totals block closes the tree.
fn source_lines(source: &SourceReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{}{} {}",
        tree_branch(),
        pad_label(&format!("{}/{}", source.platform, source.source_id), 1),
        state_style(source.state).apply_to(source.state)
    )];

    let indent = tree_indent();
    let c = &source.counts;
    let mut rows = vec![
        ("posts", format!("{} new / {} seen", bold().apply_to(c.posts_new), c.posts_seen)),
        (
            "comments",
            format!("{} new / {} seen", bold().apply_to(c.comments_new), c.comments_seen),
        ),
        ("moderation", bold().apply_to(c.moderation_written).to_string()),
    ];
    if c.posts_filtered > 0 {
        rows.push(("filtered", dim().apply_to(c.posts_filtered).to_string()));
    }
    if c.item_errors > 0 {
        rows.push(("item errors", yellow().apply_to(c.item_errors).to_string()));
    }
    if let Some(error) = &source.error {
        rows.push(("error", red().apply_to(error).to_string()));
    }

    let count = rows.len();
    for (i, (label, value)) in rows.into_iter().enumerate() {
        lines.push(format!(
            "{}{}{} {}",
            indent,
            branch(i == count - 1),
            pad_label(label, 2),
            value
        ));
    }
    lines
}

pub fn print_run_report(report: &RunReport) {
    let elapsed = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;
    let mut lines = vec![format!(
        "{} done in {}s, {} of {} sources failed.",
        run_prefix(),
        bold().apply_to(format!("{elapsed:.1}")),
        if report.failed_sources() > 0 {
            red().apply_to(report.failed_sources())
        } else {
            green().apply_to(report.failed_sources())
        },
        report.sources.len()
    )];

    for source in &report.sources {
        lines.extend(source_lines(source));
    }

    let t = &report.total;
    lines.push(format!("{}{}", tree_end(), bold().apply_to("total")));
    lines.push(format!(
        "{}{}{} {}",
        tree_space(),
        tree_branch(),
        pad_label("posts new", 2),
        bold().apply_to(t.posts_new)
    ));
    lines.push(format!(
        "{}{}{} {}",
        tree_space(),
        tree_branch(),
        pad_label("comments new", 2),
        bold().apply_to(t.comments_new)
    ));
    lines.push(format!(
        "{}{}{} {}",
        tree_space(),
        tree_end(),
        pad_label("moderation", 2),
        bold().apply_to(t.moderation_written)
    ));

    println!("{}\n", lines.join("\n"));
}

pub fn log_pruned(removed: usize, retention_days: i64) {
    if removed > 0 {
        println!(
            "{} pruned {} entries older than {} days",
            mod_prefix(),
            bold().apply_to(removed),
            retention_days
        );
    } else {
        println!(
            "{} {}",
            mod_prefix(),
            dim().apply_to(format!("nothing older than {retention_days} days"))
        );
    }
}

pub fn print_moderation_entries(entries: &[ModerationEntry]) {
    if entries.is_empty() {
        println!("{} {}", mod_prefix(), dim().apply_to("queue is empty"));
        return;
    }

    println!(
        "{} {} flagged comments, newest first",
        mod_prefix(),
        bold().apply_to(entries.len())
    );
    let count = entries.len();
    for (i, entry) in entries.iter().enumerate() {
        let is_last = i == count - 1;
        let indent = if is_last { tree_space() } else { tree_indent() };
        println!(
            "{}{} {}",
            branch(is_last),
            dim().apply_to(entry.detection_time.format("%Y-%m-%d %H:%M")),
            red().apply_to(format!("\"{}\"", preview(&entry.text)))
        );
        println!(
            "{}{}{} {} {}",
            indent,
            tree_branch(),
            pad_label("from", 2),
            entry.platform,
            entry.user_id
        );
        println!(
            "{}{}{} {}",
            indent,
            tree_end(),
            pad_label("post", 2),
            dim().apply_to(if entry.post_url.is_empty() {
                entry.post_title.as_str()
            } else {
                entry.post_url.as_str()
            })
        );
    }
}

fn content_prefix() -> String {
    cyan().apply_to("[DB]").to_string()
}

pub fn print_posts(posts: &[Post]) {
    if posts.is_empty() {
        println!("{} {}", content_prefix(), dim().apply_to("no posts in range"));
        return;
    }

    println!("{} {} posts, newest first", content_prefix(), bold().apply_to(posts.len()));
    let count = posts.len();
    for (i, post) in posts.iter().enumerate() {
        let is_last = i == count - 1;
        let indent = if is_last { tree_space() } else { tree_indent() };
        println!(
            "{}{} {}",
            branch(is_last),
            dim().apply_to(post.publish_time.format("%Y-%m-%d %H:%M")),
            bold().apply_to(preview(&post.title))
        );
        println!(
            "{}{}{} {} {}",
            indent,
            tree_branch(),
            pad_label("post", 2),
            post.platform,
            post.platform_post_id
        );
        if !post.keywords.is_empty() {
            println!(
                "{}{}{} {}",
                indent,
                tree_branch(),
                pad_label("keywords", 2),
                post.keywords.join(", ")
            );
        }
        println!(
            "{}{}{} {}",
            indent,
            tree_end(),
            pad_label("url", 2),
            dim().apply_to(&post.url)
        );
    }
}

fn sentiment_style(label: SentimentLabel) -> Style {
    match label {
        SentimentLabel::Negative => red(),
        SentimentLabel::Positive => green(),
        SentimentLabel::Neutral => dim(),
    }
}

pub fn print_comments(label: SentimentLabel, comments: &[(Comment, Post)]) {
    if comments.is_empty() {
        println!(
            "{} {}",
            content_prefix(),
            dim().apply_to(format!("no {label} comments"))
        );
        return;
    }

    println!(
        "{} {} {} comments, newest first",
        content_prefix(),
        bold().apply_to(comments.len()),
        sentiment_style(label).apply_to(label)
    );
    let count = comments.len();
    for (i, (comment, post)) in comments.iter().enumerate() {
        let is_last = i == count - 1;
        let indent = if is_last { tree_space() } else { tree_indent() };
        println!(
            "{}{} {}",
            branch(is_last),
            dim().apply_to(comment.publish_time.format("%Y-%m-%d %H:%M")),
            sentiment_style(comment.sentiment).apply_to(format!("\"{}\"", preview(&comment.text)))
        );
        println!(
            "{}{}{} {} {}",
            indent,
            tree_branch(),
            pad_label("from", 2),
            post.platform,
            comment.platform_user_id
        );
        println!(
            "{}{}{} {}",
            indent,
            tree_end(),
            pad_label("post", 2),
            dim().apply_to(if post.url.is_empty() {
                post.title.as_str()
            } else {
                post.url.as_str()
            })
        );
    }
}

pub fn log_error(context: &str, error: &str) {
    eprintln!("{} {} {}", red().apply_to("[ERROR]"), context, dim().apply_to(error));
}
