use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use newswatch::classify::SentimentLabel;
use newswatch::settings::settings;
use newswatch::store::SqliteStore;
use newswatch::utils::{init_tracing, print_comments, print_posts};
use std::env;
use std::process;
use std::str::FromStr;

const DEFAULT_HOURS: i64 = 24;
const DEFAULT_LIMIT: usize = 20;

fn print_usage() {
    eprintln!("Usage: content <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  posts [hours] [limit]         Posts from the last <hours> (default 24)");
    eprintln!("  latest [limit]                Newest stored posts (default {DEFAULT_LIMIT})");
    eprintln!("  comments [sentiment] [limit]  Comments by label (default negative)");
}

fn parse_arg<T: FromStr>(arg: Option<&String>, default: T) -> Result<T> {
    match arg {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("unexpected argument: {value}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = settings();

    let store = SqliteStore::open(
        &settings.store.database_url,
        settings.store.pool_size,
        settings.store.busy_timeout_ms,
        settings.store_timeout(),
    )
    .context("failed to open content store")?;

    match args.first().map(String::as_str) {
        Some("posts") => {
            let hours: i64 = parse_arg(args.get(1), DEFAULT_HOURS)?;
            let limit = parse_arg(args.get(2), DEFAULT_LIMIT)?;
            let since = Duration::try_hours(hours)
                .and_then(|back| Utc::now().checked_sub_signed(back))
                .ok_or_else(|| anyhow!("hours out of range: {hours}"))?;
            print_posts(&store.recent_posts(since, limit).await?);
        }
        Some("latest") => {
            let limit = parse_arg(args.get(1), DEFAULT_LIMIT)?;
            print_posts(&store.recent_posts(DateTime::UNIX_EPOCH, limit).await?);
        }
        Some("comments") => {
            let label = parse_arg(args.get(1), SentimentLabel::FLAGGED)?;
            let limit = parse_arg(args.get(2), DEFAULT_LIMIT)?;
            print_comments(label, &store.comments_by_sentiment(label, limit).await?);
        }
        _ => {
            print_usage();
            process::exit(1);
        }
    }

    Ok(())
}
