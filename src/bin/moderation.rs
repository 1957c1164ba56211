use anyhow::{anyhow, Context, Result};
use newswatch::moderation::{JsonlModerationLog, ModerationLog};
use newswatch::settings::settings;
use newswatch::utils::{init_tracing, log_pruned, print_moderation_entries};
use std::env;
use std::process;
use std::str::FromStr;

const DEFAULT_LIST_LIMIT: usize = 20;

fn print_usage() {
    eprintln!("Usage: moderation <list [limit] | prune [days]>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  list [limit]   Newest flagged comments first (default {DEFAULT_LIST_LIMIT})");
    eprintln!("  prune [days]   Drop entries older than <days> (default from settings)");
}

fn parse_arg<T: FromStr>(arg: Option<&String>, default: T) -> Result<T> {
    match arg {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("not a number: {value}")),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = settings();

    let log = JsonlModerationLog::open(&settings.moderation.log_path)
        .context("failed to open moderation log")?;

    match args.first().map(String::as_str) {
        Some("list") => {
            let limit = parse_arg(args.get(1), DEFAULT_LIST_LIMIT)?;
            let entries = log.recent(limit).context("failed to read moderation log")?;
            print_moderation_entries(&entries);
        }
        Some("prune") => {
            let days = parse_arg(args.get(1), settings.moderation.retention_days)?;
            let removed = log.prune(days).context("failed to prune moderation log")?;
            log_pruned(removed, days);
        }
        _ => {
            print_usage();
            process::exit(1);
        }
    }

    Ok(())
}
