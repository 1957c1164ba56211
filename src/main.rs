use anyhow::{Context, Result};
use chrono::Utc;
use newswatch::adapter::DumpAdapter;
use newswatch::classify::{Classifier, LexiconClassifier};
use newswatch::model::Platform;
use newswatch::moderation::{JsonlModerationLog, ModerationLog};
use newswatch::orchestrator::{cancel_pair, Orchestrator};
use newswatch::settings::{settings, ClassifierBackend, Settings};
use newswatch::store::SqliteStore;
use newswatch::utils::{init_tracing, log_db_ready, log_init, log_pruned, print_run_report};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_tracing()?;

    let as_json = std::env::args().skip(1).any(|arg| arg == "--json");
    let settings = settings();

    log_init(
        &settings.store.database_url,
        &settings.moderation.log_path,
        settings.sources.len(),
        &format!("{:?}", settings.classifier.backend).to_lowercase(),
    );

    let store = SqliteStore::open(
        &settings.store.database_url,
        settings.store.pool_size,
        settings.store.busy_timeout_ms,
        settings.store_timeout(),
    )
    .context("failed to open content store")?;
    log_db_ready(&store.counts().await?);

    let moderation = Arc::new(
        JsonlModerationLog::open(&settings.moderation.log_path)
            .context("failed to open moderation log")?,
    );
    let classifier = build_classifier(settings)?;

    let mut orchestrator = Orchestrator::new(Arc::new(store), classifier, moderation.clone());
    for platform in Platform::iter() {
        orchestrator = orchestrator.with_adapter(Arc::new(DumpAdapter::new(
            platform,
            &settings.dump_dir,
        )));
    }

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = orchestrator
        .run(&settings.targets(), &settings.run_config(Utc::now()), &signal)
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }

    let retention_days = settings.moderation.retention_days;
    let removed = tokio::task::spawn_blocking(move || moderation.prune(retention_days)).await??;
    if !as_json {
        log_pruned(removed, retention_days);
    }

    Ok(())
}

fn build_classifier(settings: &Settings) -> Result<Arc<dyn Classifier>> {
    let negative = &settings.classifier.negative_terms;
    let positive = &settings.classifier.positive_terms;

    match settings.classifier.backend {
        ClassifierBackend::Lexicon => Ok(Arc::new(LexiconClassifier::new(negative, positive)?)),
        #[cfg(feature = "ml")]
        ClassifierBackend::ZeroShot => {
            newswatch::utils::log_ml_loading();
            let timeout = std::time::Duration::from_secs(settings.classifier.ml_timeout_secs);
            Ok(Arc::new(newswatch::classify::MLHandle::spawn(timeout)?))
        }
        #[cfg(not(feature = "ml"))]
        ClassifierBackend::ZeroShot => {
            warn!("zero-shot classifier needs the `ml` feature, using the lexicon");
            Ok(Arc::new(LexiconClassifier::new(negative, positive)?))
        }
    }
}
