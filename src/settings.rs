use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use crate::model::{Platform, TimeWindow};
use crate::orchestrator::{RunConfig, SourceTarget};

static SETTINGS: OnceLock<Settings> = OnceLock::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub store: Store,
    pub run: Run,
    pub moderation: Moderation,
    pub classifier: ClassifierSettings,
    pub sources: Vec<SourceConfig>,
    pub dump_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub database_url: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub window_hours: i64,
    pub comment_limit: usize,
    pub fetch_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub max_parallel_sources: usize,
    pub max_consecutive_item_failures: usize,
    pub error_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Moderation {
    pub log_path: String,
    pub retention_days: i64,
    pub title_max_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassifierBackend {
    #[default]
    Lexicon,
    ZeroShot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default)]
    pub backend: ClassifierBackend,
    pub negative_terms: Vec<String>,
    pub positive_terms: Vec<String>,
    #[serde(default = "default_ml_timeout_secs")]
    pub ml_timeout_secs: u64,
}

fn default_ml_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub platform: Platform,
    pub source_id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub recheck_known_posts: bool,
}

impl From<&SourceConfig> for SourceTarget {
    fn from(config: &SourceConfig) -> Self {
        SourceTarget {
            platform: config.platform,
            source_id: config.source_id.clone(),
            keywords: config.keywords.clone(),
            recheck_known_posts: config.recheck_known_posts,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        let tns_keywords = strings(&[
            "ТНС энерго НН",
            "ТНС энерго Нижний Новгород",
            "ТНС",
            "Энергосбыт Нижний Новгород",
            "ТНС Нижний",
        ]);
        let vk_keywords = strings(&["тнс", "энерго", "энергосбыт"]);

        let telegram = |channel: &str| SourceConfig {
            platform: Platform::Telegram,
            source_id: channel.to_string(),
            keywords: tns_keywords.clone(),
            recheck_known_posts: false,
        };
        let vk = |group: &str| SourceConfig {
            platform: Platform::Vk,
            source_id: group.to_string(),
            keywords: vk_keywords.clone(),
            recheck_known_posts: false,
        };

        Self {
            store: Store {
                database_url: "newswatch.db".to_string(),
                pool_size: 4,
                busy_timeout_ms: 2000,
            },
            run: Run {
                window_hours: 24 * 5,
                comment_limit: 100,
                fetch_timeout_secs: 60,
                store_timeout_secs: 10,
                max_parallel_sources: 1,
                max_consecutive_item_failures: 5,
                error_max_chars: 300,
            },
            moderation: Moderation {
                log_path: "data/bad_comments.jsonl".to_string(),
                retention_days: 30,
                title_max_chars: 100,
            },
            classifier: ClassifierSettings {
                backend: ClassifierBackend::Lexicon,
                negative_terms: strings(&[
                    "обман",
                    "мошенник",
                    "безобразие",
                    "позор",
                    "ужас",
                    "отвратительн",
                    "воруют",
                    "грабеж",
                    "развод",
                    "хамство",
                    "жалоба",
                    "верните деньги",
                ]),
                positive_terms: strings(&[
                    "спасибо",
                    "благодар",
                    "молодцы",
                    "быстро починили",
                    "отлично",
                ]),
                ml_timeout_secs: default_ml_timeout_secs(),
            },
            sources: vec![
                telegram("Dzerzhinsk_blackhole"),
                telegram("tns_energo_nn"),
                vk("tns_energo_nn"),
                vk("moynnov"),
                vk("governmentnnov"),
                vk("typical_nn"),
            ],
            dump_dir: "data/dumps".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> &'static Settings {
        SETTINGS.get_or_init(|| {
            let mut settings = Self::load_from_files();
            settings.apply_env();
            settings
        })
    }

    fn load_from_files() -> Settings {
        let default_path = Path::new("settings.default.ron");
        let override_path = Path::new("settings.ron");

        let mut settings = if default_path.exists() {
            read_settings(default_path).unwrap_or_default()
        } else {
            Settings::default()
        };

        if override_path.exists() {
            if let Some(overrides) = read_settings(override_path) {
                settings = overrides;
            }
        }

        settings
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Ok(path) = std::env::var("MODERATION_LOG") {
            self.moderation.log_path = path;
        }
        if let Ok(dir) = std::env::var("DUMP_DIR") {
            self.dump_dir = dir;
        }
    }

    pub fn targets(&self) -> Vec<SourceTarget> {
        self.sources.iter().map(SourceTarget::from).collect()
    }

    pub fn run_config(&self, window_end: chrono::DateTime<chrono::Utc>) -> RunConfig {
        RunConfig {
            window: TimeWindow::last_hours(window_end, self.run.window_hours),
            comment_limit: self.run.comment_limit,
            fetch_timeout: Duration::from_secs(self.run.fetch_timeout_secs),
            max_parallel_sources: self.run.max_parallel_sources.max(1),
            max_consecutive_item_failures: self.run.max_consecutive_item_failures,
            error_max_chars: self.run.error_max_chars,
            title_max_chars: self.moderation.title_max_chars,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.run.store_timeout_secs)
    }
}

fn read_settings(path: &Path) -> Option<Settings> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read settings file");
            return None;
        }
    };
    match ron::from_str(&content) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unparseable settings file");
            None
        }
    }
}

pub fn settings() -> &'static Settings {
    Settings::load()
}
