use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Spellings a keyword may appear under in post text: plain, glued,
/// snake- or kebab-joined, and as a hashtag.
fn keyword_variants(keyword: &str) -> Vec<String> {
    let lower = WHITESPACE
        .replace_all(keyword.trim(), " ")
        .to_lowercase();
    if lower.is_empty() {
        return Vec::new();
    }

    let glued = lower.replace(' ', "");
    let snake = lower.replace(' ', "_");
    let kebab = lower.replace(' ', "-");

    let mut variants = vec![
        lower,
        glued.clone(),
        snake.clone(),
        kebab,
        format!("#{glued}"),
        format!("#{snake}"),
    ];
    variants.dedup();
    variants
}

pub fn contains_keyword(text_lower: &str, keyword: &str) -> bool {
    keyword_variants(keyword)
        .iter()
        .any(|variant| text_lower.contains(variant.as_str()))
}

/// Configured keywords found in `text`, in configured order, without repeats.
pub fn matched_keywords(text: &str, keywords: &[String]) -> Vec<String> {
    let text_lower = text.to_lowercase();
    let mut found: Vec<String> = Vec::new();
    for keyword in keywords {
        if found.iter().any(|k| k == keyword) {
            continue;
        }
        if contains_keyword(&text_lower, keyword) {
            found.push(keyword.clone());
        }
    }
    found
}

/// A post is relevant when no keywords are configured or at least one matches.
pub fn is_relevant(keywords: &[String], matched: &[String]) -> bool {
    keywords.is_empty() || !matched.is_empty()
}
