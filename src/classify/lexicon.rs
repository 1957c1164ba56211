use regex::{Regex, RegexBuilder};

use super::{Classifier, SentimentLabel};
use crate::error::ClassificationError;

/// Term-list classifier. Negative terms win over positive ones.
pub struct LexiconClassifier {
    negative: Option<Regex>,
    positive: Option<Regex>,
}

impl LexiconClassifier {
    pub fn new(negative_terms: &[String], positive_terms: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            negative: build_pattern(negative_terms)?,
            positive: build_pattern(positive_terms)?,
        })
    }
}

fn build_pattern(terms: &[String]) -> Result<Option<Regex>, regex::Error> {
    let alternatives: Vec<String> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(regex::escape)
        .collect();

    if alternatives.is_empty() {
        return Ok(None);
    }

    RegexBuilder::new(&format!("(?:{})", alternatives.join("|")))
        .case_insensitive(true)
        .unicode(true)
        .build()
        .map(Some)
}

impl Classifier for LexiconClassifier {
    fn classify(&self, text: &str) -> Result<SentimentLabel, ClassificationError> {
        if text.trim().is_empty() {
            return Err(ClassificationError::EmptyText);
        }

        if self.negative.as_ref().is_some_and(|re| re.is_match(text)) {
            return Ok(SentimentLabel::Negative);
        }
        if self.positive.as_ref().is_some_and(|re| re.is_match(text)) {
            return Ok(SentimentLabel::Positive);
        }
        Ok(SentimentLabel::Neutral)
    }
}
