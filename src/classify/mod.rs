mod lexicon;
#[cfg(feature = "ml")]
mod zero_shot;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::ClassificationError;

pub use lexicon::LexiconClassifier;
#[cfg(feature = "ml")]
pub use zero_shot::MLHandle;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// The label that sends a comment to the moderation queue.
    pub const FLAGGED: SentimentLabel = SentimentLabel::Negative;

    pub fn is_flagged(self) -> bool {
        self == Self::FLAGGED
    }

    pub fn all_labels() -> Vec<&'static str> {
        Self::iter().map(|l| l.into()).collect()
    }
}

/// Maps comment text to a sentiment label. Side-effect free; one call per comment.
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<SentimentLabel, ClassificationError>;
}

impl<C: Classifier + ?Sized> Classifier for std::sync::Arc<C> {
    fn classify(&self, text: &str) -> Result<SentimentLabel, ClassificationError> {
        (**self).classify(text)
    }
}
