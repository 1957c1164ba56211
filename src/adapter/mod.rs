mod dump;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::AdapterError;
use crate::model::{Platform, RawComment, RawPost, SourceInfo, TimeWindow};

pub use dump::DumpAdapter;

pub type RecordStream<'a, T> = BoxStream<'a, Result<T, AdapterError>>;

/// One platform integration. "No results" is an empty stream, never an error.
///
/// `fetch` should yield posts newest first; consumers stop reading at the
/// first post older than `window.start`, so adapters need not pre-filter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn describe(&self, _source_id: &str) -> Result<Option<SourceInfo>, AdapterError> {
        Ok(None)
    }

    fn fetch<'a>(&'a self, source_id: &'a str, window: TimeWindow) -> RecordStream<'a, RawPost>;

    /// Comments of a post previously yielded by `fetch` for the same source.
    fn fetch_comments<'a>(
        &'a self,
        source_id: &'a str,
        post: &'a RawPost,
        limit: usize,
    ) -> RecordStream<'a, RawComment>;
}
