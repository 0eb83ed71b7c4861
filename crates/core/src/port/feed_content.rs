// Feed Content Port
// Abstraction over fetching and parsing a feed document

use crate::domain::NewFeedPost;
use async_trait::async_trait;
use thiserror::Error;

/// Fetch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Feed content fetcher
///
/// Implementations:
/// - HttpFeedContentFetcher (infra-http): GET + RSS/Atom parsing
/// - MockFeedContentFetcher (tests)
#[async_trait]
pub trait FeedContentFetcher: Send + Sync {
    /// Fetch `url` and return the posts it currently lists
    async fn fetch(&self, url: &str) -> Result<Vec<NewFeedPost>, FetchError>;
}
