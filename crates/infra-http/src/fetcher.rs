// HTTP feed fetcher

use crate::parser::parse_feed;
use async_trait::async_trait;
use feedrefresh_core::domain::NewFeedPost;
use feedrefresh_core::error::{AppError, Result};
use feedrefresh_core::port::{FeedContentFetcher, FetchError};
use std::time::Duration;
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("feedrefresh/", env!("CARGO_PKG_VERSION"));

const ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// Maximum redirects followed per fetch
const MAX_REDIRECTS: usize = 5;

/// Fetches a feed over HTTP(S) and parses RSS/Atom
pub struct HttpFeedContentFetcher {
    client: reqwest::Client,
}

impl HttpFeedContentFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedContentFetcher for HttpFeedContentFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<NewFeedPost>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status.as_u16(), "Feed request failed");
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let posts = parse_feed(&body)?;
        debug!(url = %url, posts = %posts.len(), bytes = %body.len(), "Feed fetched");
        Ok(posts)
    }
}
