// Feedrefresh Infrastructure - HTTP Feed Fetcher
// Implements: FeedContentFetcher

mod fetcher;
mod parser;

pub use fetcher::{HttpFeedContentFetcher, USER_AGENT};
pub use parser::parse_feed;
