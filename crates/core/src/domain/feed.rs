// Feed Domain Model (collaborator view)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feed identifier
pub type FeedId = i64;

/// The part of a feed the refresh engine needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub title: Option<String>,
}

/// A post parsed from feed content, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedPost {
    /// Stable identifier within the feed (guid, atom id, or link)
    pub guid: String,
    pub title: String,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}
