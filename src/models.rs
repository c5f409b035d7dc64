use chrono::{DateTime, Utc};

/// An X account profile as returned by the user lookup endpoints.
#[derive(Debug, Clone, Default)]
pub struct XUser {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub bio: String,
    pub followers: i64,
    pub following: i64,
    pub post_count: i64,
    pub listed_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub has_avatar: bool,
    pub has_bio: bool,
}

/// A single post with engagement counts.
#[derive(Debug, Clone, Default)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub views: i64,
    pub likes: i64,
    pub reposts: i64,
    pub quotes: i64,
    /// Extracted `$TICKER` patterns, e.g. `["BTC", "ETH"]`.
    pub token_mentions: Vec<String>,
}

/// Pagination continuation marker for timeline requests.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub value: String,
    pub is_next: bool,
}
