//! GraphQL timeline parsing into domain types. Timeline responses are a
//! deeply-nested instruction/entry structure; entries that fail to parse
//! are skipped individually so one malformed item never loses a page.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::classify::truncate_body;
use crate::error::{Error, Result};
use crate::models::{Post, XUser};

static TOKEN_MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z]{2,10})").expect("token mention regex"));

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// --- timeline shapes ---

#[derive(Deserialize, Default)]
struct TimelineObj {
    #[serde(default)]
    instructions: Vec<TimelineInstruction>,
}

#[derive(Deserialize, Default)]
struct TimelineInstruction {
    #[serde(default)]
    entries: Vec<TimelineEntry>,
    #[serde(default)]
    entry: Option<TimelineEntry>,
}

#[derive(Deserialize, Default, Clone)]
struct TimelineEntry {
    #[serde(default, rename = "entryId")]
    entry_id: String,
    #[serde(default)]
    content: TimelineContent,
}

#[derive(Deserialize, Default, Clone)]
struct TimelineContent {
    #[serde(default, rename = "entryType")]
    entry_type: String,
    #[serde(default, rename = "__typename")]
    typename: String,
    #[serde(default, rename = "itemContent")]
    item_content: Option<Value>,
    #[serde(default)]
    value: String,
    #[serde(default, rename = "cursorType")]
    cursor_type: String,
}

#[derive(Deserialize, Default)]
struct UserResult {
    #[serde(default, rename = "__typename")]
    typename: String,
    #[serde(default)]
    rest_id: String,
    #[serde(default)]
    legacy: UserLegacy,
    #[serde(default)]
    is_blue_verified: bool,
}

#[derive(Deserialize, Default)]
struct UserLegacy {
    #[serde(default)]
    name: String,
    #[serde(default)]
    screen_name: String,
    #[serde(default)]
    followers_count: i64,
    #[serde(default)]
    friends_count: i64,
    #[serde(default)]
    statuses_count: i64,
    #[serde(default)]
    listed_count: i64,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "profile_image_url_https")]
    profile_image_url: String,
}

#[derive(Deserialize, Default)]
struct TweetResult {
    #[serde(default)]
    rest_id: String,
    #[serde(default)]
    legacy: TweetLegacy,
    #[serde(default)]
    views: TweetViews,
}

#[derive(Deserialize, Default)]
struct TweetLegacy {
    #[serde(default)]
    full_text: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    favorite_count: i64,
    #[serde(default)]
    retweet_count: i64,
    #[serde(default)]
    quote_count: i64,
    #[serde(default)]
    user_id_str: String,
}

#[derive(Deserialize, Default)]
struct TweetViews {
    #[serde(default)]
    count: String,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

// --- top-level parsers ---

/// Parses the UserByScreenName response.
pub fn parse_user_by_screen_name(body: &[u8]) -> Result<XUser> {
    #[derive(Deserialize, Default)]
    struct Raw {
        #[serde(default)]
        data: Data,
        #[serde(default)]
        errors: Vec<ApiMessage>,
    }
    #[derive(Deserialize, Default)]
    struct Data {
        #[serde(default)]
        user: UserEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct UserEnvelope {
        #[serde(default)]
        result: UserResult,
    }

    let raw: Raw = serde_json::from_slice(body)?;
    if let Some(first) = raw.errors.first() {
        return Err(Error::Api(format!("service error: {}", first.message)));
    }
    parse_user_result(raw.data.user.result)
}

/// Parses a Followers/Following response into users plus the bottom cursor.
pub fn parse_user_list(body: &[u8]) -> Result<(Vec<XUser>, String)> {
    #[derive(Deserialize, Default)]
    struct Raw {
        #[serde(default)]
        data: Data,
    }
    #[derive(Deserialize, Default)]
    struct Data {
        #[serde(default)]
        user: UserEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct UserEnvelope {
        #[serde(default)]
        result: ResultObj,
    }
    #[derive(Deserialize, Default)]
    struct ResultObj {
        #[serde(default)]
        timeline: TimelineEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct TimelineEnvelope {
        #[serde(default)]
        timeline: TimelineObj,
    }

    let raw: Raw = serde_json::from_slice(body)?;
    Ok(extract_users_from_timeline(
        raw.data.user.result.timeline.timeline,
    ))
}

/// Parses a Retweeters response; older deployments shipped the
/// user-timeline shape, so that is the fallback.
pub fn parse_retweeter_list(body: &[u8]) -> Result<(Vec<XUser>, String)> {
    #[derive(Deserialize, Default)]
    struct Raw {
        #[serde(default)]
        data: Data,
    }
    #[derive(Deserialize, Default)]
    struct Data {
        #[serde(default)]
        retweeters_timeline: TimelineEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct TimelineEnvelope {
        #[serde(default)]
        timeline: TimelineObj,
    }

    let raw: Raw = serde_json::from_slice(body)?;
    let timeline = raw.data.retweeters_timeline.timeline;
    if timeline.instructions.is_empty() {
        return parse_user_list(body);
    }
    Ok(extract_users_from_timeline(timeline))
}

/// Parses the UserTweets timeline response.
pub fn parse_post_timeline(body: &[u8], author_id: &str) -> Result<Vec<Post>> {
    #[derive(Deserialize, Default)]
    struct Raw {
        #[serde(default)]
        data: Data,
    }
    #[derive(Deserialize, Default)]
    struct Data {
        #[serde(default)]
        user: UserEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct UserEnvelope {
        #[serde(default)]
        result: ResultObj,
    }
    #[derive(Deserialize, Default)]
    struct ResultObj {
        #[serde(default)]
        timeline: TimelineEnvelope,
        #[serde(default)]
        timeline_v2: TimelineEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct TimelineEnvelope {
        #[serde(default)]
        timeline: TimelineObj,
    }

    let raw: Raw = serde_json::from_slice(body)?;
    let mut timeline = raw.data.user.result.timeline.timeline;
    if timeline.instructions.is_empty() {
        timeline = raw.data.user.result.timeline_v2.timeline;
    }
    Ok(extract_posts_from_timeline(timeline, author_id))
}

/// Parses the SearchTimeline response.
pub fn parse_search_timeline(body: &[u8]) -> Result<Vec<Post>> {
    #[derive(Deserialize, Default)]
    struct Raw {
        #[serde(default)]
        data: Data,
    }
    #[derive(Deserialize, Default)]
    struct Data {
        #[serde(default)]
        search_by_raw_query: SearchEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct SearchEnvelope {
        #[serde(default)]
        search_timeline: TimelineEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct TimelineEnvelope {
        #[serde(default)]
        timeline: TimelineObj,
    }

    let raw: Raw = serde_json::from_slice(body)?;
    Ok(extract_posts_from_timeline(
        raw.data.search_by_raw_query.search_timeline.timeline,
        "",
    ))
}

/// Extracts the created post's ID from a CreateTweet mutation response.
pub fn parse_create_post(body: &[u8]) -> Result<String> {
    #[derive(Deserialize, Default)]
    struct Raw {
        #[serde(default)]
        data: Data,
        #[serde(default)]
        errors: Vec<ApiMessage>,
    }
    #[derive(Deserialize, Default)]
    struct Data {
        #[serde(default)]
        create_tweet: CreateEnvelope,
    }
    #[derive(Deserialize, Default)]
    struct CreateEnvelope {
        #[serde(default)]
        tweet_results: TweetResults,
    }
    #[derive(Deserialize, Default)]
    struct TweetResults {
        #[serde(default)]
        result: CreateResult,
    }
    #[derive(Deserialize, Default)]
    struct CreateResult {
        #[serde(default)]
        rest_id: String,
    }

    let raw: Raw = serde_json::from_slice(body)?;
    if let Some(first) = raw.errors.first() {
        return Err(Error::Api(format!("CreateTweet error: {}", first.message)));
    }
    let post_id = raw.data.create_tweet.tweet_results.result.rest_id;
    if post_id.is_empty() {
        return Err(Error::Parse(format!(
            "CreateTweet returned empty post ID: {}",
            truncate_body(body, 300)
        )));
    }
    Ok(post_id)
}

// --- extraction helpers ---

fn extract_users_from_timeline(timeline: TimelineObj) -> (Vec<XUser>, String) {
    #[derive(Deserialize, Default)]
    struct Item {
        #[serde(default, rename = "__typename")]
        typename: String,
        #[serde(default)]
        user_results: UserResults,
    }
    #[derive(Deserialize, Default)]
    struct UserResults {
        #[serde(default)]
        result: UserResult,
    }

    let mut users = Vec::new();
    let mut next_cursor = String::new();

    for instruction in timeline.instructions {
        let mut entries = instruction.entries;
        if let Some(entry) = instruction.entry {
            entries.push(entry);
        }
        for entry in entries {
            if entry.content.entry_type == "TimelineTimelineCursor"
                || entry.content.typename == "TimelineTimelineCursor"
            {
                if entry.content.cursor_type == "Bottom"
                    || entry.entry_id.contains("cursor-bottom")
                {
                    next_cursor = entry.content.value.clone();
                }
                continue;
            }
            let Some(item_content) = entry.content.item_content else {
                continue;
            };
            let Ok(item) = serde_json::from_value::<Item>(item_content) else {
                continue;
            };
            if item.typename != "TimelineUser" {
                continue;
            }
            match parse_user_result(item.user_results.result) {
                Ok(user) => users.push(user),
                Err(e) => debug!(error = %e, "skipping unparsable user entry"),
            }
        }
    }
    (users, next_cursor)
}

fn extract_posts_from_timeline(timeline: TimelineObj, default_author_id: &str) -> Vec<Post> {
    #[derive(Deserialize, Default)]
    struct Item {
        #[serde(default, rename = "__typename")]
        typename: String,
        #[serde(default)]
        tweet_results: TweetResults,
    }
    #[derive(Deserialize, Default)]
    struct TweetResults {
        #[serde(default)]
        result: TweetResult,
    }

    let mut posts = Vec::new();
    for instruction in timeline.instructions {
        for entry in instruction.entries {
            let Some(item_content) = entry.content.item_content else {
                continue;
            };
            let Ok(item) = serde_json::from_value::<Item>(item_content) else {
                continue;
            };
            if item.typename != "TimelineTweet" {
                continue;
            }
            match parse_tweet_result(item.tweet_results.result, default_author_id) {
                Ok(post) => posts.push(post),
                Err(e) => debug!(error = %e, "skipping unparsable post entry"),
            }
        }
    }
    posts
}

fn parse_user_result(result: UserResult) -> Result<XUser> {
    if result.typename == "UserUnavailable" {
        return Err(Error::Parse("user unavailable (suspended or restricted)".into()));
    }
    if result.rest_id.is_empty() {
        return Err(Error::Parse(format!(
            "empty user rest_id (typename={})",
            result.typename
        )));
    }

    let bio = result.legacy.description.trim().to_string();
    Ok(XUser {
        id: result.rest_id,
        handle: result.legacy.screen_name,
        display_name: result.legacy.name,
        followers: result.legacy.followers_count,
        following: result.legacy.friends_count,
        post_count: result.legacy.statuses_count,
        listed_count: result.legacy.listed_count,
        created_at: parse_created_at(&result.legacy.created_at),
        is_verified: result.legacy.verified || result.is_blue_verified,
        has_avatar: !result.legacy.profile_image_url.is_empty()
            && !result.legacy.profile_image_url.contains("default_profile"),
        has_bio: !bio.is_empty(),
        bio,
    })
}

fn parse_tweet_result(result: TweetResult, default_author_id: &str) -> Result<Post> {
    if result.rest_id.is_empty() {
        return Err(Error::Parse("empty post rest_id".into()));
    }

    let author_id = if result.legacy.user_id_str.is_empty() {
        default_author_id.to_string()
    } else {
        result.legacy.user_id_str
    };

    let text = result.legacy.full_text;
    Ok(Post {
        id: result.rest_id,
        author_id,
        created_at: parse_created_at(&result.legacy.created_at),
        views: result.views.count.parse().unwrap_or(0),
        likes: result.legacy.favorite_count,
        reposts: result.legacy.retweet_count,
        quotes: result.legacy.quote_count,
        token_mentions: extract_token_mentions(&text),
        text,
    })
}

/// De-duplicated uppercase `$TICKER` mentions of length 2-10.
pub fn extract_token_mentions(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut seen = std::collections::HashSet::new();
    TOKEN_MENTION_RE
        .captures_iter(&upper)
        .filter_map(|c| {
            let ticker = c[1].to_string();
            seen.insert(ticker.clone()).then_some(ticker)
        })
        .collect()
}
