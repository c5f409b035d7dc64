use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A GraphQL operation: its current operation ID and name.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub id: &'static str,
    pub name: &'static str,
}

impl Endpoint {
    pub fn url(&self, graphql_base: &str) -> String {
        format!("{}/{}/{}", graphql_base, self.id, self.name)
    }
}

/// Operation names mapped to their current GraphQL IDs.
pub static ENDPOINTS: LazyLock<HashMap<&'static str, Endpoint>> = LazyLock::new(|| {
    HashMap::from([
        ("UserByScreenName", Endpoint { id: "1VOOyvKkiI3FMmkeDNxM9A", name: "UserByScreenName" }),
        ("UserByRestId", Endpoint { id: "WJ7rCtezBVT6nk6VM5R8Bw", name: "UserByRestId" }),
        ("Followers", Endpoint { id: "Elc_-qTARceHpztqhI9PQA", name: "Followers" }),
        ("Following", Endpoint { id: "C1qZ6bs-L3oc_TKSZyxkXQ", name: "Following" }),
        ("UserTweets", Endpoint { id: "HeWHY26ItCfUmm1e6ITjeA", name: "UserTweets" }),
        ("SearchTimeline", Endpoint { id: "AIdc203rPpK_k_2KWSdm7g", name: "SearchTimeline" }),
        ("TweetDetail", Endpoint { id: "_8aYOgEDz35BrBcBal1-_w", name: "TweetDetail" }),
        ("Retweeters", Endpoint { id: "i-CI8t2pJD15euZJErEDrg", name: "Retweeters" }),
        ("CreateTweet", Endpoint { id: "znq7jUAqRjmPj7IszLem5Q", name: "CreateTweet" }),
    ])
});

/// Full URL for a named operation, or an error if unknown.
pub fn endpoint_url(graphql_base: &str, operation: &str) -> Result<String> {
    ENDPOINTS
        .get(operation)
        .map(|e| e.url(graphql_base))
        .ok_or_else(|| Error::Config(format!("unknown operation: {operation}")))
}

/// Operations that need a real authenticated account; everything else may
/// fall back to a guest token.
pub fn requires_auth(operation: &str) -> bool {
    matches!(
        operation,
        "Following" | "Followers" | "Retweeters" | "CreateTweet"
    )
}

/// The canonical GraphQL feature flags the web app sends with every query.
pub fn gql_features() -> Value {
    json!({
        "articles_preview_enabled": false,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "communities_web_enable_tweet_community_results_fetch": true,
        "creator_subscriptions_quote_tweet_preview_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "premium_content_api_read_enabled": false,
        "profile_label_improvements_pcf_label_in_post_enabled": false,
        "responsive_web_edit_tweet_api_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_grok_analyze_button_fetch_trends_enabled": false,
        "responsive_web_grok_analyze_post_followups_enabled": false,
        "responsive_web_grok_image_annotation_enabled": false,
        "responsive_web_grok_share_attachment_enabled": false,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "rweb_tipjar_consumption_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_awards_web_tipping_enabled": false,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "tweet_with_visibility_results_prefer_gql_media_interstitial_enabled": false,
        "tweetypie_unmention_optimization_enabled": true,
        "verified_phone_label_enabled": false,
        "view_counts_everywhere_api_enabled": true,
    })
}

/// Appends `variables`, `features`, and optionally `fieldToggles` query
/// parameters, percent-encoded with the service's minimal escape set.
pub fn add_graphql_params(
    url: &str,
    variables: &Value,
    features: &Value,
    field_toggles: Option<&Value>,
) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    let mut result = format!(
        "{url}{sep}variables={}&features={}",
        json_escape(&variables.to_string()),
        json_escape(&features.to_string()),
    );
    if let Some(toggles) = field_toggles {
        result.push_str("&fieldToggles=");
        result.push_str(&json_escape(&toggles.to_string()));
    }
    result
}

/// Minimal percent-escape set the service expects in query-param JSON.
/// All other characters pass through untouched.
fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            ' ' => out.push_str("%20"),
            '"' => out.push_str("%22"),
            '{' => out.push_str("%7B"),
            '}' => out.push_str("%7D"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            ':' => out.push_str("%3A"),
            ',' => out.push_str("%2C"),
            '\'' => out.push_str("%27"),
            '|' => out.push_str("%7C"),
            _ => out.push(ch),
        }
    }
    out
}
