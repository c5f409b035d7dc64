//! Public query and mutation methods: thin wrappers that build GraphQL
//! URLs and hand off to the executor.

use std::sync::Arc;

use serde_json::json;

use crate::account::Account;
use crate::client::Client;
use crate::endpoints::{add_graphql_params, endpoint_url, gql_features, ENDPOINTS};
use crate::error::{Error, Result};
use crate::models::{Post, XUser};
use crate::parsers;

impl Client {
    /// Fetches a user profile by handle.
    pub async fn user_by_screen_name(&self, handle: &str) -> Result<XUser> {
        let variables = json!({
            "screen_name": handle,
            "withSafetyModeUserFields": true,
        });
        let url = endpoint_url(&self.cfg.graphql_base, "UserByScreenName")?;
        let url = add_graphql_params(&url, &variables, &gql_features(), None);

        let (body, _) = self.execute_read("UserByScreenName", &url).await?;
        parsers::parse_user_by_screen_name(&body)
    }

    /// Fetches followers for a user, paginating until `max_count`.
    pub async fn followers(&self, user_id: &str, max_count: usize) -> Result<Vec<XUser>> {
        self.fetch_user_list("Followers", user_id, max_count).await
    }

    /// Fetches accounts a user follows, paginating until `max_count`.
    pub async fn following(&self, user_id: &str, max_count: usize) -> Result<Vec<XUser>> {
        self.fetch_user_list("Following", user_id, max_count).await
    }

    /// Fetches users who reposted a post, paginating until `max_count`.
    pub async fn retweeters(&self, post_id: &str, max_count: usize) -> Result<Vec<XUser>> {
        let mut users = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut variables = json!({
                "tweetId": post_id,
                "count": (max_count - users.len()).min(20),
                "includePromotedContent": true,
            });
            if !cursor.is_empty() {
                variables["cursor"] = json!(cursor);
            }

            let url = endpoint_url(&self.cfg.graphql_base, "Retweeters")?;
            let url = add_graphql_params(&url, &variables, &gql_features(), None);
            let (body, _) = self.execute_read("Retweeters", &url).await?;

            let (batch, next_cursor) = parsers::parse_retweeter_list(&body)?;
            users.extend(batch);

            if next_cursor.is_empty() || users.len() >= max_count {
                break;
            }
            cursor = next_cursor;
        }
        Ok(users)
    }

    /// Fetches recent posts for a user.
    pub async fn user_posts(&self, user_id: &str, count: usize) -> Result<Vec<Post>> {
        let variables = json!({
            "userId": user_id,
            "count": count,
            "includePromotedContent": false,
            "withQuickPromoteEligibilityTweetFields": true,
            "withVoice": true,
            "withV2Timeline": true,
        });
        let url = endpoint_url(&self.cfg.graphql_base, "UserTweets")?;
        let url = add_graphql_params(&url, &variables, &gql_features(), None);

        let (body, _) = self.execute_read("UserTweets", &url).await?;
        parsers::parse_post_timeline(&body, user_id)
    }

    /// Searches latest posts matching a query.
    pub async fn search_posts(&self, query: &str, count: usize) -> Result<Vec<Post>> {
        let variables = json!({
            "rawQuery": query,
            "count": count,
            "querySource": "typed_query",
            "product": "Latest",
        });
        let field_toggles = json!({ "withArticleRichContentState": false });
        let url = endpoint_url(&self.cfg.graphql_base, "SearchTimeline")?;
        let url = add_graphql_params(&url, &variables, &gql_features(), Some(&field_toggles));

        let (body, _) = self.execute_read("SearchTimeline", &url).await?;
        parsers::parse_search_timeline(&body)
    }

    /// Publishes a post from the given account and returns the new post's
    /// ID. Bound to one account: mutations never rotate through the pool.
    pub async fn create_post(&self, account: &Arc<Account>, text: &str) -> Result<String> {
        let endpoint = ENDPOINTS
            .get("CreateTweet")
            .ok_or_else(|| Error::Config("unknown operation: CreateTweet".into()))?;
        let payload = json!({
            "variables": {
                "tweet_text": text,
                "dark_request": false,
                "media": { "media_entities": [], "possibly_sensitive": false },
                "semantic_annotation_ids": [],
            },
            "features": gql_features(),
            "queryId": endpoint.id,
        });
        let url = endpoint.url(&self.cfg.graphql_base);

        let body = self
            .execute_write(account, "CreateTweet", &url, payload.to_string())
            .await?;
        parsers::parse_create_post(&body)
    }

    async fn fetch_user_list(
        &self,
        operation: &str,
        user_id: &str,
        max_count: usize,
    ) -> Result<Vec<XUser>> {
        let mut users = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut variables = json!({
                "userId": user_id,
                "count": (max_count - users.len()).min(100),
                "includePromotedContent": false,
            });
            if !cursor.is_empty() {
                variables["cursor"] = json!(cursor);
            }

            let url = endpoint_url(&self.cfg.graphql_base, operation)?;
            let url = add_graphql_params(&url, &variables, &gql_features(), None);
            let (body, _) = self.execute_read(operation, &url).await?;

            let (batch, next_cursor) = parsers::parse_user_list(&body)?;
            users.extend(batch);

            if next_cursor.is_empty() || users.len() >= max_count {
                break;
            }
            cursor = next_cursor;
        }
        Ok(users)
    }
}
