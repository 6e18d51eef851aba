//! Twitter adapter: user timelines via the v2 API with an app bearer token.
//!
//! Sources are usernames without the leading `@`. The numeric user id needed by
//! the timeline endpoint is looked up once and cached for the process lifetime.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nab_core::{
    domain::{Platform, Post, PostId},
    errors::Error,
    provider::{FetchOrder, SourceProvider},
    Result,
};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::sync::Mutex;
use tracing::debug;

const API_BASE: &str = "https://api.twitter.com/2";

/// Bounds accepted by `max_results` on the timeline endpoint.
const MIN_RESULTS: usize = 5;
const MAX_RESULTS: usize = 100;

/// Twitter handles are 1 to 15 ASCII letters, digits or underscores.
const MAX_USERNAME_LEN: usize = 15;

#[derive(Debug)]
pub struct TwitterProvider {
    bearer_token: String,
    http: reqwest::Client,
    user_ids: Mutex<HashMap<String, String>>,
}

impl TwitterProvider {
    pub fn new(bearer_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("twitter http client: {e}")))?;
        Ok(Self {
            bearer_token: bearer_token.into(),
            http,
            user_ids: Mutex::new(HashMap::new()),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .http
            .get(format!("{API_BASE}/{path}"))
            .bearer_auth(&self.bearer_token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("twitter request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(match status.as_u16() {
                404 => Error::NotFound(format!("twitter {path}: {body}")),
                429 => Error::Provider(format!("twitter rate limited on {path}")),
                _ => Error::Provider(format!("twitter {path} failed: {status} {body}")),
            });
        }

        resp.json()
            .await
            .map_err(|e| Error::Provider(format!("twitter {path} json error: {e}")))
    }

    async fn lookup_user(&self, username: &str) -> Result<User> {
        let envelope: Envelope<User> = self
            .get(
                &format!("users/by/username/{username}"),
                &[("user.fields", "name".to_string())],
            )
            .await?;
        let user = envelope.into_data(username)?;
        if user.id.is_empty() || !user.id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Provider(format!(
                "twitter: unexpected user id {:?} for {username}",
                user.id
            )));
        }
        self.user_ids
            .lock()
            .await
            .insert(username.to_lowercase(), user.id.clone());
        Ok(user)
    }

    async fn user_id(&self, username: &str) -> Result<String> {
        if let Some(id) = self.user_ids.lock().await.get(&username.to_lowercase()) {
            return Ok(id.clone());
        }
        Ok(self.lookup_user(username).await?.id)
    }
}

#[async_trait]
impl SourceProvider for TwitterProvider {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn order(&self) -> FetchOrder {
        FetchOrder::NewestFirst
    }

    async fn resolve_display_name(&self, id: &str) -> Result<String> {
        let username = checked_username(id)?;
        Ok(self.lookup_user(&username).await?.name)
    }

    async fn fetch_recent(&self, id: &str, limit: usize) -> Result<Vec<Post>> {
        let username = checked_username(id)?;
        let user_id = self.user_id(&username).await?;
        let timeline: Timeline = self
            .get(
                &format!("users/{user_id}/tweets"),
                &[
                    ("max_results", limit.clamp(MIN_RESULTS, MAX_RESULTS).to_string()),
                    ("tweet.fields", "created_at".to_string()),
                    ("exclude", "retweets,replies".to_string()),
                ],
            )
            .await?;
        let posts = to_posts(&username, timeline, limit)?;
        debug!(source = %username, count = posts.len(), "twitter timeline fetched");
        Ok(posts)
    }
}

/// Normalized handle, or `NotFound` for anything that is not a valid one.
/// The handle ends up in the request path, so nothing else may pass.
fn checked_username(id: &str) -> Result<String> {
    let username = Platform::Twitter.normalize_id(id);
    let valid = (1..=MAX_USERNAME_LEN).contains(&username.len())
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(username)
    } else {
        Err(Error::NotFound(format!("Twitter user {id:?}")))
    }
}

/// v2 answers with `data` on success and `errors` (HTTP 200) for unknown users.
#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

impl<T> Envelope<T> {
    fn into_data(self, username: &str) -> Result<T> {
        match (self.data, self.errors.first()) {
            (Some(data), _) => Ok(data),
            (None, Some(err)) => Err(Error::NotFound(format!(
                "Twitter user {username}: {}",
                err.detail.as_deref().unwrap_or(&err.title)
            ))),
            (None, None) => Err(Error::NotFound(format!("Twitter user {username}"))),
        }
    }
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    title: String,
    detail: Option<String>,
}

#[derive(Deserialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct Timeline {
    /// Absent when the user has no matching tweets.
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Deserialize)]
struct Tweet {
    id: String,
    #[serde(default)]
    text: String,
    created_at: Option<String>,
}

fn to_posts(username: &str, timeline: Timeline, limit: usize) -> Result<Vec<Post>> {
    timeline
        .data
        .into_iter()
        .take(limit)
        .map(|t| {
            let id: u64 = t
                .id
                .parse()
                .map_err(|_| Error::Provider(format!("twitter: bad tweet id {:?}", t.id)))?;
            Ok(Post {
                id: PostId(id),
                link: format!("https://twitter.com/{username}/status/{id}"),
                text: t.text,
                published_at: t.created_at.as_deref().and_then(parse_timestamp),
                attachments: Vec::new(),
            })
        })
        .collect()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
