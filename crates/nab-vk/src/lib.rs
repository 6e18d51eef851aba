//! VK adapter: community walls via the VK API (`groups.getById`, `wall.get`).
//!
//! Sources are communities, identified either by numeric id or by short name
//! (`screen_name`). Requests use a service access token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nab_core::{
    domain::{Attachment, AttachmentKind, Platform, Post, PostId},
    errors::Error,
    provider::{FetchOrder, SourceProvider},
    Result,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const API_BASE: &str = "https://api.vk.com/method";

/// VK error codes meaning "this community does not exist or is not readable".
const NOT_FOUND_CODES: [i64; 5] = [15, 18, 30, 100, 113];

#[derive(Clone, Debug)]
pub struct VkProvider {
    access_token: String,
    api_version: String,
    http: reqwest::Client,
}

impl VkProvider {
    pub fn new(
        access_token: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("vk http client: {e}")))?;
        Ok(Self {
            access_token: access_token.into(),
            api_version: api_version.into(),
            http,
        })
    }

    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{API_BASE}/{method}"))
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("v", self.api_version.as_str()),
            ])
            .query(params)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("vk {method} request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "vk {method} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("vk {method} json error: {e}")))?;
        unwrap_response(method, v)
    }
}

#[async_trait]
impl SourceProvider for VkProvider {
    fn platform(&self) -> Platform {
        Platform::Vk
    }

    fn order(&self) -> FetchOrder {
        FetchOrder::NewestFirst
    }

    async fn resolve_display_name(&self, id: &str) -> Result<String> {
        let response = self
            .call("groups.getById", &[("group_id", id.to_string())])
            .await?;
        parse_group_name(id, response)
    }

    async fn fetch_recent(&self, id: &str, limit: usize) -> Result<Vec<Post>> {
        let owner = wall_owner_param(id);
        let response = self
            .call(
                "wall.get",
                &[
                    owner,
                    ("count", limit.to_string()),
                    ("filter", "owner".to_string()),
                ],
            )
            .await?;
        let posts = parse_wall(response)?;
        debug!(source = %id, count = posts.len(), "vk wall fetched");
        Ok(posts)
    }
}

/// `owner_id=-<id>` for numeric community ids, `domain=<name>` otherwise.
fn wall_owner_param(id: &str) -> (&'static str, String) {
    let id = id.trim_start_matches('-');
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        ("owner_id", format!("-{id}"))
    } else {
        ("domain", id.to_string())
    }
}

/// Split a VK envelope into its `response` or a mapped `error`.
fn unwrap_response(method: &str, mut v: Value) -> Result<Value> {
    if let Some(err) = v.get("error") {
        let code = err.get("error_code").and_then(Value::as_i64).unwrap_or(0);
        let msg = err
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(if NOT_FOUND_CODES.contains(&code) {
            Error::NotFound(format!("vk {method}: {msg} ({code})"))
        } else {
            Error::Provider(format!("vk {method}: {msg} ({code})"))
        });
    }
    v.get_mut("response")
        .map(Value::take)
        .ok_or_else(|| Error::Provider(format!("vk {method}: response field missing")))
}

#[derive(Deserialize)]
struct Group {
    #[serde(default)]
    name: String,
    #[serde(default)]
    deactivated: Option<String>,
}

/// `groups.getById` answers `{"groups": [...]}` since API 5.139 and a bare
/// array before that.
fn parse_group_name(id: &str, response: Value) -> Result<String> {
    let groups = match response {
        Value::Object(mut map) => map.remove("groups").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    let groups: Vec<Group> = serde_json::from_value(groups)
        .map_err(|e| Error::Provider(format!("vk groups.getById parse error: {e}")))?;

    match groups.into_iter().next() {
        Some(g) if g.deactivated.is_none() && !g.name.is_empty() => Ok(g.name),
        _ => Err(Error::NotFound(format!("VK group {id}"))),
    }
}

#[derive(Deserialize)]
struct Wall {
    #[serde(default)]
    items: Vec<WallItem>,
}

#[derive(Deserialize)]
struct WallItem {
    id: u64,
    owner_id: i64,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    text: String,
    #[serde(default, deserialize_with = "flag")]
    is_pinned: bool,
    #[serde(default, deserialize_with = "flag")]
    marked_as_ads: bool,
    #[serde(default)]
    attachments: Vec<WallAttachment>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WallAttachment {
    Photo { photo: Photo },
    Video { video: Video },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Photo {
    #[serde(default)]
    sizes: Vec<PhotoSize>,
}

#[derive(Deserialize)]
struct PhotoSize {
    url: String,
    #[serde(default)]
    width: u64,
    #[serde(default)]
    height: u64,
}

#[derive(Deserialize)]
struct Video {
    owner_id: i64,
    id: i64,
}

/// VK encodes flags as `0`/`1`, occasionally as booleans.
fn flag<'de, D>(d: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    })
}

fn parse_wall(response: Value) -> Result<Vec<Post>> {
    let wall: Wall = serde_json::from_value(response)
        .map_err(|e| Error::Provider(format!("vk wall.get parse error: {e}")))?;

    Ok(wall
        .items
        .into_iter()
        .filter(|item| !item.is_pinned && !item.marked_as_ads)
        .map(to_post)
        .collect())
}

fn to_post(item: WallItem) -> Post {
    let attachments = item
        .attachments
        .into_iter()
        .filter_map(|a| match a {
            WallAttachment::Photo { photo } => photo
                .sizes
                .into_iter()
                .max_by_key(|s| s.width * s.height)
                .map(|s| Attachment {
                    kind: AttachmentKind::Photo,
                    url: s.url,
                }),
            WallAttachment::Video { video } => Some(Attachment {
                kind: AttachmentKind::Video,
                url: format!("https://vk.com/video{}_{}", video.owner_id, video.id),
            }),
            WallAttachment::Other => None,
        })
        .collect();

    Post {
        id: PostId(item.id),
        link: format!("https://vk.com/wall{}_{}", item.owner_id, item.id),
        text: item.text,
        published_at: DateTime::<Utc>::from_timestamp(item.date, 0).filter(|_| item.date > 0),
        attachments,
    }
}
