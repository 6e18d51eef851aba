use tracing::warn;

use nab_core::{
    domain::{ChatId, Platform, Post, Source},
    errors::Error,
    formatting::{escape_html, escape_within},
    Result,
};

use crate::router::AppState;

/// `show_posts:<platform>:<source id>`
pub(crate) const SHOW_POSTS_PREFIX: &str = "show_posts:";

pub(crate) fn parse_show_posts(data: &str) -> Option<(Platform, String)> {
    let rest = data.strip_prefix(SHOW_POSTS_PREFIX)?;
    let (platform, id) = rest.split_once(':')?;
    let platform = platform.parse::<Platform>().ok()?;
    if id.is_empty() {
        return None;
    }
    Some((platform, id.to_string()))
}

fn preview_header(source: &Source) -> String {
    let name = escape_html(&source.display_name);
    match source.platform {
        Platform::Vk => format!("📢 Latest posts from VK group '{name}':"),
        Platform::Twitter => format!("🐦 Latest tweets from {name}:"),
    }
}

fn preview_post(post: &Post, max_len: usize) -> String {
    let link = format!("\n\n🔗 {}", escape_html(&post.link));
    let text = escape_within(post.text.trim(), max_len.saturating_sub(link.len()));
    format!("{text}{link}")
}

async fn send_preview(
    state: &AppState,
    chat_id: ChatId,
    source: &Source,
    posts: &[Post],
) -> Result<()> {
    let limit = state.messenger.capabilities().max_message_len;
    state
        .messenger
        .send_html(chat_id, &preview_header(source))
        .await?;
    if posts.is_empty() {
        state.messenger.send_html(chat_id, "No posts yet.").await?;
    }
    for post in posts {
        state
            .messenger
            .send_html(chat_id, &preview_post(post, limit))
            .await?;
    }
    Ok(())
}

/// Show the latest posts of a watched source to the chat that pressed the
/// button. Cursors are left alone.
pub async fn handle_show_posts(
    state: &AppState,
    callback_id: &str,
    chat_id: ChatId,
    data: &str,
) -> Result<()> {
    let Some((platform, id)) = parse_show_posts(data) else {
        return state.messenger.answer_callback_query(callback_id, None).await;
    };

    match state
        .service
        .recent_posts(platform, &id, state.preview_limit)
        .await
    {
        Ok((source, posts)) => {
            let sent = send_preview(state, chat_id, &source, &posts).await;
            let answered = state.messenger.answer_callback_query(callback_id, None).await;
            sent.and(answered)
        }
        Err(Error::NotFound(_)) => {
            state
                .messenger
                .answer_callback_query(callback_id, Some("Source not found"))
                .await
        }
        Err(e) => {
            warn!(%platform, source = %id, error = %e, "show posts failed");
            state
                .messenger
                .answer_callback_query(callback_id, Some("Could not fetch posts, try again later"))
                .await
        }
    }
}
