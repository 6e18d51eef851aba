//! Broadcast of new posts to every subscribed chat.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    domain::{AttachmentKind, ChatId, Platform, Post, Source},
    formatting::{escape_html, escape_within},
    messaging::port::MessagingPort,
};

/// Outcome of sending one message to a set of chats.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<ChatId>,
    pub failed: Vec<(ChatId, String)>,
}

/// Sends to many chats, one at a time. A failing chat is logged and skipped;
/// it never stops delivery to the others and is not retried.
#[derive(Clone)]
pub struct FanOut {
    messenger: Arc<dyn MessagingPort>,
}

impl FanOut {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    pub async fn broadcast(&self, targets: &[ChatId], html: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &chat_id in targets {
            match self.messenger.send_html(chat_id, html).await {
                Ok(_) => report.delivered.push(chat_id),
                Err(e) => {
                    warn!(chat_id = chat_id.0, error = %e, "delivery failed");
                    report.failed.push((chat_id, e.to_string()));
                }
            }
        }
        report
    }

    pub async fn deliver_post(
        &self,
        source: &Source,
        post: &Post,
        targets: &[ChatId],
    ) -> DeliveryReport {
        let limit = self.messenger.capabilities().max_message_len;
        let html = render_post(source, post, limit);
        let report = self.broadcast(targets, &html).await;
        debug!(
            platform = %source.platform,
            source = %source.id,
            post = %post.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "post broadcast"
        );
        report
    }
}

/// Longest display name shown in a notification header.
const MAX_NAME_BYTES: usize = 128;
/// Room kept for the "+N more" line while attachments are being fitted.
const MORE_LINE_RESERVE: usize = 24;

/// Telegram HTML notification for a post, at most `max_len` bytes.
///
/// The timestamp and post link are always kept. The display name is capped,
/// attachment links that do not fit are summarized as "+N more", and the body
/// gets whatever room is left.
pub fn render_post(source: &Source, post: &Post, max_len: usize) -> String {
    let name = escape_within(&source.display_name, MAX_NAME_BYTES.min(max_len / 4));
    let header = match source.platform {
        Platform::Vk => format!("📢 <b>New post from VK group '{name}'</b>"),
        Platform::Twitter => format!("🐦 <b>New tweet from {name}</b>"),
    };

    let mut tail = Vec::new();
    if let Some(ts) = post.published_at {
        tail.push(format!("🕒 {}", ts.format("%Y-%m-%d %H:%M UTC")));
    }
    tail.push(format!("🔗 {}", escape_html(&post.link)));
    let tail = tail.join("\n");

    // Two "\n\n" separators around the body.
    let mut room = max_len.saturating_sub(header.len() + tail.len() + 4);
    let mut footer = attachment_lines(post, &mut room);
    footer.push(tail);
    let footer = footer.join("\n");

    let body = escape_within(post.text.trim(), room);
    if body.is_empty() {
        format!("{header}\n\n{footer}")
    } else {
        format!("{header}\n\n{body}\n\n{footer}")
    }
}

/// Attachment links that fit in `room`, which is reduced by what they take.
fn attachment_lines(post: &Post, room: &mut usize) -> Vec<String> {
    let links: Vec<String> = post
        .attachments
        .iter()
        .map(|a| {
            let (icon, label) = match a.kind {
                AttachmentKind::Photo => ("🖼", "photo"),
                AttachmentKind::Video => ("🎬", "video"),
            };
            format!("{icon} <a href=\"{}\">{label}</a>", escape_html(&a.url))
        })
        .collect();

    let mut lines = Vec::new();
    for (i, line) in links.iter().enumerate() {
        let last = i + 1 == links.len();
        let reserve = if last { 0 } else { MORE_LINE_RESERVE };
        if line.len() + 1 + reserve > *room {
            let more = format!("📎 +{} more", links.len() - i);
            if more.len() + 1 <= *room {
                *room -= more.len() + 1;
                lines.push(more);
            }
            break;
        }
        *room -= line.len() + 1;
        lines.push(line.clone());
    }
    lines
}
