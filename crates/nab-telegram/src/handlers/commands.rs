use tracing::{debug, warn};

use nab_core::{
    domain::{ChatId, Platform, Source},
    errors::Error,
    formatting::{escape_html, preview},
    messaging::types::{InlineButton, InlineKeyboard},
    subscriptions::AddOutcome,
    Result,
};

use crate::router::AppState;

use super::callback::SHOW_POSTS_PREFIX;

/// A parsed `/cmd@botname args` message.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ParsedCommand {
    pub name: String,
    /// Bot the command was addressed to, without the `@`.
    pub addressee: Option<String>,
    pub rest: String,
}

impl ParsedCommand {
    /// Commands mentioning another bot belong to that bot. Without a known
    /// username every command is accepted.
    pub fn is_for(&self, bot_username: Option<&str>) -> bool {
        match (&self.addressee, bot_username) {
            (Some(to), Some(me)) => to.eq_ignore_ascii_case(me),
            _ => true,
        }
    }
}

pub(crate) fn parse_command(text: &str) -> ParsedCommand {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let (name, addressee) = match first.trim_start_matches('/').split_once('@') {
        Some((name, to)) => (name, Some(to.to_string())),
        None => (first.trim_start_matches('/'), None),
    };

    ParsedCommand {
        name: name.to_lowercase(),
        addressee,
        rest,
    }
}

/// First whitespace-separated argument, if any.
fn first_arg(rest: &str) -> Option<&str> {
    rest.split_whitespace().next()
}

const COMMANDS_HELP: &str = "/add_vk_source &lt;group_id&gt; - watch a VK group\n\
/add_twitter_source &lt;username&gt; - watch a Twitter account\n\
/list_sources - show all watched sources\n\
/remove_source &lt;source_id&gt; - stop watching a source (vk:&lt;id&gt; or twitter:&lt;id&gt; for one platform)\n\
/stop - unsubscribe this chat from notifications";

pub(crate) fn start_text() -> String {
    format!(
        "👋 Hi! I collect news from VK and Twitter and post it here.\n\n\
         This chat is now subscribed.\n\n\
         <b>Commands</b>\n/help - show help\n{COMMANDS_HELP}"
    )
}

pub(crate) fn help_text() -> String {
    format!(
        "📚 <b>Commands</b>\n\n{COMMANDS_HELP}\n\n\
         Examples:\n/add_vk_source 123456\n/add_twitter_source rustlang"
    )
}

pub(crate) fn show_posts_button(source: &Source) -> InlineButton {
    InlineButton {
        label: format!("📝 {}", preview(&source.display_name, 40)),
        callback_data: format!("{SHOW_POSTS_PREFIX}{}:{}", source.platform, source.id),
    }
}

fn source_line(source: &Source) -> String {
    let name = escape_html(&source.display_name);
    let id = escape_html(&source.id);
    match source.platform {
        Platform::Vk => format!("- {name} (ID: {id})"),
        Platform::Twitter => format!("- {name} (@{id})"),
    }
}

fn platform_heading(platform: Platform) -> &'static str {
    match platform {
        Platform::Vk => "<b>VK groups</b>",
        Platform::Twitter => "<b>Twitter accounts</b>",
    }
}

/// One source listing, split into messages that fit `limit`. Each message
/// carries buttons for the sources it lists.
pub(crate) fn source_list_messages(
    sources: &[(Platform, Vec<Source>)],
    limit: usize,
) -> Vec<(String, InlineKeyboard)> {
    let mut lines: Vec<(String, Option<InlineButton>)> =
        vec![("📝 <b>Watched sources</b>".to_string(), None)];
    for (platform, list) in sources.iter().filter(|(_, l)| !l.is_empty()) {
        lines.push((String::new(), None));
        lines.push((platform_heading(*platform).to_string(), None));
        for source in list {
            lines.push((source_line(source), Some(show_posts_button(source))));
        }
    }

    let mut out = Vec::new();
    let mut text = String::new();
    let mut buttons = Vec::new();
    for (line, button) in lines {
        if !text.is_empty() && text.len() + 1 + line.len() > limit {
            out.push((
                std::mem::take(&mut text),
                InlineKeyboard::new(std::mem::take(&mut buttons)),
            ));
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&line);
        buttons.extend(button);
    }
    if !text.trim().is_empty() {
        out.push((text, InlineKeyboard::new(buttons)));
    }
    out
}

async fn reply(state: &AppState, chat_id: ChatId, html: &str) -> Result<()> {
    state.messenger.send_html(chat_id, html).await.map(|_| ())
}

/// Send with buttons when the messenger can attach them, as plain text otherwise.
async fn reply_with_keyboard(
    state: &AppState,
    chat_id: ChatId,
    html: &str,
    keyboard: InlineKeyboard,
) -> Result<()> {
    if keyboard.is_empty() || !state.messenger.capabilities().supports_inline_keyboards {
        return reply(state, chat_id, html).await;
    }
    state
        .messenger
        .send_inline_keyboard(chat_id, html, keyboard)
        .await
        .map(|_| ())
}

async fn add_source(state: &AppState, chat_id: ChatId, platform: Platform, rest: &str) -> Result<()> {
    let (what, usage) = match platform {
        Platform::Vk => ("VK group", "/add_vk_source 123456"),
        Platform::Twitter => ("Twitter account", "/add_twitter_source rustlang"),
    };
    let Some(arg) = first_arg(rest) else {
        return reply(state, chat_id, &format!("❌ Specify the {what}. Example: {usage}")).await;
    };

    match state.service.add_source(platform, arg).await {
        Ok(AddOutcome::Added { id, name }) => {
            let source = Source {
                platform,
                id,
                display_name: name,
                cursor: None,
            };
            let text = format!(
                "✅ {what} '{}' added!",
                escape_html(&source.display_name)
            );
            let keyboard = InlineKeyboard::new(vec![show_posts_button(&source)]);
            reply_with_keyboard(state, chat_id, &text, keyboard).await
        }
        Ok(AddOutcome::AlreadyWatched { .. }) => {
            reply(state, chat_id, &format!("❌ This {what} is already added.")).await
        }
        Err(Error::NotFound(_)) => {
            reply(state, chat_id, &format!("❌ Could not find the {what}. Check the id.")).await
        }
        Err(e) => {
            warn!(%platform, source = %arg, error = %e, "failed to add source");
            reply(
                state,
                chat_id,
                &format!("❌ Failed to add the {what}. Try again later."),
            )
            .await
        }
    }
}

async fn list_sources(state: &AppState, chat_id: ChatId) -> Result<()> {
    let sources: Vec<(Platform, Vec<Source>)> = state.service.list_sources().into_iter().collect();
    if sources.iter().all(|(_, l)| l.is_empty()) {
        return reply(state, chat_id, "📝 The source list is empty.").await;
    }

    let limit = state.messenger.capabilities().max_message_len;
    for (text, keyboard) in source_list_messages(&sources, limit) {
        reply_with_keyboard(state, chat_id, &text, keyboard).await?;
    }
    Ok(())
}

async fn remove_source(state: &AppState, chat_id: ChatId, rest: &str) -> Result<()> {
    let Some(arg) = first_arg(rest) else {
        return reply(
            state,
            chat_id,
            "❌ Specify the source id. Example: /remove_source 123456",
        )
        .await;
    };

    let removed = state.service.remove_source(arg);
    if removed.is_empty() {
        return reply(state, chat_id, "❌ Source not found.").await;
    }
    let from: Vec<&str> = removed.iter().map(|p| p.label()).collect();
    reply(
        state,
        chat_id,
        &format!("✅ Source removed from {}.", from.join(" and ")),
    )
    .await
}

pub async fn handle_command(state: &AppState, chat_id: ChatId, text: &str) -> Result<()> {
    let command = parse_command(text);
    if !command.is_for(state.bot_username.as_deref()) {
        debug!(chat_id = chat_id.0, command = %command.name, "command addressed to another bot");
        return Ok(());
    }
    let rest = command.rest.as_str();

    match command.name.as_str() {
        "start" => {
            state.service.subscribe(chat_id);
            reply(state, chat_id, &start_text()).await
        }
        "help" => reply(state, chat_id, &help_text()).await,
        "stop" => {
            state.service.unsubscribe(chat_id);
            reply(
                state,
                chat_id,
                "You have unsubscribed from notifications. Send /start to receive news again.",
            )
            .await
        }
        "add_vk_source" => add_source(state, chat_id, Platform::Vk, rest).await,
        "add_twitter_source" => add_source(state, chat_id, Platform::Twitter, rest).await,
        "list_sources" => list_sources(state, chat_id).await,
        "remove_source" => remove_source(state, chat_id, rest).await,
        _ => {
            reply(
                state,
                chat_id,
                "Unknown command. Send /help for the list of commands.",
            )
            .await
        }
    }
}
