//! Telegram update handlers.
//!
//! Each endpoint unwraps the teloxide update and hands plain values to the
//! command / callback logic, which only talks to `MessagingPort` and
//! `Subscriptions`.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::warn;

use nab_core::domain::ChatId;

use crate::router::AppState;

mod callback;
mod commands;
#[cfg(test)]
mod testing;

pub use callback::handle_show_posts;
pub use commands::handle_command;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = q.message.as_ref().map(|m| ChatId(m.chat.id.0));
    let data = q.data.clone().unwrap_or_default();

    let result = match chat_id {
        Some(chat_id) if !data.is_empty() => {
            handle_show_posts(&state, &q.id, chat_id, &data).await
        }
        _ => state.messenger.answer_callback_query(&q.id, None).await,
    };
    if let Err(e) = result {
        warn!(callback = %data, error = %e, "callback handling failed");
    }
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    let chat_id = ChatId(msg.chat.id.0);
    if let Err(e) = handle_command(&state, chat_id, text).await {
        warn!(chat_id = chat_id.0, error = %e, "command handling failed");
    }
    Ok(())
}
