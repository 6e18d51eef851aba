//! Outbound rate limiting for broadcasts.
//!
//! A new post goes to every subscribed chat back to back, which is exactly the
//! burst Telegram answers with 429s. Sends are spaced globally and per chat.
//! Only chats with a slot still in the future are remembered, so the table
//! never grows past the chats messaged within the last per-chat interval.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between messages to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

/// Next free send slot, globally and for chats that sent recently.
#[derive(Debug)]
struct Slots {
    global_next: Instant,
    chat_next: HashMap<ChatId, Instant>,
}

impl Slots {
    fn new() -> Self {
        Self {
            global_next: Instant::now(),
            chat_next: HashMap::new(),
        }
    }

    /// Book a slot and return how long the caller has to wait for it.
    fn reserve(&mut self, cfg: &ThrottleConfig, chat: Option<ChatId>) -> Duration {
        let now = Instant::now();
        self.chat_next.retain(|_, next| *next > now);

        let global_start = self.global_next.max(now);
        self.global_next = global_start + cfg.global_min_interval;

        let start = match chat {
            Some(chat) => {
                let chat_start = self.chat_next.get(&chat).map_or(now, |next| (*next).max(now));
                self.chat_next
                    .insert(chat, chat_start + cfg.per_chat_min_interval);
                global_start.max(chat_start)
            }
            None => global_start,
        };
        start.saturating_duration_since(now)
    }
}

/// `MessagingPort` decorator that spaces outbound calls.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    slots: Mutex<Slots>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            slots: Mutex::new(Slots::new()),
        }
    }

    async fn wait_turn(&self, chat: Option<ChatId>) {
        let wait = self.slots.lock().await.reserve(&self.cfg, chat);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn tracked_chats(&self) -> usize {
        self.slots.lock().await.chat_next.len()
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id)).await;
        self.inner
            .send_inline_keyboard(chat_id, text, keyboard)
            .await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Not a chat message; global spacing only.
        self.wait_turn(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
