//! In-memory ports for handler tests.

use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use async_trait::async_trait;
use tempfile::TempDir;

use nab_core::{
    domain::{ChatId, MessageId, MessageRef, Platform, Post, PostId},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    provider::{FetchOrder, ProviderRegistry, SourceProvider},
    store::SubscriptionStore,
    subscriptions::Subscriptions,
    Result,
};

use crate::router::AppState;

pub struct RecordingMessenger {
    sends: Mutex<Vec<(ChatId, String)>>,
    keyboards: Mutex<Vec<(ChatId, String, InlineKeyboard)>>,
    answered: Mutex<Vec<(String, Option<String>)>>,
    fail_sends: bool,
    inline_keyboards: bool,
}

impl RecordingMessenger {
    /// Every `send_html` fails; callback answers still succeed.
    pub fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::new()
        }
    }

    /// A sink that cannot attach buttons.
    pub fn without_keyboards() -> Self {
        Self {
            inline_keyboards: false,
            ..Self::new()
        }
    }

    pub fn new() -> Self {
        Self {
            sends: Mutex::default(),
            keyboards: Mutex::default(),
            answered: Mutex::default(),
            fail_sends: false,
            inline_keyboards: true,
        }
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == chat_id)
            .map(|(_, t)| t)
            .collect()
    }

    pub fn keyboards(&self) -> Vec<(ChatId, String, InlineKeyboard)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<(String, Option<String>)> {
        self.answered.lock().unwrap().clone()
    }
}

impl Default for RecordingMessenger {
    fn default() -> Self {
        Self::new()
    }
}

fn msg_ref(chat_id: ChatId) -> MessageRef {
    MessageRef {
        chat_id,
        message_id: MessageId(1),
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_inline_keyboards: self.inline_keyboards,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        if self.fail_sends {
            return Err(Error::Delivery(format!("chat {} unreachable", chat_id.0)));
        }
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(msg_ref(chat_id))
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.keyboards
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), keyboard));
        Ok(msg_ref(chat_id))
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answered
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

/// Provider with fixed names and one newest-first batch shared by all ids.
pub struct StaticProvider {
    platform: Platform,
    names: HashMap<String, String>,
    posts: Vec<u64>,
}

impl StaticProvider {
    pub fn empty(platform: Platform) -> Self {
        Self {
            platform,
            names: HashMap::new(),
            posts: Vec::new(),
        }
    }

    pub fn named(mut self, id: &str, name: &str) -> Self {
        self.names.insert(id.to_string(), name.to_string());
        self
    }

    pub fn with_posts(mut self, ids: &[u64]) -> Self {
        self.posts = ids.to_vec();
        self
    }
}

#[async_trait]
impl SourceProvider for StaticProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn order(&self) -> FetchOrder {
        FetchOrder::NewestFirst
    }

    async fn resolve_display_name(&self, id: &str) -> Result<String> {
        self.names
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn fetch_recent(&self, _id: &str, limit: usize) -> Result<Vec<Post>> {
        Ok(self
            .posts
            .iter()
            .take(limit)
            .map(|&id| Post {
                id: PostId(id),
                text: format!("post {id}"),
                link: format!("https://example.com/p/{id}"),
                published_at: None,
                attachments: Vec::new(),
            })
            .collect())
    }
}

pub fn state_with(provider: StaticProvider) -> (TempDir, AppState, Arc<RecordingMessenger>) {
    state_with_messenger(provider, RecordingMessenger::new())
}

pub fn state_with_messenger(
    provider: StaticProvider,
    messenger: RecordingMessenger,
) -> (TempDir, AppState, Arc<RecordingMessenger>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SubscriptionStore::open(dir.path().join("sources.json")));
    let providers = ProviderRegistry::new().with(Arc::new(provider));
    let messenger = Arc::new(messenger);
    let state = AppState {
        service: Subscriptions::new(store, providers, Duration::from_secs(30)),
        messenger: messenger.clone(),
        preview_limit: 5,
        bot_username: None,
    };
    (dir, state, messenger)
}
