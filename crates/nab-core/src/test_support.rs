//! Fake ports shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, Platform, Post, PostId},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    provider::{FetchOrder, SourceProvider},
    Result,
};

pub fn post(id: u64) -> Post {
    Post {
        id: PostId(id),
        text: format!("post {id}"),
        link: format!("https://example.com/p/{id}"),
        published_at: None,
        attachments: Vec::new(),
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    failing: Mutex<HashSet<ChatId>>,
    attempts: Mutex<Vec<ChatId>>,
    sends: Mutex<Vec<(ChatId, String)>>,
    keyboards: Mutex<Vec<(ChatId, String, InlineKeyboard)>>,
    answered: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeMessenger {
    pub fn failing_for(chats: &[ChatId]) -> Self {
        let fake = Self::default();
        fake.failing.lock().unwrap().extend(chats.iter().copied());
        fake
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == chat_id)
            .map(|(_, html)| html)
            .collect()
    }

    /// Every send attempt, failed ones included.
    pub fn attempts_for(&self, chat_id: ChatId) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == chat_id)
            .count()
    }

    pub fn keyboards(&self) -> Vec<(ChatId, String, InlineKeyboard)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<(String, Option<String>)> {
        self.answered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.attempts.lock().unwrap().push(chat_id);
        if self.failing.lock().unwrap().contains(&chat_id) {
            return Err(Error::Delivery(format!("bot was blocked by chat {chat_id}")));
        }
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
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
        Ok(self.alloc(chat_id))
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answered
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

#[derive(Clone)]
enum Scripted {
    Posts(Vec<Post>),
    Fail,
    Hang,
    Panic,
}

/// Provider with scripted per-source answers. Unknown sources return no posts.
pub struct FakeProvider {
    platform: Platform,
    names: Mutex<HashMap<String, String>>,
    responses: Mutex<HashMap<String, Scripted>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            names: Mutex::new(HashMap::new()),
            responses: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(self, id: &str, name: &str) -> Self {
        self.names
            .lock()
            .unwrap()
            .insert(id.to_string(), name.to_string());
        self
    }

    /// Next fetches of `id` return these ids, newest first.
    pub fn set_posts(&self, id: &str, ids: &[u64]) {
        let mut posts: Vec<Post> = ids.iter().copied().map(post).collect();
        posts.sort_by(|a, b| b.id.cmp(&a.id));
        self.script(id, Scripted::Posts(posts));
    }

    pub fn fail(&self, id: &str) {
        self.script(id, Scripted::Fail);
    }

    pub fn hang(&self, id: &str) {
        self.script(id, Scripted::Hang);
    }

    pub fn panic_on(&self, id: &str) {
        self.script(id, Scripted::Panic);
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn script(&self, id: &str, s: Scripted) {
        self.responses.lock().unwrap().insert(id.to_string(), s);
    }
}

#[async_trait]
impl SourceProvider for FakeProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn order(&self) -> FetchOrder {
        FetchOrder::NewestFirst
    }

    async fn resolve_display_name(&self, id: &str) -> Result<String> {
        self.names
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} source {id}", self.platform)))
    }

    async fn fetch_recent(&self, id: &str, limit: usize) -> Result<Vec<Post>> {
        self.fetches.lock().unwrap().push(id.to_string());
        let scripted = self.responses.lock().unwrap().get(id).cloned();
        match scripted {
            None => Ok(Vec::new()),
            Some(Scripted::Posts(mut posts)) => {
                posts.truncate(limit);
                Ok(posts)
            }
            Some(Scripted::Fail) => Err(Error::Provider(format!("rate limited on {id}"))),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(Vec::new())
            }
            Some(Scripted::Panic) => panic!("provider exploded on {id}"),
        }
    }
}
