use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Telegram chat id (numeric). Doubles as the notification target id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Platform-native post id. Ids grow monotonically per source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Social platform a source lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Vk,
    Twitter,
}

impl Platform {
    /// Listing / polling order.
    pub const ALL: [Platform; 2] = [Platform::Vk, Platform::Twitter];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Vk => "vk",
            Platform::Twitter => "twitter",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Platform::Vk => "VK",
            Platform::Twitter => "Twitter",
        }
    }

    /// Canonical form of a user-supplied source id.
    pub fn normalize_id(self, raw: &str) -> String {
        let id = raw.trim();
        match self {
            Platform::Vk => id.to_string(),
            Platform::Twitter => id.trim_start_matches('@').to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vk" => Ok(Platform::Vk),
            "twitter" | "x" => Ok(Platform::Twitter),
            other => Err(Error::NotFound(format!("unknown platform: {other}"))),
        }
    }
}

/// A watched account / group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub platform: Platform,
    pub id: String,
    pub display_name: String,
    pub cursor: Option<PostId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
}

/// A post normalized across platforms. Lives for one poll cycle only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}
