pub mod telegram;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::{ChatId, MessageId, Update, UserId};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Reply;

/// Who the bot is, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    /// Username without the leading `@`.
    pub username: Option<String>,
}

/// What a message entity refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    /// `@username` mention. Telegram attaches no account to these.
    Mention { username: String },
    /// Mention of a user without a username; carries the account.
    TextMention { user: UserId, is_bot: bool },
    BotCommand,
    Other,
}

/// A typed span of [`IncomingMessage::text`]. Offsets are UTF-8 byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl Entity {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// Content of the message being replied to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quoted {
    pub text: Option<String>,
    pub photo: Option<String>,
}

/// A message received from the platform, stripped to what the bot needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: u32,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: UserId,
    /// Message text, or the caption of a photo.
    pub text: String,
    pub entities: Vec<Entity>,
    /// File id of the largest attached photo size.
    pub photo: Option<String>,
    pub reply: Option<Quoted>,
}

impl IncomingMessage {
    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}

/// Result of normalizing a raw update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Message(IncomingMessage),
    /// Not a message update, or nothing the bot could act on.
    Ignored,
}

/// Where a reply goes: the chat, threaded under the triggering message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("platform API error: {0}")]
    Api(String),
    #[error("{0}")]
    Other(String),
}

/// Messaging platform capability: identity, delivery and long-poll intake.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_self(&self) -> Result<BotIdentity, TransportError>;

    async fn send_reply(&self, target: ReplyTarget, reply: &Reply) -> Result<(), TransportError>;

    /// Fetch the next batch of updates starting at `offset`, waiting at most
    /// `timeout`. Returns an empty batch as soon as `cancel` fires.
    async fn poll(
        &self,
        offset: Option<i32>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Update>, TransportError>;
}
