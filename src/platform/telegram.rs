use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, FileId, InputFile, MessageEntityKind, MessageEntityRef, PhotoSize,
    ReplyParameters, UpdateKind,
};
use teloxide::RequestError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatcher::Reply;
use crate::platform::{
    BotIdentity, Entity, EntityKind, IncomingMessage, Normalized, Quoted, ReplyTarget, Transport,
    TransportError,
};

/// Turn a raw Telegram update into the message the bot works with.
pub fn normalize(update: &Update) -> Normalized {
    let msg = match &update.kind {
        UpdateKind::Message(msg) => msg,
        _ => return Normalized::Ignored,
    };

    let sender = match msg.from.as_ref() {
        Some(user) => user.id,
        None => return Normalized::Ignored,
    };

    // Photos carry their text (and its entities) in the caption.
    let (text, entities) = if let Some(text) = msg.text() {
        (text, msg.parse_entities())
    } else if let Some(caption) = msg.caption() {
        (caption, msg.parse_caption_entities())
    } else {
        return Normalized::Ignored;
    };

    let entities = entities
        .unwrap_or_default()
        .iter()
        .map(entity_from_ref)
        .collect();

    let reply = msg.reply_to_message().map(|quoted| Quoted {
        text: quoted.text().or_else(|| quoted.caption()).map(str::to_string),
        photo: quoted.photo().and_then(largest_photo),
    });

    Normalized::Message(IncomingMessage {
        update_id: update.id.0,
        chat_id: msg.chat.id,
        message_id: msg.id,
        sender,
        text: text.to_string(),
        entities,
        photo: msg.photo().and_then(largest_photo),
        reply,
    })
}

fn entity_from_ref(entity: &MessageEntityRef<'_>) -> Entity {
    let kind = match entity.kind() {
        MessageEntityKind::Mention => EntityKind::Mention {
            username: entity.text().trim_start_matches('@').to_string(),
        },
        MessageEntityKind::TextMention { user } => EntityKind::TextMention {
            user: user.id,
            is_bot: user.is_bot,
        },
        MessageEntityKind::BotCommand => EntityKind::BotCommand,
        _ => EntityKind::Other,
    };

    let range = entity.range();
    Entity {
        kind,
        offset: range.start,
        length: range.len(),
    }
}

fn largest_photo(sizes: &[PhotoSize]) -> Option<String> {
    sizes
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
        .map(|size| size.file.id.0.clone())
}

impl From<RequestError> for TransportError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(secs) => TransportError::RateLimited(secs.duration()),
            RequestError::Network(e) => TransportError::Network(e.to_string()),
            RequestError::Api(e) => TransportError::Api(e.to_string()),
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// [`Transport`] backed by the Telegram Bot API
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn get_self(&self) -> Result<BotIdentity, TransportError> {
        let me = self.bot.get_me().await?;
        Ok(BotIdentity {
            id: me.user.id,
            username: me.user.username.clone(),
        })
    }

    async fn send_reply(&self, target: ReplyTarget, reply: &Reply) -> Result<(), TransportError> {
        let thread = ReplyParameters::new(target.message_id);

        match reply {
            Reply::Photo { file_id } => {
                self.bot
                    .send_photo(target.chat_id, InputFile::file_id(FileId(file_id.clone())))
                    .reply_parameters(thread)
                    .await?;
            }
            Reply::ExternalPhoto { url } => match url::Url::parse(url) {
                Ok(parsed) => {
                    self.bot
                        .send_photo(target.chat_id, InputFile::url(parsed))
                        .reply_parameters(thread)
                        .await?;
                }
                // Stored rows are trusted, but a bad URL still shouldn't drop the reply.
                Err(_) => {
                    self.bot
                        .send_message(target.chat_id, url.as_str())
                        .reply_parameters(thread)
                        .await?;
                }
            },
            other => {
                self.bot
                    .send_message(target.chat_id, other.to_string())
                    .reply_parameters(thread)
                    .await?;
            }
        }

        Ok(())
    }

    async fn poll(
        &self,
        offset: Option<i32>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Update>, TransportError> {
        let mut request = self
            .bot
            .get_updates()
            .timeout(timeout.as_secs() as u32)
            .allowed_updates(vec![AllowedUpdate::Message]);
        if let Some(offset) = offset {
            request = request.offset(offset);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Long poll cancelled");
                Ok(Vec::new())
            }
            result = request.send() => Ok(result?),
        }
    }
}
