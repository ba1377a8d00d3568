use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use teloxide::types::UserId;
use tracing::{debug, info};

use crate::command::{Action, Command};
use crate::store::{AliasStore, Meme, MemeType, StoreError};

const HELP_TEXT: &str = "Mention me with an alias and I'll send back what was saved under it.\n\n\
     Commands:\n\
     @me <alias> - send the meme saved as <alias>\n\
     @me save <alias> <text> - save text (or attach a photo, or reply to a message)\n\
     @me save <alias> link <url> - save a photo by URL\n\
     @me alias <alias> - use memes other people saved as <alias>\n\
     @me aliases - list your personal aliases";

/// What the bot sends back for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Help,
    Text(String),
    Photo { file_id: String },
    ExternalPhoto { url: String },
    NotFound { alias: String },
    Saved { alias: String },
    Linked { alias: String },
    Aliases(Vec<String>),
    DuplicateAlias { alias: String },
    InvalidContent { reason: String },
}

impl From<Meme> for Reply {
    fn from(meme: Meme) -> Self {
        match meme.kind {
            MemeType::Message => Reply::Text(meme.content),
            MemeType::Photo => Reply::Photo {
                file_id: meme.content,
            },
            MemeType::ExternalPhoto => Reply::ExternalPhoto { url: meme.content },
        }
    }
}

/// Plain-text rendering, used for every reply that isn't a photo.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Help => write!(f, "{}", HELP_TEXT),
            Reply::Text(text) => write!(f, "{}", text),
            Reply::Photo { file_id } => write!(f, "{}", file_id),
            Reply::ExternalPhoto { url } => write!(f, "{}", url),
            Reply::NotFound { alias } => write!(f, "Nothing is saved as \"{}\".", alias),
            Reply::Saved { alias } => write!(f, "Saved as \"{}\".", alias),
            Reply::Linked { alias } => write!(f, "\"{}\" is now one of your aliases.", alias),
            Reply::Aliases(aliases) if aliases.is_empty() => {
                write!(f, "You have no personal aliases yet.")
            }
            Reply::Aliases(aliases) => write!(f, "Your aliases:\n{}", aliases.join("\n")),
            Reply::DuplicateAlias { alias } => write!(
                f,
                "You already saved something different as \"{}\".",
                alias
            ),
            Reply::InvalidContent { reason } => write!(f, "Can't save that: {}.", reason),
        }
    }
}

/// Routes parsed commands to the alias store and builds the reply.
pub struct Dispatcher {
    store: Arc<dyn AliasStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn AliasStore>) -> Self {
        Self { store }
    }

    /// Business outcomes (not found, duplicates, bad content) come back as
    /// replies; only a failing store is an error.
    pub async fn dispatch(&self, command: &Command, sender: UserId) -> Result<Reply> {
        let alias = command.alias.as_str();

        match &command.action {
            Action::Help => Ok(Reply::Help),
            Action::Lookup if alias.is_empty() => Ok(Reply::Help),
            Action::Lookup => match self.store.resolve(alias, sender).await? {
                Some(meme) => {
                    debug!(alias = %meme.alias, meme_id = meme.id, kind = %meme.kind, "Resolved alias");
                    Ok(meme.into())
                }
                None => {
                    debug!(alias, "No meme for alias");
                    Ok(Reply::NotFound {
                        alias: alias.to_string(),
                    })
                }
            },
            Action::Register(None) => Ok(Reply::InvalidContent {
                reason: "nothing to save, add text, attach a photo or reply to a message"
                    .to_string(),
            }),
            Action::Register(Some(meme)) => {
                match self.store.register_alias(alias, meme, sender).await {
                    Ok(meme_id) => {
                        info!(alias, meme_id, user = sender.0, "Saved meme");
                        Ok(Reply::Saved {
                            alias: alias.to_string(),
                        })
                    }
                    Err(err) => rejection(err),
                }
            }
            Action::Link => match self.store.link_user_alias(alias, sender).await {
                Ok(()) => {
                    info!(alias, user = sender.0, "Linked personal alias");
                    Ok(Reply::Linked {
                        alias: alias.to_string(),
                    })
                }
                Err(err) => rejection(err),
            },
            Action::ListAliases => Ok(Reply::Aliases(self.store.user_aliases(sender).await?)),
        }
    }
}

fn rejection(err: StoreError) -> Result<Reply> {
    match err {
        StoreError::DuplicateAlias { alias } => Ok(Reply::DuplicateAlias { alias }),
        StoreError::InvalidContent { kind, reason } => Ok(Reply::InvalidContent {
            reason: format!("{} {}", kind, reason),
        }),
        unavailable @ StoreError::Unavailable(_) => Err(unavailable.into()),
    }
}
