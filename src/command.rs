//! Detects messages addressed to the bot and turns the text after the
//! mention into a [`Command`].
//!
//! A message addresses the bot only when its *first* entity is a mention of
//! the bot. The rest of the text, with the mention cut out, is read as:
//!
//! * `` (nothing) or `help`: usage
//! * `aliases`: list your personal aliases
//! * `alias <name>`: add a personal alias
//! * `save <name> link <url>`: save an external photo
//! * `save <name> [text]`: save text, the attached photo, or the replied-to message
//! * anything else: look the whole text up as an alias

use crate::platform::{BotIdentity, EntityKind, IncomingMessage, Quoted};
use crate::store::NewMeme;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Help,
    Lookup,
    /// `None` when the message carried nothing to save.
    Register(Option<NewMeme>),
    Link,
    ListAliases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub alias: String,
    pub action: Action,
}

impl Command {
    fn new(alias: &str, action: Action) -> Self {
        Self {
            alias: alias.to_string(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Command(Command),
    NotAddressed,
}

pub fn parse(message: &IncomingMessage, bot: &BotIdentity) -> Parsed {
    let first = match message.entities.first() {
        Some(entity) => entity,
        None => return Parsed::NotAddressed,
    };

    let addressed = match &first.kind {
        EntityKind::Mention { username } => bot
            .username
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(username)),
        EntityKind::TextMention { user, is_bot } => !is_bot && *user == bot.id,
        _ => false,
    };
    if !addressed {
        return Parsed::NotAddressed;
    }

    let range = first.range();
    let (before, after) = match (message.text.get(..range.start), message.text.get(range.end..)) {
        (Some(before), Some(after)) => (before, after),
        _ => return Parsed::NotAddressed,
    };
    let payload = format!("{} {}", before.trim(), after.trim());

    Parsed::Command(parse_payload(payload.trim(), message))
}

fn parse_payload(payload: &str, message: &IncomingMessage) -> Command {
    let (keyword, rest) = split_word(payload);

    match keyword.to_lowercase().as_str() {
        "" => Command::new("", Action::Lookup),
        "help" if rest.is_empty() => Command::new("", Action::Help),
        "aliases" if rest.is_empty() => Command::new("", Action::ListAliases),
        "alias" if !rest.is_empty() && !rest.contains(char::is_whitespace) => {
            Command::new(rest, Action::Link)
        }
        "save" if !rest.is_empty() => {
            let (alias, content) = split_word(rest);
            Command::new(alias, Action::Register(registration_content(content, message)))
        }
        _ => Command::new(payload, Action::Lookup),
    }
}

/// Pick what `save` stores: an explicit link, the attached photo, inline text,
/// then whatever the message replies to.
fn registration_content(content: &str, message: &IncomingMessage) -> Option<NewMeme> {
    let (marker, link) = split_word(content);
    if marker.eq_ignore_ascii_case("link") && !link.is_empty() {
        return Some(NewMeme::external_photo(link));
    }
    if let Some(photo) = &message.photo {
        return Some(NewMeme::photo(photo.as_str()));
    }
    if !content.is_empty() {
        return Some(NewMeme::message(content));
    }

    match &message.reply {
        Some(Quoted {
            photo: Some(photo), ..
        }) => Some(NewMeme::photo(photo.as_str())),
        Some(Quoted {
            text: Some(text), ..
        }) => Some(NewMeme::message(text.as_str())),
        _ => None,
    }
}

/// First whitespace-separated word and the trimmed remainder.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim()),
        None => (text, ""),
    }
}
