//! Telegram update handlers.
//!
//! Each handler extracts the acting user from the update, runs the matching
//! core operation and replies through the shared messenger. Errors become
//! user-facing text in [`user_message_for`] and nowhere else.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message, User},
};

use amb_core::{
    domain::{AccountId, ChatId, Handle},
    errors::Error,
    formatting::escape_html,
    Result,
};

use crate::router::AppState;

mod callback;
mod commands;
mod text;

/// The Telegram user behind an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Actor {
    pub account_id: AccountId,
    /// `None` when the user has no Telegram username.
    pub handle: Option<Handle>,
    pub chat: ChatId,
}

impl Actor {
    fn from_user(user: &User, chat: ChatId) -> Self {
        Self {
            account_id: AccountId(user.id.0 as i64),
            handle: user
                .username
                .as_deref()
                .and_then(|name| Handle::parse(name).ok()),
            chat,
        }
    }

    pub fn require_handle(&self) -> Result<&Handle> {
        self.handle.as_ref().ok_or_else(|| {
            Error::InvalidInput(
                "please set a Telegram username in your settings to use this bot".to_string(),
            )
        })
    }
}

/// User-facing text for a failed operation.
pub(crate) fn user_message_for(err: &Error) -> String {
    match err {
        Error::PoolExhausted => "❌ No anonymous numbers are left.".to_string(),
        Error::NotFound(what) => format!("❌ Not found: {}.", escape_html(what)),
        Error::SelfContact => "❌ You cannot send a contact request to yourself.".to_string(),
        Error::NoIdentityAssigned => {
            "❌ You don't have an anonymous number yet. Ask an organizer to assign you one."
                .to_string()
        }
        Error::DuplicatePending => {
            "⏳ A contact request between you two is already waiting for an answer.".to_string()
        }
        Error::AlreadyResolved => "ℹ️ This request has already been answered.".to_string(),
        Error::NotRecipient => "❌ This request is not addressed to you.".to_string(),
        Error::Forbidden(_) => "❌ This command is reserved for organizers.".to_string(),
        Error::InvalidInput(msg) => format!("❌ {}", escape_html(msg)),
        Error::Conflict(_)
        | Error::Persistence(_)
        | Error::Config(_)
        | Error::Io(_)
        | Error::External(_) => "❌ Something went wrong. Please try again later.".to_string(),
    }
}

/// Send `html` to the actor's chat, logging delivery failures.
pub(crate) async fn reply(state: &AppState, actor: &Actor, html: &str) {
    if let Err(e) = state.messenger.send_html(actor.chat, html).await {
        tracing::warn!(chat_id = actor.chat.0, error = %e, "reply failed");
    }
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let actor = Actor::from_user(user, ChatId(msg.chat.id.0));

    if text.starts_with('/') {
        commands::handle_command(&state, &actor, text).await;
    } else {
        text::handle_text(&state, &actor).await;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_domain_error_has_friendly_text() {
        assert!(user_message_for(&Error::SelfContact).contains("yourself"));
        assert!(user_message_for(&Error::DuplicatePending).contains("already waiting"));
        assert!(user_message_for(&Error::Forbidden("admin only".into())).contains("organizers"));
        // Internal details never leak.
        let internal = user_message_for(&Error::Persistence("disk I/O error at page 7".into()));
        assert!(!internal.contains("page 7"));
        assert_eq!(
            user_message_for(&Error::InvalidInput("<bad>".into())),
            "❌ &lt;bad&gt;"
        );
    }

    #[test]
    fn actor_without_username_is_told_to_set_one() {
        let actor = Actor {
            account_id: AccountId(1),
            handle: None,
            chat: ChatId(1),
        };
        let err = actor.require_handle().unwrap_err();
        assert!(user_message_for(&err).contains("Telegram username"));
    }
}
