use std::sync::Arc;

use teloxide::prelude::*;

use amb_core::{
    domain::{ChatId, MessageId, MessageRef},
    matcher::Resolution,
    notifier::{parse_callback_data, Decision},
};

use crate::router::AppState;

use super::{user_message_for, Actor};

const ACCEPTED_HTML: &str =
    "✅ <b>Request accepted.</b> Check your messages for the contact details.";
const REJECTED_HTML: &str = "❌ <b>Request declined.</b>";

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let data = q.data.clone().unwrap_or_default();
    let keyboard_msg = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    // Private chat with the bot: the user id doubles as the chat id.
    let chat = keyboard_msg
        .map(|m| m.chat_id)
        .unwrap_or(ChatId(q.from.id.0 as i64));
    let actor = Actor::from_user(&q.from, chat);

    process_callback(&state, &actor, &q.id, &data, keyboard_msg).await;
    Ok(())
}

/// Resolve the contact request behind an accept/reject button. The callback
/// is always answered, and the keyboard message loses its buttons once the
/// request is settled.
pub(crate) async fn process_callback(
    state: &AppState,
    actor: &Actor,
    callback_id: &str,
    data: &str,
    keyboard_msg: Option<MessageRef>,
) {
    let Some((decision, request_id)) = parse_callback_data(data) else {
        answer(state, callback_id, Some("Unknown action")).await;
        return;
    };

    let outcome = state
        .matcher
        .resolve(request_id, decision, actor.account_id)
        .await;

    let (toast, edited) = match &outcome {
        Ok(Resolution::Accepted(_)) => ("Accepted", ACCEPTED_HTML),
        Ok(Resolution::Rejected { .. }) => ("Declined", REJECTED_HTML),
        Err(e) => {
            tracing::info!(
                request_id = request_id.0,
                responder = actor.account_id.0,
                accept = decision == Decision::Accept,
                error = %e,
                "contact request resolution refused"
            );
            let text = user_message_for(e);
            answer(state, callback_id, Some(&text)).await;
            return;
        }
    };

    if let Some(msg) = keyboard_msg {
        if let Err(e) = state.messenger.edit_html(msg, edited).await {
            tracing::warn!(chat_id = msg.chat_id.0, error = %e, "keyboard message edit failed");
        }
    }
    answer(state, callback_id, Some(toast)).await;
}

async fn answer(state: &AppState, callback_id: &str, text: Option<&str>) {
    if let Err(e) = state.messenger.answer_callback_query(callback_id, text).await {
        tracing::warn!(error = %e, "callback answer failed");
    }
}
