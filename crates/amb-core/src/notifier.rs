//! Notification payloads and their delivery.
//!
//! Core services never talk to the transport directly: they hand a
//! [`Notification`] to a [`Notifier`], which delivers it fire-and-forget.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{AccountId, AnonymousId, ChatId, Handle, RequestId},
    errors::Error,
    formatting::{escape_html, mention},
    messaging::{
        port::MessagingPort,
        types::{InlineButton, InlineKeyboard},
    },
    Result,
};

/// Something an account should be told about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Sent to the target of a new contact request, with accept/reject buttons.
    ContactProposed {
        request_id: RequestId,
        from_anonymous: AnonymousId,
    },
    /// Sent to each side of an accepted request, naming the other side.
    ContactAccepted { counterpart: Handle },
    /// Sent to the requester when the target declines.
    ContactRejected,
    /// Sent to a participant who received an anonymous number from an admin.
    NumberAssigned { anonymous_id: AnonymousId },
    /// Sent to every admin when a participant is reported.
    ReportFiled {
        reported: Handle,
        reported_anonymous: Option<AnonymousId>,
        reporter: Option<Handle>,
        reason: String,
    },
}

/// Decision carried by an accept/reject button.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

const CALLBACK_PREFIX: &str = "contact";

/// Callback data for a contact-request button: `contact:{accept|reject}:{id}`.
pub fn callback_data(decision: Decision, request_id: RequestId) -> String {
    let verb = match decision {
        Decision::Accept => "accept",
        Decision::Reject => "reject",
    };
    format!("{CALLBACK_PREFIX}:{verb}:{}", request_id.0)
}

/// Inverse of [`callback_data`]. `None` for foreign or malformed data.
pub fn parse_callback_data(data: &str) -> Option<(Decision, RequestId)> {
    let mut parts = data.split(':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let decision = match parts.next()? {
        "accept" => Decision::Accept,
        "reject" => Decision::Reject,
        _ => return None,
    };
    let id = parts.next()?.parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((decision, RequestId(id)))
}

/// Rendered form of a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedNotification {
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
}

impl Notification {
    pub fn render(&self) -> RenderedNotification {
        match self {
            Notification::ContactProposed {
                request_id,
                from_anonymous,
            } => RenderedNotification {
                html: format!(
                    "🤝 <b>New contact request</b>\n\n\
Participant <b>{from_anonymous}</b> would like to get in touch with you.\n\n\
Do you accept?"
                ),
                keyboard: Some(InlineKeyboard::single_row(vec![
                    InlineButton::new("✅ Accept", callback_data(Decision::Accept, *request_id)),
                    InlineButton::new("❌ Decline", callback_data(Decision::Reject, *request_id)),
                ])),
            },
            Notification::ContactAccepted { counterpart } => RenderedNotification {
                html: format!(
                    "✨ <b>It's a match!</b>\n\nYou can now reach {} directly.",
                    mention(counterpart.as_str())
                ),
                keyboard: None,
            },
            Notification::ContactRejected => RenderedNotification {
                html: "❌ Your contact request was declined.".to_string(),
                keyboard: None,
            },
            Notification::NumberAssigned { anonymous_id } => RenderedNotification {
                html: format!(
                    "🎭 <b>Your anonymous number</b>\n\n\
An organizer assigned you the number <b>{anonymous_id}</b>.\n\n\
📝 <b>Instructions:</b>\n\
• Keep this number safe\n\
• Use it for interactions during the event\n\
• Do not share it with anyone\n\n\
🔍 <b>Useful commands:</b>\n\
• /id - See your number at any time\n\
• /help - List all commands\n\n\
See you at the event! 🎉"
                ),
                keyboard: None,
            },
            Notification::ReportFiled {
                reported,
                reported_anonymous,
                reporter,
                reason,
            } => {
                let number = reported_anonymous
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "none".to_string());
                let by = reporter
                    .as_ref()
                    .map(|h| format!("@{}", escape_html(h.as_str())))
                    .unwrap_or_else(|| "anonymous".to_string());
                let mut html = format!(
                    "🚨 <b>New report</b>\n\n\
Reported user: {}\n\
Anonymous number: {number}\n\
By: {by}",
                    mention(reported.as_str())
                );
                if !reason.trim().is_empty() {
                    html.push_str(&format!("\nReason: {}", escape_html(reason.trim())));
                }
                RenderedNotification {
                    html,
                    keyboard: None,
                }
            }
        }
    }
}

/// Delivery port for notifications. Fire-and-forget: failures are logged by
/// the implementation and never reach the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, to: AccountId, notification: Notification);
}

/// [`Notifier`] over a [`MessagingPort`]; the private chat id of a Telegram
/// user equals their account id.
pub struct MessengerNotifier {
    messenger: Arc<dyn MessagingPort>,
}

impl MessengerNotifier {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    async fn deliver(&self, to: AccountId, notification: &Notification) -> Result<()> {
        let rendered = notification.render();
        let chat: ChatId = to.into();
        match rendered.keyboard {
            Some(keyboard) => {
                if !self.messenger.capabilities().supports_inline_keyboards {
                    return Err(Error::External(
                        "messenger cannot send inline keyboards".to_string(),
                    ));
                }
                self.messenger
                    .send_inline_keyboard(chat, &rendered.html, keyboard)
                    .await?;
            }
            None => {
                self.messenger.send_html(chat, &rendered.html).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for MessengerNotifier {
    async fn notify(&self, to: AccountId, notification: Notification) {
        if let Err(e) = self.deliver(to, &notification).await {
            tracing::warn!(account_id = to.0, error = %e, "notification delivery failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every notification instead of delivering it.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(AccountId, Notification)>>,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<(AccountId, Notification)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_to(&self, to: AccountId) -> Vec<Notification> {
            self.sent()
                .into_iter()
                .filter(|(id, _)| *id == to)
                .map(|(_, n)| n)
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, to: AccountId, notification: Notification) {
            self.sent.lock().unwrap().push((to, notification));
        }
    }
}
