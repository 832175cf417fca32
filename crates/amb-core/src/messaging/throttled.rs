use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two Bot API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls targeting the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

/// Hands out evenly spaced time slots.
#[derive(Debug)]
struct SlotClock {
    spacing: Duration,
    next_free: Instant,
}

impl SlotClock {
    fn new(spacing: Duration, now: Instant) -> Self {
        Self {
            spacing,
            next_free: now,
        }
    }

    /// Book the next slot at or after `now`; returns how long to wait for it.
    fn book(&mut self, now: Instant) -> Duration {
        let slot = self.next_free.max(now);
        self.next_free = slot + self.spacing;
        slot - now
    }
}

/// `MessagingPort` decorator that spaces outbound calls.
///
/// Broadcasts and `/resetallnumbers` notifications fan out to many chats, and
/// the countdown tickers edit the same message repeatedly; both hit Telegram
/// flood limits without pacing.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<SlotClock>,
    chats: Mutex<HashMap<i64, SlotClock>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(SlotClock::new(cfg.global_min_interval, Instant::now())),
            chats: Mutex::new(HashMap::new()),
        }
    }

    async fn pace(&self, chat: Option<ChatId>) {
        let now = Instant::now();
        let mut wait = self.global.lock().await.book(now);
        if let Some(chat) = chat {
            let mut chats = self.chats.lock().await;
            let clock = chats
                .entry(chat.0)
                .or_insert_with(|| SlotClock::new(self.cfg.per_chat_min_interval, now));
            wait = wait.max(clock.book(now));
        }
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.pace(Some(msg.chat_id)).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        url: &str,
        caption_html: &str,
    ) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_photo(chat_id, url, caption_html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_inline_keyboard(chat_id, html, keyboard).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers are not bound to a chat.
        self.pace(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
