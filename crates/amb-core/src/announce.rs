//! Welcome broadcasts with a live countdown, and the daily channel post.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatId, MessageRef},
    event::{Audience, EventInfo},
    messaging::port::MessagingPort,
    Result,
};

#[derive(Clone, Debug)]
pub struct AnnounceConfig {
    pub channel: Option<ChatId>,
    pub daily_hour: u32,
    pub broadcast_on_startup: bool,
    pub countdown_refresh: Duration,
    pub countdown_lifetime: Duration,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            channel: None,
            daily_hour: 9,
            broadcast_on_startup: true,
            countdown_refresh: Duration::from_secs(10),
            countdown_lifetime: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone)]
pub struct Announcer {
    messenger: Arc<dyn MessagingPort>,
    event: Arc<EventInfo>,
    cfg: AnnounceConfig,
}

impl Announcer {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        event: Arc<EventInfo>,
        cfg: AnnounceConfig,
    ) -> Self {
        Self {
            messenger,
            event,
            cfg,
        }
    }

    pub fn event(&self) -> &EventInfo {
        &self.event
    }

    pub fn channel(&self) -> Option<ChatId> {
        self.cfg.channel
    }

    /// Banner (best-effort), then the welcome message for `audience`, then a
    /// ticker that keeps its countdown fresh.
    pub async fn broadcast_welcome(
        &self,
        chat: ChatId,
        audience: Audience,
    ) -> Result<(MessageRef, JoinHandle<()>)> {
        self.send_banner(chat).await;

        let html = self.event.welcome_html(audience, Utc::now());
        let msg = self.messenger.send_html(chat, &html).await?;
        let ticker = self.spawn_countdown(msg, audience);
        Ok((msg, ticker))
    }

    /// Post the welcome message to the configured channel.
    pub async fn broadcast_channel(&self) -> Result<Option<MessageRef>> {
        let Some(channel) = self.cfg.channel else {
            return Ok(None);
        };
        let (msg, _ticker) = self.broadcast_welcome(channel, Audience::Channel).await?;
        tracing::info!(chat_id = channel.0, "welcome message broadcast to channel");
        Ok(Some(msg))
    }

    async fn send_banner(&self, chat: ChatId) {
        let Some(url) = self.event.banner_url.as_deref() else {
            return;
        };
        if !self.messenger.capabilities().supports_photos {
            return;
        }
        if let Err(e) = self
            .messenger
            .send_photo(chat, url, &self.event.header_html())
            .await
        {
            tracing::warn!(chat_id = chat.0, url, error = %e, "banner send failed");
        }
    }

    /// Edit `msg` every refresh interval until the lifetime deadline, the
    /// event start, or the first failed edit.
    fn spawn_countdown(&self, msg: MessageRef, audience: Audience) -> JoinHandle<()> {
        let messenger = self.messenger.clone();
        let event = self.event.clone();
        let refresh = self.cfg.countdown_refresh;
        let deadline = tokio::time::Instant::now() + self.cfg.countdown_lifetime;

        tokio::spawn(async move {
            if !messenger.capabilities().supports_edit {
                return;
            }
            loop {
                if tokio::time::Instant::now() + refresh > deadline {
                    break;
                }
                sleep(refresh).await;

                let now = Utc::now();
                let html = event.welcome_html(audience, now);
                if let Err(e) = messenger.edit_html(msg, &html).await {
                    tracing::warn!(
                        chat_id = msg.chat_id.0,
                        message_id = msg.message_id.0,
                        error = %e,
                        "countdown edit failed; ticker stopped"
                    );
                    break;
                }
                if now >= event.schedule.start {
                    break;
                }
            }
        })
    }

    /// Daily channel broadcast loop. Returns immediately when no channel is
    /// configured.
    pub async fn run_daily(&self, cancel: CancellationToken) {
        let Some(channel) = self.cfg.channel else {
            tracing::info!("no channel configured; daily broadcast disabled");
            return;
        };

        if self.cfg.broadcast_on_startup {
            if let Err(e) = self.broadcast_channel().await {
                tracing::error!(chat_id = channel.0, error = %e, "startup broadcast failed");
            }
        }

        loop {
            let now = Local::now();
            let Some(next) = next_daily_run(&now, self.cfg.daily_hour) else {
                tracing::error!(
                    hour = self.cfg.daily_hour,
                    "invalid broadcast hour; daily broadcast stopped"
                );
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next = %next, "next channel broadcast scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {
                    if let Err(e) = self.broadcast_channel().await {
                        tracing::error!(chat_id = channel.0, error = %e, "daily broadcast failed");
                    }
                }
            }
        }
    }
}

/// First `hour:00` strictly after `now` in `now`'s time zone. Days where that
/// wall-clock time does not exist are skipped.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let tz = now.timezone();
    let mut day = now.date_naive();
    // Two days cover "later today" and "tomorrow"; the rest absorbs DST gaps.
    for _ in 0..4 {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
        day = day.succ_opt()?;
    }
    None
}
