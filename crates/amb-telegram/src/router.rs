use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;

use amb_core::{
    allocator::IdentityAllocator,
    announce::Announcer,
    config::Config,
    directory::{Store, UserDirectory},
    gate::SessionGate,
    matcher::ContactMatcher,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    moderation::Moderation,
    notifier::{MessengerNotifier, Notifier},
};

use crate::handlers;
use crate::TelegramMessenger;

/// Everything a handler needs, shared across the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub allocator: Arc<IdentityAllocator>,
    pub matcher: Arc<ContactMatcher>,
    pub moderation: Arc<Moderation>,
    pub gate: Arc<SessionGate>,
    pub announcer: Arc<Announcer>,
    pub notifier: Arc<dyn Notifier>,
    pub messenger: Arc<dyn MessagingPort>,
}

impl AppState {
    /// Wire the core services over one store and one outbound messenger.
    pub fn new<S>(store: Arc<S>, messenger: Arc<dyn MessagingPort>, cfg: &Config) -> Self
    where
        S: Store + 'static,
    {
        let notifier: Arc<dyn Notifier> = Arc::new(MessengerNotifier::new(messenger.clone()));
        Self {
            users: store.clone(),
            allocator: Arc::new(IdentityAllocator::new(
                store.clone(),
                cfg.allocation_strategy,
            )),
            matcher: Arc::new(ContactMatcher::new(
                store.clone(),
                store.clone(),
                notifier.clone(),
            )),
            moderation: Arc::new(Moderation::new(
                store.clone(),
                store.clone(),
                store,
                notifier.clone(),
            )),
            gate: Arc::new(SessionGate::new()),
            announcer: Arc::new(Announcer::new(
                messenger.clone(),
                Arc::new(cfg.event.clone()),
                cfg.announce_config(),
            )),
            notifier,
            messenger,
        }
    }
}

pub async fn run_polling<S>(cfg: Arc<Config>, store: Arc<S>) -> anyhow::Result<()>
where
    S: Store + 'static,
{
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }
    tracing::info!(
        strategy = ?cfg.allocation_strategy,
        channel = ?cfg.channel_id,
        event_start = %cfg.event.schedule.start,
        "configuration loaded"
    );

    // Throttle outbound traffic; RetryAfter is still retried in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let state = Arc::new(AppState::new(store, messenger, &cfg));
    match &cfg.super_admin {
        Some(handle) => state.moderation.bootstrap(handle).await?,
        None => tracing::warn!("SUPER_ADMIN_USERNAME not set; admin commands are unavailable"),
    }

    let cancel = CancellationToken::new();
    let daily = {
        let announcer = state.announcer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { announcer.run_daily(cancel).await })
    };

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    let _ = daily.await;
    tracing::info!("dispatcher stopped");
    Ok(())
}
