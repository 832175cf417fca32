use chrono::Utc;

use amb_core::{
    domain::{Account, Handle, Role, TargetRef},
    errors::Error,
    event::{command_list, Audience},
    formatting::{escape_html, mention, truncate_chars},
    notifier::Notification,
    Result,
};

use crate::router::AppState;

use super::{reply, user_message_for, Actor};

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// First whitespace-separated token of `args` and whatever follows it.
fn split_first(args: &str) -> (&str, &str) {
    match args.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (args, ""),
    }
}

fn usage(text: &str) -> Error {
    Error::InvalidInput(format!("usage: {text}"))
}

fn handle_arg(args: &str, usage_text: &str) -> Result<Handle> {
    let (first, _) = split_first(args);
    if first.is_empty() {
        return Err(usage(usage_text));
    }
    Handle::parse(first)
}

pub(crate) async fn handle_command(state: &AppState, actor: &Actor, text: &str) {
    let (cmd, args) = parse_command(text);
    if let Err(e) = execute(state, actor, &cmd, &args).await {
        match &e {
            Error::Persistence(_) | Error::Io(_) | Error::External(_) | Error::Config(_) => {
                tracing::warn!(command = %cmd, account = actor.account_id.0, error = %e, "command failed")
            }
            _ => {
                tracing::info!(command = %cmd, account = actor.account_id.0, error = %e, "command refused")
            }
        }
        reply(state, actor, &user_message_for(&e)).await;
    }
}

async fn execute(state: &AppState, actor: &Actor, cmd: &str, args: &str) -> Result<()> {
    match cmd {
        "start" => start(state, actor).await,
        "help" => help(state, actor).await,
        "id" => show_id(state, actor).await,
        "countdown" => {
            let line = state.announcer.event().schedule.status_line(Utc::now());
            reply(state, actor, &line).await;
            Ok(())
        }
        "contact" => contact(state, actor, args).await,
        "report" => report(state, actor, args).await,
        "adduser" => add_user(state, actor, args).await,
        "startspeed" => set_session(state, actor, true).await,
        "stopspeed" => set_session(state, actor, false).await,
        "addadmin" => add_admin(state, actor, args).await,
        "removeadmin" => remove_admin(state, actor, args).await,
        "resetallnumbers" => reset_all_numbers(state, actor).await,
        "broadcast" => broadcast(state, actor).await,
        _ => {
            reply(state, actor, "Unknown command. Use /help.").await;
            Ok(())
        }
    }
}

async fn start(state: &AppState, actor: &Actor) -> Result<()> {
    let handle = actor.require_handle()?;
    let account = register(state, actor, handle).await?;
    let role = state.moderation.role_of(handle).await?;
    tracing::info!(handle = %handle, account = actor.account_id.0, ?role, "participant registered");

    let audience = Audience::Participant {
        role,
        anonymous_id: account.anonymous_id,
    };
    // The ticker runs on its own until the event starts or its lifetime ends.
    let (_msg, _ticker) = state.announcer.broadcast_welcome(actor.chat, audience).await?;
    Ok(())
}

/// Bind the actor's account to `handle`. A participant who changed their
/// Telegram username keeps their row, number and role under the new name.
async fn register(state: &AppState, actor: &Actor, handle: &Handle) -> Result<Account> {
    let taken = || {
        Error::InvalidInput(format!(
            "the username @{handle} is already registered to another Telegram account. \
             Please contact an organizer."
        ))
    };
    match state.users.find_by_account_id(actor.account_id).await? {
        Some(existing) if &existing.handle != handle => {
            let moved = state
                .users
                .rename(actor.account_id, handle)
                .await
                .map_err(|e| match e {
                    Error::Conflict(_) => taken(),
                    other => other,
                })?;
            tracing::info!(
                old = %existing.handle,
                new = %handle,
                account = actor.account_id.0,
                "participant changed username"
            );
            Ok(moved)
        }
        _ => state
            .users
            .upsert(handle, Some(actor.account_id))
            .await
            .map_err(|e| match e {
                Error::Conflict(_) => taken(),
                other => other,
            }),
    }
}

async fn help(state: &AppState, actor: &Actor) -> Result<()> {
    let (role, anonymous_id) = match &actor.handle {
        Some(handle) => {
            let role = state.moderation.role_of(handle).await?;
            let id = state
                .users
                .find_by_handle(handle)
                .await?
                .and_then(|a| a.anonymous_id);
            (role, id)
        }
        None => (Role::Participant, None),
    };
    let html = state
        .announcer
        .event()
        .welcome_html(Audience::Participant { role, anonymous_id }, Utc::now());
    reply(state, actor, &html).await;
    Ok(())
}

async fn show_id(state: &AppState, actor: &Actor) -> Result<()> {
    let handle = actor.require_handle()?;
    let account = state.users.find_by_handle(handle).await?;
    let mut html = match account.and_then(|a| a.anonymous_id) {
        Some(id) => format!("🎭 Your anonymous number is: <b>{id}</b>"),
        None => "🎭 You don't have an anonymous number yet. Ask an organizer!".to_string(),
    };

    let role = state.moderation.role_of(handle).await?;
    if role.is_admin() {
        html.push_str("\n\n");
        html.push_str(&command_list(role));
    }
    reply(state, actor, &html).await;
    Ok(())
}

async fn contact(state: &AppState, actor: &Actor, args: &str) -> Result<()> {
    let (first, _) = split_first(args);
    if first.is_empty() {
        return Err(usage("/contact @username or /contact #number"));
    }
    let target = TargetRef::parse(first)?;
    state.matcher.propose(actor.account_id, &target).await?;

    // Never reveal the handle behind a number.
    let shown = match &target {
        TargetRef::Handle(h) => mention(h.as_str()),
        TargetRef::Anonymous(id) => format!("<b>{id}</b>"),
    };
    reply(
        state,
        actor,
        &format!("📨 Contact request sent to {shown}. You'll be notified when they answer."),
    )
    .await;
    Ok(())
}

async fn report(state: &AppState, actor: &Actor, args: &str) -> Result<()> {
    let reported = handle_arg(args, "/report @username [reason]")?;
    let (_, reason) = split_first(args);
    state
        .moderation
        .report(actor.account_id, &reported, reason)
        .await?;
    reply(
        state,
        actor,
        "🚨 Thanks, your report was sent to the organizers.",
    )
    .await;
    Ok(())
}

async fn add_user(state: &AppState, actor: &Actor, args: &str) -> Result<()> {
    let grant = state.moderation.require_admin(actor.require_handle()?).await?;
    let target = handle_arg(args, "/adduser @username")?;

    let account = state.users.upsert(&target, None).await?;
    let id = state.allocator.assign_fresh(&target).await?;
    tracing::info!(by = %grant.handle(), handle = %target, anonymous_id = %id, "number assigned");

    let delivery = match account.account_id {
        Some(account_id) => {
            state
                .notifier
                .notify(account_id, Notification::NumberAssigned { anonymous_id: id })
                .await;
            "They have been notified."
        }
        None => "They will see it after sending /start to the bot.",
    };
    reply(
        state,
        actor,
        &format!(
            "✅ {} now has number <b>{id}</b>. {delivery}",
            mention(target.as_str())
        ),
    )
    .await;
    Ok(())
}

async fn set_session(state: &AppState, actor: &Actor, open: bool) -> Result<()> {
    let grant = state.moderation.require_admin(actor.require_handle()?).await?;
    let html = if open {
        if state.gate.open(&grant) {
            "ℹ️ A speed dating session is already running."
        } else {
            "💘 Speed dating session started!"
        }
    } else if state.gate.close(&grant) {
        "🛑 Speed dating session stopped."
    } else {
        "ℹ️ No speed dating session is running."
    };
    reply(state, actor, html).await;
    Ok(())
}

async fn add_admin(state: &AppState, actor: &Actor, args: &str) -> Result<()> {
    let grant = state
        .moderation
        .require_super_admin(actor.require_handle()?)
        .await?;
    let target = handle_arg(args, "/addadmin @username")?;
    let html = if state.moderation.add_admin(&grant, &target).await? {
        format!("✅ {} is now an admin.", mention(target.as_str()))
    } else {
        format!("ℹ️ {} is already an admin.", mention(target.as_str()))
    };
    reply(state, actor, &html).await;
    Ok(())
}

async fn remove_admin(state: &AppState, actor: &Actor, args: &str) -> Result<()> {
    let grant = state
        .moderation
        .require_super_admin(actor.require_handle()?)
        .await?;
    let target = handle_arg(args, "/removeadmin @username")?;
    let html = if state.moderation.remove_admin(&grant, &target).await? {
        format!("✅ {} is no longer an admin.", mention(target.as_str()))
    } else {
        format!("ℹ️ {} is not a removable admin.", mention(target.as_str()))
    };
    reply(state, actor, &html).await;
    Ok(())
}

async fn reset_all_numbers(state: &AppState, actor: &Actor) -> Result<()> {
    let grant = state
        .moderation
        .require_super_admin(actor.require_handle()?)
        .await?;
    let report = state.allocator.reset_all().await?;
    tracing::info!(
        by = %grant.handle(),
        assigned = report.assigned.len(),
        failed = report.failed.len(),
        "anonymous numbers reset"
    );

    let mut lines = vec![format!(
        "🔄 <b>Numbers reset.</b> {} assigned, {} failed.",
        report.assigned.len(),
        report.failed.len()
    )];
    for (handle, id) in &report.assigned {
        lines.push(format!("{} → <b>{id}</b>", mention(handle.as_str())));
        match state.users.find_by_handle(handle).await {
            Ok(Some(account)) => {
                if let Some(account_id) = account.account_id {
                    state
                        .notifier
                        .notify(account_id, Notification::NumberAssigned { anonymous_id: *id })
                        .await;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(handle = %handle, error = %e, "lookup after reset failed"),
        }
    }
    for (handle, e) in &report.failed {
        lines.push(format!(
            "⚠️ {}: {}",
            mention(handle.as_str()),
            escape_html(&e.to_string())
        ));
    }

    let max = state.messenger.capabilities().max_message_len;
    let summary = truncate_chars(&lines.join("\n"), max.saturating_sub(3));
    reply(state, actor, &summary).await;
    Ok(())
}

async fn broadcast(state: &AppState, actor: &Actor) -> Result<()> {
    state
        .moderation
        .require_super_admin(actor.require_handle()?)
        .await?;
    let html = match state.announcer.broadcast_channel().await? {
        Some(_) => "📣 Welcome message posted to the channel.",
        None => "No channel configured.",
    };
    reply(state, actor, html).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use amb_core::{
        directory::{AdminDirectory, UserDirectory},
        domain::{AccountId, AnonymousId, ChatId},
    };

    use super::*;
    use crate::handlers::testing::{actor, harness, Harness, Sent};

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    async fn enroll(harness: &Harness, id: i64, name: &str, number: Option<u16>) {
        harness.store.upsert(&h(name), Some(AccountId(id))).await.unwrap();
        if let Some(n) = number {
            harness
                .store
                .set_anonymous_id(&h(name), Some(AnonymousId::new(n).unwrap()))
                .await
                .unwrap();
        }
    }

    #[test]
    fn parse_command_strips_bot_suffix() {
        assert_eq!(
            parse_command("/Contact@amb_bot  #007 "),
            ("contact".to_string(), "#007".to_string())
        );
        assert_eq!(parse_command("/id"), ("id".to_string(), String::new()));
    }

    #[test]
    fn split_first_keeps_the_remainder() {
        assert_eq!(split_first("@bob was rude  "), ("@bob", "was rude"));
        assert_eq!(split_first("@bob"), ("@bob", ""));
    }

    #[tokio::test]
    async fn start_registers_and_sends_welcome() {
        let hs = harness(&[]).await;
        handle_command(&hs.state, &actor(10, "alice"), "/start").await;

        let account = hs.store.find_by_handle(&h("alice")).await.unwrap().unwrap();
        assert_eq!(account.account_id, Some(AccountId(10)));
        let welcome = hs.messenger.last_text_to(ChatId(10));
        assert!(welcome.contains("Countdown"));
        assert!(welcome.contains("/contact"));
        assert!(!welcome.contains("/startspeed"));
    }

    #[tokio::test]
    async fn start_without_username_asks_for_one() {
        let hs = harness(&[]).await;
        let mut anon = actor(11, "x");
        anon.handle = None;
        handle_command(&hs.state, &anon, "/start").await;
        assert!(hs
            .messenger
            .last_text_to(ChatId(11))
            .contains("Telegram username"));
    }

    #[tokio::test]
    async fn start_after_username_change_keeps_number() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(5)).await;

        handle_command(&hs.state, &actor(10, "alice_new"), "/start").await;

        assert!(hs.store.find_by_handle(&h("alice")).await.unwrap().is_none());
        let moved = hs.store.find_by_handle(&h("alice_new")).await.unwrap().unwrap();
        assert_eq!(moved.account_id, Some(AccountId(10)));
        assert_eq!(moved.anonymous_id, Some(AnonymousId::new(5).unwrap()));
        assert!(hs.messenger.last_text_to(ChatId(10)).contains("#005"));
    }

    #[tokio::test]
    async fn start_with_a_handle_bound_elsewhere_is_explained() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(5)).await;

        handle_command(&hs.state, &actor(20, "alice"), "/start").await;

        let text = hs.messenger.last_text_to(ChatId(20));
        assert!(text.contains("already registered to another Telegram account"));
        let alice = hs.store.find_by_handle(&h("alice")).await.unwrap().unwrap();
        assert_eq!(alice.account_id, Some(AccountId(10)));

        // Renaming onto a handle someone else holds is refused the same way.
        enroll(&hs, 30, "carol", None).await;
        handle_command(&hs.state, &actor(30, "alice"), "/start").await;
        assert!(hs
            .messenger
            .last_text_to(ChatId(30))
            .contains("already registered"));
        assert!(hs.store.find_by_handle(&h("carol")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn id_shows_number_and_admin_commands() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(7)).await;
        handle_command(&hs.state, &actor(10, "alice"), "/id").await;
        let text = hs.messenger.last_text_to(ChatId(10));
        assert!(text.contains("#007"));
        assert!(!text.contains("/adduser"));

        handle_command(&hs.state, &actor(1, "root"), "/id").await;
        let text = hs.messenger.last_text_to(ChatId(1));
        assert!(text.contains("don't have an anonymous number"));
        assert!(text.contains("/resetallnumbers"));
    }

    #[tokio::test]
    async fn contact_by_number_keeps_target_anonymous() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(1)).await;
        enroll(&hs, 20, "bob", Some(2)).await;

        handle_command(&hs.state, &actor(10, "alice"), "/contact #002").await;

        let confirmation = hs.messenger.last_text_to(ChatId(10));
        assert!(confirmation.contains("#002"));
        assert!(!confirmation.contains("bob"));
        let sent = hs.messenger.sent();
        assert!(sent.iter().any(|s| matches!(
            s,
            Sent::Keyboard(chat, html, _) if *chat == ChatId(20) && html.contains("#001")
        )));
    }

    #[tokio::test]
    async fn contact_errors_become_friendly_text() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(1)).await;

        handle_command(&hs.state, &actor(10, "alice"), "/contact").await;
        assert!(hs.messenger.last_text_to(ChatId(10)).contains("usage"));

        handle_command(&hs.state, &actor(10, "alice"), "/contact @alice").await;
        assert!(hs.messenger.last_text_to(ChatId(10)).contains("yourself"));

        handle_command(&hs.state, &actor(10, "alice"), "/contact bob").await;
        assert!(hs
            .messenger
            .last_text_to(ChatId(10))
            .contains("@username or #number"));
    }

    #[tokio::test]
    async fn report_alerts_admins() {
        let hs = harness(&[]).await;
        enroll(&hs, 1, "root", None).await;
        enroll(&hs, 10, "alice", Some(1)).await;
        enroll(&hs, 20, "bob", Some(2)).await;

        handle_command(&hs.state, &actor(10, "alice"), "/report @bob was rude").await;

        assert!(hs.messenger.last_text_to(ChatId(10)).contains("report was sent"));
        let alert = hs.messenger.last_text_to(ChatId(1));
        assert!(alert.contains("@bob"));
        assert!(alert.contains("was rude"));
    }

    #[tokio::test]
    async fn report_without_reason_stores_empty_text() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(1)).await;
        enroll(&hs, 20, "bob", Some(2)).await;

        handle_command(&hs.state, &actor(10, "alice"), "/report @Bob").await;

        let reports = hs.store.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].reported_handle, h("bob"));
        assert_eq!(reports[0].reason, "");
    }

    #[tokio::test]
    async fn adduser_is_admin_only() {
        let hs = harness(&[]).await;
        handle_command(&hs.state, &actor(10, "alice"), "/adduser @bob").await;
        assert!(hs.messenger.last_text_to(ChatId(10)).contains("organizers"));
        assert!(hs.store.find_by_handle(&h("bob")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adduser_assigns_and_notifies() {
        let hs = harness(&[]).await;
        enroll(&hs, 20, "bob", None).await;

        handle_command(&hs.state, &actor(1, "root"), "/adduser @bob").await;

        let bob = hs.store.find_by_handle(&h("bob")).await.unwrap().unwrap();
        let id = bob.anonymous_id.unwrap();
        assert!(hs.messenger.last_text_to(ChatId(1)).contains(&id.to_string()));
        assert!(hs.messenger.last_text_to(ChatId(20)).contains(&id.to_string()));

        // Handles that never talked to the bot still get a number.
        handle_command(&hs.state, &actor(1, "root"), "/adduser @carol").await;
        assert!(hs
            .messenger
            .last_text_to(ChatId(1))
            .contains("after sending /start"));
    }

    #[tokio::test]
    async fn session_gate_commands_toggle() {
        let hs = harness(&[]).await;
        handle_command(&hs.state, &actor(1, "root"), "/startspeed").await;
        assert!(hs.state.gate.is_active());
        handle_command(&hs.state, &actor(1, "root"), "/startspeed").await;
        assert!(hs.messenger.last_text_to(ChatId(1)).contains("already running"));
        handle_command(&hs.state, &actor(1, "root"), "/stopspeed").await;
        assert!(!hs.state.gate.is_active());

        handle_command(&hs.state, &actor(10, "alice"), "/startspeed").await;
        assert!(!hs.state.gate.is_active());
    }

    #[tokio::test]
    async fn admin_management_requires_super_admin() {
        let hs = harness(&[]).await;
        handle_command(&hs.state, &actor(1, "root"), "/addadmin @mod").await;
        assert!(hs.store.is_admin(&h("mod")).await.unwrap());

        // A plain admin cannot promote others.
        handle_command(&hs.state, &actor(30, "mod"), "/addadmin @eve").await;
        assert!(!hs.store.is_admin(&h("eve")).await.unwrap());
        assert!(hs.messenger.last_text_to(ChatId(30)).contains("organizers"));

        handle_command(&hs.state, &actor(1, "root"), "/removeadmin @mod").await;
        assert!(!hs.store.is_admin(&h("mod")).await.unwrap());
        handle_command(&hs.state, &actor(1, "root"), "/removeadmin @root").await;
        assert!(hs.store.is_super_admin(&h("root")).await.unwrap());
    }

    #[tokio::test]
    async fn reset_all_numbers_reassigns_everyone() {
        let hs = harness(&[]).await;
        enroll(&hs, 10, "alice", Some(1)).await;
        enroll(&hs, 20, "bob", Some(2)).await;

        handle_command(&hs.state, &actor(1, "root"), "/resetallnumbers").await;

        let summary = hs.messenger.last_text_to(ChatId(1));
        assert!(summary.contains("0 failed"));
        assert!(summary.contains("@alice"));
        assert!(summary.contains("@bob"));
        for (id, name) in [(10, "alice"), (20, "bob")] {
            let account = hs.store.find_by_handle(&h(name)).await.unwrap().unwrap();
            let number = account.anonymous_id.unwrap().to_string();
            assert!(hs.messenger.last_text_to(ChatId(id)).contains(&number));
        }
    }

    #[tokio::test]
    async fn broadcast_without_channel_says_so() {
        let hs = harness(&[]).await;
        handle_command(&hs.state, &actor(1, "root"), "/broadcast").await;
        assert_eq!(
            hs.messenger.last_text_to(ChatId(1)),
            "No channel configured."
        );
    }

    #[tokio::test]
    async fn broadcast_posts_to_channel() {
        let hs = harness(&[("CHANNEL_ID", "-1001")]).await;
        handle_command(&hs.state, &actor(1, "root"), "/broadcast").await;
        assert!(hs.messenger.last_text_to(ChatId(-1001)).contains("Countdown"));
        assert!(hs.messenger.last_text_to(ChatId(1)).contains("posted"));
    }

    #[tokio::test]
    async fn countdown_and_unknown_commands() {
        let hs = harness(&[]).await;
        handle_command(&hs.state, &actor(10, "alice"), "/countdown").await;
        assert!(hs.messenger.last_text_to(ChatId(10)).contains("starts in"));
        handle_command(&hs.state, &actor(10, "alice"), "/dance").await;
        assert_eq!(
            hs.messenger.last_text_to(ChatId(10)),
            "Unknown command. Use /help."
        );
    }
}
