//! Event schedule and the welcome texts built around it.

use chrono::{DateTime, FixedOffset, Utc};

use crate::{
    domain::{AnonymousId, Role},
    errors::Error,
    formatting::escape_html,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Upcoming,
    Live,
    Ended,
}

/// Start and end of the event, kept in the offset they were configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventSchedule {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl EventSchedule {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Self> {
        if end < start {
            return Err(Error::Config(format!(
                "event ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        if now < self.start {
            Phase::Upcoming
        } else if now < self.end {
            Phase::Live
        } else {
            Phase::Ended
        }
    }

    /// Time left before the start, or the "started" banner once it is reached.
    pub fn format_countdown(&self, now: DateTime<Utc>) -> String {
        match remaining(self.start.with_timezone(&Utc), now) {
            Some(left) => format!("⏰ Countdown: {left}"),
            None => "The event has started! 🎉".to_string(),
        }
    }

    /// Reply to `/countdown`.
    pub fn status_line(&self, now: DateTime<Utc>) -> String {
        match self.phase(now) {
            Phase::Upcoming => match remaining(self.start.with_timezone(&Utc), now) {
                Some(left) => format!("⏳ The event starts in {left}!"),
                None => "The event has started! 🎉".to_string(),
            },
            Phase::Live => format!(
                "🎉 The event is in progress! Enjoy it until {}!",
                self.end.format("%H:%M")
            ),
            Phase::Ended => "🏁 The event is over. Thanks for coming!".to_string(),
        }
    }
}

/// `{d}d {h}h {m}m {s}s` until `target`, `None` once it is reached.
fn remaining(target: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
    let secs = (target - now).num_seconds();
    if secs <= 0 {
        return None;
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    Some(format!("{days}d {hours}h {minutes}m {seconds}s"))
}

const CONCEPT: &str = "Hi everyone! Welcome to the bot for cool, anonymous encounters.

<i>How it works:</i>
• Every participant gets a secret number
• Want to talk to someone? Use /contact @their_username or /contact #their_number
• They get a notification and decide whether to accept
• If it's a match, we put you in touch!

<i>Golden rules:</i>
• <i>Be respectful.</i> We are here to meet nice people, not to harass anyone
• <i>Privacy first.</i> Do not share personal details until you know the person well
• <i>No inappropriate content.</i> Keep it safe and fun for everyone
• <i>Something wrong?</i> Use /report @username to flag suspicious behaviour";

const PARTICIPANT_COMMANDS: &str = "<i>Available commands:</i>
• /contact @username or #number - Send a contact request
• /report @username [reason] - Report a user
• /countdown - Time left before the event
• /id - Show your anonymous number
• /help - Show this help";

const ADMIN_COMMANDS: &str = "👨‍💼 <i>Admin commands:</i>
• /startspeed - Start a speed dating session
• /stopspeed - Stop the session
• /adduser @username - Assign an anonymous number";

const SUPER_ADMIN_COMMANDS: &str = "👑 <i>Super admin commands:</i>
• /addadmin @username - Add an admin
• /removeadmin @username - Remove an admin
• /resetallnumbers - Reassign every anonymous number
• /broadcast - Post the welcome message to the channel";

/// Commands visible to `role`, participant commands first.
pub fn command_list(role: Role) -> String {
    let mut out = PARTICIPANT_COMMANDS.to_string();
    if role.is_admin() {
        out.push_str("\n\n");
        out.push_str(ADMIN_COMMANDS);
    }
    if role == Role::SuperAdmin {
        out.push_str("\n\n");
        out.push_str(SUPER_ADMIN_COMMANDS);
    }
    out
}

/// Everything needed to render announcements for one event.
#[derive(Clone, Debug)]
pub struct EventInfo {
    pub title: String,
    pub venue: String,
    pub schedule: EventSchedule,
    pub banner_url: Option<String>,
}

/// Who a welcome message is rendered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    Channel,
    Participant {
        role: Role,
        anonymous_id: Option<AnonymousId>,
    },
}

impl EventInfo {
    pub fn header_html(&self) -> String {
        format!(
            "🎉 <b>{}</b>\n📍 {}",
            escape_html(&self.title),
            escape_html(&self.venue)
        )
    }

    pub fn welcome_html(&self, audience: Audience, now: DateTime<Utc>) -> String {
        let mut out = format!(
            "{}\n\n{}\n\n{}",
            self.header_html(),
            self.schedule.format_countdown(now),
            CONCEPT
        );
        match audience {
            Audience::Channel => {
                out.push_str("\n\n");
                out.push_str(&command_list(Role::Participant));
            }
            Audience::Participant { role, anonymous_id } => {
                if let Some(id) = anonymous_id {
                    out.push_str(&format!("\n\n🎭 Your anonymous number is: <b>{id}</b>"));
                }
                out.push_str("\n\n");
                out.push_str(&command_list(role));
            }
        }
        out
    }
}
