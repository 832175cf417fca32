use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::{errors::Error, Result};

/// Telegram user id (numeric). Also the private chat id for that user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl From<AccountId> for ChatId {
    fn from(id: AccountId) -> Self {
        ChatId(id.0)
    }
}

// ============== Handles ==============

/// Stable textual identity of a participant (Telegram username, no `@`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    pub const MAX_LEN: usize = 64;

    /// Parse `@name` or `name`. Only ASCII word characters are accepted;
    /// Telegram usernames are case-insensitive, so the result is lowercased.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim().trim_start_matches('@');
        if name.is_empty() {
            return Err(Error::InvalidInput("empty username".to_string()));
        }
        if name.len() > Self::MAX_LEN {
            return Err(Error::InvalidInput(format!("username too long: {name}")));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidInput(format!("invalid username: {name}")));
        }
        Ok(Self(name.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============== Anonymous identifiers ==============

/// Anonymous participant number drawn from the closed pool `0..=500`.
///
/// Renders as `#` followed by the number zero-padded to three digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnonymousId(u16);

impl AnonymousId {
    pub const MIN: u16 = 0;
    pub const MAX: u16 = 500;
    /// Number of identifiers in the pool.
    pub const POOL_SIZE: usize = (Self::MAX - Self::MIN) as usize + 1;

    pub fn new(n: u16) -> Result<Self> {
        if n > Self::MAX {
            return Err(Error::InvalidInput(format!(
                "anonymous number out of range: {n}"
            )));
        }
        Ok(Self(n))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Every identifier in the pool, ascending.
    pub fn all() -> impl Iterator<Item = AnonymousId> {
        (Self::MIN..=Self::MAX).map(AnonymousId)
    }

    /// Successor within the pool, `None` at the top of the range.
    pub fn next(self) -> Option<AnonymousId> {
        if self.0 >= Self::MAX {
            None
        } else {
            Some(AnonymousId(self.0 + 1))
        }
    }
}

impl fmt::Display for AnonymousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:03}", self.0)
    }
}

impl FromStr for AnonymousId {
    type Err = Error;

    /// Accepts `#7`, `#007` and `007`.
    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim().trim_start_matches('#');
        if digits.is_empty() || digits.len() > 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidInput(format!("invalid anonymous number: {s}")));
        }
        let n = digits
            .parse::<u16>()
            .map_err(|_| Error::InvalidInput(format!("invalid anonymous number: {s}")))?;
        AnonymousId::new(n)
    }
}

/// How a participant names the person they want to contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetRef {
    Handle(Handle),
    Anonymous(AnonymousId),
}

impl TargetRef {
    /// `@name` resolves by handle, `#NNN` by anonymous number.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with('#') {
            return Ok(TargetRef::Anonymous(raw.parse()?));
        }
        if raw.starts_with('@') {
            return Ok(TargetRef::Handle(Handle::parse(raw)?));
        }
        Err(Error::InvalidInput(format!(
            "expected @username or #number, got: {raw}"
        )))
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Handle(h) => write!(f, "@{h}"),
            TargetRef::Anonymous(id) => write!(f, "{id}"),
        }
    }
}

// ============== Records ==============

/// One registered participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub handle: Handle,
    pub account_id: Option<AccountId>,
    pub anonymous_id: Option<AnonymousId>,
    pub created_at: DateTime<Utc>,
}

/// Privilege level of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Participant,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self >= Role::Admin
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(Error::Persistence(format!(
                "unknown contact request status: {other}"
            ))),
        }
    }
}

/// Proposal from one account to another to exchange real handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactRequest {
    pub id: RequestId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ContactRequest {
    /// True when the request links `a` and `b` in either direction.
    pub fn links(&self, a: AccountId, b: AccountId) -> bool {
        (self.from_account_id == a && self.to_account_id == b)
            || (self.from_account_id == b && self.to_account_id == a)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReport {
    pub reporter_account_id: AccountId,
    pub reported_account_id: Option<AccountId>,
    pub reported_handle: Handle,
    pub reason: String,
}

/// Append-only moderation flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub id: i64,
    pub reporter_account_id: AccountId,
    pub reported_account_id: Option<AccountId>,
    pub reported_handle: Handle,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
