/// Core error type for the matchmaking bot.
///
/// Allocator, matcher and moderation services return these as typed results;
/// the Telegram layer is the only place that turns them into user-facing text.
/// Store adapters map their driver errors into `Persistence` / `Conflict`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("all anonymous numbers are in use")]
    PoolExhausted,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cannot contact yourself")]
    SelfContact,

    #[error("requester has no anonymous number")]
    NoIdentityAssigned,

    #[error("a contact request is already pending between these users")]
    DuplicatePending,

    #[error("contact request already resolved")]
    AlreadyResolved,

    #[error("only the addressed participant may answer this request")]
    NotRecipient,

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unique-constraint violation reported by the store.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
