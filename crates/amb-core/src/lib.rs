//! Core domain and application logic for the anonymous matchmaking bot.
//!
//! Framework-agnostic: Telegram and SQLite live behind ports (traits)
//! implemented in the adapter crates.

pub mod allocator;
pub mod announce;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod event;
pub mod formatting;
pub mod gate;
pub mod logging;
pub mod matcher;
pub mod messaging;
pub mod moderation;
pub mod notifier;

pub use errors::{Error, Result};
