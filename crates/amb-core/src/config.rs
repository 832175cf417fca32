use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::DateTime;

use crate::{
    allocator::AllocationStrategy,
    announce::AnnounceConfig,
    domain::{ChatId, Handle},
    errors::Error,
    event::{EventInfo, EventSchedule},
    Result,
};

const DEFAULT_EVENT_TITLE: &str = "Pool-A-Palooza - Love Island Edition 🏝️";
const DEFAULT_EVENT_VENUE: &str = "Sunday, March 16 at the Ranch du Comté, Ste Rose";
const DEFAULT_EVENT_START: &str = "2025-03-16T12:00:00-04:00";
const DEFAULT_EVENT_END: &str = "2025-03-16T22:00:00-04:00";

/// Typed configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub database_path: PathBuf,
    pub super_admin: Option<Handle>,
    pub allocation_strategy: AllocationStrategy,

    // Event
    pub event: EventInfo,

    // Announcements
    pub channel_id: Option<ChatId>,
    pub broadcast_on_startup: bool,
    pub daily_broadcast_hour: u32,
    pub countdown_refresh: Duration,
    pub countdown_lifetime: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;

        let database_path = PathBuf::from(
            get("DATABASE_PATH").unwrap_or_else(|| "data/database.sqlite".to_string()),
        );

        let super_admin = get("SUPER_ADMIN_USERNAME")
            .map(|raw| {
                Handle::parse(&raw)
                    .map_err(|e| Error::Config(format!("SUPER_ADMIN_USERNAME: {e}")))
            })
            .transpose()?;

        let allocation_strategy = match get("ALLOCATION_STRATEGY") {
            Some(raw) => raw.parse()?,
            None => AllocationStrategy::default(),
        };

        // Event
        let start = parse_time(
            "EVENT_START",
            &get("EVENT_START").unwrap_or_else(|| DEFAULT_EVENT_START.to_string()),
        )?;
        let end = parse_time(
            "EVENT_END",
            &get("EVENT_END").unwrap_or_else(|| DEFAULT_EVENT_END.to_string()),
        )?;
        let event = EventInfo {
            title: get("EVENT_TITLE").unwrap_or_else(|| DEFAULT_EVENT_TITLE.to_string()),
            venue: get("EVENT_VENUE").unwrap_or_else(|| DEFAULT_EVENT_VENUE.to_string()),
            schedule: EventSchedule::new(start, end)?,
            banner_url: get("EVENT_BANNER_URL"),
        };

        // Announcements
        let channel_id = get("CHANNEL_ID")
            .map(|raw| {
                raw.trim()
                    .parse::<i64>()
                    .map(ChatId)
                    .map_err(|_| Error::Config(format!("CHANNEL_ID is not a chat id: {raw}")))
            })
            .transpose()?;
        let broadcast_on_startup = get("BROADCAST_ON_STARTUP")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);
        let daily_broadcast_hour = parse_num::<u32>(&get, "DAILY_BROADCAST_HOUR")?.unwrap_or(9);
        if daily_broadcast_hour > 23 {
            return Err(Error::Config(format!(
                "DAILY_BROADCAST_HOUR must be 0-23, got {daily_broadcast_hour}"
            )));
        }
        let countdown_refresh =
            Duration::from_secs(parse_num::<u64>(&get, "COUNTDOWN_REFRESH_SECS")?.unwrap_or(10));
        let countdown_lifetime = Duration::from_secs(
            parse_num::<u64>(&get, "COUNTDOWN_LIFETIME_SECS")?.unwrap_or(3600),
        );
        if countdown_refresh.is_zero() {
            return Err(Error::Config(
                "COUNTDOWN_REFRESH_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            telegram_bot_token,
            database_path,
            super_admin,
            allocation_strategy,
            event,
            channel_id,
            broadcast_on_startup,
            daily_broadcast_hour,
            countdown_refresh,
            countdown_lifetime,
        })
    }

    pub fn announce_config(&self) -> AnnounceConfig {
        AnnounceConfig {
            channel: self.channel_id,
            daily_hour: self.daily_broadcast_hour,
            broadcast_on_startup: self.broadcast_on_startup,
            countdown_refresh: self.countdown_refresh,
            countdown_lifetime: self.countdown_lifetime,
        }
    }
}

fn parse_time(key: &str, raw: &str) -> Result<chrono::DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| Error::Config(format!("{key} is not an RFC 3339 timestamp ({raw}): {e}")))
}

fn parse_num<T: std::str::FromStr>(
    get: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} is not a valid number: {raw}"))),
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // environment wins
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(config(&[]), Err(Error::Config(_))));
        assert!(matches!(
            config(&[("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("BOT_TOKEN", "123:abc")]).unwrap();
        assert_eq!(cfg.telegram_bot_token, "123:abc");
        assert_eq!(cfg.database_path, PathBuf::from("data/database.sqlite"));
        assert_eq!(cfg.super_admin, None);
        assert_eq!(cfg.allocation_strategy, AllocationStrategy::Random);
        assert_eq!(cfg.daily_broadcast_hour, 9);
        assert!(cfg.broadcast_on_startup);
        assert_eq!(cfg.countdown_refresh, Duration::from_secs(10));
        assert_eq!(cfg.countdown_lifetime, Duration::from_secs(3600));
        assert_eq!(cfg.channel_id, None);
        assert_eq!(cfg.event.schedule.start.to_rfc3339(), "2025-03-16T12:00:00-04:00");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("SUPER_ADMIN_USERNAME", "@root"),
            ("ALLOCATION_STRATEGY", "sequential"),
            ("CHANNEL_ID", "-1002481834752"),
            ("BROADCAST_ON_STARTUP", "off"),
            ("DAILY_BROADCAST_HOUR", "18"),
            ("EVENT_START", "2030-01-01T10:00:00+01:00"),
            ("EVENT_END", "2030-01-01T20:00:00+01:00"),
            ("EVENT_BANNER_URL", "https://example.com/b.png"),
        ])
        .unwrap();
        assert_eq!(cfg.super_admin.as_ref().unwrap().as_str(), "root");
        assert_eq!(cfg.allocation_strategy, AllocationStrategy::Sequential);
        assert_eq!(cfg.channel_id, Some(ChatId(-1002481834752)));
        assert!(!cfg.broadcast_on_startup);
        assert_eq!(cfg.announce_config().daily_hour, 18);
        assert_eq!(
            cfg.event.banner_url.as_deref(),
            Some("https://example.com/b.png")
        );
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for bad in [
            ("DAILY_BROADCAST_HOUR", "24"),
            ("DAILY_BROADCAST_HOUR", "nine"),
            ("CHANNEL_ID", "channel"),
            ("ALLOCATION_STRATEGY", "lottery"),
            ("EVENT_START", "tomorrow"),
            ("EVENT_END", "2025-03-16T11:00:00-04:00"),
            ("COUNTDOWN_REFRESH_SECS", "0"),
            ("SUPER_ADMIN_USERNAME", "not a handle"),
        ] {
            let result = config(&[("TELEGRAM_BOT_TOKEN", "t"), bad]);
            assert!(matches!(result, Err(Error::Config(_))), "{bad:?} accepted");
        }
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"a b\""), "a b");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("\"x'"), "\"x'");
    }
}
