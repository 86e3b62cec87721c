use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 500;
pub const DEFAULT_UNREAD_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_NOTIFICATION_PREVIEW_CHARS: usize = 50;
pub const DEFAULT_ANNOUNCEMENT: &str = "New volunteers have been assigned to this opportunity";

/// Tunables of the chat core.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Upper bound on a message body, in characters
    pub max_message_chars: usize,
    /// Messages from others newer than this count as unread when a session loads
    pub unread_window: chrono::Duration,
    /// Bound on the whole Loading phase of a session
    pub load_timeout: Duration,
    pub notification_preview_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            unread_window: chrono::Duration::hours(DEFAULT_UNREAD_WINDOW_HOURS),
            load_timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
            notification_preview_chars: DEFAULT_NOTIFICATION_PREVIEW_CHARS,
        }
    }
}

impl ChatConfig {
    /// Reads `PLEDGE_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let hours = parse_or(
            &lookup,
            "PLEDGE_UNREAD_WINDOW_HOURS",
            DEFAULT_UNREAD_WINDOW_HOURS,
        );
        let load_secs = parse_or(&lookup, "PLEDGE_LOAD_TIMEOUT_SECS", DEFAULT_LOAD_TIMEOUT_SECS);

        Self {
            max_message_chars: parse_or(
                &lookup,
                "PLEDGE_MAX_MESSAGE_CHARS",
                defaults.max_message_chars,
            ),
            unread_window: unread_window(hours),
            load_timeout: Duration::from_secs(load_secs),
            notification_preview_chars: parse_or(
                &lookup,
                "PLEDGE_NOTIFICATION_PREVIEW_CHARS",
                defaults.notification_preview_chars,
            ),
        }
    }
}

/// Non-positive or out-of-range hour counts fall back to the default window.
fn unread_window(hours: i64) -> chrono::Duration {
    let window = if hours > 0 { chrono::Duration::try_hours(hours) } else { None };
    window.unwrap_or_else(|| {
        warn!("Ignoring out-of-range PLEDGE_UNREAD_WINDOW_HOURS={}", hours);
        chrono::Duration::hours(DEFAULT_UNREAD_WINDOW_HOURS)
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
