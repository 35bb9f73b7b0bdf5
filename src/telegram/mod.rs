//! Telegram channel ingestion, QR-code login, and engagement counters.

pub mod auth;
mod fetcher;
mod media;

pub use self::auth::{AuthState, AuthStatus, TelegramManager, TgConfig};
pub use self::fetcher::run_tg_cycle;

use grammers_client::types::Message;

use crate::stats::SocialCounts;

const LINK_PREFIXES: &[&str] = &[
    "https://t.me/",
    "http://t.me/",
    "https://telegram.me/",
    "http://telegram.me/",
];

/// Extracts a public channel name from a t.me link, a `tg://resolve` URI,
/// an `@name`, or a bare name. Private invite links have no resolvable
/// name and yield `None`.
pub fn channel_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if let Some(query) = trimmed.strip_prefix("tg://resolve?domain=") {
        return normalized(query.split('&').next().unwrap_or(""));
    }
    let rest = LINK_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .or_else(|| trimmed.strip_prefix('@'))
        .or_else(|| (!trimmed.contains("://") && !trimmed.contains('/')).then_some(trimmed))?;
    normalized(rest.split(['/', '?', '#']).next().unwrap_or(""))
}

fn normalized(name: &str) -> Option<String> {
    let name = name.trim_start_matches('@');
    if name.is_empty() || name.starts_with('+') || name == "joinchat" {
        return None;
    }
    Some(name.to_string())
}

pub fn permalink(channel: &str, message_id: i32) -> String {
    format!("https://t.me/{channel}/{message_id}")
}

/// Engagement counters for one message, or `None` when the server exposes
/// none of them (private chats, service messages). Reactions map to likes
/// and forwards to reposts.
pub(crate) fn message_counters(message: &Message) -> Option<SocialCounts> {
    let views = message.view_count();
    let forwards = message.forward_count();
    let replies = message.reply_count();
    let reactions = message.reaction_count();
    if views.is_none() && forwards.is_none() && replies.is_none() && reactions.is_none() {
        return None;
    }
    Some(SocialCounts {
        likes: i64::from(reactions.unwrap_or(0)),
        reposts: i64::from(forwards.unwrap_or(0)),
        comments: i64::from(replies.unwrap_or(0)),
        views: i64::from(views.unwrap_or(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_parse_from_common_forms() {
        assert_eq!(channel_from_url("https://t.me/newsroom"), Some("newsroom".into()));
        assert_eq!(channel_from_url("https://t.me/newsroom/42"), Some("newsroom".into()));
        assert_eq!(channel_from_url("http://telegram.me/newsroom?x=1"), Some("newsroom".into()));
        assert_eq!(channel_from_url("tg://resolve?domain=newsroom&post=5"), Some("newsroom".into()));
        assert_eq!(channel_from_url("@newsroom"), Some("newsroom".into()));
        assert_eq!(channel_from_url("newsroom"), Some("newsroom".into()));
    }

    #[test]
    fn invite_links_and_junk_are_rejected() {
        assert_eq!(channel_from_url("https://t.me/+AbCdEf"), None);
        assert_eq!(channel_from_url("https://t.me/joinchat/AbCdEf"), None);
        assert_eq!(channel_from_url("https://t.me/"), None);
        assert_eq!(channel_from_url("https://example.com/newsroom"), None);
    }

    #[test]
    fn permalinks_use_the_public_form() {
        assert_eq!(permalink("newsroom", 42), "https://t.me/newsroom/42");
    }
}
