use std::sync::LazyLock;

use regex::{Captures, Regex};
use typed_builder::TypedBuilder;

use crate::snowflake::Snowflake;

static LINK_PATTERN: &str = r"https://(?:ptb\.|canary\.)?discord(?:app)?\.com/channels/(?P<guild_id>\d+|@me)/(?P<channel_id>\d+)/(?P<message_id>\d+)";

static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LINK_PATTERN).expect("Failed to compile regex"));

/// The ids carried by a message link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct MessageJumpUrl {
    /// `None` for private channels (`@me` links).
    #[builder(default)]
    pub guild_id: Option<Snowflake>,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
}

impl MessageJumpUrl {
    /// Parses `link` if it is exactly one message link.
    pub fn parse(link: &str) -> Option<Self> {
        let caps = LINK_REGEX.captures(link.trim())?;
        if caps[0].len() != link.trim().len() {
            return None;
        }
        from_captures(&caps)
    }

    /// The first message link found anywhere in `text`.
    pub fn find_first(text: &str) -> Option<Self> {
        LINK_REGEX.captures_iter(text).find_map(|caps| from_captures(&caps))
    }

    pub fn find_all(text: &str) -> Vec<Self> {
        LINK_REGEX
            .captures_iter(text)
            .filter_map(|caps| from_captures(&caps))
            .collect()
    }

    pub fn to_url(&self) -> String {
        let guild = match self.guild_id {
            Some(id) => id.to_string(),
            None => "@me".to_string(),
        };
        format!(
            "https://discord.com/channels/{}/{}/{}",
            guild, self.channel_id, self.message_id
        )
    }
}

fn from_captures(caps: &Captures<'_>) -> Option<MessageJumpUrl> {
    let guild_id = match &caps["guild_id"] {
        "@me" => None,
        raw => Some(raw.parse::<Snowflake>().ok()?),
    };
    // ids longer than u64 are matched by \d+ but are not links
    let channel_id = caps["channel_id"].parse::<Snowflake>().ok()?;
    let message_id = caps["message_id"].parse::<Snowflake>().ok()?;

    Some(
        MessageJumpUrl::builder()
            .guild_id(guild_id)
            .channel_id(channel_id)
            .message_id(message_id)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::MessageJumpUrl;
    use crate::snowflake::Snowflake;

    fn guild_link(guild: u64, channel: u64, message: u64) -> MessageJumpUrl {
        MessageJumpUrl {
            guild_id: Some(Snowflake::new(guild)),
            channel_id: Snowflake::new(channel),
            message_id: Snowflake::new(message),
        }
    }

    #[test]
    fn test_parse_guild_link() {
        let result = MessageJumpUrl::parse("https://discord.com/channels/123/456/789");
        assert_eq!(result, Some(guild_link(123, 456, 789)));
    }

    #[test]
    fn test_parse_private_link() {
        let result = MessageJumpUrl::parse("https://discord.com/channels/@me/456/789").unwrap();
        assert_eq!(result.guild_id, None);
        assert_eq!(result.channel_id, 456);
    }

    #[test]
    fn test_parse_rejects_surrounding_text() {
        assert_eq!(
            MessageJumpUrl::parse("see https://discord.com/channels/1/2/3"),
            None
        );
    }

    #[test]
    fn test_parse_discordapp_and_canary() {
        assert!(MessageJumpUrl::parse("https://discordapp.com/channels/1/2/3").is_some());
        assert!(MessageJumpUrl::parse("https://canary.discord.com/channels/1/2/3").is_some());
        assert!(MessageJumpUrl::parse("https://example.com/channels/1/2/3").is_none());
    }

    #[test]
    fn test_parse_overflowing_id() {
        assert_eq!(
            MessageJumpUrl::parse("https://discord.com/channels/1/2/99999999999999999999999"),
            None
        );
    }

    #[test]
    fn test_find_first_returns_first() {
        let text = "Hello, world! https://discord.com/channels/123/456/789 https://discord.com/channels/101112/131415/161718";
        assert_eq!(
            MessageJumpUrl::find_first(text),
            Some(guild_link(123, 456, 789))
        );
        assert_eq!(MessageJumpUrl::find_first("Hello, world!"), None);
    }

    #[test]
    fn test_find_all_keeps_order() {
        let text = "a https://discord.com/channels/1/2/3 b https://ptb.discord.com/channels/@me/5/6";
        let links = MessageJumpUrl::find_all(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], guild_link(1, 2, 3));
        assert_eq!(links[1].guild_id, None);
    }

    #[test]
    fn test_to_url() {
        assert_eq!(
            guild_link(1, 2, 3).to_url(),
            "https://discord.com/channels/1/2/3"
        );
        let private = MessageJumpUrl::parse("https://discord.com/channels/@me/5/6").unwrap();
        assert_eq!(private.to_url(), "https://discord.com/channels/@me/5/6");
    }
}
