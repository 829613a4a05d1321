//! Typed representations of the Discord API objects the bot touches.
//!
//! Only the slice of the API that the gateway loop, the REST client, and the
//! command dispatcher need is modelled here. Everything else on the wire is
//! ignored by serde.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Discord IDs are snowflakes transmitted as strings in JSON.
pub type Snowflake = String;

// ---------------------------------------------------------------------------
// Gateway payload (the envelope that wraps every WS message)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub author: User,
    #[serde(default)]
    pub content: String,
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }
}

// ---------------------------------------------------------------------------
// READY event payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyEvent {
    pub v: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
}

// ---------------------------------------------------------------------------
// Presence (op 3, what we send)
// ---------------------------------------------------------------------------

/// Activity kind. The bot only ever shows "Playing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum ActivityType {
    Playing = 0,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
}

/// Body of a gateway `UPDATE_PRESENCE` (op 3) payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpdatePresence {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: String,
    pub afk: bool,
}

impl UpdatePresence {
    /// Online with a single "Playing <text>" activity, or no activity at all
    /// when `text` is `None`.
    pub fn playing(text: Option<&str>) -> Self {
        let activities = match text {
            Some(name) => vec![Activity {
                name: name.to_string(),
                kind: ActivityType::Playing,
            }],
            None => Vec::new(),
        };
        Self {
            since: None,
            activities,
            status: "online".to_string(),
            afk: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound message body (for REST POST /channels/{id}/messages)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<Embed>>,
}

impl CreateMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.get_or_insert_with(Vec::new).push(embed);
        self
    }
}

// ---------------------------------------------------------------------------
// Rate-limit info parsed from response headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
    pub is_global: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_test::{assert_tokens, Token};

    #[test]
    fn activity_type_is_integer_encoded() {
        assert_tokens(&ActivityType::Playing, &[Token::U8(0)]);
    }

    #[test]
    fn user_tag_drops_legacy_zero_discriminator() {
        let user: User = serde_json::from_value(json!({
            "id": "1", "username": "fedai", "discriminator": "0"
        }))
        .unwrap();
        assert_eq!(user.tag(), "fedai");

        let legacy: User = serde_json::from_value(json!({
            "id": "1", "username": "fedai", "discriminator": "1234"
        }))
        .unwrap();
        assert_eq!(legacy.tag(), "fedai#1234");
    }

    #[test]
    fn message_parses_minimal_create_payload() {
        let msg: Message = serde_json::from_value(json!({
            "id": "10",
            "channel_id": "20",
            "author": { "id": "30", "username": "someone" },
            "content": "!setgame Among Us",
            "timestamp": "2024-01-01T00:00:00+00:00",
            "tts": false,
            "mentions": []
        }))
        .unwrap();
        assert_eq!(msg.channel_id, "20");
        assert_eq!(msg.author.id, "30");
        assert!(!msg.author.bot);
        assert_eq!(msg.content, "!setgame Among Us");
    }

    #[test]
    fn presence_playing_serializes_single_activity() {
        let value = serde_json::to_value(UpdatePresence::playing(Some("Among Us"))).unwrap();
        assert_eq!(
            value,
            json!({
                "since": null,
                "activities": [{ "name": "Among Us", "type": 0 }],
                "status": "online",
                "afk": false
            })
        );
    }

    #[test]
    fn presence_cleared_has_no_activities() {
        let presence = UpdatePresence::playing(None);
        assert!(presence.activities.is_empty());
        assert_eq!(presence.status, "online");
    }

    #[test]
    fn create_message_skips_unset_fields() {
        let body = CreateMessage::new().content("hi");
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({ "content": "hi" }));
    }

    #[test]
    fn create_message_with_embed() {
        let body = CreateMessage::new().embed(Embed::new().title("t").description("d").color(0x00ff00));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "embeds": [{ "title": "t", "description": "d", "color": 65280 }] })
        );
    }
}
