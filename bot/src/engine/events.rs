use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

/// Raw IRCv3 tags attached to a chat line (badges, display-name, user-id, ...).
pub type Tags = BTreeMap<String, String>;

/// How a subscription was paid for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubMethod {
    pub prime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
}

/// Normalized chat-network event. The chat client produces these; the
/// router is the only consumer.
///
/// Serializes to the bare field map (no tag), which becomes the `meta`
/// object of the log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatNetworkEvent {
    Join {
        channel: String,
        username: String,
        #[serde(rename = "self")]
        is_self: bool,
    },
    Message {
        channel: String,
        username: Option<String>,
        #[serde(rename = "message")]
        text: String,
        tags: Tags,
    },
    Subscription {
        channel: String,
        username: String,
        method: SubMethod,
        message: Option<String>,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    Resub {
        channel: String,
        username: String,
        #[serde(rename = "streakMonths")]
        streak_months: u32,
        #[serde(rename = "cumulativeMonths")]
        cumulative_months: u32,
        method: SubMethod,
        message: Option<String>,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    Raid {
        channel: String,
        username: String,
        #[serde(rename = "viewers")]
        viewer_count: u64,
    },
    MessageDeleted {
        channel: String,
        username: String,
        #[serde(rename = "deleted-message")]
        deleted_text: String,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    Ban {
        channel: String,
        username: String,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    Timeout {
        channel: String,
        username: String,
        reason: Option<String>,
        #[serde(rename = "duration")]
        duration_seconds: u64,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    Cheer {
        channel: String,
        message: String,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    ModChange {
        channel: String,
        username: String,
        granted: bool,
    },
    FollowerModeChange {
        channel: String,
        enabled: bool,
        #[serde(rename = "minutes")]
        min_follow_age_minutes: u32,
    },
    EmoteOnlyChange {
        channel: String,
        enabled: bool,
    },
    AnonSubGift {
        channel: String,
        #[serde(rename = "streakMonths")]
        streak_months: u32,
        recipient: String,
        methods: SubMethod,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    SubGift {
        channel: String,
        username: String,
        #[serde(rename = "streakMonths")]
        streak_months: u32,
        recipient: String,
        methods: SubMethod,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    AnonSubMysteryGift {
        channel: String,
        #[serde(rename = "giftCount")]
        gift_count: u32,
        methods: SubMethod,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
    PrimePaidUpgrade {
        channel: String,
        username: String,
        methods: SubMethod,
        #[serde(rename = "user-state")]
        user_state: Tags,
    },
}

impl ChatNetworkEvent {
    /// Record name used for the log record of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Message { .. } => "message",
            Self::Subscription { .. } => "subscription",
            Self::Resub { .. } => "resub",
            Self::Raid { .. } => "raid",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::Ban { .. } => "ban",
            Self::Timeout { .. } => "timeout",
            Self::Cheer { .. } => "cheer",
            Self::ModChange { .. } => "mod",
            Self::FollowerModeChange { .. } => "followers-only",
            Self::EmoteOnlyChange { .. } => "emote-only",
            Self::AnonSubGift { .. } => "anon-sub-gift",
            Self::SubGift { .. } => "subgift",
            Self::AnonSubMysteryGift { .. } => "anon-sub-mystery-gift",
            Self::PrimePaidUpgrade { .. } => "prime-paid-upgrade",
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Self::Join { channel, .. }
            | Self::Message { channel, .. }
            | Self::Subscription { channel, .. }
            | Self::Resub { channel, .. }
            | Self::Raid { channel, .. }
            | Self::MessageDeleted { channel, .. }
            | Self::Ban { channel, .. }
            | Self::Timeout { channel, .. }
            | Self::Cheer { channel, .. }
            | Self::ModChange { channel, .. }
            | Self::FollowerModeChange { channel, .. }
            | Self::EmoteOnlyChange { channel, .. }
            | Self::AnonSubGift { channel, .. }
            | Self::SubGift { channel, .. }
            | Self::AnonSubMysteryGift { channel, .. }
            | Self::PrimePaidUpgrade { channel, .. } => channel,
        }
    }

    /// Structured payload for the logging sink: `{"meta": {...fields}}`.
    /// Emote ranges are dropped from message tags; they are large and unused.
    pub fn log_payload(&self) -> Value {
        let mut meta = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Self::Message { .. } = self
            && let Some(tags) = meta.get_mut("tags").and_then(Value::as_object_mut)
        {
            tags.remove("emotes");
        }
        json!({ "meta": meta })
    }
}
