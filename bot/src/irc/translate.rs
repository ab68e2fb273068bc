//! Twitch IRC lines -> `ChatNetworkEvent`.

use crate::engine::events::{ChatNetworkEvent, SubMethod, Tags};

use super::parser::IrcMessage;

/// Login Twitch uses for gifts from anonymous users.
const ANONYMOUS_GIFTER: &str = "ananonymousgifter";

/// Canonical channel key: lowercase, without the leading `#`.
pub fn canonical_channel(raw: &str) -> String {
    raw.trim_start_matches('#').to_lowercase()
}

/// Translate one inbound line. Lines that carry no chat event (numerics,
/// PING, CAP, GLOBALUSERSTATE, ...) yield `None`.
pub fn translate(msg: &IrcMessage, own_nick: &str) -> Option<ChatNetworkEvent> {
    let channel = canonical_channel(msg.param(0)?);

    match msg.command.as_str() {
        "JOIN" => {
            let username = msg.nick()?.to_string();
            let is_self = username.eq_ignore_ascii_case(own_nick);
            Some(ChatNetworkEvent::Join {
                channel,
                username,
                is_self,
            })
        }
        "PRIVMSG" => {
            let text = msg.param(1).unwrap_or_default().to_string();
            let mut tags = msg.tags.clone();
            let username = msg.nick().map(str::to_string);
            if let Some(ref name) = username {
                tags.insert("username".into(), name.clone());
            }

            if msg.tag("bits").is_some() {
                return Some(ChatNetworkEvent::Cheer {
                    channel,
                    message: text,
                    user_state: tags,
                });
            }
            Some(ChatNetworkEvent::Message {
                channel,
                username,
                text,
                tags,
            })
        }
        "USERNOTICE" => translate_usernotice(msg, channel),
        "CLEARMSG" => Some(ChatNetworkEvent::MessageDeleted {
            channel,
            username: msg.tag("login")?.to_string(),
            deleted_text: msg.param(1).unwrap_or_default().to_string(),
            user_state: msg.tags.clone(),
        }),
        "CLEARCHAT" => {
            // Without a target the whole chat was cleared; not a moderation event on a user.
            let username = msg.param(1)?.to_string();
            match msg.tag("ban-duration").and_then(|d| d.parse().ok()) {
                Some(duration_seconds) => Some(ChatNetworkEvent::Timeout {
                    channel,
                    username,
                    reason: msg.tag("ban-reason").map(str::to_string),
                    duration_seconds,
                    user_state: msg.tags.clone(),
                }),
                None => Some(ChatNetworkEvent::Ban {
                    channel,
                    username,
                    user_state: msg.tags.clone(),
                }),
            }
        }
        "MODE" => {
            let granted = match msg.param(1)? {
                "+o" => true,
                "-o" => false,
                _ => return None,
            };
            Some(ChatNetworkEvent::ModChange {
                channel,
                username: msg.param(2)?.to_string(),
                granted,
            })
        }
        "ROOMSTATE" => translate_roomstate(msg, channel),
        _ => None,
    }
}

fn translate_usernotice(msg: &IrcMessage, channel: String) -> Option<ChatNetworkEvent> {
    let user_state = msg.tags.clone();
    let login = msg.tag("login").unwrap_or_default().to_string();
    let message = msg.param(1).map(str::to_string);

    let event = match msg.tag("msg-id")? {
        "sub" => ChatNetworkEvent::Subscription {
            channel,
            username: login,
            method: sub_method(msg),
            message,
            user_state,
        },
        "resub" => ChatNetworkEvent::Resub {
            channel,
            username: login,
            streak_months: number_tag(msg, "msg-param-streak-months"),
            cumulative_months: number_tag(msg, "msg-param-cumulative-months"),
            method: sub_method(msg),
            message,
            user_state,
        },
        "raid" => ChatNetworkEvent::Raid {
            channel,
            username: msg
                .tag("msg-param-login")
                .or(msg.tag("msg-param-displayName"))
                .unwrap_or(login.as_str())
                .to_string(),
            viewer_count: msg
                .tag("msg-param-viewerCount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        },
        "subgift" | "anonsubgift" => {
            let recipient = msg
                .tag("msg-param-recipient-user-name")
                .unwrap_or_default()
                .to_string();
            let streak_months = number_tag(msg, "msg-param-months");
            if login.is_empty() || login == ANONYMOUS_GIFTER {
                ChatNetworkEvent::AnonSubGift {
                    channel,
                    streak_months,
                    recipient,
                    methods: sub_method(msg),
                    user_state,
                }
            } else {
                ChatNetworkEvent::SubGift {
                    channel,
                    username: login,
                    streak_months,
                    recipient,
                    methods: sub_method(msg),
                    user_state,
                }
            }
        }
        "anonsubmysterygift" => ChatNetworkEvent::AnonSubMysteryGift {
            channel,
            gift_count: number_tag(msg, "msg-param-mass-gift-count"),
            methods: sub_method(msg),
            user_state,
        },
        "submysterygift" if login == ANONYMOUS_GIFTER => ChatNetworkEvent::AnonSubMysteryGift {
            channel,
            gift_count: number_tag(msg, "msg-param-mass-gift-count"),
            methods: sub_method(msg),
            user_state,
        },
        "primepaidupgrade" => ChatNetworkEvent::PrimePaidUpgrade {
            channel,
            username: login,
            methods: sub_method(msg),
            user_state,
        },
        _ => return None,
    };
    Some(event)
}

/// A ROOMSTATE carrying a single setting is a live mode change; the full state
/// sent on join is not reported.
fn translate_roomstate(msg: &IrcMessage, channel: String) -> Option<ChatNetworkEvent> {
    let settings: Tags = msg
        .tags
        .iter()
        .filter(|(k, _)| k.as_str() != "room-id")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if settings.len() != 1 {
        return None;
    }

    if let Some(value) = settings.get("followers-only") {
        let minutes: i64 = value.parse().ok()?;
        return Some(ChatNetworkEvent::FollowerModeChange {
            channel,
            enabled: minutes >= 0,
            min_follow_age_minutes: u32::try_from(minutes.max(0)).unwrap_or(u32::MAX),
        });
    }
    if let Some(value) = settings.get("emote-only") {
        return Some(ChatNetworkEvent::EmoteOnlyChange {
            channel,
            enabled: value == "1",
        });
    }
    None
}

fn sub_method(msg: &IrcMessage) -> SubMethod {
    let plan = msg.tag("msg-param-sub-plan").map(str::to_string);
    SubMethod {
        prime: plan.as_deref() == Some("Prime"),
        plan,
        plan_name: msg.tag("msg-param-sub-plan-name").map(str::to_string),
    }
}

fn number_tag(msg: &IrcMessage, key: &str) -> u32 {
    msg.tag(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}
