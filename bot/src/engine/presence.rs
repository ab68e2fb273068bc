use std::collections::HashSet;

use dashmap::DashMap;

/// Usernames observed per channel since process start. Entries never expire.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    channels: DashMap<String, HashSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `username` was seen in `channel`. Idempotent.
    pub fn record_presence(&self, channel: &str, username: &str) {
        if let Some(mut users) = self.channels.get_mut(channel) {
            if !users.contains(username) {
                users.insert(username.to_string());
            }
            return;
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(username.to_string());
    }

    /// Distinct usernames across every channel; a user seen in N channels counts once.
    pub fn watcher_count(&self) -> usize {
        // Hold every shard's read guard so the union borrows instead of cloning.
        let guards: Vec<_> = self.channels.iter().collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for entry in &guards {
            seen.extend(entry.value().iter().map(String::as_str));
        }
        seen.len()
    }

    /// Channels with at least one recorded presence.
    pub fn channel_count(&self) -> usize {
        self.channels.iter().filter(|c| !c.is_empty()).count()
    }

    #[cfg(test)]
    pub(crate) fn users_in(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|u| u.len()).unwrap_or(0)
    }
}
