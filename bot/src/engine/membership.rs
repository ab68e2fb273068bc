use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

/// Lifecycle of a channel from the bot's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Known, not yet attempted.
    Candidate,
    /// A join call is outstanding.
    Joining,
    /// The network confirmed our own join.
    Joined,
    /// The join was refused or timed out. Terminal for the process lifetime.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub state: ChannelState,
    /// Diagnostics only.
    pub last_transition: DateTime<Utc>,
}

impl ChannelRecord {
    fn new(state: ChannelState) -> Self {
        Self {
            state,
            last_transition: Utc::now(),
        }
    }

    fn transition(&mut self, state: ChannelState) {
        self.state = state;
        self.last_transition = Utc::now();
    }
}

/// Per-state channel counts taken in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MembershipCounts {
    pub candidate: usize,
    pub joining: usize,
    pub joined: usize,
    pub failed: usize,
}

/// Every channel the bot has ever considered, keyed by canonical name.
/// Records are never removed.
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    channels: DashMap<String, ChannelRecord>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Candidate` record if the channel is unknown.
    pub fn ensure_candidate(&self, channel: &str) {
        if self.channels.contains_key(channel) {
            return;
        }
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelRecord::new(ChannelState::Candidate));
    }

    /// Admission control for joins: `Candidate -> Joining`. Returns false and
    /// leaves the record untouched in every other state, including unknown channels.
    pub fn try_begin_join(&self, channel: &str) -> bool {
        match self.channels.get_mut(channel) {
            Some(mut record) if record.state == ChannelState::Candidate => {
                record.transition(ChannelState::Joining);
                true
            }
            _ => false,
        }
    }

    /// Self-join events are authoritative: whatever the current state (or none),
    /// the channel ends up `Joined`.
    pub fn mark_joined(&self, channel: &str) {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().state != ChannelState::Joined {
                    slot.get_mut().transition(ChannelState::Joined);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(ChannelRecord::new(ChannelState::Joined));
            }
        }
    }

    /// `Joining -> Failed`. Returns false if the channel was not `Joining`
    /// (for instance because its self-join already arrived).
    pub fn mark_failed(&self, channel: &str) -> bool {
        match self.channels.get_mut(channel) {
            Some(mut record) if record.state == ChannelState::Joining => {
                record.transition(ChannelState::Failed);
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, channel: &str) -> Option<ChannelState> {
        self.channels.get(channel).map(|r| r.state)
    }

    #[cfg(test)]
    pub(crate) fn record(&self, channel: &str) -> Option<ChannelRecord> {
        self.channels.get(channel).map(|r| r.clone())
    }

    pub fn count_by_state(&self, state: ChannelState) -> usize {
        self.channels.iter().filter(|r| r.state == state).count()
    }

    pub fn counts(&self) -> MembershipCounts {
        let mut counts = MembershipCounts::default();
        for record in self.channels.iter() {
            match record.state {
                ChannelState::Candidate => counts.candidate += 1,
                ChannelState::Joining => counts.joining += 1,
                ChannelState::Joined => counts.joined += 1,
                ChannelState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Snapshot of channel names currently in any of `states`.
    pub fn channels_in(&self, states: &[ChannelState]) -> BTreeSet<String> {
        self.channels
            .iter()
            .filter(|r| states.contains(&r.state))
            .map(|r| r.key().clone())
            .collect()
    }
}
