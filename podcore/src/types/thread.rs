//! Conversation summaries shown in the thread list.

use crate::types::message::MessageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub type ThreadId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub id: MessageId,
    pub text: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ThreadId,
    pub title: String,
    pub muted: bool,
    pub pinned: bool,
    pub archived: bool,
    /// When the pin was confirmed. Pinned threads loaded from an older
    /// snapshot may not carry one.
    pub pinned_at: Option<DateTime<Utc>>,
    pub last_message: Option<LastMessage>,
    pub last_seen_message_id: Option<MessageId>,
    pub last_delivered_message_id: Option<MessageId>,
    pub unread_count: u32,
    pub last_activity: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn new(id: ThreadId, title: impl Into<String>, last_activity: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            muted: false,
            pinned: false,
            archived: false,
            pinned_at: None,
            last_message: None,
            last_seen_message_id: None,
            last_delivered_message_id: None,
            unread_count: 0,
            last_activity,
        }
    }

    pub fn flag(&self, flag: ThreadFlag) -> bool {
        match flag {
            ThreadFlag::Archive => self.archived,
            ThreadFlag::Mute => self.muted,
            ThreadFlag::Pin => self.pinned,
        }
    }

    /// Sets a flag without touching the pin time.
    pub fn set_flag(&mut self, flag: ThreadFlag, value: bool) {
        match flag {
            ThreadFlag::Archive => self.archived = value,
            ThreadFlag::Mute => self.muted = value,
            ThreadFlag::Pin => self.pinned = value,
        }
    }

    /// Applies a server-confirmed mutation. Returns true if anything changed.
    pub fn confirm(&mut self, mutation: ThreadMutation, now: DateTime<Utc>) -> bool {
        let before = (self.flag(mutation.flag()), self.pinned_at);
        self.set_flag(mutation.flag(), mutation.value());
        match mutation {
            ThreadMutation::Pin if self.pinned_at.is_none() => self.pinned_at = Some(now),
            ThreadMutation::Unpin => self.pinned_at = None,
            _ => {}
        }
        before != (self.flag(mutation.flag()), self.pinned_at)
    }
}

/// A toggleable conversation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadFlag {
    Archive,
    Mute,
    Pin,
}

/// A flag change sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadMutation {
    Archive,
    Unarchive,
    Mute,
    Unmute,
    Pin,
    Unpin,
}

impl ThreadMutation {
    /// The mutation that flips `flag` away from `current`.
    pub fn toggle(flag: ThreadFlag, current: bool) -> Self {
        match (flag, current) {
            (ThreadFlag::Archive, false) => ThreadMutation::Archive,
            (ThreadFlag::Archive, true) => ThreadMutation::Unarchive,
            (ThreadFlag::Mute, false) => ThreadMutation::Mute,
            (ThreadFlag::Mute, true) => ThreadMutation::Unmute,
            (ThreadFlag::Pin, false) => ThreadMutation::Pin,
            (ThreadFlag::Pin, true) => ThreadMutation::Unpin,
        }
    }

    pub fn flag(&self) -> ThreadFlag {
        match self {
            ThreadMutation::Archive | ThreadMutation::Unarchive => ThreadFlag::Archive,
            ThreadMutation::Mute | ThreadMutation::Unmute => ThreadFlag::Mute,
            ThreadMutation::Pin | ThreadMutation::Unpin => ThreadFlag::Pin,
        }
    }

    /// The flag value this mutation establishes.
    pub fn value(&self) -> bool {
        matches!(
            self,
            ThreadMutation::Archive | ThreadMutation::Mute | ThreadMutation::Pin
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadMutation::Archive => "archive",
            ThreadMutation::Unarchive => "unarchive",
            ThreadMutation::Mute => "mute",
            ThreadMutation::Unmute => "unmute",
            ThreadMutation::Pin => "pin",
            ThreadMutation::Unpin => "unpin",
        }
    }
}

impl fmt::Display for ThreadMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread list order: pinned first (latest pin first, untimed pins last
/// among pins), then most recent activity, then lowest id.
pub fn compare_summaries(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| {
            if a.pinned && b.pinned {
                // Some(_) > None, so reversing puts timed pins first.
                b.pinned_at.cmp(&a.pinned_at)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| b.last_activity.cmp(&a.last_activity))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(compare_summaries);
}
