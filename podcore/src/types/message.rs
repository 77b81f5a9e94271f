//! Message rows as they are cached for display.

use crate::types::thread::ThreadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MessageId = i64;

/// Delivery progress of a message.
///
/// Ordered so that a later receipt can never be overwritten by an
/// earlier one arriving late.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum ReceiptState {
    Failed,
    #[default]
    Pending,
    Sent,
    Delivered,
    Seen,
}

impl ReceiptState {
    /// Combines a resident receipt with an incoming one.
    pub fn merge(self, incoming: ReceiptState) -> ReceiptState {
        match (self, incoming) {
            (ReceiptState::Pending, ReceiptState::Failed) => ReceiptState::Failed,
            (ReceiptState::Failed, other) => other,
            (current, other) => current.max(other),
        }
    }
}

/// Indicator shown next to an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIcon {
    None,
    Clock,
    SingleTick,
    DoubleTick,
    SeenDoubleTick,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    /// Absent when the server sent a row without a usable time.
    pub time: Option<DateTime<Utc>>,
    pub sender: String,
    pub text: String,
    pub is_from_me: bool,
    pub receipt: ReceiptState,
}

impl Message {
    pub fn new(id: MessageId, thread_id: ThreadId, time: DateTime<Utc>) -> Self {
        Self {
            id,
            thread_id,
            time: Some(time),
            sender: String::new(),
            text: String::new(),
            is_from_me: false,
            receipt: ReceiptState::Sent,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn outgoing(mut self, receipt: ReceiptState) -> Self {
        self.is_from_me = true;
        self.receipt = receipt;
        self
    }
}

/// One message plus the display state derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    message: Message,
    icon: StatusIcon,
    highlighted: bool,
}

impl MessageRow {
    pub fn new(message: Message) -> Self {
        let icon = Self::icon_for(&message);
        Self {
            message,
            icon,
            highlighted: false,
        }
    }

    fn icon_for(message: &Message) -> StatusIcon {
        if !message.is_from_me {
            return StatusIcon::None;
        }
        match message.receipt {
            ReceiptState::Failed => StatusIcon::Error,
            ReceiptState::Pending => StatusIcon::Clock,
            ReceiptState::Sent => StatusIcon::SingleTick,
            ReceiptState::Delivered => StatusIcon::DoubleTick,
            ReceiptState::Seen => StatusIcon::SeenDoubleTick,
        }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.message.time
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn icon(&self) -> StatusIcon {
        self.icon
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn is_highlighted(&self) -> bool {
        self.highlighted
    }

    pub(crate) fn set_highlighted(&mut self, highlighted: bool) {
        self.highlighted = highlighted;
    }

    /// Replaces the wrapped message with a fresher copy of itself.
    ///
    /// The receipt never moves backwards and the highlight survives. The
    /// resident timestamp is kept, it decides the row's section and slot.
    pub(crate) fn refresh(&mut self, mut incoming: Message) {
        incoming.time = self.message.time;
        incoming.receipt = self.message.receipt.merge(incoming.receipt);
        self.icon = Self::icon_for(&incoming);
        self.message = incoming;
    }

    /// Returns true if the receipt changed.
    pub(crate) fn apply_receipt(&mut self, receipt: ReceiptState) -> bool {
        let merged = self.message.receipt.merge(receipt);
        if merged == self.message.receipt {
            return false;
        }
        self.message.receipt = merged;
        self.icon = Self::icon_for(&self.message);
        true
    }
}

impl From<Message> for MessageRow {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}
