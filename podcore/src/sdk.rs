//! Collaborator traits for the external chat SDK.
//!
//! The SDK owns transport, auth and wire formats. This crate only needs
//! a way to fetch history pages and to send thread flag changes, each
//! tagged with a correlation key.

use crate::request::{RequestKey, RequestKind};
use crate::types::message::{Message, MessageId};
use crate::types::thread::{ThreadId, ThreadMutation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdkError {
    #[error("server rejected the request: code={code}, message='{message}'")]
    Rejected { code: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("SDK connection closed")]
    Closed,
}

/// One history page request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub thread_id: ThreadId,
    pub key: RequestKey,
    pub kind: RequestKind,
    pub count: usize,
    /// Position from the newest message, for offset fetches.
    pub offset: Option<u64>,
    /// Lower time bound, exclusive.
    pub from_time: Option<DateTime<Utc>>,
    /// Upper time bound, exclusive.
    pub to_time: Option<DateTime<Utc>>,
    /// Message the page should be centered on, for jumps.
    pub around: Option<MessageId>,
}

impl HistoryRequest {
    pub fn new(thread_id: ThreadId, key: RequestKey, kind: RequestKind, count: usize) -> Self {
        Self {
            thread_id,
            key,
            kind,
            count,
            offset: None,
            from_time: None,
            to_time: None,
            around: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_from_time(mut self, from_time: Option<DateTime<Utc>>) -> Self {
        self.from_time = from_time;
        self
    }

    pub fn with_to_time(mut self, to_time: Option<DateTime<Utc>>) -> Self {
        self.to_time = to_time;
        self
    }

    pub fn with_around(mut self, around: MessageId) -> Self {
        self.around = Some(around);
        self
    }
}

/// A fetched page, echoing the key of the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub key: RequestKey,
    pub messages: Vec<Message>,
    pub has_next: bool,
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, request: HistoryRequest) -> Result<HistoryPage, SdkError>;
}

#[async_trait]
pub trait ThreadMutationService: Send + Sync {
    async fn apply(
        &self,
        thread_id: ThreadId,
        mutation: ThreadMutation,
        key: RequestKey,
    ) -> Result<(), SdkError>;
}
