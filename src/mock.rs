//! In-memory stand-ins for the chat SDK, used by tests and the demo binary.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use podcore::request::{Direction, RequestKey, RequestKind};
use podcore::sdk::{HistoryPage, HistoryRequest, HistorySource, SdkError, ThreadMutationService};
use podcore::{Message, MessageId, ThreadId, ThreadMutation};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// A message in `thread_id` sent `id` hours after 2024-01-01 00:00 UTC.
pub fn message_at(thread_id: ThreadId, id: MessageId) -> Message {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    Message::new(id, thread_id, base + ChronoDuration::hours(id))
        .with_sender("user")
        .with_text(format!("message {id}"))
}

/// Blocks callers until permits are released, when enabled.
#[derive(Default)]
struct Gate(Option<Arc<Semaphore>>);

impl Gate {
    async fn pass(&self) -> Result<(), SdkError> {
        match &self.0 {
            Some(gate) => {
                gate.acquire().await.map_err(|_| SdkError::Closed)?.forget();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn release(&self, permits: usize) {
        if let Some(gate) = &self.0 {
            gate.add_permits(permits);
        }
    }
}

/// Serves history pages out of an in-memory conversation.
pub struct MockHistory {
    thread_id: ThreadId,
    messages: Mutex<Vec<Message>>,
    requests: Mutex<Vec<HistoryRequest>>,
    failures: Mutex<VecDeque<SdkError>>,
    gate: Gate,
    delay: Option<Duration>,
}

impl MockHistory {
    pub fn new(thread_id: ThreadId) -> Self {
        Self::with_messages(thread_id, Vec::new())
    }

    pub fn with_messages(
        thread_id: ThreadId,
        messages: impl IntoIterator<Item = Message>,
    ) -> Self {
        let mut messages: Vec<_> = messages.into_iter().collect();
        messages.sort_by_key(|m| (m.time, m.id));
        Self {
            thread_id,
            messages: Mutex::new(messages),
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            gate: Gate::default(),
            delay: None,
        }
    }

    /// Holds every fetch until [`release`](Self::release) is called.
    pub fn gated(mut self) -> Self {
        self.gate = Gate(Some(Arc::new(Semaphore::new(0))));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn release(&self, fetches: usize) {
        self.gate.release(fetches);
    }

    pub async fn fail_next(&self, error: SdkError) {
        self.failures.lock().await.push_back(error);
    }

    /// Adds a message on the "server" side.
    pub async fn push(&self, message: Message) {
        let mut messages = self.messages.lock().await;
        messages.push(message);
        messages.sort_by_key(|m| (m.time, m.id));
    }

    pub async fn requests(&self) -> Vec<HistoryRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    fn page(messages: &[Message], request: &HistoryRequest) -> (Vec<Message>, bool) {
        let count = request.count;
        let older = |to: Option<DateTime<Utc>>| -> (Vec<Message>, bool) {
            let candidates: Vec<_> = messages
                .iter()
                .filter(|m| to.is_none_or(|to| m.time < Some(to)))
                .cloned()
                .collect();
            let skip = candidates.len().saturating_sub(count);
            (candidates[skip..].to_vec(), skip > 0)
        };
        let newer = |from: Option<DateTime<Utc>>| -> (Vec<Message>, bool) {
            let candidates: Vec<_> = messages
                .iter()
                .filter(|m| from.is_none_or(|from| m.time > Some(from)))
                .cloned()
                .collect();
            let has_next = candidates.len() > count;
            (candidates.into_iter().take(count).collect(), has_next)
        };

        match (request.kind.direction(), request.kind) {
            (Direction::Top, _) | (_, RequestKind::ToTime) => older(request.to_time),
            (Direction::Bottom, _) | (_, RequestKind::FromTime) => newer(request.from_time),
            _ => {
                let offset = request.offset.unwrap_or_default() as usize;
                let Some(center) = messages.len().checked_sub(offset + 1) else {
                    return (Vec::new(), false);
                };
                let start = center.saturating_sub(count / 2);
                let end = (start + count).min(messages.len());
                (messages[start..end].to_vec(), start > 0)
            }
        }
    }
}

#[async_trait]
impl HistorySource for MockHistory {
    async fn fetch_history(&self, request: HistoryRequest) -> Result<HistoryPage, SdkError> {
        if request.thread_id != self.thread_id {
            return Err(SdkError::Rejected {
                code: 404,
                message: format!("unknown thread {}", request.thread_id),
            });
        }
        self.requests.lock().await.push(request.clone());
        self.gate.pass().await?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        let (messages, has_next) = Self::page(&self.messages.lock().await, &request);
        Ok(HistoryPage {
            key: request.key,
            messages,
            has_next,
        })
    }
}

/// Records flag changes and answers them in order.
#[derive(Default)]
pub struct MockMutations {
    calls: Mutex<Vec<(ThreadId, ThreadMutation, RequestKey)>>,
    failures: Mutex<VecDeque<SdkError>>,
    gate: Gate,
}

impl MockMutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(mut self) -> Self {
        self.gate = Gate(Some(Arc::new(Semaphore::new(0))));
        self
    }

    pub fn release(&self, calls: usize) {
        self.gate.release(calls);
    }

    pub async fn fail_next(&self, error: SdkError) {
        self.failures.lock().await.push_back(error);
    }

    pub async fn calls(&self) -> Vec<(ThreadId, ThreadMutation)> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(id, mutation, _)| (*id, *mutation))
            .collect()
    }

    pub async fn keys(&self) -> Vec<RequestKey> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(_, _, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ThreadMutationService for MockMutations {
    async fn apply(
        &self,
        thread_id: ThreadId,
        mutation: ThreadMutation,
        key: RequestKey,
    ) -> Result<(), SdkError> {
        self.calls.lock().await.push((thread_id, mutation, key));
        self.gate.pass().await?;
        match self.failures.lock().await.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
