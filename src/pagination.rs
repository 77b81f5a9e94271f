//! History paging for one open conversation.
//!
//! Every fetch is tagged with a [`RequestKey`] and registered as pending
//! before it leaves. A response is only applied if its key still maps to
//! a live pending request, so late, duplicate or superseded pages fall on
//! the floor without touching the window. Each direction is single-flight:
//! a second request while one is outstanding is dropped, and a direction
//! that reported `has_next = false` stays exhausted until [`reset`].
//!
//! [`reset`]: PaginationController::reset

use crate::config::SyncConfig;
use crate::types::events::{EventBus, HistoryEvent, HistoryEventKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use podcore::request::{Direction, RequestKey, RequestKeys, RequestKind, SessionId};
use podcore::sdk::{HistoryRequest, HistorySource, SdkError};
use podcore::window::{Edge, InsertReport, MessageSection, MessageWindow, ReconcileOutcome};
use podcore::{Message, MessageId, MessageRow, ReceiptState, ThreadId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("history request timed out")]
    Timeout,
    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),
    #[error("direction '{0}' is anchored and cannot be paged")]
    NotPageable(Direction),
}

impl FetchError {
    /// Whether asking again later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Sdk(SdkError::Network(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    Idle,
    Pending,
    /// The server reported no more history this way.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub key: RequestKey,
    pub kind: RequestKind,
    pub thread_id: ThreadId,
    /// Jump target, for anchored fetches.
    pub around: Option<MessageId>,
    /// Set for the first top page of an empty window, which is the newest page.
    pub opens_at_newest: bool,
    pub created_at: Instant,
    seq: u64,
    /// Jump that issued this request, for anchored fetches.
    epoch: Option<u64>,
}

impl PendingRequest {
    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    AlreadyPending,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPage {
    pub kind: RequestKind,
    pub inserted: usize,
    pub replaced: usize,
    pub rejected: usize,
    pub has_next: bool,
    /// Present for pages that re-centered the window on a jump target.
    pub reconciled: Option<ReconcileOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Applied(AppliedPage),
    /// No request was sent.
    Dropped(DropReason),
    /// The response no longer matched a live request and was discarded.
    Stale,
}

/// Where to jump when the target message is not resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpAnchor {
    Time {
        message_id: MessageId,
        time: DateTime<Utc>,
    },
    Offset {
        message_id: MessageId,
        offset: u64,
    },
}

impl JumpAnchor {
    pub fn message_id(&self) -> MessageId {
        match self {
            JumpAnchor::Time { message_id, .. } | JumpAnchor::Offset { message_id, .. } => {
                *message_id
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    /// Already in the window; highlighted without fetching.
    Resident,
    /// Fetched and highlighted.
    Loaded,
    /// Fetched, but the server page did not contain the target.
    NotFound,
    Dropped(DropReason),
    /// A reset or a newer jump overtook this one.
    Superseded,
}

struct ControllerState {
    keys: RequestKeys,
    window: MessageWindow,
    directions: HashMap<Direction, DirectionState>,
    pending: HashMap<RequestKey, PendingRequest>,
    requested: HashSet<Direction>,
    after_jump: HashSet<Direction>,
    next_seq: u64,
    // Bumped by every jump and reset; anchored pages of older jumps are stale.
    jump_epoch: u64,
}

impl ControllerState {
    fn new(session: SessionId) -> Self {
        Self {
            keys: RequestKeys::new(session),
            window: MessageWindow::new(),
            directions: HashMap::new(),
            pending: HashMap::new(),
            requested: HashSet::new(),
            after_jump: HashSet::new(),
            next_seq: 0,
            jump_epoch: 0,
        }
    }

    fn direction_state(&self, direction: Direction) -> DirectionState {
        self.directions
            .get(&direction)
            .copied()
            .unwrap_or(DirectionState::Idle)
    }

    /// Picks the key kind for a scroll-driven page.
    fn kind_for(&self, direction: Direction) -> Option<RequestKind> {
        let first = !self.requested.contains(&direction);
        let after_jump = self.after_jump.contains(&direction);
        match direction {
            Direction::Top if first => Some(RequestKind::MoreTopFirstScenario),
            Direction::Top if after_jump => Some(RequestKind::MoreTopSecondScenario),
            Direction::Top => Some(RequestKind::MoreTop),
            Direction::Bottom if first => Some(RequestKind::MoreBottomFirstScenario),
            Direction::Bottom if after_jump => Some(RequestKind::MoreBottomFifthScenario),
            Direction::Bottom => Some(RequestKind::MoreBottom),
            Direction::Offset | Direction::TimeRange => None,
        }
    }

    fn begin(
        &mut self,
        thread_id: ThreadId,
        kind: RequestKind,
        around: Option<MessageId>,
        epoch: Option<u64>,
    ) -> Result<PendingRequest, DropReason> {
        let direction = kind.direction();
        match self.direction_state(direction) {
            DirectionState::Pending => return Err(DropReason::AlreadyPending),
            DirectionState::Exhausted => return Err(DropReason::Exhausted),
            DirectionState::Idle => {}
        }
        self.next_seq += 1;
        let pending = PendingRequest {
            key: self.keys.key(kind),
            kind,
            thread_id,
            around,
            opens_at_newest: direction == Direction::Top && self.window.is_empty(),
            created_at: Instant::now(),
            seq: self.next_seq,
            epoch,
        };
        self.pending.insert(pending.key.clone(), pending.clone());
        self.directions.insert(direction, DirectionState::Pending);
        self.requested.insert(direction);
        self.after_jump.remove(&direction);
        Ok(pending)
    }

    /// Frees the direction of the request with this exact sequence number,
    /// if it is still pending.
    fn abandon(&mut self, key: &RequestKey, seq: u64) -> bool {
        if !self.pending.get(key).is_some_and(|p| p.seq == seq) {
            return false;
        }
        if let Some(pending) = self.pending.remove(key) {
            self.directions
                .insert(pending.direction(), DirectionState::Idle);
        }
        true
    }

    /// Drops in-flight edge pages after the window was re-centered; their
    /// anchors point into a window that no longer exists.
    fn orphan_edges(&mut self) {
        self.pending
            .retain(|_, p| !matches!(p.direction(), Direction::Top | Direction::Bottom));
        self.directions.insert(Direction::Top, DirectionState::Idle);
        self.directions
            .insert(Direction::Bottom, DirectionState::Idle);
        self.after_jump.insert(Direction::Top);
        self.after_jump.insert(Direction::Bottom);
    }

    /// Forgets the anchored fetches of an earlier jump.
    fn drop_anchored(&mut self) {
        let mut freed = Vec::new();
        self.pending.retain(|_, p| {
            if p.epoch.is_some() {
                freed.push(p.direction());
            }
            p.epoch.is_none()
        });
        for direction in freed {
            self.directions.insert(direction, DirectionState::Idle);
        }
    }

    fn exhaust_unless(&mut self, direction: Direction, has_next: bool) {
        if !has_next {
            self.directions
                .insert(direction, DirectionState::Exhausted);
        }
    }
}

/// Pages one conversation's history into its [`MessageWindow`].
pub struct PaginationController {
    thread_id: ThreadId,
    source: Arc<dyn HistorySource>,
    config: SyncConfig,
    events: Arc<EventBus>,
    state: Mutex<ControllerState>,
}

impl PaginationController {
    pub fn new(
        thread_id: ThreadId,
        source: Arc<dyn HistorySource>,
        config: SyncConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_session(thread_id, SessionId::new(), source, config, events)
    }

    pub fn with_session(
        thread_id: ThreadId,
        session: SessionId,
        source: Arc<dyn HistorySource>,
        config: SyncConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            thread_id,
            source,
            config,
            events,
            state: Mutex::new(ControllerState::new(session)),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub async fn session(&self) -> SessionId {
        self.state.lock().await.keys.session()
    }

    pub async fn key(&self, kind: RequestKind) -> RequestKey {
        self.state.lock().await.keys.key(kind)
    }

    pub async fn state(&self, direction: Direction) -> DirectionState {
        self.state.lock().await.direction_state(direction)
    }

    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        self.state.lock().await.pending.values().cloned().collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Display snapshot of the window.
    pub async fn snapshot(&self) -> Vec<MessageSection> {
        self.state.lock().await.window.snapshot()
    }

    pub async fn with_window<R>(&self, f: impl FnOnce(&MessageWindow) -> R) -> R {
        f(&self.state.lock().await.window)
    }

    pub async fn highlighted(&self) -> Option<MessageId> {
        self.state.lock().await.window.highlighted()
    }

    /// Loads the next page at the top or bottom edge.
    pub async fn request_more(
        self: &Arc<Self>,
        direction: Direction,
    ) -> Result<PageOutcome, FetchError> {
        let (request, seq) = {
            let mut state = self.state.lock().await;
            let kind = state
                .kind_for(direction)
                .ok_or(FetchError::NotPageable(direction))?;
            let pending = match state.begin(self.thread_id, kind, None, None) {
                Ok(pending) => pending,
                Err(reason) => {
                    debug!(
                        target: "Pagination",
                        "Dropping {direction} request for thread {}: {reason:?}",
                        self.thread_id
                    );
                    return Ok(PageOutcome::Dropped(reason));
                }
            };
            let request = HistoryRequest::new(
                self.thread_id,
                pending.key.clone(),
                kind,
                self.config.page_size,
            );
            let request = match direction {
                Direction::Top => request
                    .with_to_time(state.window.first_message().and_then(MessageRow::time)),
                _ => request
                    .with_from_time(state.window.last_message().and_then(MessageRow::time)),
            };
            (request, pending.seq)
        };
        self.dispatch(request, seq).await
    }

    /// Applies a page delivered for `key`.
    ///
    /// Pages whose key has no live pending request are discarded without
    /// touching the window.
    pub async fn on_response(
        &self,
        key: &RequestKey,
        messages: Vec<Message>,
        has_next: bool,
    ) -> PageOutcome {
        self.complete(key, None, messages, has_next).await
    }

    /// Brings `anchor`'s message into view and highlights it.
    pub async fn jump_to(
        self: &Arc<Self>,
        anchor: JumpAnchor,
    ) -> Result<JumpOutcome, FetchError> {
        let target = anchor.message_id();
        let epoch = {
            let mut state = self.state.lock().await;
            state.jump_epoch += 1;
            let epoch = state.jump_epoch;
            state.drop_anchored();
            if state.window.highlight(target) {
                drop(state);
                self.emit(HistoryEventKind::Highlighted(target));
                return Ok(JumpOutcome::Resident);
            }
            epoch
        };

        info!(target: "Pagination", "Jumping to message {target} in thread {}", self.thread_id);
        match anchor {
            JumpAnchor::Time { time, .. } => {
                // Upper bound is exclusive, so nudge it past the target.
                let before = self
                    .anchored(RequestKind::ToTime, target, epoch, |req| {
                        req.with_to_time(Some(time + ChronoDuration::milliseconds(1)))
                    })
                    .await?;
                match before {
                    PageOutcome::Dropped(reason) => return Ok(JumpOutcome::Dropped(reason)),
                    PageOutcome::Stale => return Ok(JumpOutcome::Superseded),
                    PageOutcome::Applied(page)
                        if page.reconciled == Some(ReconcileOutcome::Resident) =>
                    {
                        return Ok(JumpOutcome::Resident);
                    }
                    PageOutcome::Applied(_) => {}
                }
                let after = self
                    .anchored(RequestKind::FromTime, target, epoch, |req| {
                        req.with_from_time(Some(time))
                    })
                    .await?;
                match after {
                    PageOutcome::Dropped(reason) => return Ok(JumpOutcome::Dropped(reason)),
                    PageOutcome::Stale => return Ok(JumpOutcome::Superseded),
                    PageOutcome::Applied(_) => {}
                }
            }
            JumpAnchor::Offset { offset, .. } => {
                let page = self
                    .anchored(RequestKind::FetchByOffset, target, epoch, |req| {
                        req.with_offset(offset)
                    })
                    .await?;
                match page {
                    PageOutcome::Dropped(reason) => return Ok(JumpOutcome::Dropped(reason)),
                    PageOutcome::Stale => return Ok(JumpOutcome::Superseded),
                    PageOutcome::Applied(page)
                        if page.reconciled == Some(ReconcileOutcome::Resident) =>
                    {
                        return Ok(JumpOutcome::Resident);
                    }
                    PageOutcome::Applied(_) => {}
                }
            }
        }

        let state = self.state.lock().await;
        if state.jump_epoch != epoch {
            return Ok(JumpOutcome::Superseded);
        }
        Ok(if state.window.highlighted() == Some(target) {
            JumpOutcome::Loaded
        } else {
            JumpOutcome::NotFound
        })
    }

    /// Appends a live message if the window already reaches the newest
    /// history. Returns false when the user has to page down to see it.
    pub async fn append_live(&self, message: Message) -> bool {
        let mut state = self.state.lock().await;
        let at_newest = state.direction_state(Direction::Bottom) == DirectionState::Exhausted;
        if !at_newest && !state.window.contains(message.id) {
            return false;
        }
        match state.window.insert_row(MessageRow::new(message), Edge::Bottom) {
            Ok(_) => true,
            Err(err) => {
                warn!(target: "Pagination", "Ignoring live message: {err}");
                false
            }
        }
    }

    pub async fn apply_receipt(&self, message_id: MessageId, receipt: ReceiptState) -> bool {
        self.state
            .lock()
            .await
            .window
            .update_receipt(message_id, receipt)
    }

    pub async fn remove_message(&self, message_id: MessageId) -> Option<MessageRow> {
        self.state.lock().await.window.remove(message_id)
    }

    /// Forgets the window and every direction state. In-flight requests
    /// are orphaned by rotating the session, so their keys go stale.
    pub async fn reset(&self) {
        {
            let mut state = self.state.lock().await;
            let epoch = state.jump_epoch + 1;
            *state = ControllerState::new(SessionId::new());
            state.jump_epoch = epoch;
        }
        debug!(target: "Pagination", "Reset window of thread {}", self.thread_id);
        self.emit(HistoryEventKind::Reset);
    }

    async fn anchored(
        self: &Arc<Self>,
        kind: RequestKind,
        target: MessageId,
        epoch: u64,
        build: impl FnOnce(HistoryRequest) -> HistoryRequest,
    ) -> Result<PageOutcome, FetchError> {
        let (request, seq) = {
            let mut state = self.state.lock().await;
            if state.jump_epoch != epoch {
                debug!(
                    target: "Pagination",
                    "Not sending {kind} for thread {}: jump superseded",
                    self.thread_id
                );
                return Ok(PageOutcome::Stale);
            }
            let begun = state.begin(self.thread_id, kind, Some(target), Some(epoch));
            let pending = match begun {
                Ok(pending) => pending,
                Err(reason) => return Ok(PageOutcome::Dropped(reason)),
            };
            let request = HistoryRequest::new(
                self.thread_id,
                pending.key.clone(),
                kind,
                self.config.jump_page_size,
            )
            .with_around(target);
            (build(request), pending.seq)
        };
        self.dispatch(request, seq).await
    }

    async fn dispatch(
        self: &Arc<Self>,
        request: HistoryRequest,
        seq: u64,
    ) -> Result<PageOutcome, FetchError> {
        let key = request.key.clone();
        debug!(target: "Pagination", "Fetching {} for thread {}", key, self.thread_id);

        // Frees the direction if this future is dropped mid-fetch.
        let guard = scopeguard::guard((self.clone(), key.clone()), move |(controller, key)| {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    controller.state.lock().await.abandon(&key, seq);
                });
            }
        });

        let fetched = timeout(
            self.config.request_timeout,
            self.source.fetch_history(request),
        )
        .await;

        let result = match fetched {
            Ok(Ok(page)) => {
                let outcome = if page.key == key {
                    self.complete(&key, Some(seq), page.messages, page.has_next)
                        .await
                } else {
                    warn!(
                        target: "Pagination",
                        "SDK answered {} with a page for {}",
                        key,
                        page.key
                    );
                    self.complete(&page.key, None, page.messages, page.has_next)
                        .await
                };
                self.state.lock().await.abandon(&key, seq);
                Ok(outcome)
            }
            Ok(Err(e)) => {
                warn!(target: "Pagination", "History fetch {key} failed: {e}");
                self.state.lock().await.abandon(&key, seq);
                Err(FetchError::Sdk(e))
            }
            Err(_) => {
                warn!(
                    target: "Pagination",
                    "History fetch {key} timed out after {:?}",
                    self.config.request_timeout
                );
                self.state.lock().await.abandon(&key, seq);
                Err(FetchError::Timeout)
            }
        };
        scopeguard::ScopeGuard::into_inner(guard);
        result
    }

    async fn complete(
        &self,
        key: &RequestKey,
        seq: Option<u64>,
        messages: Vec<Message>,
        has_next: bool,
    ) -> PageOutcome {
        let mut state = self.state.lock().await;
        let live = state
            .pending
            .get(key)
            .is_some_and(|p| seq.is_none_or(|s| p.seq == s));
        let mut pending = if live { state.pending.remove(key) } else { None };
        let current_epoch = state.jump_epoch;
        if let Some(superseded) =
            pending.take_if(|p| p.epoch.is_some_and(|epoch| epoch != current_epoch))
        {
            state
                .directions
                .insert(superseded.direction(), DirectionState::Idle);
        }
        let Some(pending) = pending else {
            drop(state);
            debug!(target: "Pagination", "Discarding stale response {key}");
            self.emit(HistoryEventKind::StaleResponse(key.clone()));
            return PageOutcome::Stale;
        };

        let direction = pending.direction();
        state.directions.insert(direction, DirectionState::Idle);
        let rows = messages.into_iter().map(MessageRow::new);

        let mut reconciled = None;
        let report: InsertReport = match (direction, pending.kind, pending.around) {
            (Direction::Top, _, _) => {
                let report = state.window.insert(rows, Edge::Top);
                state.exhaust_unless(Direction::Top, has_next);
                if pending.opens_at_newest
                    && state.direction_state(Direction::Bottom) == DirectionState::Idle
                {
                    state
                        .directions
                        .insert(Direction::Bottom, DirectionState::Exhausted);
                }
                report
            }
            (Direction::Bottom, _, _) => {
                let report = state.window.insert(rows, Edge::Bottom);
                state.exhaust_unless(Direction::Bottom, has_next);
                report
            }
            (_, RequestKind::FromTime, around) => {
                let report = state.window.insert(rows, Edge::Bottom);
                state.exhaust_unless(Direction::Bottom, has_next);
                if let Some(target) = around {
                    state.window.highlight(target);
                }
                report
            }
            (_, kind, Some(target)) => {
                let (outcome, report) = state.window.reconcile(target, rows);
                if outcome != ReconcileOutcome::Resident {
                    state.orphan_edges();
                    if kind == RequestKind::ToTime {
                        state.exhaust_unless(Direction::Top, has_next);
                    }
                }
                reconciled = Some(outcome);
                report
            }
            (_, _, None) => state.window.insert(rows, Edge::Bottom),
        };
        let highlighted = state.window.highlighted();
        drop(state);

        let applied = AppliedPage {
            kind: pending.kind,
            inserted: report.inserted,
            replaced: report.replaced,
            rejected: report.rejected.len(),
            has_next,
            reconciled,
        };
        debug!(
            target: "Pagination",
            "Applied {} after {:?}: {} new, {} updated, {} malformed",
            key,
            pending.created_at.elapsed(),
            applied.inserted,
            applied.replaced,
            applied.rejected
        );
        self.emit(HistoryEventKind::PageApplied {
            kind: applied.kind,
            inserted: applied.inserted,
            replaced: applied.replaced,
            rejected: applied.rejected,
            has_next,
        });
        if let (Some(target), Some(current)) = (pending.around, highlighted)
            && target == current
        {
            self.emit(HistoryEventKind::Highlighted(target));
        }
        PageOutcome::Applied(applied)
    }

    fn emit(&self, kind: HistoryEventKind) {
        self.events.emit_history(HistoryEvent {
            thread_id: self.thread_id,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHistory, message_at};

    fn controller(source: Arc<MockHistory>) -> Arc<PaginationController> {
        Arc::new(PaginationController::new(
            1,
            source,
            SyncConfig::default().with_page_size(3),
            Arc::new(EventBus::new()),
        ))
    }

    #[tokio::test]
    async fn first_top_page_loads_newest_and_closes_bottom() {
        let source = Arc::new(MockHistory::with_messages(
            1,
            (1..=10).map(|id| message_at(1, id)),
        ));
        let ctrl = controller(source.clone());

        let page = match ctrl.request_more(Direction::Top).await.unwrap() {
            PageOutcome::Applied(page) => page,
            other => panic!("expected an applied page, got {other:?}"),
        };
        assert_eq!(page.kind, RequestKind::MoreTopFirstScenario);
        assert_eq!(page.inserted, 3);
        assert!(page.has_next);
        assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Idle);
        assert_eq!(ctrl.state(Direction::Bottom).await, DirectionState::Exhausted);

        let ids: Vec<_> = ctrl
            .with_window(|w| w.messages().map(|m| m.id).collect::<Vec<_>>())
            .await;
        assert_eq!(ids, vec![8, 9, 10]);

        ctrl.request_more(Direction::Top).await.unwrap();
        let requests = source.requests().await;
        assert_eq!(requests[1].kind, RequestKind::MoreTop);
        assert_eq!(requests[1].to_time, message_at(1, 8).time);
    }

    #[tokio::test]
    async fn anchored_directions_cannot_be_paged() {
        let ctrl = controller(Arc::new(MockHistory::new(1)));
        let err = ctrl.request_more(Direction::Offset).await.unwrap_err();
        assert!(matches!(err, FetchError::NotPageable(Direction::Offset)));
    }

    #[tokio::test]
    async fn reset_rotates_the_session() {
        let ctrl = controller(Arc::new(MockHistory::new(1)));
        let before = ctrl.session().await;
        ctrl.reset().await;
        assert_ne!(before, ctrl.session().await);
    }
}
