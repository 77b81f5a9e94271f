use pod_chat_rust::mock::{MockHistory, message_at};
use pod_chat_rust::types::events::{EventBus, HistoryEventKind};
use pod_chat_rust::{
    DirectionState, DropReason, FetchError, JumpAnchor, JumpOutcome, PageOutcome,
    PaginationController, SyncConfig,
};
use podcore::sdk::SdkError;
use podcore::{Direction, MessageId, ReceiptState, RequestKeys, RequestKind, SessionId};
use std::sync::Arc;
use std::time::Duration;

const THREAD: i64 = 1;

fn history(count: i64) -> MockHistory {
    MockHistory::with_messages(THREAD, (1..=count).map(|id| message_at(THREAD, id)))
}

fn controller_with(source: Arc<MockHistory>, config: SyncConfig) -> Arc<PaginationController> {
    Arc::new(PaginationController::new(
        THREAD,
        source,
        config,
        Arc::new(EventBus::new()),
    ))
}

fn controller(source: Arc<MockHistory>) -> Arc<PaginationController> {
    controller_with(
        source,
        SyncConfig::default()
            .with_page_size(3)
            .with_jump_page_size(3),
    )
}

async fn window_ids(ctrl: &PaginationController) -> Vec<MessageId> {
    ctrl.with_window(|w| w.messages().map(|m| m.id).collect())
        .await
}

async fn wait_for_requests(source: &MockHistory, count: usize) {
    while source.request_count().await < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn second_top_request_is_dropped_while_first_is_in_flight() {
    let source = Arc::new(history(10).gated());
    let ctrl = controller(source.clone());

    let first = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.request_more(Direction::Top).await }
    });
    wait_for_requests(&source, 1).await;

    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Pending);
    let second = ctrl.request_more(Direction::Top).await.unwrap();
    assert_eq!(second, PageOutcome::Dropped(DropReason::AlreadyPending));
    assert_eq!(ctrl.pending_count().await, 1);

    source.release(1);
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, PageOutcome::Applied(ref page) if page.inserted == 3));
    assert_eq!(source.request_count().await, 1);
    assert_eq!(window_ids(&ctrl).await, vec![8, 9, 10]);
}

#[tokio::test]
async fn unknown_and_foreign_keys_leave_the_window_untouched() {
    let ctrl = controller(Arc::new(history(10)));
    ctrl.request_more(Direction::Top).await.unwrap();
    let before = window_ids(&ctrl).await;

    let never_sent = ctrl.key(RequestKind::MoreTop).await;
    let outcome = ctrl
        .on_response(&never_sent, vec![message_at(THREAD, 1)], true)
        .await;
    assert_eq!(outcome, PageOutcome::Stale);

    let foreign = RequestKeys::new(SessionId::new()).key(RequestKind::MoreTop);
    let outcome = ctrl
        .on_response(&foreign, vec![message_at(THREAD, 2)], true)
        .await;
    assert_eq!(outcome, PageOutcome::Stale);

    assert_eq!(window_ids(&ctrl).await, before);
}

#[tokio::test]
async fn duplicate_response_is_discarded() {
    let source = Arc::new(history(10).gated());
    let ctrl = controller(source.clone());

    let fetch = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.request_more(Direction::Top).await }
    });
    wait_for_requests(&source, 1).await;
    let key = ctrl.pending_requests().await[0].key.clone();

    let pushed = ctrl
        .on_response(&key, vec![message_at(THREAD, 9), message_at(THREAD, 10)], true)
        .await;
    assert!(matches!(pushed, PageOutcome::Applied(_)));
    assert_eq!(
        ctrl.on_response(&key, vec![message_at(THREAD, 1)], true).await,
        PageOutcome::Stale
    );

    source.release(1);
    assert_eq!(fetch.await.unwrap().unwrap(), PageOutcome::Stale);
    assert_eq!(window_ids(&ctrl).await, vec![9, 10]);
    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Idle);
}

#[tokio::test]
async fn updated_duplicate_keeps_its_position() {
    let source = Arc::new(history(10).gated());
    let ctrl = controller(source.clone());
    source.release(1);
    ctrl.request_more(Direction::Top).await.unwrap();

    let fetch = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.request_more(Direction::Top).await }
    });
    wait_for_requests(&source, 2).await;
    let key = ctrl.pending_requests().await[0].key.clone();

    let mut seen = message_at(THREAD, 9);
    seen.receipt = ReceiptState::Seen;
    let outcome = ctrl
        .on_response(&key, vec![message_at(THREAD, 7), seen], true)
        .await;
    match outcome {
        PageOutcome::Applied(page) => {
            assert_eq!(page.inserted, 1);
            assert_eq!(page.replaced, 1);
        }
        other => panic!("expected an applied page, got {other:?}"),
    }

    assert_eq!(window_ids(&ctrl).await, vec![7, 8, 9, 10]);
    let receipt = ctrl
        .with_window(|w| w.get(9).map(|row| row.message().receipt))
        .await;
    assert_eq!(receipt, Some(ReceiptState::Seen));

    source.release(1);
    assert_eq!(fetch.await.unwrap().unwrap(), PageOutcome::Stale);
}

#[tokio::test]
async fn timeout_frees_the_direction() {
    let source = Arc::new(history(10).with_delay(Duration::from_millis(500)));
    let ctrl = controller_with(
        source.clone(),
        SyncConfig::default()
            .with_page_size(3)
            .with_request_timeout(Duration::from_millis(20)),
    );

    let err = ctrl.request_more(Direction::Top).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout));
    assert!(err.is_retryable());
    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Idle);
    assert_eq!(ctrl.pending_count().await, 0);
    assert!(window_ids(&ctrl).await.is_empty());
}

#[tokio::test]
async fn sdk_failure_frees_the_direction() {
    let source = Arc::new(history(10));
    source
        .fail_next(SdkError::Network("connection reset".into()))
        .await;
    let ctrl = controller(source.clone());

    let err = ctrl.request_more(Direction::Top).await.unwrap_err();
    assert!(matches!(err, FetchError::Sdk(SdkError::Network(_))));
    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Idle);

    let retried = ctrl.request_more(Direction::Top).await.unwrap();
    assert!(matches!(retried, PageOutcome::Applied(_)));
}

#[tokio::test]
async fn top_is_exhausted_once_history_runs_out() {
    let source = Arc::new(history(5));
    let ctrl = controller(source.clone());

    ctrl.request_more(Direction::Top).await.unwrap();
    let last = ctrl.request_more(Direction::Top).await.unwrap();
    assert!(matches!(last, PageOutcome::Applied(ref page) if !page.has_next));
    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Exhausted);

    let again = ctrl.request_more(Direction::Top).await.unwrap();
    assert_eq!(again, PageOutcome::Dropped(DropReason::Exhausted));
    assert_eq!(source.request_count().await, 2);
    assert_eq!(window_ids(&ctrl).await, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn jump_to_resident_message_only_highlights() {
    let source = Arc::new(history(10));
    let ctrl = controller(source.clone());
    ctrl.request_more(Direction::Top).await.unwrap();

    let target = message_at(THREAD, 9);
    let outcome = ctrl
        .jump_to(JumpAnchor::Time {
            message_id: 9,
            time: target.time.unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, JumpOutcome::Resident);
    assert_eq!(ctrl.highlighted().await, Some(9));
    assert_eq!(source.request_count().await, 1);
}

#[tokio::test]
async fn jump_by_time_replaces_the_window() {
    let source = Arc::new(history(20));
    let ctrl = controller(source.clone());
    ctrl.request_more(Direction::Top).await.unwrap();
    assert_eq!(window_ids(&ctrl).await, vec![18, 19, 20]);

    let target = message_at(THREAD, 2);
    let outcome = ctrl
        .jump_to(JumpAnchor::Time {
            message_id: 2,
            time: target.time.unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, JumpOutcome::Loaded);
    assert_eq!(window_ids(&ctrl).await, vec![1, 2, 3, 4, 5]);
    assert_eq!(ctrl.highlighted().await, Some(2));
    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Exhausted);
    assert_eq!(ctrl.state(Direction::Bottom).await, DirectionState::Idle);

    let kinds: Vec<_> = source.requests().await.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RequestKind::MoreTopFirstScenario,
            RequestKind::ToTime,
            RequestKind::FromTime
        ]
    );

    ctrl.request_more(Direction::Bottom).await.unwrap();
    assert_eq!(window_ids(&ctrl).await, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn jump_by_offset_centers_on_target() {
    let source = Arc::new(history(20));
    let ctrl = controller(source.clone());

    let outcome = ctrl
        .jump_to(JumpAnchor::Offset {
            message_id: 15,
            offset: 5,
        })
        .await
        .unwrap();
    assert_eq!(outcome, JumpOutcome::Loaded);
    assert_eq!(window_ids(&ctrl).await, vec![14, 15, 16]);
    assert_eq!(ctrl.highlighted().await, Some(15));
}

#[tokio::test]
async fn jump_to_missing_message_reports_not_found() {
    let source = Arc::new(history(20));
    let ctrl = controller(source.clone());

    let near = message_at(THREAD, 2);
    let outcome = ctrl
        .jump_to(JumpAnchor::Time {
            message_id: 999,
            time: near.time.unwrap(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, JumpOutcome::NotFound);
    assert_eq!(ctrl.highlighted().await, None);
}

#[tokio::test]
async fn reset_turns_in_flight_responses_stale() {
    let source = Arc::new(history(10).gated());
    let events = Arc::new(EventBus::new());
    let mut history_events = events.history.subscribe();
    let ctrl = Arc::new(PaginationController::new(
        THREAD,
        source.clone(),
        SyncConfig::default().with_page_size(3),
        events,
    ));

    let fetch = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.request_more(Direction::Top).await }
    });
    wait_for_requests(&source, 1).await;
    ctrl.reset().await;
    source.release(1);

    assert_eq!(fetch.await.unwrap().unwrap(), PageOutcome::Stale);
    assert!(window_ids(&ctrl).await.is_empty());
    assert_eq!(ctrl.state(Direction::Top).await, DirectionState::Idle);

    let mut kinds = Vec::new();
    while let Ok(event) = history_events.try_recv() {
        kinds.push(event.kind.clone());
    }
    assert_eq!(kinds.first(), Some(&HistoryEventKind::Reset));
    assert!(matches!(kinds.last(), Some(HistoryEventKind::StaleResponse(_))));
}

#[tokio::test]
async fn live_messages_append_only_at_the_newest_edge() {
    let source = Arc::new(history(10));
    let ctrl = controller(source.clone());

    assert!(!ctrl.append_live(message_at(THREAD, 11)).await);
    ctrl.request_more(Direction::Top).await.unwrap();
    assert!(ctrl.append_live(message_at(THREAD, 11)).await);
    assert_eq!(window_ids(&ctrl).await, vec![8, 9, 10, 11]);

    assert!(ctrl.remove_message(8).await.is_some());
    assert_eq!(window_ids(&ctrl).await, vec![9, 10, 11]);
}

#[tokio::test]
async fn newer_jump_supersedes_one_in_flight() {
    let source = Arc::new(history(20).gated());
    let ctrl = controller(source.clone());
    let near_start = message_at(THREAD, 2).time.unwrap();

    let by_time = tokio::spawn({
        let ctrl = ctrl.clone();
        async move {
            ctrl.jump_to(JumpAnchor::Time {
                message_id: 2,
                time: near_start,
            })
            .await
        }
    });
    wait_for_requests(&source, 1).await;
    let by_offset = tokio::spawn({
        let ctrl = ctrl.clone();
        async move {
            ctrl.jump_to(JumpAnchor::Offset {
                message_id: 15,
                offset: 5,
            })
            .await
        }
    });
    wait_for_requests(&source, 2).await;
    source.release(2);

    assert_eq!(by_time.await.unwrap().unwrap(), JumpOutcome::Superseded);
    assert_eq!(by_offset.await.unwrap().unwrap(), JumpOutcome::Loaded);
    assert_eq!(window_ids(&ctrl).await, vec![14, 15, 16]);
    assert_eq!(ctrl.highlighted().await, Some(15));
    assert_eq!(source.request_count().await, 2);
}

#[tokio::test]
async fn second_half_of_a_time_jump_is_dropped_after_a_newer_jump() {
    let source = Arc::new(history(20).gated());
    let ctrl = controller(source.clone());
    let near_start = message_at(THREAD, 2).time.unwrap();

    let by_time = tokio::spawn({
        let ctrl = ctrl.clone();
        async move {
            ctrl.jump_to(JumpAnchor::Time {
                message_id: 2,
                time: near_start,
            })
            .await
        }
    });
    wait_for_requests(&source, 1).await;
    source.release(1);
    // The earlier page is applied and the later page is on its way.
    wait_for_requests(&source, 2).await;

    let by_offset = tokio::spawn({
        let ctrl = ctrl.clone();
        async move {
            ctrl.jump_to(JumpAnchor::Offset {
                message_id: 15,
                offset: 5,
            })
            .await
        }
    });
    wait_for_requests(&source, 3).await;
    source.release(2);

    assert_eq!(by_time.await.unwrap().unwrap(), JumpOutcome::Superseded);
    assert_eq!(by_offset.await.unwrap().unwrap(), JumpOutcome::Loaded);
    assert_eq!(window_ids(&ctrl).await, vec![14, 15, 16]);
    assert_eq!(ctrl.highlighted().await, Some(15));
    assert_eq!(ctrl.pending_count().await, 0);
}
