
use std::sync::Arc;
use std::time::Duration;

use quiz_participant::clients::{MockCall, MockGateway};
use quiz_participant::config::PollConfig;
use quiz_participant::error::{GatewayError, PollError};
use quiz_participant::models::ActivePayload;
use quiz_participant::poller::{ActivationPoller, PollEvent, PollEvents};
use quiz_participant::ActivationState;
use test_utils::*;

const INTERVAL: Duration = Duration::from_millis(3000);

async fn collect(events: &mut PollEvents) -> Vec<PollEvent> {
    let mut seen = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("poller went quiet")
    {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_active_then_stops() {
    init_tracing();
    let (gateway, handle) = MockGateway::new();
    handle.push_inactive(3);
    handle.push_active(quiz(2));

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    let seen = collect(&mut events).await;
    assert_eq!(seen.len(), 2, "inactive is reported once, then activation: {:?}", seen);
    assert_eq!(seen[0], PollEvent::State(ActivationState::Inactive));
    assert!(matches!(&seen[1], PollEvent::Activated(payload) if payload.is_active()));

    // Nothing else is sent once the session is active.
    tokio::time::sleep(INTERVAL * 10).await;
    let calls = handle.poll_calls();
    assert_eq!(calls.len(), 4);
    for call in &calls {
        assert!(matches!(call, MockCall::CheckActive { code, .. } if code == "ABCD"));
    }
    for pair in calls.windows(2) {
        assert!(pair[1].at() - pair[0].at() >= INTERVAL);
    }
    assert!(poll_handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_first_check_is_immediate() {
    let (gateway, handle) = MockGateway::new();
    let started = tokio::time::Instant::now();

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (_poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    assert_eq!(events.recv().await, Some(PollEvent::State(ActivationState::Inactive)));
    let calls = handle.poll_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].at() - started < INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_further_checks() {
    init_tracing();
    let (gateway, handle) = MockGateway::new();

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    assert_eq!(events.recv().await, Some(PollEvent::State(ActivationState::Inactive)));
    tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
    let before = handle.poll_calls().len();
    assert_eq!(before, 2);

    poll_handle.stop();
    poll_handle.stop();
    assert!(poll_handle.is_stopped());

    tokio::time::sleep(INTERVAL * 20).await;
    assert_eq!(handle.poll_calls().len(), before);
    assert_eq!(events.recv().await, None);
    assert!(poll_handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_polling() {
    let (gateway, handle) = MockGateway::new();

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);
    assert!(events.recv().await.is_some());

    drop(poll_handle);
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(handle.poll_calls().len(), 1);
    assert_eq!(events.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_single_check_without_auto_refresh() {
    let (gateway, handle) = MockGateway::new();

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (poll_handle, mut events) = poller.start(code("ABCD"), false, INTERVAL);

    let seen = collect(&mut events).await;
    assert_eq!(seen, vec![PollEvent::State(ActivationState::Inactive)]);

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(handle.poll_calls().len(), 1);
    assert!(poll_handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_empty_question_list_counts_as_inactive() {
    let (gateway, handle) = MockGateway::new();
    handle.push_poll(Ok(ActivePayload { questions: Some(vec![]) }));
    handle.push_active(quiz(1));

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (_poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    let seen = collect(&mut events).await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], PollEvent::State(ActivationState::Inactive));
    assert!(matches!(seen[1], PollEvent::Activated(_)));
    assert_eq!(handle.poll_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_errors_do_not_stop_polling() {
    init_tracing();
    let (gateway, handle) = MockGateway::new();
    handle.push_poll(Err(PollError::Gateway(GatewayError::Http("connection refused".into()))));
    handle.push_poll(Err(PollError::Gateway(GatewayError::Timeout)));
    handle.push_active(quiz(1));

    let poller = ActivationPoller::new(Arc::new(gateway), PollConfig::default());
    let (_poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    let seen = collect(&mut events).await;
    assert_eq!(seen.len(), 3);
    assert!(matches!(seen[0], PollEvent::Error(PollError::Gateway(GatewayError::Http(_)))));
    assert_eq!(seen[1], PollEvent::Error(PollError::Gateway(GatewayError::Timeout)));
    assert!(matches!(seen[2], PollEvent::Activated(_)));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_consecutive_errors() {
    let (gateway, handle) = MockGateway::new();
    handle.set_poll_fallback(Err(PollError::Gateway(GatewayError::Timeout)));

    let config = PollConfig {
        max_consecutive_errors: Some(3),
        ..PollConfig::default()
    };
    let poller = ActivationPoller::new(Arc::new(gateway), config);
    let (_poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    let seen = collect(&mut events).await;
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[3], PollEvent::GaveUp { consecutive_errors: 3 });
    assert_eq!(handle.poll_calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_response_resets_error_count() {
    let (gateway, handle) = MockGateway::new();
    handle.push_poll(Err(PollError::Gateway(GatewayError::Timeout)));
    handle.push_inactive(1);
    handle.push_poll(Err(PollError::Gateway(GatewayError::Timeout)));
    handle.push_active(quiz(1));

    let config = PollConfig {
        max_consecutive_errors: Some(2),
        ..PollConfig::default()
    };
    let poller = ActivationPoller::new(Arc::new(gateway), config);
    let (_poll_handle, mut events) = poller.start(code("ABCD"), true, INTERVAL);

    let seen = collect(&mut events).await;
    assert!(!seen.iter().any(|e| matches!(e, PollEvent::GaveUp { .. })));
    assert!(matches!(seen.last(), Some(PollEvent::Activated(_))));
}
