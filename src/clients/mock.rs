use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{GatewayError, PollError};
use crate::gateway::QuizGateway;
use crate::models::{ActivePayload, Participant, RawQuestion, SessionCode, SubmitAck};

/// A call the mock received, with the (tokio) time it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Join { code: String, name: String, at: Instant },
    CheckActive { code: String, at: Instant },
    Submit { participant_id: i64, question_id: i64, option_id: i64, at: Instant },
}

impl MockCall {
    pub fn at(&self) -> Instant {
        match self {
            MockCall::Join { at, .. } | MockCall::CheckActive { at, .. } | MockCall::Submit { at, .. } => *at,
        }
    }
}

#[derive(Debug)]
struct MockState {
    join: Result<Participant, GatewayError>,
    polls: VecDeque<Result<ActivePayload, PollError>>,
    poll_fallback: Result<ActivePayload, PollError>,
    poll_delay: Duration,
    submits: VecDeque<Result<SubmitAck, GatewayError>>,
    submit_delay: Duration,
    calls: Vec<MockCall>,
}

/// Script and inspect a `MockGateway` from the test side.
#[derive(Debug)]
pub struct MockHandle {
    state: Mutex<MockState>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the calls recorded so far.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_join(&self, result: Result<Participant, GatewayError>) {
        self.lock().join = result;
    }

    /// Queue one activation check response. Once the queue drains, the fallback is used.
    pub fn push_poll(&self, result: Result<ActivePayload, PollError>) {
        self.lock().polls.push_back(result);
    }

    pub fn push_inactive(&self, times: usize) {
        let mut state = self.lock();
        for _ in 0..times {
            state.polls.push_back(Err(PollError::NotActive));
        }
    }

    pub fn push_active(&self, questions: Vec<RawQuestion>) {
        self.push_poll(Ok(ActivePayload { questions: Some(questions) }));
    }

    pub fn set_poll_fallback(&self, result: Result<ActivePayload, PollError>) {
        self.lock().poll_fallback = result;
    }

    /// Make every activation check take this long before answering.
    pub fn set_poll_delay(&self, delay: Duration) {
        self.lock().poll_delay = delay;
    }

    pub fn push_submit(&self, result: Result<SubmitAck, GatewayError>) {
        self.lock().submits.push_back(result);
    }

    /// Make every submit take this long before answering.
    pub fn set_submit_delay(&self, delay: Duration) {
        self.lock().submit_delay = delay;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn poll_calls(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::CheckActive { .. }))
            .collect()
    }

    pub fn submit_calls(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::Submit { .. }))
            .collect()
    }
}

/// Scripted gateway for tests and offline runs.
#[derive(Debug, Clone)]
pub struct MockGateway {
    handle: Arc<MockHandle>,
}

impl MockGateway {
    /// A mock that joins as participant 1, reports "not active" forever and
    /// accepts every answer, plus the handle to change that.
    pub fn new() -> (Self, Arc<MockHandle>) {
        let handle = Arc::new(MockHandle {
            state: Mutex::new(MockState {
                join: Ok(Participant { id: 1 }),
                polls: VecDeque::new(),
                poll_fallback: Err(PollError::NotActive),
                poll_delay: Duration::ZERO,
                submits: VecDeque::new(),
                submit_delay: Duration::ZERO,
                calls: Vec::new(),
            }),
        });
        (Self { handle: handle.clone() }, handle)
    }
}

#[async_trait]
impl QuizGateway for MockGateway {
    async fn join(&self, code: &SessionCode, name: &str) -> Result<Participant, GatewayError> {
        let mut state = self.handle.lock();
        state.calls.push(MockCall::Join {
            code: code.to_string(),
            name: name.to_string(),
            at: Instant::now(),
        });
        state.join.clone()
    }

    async fn check_active(&self, code: &SessionCode) -> Result<ActivePayload, PollError> {
        let (delay, result) = {
            let mut state = self.handle.lock();
            state.calls.push(MockCall::CheckActive {
                code: code.to_string(),
                at: Instant::now(),
            });
            let result = match state.polls.pop_front() {
                Some(result) => result,
                None => state.poll_fallback.clone(),
            };
            (state.poll_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!(%code, ?result, "Mock activation check");
        result
    }

    async fn submit_answer(
        &self,
        participant_id: i64,
        question_id: i64,
        option_id: i64,
    ) -> Result<SubmitAck, GatewayError> {
        let (delay, result) = {
            let mut state = self.handle.lock();
            state.calls.push(MockCall::Submit {
                participant_id,
                question_id,
                option_id,
                at: Instant::now(),
            });
            let result = state
                .submits
                .pop_front()
                .unwrap_or(Ok(SubmitAck(serde_json::Value::Null)));
            (state.submit_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
