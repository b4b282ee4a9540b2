//! The seam between the participant flow and the quiz server.
//!
//! Everything above this module (poller, loader, submission guard, controller)
//! talks to a `QuizGateway`. `HttpGateway` is the real implementation and
//! `MockGateway` is a scripted one for tests and offline demos.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GatewayError, PollError};
use crate::models::{ActivePayload, Participant, SessionCode, SubmitAck};

/// The three remote calls a participant makes.
#[async_trait]
pub trait QuizGateway: Send + Sync + Debug {
    /// Register `name` in the session and return the server-assigned participant.
    async fn join(&self, code: &SessionCode, name: &str) -> Result<Participant, GatewayError>;

    /// Ask whether the session is running. `Err(PollError::NotActive)` is the
    /// server's explicit "not yet" answer; a 2xx body is returned as-is, even
    /// when it carries no questions.
    async fn check_active(&self, code: &SessionCode) -> Result<ActivePayload, PollError>;

    /// Record one answer. Never retried.
    async fn submit_answer(
        &self,
        participant_id: i64,
        question_id: i64,
        option_id: i64,
    ) -> Result<SubmitAck, GatewayError>;
}

/// Gateway handle shared between the tasks of one flow.
pub type SharedGateway = Arc<dyn QuizGateway>;
