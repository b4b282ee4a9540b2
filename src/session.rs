use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::clients::HttpGateway;
use crate::config::ClientConfig;
use crate::controller::{QuizEvents, QuizProgressionController, QuizSession};
use crate::error::{GatewayError, JoinError, PollError};
use crate::gateway::SharedGateway;
use crate::models::{ActivationState, Participant, SessionCode};
use crate::poller::{ActivationPoller, PollEvents, PollerHandle};

/// A participant registered in a session, ready to start the quiz flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedSession {
    pub code: SessionCode,
    pub participant: Participant,
}

/// Entry point for front-ends: join, check activation, run the quiz.
#[derive(Debug, Clone)]
pub struct QuizClient {
    gateway: SharedGateway,
    config: ClientConfig,
}

impl QuizClient {
    pub fn new(gateway: SharedGateway, config: ClientConfig) -> Self {
        Self { gateway, config }
    }

    /// A client talking HTTP to `config.base_url`.
    pub fn http(config: ClientConfig) -> Result<Self, GatewayError> {
        let gateway = HttpGateway::new(&config)?;
        Ok(Self::new(Arc::new(gateway), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    /// Join `code` as `name`. Both must be non-blank; any server failure is
    /// terminal for this attempt.
    #[instrument(target = "quiz_participant::session", skip(self))]
    pub async fn join(&self, code: &str, name: &str) -> Result<JoinedSession, JoinError> {
        let name = name.trim();
        if code.trim().is_empty() || name.is_empty() {
            return Err(JoinError::MissingFields);
        }
        let code = SessionCode::new(code)?;

        let participant = self.gateway.join(&code, name).await.map_err(|e| {
            warn!(error = %e, "Join failed");
            JoinError::Gateway(e)
        })?;

        info!(%code, participant_id = participant.id, "Participant joined");
        Ok(JoinedSession { code, participant })
    }

    /// One activation check, no polling.
    pub async fn check_once(&self, code: &SessionCode) -> Result<ActivationState, PollError> {
        match self.gateway.check_active(code).await {
            Ok(payload) if payload.is_active() => Ok(ActivationState::Active),
            Ok(_) | Err(PollError::NotActive) => Ok(ActivationState::Inactive),
            Err(e) => Err(e),
        }
    }

    /// Poll `code` with the configured interval until it activates.
    pub fn watch_activation(&self, code: SessionCode) -> (PollerHandle, PollEvents) {
        ActivationPoller::new(self.gateway.clone(), self.config.poll.clone()).start_configured(code)
    }

    pub fn start_quiz(&self, joined: &JoinedSession) -> (QuizSession, QuizEvents) {
        QuizProgressionController::new(self.gateway.clone(), &self.config)
            .start(joined.code.clone(), joined.participant)
    }
}
