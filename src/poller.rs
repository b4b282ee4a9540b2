//! Activation polling.
//!
//! `ActivationPoller::start` checks the session once right away and, when
//! auto-refresh is on, keeps checking on a fixed interval until the session
//! reports active or the returned `PollerHandle` is stopped. Results arrive as
//! `PollEvent`s on `PollEvents`, which is also a `Stream`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::PollConfig;
use crate::error::PollError;
use crate::events::Events;
use crate::gateway::SharedGateway;
use crate::models::{ActivationState, ActivePayload, SessionCode};

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// The activation state changed to something other than active.
    State(ActivationState),
    /// The session is running. Carries the payload that proved it. Always the last event.
    Activated(ActivePayload),
    /// A check failed without telling us anything about activation.
    Error(PollError),
    /// Too many consecutive failures; polling has stopped.
    GaveUp { consecutive_errors: u32 },
}

pub type PollEvents = Events<PollEvent>;

/// Disposable handle for a polling run. Stopping is idempotent and also happens on drop.
#[derive(Debug)]
pub struct PollerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!("Stopping activation poller");
        }
        self.token.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the polling task has exited (activated, gave up, or stopped).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop and wait for the polling task to be gone.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
pub struct ActivationPoller {
    gateway: SharedGateway,
    config: PollConfig,
}

impl ActivationPoller {
    pub fn new(gateway: SharedGateway, config: PollConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Start polling with the configured refresh policy.
    pub fn start_configured(&self, code: SessionCode) -> (PollerHandle, PollEvents) {
        self.start(code, self.config.auto_refresh, self.config.interval)
    }

    /// Start polling `code`. Must be called inside a tokio runtime.
    pub fn start(&self, code: SessionCode, auto_refresh: bool, interval: Duration) -> (PollerHandle, PollEvents) {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        info!(%code, auto_refresh, interval_ms = interval.as_millis() as u64, "Starting activation poller");
        let run = PollRun {
            gateway: self.gateway.clone(),
            code,
            auto_refresh,
            interval,
            max_consecutive_errors: self.config.max_consecutive_errors,
            tx,
            token: token.clone(),
        };
        let task = tokio::spawn(run.run());

        (
            PollerHandle { token: token.clone(), task: Some(task) },
            Events::new(rx, token),
        )
    }
}

struct PollRun {
    gateway: SharedGateway,
    code: SessionCode,
    auto_refresh: bool,
    interval: Duration,
    max_consecutive_errors: Option<u32>,
    tx: mpsc::UnboundedSender<PollEvent>,
    token: CancellationToken,
}

impl PollRun {
    #[instrument(target = "quiz_participant::poller", skip(self), fields(code = %self.code))]
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = ActivationState::Unknown;
        let mut consecutive_errors = 0u32;

        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = self.gateway.check_active(&self.code) => result,
            };
            if self.token.is_cancelled() {
                break;
            }

            match result {
                Ok(payload) if payload.is_active() => {
                    info!(questions = payload.questions.as_ref().map_or(0, Vec::len), "Session is active, polling stops");
                    let _ = self.tx.send(PollEvent::Activated(payload));
                    break;
                }
                Ok(_) | Err(PollError::NotActive) => {
                    consecutive_errors = 0;
                    if state != ActivationState::Inactive {
                        state = ActivationState::Inactive;
                        debug!("Session not active yet");
                        if self.tx.send(PollEvent::State(state)).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(error = %e, consecutive_errors, "Activation check failed");
                    if self.tx.send(PollEvent::Error(e)).is_err() {
                        break;
                    }
                    if let Some(max) = self.max_consecutive_errors {
                        if consecutive_errors >= max {
                            warn!(consecutive_errors, "Giving up on activation polling");
                            let _ = self.tx.send(PollEvent::GaveUp { consecutive_errors });
                            break;
                        }
                    }
                }
            }

            if !self.auto_refresh {
                break;
            }
        }
        debug!("Activation poller finished");
    }
}
