//! The participant state machine:
//! `AwaitingActivation → LoadingQuestions → Presenting(0..n) → Completed`.
//!
//! One spawned task owns all of a session's state (poller, loader result,
//! question timer, in-flight submissions) and applies transitions one at a
//! time. The UI drives it through a `QuizSession` and observes it through
//! `QuizEvents` plus a `watch` of the current `ProgressionState`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, PollConfig};
use crate::error::{LoadError, PollError, SubmitError};
use crate::events::Events;
use crate::gateway::SharedGateway;
use crate::loader::QuestionSetLoader;
use crate::models::{
    ActivationState, Participant, ProgressionState, Question, SessionCode, SubmissionRecord, SubmissionStatus,
    SubmitAck,
};
use crate::poller::{ActivationPoller, PollEvent, PollEvents, PollerHandle};
use crate::submission::AnswerSubmissionGuard;

/// Everything a front-end needs to render the flow.
#[derive(Debug, Clone, PartialEq)]
pub enum QuizEvent {
    Activation(ActivationState),
    /// An activation check failed; polling goes on.
    PollFailed(PollError),
    /// Polling stopped after too many failures. `retry()` restarts it.
    PollingAbandoned { consecutive_errors: u32 },
    QuestionsLoaded { count: usize },
    /// Progression is halted until `retry()`.
    LoadFailed(LoadError),
    Presenting {
        index: usize,
        total: usize,
        question: Question,
        duration: Duration,
    },
    /// The selection is locked; the answer is on its way.
    AnswerLocked { index: usize, question_id: i64, option_id: i64 },
    AnswerRejected { option_id: i64, error: SubmitError },
    AnswerAcknowledged { question_id: i64 },
    AnswerFailed { question_id: i64, error: SubmitError },
    TimeUp { index: usize },
    /// `answered` counts answers the server acknowledged.
    Completed { answered: usize, total: usize },
}

pub type QuizEvents = Events<QuizEvent>;

#[derive(Debug)]
enum Command {
    Select(i64),
    Retry,
}

enum TaskOutput {
    Loaded(Result<Arc<Vec<Question>>, LoadError>),
    Submitted {
        index: usize,
        question_id: i64,
        result: Result<SubmitAck, SubmitError>,
    },
}

/// Builds and starts participant flows.
#[derive(Debug, Clone)]
pub struct QuizProgressionController {
    gateway: SharedGateway,
    poll: PollConfig,
    question_duration: Duration,
    advance_on_answer: bool,
}

impl QuizProgressionController {
    pub fn new(gateway: SharedGateway, config: &ClientConfig) -> Self {
        Self {
            gateway,
            poll: config.poll.clone(),
            question_duration: config.question_duration,
            advance_on_answer: config.advance_on_answer,
        }
    }

    /// Spawn the flow for `participant` in session `code`. It starts polling
    /// immediately. Must be called inside a tokio runtime.
    pub fn start(&self, code: SessionCode, participant: Participant) -> (QuizSession, QuizEvents) {
        let token = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProgressionState::AwaitingActivation);
        let guard = Arc::new(AnswerSubmissionGuard::new(self.gateway.clone()));

        info!(%code, participant_id = participant.id, advance_on_answer = self.advance_on_answer, "Starting quiz session");
        let flow = Flow {
            code: code.clone(),
            participant,
            question_duration: self.question_duration,
            advance_on_answer: self.advance_on_answer,
            poller: ActivationPoller::new(self.gateway.clone(), self.poll.clone()),
            loader: Arc::new(QuestionSetLoader::new(self.gateway.clone())),
            guard: guard.clone(),
            events: event_tx,
            state: state_tx,
            token: token.clone(),
            polling: None,
            questions: None,
            selected: None,
            deadline: None,
            tasks: JoinSet::new(),
        };
        let task = tokio::spawn(flow.run(command_rx));

        let session = QuizSession {
            code,
            participant,
            commands: command_tx,
            state: state_rx,
            guard,
            token: token.clone(),
            task: Some(task),
        };
        (session, Events::new(event_rx, token))
    }
}

/// Handle to a running flow. Dropping it tears the flow down.
#[derive(Debug)]
pub struct QuizSession {
    code: SessionCode,
    participant: Participant,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ProgressionState>,
    guard: Arc<AnswerSubmissionGuard>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl QuizSession {
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    pub fn participant(&self) -> Participant {
        self.participant
    }

    pub fn state(&self) -> ProgressionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProgressionState> {
        self.state.clone()
    }

    /// Answer the question on screen. Returns false if the flow is gone.
    pub fn select(&self, option_id: i64) -> bool {
        !self.token.is_cancelled() && self.commands.send(Command::Select(option_id)).is_ok()
    }

    /// Restart polling after it was abandoned, or reload questions after a failure.
    pub fn retry(&self) -> bool {
        !self.token.is_cancelled() && self.commands.send(Command::Retry).is_ok()
    }

    /// True while an answer is in flight; option selection should be disabled.
    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn last_submit_error(&self) -> Option<SubmitError> {
        self.guard.last_error()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.guard.records()
    }

    /// Tear the flow down: pending poll, question timer and in-flight
    /// requests are cancelled and no further events are delivered. Idempotent.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!(code = %self.code, "Stopping quiz session");
        }
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the flow to end on its own (completion) or after `stop()`.
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Quiz session task failed");
                }
            }
            self.task = None;
        }
    }

    pub async fn shutdown(mut self) {
        self.stop();
        self.finished().await;
    }
}

impl Drop for QuizSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Flow {
    code: SessionCode,
    participant: Participant,
    question_duration: Duration,
    advance_on_answer: bool,
    poller: ActivationPoller,
    loader: Arc<QuestionSetLoader>,
    guard: Arc<AnswerSubmissionGuard>,
    events: mpsc::UnboundedSender<QuizEvent>,
    state: watch::Sender<ProgressionState>,
    token: CancellationToken,

    polling: Option<(PollerHandle, PollEvents)>,
    questions: Option<Arc<Vec<Question>>>,
    selected: Option<i64>,
    deadline: Option<Instant>,
    tasks: JoinSet<TaskOutput>,
}

async fn next_poll_event(polling: &mut Option<(PollerHandle, PollEvents)>) -> Option<PollEvent> {
    match polling {
        Some((_, events)) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl Flow {
    #[instrument(target = "quiz_participant::controller", skip(self, commands), fields(code = %self.code, participant_id = self.participant.id))]
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.start_polling();

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!("Quiz session cancelled");
                    break;
                }
                event = next_poll_event(&mut self.polling), if self.polling.is_some() => {
                    self.on_poll_event(event);
                }
                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_task(done);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout();
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }

            if self.current().is_terminal() {
                break;
            }
        }

        // Answers already sent still get their acknowledgement reported.
        if self.current().is_terminal() {
            while !self.tasks.is_empty() {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => break,
                    done = self.tasks.join_next() => match done {
                        Some(done) => self.on_task(done),
                        None => break,
                    },
                }
            }
        }
        debug!(state = ?self.current(), "Quiz session task finished");
    }

    fn current(&self) -> ProgressionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ProgressionState) {
        debug!(?state, "Progression state changed");
        self.state.send_replace(state);
    }

    fn emit(&self, event: QuizEvent) {
        if self.events.send(event).is_err() {
            debug!("No one is listening for quiz events");
        }
    }

    fn start_polling(&mut self) {
        self.polling = Some(self.poller.start_configured(self.code.clone()));
    }

    fn start_load(&mut self) {
        let loader = self.loader.clone();
        let code = self.code.clone();
        self.tasks.spawn(async move { TaskOutput::Loaded(loader.load(&code).await) });
    }

    fn on_poll_event(&mut self, event: Option<PollEvent>) {
        match event {
            None => {
                debug!("Activation poller ended without activation");
                self.polling = None;
            }
            Some(PollEvent::State(state)) => self.emit(QuizEvent::Activation(state)),
            Some(PollEvent::Error(e)) => self.emit(QuizEvent::PollFailed(e)),
            Some(PollEvent::GaveUp { consecutive_errors }) => {
                self.polling = None;
                self.emit(QuizEvent::PollingAbandoned { consecutive_errors });
            }
            Some(PollEvent::Activated(_)) => {
                self.polling = None;
                if self.current() != ProgressionState::AwaitingActivation {
                    debug!("Ignoring repeated activation");
                    return;
                }
                self.emit(QuizEvent::Activation(ActivationState::Active));
                self.set_state(ProgressionState::LoadingQuestions);
                self.start_load();
            }
        }
    }

    fn on_task(&mut self, done: Result<TaskOutput, JoinError>) {
        let output = match done {
            Ok(output) => output,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(error = %e, "Quiz background task failed");
                return;
            }
        };

        match output {
            TaskOutput::Loaded(Ok(questions)) => {
                if self.questions.is_some() {
                    return;
                }
                self.emit(QuizEvent::QuestionsLoaded { count: questions.len() });
                self.questions = Some(questions);
                if self.current() == ProgressionState::LoadingQuestions {
                    self.present(0);
                }
            }
            TaskOutput::Loaded(Err(e)) => {
                warn!(error = %e, "Could not load questions, waiting for retry");
                self.emit(QuizEvent::LoadFailed(e));
            }
            TaskOutput::Submitted { index, question_id, result } => {
                match result {
                    Ok(_) => self.emit(QuizEvent::AnswerAcknowledged { question_id }),
                    Err(error) => self.emit(QuizEvent::AnswerFailed { question_id, error }),
                }
                if self.advance_on_answer && self.current() == ProgressionState::Presenting(index) {
                    self.advance(index);
                }
            }
        }
    }

    fn on_timeout(&mut self) {
        self.deadline = None;
        if let ProgressionState::Presenting(index) = self.current() {
            debug!(index, "Question time is up");
            self.emit(QuizEvent::TimeUp { index });
            self.advance(index);
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Select(option_id) => self.select(option_id),
            Command::Retry => match self.current() {
                ProgressionState::AwaitingActivation if self.polling.is_none() => {
                    info!("Restarting activation polling");
                    self.start_polling();
                }
                ProgressionState::LoadingQuestions if self.questions.is_none() && !self.loader.is_in_flight() => {
                    info!("Retrying question load");
                    self.start_load();
                }
                state => debug!(?state, "Nothing to retry"),
            },
        }
    }

    fn select(&mut self, option_id: i64) {
        let ProgressionState::Presenting(index) = self.current() else {
            self.emit(QuizEvent::AnswerRejected { option_id, error: SubmitError::WindowClosed });
            return;
        };
        let Some(question) = self.questions.as_ref().and_then(|qs| qs.get(index)) else {
            return;
        };
        let question_id = question.id;

        if self.selected.is_some() {
            self.emit(QuizEvent::AnswerRejected { option_id, error: SubmitError::AlreadySubmitted });
            return;
        }
        if !question.options.iter().any(|o| o.id == option_id) {
            self.emit(QuizEvent::AnswerRejected { option_id, error: SubmitError::UnknownOption(option_id) });
            return;
        }

        match self.guard.reserve(self.participant.id, question_id, option_id) {
            Ok(reservation) => {
                self.selected = Some(option_id);
                self.emit(QuizEvent::AnswerLocked { index, question_id, option_id });
                let guard = self.guard.clone();
                self.tasks.spawn(async move {
                    let result = guard.dispatch(reservation).await;
                    TaskOutput::Submitted { index, question_id, result }
                });
            }
            Err(error) => self.emit(QuizEvent::AnswerRejected { option_id, error }),
        }
    }

    fn advance(&mut self, index: usize) {
        self.guard.close_window();
        self.present(index + 1);
    }

    fn present(&mut self, index: usize) {
        let Some(questions) = self.questions.clone() else {
            return;
        };
        let Some(question) = questions.get(index) else {
            self.complete(questions.len());
            return;
        };

        self.selected = None;
        self.guard.open_window(question.id);
        self.deadline = Some(Instant::now() + self.question_duration);
        self.set_state(ProgressionState::Presenting(index));
        info!(index, question_id = question.id, total = questions.len(), "Presenting question");
        self.emit(QuizEvent::Presenting {
            index,
            total: questions.len(),
            question: question.clone(),
            duration: self.question_duration,
        });
    }

    fn complete(&mut self, total: usize) {
        self.deadline = None;
        self.selected = None;
        self.guard.close_window();
        self.set_state(ProgressionState::Completed);
        let answered = self
            .guard
            .records()
            .iter()
            .filter(|r| r.status == SubmissionStatus::Acknowledged)
            .count();
        info!(answered, total, "Quiz completed");
        self.emit(QuizEvent::Completed { answered, total });
    }
}
