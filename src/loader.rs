use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, instrument, warn};

use crate::error::LoadError;
use crate::gateway::SharedGateway;
use crate::models::{ActivePayload, Question, RawQuestion, SessionCode};

#[derive(Debug)]
enum LoaderState {
    Idle,
    InFlight,
    Loaded(Arc<Vec<Question>>),
}

/// Fetches a session's question set once and keeps it.
#[derive(Debug)]
pub struct QuestionSetLoader {
    gateway: SharedGateway,
    state: Mutex<LoaderState>,
}

/// Returns the loader to idle if a load is abandoned before it finishes.
struct InFlight<'a> {
    loader: &'a QuestionSetLoader,
    done: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut state = self.loader.lock();
            if matches!(*state, LoaderState::InFlight) {
                *state = LoaderState::Idle;
            }
        }
    }
}

/// Turn a raw activation payload into the display model. A missing or empty
/// question list is an error, not an empty quiz.
pub fn normalize_questions(payload: ActivePayload) -> Result<Vec<Question>, LoadError> {
    let raw = payload.questions.unwrap_or_default();
    if raw.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(raw.into_iter().map(RawQuestion::into_question).collect())
}

impl QuestionSetLoader {
    pub fn new(gateway: SharedGateway) -> Self {
        Self {
            gateway,
            state: Mutex::new(LoaderState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn questions(&self) -> Option<Arc<Vec<Question>>> {
        match &*self.lock() {
            LoaderState::Loaded(questions) => Some(questions.clone()),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.lock(), LoaderState::Loaded(_))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(*self.lock(), LoaderState::InFlight)
    }

    /// Load the question set for `code`.
    ///
    /// Only the first successful call reaches the network. Later calls return
    /// the cached set; a call made while another is in flight gets
    /// `LoadError::InFlight`. A failed attempt leaves the loader idle.
    #[instrument(target = "quiz_participant::loader", skip(self, code), fields(code = %code))]
    pub async fn load(&self, code: &SessionCode) -> Result<Arc<Vec<Question>>, LoadError> {
        let mut guard = {
            let mut state = self.lock();
            match &*state {
                LoaderState::Loaded(questions) => {
                    debug!("Questions already loaded, skipping fetch");
                    return Ok(questions.clone());
                }
                LoaderState::InFlight => {
                    debug!("Question load already in flight");
                    return Err(LoadError::InFlight);
                }
                LoaderState::Idle => {}
            }
            *state = LoaderState::InFlight;
            InFlight { loader: self, done: false }
        };

        let result = self
            .gateway
            .check_active(code)
            .await
            .map_err(LoadError::from)
            .and_then(normalize_questions);

        guard.done = true;
        let mut state = self.lock();
        match result {
            Ok(questions) => {
                info!(count = questions.len(), "Loaded question set");
                let questions = Arc::new(questions);
                *state = LoaderState::Loaded(questions.clone());
                Ok(questions)
            }
            Err(e) => {
                warn!(error = %e, "Question load failed");
                *state = LoaderState::Idle;
                Err(e)
            }
        }
    }
}
