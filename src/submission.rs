//! At-most-one answer per question.
//!
//! `reserve` is the synchronous half: it decides, under a lock, whether an
//! answer may be sent and records it. `dispatch` sends a reservation to the
//! server. Two taps arriving back to back are therefore ordered by `reserve`
//! and only the first ever reaches the network.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::SubmitError;
use crate::gateway::SharedGateway;
use crate::models::{SubmissionRecord, SubmissionStatus, SubmitAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    /// No presentation windows are in use; any question may be answered once.
    Unrestricted,
    Open(i64),
    Closed,
}

#[derive(Debug)]
struct GuardState {
    window: Window,
    records: HashMap<i64, SubmissionRecord>,
    last_error: Option<SubmitError>,
}

/// Permission to send exactly one answer. Obtained from `reserve`.
///
/// The guard counts as busy while a reservation is alive. A reservation
/// dropped without being dispatched to completion marks its record failed,
/// so the question stays answered-once and the busy count is released.
#[must_use = "a reservation does nothing until it is dispatched"]
pub struct Reservation {
    pub participant_id: i64,
    pub question_id: i64,
    pub option_id: i64,
    state: Arc<Mutex<GuardState>>,
    in_flight: Arc<AtomicUsize>,
    settled: bool,
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("participant_id", &self.participant_id)
            .field("question_id", &self.question_id)
            .field("option_id", &self.option_id)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = lock_state(&self.state);
            if let Some(record) = state.records.get_mut(&self.question_id) {
                if record.status == SubmissionStatus::InFlight {
                    record.status = SubmissionStatus::Failed("answer was never sent".to_string());
                }
            }
            warn!(question_id = self.question_id, "Reserved answer dropped before it was sent");
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct AnswerSubmissionGuard {
    gateway: SharedGateway,
    state: Arc<Mutex<GuardState>>,
    in_flight: Arc<AtomicUsize>,
    send_lock: tokio::sync::Mutex<()>,
}

fn lock_state(state: &Mutex<GuardState>) -> MutexGuard<'_, GuardState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AnswerSubmissionGuard {
    pub fn new(gateway: SharedGateway) -> Self {
        Self {
            gateway,
            state: Arc::new(Mutex::new(GuardState {
                window: Window::Unrestricted,
                records: HashMap::new(),
                last_error: None,
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        lock_state(&self.state)
    }

    /// Start accepting an answer for `question_id` (and only that question).
    pub fn open_window(&self, question_id: i64) {
        let mut state = self.lock();
        state.window = Window::Open(question_id);
        state.last_error = None;
        debug!(question_id, "Answer window opened");
    }

    pub fn close_window(&self) {
        self.lock().window = Window::Closed;
    }

    /// True while an answer is reserved or on its way to the server. Option
    /// selection should be disabled meanwhile.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_error(&self) -> Option<SubmitError> {
        self.lock().last_error.clone()
    }

    pub fn record(&self, question_id: i64) -> Option<SubmissionRecord> {
        self.lock().records.get(&question_id).cloned()
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }

    /// Claim the single answer slot for `question_id`.
    pub fn reserve(&self, participant_id: i64, question_id: i64, option_id: i64) -> Result<Reservation, SubmitError> {
        let mut state = self.lock();
        match state.window {
            Window::Unrestricted => {}
            Window::Open(open) if open == question_id => {}
            _ => {
                debug!(question_id, "Answer rejected, question is not open");
                return Err(SubmitError::WindowClosed);
            }
        }
        if state.records.contains_key(&question_id) {
            debug!(question_id, option_id, "Duplicate answer rejected locally");
            return Err(SubmitError::AlreadySubmitted);
        }

        state.records.insert(
            question_id,
            SubmissionRecord {
                question_id,
                option_id,
                submitted_at: Utc::now(),
                status: SubmissionStatus::InFlight,
            },
        );
        // Counted from here so the UI locks before the request is even sent.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation {
            participant_id,
            question_id,
            option_id,
            state: self.state.clone(),
            in_flight: self.in_flight.clone(),
            settled: false,
        })
    }

    /// Send a reserved answer. Never retried.
    #[instrument(
        target = "quiz_participant::submission",
        skip(self, reservation),
        fields(question_id = reservation.question_id, option_id = reservation.option_id)
    )]
    pub async fn dispatch(&self, mut reservation: Reservation) -> Result<SubmitAck, SubmitError> {
        let _serial = self.send_lock.lock().await;

        let result = self
            .gateway
            .submit_answer(reservation.participant_id, reservation.question_id, reservation.option_id)
            .await
            .map_err(SubmitError::from);

        let mut state = self.lock();
        let status = match &result {
            Ok(_) => {
                info!("Answer submitted");
                SubmissionStatus::Acknowledged
            }
            Err(e) => {
                warn!(error = %e, "Answer submission failed");
                state.last_error = Some(e.clone());
                SubmissionStatus::Failed(e.to_string())
            }
        };
        if let Some(record) = state.records.get_mut(&reservation.question_id) {
            record.status = status;
        }
        drop(state);
        reservation.settled = true;
        result
    }

    /// `reserve` then `dispatch`.
    pub async fn submit(&self, participant_id: i64, question_id: i64, option_id: i64) -> Result<SubmitAck, SubmitError> {
        let reservation = self.reserve(participant_id, question_id, option_id).map_err(|e| {
            if matches!(e, SubmitError::AlreadySubmitted) {
                self.lock().last_error = Some(e.clone());
            }
            e
        })?;
        self.dispatch(reservation).await
    }
}
