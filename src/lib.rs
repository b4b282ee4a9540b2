pub mod clients;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gateway;
pub mod loader;
pub mod models;
pub mod poller;
pub mod session;
pub mod submission;

// Convenient re-exports
pub use config::ClientConfig;
pub use controller::{QuizEvent, QuizEvents, QuizProgressionController, QuizSession};
pub use gateway::{QuizGateway, SharedGateway};
pub use models::{ActivationState, OptionContent, Participant, ProgressionState, Question, SessionCode};
pub use session::{JoinedSession, QuizClient};
