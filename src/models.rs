//! Domain types shared by the gateway, poller, loader and controller, plus the
//! wire shapes exchanged with the quiz server.

use std::fmt;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::JoinError;

/// User-entered identifier naming one quiz session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    pub fn new(raw: &str) -> Result<Self, JoinError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(JoinError::InvalidCode);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub text: String,
    pub options: Vec<AnswerOption>,
}

/// One selectable answer as shown to the participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption {
    pub id: i64,
    pub content: OptionContent,
}

#[derive(Clone, PartialEq, Eq)]
pub enum OptionContent {
    Text(String),
    /// Decoded `data:<mime>;base64,...` payload.
    Image { mime_type: String, data: Vec<u8> },
}

impl fmt::Debug for OptionContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionContent::Text(text) => f.debug_tuple("Text").field(text).finish(),
            OptionContent::Image { mime_type, data } => f
                .debug_struct("Image")
                .field("mime_type", mime_type)
                .field("bytes", &data.len())
                .finish(),
        }
    }
}

impl fmt::Display for OptionContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionContent::Text(text) => f.write_str(text),
            OptionContent::Image { mime_type, data } => {
                write!(f, "[image {}, {} bytes]", mime_type, data.len())
            }
        }
    }
}

impl OptionContent {
    /// Classify raw option text. Only well-formed base64 data URIs become images;
    /// anything else, including a data URI that fails to decode, stays text.
    pub fn from_raw(raw: &str) -> Self {
        let Some(rest) = raw.strip_prefix("data:") else {
            return OptionContent::Text(raw.to_string());
        };
        let Some((meta, payload)) = rest.split_once(',') else {
            return OptionContent::Text(raw.to_string());
        };
        let Some(mime_type) = meta.strip_suffix(";base64") else {
            return OptionContent::Text(raw.to_string());
        };
        if !mime_type.starts_with("image/") {
            return OptionContent::Text(raw.to_string());
        }

        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        match base64::engine::general_purpose::STANDARD.decode(cleaned.as_bytes()) {
            Ok(data) => OptionContent::Image {
                mime_type: mime_type.to_string(),
                data,
            },
            Err(e) => {
                warn!(error = %e, mime_type, "Option image payload is not valid base64, showing as text");
                OptionContent::Text(raw.to_string())
            }
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, OptionContent::Image { .. })
    }
}

/// Result of the most recent activation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    #[default]
    Unknown,
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionState {
    AwaitingActivation,
    LoadingQuestions,
    Presenting(usize),
    Completed,
}

impl ProgressionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressionState::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    InFlight,
    Acknowledged,
    Failed(String),
}

/// The one answer recorded for a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub question_id: i64,
    pub option_id: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
}

/// Whatever the server sends back for an accepted answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SubmitAck(pub serde_json::Value);

// Wire shapes

#[derive(Debug, Serialize)]
pub(crate) struct JoinRequest<'a> {
    pub code: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JoinResponse {
    pub participant: Participant,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActiveRequest<'a> {
    pub code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitRequest {
    pub participant_id: i64,
    pub question_id: i64,
    pub selected_option_id: i64,
}

/// Body of a successful `getIfActive` call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActivePayload {
    #[serde(default)]
    pub questions: Option<Vec<RawQuestion>>,
}

impl ActivePayload {
    /// The server signals activation by shipping a non-empty question list.
    pub fn is_active(&self) -> bool {
        self.questions.as_ref().is_some_and(|q| !q.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawQuestion {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<RawOption>,
}

/// Option as sent by the server. The correctness flag is read so the payload
/// parses, but it never leaves this type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawOption {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "isCorrect", default)]
    #[allow(dead_code)]
    is_correct: bool,
}

impl RawOption {
    pub fn into_option(self) -> AnswerOption {
        AnswerOption {
            id: self.id,
            content: OptionContent::from_raw(&self.text),
        }
    }
}

impl RawQuestion {
    pub fn into_question(self) -> Question {
        Question {
            id: self.id,
            text: self.text,
            options: self.options.into_iter().map(RawOption::into_option).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_code_is_trimmed_and_non_empty() {
        assert_eq!(SessionCode::new("  ABCD ").unwrap().as_str(), "ABCD");
        assert_eq!(SessionCode::new("   ").unwrap_err(), JoinError::InvalidCode);
    }

    #[test]
    fn plain_text_option_stays_text() {
        assert_eq!(OptionContent::from_raw("Mendoza"), OptionContent::Text("Mendoza".into()));
        assert_eq!(OptionContent::from_raw("data: not really"), OptionContent::Text("data: not really".into()));
    }

    #[test]
    fn data_uri_option_becomes_image() {
        // "GIF8" base64 encoded
        let content = OptionContent::from_raw("data:image/gif;base64,R0lGOA==");
        assert_eq!(
            content,
            OptionContent::Image { mime_type: "image/gif".into(), data: b"GIF8".to_vec() }
        );
        assert_eq!(content.to_string(), "[image image/gif, 4 bytes]");
    }

    #[test]
    fn broken_image_payload_falls_back_to_text() {
        let raw = "data:image/png;base64,@@@";
        assert_eq!(OptionContent::from_raw(raw), OptionContent::Text(raw.into()));
    }

    #[test]
    fn payload_activity_requires_questions() {
        let empty: ActivePayload = serde_json::from_str(r#"{"questions": []}"#).unwrap();
        assert!(!empty.is_active());
        let missing: ActivePayload = serde_json::from_str("{}").unwrap();
        assert!(!missing.is_active());
        let active: ActivePayload = serde_json::from_str(
            r#"{"questions":[{"id":1,"text":"Q","options":[{"id":10,"text":"A","isCorrect":true}]}]}"#,
        )
        .unwrap();
        assert!(active.is_active());
    }

    #[test]
    fn normalization_keeps_order_and_drops_correctness() {
        let raw: RawQuestion = serde_json::from_str(
            r#"{"id":3,"text":"Capital?","options":[{"id":1,"text":"A","isCorrect":false},{"id":2,"text":"B","isCorrect":true}]}"#,
        )
        .unwrap();
        let question = raw.into_question();
        assert_eq!(question.id, 3);
        let ids: Vec<i64> = question.options.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn submit_request_uses_server_field_names() {
        let body = serde_json::to_value(SubmitRequest {
            participant_id: 7,
            question_id: 11,
            selected_option_id: 42,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"participantId": 7, "questionId": 11, "selectedOptionId": 42}));
    }
}
