use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Normalized values for one step: field name -> value.
pub type StepData = serde_json::Map<String, serde_json::Value>;

/// Accumulated answers across a flow: step name -> field name -> value.
pub type CollectedData = BTreeMap<String, StepData>;

/// Position within a flow: a 0-based step index or the completion sentinel.
///
/// Serialized as the bare index, or the string `"complete"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCursor {
    At(usize),
    Complete,
}

impl StepCursor {
    pub fn index(&self) -> Option<usize> {
        match self {
            StepCursor::At(i) => Some(*i),
            StepCursor::Complete => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, StepCursor::Complete)
    }
}

impl fmt::Display for StepCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepCursor::At(i) => write!(f, "{i}"),
            StepCursor::Complete => write!(f, "complete"),
        }
    }
}

impl Serialize for StepCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StepCursor::At(i) => serializer.serialize_u64(*i as u64),
            StepCursor::Complete => serializer.serialize_str("complete"),
        }
    }
}

struct StepCursorVisitor;

impl<'de> Visitor<'de> for StepCursorVisitor {
    type Value = StepCursor;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a step index or the string \"complete\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<StepCursor, E> {
        Ok(StepCursor::At(v as usize))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<StepCursor, E> {
        if v < 0 {
            return Err(E::custom("step index cannot be negative"));
        }
        Ok(StepCursor::At(v as usize))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<StepCursor, E> {
        if v == "complete" {
            Ok(StepCursor::Complete)
        } else {
            Err(E::custom(format!("unexpected step cursor: {v}")))
        }
    }
}

impl<'de> Deserialize<'de> for StepCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<StepCursor, D::Error> {
        deserializer.deserialize_any(StepCursorVisitor)
    }
}

/// Interaction mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Conversational,
    Guided,
}

/// Live progress through one guided flow.
///
/// Holding this inside an `Option` on the session makes the invariant
/// "mode = guided iff a flow is set" structural.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowProgress {
    pub flow_id: String,
    pub cursor: StepCursor,
    pub collected: CollectedData,
    /// Autofill defaults, same shape as `collected`. Always editable;
    /// collected values win at view time.
    pub prefill: CollectedData,
    pub quote_id: Option<String>,
}

impl FlowProgress {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            cursor: StepCursor::At(0),
            collected: CollectedData::new(),
            prefill: CollectedData::new(),
            quote_id: None,
        }
    }
}

/// One per user conversation; short-lived (cache TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub flow: Option<FlowProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_id)
    }

    pub fn with_id(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            flow: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mode(&self) -> SessionMode {
        if self.flow.is_some() {
            SessionMode::Guided
        } else {
            SessionMode::Conversational
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lifecycle status of a form draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    InProgress,
    Complete,
    Abandoned,
}

/// Resumable snapshot of in-progress flow state, one per (session, flow).
///
/// Long-lived by design: its TTL outlives the session's so a user can resume
/// after the live session expires. Carries `user_id` so a session can be
/// rebuilt from the draft alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDraft {
    pub session_id: String,
    pub flow_id: String,
    pub user_id: String,
    pub step: StepCursor,
    pub collected: CollectedData,
    pub prefill: CollectedData,
    pub quote_id: Option<String>,
    pub status: DraftStatus,
    pub updated_at: DateTime<Utc>,
}

impl FormDraft {
    /// Snapshot the current guided progress of a session.
    pub fn snapshot(session: &Session, progress: &FlowProgress) -> Self {
        Self {
            session_id: session.session_id.clone(),
            flow_id: progress.flow_id.clone(),
            user_id: session.user_id.clone(),
            step: progress.cursor,
            collected: progress.collected.clone(),
            prefill: progress.prefill.clone(),
            quote_id: progress.quote_id.clone(),
            status: DraftStatus::InProgress,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild a live session from this draft (resume after session expiry).
    pub fn restore_session(&self) -> Session {
        let mut session = Session::with_id(self.session_id.clone(), self.user_id.clone());
        session.flow = Some(FlowProgress {
            flow_id: self.flow_id.clone(),
            cursor: self.step,
            collected: self.collected.clone(),
            prefill: self.prefill.clone(),
            quote_id: self.quote_id.clone(),
        });
        session
    }
}
