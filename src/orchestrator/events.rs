use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::{RecordingSession, SessionStage};

/// Emitted on every stage transition for the store and any monitoring
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub stage: SessionStage,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionEvent {
    pub fn for_session(session: &RecordingSession) -> Self {
        Self {
            session_id: session.id,
            stage: session.stage,
            timestamp: Utc::now(),
            error: session.error.clone(),
        }
    }
}
