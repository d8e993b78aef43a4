use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed assistant greeting, synthesized as the first turn of every
/// brand-new session.
pub const GREETING: &str = "Hello! I am Sophia, your helpful assistant. I can assist with any information you need regarding the company. How can I help you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One turn as it appears in an archived interaction. Same shape as
/// `Turn` except the role is keyed `sender`; archive consumers depend
/// on that rename, so it is kept as a distinct type rather than a
/// serde alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTurn {
    pub sender: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// The record shape persisted in the active store. `id` always equals
/// `session_id`; the partition key is `customer_id`. Transient session
/// fields (`input`, `context`, `answer`) are deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub id: String,
    pub session_id: String,
    pub chat_history: Vec<Turn>,
    pub customer_id: String,
}

/// Immutable record written to the archive store when a session is
/// retired. Never updated in place after the first write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedInteraction {
    pub id: String,
    pub session_id: String,
    pub chat_history: Vec<ArchivedTurn>,
    pub end_timestamp: DateTime<Utc>,
    pub customer_id: String,
}

impl ActiveRecord {
    pub fn into_archived(self, end_timestamp: DateTime<Utc>) -> ArchivedInteraction {
        let chat_history = self
            .chat_history
            .into_iter()
            .map(|turn| ArchivedTurn {
                sender: turn.role,
                content: turn.content,
                timestamp: turn.timestamp,
            })
            .collect();
        ArchivedInteraction {
            id: self.session_id.clone(),
            session_id: self.session_id,
            chat_history,
            end_timestamp,
            customer_id: self.customer_id,
        }
    }
}

/// In-flight conversational state for one chat turn. `input`, `context`
/// and `answer` exist only between resolve and persist; only the
/// projection in [`Session::to_active_record`] ever reaches storage.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub customer_id: String,
    pub input: String,
    pub chat_history: Vec<Turn>,
    pub context: Vec<String>,
    pub answer: String,
}

impl Session {
    /// A brand-new session with no history.
    pub fn fresh(session_id: &str, customer_id: &str, question: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            customer_id: customer_id.to_string(),
            input: question.to_string(),
            chat_history: Vec::new(),
            context: Vec::new(),
            answer: String::new(),
        }
    }

    /// Resumes a stored session for a new turn. `context` starts empty
    /// on every load; it never survives a round trip.
    pub fn resume(record: ActiveRecord, question: &str) -> Self {
        Self {
            session_id: record.session_id,
            customer_id: record.customer_id,
            input: question.to_string(),
            chat_history: record.chat_history,
            context: Vec::new(),
            answer: String::new(),
        }
    }

    pub fn to_active_record(&self) -> ActiveRecord {
        ActiveRecord {
            id: self.session_id.clone(),
            session_id: self.session_id.clone(),
            chat_history: self.chat_history.clone(),
            customer_id: self.customer_id.clone(),
        }
    }

    /// Prepends the fixed greeting to an empty history. No-op once the
    /// session has any turns.
    pub fn ensure_greeting(&mut self) {
        if self.chat_history.is_empty() {
            self.chat_history.push(Turn {
                role: Role::Assistant,
                content: GREETING.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Appends the user turn (the current `input`, stamped `asked_at`)
    /// and the assistant turn (stamped `answered_at`), in that order,
    /// and records the answer plus the retrieval context used.
    pub fn append_exchange(
        &mut self,
        answer: String,
        context: Vec<String>,
        asked_at: DateTime<Utc>,
        answered_at: DateTime<Utc>,
    ) {
        self.chat_history.push(Turn {
            role: Role::User,
            content: self.input.clone(),
            timestamp: asked_at,
        });
        self.chat_history.push(Turn {
            role: Role::Assistant,
            content: answer.clone(),
            timestamp: answered_at,
        });
        self.context = context;
        self.answer = answer;
    }
}
