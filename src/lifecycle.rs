use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::generator::AnswerGenerator;
use crate::session::{ActiveRecord, Session};
use crate::storage::{DocumentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    NotFound,
}

/// Structured result of the archive/delete operations. `NotFound` is
/// an expected outcome, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub message: String,
}

impl Outcome {
    fn success(message: &str) -> Self {
        Self { status: OutcomeStatus::Success, message: message.to_string() }
    }

    fn not_found(session_id: &str, customer_id: &str) -> Self {
        Self {
            status: OutcomeStatus::NotFound,
            message: format!(
                "Entity with session_id '{session_id}' does not exist for customer_id '{customer_id}'. \
                 This may be because the session was only initialized and with no messages ever sent by the user, \
                 resulting in only a placeholder session being created."
            ),
        }
    }
}

/// The session lifecycle core: resolves which record is "the" active
/// session for a customer, retires superseded sessions into the
/// archive tier, and persists the updated state after each turn. Both
/// store tiers and the generator are injected capabilities.
pub struct LifecycleManager {
    active_store: Arc<dyn DocumentStore>,
    archive_store: Arc<dyn DocumentStore>,
    generator: Arc<dyn AnswerGenerator>,
}

impl LifecycleManager {
    pub fn new(
        active_store: Arc<dyn DocumentStore>,
        archive_store: Arc<dyn DocumentStore>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self { active_store, archive_store, generator }
    }

    /// Runs one full chat turn: resolve the session, generate the
    /// answer, persist the updated active record. Only generation and
    /// the final upsert can fail; resolution never does.
    pub async fn chat(
        &self,
        session_id: &str,
        customer_id: &str,
        question: &str,
    ) -> anyhow::Result<String> {
        let session = self.resolve_session(session_id, customer_id, question).await;
        let session = self
            .generator
            .generate(session)
            .await
            .context("answer generation failed")?;

        let record = session.to_active_record();
        let body = serde_json::to_value(&record)?;
        self.active_store
            .upsert(&record.customer_id, body)
            .await
            .map_err(|e| anyhow::Error::new(e).context("persisting active session state"))?;
        counter!("chat_turns_total").increment(1);
        Ok(session.answer)
    }

    /// Determines the session state for this turn. Queries every
    /// active record for the customer, retires the ones with a
    /// different session_id (best-effort, one failure does not stop
    /// the others), and resumes the exact match if one exists.
    ///
    /// Never returns an error: a failing query degrades to a fresh
    /// session so the chat endpoint stays responsive, at the cost of
    /// continuity during a store outage. Deliberate policy; the
    /// fallback is logged and counted so an outage is visible.
    pub async fn resolve_session(
        &self,
        session_id: &str,
        customer_id: &str,
        question: &str,
    ) -> Session {
        let documents = match self.active_store.query_eq("customer_id", customer_id).await {
            Ok(documents) => documents,
            Err(err) => {
                warn!(%customer_id, error = %err, "active-store query failed, starting a fresh session");
                counter!("resolve_fallbacks_total").increment(1);
                return Session::fresh(session_id, customer_id, question);
            }
        };

        let mut current: Option<ActiveRecord> = None;
        for document in documents {
            let record: ActiveRecord = match serde_json::from_value(document) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%customer_id, error = %err, "skipping malformed active record");
                    continue;
                }
            };
            if record.session_id == session_id {
                current = Some(record);
            } else if let Err(err) = self.retire(&record.session_id, customer_id).await {
                warn!(
                    stale_session_id = %record.session_id,
                    %customer_id,
                    error = %err,
                    "failed to retire stale session"
                );
            }
        }

        match current {
            Some(record) => Session::resume(record, question),
            None => Session::fresh(session_id, customer_id, question),
        }
    }

    /// Archive strictly before delete: an archived-but-not-deleted
    /// record is recoverable, a deleted-but-not-archived record is
    /// data loss. A fatal archive error therefore skips the delete. A
    /// not-found archive outcome still proceeds, clearing placeholder
    /// records that never held a user message.
    async fn retire(&self, session_id: &str, customer_id: &str) -> anyhow::Result<()> {
        self.archive(session_id, customer_id).await?;
        self.delete_active(session_id, customer_id).await?;
        counter!("sessions_retired_total").increment(1);
        Ok(())
    }

    /// Copies the active record into the archive tier, re-keyed to the
    /// archived shape and stamped with the retirement instant. Store
    /// failures here are fatal and surfaced; losing archival data is
    /// worse than failing loudly.
    pub async fn archive(&self, session_id: &str, customer_id: &str) -> anyhow::Result<Outcome> {
        let document = match self.active_store.read(session_id, customer_id).await {
            Ok(document) => document,
            Err(StoreError::NotFound) => return Ok(Outcome::not_found(session_id, customer_id)),
            Err(err) => {
                return Err(anyhow::Error::new(err).context("reading active record for archival"));
            }
        };
        let record: ActiveRecord =
            serde_json::from_value(document).context("decoding active record")?;
        let archived = record.into_archived(Utc::now());
        let body = serde_json::to_value(&archived)?;
        self.archive_store
            .upsert(customer_id, body)
            .await
            .map_err(|e| anyhow::Error::new(e).context("writing archive record"))?;
        counter!("interactions_archived_total").increment(1);
        Ok(Outcome::success("Interaction data saved successfully."))
    }

    /// Removes the active record. Absent records are a not-found
    /// outcome (same messaging as archive); other failures surface.
    pub async fn delete_active(
        &self,
        session_id: &str,
        customer_id: &str,
    ) -> anyhow::Result<Outcome> {
        match self.active_store.delete(session_id, customer_id).await {
            Ok(()) => Ok(Outcome::success(
                "Session state deleted successfully from active store.",
            )),
            Err(StoreError::NotFound) => Ok(Outcome::not_found(session_id, customer_id)),
            Err(err) => Err(anyhow::Error::new(err).context("deleting active record")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::CannedGenerator;
    use crate::session::{ArchivedInteraction, GREETING, Role};
    use crate::storage::MemoryDocumentStore;
    use async_trait::async_trait;
    use serde_json::Value;

    fn manager_with(
        active: Arc<dyn DocumentStore>,
        archive: Arc<dyn DocumentStore>,
    ) -> LifecycleManager {
        LifecycleManager::new(active, archive, Arc::new(CannedGenerator { answer: "42".into() }))
    }

    fn manager() -> (LifecycleManager, MemoryDocumentStore, MemoryDocumentStore) {
        let active = MemoryDocumentStore::default();
        let archive = MemoryDocumentStore::default();
        let mgr = manager_with(Arc::new(active.clone()), Arc::new(archive.clone()));
        (mgr, active, archive)
    }

    async fn stored_record(store: &MemoryDocumentStore, id: &str, pk: &str) -> ActiveRecord {
        serde_json::from_value(store.read(id, pk).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn first_turn_stores_greeting_user_answer() {
        let (mgr, active, _) = manager();
        let answer = mgr.chat("s-1", "c-1", "hello").await.unwrap();
        assert_eq!(answer, "42");

        let record = stored_record(&active, "s-1", "c-1").await;
        assert_eq!(record.chat_history.len(), 3);
        assert_eq!(record.chat_history[0].content, GREETING);
        assert_eq!(record.chat_history[1].role, Role::User);
        assert_eq!(record.chat_history[1].content, "hello");
        assert_eq!(record.chat_history[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn later_turns_append_exactly_two() {
        let (mgr, active, _) = manager();
        mgr.chat("s-1", "c-1", "one").await.unwrap();
        let before = stored_record(&active, "s-1", "c-1").await.chat_history;

        mgr.chat("s-1", "c-1", "two").await.unwrap();
        let after = stored_record(&active, "s-1", "c-1").await.chat_history;

        assert_eq!(after.len(), before.len() + 2);
        // append-only: the prior turns are untouched
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after[before.len()].content, "two");
    }

    #[tokio::test]
    async fn new_session_retires_previous_one() {
        let (mgr, active, archive) = manager();
        mgr.chat("s-1", "c-1", "hi").await.unwrap();
        mgr.chat("s-2", "c-1", "hi again").await.unwrap();

        assert!(matches!(active.read("s-1", "c-1").await, Err(StoreError::NotFound)));
        assert!(active.read("s-2", "c-1").await.is_ok());

        let archived_value = archive.read("s-1", "c-1").await.unwrap();
        for turn in archived_value["chat_history"].as_array().unwrap() {
            assert!(turn.get("sender").is_some());
            assert!(turn.get("role").is_none());
        }
        let archived: ArchivedInteraction = serde_json::from_value(archived_value).unwrap();
        assert_eq!(archived.session_id, "s-1");
        assert_eq!(archived.chat_history.len(), 3);
    }

    #[tokio::test]
    async fn archive_of_unknown_session_is_not_found() {
        let (mgr, _, archive) = manager();
        let outcome = mgr.archive("never-created", "c-1").await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::NotFound);
        assert!(outcome.message.contains("placeholder"));
        assert!(matches!(archive.read("never-created", "c-1").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found_second_time() {
        let (mgr, _, _) = manager();
        mgr.chat("s-1", "c-1", "hi").await.unwrap();

        let first = mgr.delete_active("s-1", "c-1").await.unwrap();
        assert_eq!(first.status, OutcomeStatus::Success);
        let second = mgr.delete_active("s-1", "c-1").await.unwrap();
        assert_eq!(second.status, OutcomeStatus::NotFound);
    }

    #[tokio::test]
    async fn archive_twice_without_delete_overwrites() {
        let (mgr, _, archive) = manager();
        mgr.chat("s-1", "c-1", "hi").await.unwrap();

        let first = mgr.archive("s-1", "c-1").await.unwrap();
        assert_eq!(first.status, OutcomeStatus::Success);
        let first_end: ArchivedInteraction =
            serde_json::from_value(archive.read("s-1", "c-1").await.unwrap()).unwrap();

        let second = mgr.archive("s-1", "c-1").await.unwrap();
        assert_eq!(second.status, OutcomeStatus::Success);
        let second_end: ArchivedInteraction =
            serde_json::from_value(archive.read("s-1", "c-1").await.unwrap()).unwrap();

        // single record, later end_timestamp wins
        assert_eq!(archive.query_eq("customer_id", "c-1").await.unwrap().len(), 1);
        assert!(second_end.end_timestamp >= first_end.end_timestamp);
    }

    /// Always-failing store, for the resolve fallback path.
    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn read(&self, _: &str, _: &str) -> Result<Value, StoreError> {
            Err(StoreError::Backend("store unreachable".into()))
        }
        async fn upsert(&self, _: &str, _: Value) -> Result<(), StoreError> {
            Err(StoreError::Backend("store unreachable".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("store unreachable".into()))
        }
        async fn query_eq(&self, _: &str, _: &str) -> Result<Vec<Value>, StoreError> {
            Err(StoreError::Backend("store unreachable".into()))
        }
    }

    #[tokio::test]
    async fn resolve_falls_back_to_fresh_session_on_query_failure() {
        let mgr = manager_with(Arc::new(BrokenStore), Arc::new(MemoryDocumentStore::default()));
        let session = mgr.resolve_session("s-1", "c-1", "hi").await;
        assert_eq!(session.session_id, "s-1");
        assert_eq!(session.input, "hi");
        assert!(session.chat_history.is_empty());
        assert!(session.context.is_empty());
    }

    #[tokio::test]
    async fn archive_failure_surfaces_instead_of_being_absorbed() {
        let active = MemoryDocumentStore::default();
        let mgr = manager_with(Arc::new(active.clone()), Arc::new(BrokenStore));
        mgr.chat("s-1", "c-1", "hi").await.unwrap();
        assert!(mgr.archive("s-1", "c-1").await.is_err());
    }

    /// Archive tier that rejects writes for one session id.
    struct RejectingArchive {
        inner: MemoryDocumentStore,
        reject_id: String,
    }

    #[async_trait]
    impl DocumentStore for RejectingArchive {
        async fn read(&self, id: &str, pk: &str) -> Result<Value, StoreError> {
            self.inner.read(id, pk).await
        }
        async fn upsert(&self, pk: &str, document: Value) -> Result<(), StoreError> {
            if document.get("id").and_then(Value::as_str) == Some(self.reject_id.as_str()) {
                return Err(StoreError::Backend("write rejected".into()));
            }
            self.inner.upsert(pk, document).await
        }
        async fn delete(&self, id: &str, pk: &str) -> Result<(), StoreError> {
            self.inner.delete(id, pk).await
        }
        async fn query_eq(&self, attribute: &str, value: &str) -> Result<Vec<Value>, StoreError> {
            self.inner.query_eq(attribute, value).await
        }
    }

    #[tokio::test]
    async fn failed_retirement_skips_delete_and_spares_the_rest() {
        let active = MemoryDocumentStore::default();
        let archive = MemoryDocumentStore::default();
        let rejecting =
            RejectingArchive { inner: archive.clone(), reject_id: "s-bad".into() };
        let mgr = manager_with(Arc::new(active.clone()), Arc::new(rejecting));

        for id in ["s-bad", "s-old"] {
            let record = Session::fresh(id, "c-1", "x").to_active_record();
            active.upsert("c-1", serde_json::to_value(&record).unwrap()).await.unwrap();
        }

        let session = mgr.resolve_session("s-new", "c-1", "hi").await;
        assert!(session.chat_history.is_empty());

        // s-old was archived and deleted
        assert!(matches!(active.read("s-old", "c-1").await, Err(StoreError::NotFound)));
        assert!(archive.read("s-old", "c-1").await.is_ok());
        // s-bad's archive write failed, so its delete was skipped
        assert!(active.read("s-bad", "c-1").await.is_ok());
        assert!(matches!(archive.read("s-bad", "c-1").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn concurrent_turns_last_writer_wins() {
        let (mgr, active, _) = manager();
        mgr.chat("s-1", "c-1", "seed").await.unwrap();

        // two overlapping turns resolve from the same snapshot
        let mut a = mgr.resolve_session("s-1", "c-1", "turn a").await;
        let mut b = mgr.resolve_session("s-1", "c-1", "turn b").await;
        assert_eq!(a.chat_history, b.chat_history);

        let now = Utc::now();
        a.append_exchange("answer a".into(), Vec::new(), now, now);
        b.append_exchange("answer b".into(), Vec::new(), now, now);

        let rec_a = serde_json::to_value(a.to_active_record()).unwrap();
        let rec_b = serde_json::to_value(b.to_active_record()).unwrap();
        active.upsert("c-1", rec_a).await.unwrap();
        active.upsert("c-1", rec_b).await.unwrap();

        // a's additions are silently overwritten, documented behavior
        let survived = stored_record(&active, "s-1", "c-1").await.chat_history;
        assert_eq!(survived.len(), 5);
        assert_eq!(survived[4].content, "answer b");
        assert!(!survived.iter().any(|t| t.content == "answer a"));
    }
}
