use super::StagedBatch;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Parsed,
    Confirmed,
    Committing,
    Committed,
    Failed,
    Discarded,
}

impl ImportState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Confirmed => "confirmed",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Discarded => "discarded",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StagedImport {
    pub batch: StagedBatch,
    pub state: ImportState,
    pub staged_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreviewError {
    #[error("no staged import for this session")]
    NotStaged,
    #[error("staged import is {0}")]
    InvalidState(&'static str),
}

#[derive(Debug, Default)]
pub struct PreviewStore {
    sessions: HashMap<String, StagedImport>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.sessions.retain(|session, s| {
            let live = s.state == ImportState::Committing || s.expires_at > now;
            if !live {
                tracing::debug!(session = %session, "staged import expired");
            }
            live
        });
    }

    pub fn stage(
        &mut self,
        session: &str,
        batch: StagedBatch,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<&StagedImport, PreviewError> {
        self.purge_expired(now);
        if let Some(existing) = self.sessions.get(session) {
            if existing.state == ImportState::Committing {
                return Err(PreviewError::InvalidState(existing.state.as_str()));
            }
        }
        self.sessions.insert(
            session.to_string(),
            StagedImport {
                batch,
                state: ImportState::Parsed,
                staged_at: now,
                expires_at: now + Duration::seconds(ttl_seconds),
                last_error: None,
            },
        );
        self.sessions.get(session).ok_or(PreviewError::NotStaged)
    }

    pub fn get(&mut self, session: &str, now: DateTime<Utc>) -> Result<&StagedImport, PreviewError> {
        self.purge_expired(now);
        self.sessions.get(session).ok_or(PreviewError::NotStaged)
    }

    pub fn confirm(&mut self, session: &str, now: DateTime<Utc>) -> Result<(), PreviewError> {
        self.purge_expired(now);
        let staged = self.sessions.get_mut(session).ok_or(PreviewError::NotStaged)?;
        match staged.state {
            ImportState::Parsed | ImportState::Failed | ImportState::Confirmed => {
                staged.state = ImportState::Confirmed;
                Ok(())
            }
            other => Err(PreviewError::InvalidState(other.as_str())),
        }
    }

    /// Confirms the staged batch and hands out a copy to commit. A failed
    /// commit can be retried.
    pub fn begin_commit(&mut self, session: &str, now: DateTime<Utc>) -> Result<StagedBatch, PreviewError> {
        self.confirm(session, now)?;
        let staged = self.sessions.get_mut(session).ok_or(PreviewError::NotStaged)?;
        staged.state = ImportState::Committing;
        Ok(staged.batch.clone())
    }

    pub fn complete(&mut self, session: &str) -> ImportState {
        self.sessions.remove(session);
        ImportState::Committed
    }

    pub fn fail(&mut self, session: &str, message: impl Into<String>) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.state = ImportState::Failed;
            s.last_error = Some(message.into());
        }
    }

    pub fn discard(&mut self, session: &str, now: DateTime<Utc>) -> Result<ImportState, PreviewError> {
        self.purge_expired(now);
        match self.sessions.get(session).map(|s| s.state) {
            None => Err(PreviewError::NotStaged),
            Some(ImportState::Committing) => Err(PreviewError::InvalidState("committing")),
            Some(_) => {
                self.sessions.remove(session);
                Ok(ImportState::Discarded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ImportKind;

    fn batch(rows: usize) -> StagedBatch {
        StagedBatch {
            kind: ImportKind::Roster,
            target_semester_id: 1,
            target_semester: 1,
            header_row: 1,
            header_detected: true,
            positional: false,
            rows: (0..rows)
                .map(|i| crate::ingest::rows::NormalizedRow {
                    source_row: i + 2,
                    ..Default::default()
                })
                .collect(),
            skipped_blank: 0,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn restaging_replaces_the_previous_batch() {
        let mut store = PreviewStore::new();
        let now = Utc::now();
        store.stage("s1", batch(3), 60, now).expect("stage");
        store.stage("s1", batch(5), 60, now).expect("restage");
        assert_eq!(store.get("s1", now).expect("get").batch.rows.len(), 5);
    }

    #[test]
    fn expired_entries_are_gone() {
        let mut store = PreviewStore::new();
        let now = Utc::now();
        store.stage("s1", batch(1), 60, now).expect("stage");
        let later = now + Duration::seconds(61);
        assert_eq!(store.get("s1", later).err(), Some(PreviewError::NotStaged));
        assert_eq!(store.begin_commit("s1", later).err(), Some(PreviewError::NotStaged));
    }

    #[test]
    fn commit_lifecycle_allows_retry_after_failure() {
        let mut store = PreviewStore::new();
        let now = Utc::now();
        store.stage("s1", batch(2), 60, now).expect("stage");
        store.begin_commit("s1", now).expect("begin");
        assert_eq!(
            store.begin_commit("s1", now).err(),
            Some(PreviewError::InvalidState("committing"))
        );
        assert!(store.discard("s1", now).is_err());

        store.fail("s1", "database is locked");
        let staged = store.get("s1", now).expect("get");
        assert_eq!(staged.state, ImportState::Failed);
        assert_eq!(staged.last_error.as_deref(), Some("database is locked"));

        store.confirm("s1", now).expect("confirm");
        assert_eq!(store.get("s1", now).expect("get").state, ImportState::Confirmed);
        store.begin_commit("s1", now).expect("retry");
        assert_eq!(store.complete("s1"), ImportState::Committed);
        assert_eq!(store.get("s1", now).err(), Some(PreviewError::NotStaged));
    }

    #[test]
    fn discard_drops_the_session_only() {
        let mut store = PreviewStore::new();
        let now = Utc::now();
        store.stage("a", batch(1), 60, now).expect("a");
        store.stage("b", batch(1), 60, now).expect("b");
        assert_eq!(store.discard("a", now), Ok(ImportState::Discarded));
        assert!(store.get("a", now).is_err());
        assert!(store.get("b", now).is_ok());
        assert_eq!(store.discard("a", now), Err(PreviewError::NotStaged));
    }
}
