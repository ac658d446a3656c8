use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use sitesmith_core::history::{Action, HistoryRecord};
use sitesmith_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;

/// A workspace as it was last committed.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredWorkspace {
    pub document: String,
    pub history: Vec<HistoryRecord>,
}

/// Durable storage for workspace documents and their command history.
///
/// `save` must be atomic: either the document and the new history record are
/// both committed, or nothing is.
pub trait PersistenceStore: Send + Sync {
    fn save(
        &self,
        session_id: &SessionId,
        document: &str,
        record: &HistoryRecord,
    ) -> Result<(), StoreError>;

    fn load(&self, session_id: &SessionId) -> Result<Option<StoredWorkspace>, StoreError>;

    /// Current document only, without history.
    fn document(&self, session_id: &SessionId) -> Result<Option<String>, StoreError>;

    /// Remove the document and its history. Clearing an unknown session is a no-op.
    fn clear(&self, session_id: &SessionId) -> Result<(), StoreError>;
}

/// SQLite-backed [`PersistenceStore`].
#[derive(Clone)]
pub struct DocumentRepo {
    db: Database,
}

impl DocumentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_record(command: String, action: String, created_at: String) -> Result<HistoryRecord, StoreError> {
    let action: Action = action.parse().map_err(StoreError::Serialization)?;
    let timestamp = DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc);
    Ok(HistoryRecord {
        command,
        timestamp,
        action,
    })
}

impl PersistenceStore for DocumentRepo {
    #[instrument(skip(self, document, record), fields(session_id = %session_id, action = %record.action))]
    fn save(
        &self,
        session_id: &SessionId,
        document: &str,
        record: &HistoryRecord,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO documents (session_id, document, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at",
                rusqlite::params![session_id.as_str(), document, now],
            )?;
            tx.execute(
                "INSERT INTO history (session_id, seq, command, action, created_at)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), -1) + 1 FROM history WHERE session_id = ?1), ?2, ?3, ?4)",
                rusqlite::params![
                    session_id.as_str(),
                    record.command,
                    record.action.as_str(),
                    record.timestamp.to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        debug!(bytes = document.len(), "document saved");
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    fn load(&self, session_id: &SessionId) -> Result<Option<StoredWorkspace>, StoreError> {
        self.db.with_conn(|conn| {
            let document: Option<String> = conn
                .query_row(
                    "SELECT document FROM documents WHERE session_id = ?1",
                    [session_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(document) = document else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT command, action, created_at FROM history WHERE session_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map([session_id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let history = rows
                .into_iter()
                .map(|(command, action, created_at)| parse_record(command, action, created_at))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(StoredWorkspace { document, history }))
        })
    }

    fn document(&self, session_id: &SessionId) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT document FROM documents WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    fn clear(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            tx.execute("DELETE FROM history WHERE session_id = ?1", [session_id.as_str()])?;
            tx.execute("DELETE FROM documents WHERE session_id = ?1", [session_id.as_str()])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> DocumentRepo {
        DocumentRepo::new(Database::in_memory().unwrap())
    }

    fn sid(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    #[test]
    fn load_unknown_session_is_none() {
        let repo = repo();
        assert!(repo.load(&sid("nobody")).unwrap().is_none());
        assert!(repo.document(&sid("nobody")).unwrap().is_none());
    }

    #[test]
    fn save_then_load_keeps_history_order() {
        let repo = repo();
        let id = sid("site-1");
        repo.save(&id, "<html>v1</html>", &HistoryRecord::new("build a bakery site", Action::Created))
            .unwrap();
        repo.save(&id, "<html>v2</html>", &HistoryRecord::new("change the header", Action::Modified))
            .unwrap();
        repo.save(&id, "<html>v3</html>", &HistoryRecord::new("make it blue", Action::Modified))
            .unwrap();

        let stored = repo.load(&id).unwrap().unwrap();
        assert_eq!(stored.document, "<html>v3</html>");
        let commands: Vec<_> = stored.history.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, ["build a bakery site", "change the header", "make it blue"]);
        assert_eq!(stored.history[0].action, Action::Created);
        assert_eq!(stored.history[2].action, Action::Modified);
    }

    #[test]
    fn timestamps_survive_round_trip() {
        let repo = repo();
        let id = sid("site-ts");
        let record = HistoryRecord::new("build", Action::Created);
        repo.save(&id, "doc", &record).unwrap();
        let stored = repo.load(&id).unwrap().unwrap();
        assert_eq!(stored.history[0].timestamp, record.timestamp);
    }

    #[test]
    fn sessions_are_isolated() {
        let repo = repo();
        repo.save(&sid("a"), "doc-a", &HistoryRecord::new("one", Action::Created)).unwrap();
        repo.save(&sid("b"), "doc-b", &HistoryRecord::new("two", Action::Created)).unwrap();

        assert_eq!(repo.document(&sid("a")).unwrap().as_deref(), Some("doc-a"));
        assert_eq!(repo.load(&sid("b")).unwrap().unwrap().history.len(), 1);
        assert_eq!(repo.document(&sid("b")).unwrap().as_deref(), Some("doc-b"));
    }

    #[test]
    fn clear_removes_document_and_history() {
        let repo = repo();
        let id = sid("site-clear");
        repo.save(&id, "doc", &HistoryRecord::new("one", Action::Created)).unwrap();
        repo.clear(&id).unwrap();
        assert!(repo.load(&id).unwrap().is_none());

        repo.save(&id, "fresh", &HistoryRecord::new("again", Action::Created)).unwrap();
        let stored = repo.load(&id).unwrap().unwrap();
        assert_eq!(stored.history.len(), 1);
        assert_eq!(stored.history[0].command, "again");
    }

    #[test]
    fn clear_unknown_session_is_noop() {
        repo().clear(&sid("ghost")).unwrap();
    }

    #[test]
    fn reopened_database_restores_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.db");
        let id = sid("persisted");
        {
            let repo = DocumentRepo::new(Database::open(&path).unwrap());
            repo.save(&id, "<html>kept</html>", &HistoryRecord::new("build", Action::Created))
                .unwrap();
        }
        let repo = DocumentRepo::new(Database::open(&path).unwrap());
        let stored = repo.load(&id).unwrap().unwrap();
        assert_eq!(stored.document, "<html>kept</html>");
        assert_eq!(stored.history.len(), 1);
    }
}
