use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use sitesmith_core::history::{Action, HistoryRecord};
use sitesmith_core::ids::SessionId;
use sitesmith_store::{PersistenceStore, StoredWorkspace};

use crate::error::WorkspaceError;
use crate::generation::GenerationClient;
use crate::intent::{Intent, IntentClassifier};
use crate::normalize::normalize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    /// No successful command yet (or cleared).
    Empty,
    /// Holds a committed document.
    Ready,
}

/// Result of a successful command.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub session_id: SessionId,
    /// The command as received.
    pub text: String,
    pub document: String,
    pub action: Action,
    /// Whether the command read like an edit, even if it was served as a create.
    pub is_modification: bool,
    pub history_length: usize,
    pub preview_url: String,
    pub api_calls_used: u64,
    pub message: String,
}

/// Read-only view of a workspace.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub session_id: SessionId,
    pub state: WorkspaceState,
    pub document: String,
    pub history: Vec<HistoryRecord>,
    pub api_calls_used: u64,
    pub last_api_call_at: Option<DateTime<Utc>>,
    /// Unknown for sessions read straight from the store with no history.
    pub created_at: Option<DateTime<Utc>>,
    pub preview_url: String,
}

impl WorkspaceSnapshot {
    /// View of a session that has no live workspace, built from its stored copy.
    ///
    /// Generation bookkeeping lives only in memory, so it reads as zero.
    pub fn from_store(session_id: SessionId, stored: Option<StoredWorkspace>) -> Self {
        let (document, history) = stored
            .map(|s| (s.document, s.history))
            .unwrap_or_default();
        Self {
            state: if document.is_empty() {
                WorkspaceState::Empty
            } else {
                WorkspaceState::Ready
            },
            created_at: history.first().map(|r| r.timestamp),
            preview_url: preview_path(&session_id),
            session_id,
            document,
            history,
            api_calls_used: 0,
            last_api_call_at: None,
        }
    }
}

/// Session-scoped path of the rendered document.
pub fn preview_path(session_id: &SessionId) -> String {
    format!("/workspace/{session_id}/index.html")
}

/// One session's document, history and generation bookkeeping.
pub struct Workspace {
    session_id: SessionId,
    document: String,
    history: Vec<HistoryRecord>,
    client: GenerationClient,
    classifier: Arc<IntentClassifier>,
    store: Arc<dyn PersistenceStore>,
    created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(
        session_id: SessionId,
        client: GenerationClient,
        classifier: Arc<IntentClassifier>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        Self {
            session_id,
            document: String::new(),
            history: Vec::new(),
            client,
            classifier,
            store,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a workspace from its last committed state.
    pub fn resume(
        session_id: SessionId,
        stored: StoredWorkspace,
        client: GenerationClient,
        classifier: Arc<IntentClassifier>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        let mut workspace = Self::new(session_id, client, classifier, store);
        workspace.document = stored.document;
        workspace.history = stored.history;
        workspace
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> WorkspaceState {
        if self.document.is_empty() {
            WorkspaceState::Empty
        } else {
            WorkspaceState::Ready
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Run one command through classify, generate, normalize and commit.
    ///
    /// The persisted copy is written before the in-memory state advances, so
    /// a failed write leaves the workspace at its last durable value.
    #[instrument(skip(self, text), fields(session_id = %self.session_id))]
    pub async fn command(&mut self, text: &str) -> Result<CommandOutcome, WorkspaceError> {
        let command = text.trim();
        if command.is_empty() {
            return Err(WorkspaceError::InvalidCommand("command text is empty".into()));
        }

        let is_modification = self.classifier.is_modify_candidate(command);
        let intent = self.classifier.classify(
            command,
            self.state() == WorkspaceState::Ready,
            self.document.chars().count(),
        );

        let (raw, action) = match intent {
            Intent::Modify => (self.client.modify(command, &self.document).await?, Action::Modified),
            Intent::Create => (self.client.create(command).await?, Action::Created),
        };

        let document = normalize(&raw);
        let record = HistoryRecord::new(text, action);

        if let Err(e) = self.store.save(&self.session_id, &document, &record) {
            warn!(error = %e, "commit failed, workspace left unchanged");
            return Err(e.into());
        }

        self.document = document;
        self.history.push(record);
        info!(
            action = %action,
            history_len = self.history.len(),
            doc_len = self.document.len(),
            "command committed"
        );

        Ok(CommandOutcome {
            session_id: self.session_id.clone(),
            text: text.to_string(),
            document: self.document.clone(),
            action,
            is_modification,
            history_length: self.history.len(),
            preview_url: preview_path(&self.session_id),
            api_calls_used: self.client.api_call_count(),
            message: format!("Website {action} successfully!"),
        })
    }

    /// Drop the document, history and generation bookkeeping, in memory and in
    /// the store. The workspace afterwards behaves like a brand-new one.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn clear(&mut self) -> Result<(), WorkspaceError> {
        self.store.clear(&self.session_id)?;
        self.document.clear();
        self.history.clear();
        self.client.reset();
        self.created_at = Utc::now();
        info!("workspace cleared");
        Ok(())
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            session_id: self.session_id.clone(),
            state: self.state(),
            document: self.document.clone(),
            history: self.history.clone(),
            api_calls_used: self.client.api_call_count(),
            last_api_call_at: self.client.last_call_at(),
            created_at: Some(self.created_at),
            preview_url: preview_path(&self.session_id),
        }
    }
}
