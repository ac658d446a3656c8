use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use sitesmith_core::ids::SessionId;
use sitesmith_core::provider::GenerationProvider;
use sitesmith_store::PersistenceStore;

use crate::error::WorkspaceError;
use crate::generation::{GenerationClient, GenerationConfig};
use crate::intent::IntentClassifier;
use crate::workspace::{CommandOutcome, Workspace, WorkspaceSnapshot};

/// How long shutdown waits for a session task to finish its current command.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

enum SessionMessage {
    Command {
        text: String,
        reply: oneshot::Sender<Result<CommandOutcome, WorkspaceError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), WorkspaceError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<WorkspaceSnapshot, WorkspaceError>>,
    },
}

impl SessionMessage {
    /// Answer the caller with `err` without touching any workspace.
    fn reject(self, err: WorkspaceError) {
        let _ = match self {
            Self::Command { reply, .. } => reply.send(Err(err)).map_err(drop),
            Self::Clear { reply } => reply.send(Err(err)).map_err(drop),
            Self::Snapshot { reply } => reply.send(Err(err)).map_err(drop),
        };
    }
}

/// Map slot of a live session.
///
/// The sender never leaves the map: every send happens under the shard lock,
/// so a task that sees its queue empty while holding that lock can retire
/// without losing messages.
struct SessionEntry {
    tx: mpsc::UnboundedSender<SessionMessage>,
    task: JoinHandle<()>,
    epoch: u64,
}

/// State shared between the registry and its session tasks.
struct Shared {
    sessions: DashMap<SessionId, SessionEntry>,
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn PersistenceStore>,
    classifier: Arc<IntentClassifier>,
    generation: GenerationConfig,
}

impl Shared {
    /// Rebuild the session's workspace from its last committed state, if any.
    fn load_workspace(&self, session_id: &SessionId) -> Result<Workspace, WorkspaceError> {
        let client = GenerationClient::new(Arc::clone(&self.provider), self.generation.clone());
        let classifier = Arc::clone(&self.classifier);
        let store = Arc::clone(&self.store);

        match self.store.load(session_id)? {
            Some(stored) => {
                info!(
                    session_id = %session_id,
                    history_len = stored.history.len(),
                    "workspace resumed from store"
                );
                Ok(Workspace::resume(session_id.clone(), stored, client, classifier, store))
            }
            None => {
                info!(session_id = %session_id, "workspace created");
                Ok(Workspace::new(session_id.clone(), client, classifier, store))
            }
        }
    }

    /// Drop this task's slot if nothing is waiting in its queue.
    fn retire(
        &self,
        session_id: &SessionId,
        epoch: u64,
        rx: &mpsc::UnboundedReceiver<SessionMessage>,
    ) -> bool {
        self.sessions
            .remove_if(session_id, |_, entry| entry.epoch == epoch && rx.is_empty())
            .is_some()
    }
}

/// Process-wide owner of all workspaces.
///
/// Each live workspace sits inside its own task and is only reached through
/// that task's FIFO queue, so commands for one session run one at a time in
/// arrival order while different sessions proceed independently. Reads of
/// sessions with no live task go straight to the store, and a cleared
/// session's task retires, so only sessions with work in memory hold a task.
pub struct SessionRegistry {
    shared: Arc<Shared>,
    next_epoch: AtomicU64,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn PersistenceStore>,
        classifier: IntentClassifier,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sessions: DashMap::new(),
                provider,
                store,
                classifier: Arc::new(classifier),
                generation,
            }),
            next_epoch: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.shared.provider
    }

    /// Number of workspaces currently held in memory.
    pub fn active_count(&self) -> usize {
        self.shared.sessions.len()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.shared.sessions.contains_key(session_id)
    }

    /// Queue a command for the session, creating its workspace if needed.
    pub async fn command(
        &self,
        session_id: &SessionId,
        text: impl Into<String>,
    ) -> Result<CommandOutcome, WorkspaceError> {
        let (reply, rx) = oneshot::channel();
        self.send(
            session_id,
            SessionMessage::Command {
                text: text.into(),
                reply,
            },
        )?;
        rx.await.map_err(|_| WorkspaceError::SessionClosed)?
    }

    /// Discard the session's document, history and call bookkeeping, in
    /// memory and persisted.
    ///
    /// Runs behind any commands already queued for the session. The next
    /// command for the id starts from a fresh workspace.
    pub async fn clear(&self, session_id: &SessionId) -> Result<(), WorkspaceError> {
        let (reply, rx) = oneshot::channel();
        self.send(session_id, SessionMessage::Clear { reply })?;
        rx.await.map_err(|_| WorkspaceError::SessionClosed)?
    }

    /// Current view of the session. Never creates a workspace.
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<WorkspaceSnapshot, WorkspaceError> {
        let (reply, rx) = oneshot::channel();
        match self.send_if_active(session_id, SessionMessage::Snapshot { reply }) {
            Ok(()) => rx.await.map_err(|_| WorkspaceError::SessionClosed)?,
            Err(_) => {
                let stored = self.shared.store.load(session_id)?;
                Ok(WorkspaceSnapshot::from_store(session_id.clone(), stored))
            }
        }
    }

    /// Current document for previewing, without creating a workspace.
    pub async fn preview(&self, session_id: &SessionId) -> Result<Option<String>, WorkspaceError> {
        let (reply, rx) = oneshot::channel();
        match self.send_if_active(session_id, SessionMessage::Snapshot { reply }) {
            Ok(()) => {
                let snapshot = rx.await.map_err(|_| WorkspaceError::SessionClosed)??;
                Ok((!snapshot.document.is_empty()).then_some(snapshot.document))
            }
            Err(_) => Ok(self.shared.store.document(session_id)?),
        }
    }

    /// Queue `message` on the session's task, spawning the task on first use.
    ///
    /// The task loads the stored workspace itself, so no store access
    /// happens under the map lock.
    fn send(&self, session_id: &SessionId, message: SessionMessage) -> Result<(), WorkspaceError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkspaceError::SessionClosed);
        }

        match self.shared.sessions.entry(session_id.clone()) {
            Entry::Occupied(e) => e
                .get()
                .tx
                .send(message)
                .map_err(|_| WorkspaceError::SessionClosed),
            Entry::Vacant(v) => {
                let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::unbounded_channel();
                tx.send(message).map_err(|_| WorkspaceError::SessionClosed)?;
                let task = tokio::spawn(run_session(
                    Arc::clone(&self.shared),
                    session_id.clone(),
                    epoch,
                    rx,
                    self.shutdown.child_token(),
                ));
                v.insert(SessionEntry { tx, task, epoch });
                Ok(())
            }
        }
    }

    /// Queue `message` only if the session has a live task. Hands the
    /// message back otherwise.
    fn send_if_active(
        &self,
        session_id: &SessionId,
        message: SessionMessage,
    ) -> Result<(), SessionMessage> {
        match self.shared.sessions.get(session_id) {
            Some(entry) => entry.tx.send(message).map_err(|e| e.0),
            None => Err(message),
        }
    }

    /// Stop accepting work and wait for session tasks to wind down.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let ids: Vec<SessionId> = self.shared.sessions.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0usize;
        for id in ids {
            let Some((_, entry)) = self.shared.sessions.remove(&id) else {
                continue;
            };
            drop(entry.tx);
            match tokio::time::timeout(SHUTDOWN_GRACE, entry.task).await {
                Ok(_) => stopped += 1,
                Err(_) => warn!(session_id = %id, "session task did not stop in time"),
            }
        }
        info!(stopped, "session registry shut down");
    }
}

async fn run_session(
    shared: Arc<Shared>,
    session_id: SessionId,
    epoch: u64,
    mut rx: mpsc::UnboundedReceiver<SessionMessage>,
    cancel: CancellationToken,
) {
    let mut workspace = match shared.load_workspace(&session_id) {
        Ok(workspace) => workspace,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "failed to load workspace");
            // Once the slot is gone its sender is dropped, so the drain below ends.
            shared
                .sessions
                .remove_if(&session_id, |_, entry| entry.epoch == epoch);
            while let Some(message) = rx.recv().await {
                message.reject(clone_error(&e));
            }
            return;
        }
    };

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            SessionMessage::Command { text, reply } => {
                let result = workspace.command(&text).await;
                if let Err(ref e) = result {
                    debug!(session_id = %session_id, code = e.code(), error = %e, "command failed");
                }
                if reply.send(result).is_err() {
                    debug!(session_id = %session_id, "caller left before the command finished");
                }
            }
            SessionMessage::Clear { reply } => {
                let result = workspace.clear();
                let retired = result.is_ok() && shared.retire(&session_id, epoch, &rx);
                let _ = reply.send(result);
                if retired {
                    debug!(session_id = %session_id, "session task retired after clear");
                    return;
                }
            }
            SessionMessage::Snapshot { reply } => {
                let _ = reply.send(Ok(workspace.snapshot()));
            }
        }
    }
    debug!(session_id = %session_id, "session task stopped");
}

fn clone_error(err: &WorkspaceError) -> WorkspaceError {
    match err {
        WorkspaceError::Persistence(e) => WorkspaceError::Persistence(e.clone()),
        _ => WorkspaceError::SessionClosed,
    }
}
