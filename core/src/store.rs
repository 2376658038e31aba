//! Durable session store
//!
//! Single source of truth for every session. In memory this is an arena of
//! sessions keyed by hierarchical id, one async mutex per session; children
//! are discovered by id-prefix matching, never by stored child lists. Every
//! mutation persists one JSON record per session under
//! `<root>/sessions/<id>/record.json` via atomic temp-file-then-rename
//! writes, so records stay inspectable and externally editable.
//!
//! Id allocation is race-free even across processes: claiming an id is an
//! exclusive directory creation, retried on collision. Root ids come from a
//! persistent counter so they are never reused after archival.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sysinfo::{Pid, System};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OverseerError, Result};
use crate::session::{DependencySpec, Session, SessionId, SessionState};

const RECORD_FILE: &str = "record.json";
const CONTRACT_FILE: &str = "contract.md";
const ACTIVITY_FILE: &str = "activity.log";
const NEXT_ID_FILE: &str = "next_id";

struct SessionSlot {
    data: Mutex<Session>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionSlot {
    fn new(session: Session) -> Arc<Self> {
        let (state_tx, _) = watch::channel(session.state);
        Arc::new(SessionSlot {
            data: Mutex::new(session),
            state_tx,
        })
    }
}

/// Creation parameters for a new session
#[derive(Debug, Clone, Default)]
pub struct SessionDraft {
    pub parent_id: Option<SessionId>,
    pub alias: Option<String>,
    pub task: String,
    pub dependency_spec: DependencySpec,
    pub checker_spec: Option<crate::session::CheckerSpec>,
    pub piped_inputs: Vec<SessionId>,
    pub phase: Option<crate::session::PhaseMetadata>,
    pub parent_intent: Option<String>,
    pub scope_paths: Vec<String>,
}

impl SessionDraft {
    pub fn new(task: impl Into<String>) -> Self {
        SessionDraft {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: SessionId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_dependencies(mut self, spec: DependencySpec) -> Self {
        self.dependency_spec = spec;
        self
    }

    pub fn with_checker(mut self, checker: crate::session::CheckerSpec) -> Self {
        self.checker_spec = Some(checker);
        self
    }

    pub fn with_piped(mut self, piped: Vec<SessionId>) -> Self {
        self.piped_inputs = piped;
        self
    }
}

/// Listing filter; empty filter lists everything ordered by id
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<SessionState>,
    pub under: Option<SessionId>,
}

pub struct SessionStore {
    root: PathBuf,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    /// Serializes id allocation; per-session mutation uses the slot mutexes
    create_lock: Mutex<()>,
}

impl SessionStore {
    /// Open (or initialize) a store rooted at `root` without touching
    /// records that look stale; readers such as poll/wait use this.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_inner(root.into(), false).await
    }

    /// Open a store and reconcile records left in a live state by a
    /// supervisor that is no longer around: if the recorded worker pid is
    /// dead, the session becomes `aborted` instead of staying stale.
    pub async fn open_supervised(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_inner(root.into(), true).await
    }

    async fn open_inner(root: PathBuf, reconcile: bool) -> Result<Self> {
        std::fs::create_dir_all(root.join("sessions"))
            .with_context(|| format!("failed to create store at {}", root.display()))
            .map_err(OverseerError::from)?;

        let store = SessionStore {
            root,
            sessions: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        };

        store.load_records().await?;
        if reconcile {
            store.reconcile_dead_workers().await?;
        }
        Ok(store)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir().join(id.as_str())
    }

    pub fn record_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(RECORD_FILE)
    }

    pub fn contract_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(CONTRACT_FILE)
    }

    fn activity_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(ACTIVITY_FILE)
    }

    // =========================================================================
    // Loading & reconciliation
    // =========================================================================

    async fn load_records(&self) -> Result<()> {
        let dir = self.sessions_dir();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))
            .map_err(OverseerError::from)?;

        let mut loaded = 0usize;
        let mut map = self.sessions.write().await;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(id) = SessionId::parse(name) else {
                warn!(dir = %path.display(), "ignoring non-session directory");
                continue;
            };

            remove_stale_temp_files(&path);
            match read_record(&path.join(RECORD_FILE)) {
                Ok(session) => {
                    if session.id != id {
                        warn!(
                            session_id = %id,
                            recorded = %session.id,
                            "record id does not match its directory, skipping"
                        );
                        continue;
                    }
                    map.insert(id, SessionSlot::new(session));
                    loaded += 1;
                }
                Err(err) => warn!(session_id = %id, error = %err, "skipping unreadable record"),
            }
        }
        if loaded > 0 {
            debug!(count = loaded, "loaded session records");
        }
        Ok(())
    }

    /// Sessions left live by a supervisor that is gone. A `running` record
    /// whose pid is dead can never report a result; a record stuck in
    /// `awaiting_verification` lost its candidate output with the old
    /// supervisor. `retrying` is resumable from persisted state and is left
    /// alone.
    async fn reconcile_dead_workers(&self) -> Result<()> {
        let mut stale: Vec<(SessionId, &'static str)> = Vec::new();
        {
            let map = self.sessions.read().await;
            for (id, slot) in map.iter() {
                let session = slot.data.lock().await;
                match session.state {
                    SessionState::Running if !pid_alive(session.worker_pid) => {
                        stale.push((id.clone(), "worker process died while unsupervised"));
                    }
                    SessionState::AwaitingVerification => {
                        stale.push((id.clone(), "supervision lost before verification completed"));
                    }
                    _ => {}
                }
            }
        }

        for (id, note) in stale {
            warn!(session_id = %id, note, "reconciling stale session");
            self.finish(&id, SessionState::Aborted, None, Some(note.to_string()))
                .await?;
        }
        Ok(())
    }

    /// Pick up records created by another process (a worker's spawn call)
    /// that this store has not seen yet. Returns them ordered by id.
    pub async fn adopt_new(&self) -> Result<Vec<Session>> {
        let dir = self.sessions_dir();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))
            .map_err(OverseerError::from)?;

        let mut adopted = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(id) = SessionId::parse(name) else {
                continue;
            };
            if self.sessions.read().await.contains_key(&id) {
                continue;
            }
            match read_record(&path.join(RECORD_FILE)) {
                Ok(session) => {
                    info!(session_id = %id, "adopted externally created session");
                    adopted.push(session.clone());
                    self.sessions
                        .write()
                        .await
                        .insert(id, SessionSlot::new(session));
                }
                // record.json may not exist yet while the creator is mid-write
                Err(OverseerError::Io(_)) => continue,
                Err(err) => warn!(session_id = %id, error = %err, "skipping unreadable record"),
            }
        }
        adopted.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(adopted)
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a session, allocating a fresh hierarchical id. Allocation is
    /// atomic with respect to concurrent creation under the same parent.
    pub async fn create(&self, draft: SessionDraft) -> Result<SessionId> {
        let _guard = self.create_lock.lock().await;

        if let Some(parent) = &draft.parent_id {
            self.require_exists(parent).await?;
        }
        self.validate_alias(draft.alias.as_deref()).await?;

        let mut spec = draft.dependency_spec.clone();
        // piping implies dependency
        for piped in &draft.piped_inputs {
            if !spec.after.contains(piped) {
                spec.after.push(piped.clone());
            }
        }
        for referenced in spec.referenced_ids() {
            self.require_exists(referenced).await?;
        }
        if let Err(reason) = spec.validate_static() {
            return Err(OverseerError::UnsatisfiableDependency {
                session_id: draft.alias.clone().unwrap_or_else(|| "(new)".to_string()),
                reason,
            });
        }

        let id = self.claim_next_id(draft.parent_id.as_ref())?;
        let mut session = Session::new(id.clone(), draft.parent_id, draft.task);
        session.alias = draft.alias;
        session.dependency_spec = spec;
        session.checker_spec = draft.checker_spec;
        session.piped_inputs = draft.piped_inputs;
        session.phase = draft.phase;
        session.parent_intent = draft.parent_intent;
        session.scope_paths = draft.scope_paths;

        self.persist(&session).await?;
        self.sessions
            .write()
            .await
            .insert(id.clone(), SessionSlot::new(session));

        info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Claim the next free id by exclusive directory creation. The counter
    /// file only seeds root allocation; the directory claim is what makes
    /// the id ours even against another process.
    fn claim_next_id(&self, parent: Option<&SessionId>) -> Result<SessionId> {
        let mut candidate = match parent {
            None => self.read_next_root_counter(),
            Some(parent) => parent.child(self.scan_next_child_suffix(parent)),
        };

        loop {
            match std::fs::create_dir(self.session_dir(&candidate)) {
                Ok(()) => break,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = match parent {
                        None => SessionId::root(candidate.suffix() + 1),
                        Some(parent) => parent.child(candidate.suffix() + 1),
                    };
                }
                Err(err) => return Err(OverseerError::Io(err)),
            }
        }

        if parent.is_none() {
            self.write_next_root_counter(candidate.suffix() + 1);
        }
        Ok(candidate)
    }

    fn read_next_root_counter(&self) -> SessionId {
        let value = std::fs::read_to_string(self.root.join(NEXT_ID_FILE))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        SessionId::root(value)
    }

    fn write_next_root_counter(&self, next: u64) {
        if let Err(err) = std::fs::write(self.root.join(NEXT_ID_FILE), next.to_string()) {
            warn!(error = %err, "failed to persist root id counter");
        }
    }

    /// Densest free suffix under `parent`, from the filesystem so records
    /// created by other processes count too
    fn scan_next_child_suffix(&self, parent: &SessionId) -> u64 {
        let prefix = format!("{}.", parent.as_str());
        let mut max_seen: Option<u64> = None;
        if let Ok(entries) = std::fs::read_dir(self.sessions_dir()) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(rest) = name.strip_prefix(&prefix) else {
                    continue;
                };
                if rest.contains('.') {
                    continue;
                }
                if let Ok(n) = rest.parse::<u64>() {
                    max_seen = Some(max_seen.map_or(n, |m| m.max(n)));
                }
            }
        }
        max_seen.map_or(0, |m| m + 1)
    }

    async fn validate_alias(&self, alias: Option<&str>) -> Result<()> {
        let Some(alias) = alias else { return Ok(()) };
        if alias.is_empty() || SessionId::is_id_like(alias) {
            return Err(OverseerError::InvalidAlias {
                alias: alias.to_string(),
                reason: "aliases must be non-empty and must not look like ids".to_string(),
            });
        }
        let map = self.sessions.read().await;
        for slot in map.values() {
            let session = slot.data.lock().await;
            if session.alias.as_deref() == Some(alias) {
                return Err(OverseerError::AliasTaken {
                    alias: alias.to_string(),
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    async fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OverseerError::NotFound {
                session_id: id.to_string(),
            })
    }

    async fn require_exists(&self, id: &SessionId) -> Result<()> {
        self.slot(id).await.map(|_| ())
    }

    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        let slot = self.slot(id).await?;
        let session = slot.data.lock().await;
        Ok(session.clone())
    }

    /// Resolve an id-or-alias reference to a session id
    pub async fn resolve(&self, reference: &str) -> Result<SessionId> {
        if let Ok(id) = SessionId::parse(reference) {
            if self.sessions.read().await.contains_key(&id) {
                return Ok(id);
            }
        } else {
            let map = self.sessions.read().await;
            for (id, slot) in map.iter() {
                let session = slot.data.lock().await;
                if session.alias.as_deref() == Some(reference) {
                    return Ok(id.clone());
                }
            }
        }
        Err(OverseerError::NotFound {
            session_id: reference.to_string(),
        })
    }

    pub async fn list(&self, filter: ListFilter) -> Vec<Session> {
        let slots: Vec<Arc<SessionSlot>> =
            self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let session = slot.data.lock().await.clone();
            if let Some(state) = filter.state {
                if session.state != state {
                    continue;
                }
            }
            if let Some(under) = &filter.under {
                if !session.id.is_descendant_of(under) && session.id != *under {
                    continue;
                }
            }
            out.push(session);
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Descendant ids deepest-first, the order abort propagation walks
    pub async fn descendants(&self, id: &SessionId) -> Vec<SessionId> {
        let map = self.sessions.read().await;
        let mut out: Vec<SessionId> = map
            .keys()
            .filter(|k| k.is_descendant_of(id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
        out
    }

    /// Abort a session and its unfinished descendants without a supervisor:
    /// no processes are signalled, only the records move. Callers use this
    /// when the recorded worker is already gone. Returns the ids aborted,
    /// deepest first.
    pub async fn abort_offline(&self, id: &SessionId, reason: &str) -> Result<Vec<SessionId>> {
        self.require_exists(id).await?;
        let mut targets = self.descendants(id).await;
        targets.push(id.clone());

        let mut aborted = Vec::new();
        for target in targets {
            if self.get(&target).await?.is_terminal() {
                continue;
            }
            let note = if target == *id {
                reason.to_string()
            } else {
                format!("aborted with ancestor {}", id)
            };
            self.finish(&target, SessionState::Aborted, None, Some(note))
                .await?;
            aborted.push(target);
        }
        Ok(aborted)
    }

    /// A session is complete only when it and every descendant is terminal
    pub async fn subtree_complete(&self, id: &SessionId) -> Result<bool> {
        if !self.get(id).await?.is_terminal() {
            return Ok(false);
        }
        for descendant in self.descendants(id).await {
            if !self.get(&descendant).await?.is_terminal() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn subscribe(&self, id: &SessionId) -> Result<watch::Receiver<SessionState>> {
        Ok(self.slot(id).await?.state_tx.subscribe())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Atomic field mutation that must not change state; lifecycle moves go
    /// through `transition`/`finish`
    pub async fn update<T>(
        &self,
        id: &SessionId,
        mutate: impl FnOnce(&mut Session) -> T,
    ) -> Result<T> {
        let slot = self.slot(id).await?;
        let mut session = slot.data.lock().await;
        let state_before = session.state;
        let value = mutate(&mut session);
        if session.state != state_before {
            return Err(OverseerError::Internal {
                message: format!("update closure changed state of {}", id),
            });
        }
        self.persist(&session).await?;
        Ok(value)
    }

    /// Validated state transition; stamps `started_at`/`finished_at` and
    /// notifies watchers
    pub async fn transition(&self, id: &SessionId, to: SessionState) -> Result<Session> {
        let slot = self.slot(id).await?;
        let mut session = slot.data.lock().await;
        self.apply_transition(&mut session, to)?;
        self.persist(&session).await?;
        slot.state_tx.send_replace(to);
        info!(session_id = %id, state = %to, "session transition");
        Ok(session.clone())
    }

    /// Terminal transition carrying the write-once result and an optional
    /// annotation
    pub async fn finish(
        &self,
        id: &SessionId,
        to: SessionState,
        result: Option<String>,
        note: Option<String>,
    ) -> Result<Session> {
        if !to.is_terminal() {
            return Err(OverseerError::Internal {
                message: format!("finish called with non-terminal state {}", to),
            });
        }
        let slot = self.slot(id).await?;
        let mut session = slot.data.lock().await;
        if result.is_some() && session.result.is_some() {
            return Err(OverseerError::ResultAlreadySet {
                session_id: id.to_string(),
            });
        }
        self.apply_transition(&mut session, to)?;
        if result.is_some() {
            session.result = result;
        }
        if note.is_some() {
            session.note = note;
        }
        self.persist(&session).await?;
        slot.state_tx.send_replace(to);
        info!(
            session_id = %id,
            state = %to,
            note = session.note.as_deref().unwrap_or(""),
            "session finished"
        );
        Ok(session.clone())
    }

    fn apply_transition(&self, session: &mut Session, to: SessionState) -> Result<()> {
        if !session.state.can_transition_to(to) {
            return Err(OverseerError::InvalidTransition {
                session_id: session.id.to_string(),
                from: session.state,
                to,
            });
        }
        session.state = to;
        match to {
            SessionState::Running => session.started_at = Some(Utc::now()),
            _ if to.is_terminal() => session.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// Re-read a session record from disk, refreshing the in-memory slot.
    /// Lets a reader process observe transitions applied by the owning
    /// supervisor.
    pub async fn reload(&self, id: &SessionId) -> Result<Session> {
        let fresh = read_record(&self.record_path(id))?;
        let slot = self.slot(id).await?;
        let mut session = slot.data.lock().await;
        let state_changed = session.state != fresh.state;
        *session = fresh.clone();
        if state_changed {
            slot.state_tx.send_replace(fresh.state);
        }
        Ok(fresh)
    }

    // =========================================================================
    // Side files: contract, activity, abort requests
    // =========================================================================

    pub async fn write_contract(&self, id: &SessionId, contract: &str) -> Result<()> {
        self.require_exists(id).await?;
        atomic_write(&self.contract_path(id), contract.as_bytes())
            .await
            .map_err(OverseerError::from)
    }

    /// Append one best-effort activity line; losing lines is acceptable,
    /// clobbering the record is not, hence the separate append-only file
    pub async fn append_activity(&self, id: &SessionId, line: &str) -> Result<()> {
        self.require_exists(id).await?;
        let line = line.replace('\n', " ");
        let mut content = line.trim().to_string();
        content.push('\n');
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.activity_path(id))
            .await?;
        file.write_all(content.as_bytes()).await?;
        Ok(())
    }

    pub async fn read_activity(&self, id: &SessionId) -> Result<Vec<String>> {
        self.require_exists(id).await?;
        match tokio::fs::read_to_string(self.activity_path(id)).await {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(OverseerError::Io(err)),
        }
    }

    /// Whether the session's most recent worker process is still in the
    /// process table
    pub async fn worker_alive(&self, id: &SessionId) -> Result<bool> {
        Ok(pid_alive(self.get(id).await?.worker_pid))
    }

    /// Leave an abort request for the owning supervisor to apply
    pub async fn request_abort(&self, id: &SessionId) -> Result<()> {
        self.require_exists(id).await?;
        let dir = self.root.join("requests");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))
            .map_err(OverseerError::from)?;
        std::fs::write(dir.join(format!("abort-{}", id)), b"")?;
        Ok(())
    }

    /// Drain pending abort requests, consuming their marker files
    pub async fn take_abort_requests(&self) -> Vec<SessionId> {
        let dir = self.root.join("requests");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(raw) = name.strip_prefix("abort-") else {
                continue;
            };
            if let Ok(id) = SessionId::parse(raw) {
                let _ = std::fs::remove_file(entry.path());
                ids.push(id);
            }
        }
        ids.sort();
        ids
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn persist(&self, session: &Session) -> Result<()> {
        let path = self.record_path(&session.id);
        let json = serde_json::to_vec_pretty(session)?;
        atomic_write(&path, &json).await.map_err(OverseerError::from)
    }
}

/// Write via a uuid-suffixed temp file then rename, removing the temp file
/// if anything fails part-way
async fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let temp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let write = async {
        tokio::fs::write(&temp_path, bytes)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("failed to move {} into place", temp_path.display()))
    };
    match write.await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(err)
        }
    }
}

fn read_record(path: &Path) -> Result<Session> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|err| OverseerError::CorruptRecord {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Remove leftovers of interrupted atomic writes
fn remove_stale_temp_files(session_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(session_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if name.contains(".tmp-") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

pub(crate) fn pid_alive(pid: Option<u32>) -> bool {
    let Some(pid) = pid else { return false };
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

/// Send SIGKILL to a recorded worker pid; used when no supervisor owns the
/// process handle anymore
pub(crate) fn kill_worker_pid(pid: u32) -> bool {
    let mut system = System::new();
    if system.refresh_process(Pid::from_u32(pid)) {
        if let Some(process) = system.process(Pid::from_u32(pid)) {
            return process.kill();
        }
    }
    false
}
