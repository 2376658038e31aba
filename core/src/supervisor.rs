//! Lifecycle supervision
//!
//! One event loop owns every transition a session makes. Creation, worker
//! exits, terminal notifications, and abort requests all arrive as events
//! and are applied sequentially, so readiness is re-evaluated exactly when
//! a predecessor terminates and never on a timer. Workers are external
//! processes; the supervisor records their pids, feeds them contracts, and
//! stops them by killing the process.
//!
//! A periodic service pass covers the cross-process surface: records
//! created by `spawn` in another process are adopted, abort marker files
//! are drained, and orphaned workers inherited from a dead supervisor are
//! reconciled when their pid disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::OverseerConfig;
use crate::contract;
use crate::error::Result;
use crate::feedback::{FeedbackController, NextStep};
use crate::resolver::{self, OutcomeClassifier, Readiness, WorkerClassifier};
use crate::session::{Session, SessionId, SessionState};
use crate::store::{pid_alive, SessionDraft, SessionStore};
use crate::worker::{ProcessLauncher, WorkerExit, WorkerLauncher};

const SERVICE_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_LAUNCH_ATTEMPTS: u32 = 3;
const DEFAULT_LAUNCH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How long the supervisor keeps consuming events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Return once every known session is terminal
    UntilIdle,
    /// Keep serving until the caller drops the future
    Forever,
}

enum SupervisorEvent {
    SessionCreated(SessionId),
    WorkerExited { id: SessionId, exit: WorkerExit },
    TerminalReached(SessionId),
    AbortRequested(SessionId),
}

pub struct Supervisor {
    store: Arc<SessionStore>,
    launcher: Arc<dyn WorkerLauncher>,
    classifier: Arc<dyn OutcomeClassifier>,
    feedback: FeedbackController,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<SupervisorEvent>>,
    /// Kill handles for workers this process launched
    running: Mutex<HashMap<SessionId, oneshot::Sender<()>>>,
    launch_attempts: u32,
    launch_retry_delay: Duration,
}

impl Supervisor {
    pub fn new(
        store: Arc<SessionStore>,
        launcher: Arc<dyn WorkerLauncher>,
        classifier: Arc<dyn OutcomeClassifier>,
        feedback: FeedbackController,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Supervisor {
            store,
            launcher,
            classifier,
            feedback,
            events_tx,
            events_rx: Mutex::new(events_rx),
            running: Mutex::new(HashMap::new()),
            launch_attempts: DEFAULT_LAUNCH_ATTEMPTS,
            launch_retry_delay: DEFAULT_LAUNCH_RETRY_DELAY,
        }
    }

    /// Wire up the production capabilities from configuration
    pub fn from_config(store: Arc<SessionStore>, config: &OverseerConfig) -> Result<Self> {
        let launcher = ProcessLauncher::new(&config.worker_command, store.root_dir())?;
        let classifier = WorkerClassifier::new(config.classifier_command())?;
        let feedback = FeedbackController::new(config.checker_command())?;
        let mut supervisor = Supervisor::new(
            store,
            Arc::new(launcher),
            Arc::new(classifier),
            feedback,
        );
        supervisor.launch_attempts = config.launch_attempts.max(1);
        supervisor.launch_retry_delay = Duration::from_millis(config.launch_retry_delay_ms);
        Ok(supervisor)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Create a session and queue it for resolution
    pub async fn spawn(&self, draft: SessionDraft) -> Result<SessionId> {
        let id = self.store.create(draft).await?;
        let _ = self.events_tx.send(SupervisorEvent::SessionCreated(id.clone()));
        Ok(id)
    }

    /// Abort a session and, depth-first, every non-terminal descendant.
    /// Returns the ids actually transitioned. Terminal states are
    /// absorbing, so a worker completion racing this abort is discarded
    /// when its event arrives.
    pub async fn abort(&self, id: &SessionId, reason: &str) -> Result<Vec<SessionId>> {
        // existence check up front so unknown ids fail loudly
        let root = self.store.get(id).await?;

        let mut targets = self.store.descendants(id).await;
        targets.push(root.id.clone());

        let mut aborted = Vec::new();
        for target in targets {
            let note = if target == *id {
                reason.to_string()
            } else {
                format!("aborted with ancestor {}", id)
            };
            if self.abort_one(&target, note).await? {
                aborted.push(target);
            }
        }
        for target in &aborted {
            let _ = self
                .events_tx
                .send(SupervisorEvent::TerminalReached(target.clone()));
        }
        Ok(aborted)
    }

    async fn abort_one(&self, id: &SessionId, note: String) -> Result<bool> {
        if let Some(kill) = self.running.lock().await.remove(id) {
            let _ = kill.send(());
        }
        let session = self.store.get(id).await?;
        if session.is_terminal() {
            return Ok(false);
        }
        self.store
            .finish(id, SessionState::Aborted, None, Some(note))
            .await?;
        Ok(true)
    }

    /// Drive the event loop. Only one `run` may be active per supervisor;
    /// the receiver lock enforces that.
    pub async fn run(&self, mode: RunMode) -> Result<()> {
        let mut events = self.events_rx.lock().await;
        self.resume_loaded().await;

        let mut service = tokio::time::interval(SERVICE_INTERVAL);
        service.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle(event).await,
                _ = service.tick() => self.service_external().await,
            }

            if mode == RunMode::UntilIdle && self.quiescent().await {
                // a worker may have spawned children moments before exiting;
                // sweep once more before declaring the tree finished
                self.service_external().await;
                if self.quiescent().await {
                    return Ok(());
                }
            }
        }
    }

    async fn handle(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::SessionCreated(id) => {
                if let Err(err) = self.try_start(&id).await {
                    error!(session_id = %id, error = %err, "failed to resolve new session");
                }
            }
            SupervisorEvent::WorkerExited { id, exit } => {
                if let Err(err) = self.on_worker_exit(&id, exit).await {
                    error!(session_id = %id, error = %err, "failed to settle worker exit");
                }
            }
            SupervisorEvent::TerminalReached(id) => self.resolve_dependents(&id).await,
            SupervisorEvent::AbortRequested(id) => {
                if let Err(err) = self.abort(&id, "aborted by request").await {
                    error!(session_id = %id, error = %err, "failed to abort");
                }
            }
        }
    }

    /// Queue every non-terminal session loaded from disk: pending sessions
    /// resolve, retrying sessions relaunch. Running sessions adopted from a
    /// dead supervisor are watched by the service pass instead.
    async fn resume_loaded(&self) {
        for session in self.store.list(Default::default()).await {
            match session.state {
                SessionState::Pending => {
                    let _ = self
                        .events_tx
                        .send(SupervisorEvent::SessionCreated(session.id));
                }
                SessionState::Retrying => {
                    if let Err(err) = self.start_session(&session.id).await {
                        error!(session_id = %session.id, error = %err, "failed to resume retry");
                    }
                }
                _ => {}
            }
        }
    }

    /// Resolve a pending session: launch when ready, skip when the rule can
    /// never hold, stay pending otherwise
    async fn try_start(&self, id: &SessionId) -> Result<()> {
        let session = self.store.get(id).await?;
        if session.state != SessionState::Pending {
            return Ok(());
        }
        match resolver::evaluate(&self.store, self.classifier.as_ref(), &session).await? {
            Readiness::Ready { satisfied_by } => {
                self.store
                    .update(id, move |s| s.satisfied_by = satisfied_by)
                    .await?;
                self.start_session(id).await
            }
            Readiness::Wait => Ok(()),
            Readiness::Unsatisfiable { reason } => {
                info!(session_id = %id, reason, "dependency unsatisfiable, skipping");
                self.store
                    .finish(id, SessionState::Skipped, None, Some(reason))
                    .await?;
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::TerminalReached(id.clone()));
                Ok(())
            }
        }
    }

    /// Compose the contract, persist it beside the record, transition to
    /// running, and launch the worker with bounded retries on transient
    /// launch failures
    async fn start_session(&self, id: &SessionId) -> Result<()> {
        let session = self.store.get(id).await?;
        if !matches!(
            session.state,
            SessionState::Pending | SessionState::Retrying
        ) {
            return Ok(());
        }

        let contract = contract::render(&self.store, &session).await?;
        self.store.write_contract(id, &contract).await?;
        self.store.transition(id, SessionState::Running).await?;

        let mut attempt = 1;
        let launched = loop {
            match self.launcher.launch(&session, contract.clone()).await {
                Ok(worker) => break Ok(worker),
                Err(err) if err.is_retryable() && attempt < self.launch_attempts => {
                    warn!(
                        session_id = %id,
                        attempt,
                        error = %err,
                        "worker launch failed, retrying"
                    );
                    let delay = err.retry_delay().unwrap_or(self.launch_retry_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };

        let worker = match launched {
            Ok(worker) => worker,
            Err(err) => {
                self.store
                    .finish(
                        id,
                        SessionState::Aborted,
                        None,
                        Some(format!(
                            "worker launch failed after {} attempt(s): {}",
                            attempt, err
                        )),
                    )
                    .await?;
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::TerminalReached(id.clone()));
                return Ok(());
            }
        };

        let (pid, kill_tx, exit_rx) = worker.split();
        self.store.update(id, |s| s.worker_pid = pid).await?;
        self.running.lock().await.insert(id.clone(), kill_tx);
        debug!(session_id = %id, pid, "worker launched");

        let events = self.events_tx.clone();
        let exited = id.clone();
        tokio::spawn(async move {
            let exit = exit_rx.await.unwrap_or_else(|_| WorkerExit {
                success: false,
                output: String::new(),
                diagnostic: "worker driver dropped before reporting".to_string(),
            });
            let _ = events.send(SupervisorEvent::WorkerExited { id: exited, exit });
        });
        Ok(())
    }

    async fn on_worker_exit(&self, id: &SessionId, exit: WorkerExit) -> Result<()> {
        self.running.lock().await.remove(id);

        let session = self.store.get(id).await?;
        if session.state != SessionState::Running {
            // aborted while the exit was in flight
            debug!(session_id = %id, state = %session.state, "discarding stale worker exit");
            return Ok(());
        }

        if !exit.success {
            let partial = if exit.output.is_empty() {
                None
            } else {
                Some(exit.output)
            };
            self.store
                .finish(
                    id,
                    SessionState::Aborted,
                    partial,
                    Some(format!("worker failed: {}", exit.diagnostic)),
                )
                .await?;
            let _ = self
                .events_tx
                .send(SupervisorEvent::TerminalReached(id.clone()));
            return Ok(());
        }

        self.store
            .transition(id, SessionState::AwaitingVerification)
            .await?;
        let session = self.store.get(id).await?;
        let (verdict, findings) = self.feedback.judge(&session, &exit.output).await;
        match self
            .feedback
            .apply(&self.store, id, verdict, findings, &exit.output)
            .await?
        {
            NextStep::Settled => {
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::TerminalReached(id.clone()));
                Ok(())
            }
            NextStep::Relaunch => self.start_session(id).await,
        }
    }

    /// Wake every pending session that references the newly terminal one
    async fn resolve_dependents(&self, terminal_id: &SessionId) {
        let pending = self
            .store
            .list(crate::store::ListFilter {
                state: Some(SessionState::Pending),
                under: None,
            })
            .await;
        for session in pending {
            if session.dependency_spec.references(terminal_id) {
                if let Err(err) = self.try_start(&session.id).await {
                    error!(session_id = %session.id, error = %err, "failed to re-resolve dependent");
                }
            }
        }
    }

    /// The cross-process surface: adopt foreign records, drain abort
    /// markers, reconcile orphaned workers whose pid has vanished
    async fn service_external(&self) {
        match self.store.adopt_new().await {
            Ok(adopted) => {
                for session in adopted {
                    if session.state == SessionState::Pending {
                        let _ = self
                            .events_tx
                            .send(SupervisorEvent::SessionCreated(session.id));
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to scan for new sessions"),
        }

        for id in self.store.take_abort_requests().await {
            let _ = self.events_tx.send(SupervisorEvent::AbortRequested(id));
        }

        let running = self
            .store
            .list(crate::store::ListFilter {
                state: Some(SessionState::Running),
                under: None,
            })
            .await;
        for session in running {
            if self.running.lock().await.contains_key(&session.id) {
                continue;
            }
            // inherited from a dead supervisor; its stdout pipe is gone, so
            // the result is unrecoverable once the process exits
            if !pid_alive(session.worker_pid) {
                warn!(session_id = %session.id, "orphaned worker exited unobserved");
                if let Err(err) = self
                    .store
                    .finish(
                        &session.id,
                        SessionState::Aborted,
                        None,
                        Some("orphaned worker exited; result lost".to_string()),
                    )
                    .await
                {
                    error!(session_id = %session.id, error = %err, "failed to reconcile orphan");
                } else {
                    let _ = self
                        .events_tx
                        .send(SupervisorEvent::TerminalReached(session.id));
                }
            }
        }
    }

    async fn quiescent(&self) -> bool {
        self.store
            .list(Default::default())
            .await
            .iter()
            .all(Session::is_terminal)
    }
}
