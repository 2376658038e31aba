//! Read-only projections over the store
//!
//! `poll` answers immediately with compact status, sized for an
//! orchestrator that checks in without pulling full results into its
//! context. `wait` suspends on the store's watch channels until sessions
//! reach a terminal state, re-reading records on an interval so transitions
//! applied by another process are observed too. Neither ever mutates a
//! session; cancelling a wait cancels nothing but the wait itself.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::session::{SessionId, SessionState, Verdict};
use crate::store::SessionStore;

/// How often a blocking wait re-reads records owned by another process
const RELOAD_INTERVAL: Duration = Duration::from_millis(300);

/// Compact non-blocking status, one session
#[derive(Debug, Clone, Serialize)]
pub struct PollStatus {
    pub id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub state: SessionState,
    /// Since creation, formatted `Ns` / `NmSs` / `NhMm`
    pub elapsed: String,
    /// Latest activity line, past tense once the session is terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub tool_calls: usize,
    pub iteration_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verdict: Option<Verdict>,
    /// Terminal with every descendant terminal
    pub subtree_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// What `wait` hands back for one session
#[derive(Debug, Clone, Serialize)]
pub struct WaitOutcome {
    pub id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub state: SessionState,
    /// Set only when the session terminated with a result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// The timeout expired first; `state` is a snapshot and the session
    /// keeps running
    pub timed_out: bool,
}

pub async fn poll(store: &SessionStore, id: &SessionId) -> Result<PollStatus> {
    // pick up transitions another process may have persisted
    let _ = store.reload(id).await;
    let session = store.get(id).await?;

    let activity_lines = store.read_activity(id).await?;
    let activity = activity_lines.last().map(|line| {
        if session.is_terminal() {
            past_tense(line)
        } else {
            line.clone()
        }
    });

    let elapsed_seconds = (Utc::now() - session.created_at).num_seconds().max(0);
    Ok(PollStatus {
        subtree_complete: store.subtree_complete(id).await?,
        id: session.id,
        alias: session.alias,
        state: session.state,
        elapsed: format_elapsed(elapsed_seconds),
        activity,
        tool_calls: activity_lines.len(),
        iteration_count: session.iteration_count,
        last_verdict: session.history.last().map(|r| r.verdict),
        note: session.note,
    })
}

/// Block until every named session is terminal, or the timeout expires.
/// Sessions that beat the timeout report their result; the rest come back
/// as snapshots with `timed_out` set.
pub async fn wait(
    store: &SessionStore,
    ids: &[SessionId],
    timeout: Option<Duration>,
) -> Result<Vec<WaitOutcome>> {
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    let mut outcomes = Vec::with_capacity(ids.len());

    for id in ids {
        let session = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, wait_one(store, id)).await {
                    Ok(waited) => waited?,
                    Err(_) => {
                        let snapshot = store.get(id).await?;
                        outcomes.push(WaitOutcome {
                            id: snapshot.id,
                            alias: snapshot.alias,
                            state: snapshot.state,
                            result: None,
                            note: snapshot.note,
                            timed_out: true,
                        });
                        continue;
                    }
                }
            }
            None => wait_one(store, id).await?,
        };
        outcomes.push(WaitOutcome {
            id: session.id,
            alias: session.alias,
            state: session.state,
            result: session.result,
            note: session.note,
            timed_out: false,
        });
    }
    Ok(outcomes)
}

async fn wait_one(
    store: &SessionStore,
    id: &SessionId,
) -> Result<crate::session::Session> {
    let mut rx = store.subscribe(id).await?;
    loop {
        let session = store.get(id).await?;
        if session.is_terminal() {
            return Ok(session);
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    // sender gone; fall back to reloading
                    tokio::time::sleep(RELOAD_INTERVAL).await;
                    let _ = store.reload(id).await;
                }
            }
            _ = tokio::time::sleep(RELOAD_INTERVAL) => {
                let _ = store.reload(id).await;
            }
        }
    }
}

pub fn format_elapsed(seconds: i64) -> String {
    if seconds < 60 {
        return format!("{}s", seconds);
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m{}s", minutes, seconds % 60);
    }
    format!("{}h{}m", minutes / 60, minutes % 60)
}

/// Convert a present-tense activity line to past tense for finished
/// sessions; unknown shapes pass through untouched
pub fn past_tense(line: &str) -> String {
    const CONVERSIONS: &[(&str, &str)] = &[
        ("reading ", "read "),
        ("editing ", "edited "),
        ("running: ", "ran: "),
        ("searching: ", "searched: "),
        ("finding: ", "found: "),
        ("spawning ", "spawned "),
    ];
    for (present, past) in CONVERSIONS {
        if let Some(rest) = line.strip_prefix(present) {
            return format!("{}{}", past, rest);
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionDraft;
    use std::sync::Arc;

    fn unique_temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("overseer-test-query-{}", uuid::Uuid::new_v4()))
    }

    async fn finish_done(store: &SessionStore, id: &SessionId, result: &str) {
        store.transition(id, SessionState::Running).await.unwrap();
        store
            .transition(id, SessionState::AwaitingVerification)
            .await
            .unwrap();
        store
            .finish(id, SessionState::Done, Some(result.to_string()), None)
            .await
            .unwrap();
    }

    #[test]
    fn test_elapsed_formatting_brackets() {
        assert_eq!(format_elapsed(0), "0s");
        assert_eq!(format_elapsed(59), "59s");
        assert_eq!(format_elapsed(60), "1m0s");
        assert_eq!(format_elapsed(3599), "59m59s");
        assert_eq!(format_elapsed(3600), "1h0m");
        assert_eq!(format_elapsed(7260), "2h1m");
    }

    #[test]
    fn test_past_tense_conversions() {
        assert_eq!(past_tense("reading src/lib.rs"), "read src/lib.rs");
        assert_eq!(past_tense("editing Cargo.toml"), "edited Cargo.toml");
        assert_eq!(past_tense("running: cargo check"), "ran: cargo check");
        assert_eq!(past_tense("searching: TODO"), "searched: TODO");
        assert_eq!(past_tense("finding: *.rs"), "found: *.rs");
        assert_eq!(past_tense("spawning subtask"), "spawned subtask");
        assert_eq!(past_tense("thinking hard"), "thinking hard");
    }

    #[tokio::test]
    async fn test_poll_reports_activity_and_progress() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let id = store
            .create(SessionDraft::new("polled").with_alias("watchme"))
            .await
            .unwrap();
        store.transition(&id, SessionState::Running).await.unwrap();
        store.append_activity(&id, "reading notes.md").await.unwrap();
        store.append_activity(&id, "editing notes.md").await.unwrap();

        let status = poll(&store, &id).await.unwrap();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.alias.as_deref(), Some("watchme"));
        // still live: present tense
        assert_eq!(status.activity.as_deref(), Some("editing notes.md"));
        assert_eq!(status.tool_calls, 2);
        assert!(!status.subtree_complete);

        store
            .transition(&id, SessionState::AwaitingVerification)
            .await
            .unwrap();
        store
            .finish(&id, SessionState::Done, Some("ok".to_string()), None)
            .await
            .unwrap();
        let status = poll(&store, &id).await.unwrap();
        assert_eq!(status.activity.as_deref(), Some("edited notes.md"));
        assert!(status.subtree_complete);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_poll_subtree_flag_waits_for_descendants() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let root = store.create(SessionDraft::new("root")).await.unwrap();
        let child = store
            .create(SessionDraft::new("child").with_parent(root.clone()))
            .await
            .unwrap();
        finish_done(&store, &root, "done").await;

        assert!(!poll(&store, &root).await.unwrap().subtree_complete);
        store
            .finish(&child, SessionState::Skipped, None, None)
            .await
            .unwrap();
        assert!(poll(&store, &root).await.unwrap().subtree_complete);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_results_immediately() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let id = store.create(SessionDraft::new("already done")).await.unwrap();
        finish_done(&store, &id, "the answer").await;

        let outcomes = wait(&store, &[id.clone()], None).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].state, SessionState::Done);
        assert_eq!(outcomes[0].result.as_deref(), Some("the answer"));
        assert!(!outcomes[0].timed_out);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_transition() {
        let dir = unique_temp_dir();
        let store = Arc::new(SessionStore::open(&dir).await.unwrap());
        let id = store.create(SessionDraft::new("in flight")).await.unwrap();
        store.transition(&id, SessionState::Running).await.unwrap();

        let finisher = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                store
                    .transition(&id, SessionState::AwaitingVerification)
                    .await
                    .unwrap();
                store
                    .finish(&id, SessionState::Done, Some("late".to_string()), None)
                    .await
                    .unwrap();
            })
        };

        let outcomes = wait(&store, &[id], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        finisher.await.unwrap();
        assert_eq!(outcomes[0].state, SessionState::Done);
        assert_eq!(outcomes[0].result.as_deref(), Some("late"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_the_session_running() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let id = store.create(SessionDraft::new("slow")).await.unwrap();
        store.transition(&id, SessionState::Running).await.unwrap();

        let outcomes = wait(&store, &[id.clone()], Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(outcomes[0].timed_out);
        assert_eq!(outcomes[0].state, SessionState::Running);
        assert!(outcomes[0].result.is_none());
        // passive observer: the session is untouched
        assert_eq!(store.get(&id).await.unwrap().state, SessionState::Running);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_wait_observes_foreign_store_transitions() {
        let dir = unique_temp_dir();
        let writer = Arc::new(SessionStore::open(&dir).await.unwrap());
        let id = writer.create(SessionDraft::new("shared")).await.unwrap();
        writer.transition(&id, SessionState::Running).await.unwrap();

        let reader = SessionStore::open(&dir).await.unwrap();
        let finisher = {
            let writer = writer.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                writer
                    .transition(&id, SessionState::AwaitingVerification)
                    .await
                    .unwrap();
                writer
                    .finish(&id, SessionState::Done, Some("from afar".to_string()), None)
                    .await
                    .unwrap();
            })
        };

        // the reader's watch channel never fires; the reload interval does
        let outcomes = wait(&reader, &[id], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        finisher.await.unwrap();
        assert_eq!(outcomes[0].result.as_deref(), Some("from afar"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_wait_multiple_sessions_mixed_terminals() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let done = store.create(SessionDraft::new("done one")).await.unwrap();
        let skipped = store.create(SessionDraft::new("skipped one")).await.unwrap();
        finish_done(&store, &done, "fine").await;
        store
            .finish(&skipped, SessionState::Skipped, None, Some("no need".to_string()))
            .await
            .unwrap();

        let outcomes = wait(&store, &[done, skipped], None).await.unwrap();
        assert_eq!(outcomes[0].state, SessionState::Done);
        assert_eq!(outcomes[1].state, SessionState::Skipped);
        assert_eq!(outcomes[1].note.as_deref(), Some("no need"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
