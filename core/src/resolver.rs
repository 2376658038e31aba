//! Dependency resolution
//!
//! Decides whether a pending session may run. Rule evaluation over a
//! predecessor snapshot is pure; conditional dependencies additionally
//! consult an `OutcomeClassifier`, the capability that judges a finished
//! predecessor's result text as pass or fail. The supervisor re-evaluates
//! whenever a predecessor reaches a terminal state, never on a timer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{OverseerError, Result};
use crate::session::{
    Condition, DependencyRule, DependencySpec, Outcome, Session, SessionId, SessionState,
};
use crate::store::SessionStore;
use crate::worker::run_one_shot;

/// Resolver verdict for one pending session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// May run now; `satisfied_by` names the predecessors that satisfied
    /// the rule, in the order they finished
    Ready { satisfied_by: Vec<SessionId> },
    /// Not decidable yet, re-evaluate on the next terminal event
    Wait,
    /// Can never become ready; the session is skipped, not stuck
    Unsatisfiable { reason: String },
}

/// Judges a finished predecessor's result as pass or fail. Production is a
/// one-shot worker invocation; tests use fixed implementations.
#[async_trait]
pub trait OutcomeClassifier: Send + Sync {
    async fn classify(&self, session: &Session) -> Result<Outcome>;
}

/// Evaluate the rule over a snapshot of the predecessor sessions,
/// in `spec.after` order. Pure.
pub fn rule_readiness(spec: &DependencySpec, predecessors: &[Session]) -> Readiness {
    match spec.rule {
        DependencyRule::All => {
            for p in predecessors {
                if matches!(p.state, SessionState::Aborted | SessionState::Skipped) {
                    return Readiness::Unsatisfiable {
                        reason: format!("predecessor {} ended {}", p.id, p.state),
                    };
                }
            }
            if predecessors.iter().all(|p| p.state == SessionState::Done) {
                Readiness::Ready {
                    satisfied_by: predecessors.iter().map(|p| p.id.clone()).collect(),
                }
            } else {
                Readiness::Wait
            }
        }
        DependencyRule::Any => {
            let done = done_in_finish_order(predecessors);
            if let Some(winner) = done.first() {
                Readiness::Ready {
                    satisfied_by: vec![winner.id.clone()],
                }
            } else if predecessors.iter().all(|p| p.is_terminal()) {
                Readiness::Unsatisfiable {
                    reason: "no predecessor reached done".to_string(),
                }
            } else {
                Readiness::Wait
            }
        }
        DependencyRule::Gate { quorum } => {
            let done = done_in_finish_order(predecessors);
            if done.len() >= quorum {
                return Readiness::Ready {
                    satisfied_by: done[..quorum].iter().map(|p| p.id.clone()).collect(),
                };
            }
            let open = predecessors.iter().filter(|p| !p.is_terminal()).count();
            if done.len() + open < quorum {
                Readiness::Unsatisfiable {
                    reason: format!(
                        "only {} of {} predecessors can still reach done, quorum is {}",
                        done.len() + open,
                        predecessors.len(),
                        quorum
                    ),
                }
            } else {
                Readiness::Wait
            }
        }
    }
}

/// Done predecessors ordered by terminal timestamp, ties by ascending id.
/// This order decides races under `any` and `gate` rules.
fn done_in_finish_order(predecessors: &[Session]) -> Vec<&Session> {
    let mut done: Vec<&Session> = predecessors
        .iter()
        .filter(|p| p.state == SessionState::Done)
        .collect();
    done.sort_by(|a, b| {
        let at = a.finished_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let bt = b.finished_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        at.cmp(&bt).then_with(|| a.id.cmp(&b.id))
    });
    done
}

/// Full readiness check: the rule over `after`, then every condition.
/// `satisfied_by` always comes from the rule; conditions only gate.
pub async fn evaluate(
    store: &SessionStore,
    classifier: &dyn OutcomeClassifier,
    session: &Session,
) -> Result<Readiness> {
    let spec = &session.dependency_spec;
    if spec.is_empty() {
        return Ok(Readiness::Ready {
            satisfied_by: Vec::new(),
        });
    }

    let mut predecessors = Vec::with_capacity(spec.after.len());
    for id in &spec.after {
        predecessors.push(store.get(id).await?);
    }
    let base = rule_readiness(spec, &predecessors);
    if matches!(base, Readiness::Unsatisfiable { .. }) {
        return Ok(base);
    }

    let mut waiting = matches!(base, Readiness::Wait);
    for condition in &spec.conditions {
        match condition_readiness(store, classifier, condition).await? {
            unsat @ Readiness::Unsatisfiable { .. } => return Ok(unsat),
            Readiness::Wait => waiting = true,
            Readiness::Ready { .. } => {}
        }
    }

    if waiting {
        Ok(Readiness::Wait)
    } else {
        Ok(base)
    }
}

/// A condition is decidable only once its target is terminal. A target that
/// ends without a pass/fail-classifiable result, or whose classification
/// errors, makes the condition unsatisfiable rather than hanging the
/// dependent.
async fn condition_readiness(
    store: &SessionStore,
    classifier: &dyn OutcomeClassifier,
    condition: &Condition,
) -> Result<Readiness> {
    let target = store.get(&condition.target).await?;
    match target.state {
        SessionState::Done => match classify_cached(store, classifier, &target).await {
            Ok(outcome) if outcome == condition.expect => Ok(Readiness::Ready {
                satisfied_by: Vec::new(),
            }),
            Ok(outcome) => Ok(Readiness::Unsatisfiable {
                reason: format!(
                    "condition on {} expected {}, result classified {}",
                    target.id, condition.expect, outcome
                ),
            }),
            Err(err) => Ok(Readiness::Unsatisfiable {
                reason: format!("classification of {} failed: {}", target.id, err),
            }),
        },
        SessionState::Aborted | SessionState::Skipped => Ok(Readiness::Unsatisfiable {
            reason: format!("condition target {} ended {}", target.id, target.state),
        }),
        _ => Ok(Readiness::Wait),
    }
}

/// Classify once, cache on the target's record so every dependent sees the
/// same judgment
pub async fn classify_cached(
    store: &SessionStore,
    classifier: &dyn OutcomeClassifier,
    target: &Session,
) -> Result<Outcome> {
    if let Some(cached) = target.outcome_class {
        return Ok(cached);
    }
    let outcome = classifier.classify(target).await?;
    store
        .update(&target.id, |s| s.outcome_class = Some(outcome))
        .await?;
    Ok(outcome)
}

/// Production classifier: one-shot worker invocation with a classification
/// contract on stdin, PASS/FAIL token expected on the last line
pub struct WorkerClassifier {
    argv: Vec<String>,
}

impl WorkerClassifier {
    pub fn new(command_line: &str) -> Result<Self> {
        Ok(WorkerClassifier {
            argv: crate::worker::parse_command_line(command_line)?,
        })
    }
}

#[async_trait]
impl OutcomeClassifier for WorkerClassifier {
    async fn classify(&self, session: &Session) -> Result<Outcome> {
        let contract = build_classification_contract(session);
        let exit = run_one_shot(&self.argv, &contract, &session.id).await?;
        if !exit.success {
            return Err(OverseerError::ClassificationFailure {
                session_id: session.id.to_string(),
                message: format!("classifier exited unsuccessfully: {}", exit.diagnostic),
            });
        }
        Outcome::from_output(&exit.output).ok_or_else(|| OverseerError::ClassificationFailure {
            session_id: session.id.to_string(),
            message: "classifier output carries no PASS/FAIL token".to_string(),
        })
    }
}

pub fn build_classification_contract(session: &Session) -> String {
    format!(
        "# Role\n\n\
         You are a judge. Read the task and the result below and decide whether \
         the result represents success or failure of the task.\n\n\
         You MUST end your reply with exactly one of these tokens on its own line:\n\
         - `PASS`: the result accomplishes the task\n\
         - `FAIL`: the result reports failure or does not accomplish the task\n\n\
         # Task\n\n{}\n\n\
         # Result\n\n{}\n",
        session.task.trim(),
        session.result.as_deref().unwrap_or("(no result recorded)").trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionDraft;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(Outcome);

    #[async_trait]
    impl OutcomeClassifier for FixedClassifier {
        async fn classify(&self, _session: &Session) -> Result<Outcome> {
            Ok(self.0)
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl OutcomeClassifier for FailingClassifier {
        async fn classify(&self, session: &Session) -> Result<Outcome> {
            Err(OverseerError::ClassificationFailure {
                session_id: session.id.to_string(),
                message: "judge unavailable".to_string(),
            })
        }
    }

    struct CountingClassifier {
        outcome: Outcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OutcomeClassifier for CountingClassifier {
        async fn classify(&self, _session: &Session) -> Result<Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome)
        }
    }

    fn predecessor(id: &str, state: SessionState, finished_second: Option<u32>) -> Session {
        let mut s = Session::new(SessionId::parse(id).unwrap(), None, "p");
        s.state = state;
        s.finished_at =
            finished_second.map(|sec| Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, sec).unwrap());
        s
    }

    fn spec(rule: DependencyRule, ids: &[&str]) -> DependencySpec {
        DependencySpec {
            after: ids.iter().map(|i| SessionId::parse(i).unwrap()).collect(),
            rule,
            conditions: Vec::new(),
        }
    }

    fn unique_temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("overseer-test-resolver-{}", uuid::Uuid::new_v4()))
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
    fn test_all_rule_waits_then_readies() {
        let spec = spec(DependencyRule::All, &["0", "1"]);
        let preds = vec![
            predecessor("0", SessionState::Done, Some(1)),
            predecessor("1", SessionState::Running, None),
        ];
        assert_eq!(rule_readiness(&spec, &preds), Readiness::Wait);

        let preds = vec![
            predecessor("0", SessionState::Done, Some(1)),
            predecessor("1", SessionState::Done, Some(2)),
        ];
        let Readiness::Ready { satisfied_by } = rule_readiness(&spec, &preds) else {
            panic!("expected ready");
        };
        assert_eq!(satisfied_by.len(), 2);
    }

    #[test]
    fn test_all_rule_unsatisfiable_on_aborted_predecessor() {
        let spec = spec(DependencyRule::All, &["0", "1"]);
        // one predecessor still open, the other aborted: unsatisfiable wins
        let preds = vec![
            predecessor("0", SessionState::Running, None),
            predecessor("1", SessionState::Aborted, Some(1)),
        ];
        assert!(matches!(
            rule_readiness(&spec, &preds),
            Readiness::Unsatisfiable { .. }
        ));
    }

    #[test]
    fn test_any_rule_first_done_wins() {
        let spec = spec(DependencyRule::Any, &["0", "1", "2"]);
        let preds = vec![
            predecessor("0", SessionState::Done, Some(30)),
            predecessor("1", SessionState::Done, Some(10)),
            predecessor("2", SessionState::Running, None),
        ];
        let Readiness::Ready { satisfied_by } = rule_readiness(&spec, &preds) else {
            panic!("expected ready");
        };
        assert_eq!(satisfied_by, vec![SessionId::parse("1").unwrap()]);
    }

    #[test]
    fn test_any_rule_timestamp_tie_breaks_by_id() {
        let spec = spec(DependencyRule::Any, &["3", "2"]);
        let preds = vec![
            predecessor("3", SessionState::Done, Some(5)),
            predecessor("2", SessionState::Done, Some(5)),
        ];
        let Readiness::Ready { satisfied_by } = rule_readiness(&spec, &preds) else {
            panic!("expected ready");
        };
        assert_eq!(satisfied_by, vec![SessionId::parse("2").unwrap()]);
    }

    #[test]
    fn test_any_rule_unsatisfiable_only_when_all_terminal() {
        let spec = spec(DependencyRule::Any, &["0", "1"]);
        let preds = vec![
            predecessor("0", SessionState::Aborted, Some(1)),
            predecessor("1", SessionState::Running, None),
        ];
        assert_eq!(rule_readiness(&spec, &preds), Readiness::Wait);

        let preds = vec![
            predecessor("0", SessionState::Aborted, Some(1)),
            predecessor("1", SessionState::Skipped, Some(2)),
        ];
        assert!(matches!(
            rule_readiness(&spec, &preds),
            Readiness::Unsatisfiable { .. }
        ));
    }

    #[test]
    fn test_gate_rule_quorum_counting() {
        let spec = spec(DependencyRule::Gate { quorum: 2 }, &["0", "1", "2"]);

        let preds = vec![
            predecessor("0", SessionState::Done, Some(1)),
            predecessor("1", SessionState::Running, None),
            predecessor("2", SessionState::Aborted, Some(2)),
        ];
        // 1 done + 1 open = 2, quorum still reachable
        assert_eq!(rule_readiness(&spec, &preds), Readiness::Wait);

        let preds = vec![
            predecessor("0", SessionState::Done, Some(1)),
            predecessor("1", SessionState::Skipped, Some(3)),
            predecessor("2", SessionState::Aborted, Some(2)),
        ];
        assert!(matches!(
            rule_readiness(&spec, &preds),
            Readiness::Unsatisfiable { .. }
        ));

        let preds = vec![
            predecessor("0", SessionState::Done, Some(9)),
            predecessor("1", SessionState::Done, Some(2)),
            predecessor("2", SessionState::Done, Some(5)),
        ];
        let Readiness::Ready { satisfied_by } = rule_readiness(&spec, &preds) else {
            panic!("expected ready");
        };
        // winners are the first two to finish, in finish order
        assert_eq!(
            satisfied_by,
            vec![SessionId::parse("1").unwrap(), SessionId::parse("2").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_empty_spec_is_immediately_ready() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let id = store.create(SessionDraft::new("free")).await.unwrap();
        let session = store.get(&id).await.unwrap();
        let readiness = evaluate(&store, &FixedClassifier(Outcome::Pass), &session)
            .await
            .unwrap();
        assert_eq!(
            readiness,
            Readiness::Ready {
                satisfied_by: Vec::new()
            }
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_condition_gates_a_satisfied_rule() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let gatekeeper = store.create(SessionDraft::new("gatekeeper")).await.unwrap();
        let dependent = store
            .create(
                SessionDraft::new("dependent").with_dependencies(DependencySpec {
                    after: vec![gatekeeper.clone()],
                    rule: DependencyRule::All,
                    conditions: vec![Condition {
                        target: gatekeeper.clone(),
                        expect: Outcome::Pass,
                    }],
                }),
            )
            .await
            .unwrap();

        let session = store.get(&dependent).await.unwrap();
        let classifier = FixedClassifier(Outcome::Pass);
        assert_eq!(
            evaluate(&store, &classifier, &session).await.unwrap(),
            Readiness::Wait
        );

        finish_done(&store, &gatekeeper, "all tests green").await;
        let readiness = evaluate(&store, &classifier, &session).await.unwrap();
        assert!(matches!(readiness, Readiness::Ready { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_condition_mismatch_is_unsatisfiable() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let target = store.create(SessionDraft::new("target")).await.unwrap();
        let dependent = store
            .create(
                SessionDraft::new("on-fail branch").with_dependencies(DependencySpec {
                    after: vec![target.clone()],
                    rule: DependencyRule::All,
                    conditions: vec![Condition {
                        target: target.clone(),
                        expect: Outcome::Fail,
                    }],
                }),
            )
            .await
            .unwrap();

        finish_done(&store, &target, "worked fine").await;
        let session = store.get(&dependent).await.unwrap();
        let readiness = evaluate(&store, &FixedClassifier(Outcome::Pass), &session)
            .await
            .unwrap();
        assert!(matches!(readiness, Readiness::Unsatisfiable { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_condition_on_aborted_target_is_unsatisfiable() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let target = store.create(SessionDraft::new("target")).await.unwrap();
        let dependent = store
            .create(
                SessionDraft::new("dependent").with_dependencies(DependencySpec {
                    after: vec![target.clone()],
                    rule: DependencyRule::All,
                    conditions: vec![Condition {
                        target: target.clone(),
                        expect: Outcome::Pass,
                    }],
                }),
            )
            .await
            .unwrap();

        store
            .finish(&target, SessionState::Aborted, None, None)
            .await
            .unwrap();
        let session = store.get(&dependent).await.unwrap();
        let readiness = evaluate(&store, &FixedClassifier(Outcome::Pass), &session)
            .await
            .unwrap();
        assert!(matches!(readiness, Readiness::Unsatisfiable { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_classification_error_resolves_to_unsatisfiable() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let target = store.create(SessionDraft::new("target")).await.unwrap();
        let dependent = store
            .create(
                SessionDraft::new("dependent").with_dependencies(DependencySpec {
                    after: vec![target.clone()],
                    rule: DependencyRule::All,
                    conditions: vec![Condition {
                        target: target.clone(),
                        expect: Outcome::Pass,
                    }],
                }),
            )
            .await
            .unwrap();

        finish_done(&store, &target, "ambiguous").await;
        let session = store.get(&dependent).await.unwrap();
        // never an Err and never a hang: the dependent just skips
        let readiness = evaluate(&store, &FailingClassifier, &session).await.unwrap();
        assert!(matches!(readiness, Readiness::Unsatisfiable { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_classification_is_cached_on_the_target() {
        let dir = unique_temp_dir();
        let store = SessionStore::open(&dir).await.unwrap();
        let target = store.create(SessionDraft::new("target")).await.unwrap();
        let dependent = store
            .create(
                SessionDraft::new("dependent").with_dependencies(DependencySpec {
                    after: vec![target.clone()],
                    rule: DependencyRule::All,
                    conditions: vec![Condition {
                        target: target.clone(),
                        expect: Outcome::Pass,
                    }],
                }),
            )
            .await
            .unwrap();

        finish_done(&store, &target, "ok").await;
        let classifier = CountingClassifier {
            outcome: Outcome::Pass,
            calls: AtomicUsize::new(0),
        };
        let session = store.get(&dependent).await.unwrap();
        evaluate(&store, &classifier, &session).await.unwrap();
        evaluate(&store, &classifier, &session).await.unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(&target).await.unwrap().outcome_class,
            Some(Outcome::Pass)
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_worker_classifier_parses_trailing_token() {
        let mut session = Session::new(SessionId::root(0), None, "check the build");
        session.result = Some("build came out clean".to_string());

        let classifier =
            WorkerClassifier::new("/bin/sh -c 'cat > /dev/null; echo verdict; echo PASS'").unwrap();
        assert_eq!(classifier.classify(&session).await.unwrap(), Outcome::Pass);

        let classifier = WorkerClassifier::new("/bin/sh -c 'cat > /dev/null; echo FAIL'").unwrap();
        assert_eq!(classifier.classify(&session).await.unwrap(), Outcome::Fail);

        let classifier = WorkerClassifier::new("/bin/sh -c 'cat > /dev/null; echo maybe'").unwrap();
        let err = classifier.classify(&session).await.unwrap_err();
        assert!(matches!(err, OverseerError::ClassificationFailure { .. }));
    }

    #[test]
    fn test_classification_contract_carries_task_and_result() {
        let mut session = Session::new(SessionId::root(4), None, "migrate the schema");
        session.result = Some("migration applied".to_string());
        let contract = build_classification_contract(&session);
        assert!(contract.contains("`PASS`"));
        assert!(contract.contains("`FAIL`"));
        assert!(contract.contains("migrate the schema"));
        assert!(contract.contains("migration applied"));
    }
}
