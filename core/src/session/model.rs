//! Session data model and lifecycle state machine
//!
//! A session is a bounded unit of delegated work. Its state machine is the
//! single authority on which transitions exist; the store refuses anything
//! else. Terminal states are absorbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::id::SessionId;

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, dependencies not yet satisfied
    Pending,
    /// Worker process is live
    Running,
    /// Worker finished, checker verdict outstanding
    AwaitingVerification,
    /// Checker said RETRY, relaunch imminent
    Retrying,
    /// Terminal: accepted, or flagged non-convergence
    Done,
    /// Terminal: explicitly aborted, or worker never came up
    Aborted,
    /// Terminal: dependency rule or condition can never hold
    Skipped,
}

impl SessionState {
    /// States reachable from this one. Every non-terminal state can be
    /// aborted; nothing leaves a terminal state.
    pub fn allowed_transitions(&self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Pending => &[Running, Skipped, Aborted],
            Running => &[AwaitingVerification, Aborted],
            AwaitingVerification => &[Done, Retrying, Aborted],
            Retrying => &[Running, Aborted],
            Done | Aborted | Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Aborted | SessionState::Skipped
        )
    }

    /// True while a worker process may be attached to the session
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Running | SessionState::AwaitingVerification | SessionState::Retrying
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Pending => "pending",
            SessionState::Running => "running",
            SessionState::AwaitingVerification => "awaiting_verification",
            SessionState::Retrying => "retrying",
            SessionState::Done => "done",
            SessionState::Aborted => "aborted",
            SessionState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Checker's decision for one completed doer iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Retry,
    Terminate,
}

impl Verdict {
    /// Exact-token form used on the wire ("ACCEPT" / "RETRY" / "TERMINATE")
    pub fn token(&self) -> &'static str {
        match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Retry => "RETRY",
            Verdict::Terminate => "TERMINATE",
        }
    }

    pub fn from_token(token: &str) -> Option<Verdict> {
        match token {
            "ACCEPT" => Some(Verdict::Accept),
            "RETRY" => Some(Verdict::Retry),
            "TERMINATE" => Some(Verdict::Terminate),
            _ => None,
        }
    }

    /// Scan the trailing non-empty lines of checker output for a verdict
    /// token standing on its own line. Text after the verdict (trailing
    /// whitespace, blank lines) is tolerated; prose is not.
    pub fn from_output(output: &str) -> Option<Verdict> {
        output
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(Verdict::from_token)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Agent-judged classification of a predecessor's result text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    pub fn token(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
        }
    }

    pub fn from_token(token: &str) -> Option<Outcome> {
        match token {
            "PASS" => Some(Outcome::Pass),
            "FAIL" => Some(Outcome::Fail),
            _ => None,
        }
    }

    /// Same trailing-token scan as `Verdict::from_output`
    pub fn from_output(output: &str) -> Option<Outcome> {
        output
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(Outcome::from_token)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pass => f.write_str("pass"),
            Outcome::Fail => f.write_str("fail"),
        }
    }
}

/// Satisfaction rule over the predecessor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyRule {
    /// Every predecessor must be done (default)
    All,
    /// First predecessor to finish satisfies the rule
    Any,
    /// N of the M named predecessors must be done
    Gate { quorum: usize },
}

impl Default for DependencyRule {
    fn default() -> Self {
        DependencyRule::All
    }
}

/// Conditional trigger: run only if the target's outcome classifies as
/// expected; otherwise the dependent is skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub target: SessionId,
    pub expect: Outcome,
}

/// Declared-at-creation, immutable dependency expression
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Predecessor set the rule ranges over
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<SessionId>,

    #[serde(default)]
    pub rule: DependencyRule,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DependencySpec {
    pub fn is_empty(&self) -> bool {
        self.after.is_empty() && self.conditions.is_empty()
    }

    /// Every session id this spec mentions (rule members and condition
    /// targets); a terminal event on any of these re-resolves the dependent
    pub fn referenced_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.after
            .iter()
            .chain(self.conditions.iter().map(|c| &c.target))
    }

    pub fn references(&self, id: &SessionId) -> bool {
        self.referenced_ids().any(|r| r == id)
    }

    /// Static sanity: rules that can never hold are rejected at creation,
    /// runtime unsatisfiability resolves to `skipped` instead
    pub fn validate_static(&self) -> Result<(), String> {
        for (i, id) in self.after.iter().enumerate() {
            if self.after[..i].contains(id) {
                return Err(format!("predecessor {} listed more than once", id));
            }
        }
        match self.rule {
            DependencyRule::All => Ok(()),
            DependencyRule::Any => {
                if self.after.is_empty() {
                    Err("any-rule with no predecessors".to_string())
                } else {
                    Ok(())
                }
            }
            DependencyRule::Gate { quorum } => {
                if quorum == 0 {
                    Err("gate quorum must be at least 1".to_string())
                } else if quorum > self.after.len() {
                    Err(format!(
                        "gate quorum {} exceeds predecessor count {}",
                        quorum,
                        self.after.len()
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn default_max_iterations() -> u32 {
    3
}

/// How a session's output gets verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckerKind {
    /// Fixed external verification command; exit 0 is ACCEPT
    Command { command: String },
    /// Second worker invocation judging against free-text criteria
    Worker { criteria: String },
}

/// Verification procedure plus the iteration bound for the feedback loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerSpec {
    #[serde(flatten)]
    pub kind: CheckerKind,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl CheckerSpec {
    pub fn command(command: impl Into<String>) -> Self {
        CheckerSpec {
            kind: CheckerKind::Command {
                command: command.into(),
            },
            max_iterations: default_max_iterations(),
        }
    }

    pub fn worker(criteria: impl Into<String>) -> Self {
        CheckerSpec {
            kind: CheckerKind::Worker {
                criteria: criteria.into(),
            },
            max_iterations: default_max_iterations(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

/// Position of a session inside a multi-phase chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMetadata {
    pub name: String,

    /// What the previous phase produced, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

/// Audit record of one completed doer/checker cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub verdict: Verdict,

    /// Checker findings; empty on ACCEPT
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub findings: String,

    pub at: DateTime<Utc>,
}

/// One bounded unit of delegated work; also the durable record shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SessionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub task: String,
    pub state: SessionState,

    #[serde(default, skip_serializing_if = "DependencySpec::is_empty")]
    pub dependency_spec: DependencySpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker_spec: Option<CheckerSpec>,

    #[serde(default)]
    pub iteration_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Predecessors whose results feed this session's contract, in
    /// injection order; always a subset of `dependency_spec.after`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub piped_inputs: Vec<SessionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_intent: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope_paths: Vec<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Predecessors that satisfied the rule, fixed at readiness time so
    /// retry contracts recompose identically
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub satisfied_by: Vec<SessionId>,

    /// Cached agent classification of this session's own result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_class: Option<Outcome>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<IterationRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pid: Option<u32>,

    /// Terminal annotation: "did not converge", abort diagnostics, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, parent_id: Option<SessionId>, task: impl Into<String>) -> Self {
        Session {
            id,
            parent_id,
            alias: None,
            task: task.into(),
            state: SessionState::Pending,
            dependency_spec: DependencySpec::default(),
            checker_spec: None,
            iteration_count: 0,
            result: None,
            piped_inputs: Vec::new(),
            phase: None,
            parent_intent: None,
            scope_paths: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            satisfied_by: Vec::new(),
            outcome_class: None,
            history: Vec::new(),
            worker_pid: None,
            note: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn max_iterations(&self) -> u32 {
        self.checker_spec
            .as_ref()
            .map(|c| c.max_iterations)
            .unwrap_or_else(default_max_iterations)
    }

    /// Display label: alias with id, or bare id
    pub fn label(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} ({})", alias, self.id),
            None => self.id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use SessionState::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Running.can_transition_to(AwaitingVerification));
        assert!(Running.can_transition_to(Aborted));
        assert!(AwaitingVerification.can_transition_to(Done));
        assert!(AwaitingVerification.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Running));
    }

    #[test]
    fn test_invalid_transitions() {
        use SessionState::*;
        assert!(!Pending.can_transition_to(AwaitingVerification));
        assert!(!Pending.can_transition_to(Done));
        assert!(!Running.can_transition_to(Done));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Retrying.can_transition_to(Done));
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        use SessionState::*;
        for terminal in [Done, Aborted, Skipped] {
            assert!(terminal.is_terminal());
            assert!(terminal.allowed_transitions().is_empty());
        }
        for open in [Pending, Running, AwaitingVerification, Retrying] {
            assert!(!open.is_terminal());
            assert!(open.can_transition_to(Aborted));
        }
    }

    #[test]
    fn test_state_serde_names() {
        let json = serde_json::to_string(&SessionState::AwaitingVerification).unwrap();
        assert_eq!(json, "\"awaiting_verification\"");
        let back: SessionState = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(back, SessionState::Skipped);
        assert_eq!(SessionState::Retrying.to_string(), "retrying");
    }

    #[test]
    fn test_verdict_from_output_takes_trailing_line() {
        let output = "ran the suite\nall 42 tests green\n\nACCEPT\n\n";
        assert_eq!(Verdict::from_output(output), Some(Verdict::Accept));

        let output = "fix the login test first\nRETRY";
        assert_eq!(Verdict::from_output(output), Some(Verdict::Retry));

        // prose around the token does not count
        assert_eq!(Verdict::from_output("I would ACCEPT this"), None);
        assert_eq!(Verdict::from_output(""), None);
    }

    #[test]
    fn test_checker_spec_defaults() {
        let spec: CheckerSpec =
            serde_json::from_str(r#"{"type":"command","command":"cargo test"}"#).unwrap();
        assert_eq!(spec.max_iterations, 3);
        assert_eq!(
            spec.kind,
            CheckerKind::Command {
                command: "cargo test".to_string()
            }
        );

        let spec = CheckerSpec::worker("lints clean").with_max_iterations(0);
        assert_eq!(spec.max_iterations, 1);
    }

    #[test]
    fn test_dependency_spec_static_validation() {
        let ids = |names: &[&str]| -> Vec<SessionId> {
            names.iter().map(|n| SessionId::parse(n).unwrap()).collect()
        };

        let ok = DependencySpec {
            after: ids(&["0", "1"]),
            rule: DependencyRule::Gate { quorum: 2 },
            conditions: Vec::new(),
        };
        assert!(ok.validate_static().is_ok());

        let too_big = DependencySpec {
            after: ids(&["0", "1"]),
            rule: DependencyRule::Gate { quorum: 3 },
            conditions: Vec::new(),
        };
        assert!(too_big.validate_static().is_err());

        let empty_any = DependencySpec {
            after: Vec::new(),
            rule: DependencyRule::Any,
            conditions: Vec::new(),
        };
        assert!(empty_any.validate_static().is_err());
    }

    #[test]
    fn test_session_record_round_trip() {
        let mut session = Session::new(
            SessionId::parse("0.1").unwrap(),
            Some(SessionId::parse("0").unwrap()),
            "refactor the parser",
        );
        session.alias = Some("parser".to_string());
        session.checker_spec = Some(CheckerSpec::command("cargo test").with_max_iterations(2));
        session.dependency_spec.after = vec![SessionId::parse("0.0").unwrap()];

        let json = serde_json::to_string_pretty(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.alias.as_deref(), Some("parser"));
        assert_eq!(back.max_iterations(), 2);
        assert_eq!(back.state, SessionState::Pending);
        assert_eq!(back.label(), "parser (0.1)");
    }
}
