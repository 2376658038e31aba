//! Feedback-loop control
//!
//! The doer/checker primitive. After a doer completes, its output is judged:
//! by a fixed verification command, by a second worker invocation, or, when
//! the session carries no checker, by an implicit ACCEPT. Exactly one
//! verdict is rendered per cycle and it is authoritative; nothing
//! second-guesses the checker. A checker that cannot run is a retry-eligible
//! failure, never a silent pass.

use chrono::Utc;
use tracing::{info, warn};

use crate::contract::build_checker_contract;
use crate::error::{OverseerError, Result};
use crate::session::{CheckerKind, IterationRecord, Session, SessionId, SessionState, Verdict};
use crate::store::SessionStore;
use crate::worker::{parse_command_line, run_one_shot};

/// What the supervisor should do after a verdict has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// The session reached a terminal state
    Settled,
    /// Relaunch the doer; the next contract carries the findings
    Relaunch,
}

pub struct FeedbackController {
    /// Command that runs worker-kind checkers, from configuration
    checker_argv: Vec<String>,
}

impl FeedbackController {
    pub fn new(checker_worker_command: &str) -> Result<Self> {
        Ok(FeedbackController {
            checker_argv: parse_command_line(checker_worker_command)?,
        })
    }

    /// Render a verdict for a completed doer. Never errors: a checker that
    /// cannot run degrades to RETRY with the failure text as findings.
    pub async fn judge(&self, session: &Session, doer_output: &str) -> (Verdict, String) {
        if session.checker_spec.is_none() {
            return (Verdict::Accept, String::new());
        }
        match self.run_checker(session, doer_output).await {
            Ok(judged) => judged,
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "checker could not run");
                (Verdict::Retry, format!("checker could not run: {}", err))
            }
        }
    }

    async fn run_checker(&self, session: &Session, doer_output: &str) -> Result<(Verdict, String)> {
        let spec = session
            .checker_spec
            .as_ref()
            .ok_or_else(|| OverseerError::Internal {
                message: format!("run_checker on {} without a checker", session.id),
            })?;

        match &spec.kind {
            CheckerKind::Command { command } => {
                let argv = parse_command_line(command)?;
                let exit = run_one_shot(&argv, doer_output, &session.id).await?;
                // an explicit token on the last line outranks the exit code
                if let Some(verdict) = Verdict::from_output(&exit.output) {
                    return Ok((verdict, findings_without_token(&exit.output)));
                }
                if exit.success {
                    Ok((Verdict::Accept, String::new()))
                } else {
                    let findings = if exit.output.is_empty() {
                        exit.diagnostic
                    } else {
                        exit.output
                    };
                    Ok((Verdict::Retry, findings))
                }
            }
            CheckerKind::Worker { criteria } => {
                let contract = build_checker_contract(
                    criteria,
                    doer_output,
                    session.iteration_count + 1,
                    session.max_iterations(),
                    &session.history,
                );
                let exit = run_one_shot(&self.checker_argv, &contract, &session.id).await?;
                if !exit.success {
                    return Err(OverseerError::VerificationFailure {
                        session_id: session.id.to_string(),
                        message: format!("checker worker failed: {}", exit.diagnostic),
                    });
                }
                match Verdict::from_output(&exit.output) {
                    Some(verdict) => Ok((verdict, findings_without_token(&exit.output))),
                    None => Err(OverseerError::VerificationFailure {
                        session_id: session.id.to_string(),
                        message: "checker rendered no verdict token".to_string(),
                    }),
                }
            }
        }
    }

    /// Apply one rendered verdict to a session in `awaiting_verification`.
    /// Increments the iteration count, records the cycle in history, and
    /// performs the resulting transition.
    pub async fn apply(
        &self,
        store: &SessionStore,
        id: &SessionId,
        verdict: Verdict,
        findings: String,
        doer_output: &str,
    ) -> Result<NextStep> {
        let recorded_findings = findings.clone();
        let (iteration, max) = store
            .update(id, move |s| {
                s.iteration_count += 1;
                s.history.push(IterationRecord {
                    iteration: s.iteration_count,
                    verdict,
                    findings: recorded_findings,
                    at: Utc::now(),
                });
                (s.iteration_count, s.max_iterations())
            })
            .await?;
        info!(session_id = %id, verdict = %verdict, iteration, "verdict rendered");

        match verdict {
            Verdict::Accept => {
                store
                    .finish(id, SessionState::Done, Some(doer_output.to_string()), None)
                    .await?;
                Ok(NextStep::Settled)
            }
            Verdict::Retry if iteration < max => {
                store.transition(id, SessionState::Retrying).await?;
                Ok(NextStep::Relaunch)
            }
            Verdict::Retry => {
                // bound exceeded: terminal, but never dressed up as success
                store
                    .finish(
                        id,
                        SessionState::Done,
                        Some(format!("[did not converge] {}", doer_output)),
                        Some(format!(
                            "did not converge after {} iterations; last findings: {}",
                            iteration, findings
                        )),
                    )
                    .await?;
                Ok(NextStep::Settled)
            }
            Verdict::Terminate => {
                store
                    .finish(
                        id,
                        SessionState::Done,
                        Some(format!("[did not converge] {}", doer_output)),
                        Some(format!(
                            "checker terminated the loop at iteration {}: {}",
                            iteration, findings
                        )),
                    )
                    .await?;
                Ok(NextStep::Settled)
            }
        }
    }
}

/// Drop trailing blank lines and the verdict token line; what remains is
/// the checker's findings
fn findings_without_token(output: &str) -> String {
    let mut lines: Vec<&str> = output.lines().collect();
    while let Some(last) = lines.last() {
        if last.trim().is_empty() {
            lines.pop();
            continue;
        }
        if Verdict::from_token(last.trim()).is_some() {
            lines.pop();
        }
        break;
    }
    lines.join("\n").trim().to_string()
}
