//! Contract composition
//!
//! A contract is the complete input document a worker receives: everything
//! the session knows, rendered as one markdown file. Composition is split in
//! two so the rendering stays pure: `gather` pulls predecessor results out of
//! the store, `build_contract` turns the gathered inputs into bytes. Given
//! the same inputs the output is byte-identical, so a contract can be
//! recomposed for audit at any time.

use std::fmt::Write as _;

use crate::error::{OverseerError, Result};
use crate::session::{
    DependencyRule, IterationRecord, PhaseMetadata, Session, SessionId, SessionState,
};
use crate::store::SessionStore;

/// One predecessor result ready for injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipedResult {
    pub id: SessionId,
    pub alias: Option<String>,
    pub result: String,
}

impl PipedResult {
    fn label(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} ({})", alias, self.id),
            None => self.id.to_string(),
        }
    }
}

/// Everything `build_contract` needs, already resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractInputs {
    pub task: String,
    pub scope_paths: Vec<String>,
    pub parent_intent: Option<String>,
    pub phase: Option<PhaseMetadata>,
    pub piped: Vec<PipedResult>,
    pub findings: Vec<IterationRecord>,
}

/// Resolve a session's piped predecessors against the store.
///
/// Which predecessors count depends on the satisfaction rule: under `all`
/// every piped predecessor must have produced a result; under `any`/`gate`
/// only the recorded satisfying set is injected and the rest are left out.
/// Predecessors that ended `aborted` or `skipped` carry no usable result and
/// are left out as well.
pub async fn gather(store: &SessionStore, session: &Session) -> Result<ContractInputs> {
    let winners: Option<&Vec<SessionId>> = match session.dependency_spec.rule {
        DependencyRule::All => None,
        DependencyRule::Any | DependencyRule::Gate { .. } => Some(&session.satisfied_by),
    };

    let mut piped = Vec::new();
    for id in &session.piped_inputs {
        if let Some(winners) = winners {
            if !winners.contains(id) {
                continue;
            }
        }
        let predecessor = store.get(id).await?;
        match predecessor.state {
            SessionState::Done => match predecessor.result {
                Some(result) => piped.push(PipedResult {
                    id: id.clone(),
                    alias: predecessor.alias,
                    result,
                }),
                None => {
                    return Err(OverseerError::MissingDependencyResult {
                        session_id: session.id.to_string(),
                        predecessor: id.to_string(),
                    })
                }
            },
            SessionState::Aborted | SessionState::Skipped => continue,
            _ if winners.is_some() => continue,
            _ => {
                return Err(OverseerError::MissingDependencyResult {
                    session_id: session.id.to_string(),
                    predecessor: id.to_string(),
                })
            }
        }
    }

    Ok(ContractInputs {
        task: session.task.clone(),
        scope_paths: session.scope_paths.clone(),
        parent_intent: session.parent_intent.clone(),
        phase: session.phase.clone(),
        piped,
        findings: session
            .history
            .iter()
            .filter(|r| !r.findings.is_empty())
            .cloned()
            .collect(),
    })
}

/// Render the contract markdown. Pure: no I/O, no clock, no randomness.
///
/// Section order is fixed. Scope first so constraints frame everything that
/// follows, task last so it is the freshest thing in the worker's context.
/// Absent inputs produce no section at all.
pub fn build_contract(inputs: &ContractInputs) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !inputs.scope_paths.is_empty() {
        let mut section = String::from("# File Scope\n\nOnly modify files within these paths:\n");
        for path in &inputs.scope_paths {
            let _ = writeln!(section, "- `{}`", path);
        }
        sections.push(section.trim_end().to_string());
    }

    if let Some(intent) = &inputs.parent_intent {
        sections.push(format!("# Parent Intent\n\n{}", intent.trim()));
    }

    if let Some(phase) = &inputs.phase {
        let mut section = format!("# Phase\n\nYou are in the **{}** phase.", phase.name);
        if let Some(previous) = &phase.previous {
            let _ = write!(section, "\n\nThe previous phase produced:\n\n{}", previous.trim());
        }
        sections.push(section);
    }

    if !inputs.piped.is_empty() {
        let body = inputs
            .piped
            .iter()
            .map(|p| format!("predecessor {} produced:\n\n{}", p.label(), p.result.trim()))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        sections.push(format!("# Prior Results\n\n{}", body));
    }

    sections.push(format!("# Task\n\n{}", inputs.task.trim()));

    if !inputs.findings.is_empty() {
        let body = inputs
            .findings
            .iter()
            .map(|r| format!("- iteration {}: {}", r.iteration, r.findings.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "# Verification Feedback\n\nPrior attempts were rejected. Address these findings:\n{}",
            body
        ));
    }

    let mut contract = sections.join("\n\n");
    contract.push('\n');
    contract
}

/// Gather then build, in one call
pub async fn render(store: &SessionStore, session: &Session) -> Result<String> {
    let inputs = gather(store, session).await?;
    Ok(build_contract(&inputs))
}

/// Render the contract a worker-kind checker receives: the verdict protocol,
/// the criteria, the doer's output, and where this iteration sits in the
/// iteration bound.
pub fn build_checker_contract(
    criteria: &str,
    doer_output: &str,
    iteration: u32,
    max_iterations: u32,
    history: &[IterationRecord],
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(
        "# Role\n\n\
         You are a checker. Verify the doer's output against the criteria below and \
         render a verdict.\n\n\
         You MUST end your reply with exactly one of these tokens on its own line:\n\
         - `ACCEPT`: the output meets the criteria\n\
         - `RETRY`: the output needs another attempt; give specific findings\n\
         - `TERMINATE`: the task cannot converge and retrying will not help"
            .to_string(),
    );

    sections.push(format!("# Checker Criteria\n\n{}", criteria.trim()));
    sections.push(format!("# Doer Output\n\n{}", doer_output.trim()));
    sections.push(format!(
        "# Iteration\n\nThis is iteration {} of {}.",
        iteration, max_iterations
    ));

    if !history.is_empty() {
        let body = history
            .iter()
            .map(|r| {
                if r.findings.is_empty() {
                    format!("- iteration {}: {}", r.iteration, r.verdict.token())
                } else {
                    format!(
                        "- iteration {}: {}: {}",
                        r.iteration,
                        r.verdict.token(),
                        r.findings.trim()
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("# Prior Iterations\n\n{}", body));
    }

    let mut contract = sections.join("\n\n");
    contract.push('\n');
    contract
}
