//! Session identity, data model and state machine

pub mod id;
pub mod model;

pub use id::{ParseSessionIdError, SessionId};
pub use model::{
    CheckerKind, CheckerSpec, Condition, DependencyRule, DependencySpec, IterationRecord,
    Outcome, PhaseMetadata, Session, SessionState, Verdict,
};
