//! Error taxonomy (`spec.md` §7).
//!
//! Two distinct types on purpose: `OrchestratorError` is a Rust `Error` for
//! the handful of call sites that genuinely return `Result::Err` (quorum
//! well-formedness checks at construction, collaborator failures).
//! `AbortCause` is data - it rides through the event log and the `Report`
//! surface, so it has to `Serialize`/`Deserialize` and stay comparable by
//! value; it is not meant to be `std::error::Error` itself.

use crate::ids::Destination;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Crate-wide result alias, matching `tasker_shared::errors::OrchestrationResult`
/// in spirit.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Why a task transitioned to `Aborted`.
///
/// `User` carries whatever value the task's behavior produced when it
/// returned `TaskAction::Abort` - the engine never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbortCause {
    /// A task's behavior did not handle the `Timeout` sentinel.
    TimeoutError,
    /// A quorum composite task concluded without reaching its threshold.
    QuorumNotAchieved,
    /// A quorum composite task has already seen more aborts than its
    /// tolerance allows.
    QuorumImpossibleToAchieve,
    /// Quorum construction was rejected by a well-formedness check.
    IllegalArgument(String),
    /// Whatever cause the task's own behavior supplied.
    User(Value),
}

impl std::fmt::Display for AbortCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortCause::TimeoutError => write!(f, "task timed out with no handler"),
            AbortCause::QuorumNotAchieved => write!(f, "quorum not achieved"),
            AbortCause::QuorumImpossibleToAchieve => {
                write!(f, "quorum impossible to achieve")
            }
            AbortCause::IllegalArgument(msg) => write!(f, "illegal argument: {msg}"),
            AbortCause::User(value) => write!(f, "{value}"),
        }
    }
}

/// Errors surfaced by the engine itself, as opposed to task-level aborts.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("no task is waiting on destination {destination} with correlation id {correlation_id}")]
    UnmatchedReply {
        destination: Destination,
        correlation_id: String,
    },

    #[error("persistence layer failed: {0}")]
    PersistenceFailure(String),

    #[error("delivery primitive failed: {0}")]
    DeliveryFailure(String),

    #[error("task index {0} does not exist")]
    UnknownTask(u32),

    #[error("orchestrator has already been started")]
    AlreadyStarted,
}
