//! # tasker-orchestrator-core
//!
//! The dependency-graph task orchestration engine: task state machine,
//! correlation, quorum voting, the report/status surface, and the
//! scheduling/recovery core that ties them together.

pub mod identifiers;
pub mod orchestrator;
pub mod quorum;
pub mod report;
pub mod task;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use identifiers::CorrelationScheme;
pub use orchestrator::{NoopHooks, Orchestrator, OrchestratorHooks, TaskBuilder, Termination};
pub use quorum::{build_quorum_task, MinimumVotes, QuorumSpec, QuorumTask};
pub use report::{Report, ReportedState, StatusResponse};
pub use task::{Behavior, CompositeTask, MakeMessage, Reply, Task, TaskAction, TaskBody, TaskSpec, TaskState};

pub use tasker_orchestrator_shared::{
    AbortCause, CorrelationId, DeliveryId, DeliveryPrimitive, Destination, OrchestratorError,
    OrchestratorEvent, OrchestratorResult, PersistenceStore, ReplayItem, Settings,
};
