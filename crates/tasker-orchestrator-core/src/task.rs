//! The task state machine (`spec.md` §4.2, C2).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tasker_orchestrator_shared::{AbortCause, CorrelationId, DeliveryId, Destination};

/// What a waiting task was handed before its behavior runs.
pub use tasker_orchestrator_shared::persistence::ReplyPayload as Reply;

/// What a task's behavior decides to do with a `Reply`.
#[derive(Debug, Clone)]
pub enum TaskAction {
    Finish(Value),
    Abort(AbortCause),
    /// The reply does not apply to this task action (distinct from "does
    /// not match" - `Ignore` is returned by a behavior that *matched* the
    /// reply via `matchId` but decided the message carries no transition,
    /// e.g. a heartbeat). The task stays `Waiting`.
    Ignore,
}

/// A task's reply handler: a partial function from "what was received" to
/// "what the task should do", per `spec.md` §4.2 and §9's note on dynamic
/// dispatch over user behaviors.
pub type Behavior = Arc<dyn Fn(Reply) -> TaskAction + Send + Sync>;

/// Builds the outbound request body once the correlation id is known,
/// mirroring `createMessage(C)` in `spec.md` §4.2.
pub type MakeMessage = Arc<dyn Fn(CorrelationId) -> Value + Send + Sync>;

/// One task's lifecycle state (`spec.md` §3).
///
/// There is no resting `TimedOut` variant here: `spec.md` §4.2 shows a
/// timeout always resolving, within the same dispatch, into either
/// `Finished` (the behavior handled `Timeout`) or `Aborted(TimeoutError)`
/// (it didn't) - so a task is never observed sitting in a "timed out but
/// undecided" state. `Reply::Timeout` carries the sentinel into the
/// behavior instead. See DESIGN.md.
#[derive(Debug, Clone)]
pub enum TaskState {
    Unstarted,
    Waiting,
    Finished(Value),
    Aborted(AbortCause),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished(_) | TaskState::Aborted(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Finished(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskState::Aborted(_))
    }
}

/// A composite task delegates its own lifecycle to an inner orchestrator
/// (`spec.md` §4.4, §9's owner/child design note). This trait is the seam
/// between the generic task-vector bookkeeping in `orchestrator.rs` and a
/// composite implementation such as `quorum::QuorumTask`, so the core
/// scheduler never needs to know about quorum voting specifically.
#[async_trait]
pub trait CompositeTask: Send + Sync + fmt::Debug {
    /// Kick off the inner orchestrator. Called exactly once, from
    /// `Task::start()`.
    async fn start(&mut self);

    /// Offer an incoming reply to the inner orchestrator. Returns `true` if
    /// some inner task consumed it (whether or not that resolved the
    /// composite task yet).
    async fn try_deliver(&mut self, destination: &Destination, correlation_id: CorrelationId, message: Value) -> bool;

    /// Fire a timeout on every inner task currently waiting - the
    /// `TimeoutTasks` cancellation primitive from `spec.md` §4.3/§5.
    async fn cancel(&mut self);

    /// `Some` once the composite has reached a terminal decision.
    fn decision(&self) -> Option<TaskAction>;
}

/// Either a plain request/reply task, or a composite task backed by an
/// inner orchestrator.
pub enum TaskBody {
    Simple {
        make_message: MakeMessage,
        behavior: Behavior,
    },
    Composite(Box<dyn CompositeTask>),
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskBody::Simple { .. } => f.write_str("TaskBody::Simple"),
            TaskBody::Composite(inner) => f.debug_tuple("TaskBody::Composite").field(inner).finish(),
        }
    }
}

/// One task (`spec.md` §3, "Task (T)").
pub struct Task {
    pub index: u32,
    pub name: String,
    pub destination: Destination,
    pub dependencies: BTreeSet<u32>,
    pub timeout: Option<Duration>,
    pub(crate) body: TaskBody,
    pub(crate) state: TaskState,
    pub(crate) expected_delivery_id: Option<DeliveryId>,
    pub(crate) expected_correlation_id: Option<CorrelationId>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field("dependencies", &self.dependencies)
            .field("state", &self.state)
            .finish()
    }
}

/// Construction-time description of a simple (non-composite) task.
pub struct TaskSpec {
    pub name: String,
    pub destination: Destination,
    pub dependencies: BTreeSet<u32>,
    pub timeout: Option<Duration>,
    pub make_message: MakeMessage,
    pub behavior: Behavior,
}

impl Task {
    pub fn new_simple(index: u32, spec: TaskSpec) -> Self {
        Self {
            index,
            name: spec.name,
            destination: spec.destination,
            dependencies: spec.dependencies,
            timeout: spec.timeout,
            body: TaskBody::Simple {
                make_message: spec.make_message,
                behavior: spec.behavior,
            },
            state: TaskState::Unstarted,
            expected_delivery_id: None,
            expected_correlation_id: None,
        }
    }

    pub fn new_composite(
        index: u32,
        name: String,
        destination: Destination,
        dependencies: BTreeSet<u32>,
        timeout: Option<Duration>,
        composite: Box<dyn CompositeTask>,
    ) -> Self {
        Self {
            index,
            name,
            destination,
            dependencies,
            timeout,
            body: TaskBody::Composite(composite),
            state: TaskState::Unstarted,
            expected_delivery_id: None,
            expected_correlation_id: None,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, TaskBody::Composite(_))
    }

    /// Unwrap a frozen `Task` back into a `TaskBuilder`, so a `Task` built
    /// standalone (e.g. `quorum::build_quorum_task`) can be handed to
    /// `Orchestrator::new` alongside tasks built directly as `TaskBuilder`s.
    pub fn into_builder(self) -> crate::orchestrator::TaskBuilder {
        crate::orchestrator::TaskBuilder {
            name: self.name,
            destination: self.destination,
            dependencies: self.dependencies,
            timeout: self.timeout,
            body: self.body,
        }
    }
}
