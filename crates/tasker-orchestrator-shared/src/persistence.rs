//! The event taxonomy (`spec.md` §4.6, C6) and the persistent log store,
//! treated as an external collaborator: only its interface matters here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a waiting task was handed: a real reply, or the synthetic timeout
/// sentinel delivered when its timeout fires before any reply matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyPayload {
    Message(Value),
    Timeout,
}

/// The exactly-these-events taxonomy from `spec.md` §4.6.
///
/// `SnapshotOffer` carries an opaque `Value` rather than a concrete
/// orchestrator-state type: this crate does not depend on
/// `tasker-orchestrator-core`, so the core crate serializes its own
/// snapshot struct into `Value` before handing it to `persist`/
/// `save_snapshot`, and deserializes it back out of `ReplayItem::Snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// At most one per orchestrator, persisted by `StartOrchestrator`.
    StartOrchestrator { start_id: u64 },
    /// Emitted by `Task::start()`.
    MessageSent { task_index: u32 },
    /// Emitted by reply dispatch, including the synthetic `Timeout` case
    /// when a timeout fires on a behavior that handles it.
    MessageReceived {
        task_index: u32,
        message: ReplyPayload,
    },
    /// Recommended (and, per `Settings::persist_task_timed_out_events`,
    /// default-on) so recovery does not depend on wall-clock time: see
    /// `spec.md` §9's open question.
    TaskTimedOut { task_index: u32 },
    /// Written by `SaveSnapshot`.
    SnapshotOffer { state: Value },
}

/// One item from a replay stream: a snapshot offer (at most once, first),
/// followed by events in persisted order.
#[derive(Debug, Clone)]
pub enum ReplayItem {
    Snapshot(Value),
    Event(OrchestratorEvent),
}

/// The persistent event-log store, treated as an external collaborator.
///
/// Implementations must replay in the order `persist` was called - this is
/// what makes recovery deterministic (I6, P1).
#[async_trait]
pub trait PersistenceStore: Send + Sync + std::fmt::Debug {
    /// Append `event` to the log. Must not return until the event is
    /// durable, since the engine relies on "persist-then-act" ordering.
    async fn persist(&self, event: OrchestratorEvent);

    /// Write a full snapshot of orchestrator state, superseding the need to
    /// replay everything before it on the next recovery.
    async fn save_snapshot(&self, state: Value);

    /// Replay the full log: an optional snapshot offer first, then every
    /// event persisted since (or from the beginning, if no snapshot was
    /// ever saved), in persisted order.
    async fn replay(&self) -> Vec<ReplayItem>;
}
