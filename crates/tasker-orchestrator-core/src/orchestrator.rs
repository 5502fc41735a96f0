//! The orchestrator core (`spec.md` §4.3, C3): task vector, scheduling
//! queues, event persistence, start/recovery protocol, termination.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tasker_orchestrator_shared::persistence::ReplyPayload as ReplyEvent;
use tasker_orchestrator_shared::{
    AbortCause, CorrelationId, DeliveryId, DeliveryPrimitive, Destination, OrchestratorError,
    OrchestratorEvent, OrchestratorResult, PersistenceStore, ReplayItem, Settings,
};

use crate::identifiers::CorrelationScheme;
use crate::report::{Report, ReportedState, StatusResponse};
use crate::task::{Reply, Task, TaskAction, TaskBody, TaskState};

/// Extension hooks an embedding component (chiefly `quorum::QuorumTask`) can
/// observe without being able to override the base invariant-preserving
/// transitions - see `spec.md` §9's open question on `on_abort` overrides.
/// Hooks are additive observers, never a replacement for the default
/// dispatch, so invariant I2 always holds regardless of what a hook does.
pub trait OrchestratorHooks: Send + Sync + fmt::Debug {
    fn on_task_finish(&self, _task: &Task) {}
    fn on_task_abort(&self, _task: &Task, _cause: &AbortCause) {}
    fn on_finish(&self) {}
}

#[derive(Debug, Default)]
pub struct NoopHooks;
impl OrchestratorHooks for NoopHooks {}

/// How an orchestrator run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Success,
    Aborted {
        instigator: Report,
        cause: AbortCause,
        start_id: u64,
    },
}

/// Construction-time description of one task, before it is frozen into the
/// task vector.
pub struct TaskBuilder {
    pub name: String,
    pub destination: Destination,
    pub dependencies: BTreeSet<u32>,
    pub timeout: Option<std::time::Duration>,
    pub body: TaskBody,
}

/// The dependency-graph execution engine.
pub struct Orchestrator {
    pub(crate) name: String,
    pub(crate) tasks: Vec<Task>,
    pub(crate) unstarted: BTreeSet<u32>,
    pub(crate) waiting: BTreeSet<u32>,
    pub(crate) finished_count: u32,
    pub(crate) aborted_count: u32,
    pub(crate) start_id: Option<u64>,
    pub(crate) inner_orchestrator_counter: u32,
    pub(crate) correlation: CorrelationScheme,
    pub(crate) delivery: Arc<dyn DeliveryPrimitive>,
    pub(crate) persistence: Arc<dyn PersistenceStore>,
    pub(crate) settings: Settings,
    pub(crate) messages_since_snapshot: u32,
    pub(crate) termination: Option<Termination>,
    pub(crate) hooks: Arc<dyn OrchestratorHooks>,
    pub(crate) replaying: bool,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.name)
            .field("task_count", &self.tasks.len())
            .field("unstarted", &self.unstarted)
            .field("waiting", &self.waiting)
            .field("finished_count", &self.finished_count)
            .field("aborted_count", &self.aborted_count)
            .field("termination", &self.termination)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        name: impl Into<String>,
        builders: Vec<TaskBuilder>,
        distinct_ids: bool,
        delivery: Arc<dyn DeliveryPrimitive>,
        persistence: Arc<dyn PersistenceStore>,
        settings: Settings,
        hooks: Arc<dyn OrchestratorHooks>,
    ) -> Self {
        let tasks: Vec<Task> = builders
            .into_iter()
            .enumerate()
            .map(|(i, b)| Task {
                index: i as u32,
                name: b.name,
                destination: b.destination,
                dependencies: b.dependencies,
                timeout: b.timeout,
                body: b.body,
                state: TaskState::Unstarted,
                expected_delivery_id: None,
                expected_correlation_id: None,
            })
            .collect();
        let unstarted = tasks.iter().map(|t| t.index).collect();
        Self {
            name: name.into(),
            tasks,
            unstarted,
            waiting: BTreeSet::new(),
            finished_count: 0,
            aborted_count: 0,
            start_id: None,
            inner_orchestrator_counter: 0,
            correlation: if distinct_ids {
                CorrelationScheme::distinct()
            } else {
                CorrelationScheme::Shared
            },
            delivery,
            persistence,
            settings,
            messages_since_snapshot: 0,
            termination: None,
            hooks,
            replaying: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.termination.is_some()
    }

    /// Allocate a unique name for a child (inner) orchestrator spawned by a
    /// composite task, per `spec.md` §9.
    pub fn next_inner_orchestrator_name(&mut self) -> String {
        let n = self.inner_orchestrator_counter;
        self.inner_orchestrator_counter += 1;
        format!("{}/inner-{n}", self.name)
    }

    // ---- StartOrchestrator ----------------------------------------------

    pub async fn start(&mut self, start_id: u64) -> OrchestratorResult<()> {
        if self.start_id.is_some() {
            return Err(OrchestratorError::AlreadyStarted);
        }
        if !self.replaying {
            self.persistence
                .persist(OrchestratorEvent::StartOrchestrator { start_id })
                .await;
        }
        self.start_id = Some(start_id);

        if self.tasks.is_empty() {
            self.termination = Some(Termination::Success);
            self.hooks.on_finish();
            return Ok(());
        }

        self.start_newly_enabled_tasks().await
    }

    // ---- Status / SaveSnapshot / Shutdown --------------------------------

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            reports: self.tasks.iter().map(|t| self.report_for(t.index)).collect(),
        }
    }

    pub async fn save_snapshot(&mut self) {
        let snapshot = self.to_snapshot();
        let value = serde_json::to_value(&snapshot).expect("orchestrator snapshot is always serializable");
        self.persistence.save_snapshot(value).await;
        self.messages_since_snapshot = 0;
    }

    pub fn shutdown(&mut self) {
        self.termination.get_or_insert(Termination::Success);
    }

    /// `TimeoutTasks`: fires a timeout on every currently-waiting task. Used
    /// internally by composite tasks to cancel their inner orchestrator
    /// (`spec.md` §4.4/§5).
    pub async fn timeout_tasks(&mut self) -> OrchestratorResult<()> {
        let waiting: Vec<u32> = self.waiting.iter().copied().collect();
        for idx in waiting {
            self.handle_timeout(idx).await?;
        }
        Ok(())
    }

    pub async fn fire_timeout(&mut self, index: u32) -> OrchestratorResult<()> {
        self.handle_timeout(index).await
    }

    // ---- Reply dispatch ---------------------------------------------------

    /// Deliver an incoming reply. `sender` is `None` only from replay paths
    /// that have no real sender to compare against (`spec.md` §4.1). Returns
    /// whether some task actually matched and consumed the reply.
    pub async fn deliver_reply(
        &mut self,
        sender: Option<&Destination>,
        correlation_id: CorrelationId,
        message: Value,
    ) -> OrchestratorResult<bool> {
        if self.is_stopped() {
            tracing::warn!(
                orchestrator = %self.name,
                %correlation_id,
                "orchestrator has stopped; reply can no longer be matched"
            );
            return Ok(false);
        }

        let check_sender = !self.replaying;
        let mut matched_simple: Option<u32> = None;
        for &idx in self.waiting.iter() {
            let task = &self.tasks[idx as usize];
            if task.is_composite() {
                continue;
            }
            if self.correlation.matches(task, sender, correlation_id, check_sender) {
                matched_simple = Some(idx);
                break;
            }
        }
        if let Some(idx) = matched_simple {
            self.on_reply(idx, Reply::Message(message)).await?;
            return Ok(true);
        }

        let Some(sender) = sender else {
            tracing::warn!(orchestrator = %self.name, %correlation_id, "reply with no sender cannot match a composite task");
            return Ok(false);
        };
        let composite_indices: Vec<u32> = self
            .waiting
            .iter()
            .copied()
            .filter(|&i| self.tasks[i as usize].is_composite())
            .collect();
        for idx in composite_indices {
            let consumed = if let TaskBody::Composite(inner) = &mut self.tasks[idx as usize].body {
                inner.try_deliver(sender, correlation_id, message.clone()).await
            } else {
                false
            };
            if consumed {
                if let Some(action) = self.composite_decision(idx) {
                    // spec.md 4.4 rule (a): once a decision is reached,
                    // any inner tasks still waiting must be cancelled so
                    // they stop retransmitting and no further vote can
                    // influence an already-settled outcome.
                    self.cancel_composite(idx).await;
                    self.resolve_task(idx, action).await?;
                }
                return Ok(true);
            }
        }

        tracing::warn!(
            orchestrator = %self.name,
            %correlation_id,
            "reply matched no waiting task, dropping"
        );
        Ok(false)
    }

    async fn on_reply(&mut self, idx: u32, reply: Reply) -> OrchestratorResult<()> {
        if !self.replaying {
            self.persistence
                .persist(OrchestratorEvent::MessageReceived {
                    task_index: idx,
                    message: reply.clone(),
                })
                .await;
        }
        self.confirm_delivery(idx).await;

        let action = {
            let task = &self.tasks[idx as usize];
            match &task.body {
                TaskBody::Simple { behavior, .. } => behavior(reply),
                TaskBody::Composite(_) => unreachable!("composite tasks resolve via deliver_reply/decision"),
            }
        };

        match action {
            TaskAction::Ignore => Ok(()),
            other => self.resolve_task(idx, other).await,
        }
    }

    async fn handle_timeout(&mut self, idx: u32) -> OrchestratorResult<()> {
        if !self.waiting.contains(&idx) {
            return Ok(());
        }

        if self.tasks[idx as usize].is_composite() {
            if let TaskBody::Composite(inner) = &mut self.tasks[idx as usize].body {
                inner.cancel().await;
            }
            if let Some(action) = self.composite_decision(idx) {
                return self.resolve_task(idx, action).await;
            }
            return Ok(());
        }

        let action = {
            let task = &self.tasks[idx as usize];
            match &task.body {
                TaskBody::Simple { behavior, .. } => behavior(Reply::Timeout),
                TaskBody::Composite(_) => unreachable!(),
            }
        };

        match action {
            TaskAction::Finish(value) => {
                if !self.replaying {
                    self.persistence
                        .persist(OrchestratorEvent::MessageReceived {
                            task_index: idx,
                            message: ReplyEvent::Timeout,
                        })
                        .await;
                }
                self.confirm_delivery(idx).await;
                self.resolve_task(idx, TaskAction::Finish(value)).await
            }
            TaskAction::Abort(cause) => {
                self.persist_timed_out(idx).await;
                self.confirm_delivery(idx).await;
                self.resolve_task(idx, TaskAction::Abort(cause)).await
            }
            TaskAction::Ignore => {
                // The behavior had no case for `Timeout`: per spec.md 4.2
                // this is an unhandled timeout, i.e. TimeoutError.
                self.persist_timed_out(idx).await;
                self.confirm_delivery(idx).await;
                self.resolve_task(idx, TaskAction::Abort(AbortCause::TimeoutError)).await
            }
        }
    }

    async fn persist_timed_out(&mut self, idx: u32) {
        if !self.replaying && self.settings.persist_task_timed_out_events {
            self.persistence
                .persist(OrchestratorEvent::TaskTimedOut { task_index: idx })
                .await;
        }
    }

    async fn confirm_delivery(&mut self, idx: u32) {
        if let Some(delivery_id) = self.tasks[idx as usize].expected_delivery_id {
            self.delivery.confirm(delivery_id).await;
        }
    }

    fn composite_decision(&self, idx: u32) -> Option<TaskAction> {
        match &self.tasks[idx as usize].body {
            TaskBody::Composite(inner) => inner.decision(),
            TaskBody::Simple { .. } => None,
        }
    }

    /// Cancel a composite task's inner orchestrator (`TimeoutTasks`,
    /// `spec.md` §4.4 rule a / §5): fires once a decision has been reached
    /// so any inner tasks still waiting stop retransmitting rather than
    /// being abandoned mid-flight.
    async fn cancel_composite(&mut self, idx: u32) {
        if let TaskBody::Composite(inner) = &mut self.tasks[idx as usize].body {
            inner.cancel().await;
        }
    }

    async fn resolve_task(&mut self, idx: u32, action: TaskAction) -> OrchestratorResult<()> {
        self.waiting.remove(&idx);
        match action {
            TaskAction::Finish(value) => {
                self.tasks[idx as usize].state = TaskState::Finished(value);
                self.tasks[idx as usize].expected_delivery_id = None;
                self.tasks[idx as usize].expected_correlation_id = None;
                self.finished_count += 1;
                self.hooks.on_task_finish(&self.tasks[idx as usize]);
                self.start_newly_enabled_tasks().await?;
                if self.termination.is_none() && self.finished_count as usize == self.tasks.len() {
                    self.termination = Some(Termination::Success);
                    self.hooks.on_finish();
                }
            }
            TaskAction::Abort(cause) => {
                self.tasks[idx as usize].state = TaskState::Aborted(cause.clone());
                self.tasks[idx as usize].expected_delivery_id = None;
                self.tasks[idx as usize].expected_correlation_id = None;
                self.aborted_count += 1;
                let was_instigator = self.termination.is_none();
                self.hooks.on_task_abort(&self.tasks[idx as usize], &cause);
                if was_instigator {
                    let instigator = self.report_for(idx);
                    self.termination = Some(Termination::Aborted {
                        instigator,
                        cause,
                        start_id: self.start_id.unwrap_or_default(),
                    });
                }
            }
            TaskAction::Ignore => unreachable!("Ignore never reaches resolve_task"),
        }
        self.maybe_snapshot().await;
        Ok(())
    }

    async fn start_newly_enabled_tasks(&mut self) -> OrchestratorResult<()> {
        // BTreeSet<u32> iterates ascending: this is what keeps start order
        // task-index deterministic across replays (P5).
        let candidates: Vec<u32> = self.unstarted.iter().copied().collect();
        for idx in candidates {
            if self.all_dependencies_finished(idx) {
                self.start_task(idx).await?;
            }
        }
        Ok(())
    }

    fn all_dependencies_finished(&self, idx: u32) -> bool {
        self.tasks[idx as usize]
            .dependencies
            .iter()
            .all(|d| self.tasks[*d as usize].state().is_finished())
    }

    async fn start_task(&mut self, idx: u32) -> OrchestratorResult<()> {
        let destination = self.tasks[idx as usize].destination.clone();
        let is_composite = self.tasks[idx as usize].is_composite();

        if is_composite {
            if let TaskBody::Composite(inner) = &mut self.tasks[idx as usize].body {
                inner.start().await;
            }
        } else {
            let delivery_id = self.delivery.next_delivery_id(&destination).await;
            let correlation_id = self.correlation.delivery_to_correlation(&destination, delivery_id);
            let message = match &self.tasks[idx as usize].body {
                TaskBody::Simple { make_message, .. } => make_message(correlation_id),
                TaskBody::Composite(_) => unreachable!(),
            };
            self.delivery.send(&destination, delivery_id, message).await;
            let task = &mut self.tasks[idx as usize];
            task.expected_delivery_id = Some(delivery_id);
            task.expected_correlation_id = Some(correlation_id);
        }

        self.tasks[idx as usize].state = TaskState::Waiting;
        self.unstarted.remove(&idx);
        self.waiting.insert(idx);

        if !self.replaying {
            self.persistence
                .persist(OrchestratorEvent::MessageSent { task_index: idx })
                .await;
        }
        self.maybe_snapshot().await;

        // A zero-inner-task composite (or one that resolves synchronously
        // inside `start`) can already have a decision the moment it starts.
        if is_composite {
            if let Some(action) = self.composite_decision(idx) {
                self.cancel_composite(idx).await;
                self.resolve_task(idx, action).await?;
            }
        }
        Ok(())
    }

    async fn maybe_snapshot(&mut self) {
        if self.replaying {
            return;
        }
        if self.settings.save_snapshot_roughly_every_x_messages == 0 {
            return;
        }
        self.messages_since_snapshot += 1;
        if self.messages_since_snapshot >= self.settings.save_snapshot_roughly_every_x_messages {
            self.save_snapshot().await;
        }
    }

    fn report_for(&self, idx: u32) -> Report {
        let task = &self.tasks[idx as usize];
        let (state, result) = match task.state() {
            TaskState::Unstarted => (ReportedState::Unstarted, None),
            TaskState::Waiting => (ReportedState::Waiting, None),
            TaskState::Finished(v) => (ReportedState::Finished, Some(v.clone())),
            TaskState::Aborted(c) => (ReportedState::Aborted(c.clone()), None),
        };
        Report {
            index: task.index,
            name: task.name.clone(),
            dependencies: task.dependencies.iter().copied().collect(),
            state,
            destination: Some(task.destination.clone()),
            result,
        }
    }

    // ---- Recovery ----------------------------------------------------------

    fn to_snapshot(&self) -> OrchestratorSnapshot {
        let tasks = self
            .tasks
            .iter()
            .filter(|t| !t.is_composite())
            .map(|t| TaskSnapshot {
                index: t.index,
                state: match t.state() {
                    TaskState::Unstarted => TaskSnapshotState::Unstarted,
                    TaskState::Waiting => TaskSnapshotState::Waiting,
                    TaskState::Finished(v) => TaskSnapshotState::Finished(v.clone()),
                    TaskState::Aborted(c) => TaskSnapshotState::Aborted(c.clone()),
                },
                expected_delivery_id: t.expected_delivery_id,
                expected_correlation_id: t.expected_correlation_id,
            })
            .collect();
        OrchestratorSnapshot {
            start_id: self.start_id,
            inner_orchestrator_counter: self.inner_orchestrator_counter,
            finished_count: self.finished_count,
            aborted_count: self.aborted_count,
            correlation: self.correlation.clone(),
            tasks,
        }
    }

    fn restore_snapshot(&mut self, snapshot: OrchestratorSnapshot) {
        self.start_id = snapshot.start_id;
        self.inner_orchestrator_counter = snapshot.inner_orchestrator_counter;
        self.finished_count = snapshot.finished_count;
        self.aborted_count = snapshot.aborted_count;
        self.correlation = snapshot.correlation;
        for ts in snapshot.tasks {
            let task = &mut self.tasks[ts.index as usize];
            task.expected_delivery_id = ts.expected_delivery_id;
            task.expected_correlation_id = ts.expected_correlation_id;
            match ts.state {
                TaskSnapshotState::Unstarted => {}
                TaskSnapshotState::Waiting => {
                    self.unstarted.remove(&ts.index);
                    self.waiting.insert(ts.index);
                    task.state = TaskState::Waiting;
                }
                TaskSnapshotState::Finished(v) => {
                    self.unstarted.remove(&ts.index);
                    self.waiting.remove(&ts.index);
                    task.state = TaskState::Finished(v);
                }
                TaskSnapshotState::Aborted(c) => {
                    self.unstarted.remove(&ts.index);
                    self.waiting.remove(&ts.index);
                    task.state = TaskState::Aborted(c);
                }
            }
        }
    }

    /// Recovery protocol (`spec.md` §4.3): offer the latest snapshot, if
    /// any, then replay events in persisted order. Must run before any
    /// external command is processed against a freshly-constructed (all
    /// `Unstarted`) task vector - composite tasks do not participate in
    /// snapshot restoration, they are simply restarted (see DESIGN.md).
    pub async fn recover(&mut self) -> OrchestratorResult<()> {
        self.replaying = true;
        let items = self.persistence.replay().await;
        for item in items {
            match item {
                ReplayItem::Snapshot(value) => {
                    let snapshot: OrchestratorSnapshot =
                        serde_json::from_value(value).map_err(|e| OrchestratorError::PersistenceFailure(e.to_string()))?;
                    self.restore_snapshot(snapshot);
                }
                ReplayItem::Event(event) => self.apply_event(event).await?,
            }
        }
        self.replaying = false;
        Ok(())
    }

    async fn apply_event(&mut self, event: OrchestratorEvent) -> OrchestratorResult<()> {
        match event {
            OrchestratorEvent::StartOrchestrator { start_id } => {
                self.start(start_id).await?;
            }
            OrchestratorEvent::MessageSent { task_index } => {
                // Idempotent: the delivery primitive de-dupes retransmits
                // via its own journal (spec.md 4.3).
                if self.unstarted.contains(&task_index) {
                    self.start_task(task_index).await?;
                }
            }
            OrchestratorEvent::MessageReceived { task_index, message } => match message {
                ReplyEvent::Message(value) => {
                    self.on_reply(task_index, Reply::Message(value)).await?;
                }
                ReplyEvent::Timeout => {
                    // Always the timeout dispatch path, never matchId -
                    // replayed events carry no real sender (spec.md 4.3).
                    self.handle_timeout(task_index).await?;
                }
            },
            OrchestratorEvent::TaskTimedOut { task_index } => {
                self.handle_timeout(task_index).await?;
            }
            OrchestratorEvent::SnapshotOffer { state } => {
                let snapshot: OrchestratorSnapshot =
                    serde_json::from_value(state).map_err(|e| OrchestratorError::PersistenceFailure(e.to_string()))?;
                self.restore_snapshot(snapshot);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskSnapshot {
    index: u32,
    state: TaskSnapshotState,
    expected_delivery_id: Option<DeliveryId>,
    expected_correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TaskSnapshotState {
    Unstarted,
    Waiting,
    Finished(Value),
    Aborted(AbortCause),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrchestratorSnapshot {
    start_id: Option<u64>,
    inner_orchestrator_counter: u32,
    finished_count: u32,
    aborted_count: u32,
    correlation: CorrelationScheme,
    tasks: Vec<TaskSnapshot>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::test_util::{InMemoryDelivery, InMemoryLog};

    use super::*;

    fn echo_task(index: u32, destination: &str, dependencies: BTreeSet<u32>) -> TaskBuilder {
        TaskBuilder {
            name: format!("task-{index}"),
            destination: Destination::new(destination),
            dependencies,
            timeout: None,
            body: TaskBody::Simple {
                make_message: Arc::new(|c| serde_json::json!({ "correlation_id": c.0 })),
                behavior: Arc::new(|reply| match reply {
                    Reply::Message(v) => TaskAction::Finish(v),
                    Reply::Timeout => TaskAction::Abort(AbortCause::TimeoutError),
                }),
            },
        }
    }

    fn new_harness(builders: Vec<TaskBuilder>) -> (Orchestrator, Arc<InMemoryDelivery>, Arc<InMemoryLog>) {
        let delivery = Arc::new(InMemoryDelivery::new());
        let persistence = Arc::new(InMemoryLog::new());
        let orchestrator = Orchestrator::new(
            "test",
            builders,
            false,
            delivery.clone(),
            persistence.clone(),
            Settings::default(),
            Arc::new(NoopHooks),
        );
        (orchestrator, delivery, persistence)
    }

    #[tokio::test]
    async fn dependent_task_starts_only_after_its_dependency_finishes() {
        let mut deps = BTreeSet::new();
        deps.insert(0);
        let (mut orch, delivery, _log) = new_harness(vec![echo_task(0, "a", BTreeSet::new()), echo_task(1, "b", deps)]);

        orch.start(1).await.unwrap();
        assert!(delivery.last_sent_to(&Destination::new("a")).is_some());
        assert!(delivery.last_sent_to(&Destination::new("b")).is_none());

        let (delivery_id, _) = delivery.last_sent_to(&Destination::new("a")).unwrap();
        orch.deliver_reply(Some(&Destination::new("a")), CorrelationId(delivery_id.0), serde_json::json!("ok"))
            .await
            .unwrap();

        assert!(delivery.last_sent_to(&Destination::new("b")).is_some());
        assert!(delivery.is_confirmed(delivery_id));
    }

    #[tokio::test]
    async fn unrelated_tasks_finish_independently() {
        let (mut orch, delivery, _log) = new_harness(vec![echo_task(0, "a", BTreeSet::new()), echo_task(1, "b", BTreeSet::new())]);
        orch.start(1).await.unwrap();

        for name in ["a", "b"] {
            let dest = Destination::new(name);
            let (delivery_id, _) = delivery.last_sent_to(&dest).unwrap();
            orch.deliver_reply(Some(&dest), CorrelationId(delivery_id.0), serde_json::json!("ok"))
                .await
                .unwrap();
        }

        assert!(matches!(orch.termination(), Some(Termination::Success)));
        assert!(orch.status().all_finished());
    }

    #[tokio::test]
    async fn unhandled_timeout_aborts_with_timeout_error() {
        let builder = TaskBuilder {
            name: "a".to_string(),
            destination: Destination::new("a"),
            dependencies: BTreeSet::new(),
            timeout: Some(std::time::Duration::from_millis(10)),
            body: TaskBody::Simple {
                make_message: Arc::new(|c| serde_json::json!({ "correlation_id": c.0 })),
                behavior: Arc::new(|reply| match reply {
                    Reply::Message(v) => TaskAction::Finish(v),
                    Reply::Timeout => TaskAction::Ignore,
                }),
            },
        };
        let (mut orch, _delivery, _log) = new_harness(vec![builder]);
        orch.start(1).await.unwrap();

        orch.fire_timeout(0).await.unwrap();

        match orch.termination() {
            Some(Termination::Aborted { cause, .. }) => assert_eq!(*cause, AbortCause::TimeoutError),
            other => panic!("expected TimeoutError abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovery_replays_to_the_same_state_as_the_live_run() {
        let mut deps = BTreeSet::new();
        deps.insert(0);
        let live_log = Arc::new(InMemoryLog::new());
        let delivery = Arc::new(InMemoryDelivery::new());

        let mut live = Orchestrator::new(
            "test",
            vec![echo_task(0, "a", BTreeSet::new()), echo_task(1, "b", deps.clone())],
            false,
            delivery.clone(),
            live_log.clone(),
            Settings::default(),
            Arc::new(NoopHooks),
        );
        live.start(1).await.unwrap();
        let (delivery_id, _) = delivery.last_sent_to(&Destination::new("a")).unwrap();
        live.deliver_reply(Some(&Destination::new("a")), CorrelationId(delivery_id.0), serde_json::json!("ok"))
            .await
            .unwrap();

        let restarted_log = live_log.clone_for_restart();
        let mut recovered = Orchestrator::new(
            "test",
            vec![echo_task(0, "a", BTreeSet::new()), echo_task(1, "b", deps)],
            false,
            delivery.clone(),
            Arc::new(restarted_log),
            Settings::default(),
            Arc::new(NoopHooks),
        );
        recovered.recover().await.unwrap();

        assert_eq!(recovered.status(), live.status());
    }
}
