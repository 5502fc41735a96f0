//! The quorum composite task (`spec.md` §4.4, C4): N inner tasks voting
//! against distinct destinations, with a configurable threshold and an
//! early-abort rule when the threshold becomes unreachable.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tasker_orchestrator_shared::{
    AbortCause, CorrelationId, DeliveryPrimitive, Destination, OrchestratorError, OrchestratorResult,
    PersistenceStore, Settings,
};

use crate::orchestrator::{NoopHooks, Orchestrator, OrchestratorHooks, TaskBuilder};
use crate::task::{CompositeTask, MakeMessage, Reply, Task, TaskAction, TaskBody, TaskState};

/// How many matching votes are required to finish a quorum task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimumVotes {
    Majority,
    All,
    AtLeast(u32),
}

impl MinimumVotes {
    /// Resolve against `n` inner tasks, validating it is achievable at all.
    fn threshold(self, n: u32) -> OrchestratorResult<u32> {
        if n == 0 {
            return Err(OrchestratorError::IllegalArgument(
                "a quorum task needs at least one inner destination".to_string(),
            ));
        }
        let k = match self {
            MinimumVotes::Majority => n / 2 + 1,
            MinimumVotes::All => n,
            // spec.md 4.4: AtLeast(k) = min(k, N) - a k larger than N clamps
            // down to N (behaving like All) rather than being rejected.
            MinimumVotes::AtLeast(k) => k.min(n),
        };
        if k == 0 {
            return Err(OrchestratorError::IllegalArgument(format!(
                "quorum threshold {k} is not achievable with {n} inner tasks"
            )));
        }
        Ok(k)
    }
}

#[derive(Debug, Default)]
struct VoteTally {
    /// Linear-scan buckets: `serde_json::Value` is not `Hash`, and quorum
    /// fan-out widths are small enough that this is the simplest correct
    /// structure (spec.md 4.4).
    votes: Vec<(Value, u32)>,
    finished: u32,
    aborted: u32,
}

#[derive(Debug)]
struct QuorumHooks {
    tally: Mutex<VoteTally>,
}

impl OrchestratorHooks for QuorumHooks {
    fn on_task_finish(&self, task: &Task) {
        let mut tally = self.tally.lock().expect("quorum tally mutex poisoned");
        tally.finished += 1;
        if let TaskState::Finished(value) = task.state() {
            match tally.votes.iter_mut().find(|(v, _)| v == value) {
                Some(bucket) => bucket.1 += 1,
                None => tally.votes.push((value.clone(), 1)),
            }
        }
    }

    fn on_task_abort(&self, _task: &Task, _cause: &AbortCause) {
        let mut tally = self.tally.lock().expect("quorum tally mutex poisoned");
        tally.aborted += 1;
    }
}

/// A quorum composite task: fans the same outbound message out to N
/// distinct destinations via a private inner orchestrator, and resolves once
/// enough inner tasks agree on a value (or agreement becomes impossible).
pub struct QuorumTask {
    inner: Orchestrator,
    n: u32,
    threshold: u32,
    /// `n - threshold`: the maximum number of inner tasks that may abort or
    /// fail to vote before the quorum becomes unreachable (`spec.md` 4.4).
    tolerance: u32,
    hooks: Arc<QuorumHooks>,
}

impl fmt::Debug for QuorumTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuorumTask")
            .field("n", &self.n)
            .field("threshold", &self.threshold)
            .field("tolerance", &self.tolerance)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Construction parameters for a quorum task. All N inner tasks share
/// `make_message` verbatim, so the well-formedness requirement that every
/// inner task send an identical outbound message (W2) holds by
/// construction rather than by a runtime check.
pub struct QuorumSpec {
    pub destinations: Vec<Destination>,
    pub make_message: MakeMessage,
    pub minimum: MinimumVotes,
    pub timeout: Option<Duration>,
}

impl QuorumTask {
    /// Construct a quorum task on its own, without wrapping it in a `Task`.
    /// `build_quorum_task` is the usual entry point; this is exposed mainly
    /// so tests can drive the inner orchestrator directly.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: QuorumSpec,
        distinct_ids: bool,
        delivery: Arc<dyn DeliveryPrimitive>,
        persistence: Arc<dyn PersistenceStore>,
        settings: Settings,
        inner_name: String,
    ) -> OrchestratorResult<Self> {
        let mut seen = HashSet::new();
        for destination in &spec.destinations {
            if !seen.insert(destination.clone()) {
                return Err(OrchestratorError::IllegalArgument(format!(
                    "quorum task destinations must be pairwise distinct, got a repeat of {destination}"
                )));
            }
        }

        let n = spec.destinations.len() as u32;
        let threshold = spec.minimum.threshold(n)?;
        let tolerance = n - threshold;

        let builders: Vec<TaskBuilder> = spec
            .destinations
            .into_iter()
            .enumerate()
            .map(|(i, destination)| TaskBuilder {
                name: format!("vote-{i}"),
                destination,
                dependencies: BTreeSet::new(),
                timeout: spec.timeout,
                body: TaskBody::Simple {
                    make_message: spec.make_message.clone(),
                    behavior: Arc::new(vote_behavior),
                },
            })
            .collect();

        let hooks = Arc::new(QuorumHooks {
            tally: Mutex::new(VoteTally::default()),
        });
        let inner = Orchestrator::new(
            inner_name,
            builders,
            distinct_ids,
            delivery,
            persistence,
            settings,
            hooks.clone() as Arc<dyn OrchestratorHooks>,
        );

        Ok(QuorumTask { inner, n, threshold, tolerance, hooks })
    }

    /// Fire a timeout on one specific inner voter - used by tests; in
    /// production this primitive would be driven by the same wall-clock
    /// timer scheduling that drives `Orchestrator::fire_timeout` at the
    /// outer level (see DESIGN.md).
    pub async fn fire_inner_timeout(&mut self, inner_index: u32) -> OrchestratorResult<()> {
        self.inner.fire_timeout(inner_index).await
    }
}

/// Build a `Task` whose body is a quorum composite, per `spec.md` §4.4.
///
/// Fails with `IllegalArgument` if the destinations are not pairwise
/// distinct (W1) or the requested threshold resolves to 0 (an `AtLeast(k)`
/// above N clamps down to N rather than failing - `spec.md` 4.4).
#[allow(clippy::too_many_arguments)]
pub fn build_quorum_task(
    index: u32,
    name: impl Into<String>,
    spec: QuorumSpec,
    distinct_ids: bool,
    delivery: Arc<dyn DeliveryPrimitive>,
    persistence: Arc<dyn PersistenceStore>,
    settings: Settings,
    inner_name: String,
) -> OrchestratorResult<Task> {
    let timeout = spec.timeout;
    let quorum = QuorumTask::new(spec, distinct_ids, delivery, persistence, settings, inner_name)?;
    let name = name.into();
    let label = Destination::new(format!("quorum:{name}"));
    Ok(Task::new_composite(index, name, label, BTreeSet::new(), timeout, Box::new(quorum)))
}

fn vote_behavior(reply: Reply) -> TaskAction {
    match reply {
        Reply::Message(value) => TaskAction::Finish(value),
        Reply::Timeout => TaskAction::Abort(AbortCause::TimeoutError),
    }
}

impl QuorumTask {
    fn compute_decision(&self) -> Option<TaskAction> {
        let tally = self.hooks.tally.lock().expect("quorum tally mutex poisoned");
        let remaining = self.n - tally.finished - tally.aborted;

        // (a) some value already has enough matching votes.
        if let Some((value, _)) = tally.votes.iter().find(|(_, count)| *count >= self.threshold) {
            return Some(TaskAction::Finish(value.clone()));
        }

        // (b) too many inner tasks have already aborted for the quorum to
        // remain achievable, regardless of how the rest vote.
        if tally.aborted > self.tolerance {
            return Some(TaskAction::Abort(AbortCause::QuorumImpossibleToAchieve));
        }

        // (c) even if every still-waiting inner task voted for the current
        // front-runner, it still couldn't reach the threshold: abort early
        // rather than waiting out tasks that can no longer matter.
        let max_bucket = tally.votes.iter().map(|(_, count)| *count).max().unwrap_or(0);
        if max_bucket + remaining < self.threshold {
            return Some(TaskAction::Abort(AbortCause::QuorumNotAchieved));
        }

        // (d) undecided: keep waiting.
        None
    }
}

#[async_trait]
impl CompositeTask for QuorumTask {
    async fn start(&mut self) {
        // Ties are broken by arrival order: this is the initial start, so
        // `start_id` only needs to be unique for this inner orchestrator.
        let _ = self.inner.start(0).await;
    }

    async fn try_deliver(&mut self, destination: &Destination, correlation_id: CorrelationId, message: Value) -> bool {
        self.inner
            .deliver_reply(Some(destination), correlation_id, message)
            .await
            .unwrap_or(false)
    }

    async fn cancel(&mut self) {
        let _ = self.inner.timeout_tasks().await;
    }

    fn decision(&self) -> Option<TaskAction> {
        self.compute_decision()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::orchestrator::{NoopHooks, Orchestrator, Termination};
    use crate::test_util::{InMemoryDelivery, InMemoryLog};
    use tasker_orchestrator_shared::CorrelationId;

    use super::*;

    fn quorum_harness(n: usize, minimum: MinimumVotes) -> (Orchestrator, Arc<InMemoryDelivery>, Vec<Destination>) {
        let destinations: Vec<Destination> = (0..n).map(|i| Destination::new(format!("voter-{i}"))).collect();
        let delivery = Arc::new(InMemoryDelivery::new());
        let persistence = Arc::new(InMemoryLog::new());
        let quorum = build_quorum_task(
            0,
            "q",
            QuorumSpec {
                destinations: destinations.clone(),
                make_message: Arc::new(|c| serde_json::json!({ "correlation_id": c.0 })),
                minimum,
                timeout: Some(Duration::from_secs(1)),
            },
            false,
            delivery.clone(),
            persistence.clone(),
            Settings::default(),
            "q/inner".to_string(),
        )
        .unwrap();

        let orchestrator = Orchestrator::new(
            "outer",
            vec![quorum_into_builder(quorum)],
            false,
            delivery.clone(),
            persistence,
            Settings::default(),
            Arc::new(NoopHooks),
        );
        (orchestrator, delivery, destinations)
    }

    // `Orchestrator::new` takes `TaskBuilder`s, but `build_quorum_task`
    // already returns a frozen `Task` with a composite body - unwrap it
    // back into a builder so the test harness can reuse the same
    // constructor as every other test in this crate.
    fn quorum_into_builder(task: Task) -> TaskBuilder {
        TaskBuilder {
            name: task.name,
            destination: task.destination,
            dependencies: task.dependencies,
            timeout: task.timeout,
            body: task.body,
        }
    }

    #[tokio::test]
    async fn majority_finishes_once_enough_votes_agree() {
        let (mut orch, delivery, destinations) = quorum_harness(3, MinimumVotes::Majority);
        orch.start(1).await.unwrap();

        for destination in &destinations[..2] {
            let (delivery_id, _) = delivery.last_sent_to(destination).unwrap();
            orch.deliver_reply(Some(destination), CorrelationId(delivery_id.0), serde_json::json!("yes"))
                .await
                .unwrap();
        }

        assert!(matches!(orch.termination(), Some(Termination::Success)));
        let report = orch.status().report_for(0).unwrap().clone();
        assert_eq!(report.result, Some(serde_json::json!("yes")));
    }

    #[tokio::test]
    async fn all_required_aborts_as_impossible_once_a_single_vote_is_lost() {
        let destinations: Vec<Destination> = (0..3).map(|i| Destination::new(format!("voter-{i}"))).collect();
        let mut quorum = QuorumTask::new(
            QuorumSpec {
                destinations,
                make_message: Arc::new(|c| serde_json::json!({ "correlation_id": c.0 })),
                minimum: MinimumVotes::All,
                timeout: Some(Duration::from_secs(1)),
            },
            false,
            Arc::new(InMemoryDelivery::new()),
            Arc::new(InMemoryLog::new()),
            Settings::default(),
            "q/inner".to_string(),
        )
        .unwrap();

        quorum.start().await;
        // The first voter times out: with 2 remaining and 0 matching votes,
        // even unanimous agreement among the rest can't reach threshold 3.
        quorum.fire_inner_timeout(0).await.unwrap();

        match quorum.decision() {
            Some(TaskAction::Abort(cause)) => assert_eq!(cause, AbortCause::QuorumImpossibleToAchieve),
            other => panic!("expected QuorumImpossibleToAchieve, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disagreement_without_majority_is_quorum_not_achieved() {
        let (mut orch, delivery, destinations) = quorum_harness(3, MinimumVotes::AtLeast(2));

        orch.start(1).await.unwrap();
        for (i, destination) in destinations.iter().enumerate() {
            let (delivery_id, _) = delivery.last_sent_to(destination).unwrap();
            let vote = if i == 0 { "a" } else if i == 1 { "b" } else { "c" };
            orch.deliver_reply(Some(destination), CorrelationId(delivery_id.0), serde_json::json!(vote))
                .await
                .unwrap();
        }

        match orch.termination() {
            Some(Termination::Aborted { cause, .. }) => assert_eq!(*cause, AbortCause::QuorumNotAchieved),
            other => panic!("expected QuorumNotAchieved, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_destinations_are_rejected_at_construction() {
        let dest = Destination::new("only-one");
        let err = build_quorum_task(
            0,
            "q",
            QuorumSpec {
                destinations: vec![dest.clone(), dest],
                make_message: Arc::new(|c| serde_json::json!({ "correlation_id": c.0 })),
                minimum: MinimumVotes::Majority,
                timeout: None,
            },
            false,
            Arc::new(InMemoryDelivery::new()),
            Arc::new(InMemoryLog::new()),
            Settings::default(),
            "q/inner".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalArgument(_)));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = MinimumVotes::AtLeast(0).threshold(3).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalArgument(_)));
    }

    #[test]
    fn at_least_above_n_clamps_to_n_instead_of_erroring() {
        assert_eq!(MinimumVotes::AtLeast(10).threshold(3).unwrap(), 3);
    }
}
