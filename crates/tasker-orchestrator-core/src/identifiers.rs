//! The identifier layer (`spec.md` §4.1, C1): mapping between delivery ids
//! and correlation ids, and the `matchId` predicate.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tasker_orchestrator_shared::{CorrelationId, DeliveryId, Destination};

use crate::task::{Task, TaskState};

/// Per-destination correlation bookkeeping for `Distinct` mode: a strictly
/// increasing, gap-free sequence of `C` values per destination, each mapped
/// to the `D` that produced it (I5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistinctCorrelationState {
    pub(crate) per_destination: HashMap<Destination, BTreeMap<CorrelationId, DeliveryId>>,
    pub(crate) next_correlation: HashMap<Destination, u64>,
}

/// How correlation ids are derived from delivery ids, chosen per
/// orchestrator instance at construction (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CorrelationScheme {
    /// `C ≡ D`. No per-destination bookkeeping needed.
    Shared,
    /// `C` is a strictly increasing sequence per destination path, with a
    /// persisted bidirectional mapping back to `D`.
    Distinct(DistinctCorrelationState),
}

impl CorrelationScheme {
    pub fn distinct() -> Self {
        CorrelationScheme::Distinct(DistinctCorrelationState::default())
    }

    /// `delivery_to_correlation(dest, D) -> C`. Must be called exactly once
    /// per new outbound delivery.
    pub fn delivery_to_correlation(&mut self, destination: &Destination, delivery_id: DeliveryId) -> CorrelationId {
        match self {
            CorrelationScheme::Shared => CorrelationId(delivery_id.0),
            CorrelationScheme::Distinct(state) => {
                let next = state.next_correlation.entry(destination.clone()).or_insert(0);
                let correlation_id = CorrelationId(*next);
                *next += 1;
                state
                    .per_destination
                    .entry(destination.clone())
                    .or_default()
                    .insert(correlation_id, delivery_id);
                correlation_id
            }
        }
    }

    /// `correlation_to_delivery(dest, C) -> D | NotFound`.
    pub fn correlation_to_delivery(&self, destination: &Destination, correlation_id: CorrelationId) -> Option<DeliveryId> {
        match self {
            CorrelationScheme::Shared => Some(DeliveryId(correlation_id.0)),
            CorrelationScheme::Distinct(state) => state
                .per_destination
                .get(destination)
                .and_then(|map| map.get(&correlation_id))
                .copied(),
        }
    }

    /// `matchId(task, incoming_C)` (`spec.md` §4.1).
    ///
    /// `check_sender` is `false` during recovery replay, since replayed
    /// events carry no real sender to compare against (`spec.md` §4.1).
    pub fn matches(
        &self,
        task: &Task,
        sender: Option<&Destination>,
        incoming_correlation_id: CorrelationId,
        check_sender: bool,
    ) -> bool {
        if !matches!(task.state(), TaskState::Waiting) {
            return false;
        }
        let Some(expected_delivery_id) = task.expected_delivery_id else {
            return false;
        };

        match self {
            CorrelationScheme::Shared => expected_delivery_id == DeliveryId(incoming_correlation_id.0),
            CorrelationScheme::Distinct(_) => {
                let resolved = self.correlation_to_delivery(&task.destination, incoming_correlation_id);
                if resolved != Some(expected_delivery_id) {
                    return false;
                }
                if check_sender {
                    sender.is_some_and(|sender| sender == &task.destination)
                } else {
                    true
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_mode_correlation_is_the_delivery_id() {
        let mut scheme = CorrelationScheme::Shared;
        let dest = Destination::new("svc-a");
        let c = scheme.delivery_to_correlation(&dest, DeliveryId(42));
        assert_eq!(c, CorrelationId(42));
        assert_eq!(scheme.correlation_to_delivery(&dest, c), Some(DeliveryId(42)));
    }

    #[test]
    fn distinct_mode_sequence_is_gap_free_per_destination() {
        let mut scheme = CorrelationScheme::distinct();
        let a = Destination::new("svc-a");
        let b = Destination::new("svc-b");

        let c_a0 = scheme.delivery_to_correlation(&a, DeliveryId(100));
        let c_a1 = scheme.delivery_to_correlation(&a, DeliveryId(101));
        let c_b0 = scheme.delivery_to_correlation(&b, DeliveryId(102));

        assert_eq!(c_a0, CorrelationId(0));
        assert_eq!(c_a1, CorrelationId(1));
        assert_eq!(c_b0, CorrelationId(0));

        assert_eq!(scheme.correlation_to_delivery(&a, c_a0), Some(DeliveryId(100)));
        assert_eq!(scheme.correlation_to_delivery(&a, c_a1), Some(DeliveryId(101)));
        assert_eq!(scheme.correlation_to_delivery(&b, c_b0), Some(DeliveryId(102)));
    }

    #[test]
    fn distinct_mode_unknown_correlation_id_is_not_found() {
        let scheme = CorrelationScheme::distinct();
        let a = Destination::new("svc-a");
        assert_eq!(scheme.correlation_to_delivery(&a, CorrelationId(0)), None);
    }
}
