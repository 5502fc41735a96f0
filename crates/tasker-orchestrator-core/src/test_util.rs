//! In-memory `DeliveryPrimitive`/`PersistenceStore` doubles for tests: no
//! real retransmission or crash-safety, just enough bookkeeping to exercise
//! the orchestration engine deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use tasker_orchestrator_shared::{
    DeliveryId, DeliveryPrimitive, Destination, OrchestratorEvent, PersistenceStore, ReplayItem,
};

/// Records every send/confirm. Never actually retransmits - tests drive
/// timeouts and redelivery explicitly.
#[derive(Debug, Default)]
pub struct InMemoryDelivery {
    state: Mutex<InMemoryDeliveryState>,
}

#[derive(Debug, Default)]
struct InMemoryDeliveryState {
    next_per_destination: HashMap<Destination, u64>,
    sent: Vec<(Destination, DeliveryId, Value)>,
    confirmed: Vec<DeliveryId>,
}

impl InMemoryDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Destination, DeliveryId, Value)> {
        self.state.lock().expect("delivery mutex poisoned").sent.clone()
    }

    pub fn is_confirmed(&self, delivery_id: DeliveryId) -> bool {
        self.state.lock().expect("delivery mutex poisoned").confirmed.contains(&delivery_id)
    }

    pub fn last_sent_to(&self, destination: &Destination) -> Option<(DeliveryId, Value)> {
        self.state
            .lock()
            .expect("delivery mutex poisoned")
            .sent
            .iter()
            .rev()
            .find(|(d, ..)| d == destination)
            .map(|(_, id, msg)| (*id, msg.clone()))
    }
}

#[async_trait]
impl DeliveryPrimitive for InMemoryDelivery {
    async fn next_delivery_id(&self, destination: &Destination) -> DeliveryId {
        let mut state = self.state.lock().expect("delivery mutex poisoned");
        let next = state.next_per_destination.entry(destination.clone()).or_insert(0);
        let id = DeliveryId(*next);
        *next += 1;
        id
    }

    async fn send(&self, destination: &Destination, delivery_id: DeliveryId, message: Value) {
        self.state
            .lock()
            .expect("delivery mutex poisoned")
            .sent
            .push((destination.clone(), delivery_id, message));
    }

    async fn confirm(&self, delivery_id: DeliveryId) {
        self.state.lock().expect("delivery mutex poisoned").confirmed.push(delivery_id);
    }
}

/// Append-only in-memory event log with an optional latest snapshot.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    state: Mutex<InMemoryLogState>,
}

#[derive(Debug, Default)]
struct InMemoryLogState {
    snapshot: Option<Value>,
    events: Vec<OrchestratorEvent>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrchestratorEvent> {
        self.state.lock().expect("log mutex poisoned").events.clone()
    }

    /// Build a fresh log seeded with the same snapshot/events as `self`,
    /// simulating a durable store surviving a process restart.
    pub fn clone_for_restart(&self) -> Self {
        let state = self.state.lock().expect("log mutex poisoned");
        Self {
            state: Mutex::new(InMemoryLogState {
                snapshot: state.snapshot.clone(),
                events: state.events.clone(),
            }),
        }
    }
}

#[async_trait]
impl PersistenceStore for InMemoryLog {
    async fn persist(&self, event: OrchestratorEvent) {
        self.state.lock().expect("log mutex poisoned").events.push(event);
    }

    async fn save_snapshot(&self, state: Value) {
        let mut guard = self.state.lock().expect("log mutex poisoned");
        guard.snapshot = Some(state);
        guard.events.clear();
    }

    async fn replay(&self) -> Vec<ReplayItem> {
        let state = self.state.lock().expect("log mutex poisoned");
        let mut items = Vec::new();
        if let Some(snapshot) = state.snapshot.clone() {
            items.push(ReplayItem::Snapshot(snapshot));
        }
        items.extend(state.events.iter().cloned().map(ReplayItem::Event));
        items
    }
}
