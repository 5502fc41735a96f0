//! The at-least-once delivery primitive (`spec.md` §6), treated as an
//! external collaborator: only its interface matters here.

use crate::ids::{DeliveryId, Destination};
use async_trait::async_trait;
use serde_json::Value;

/// Allocates delivery ids and performs (re)transmission of outbound
/// messages until the orchestrator confirms them.
///
/// Implementations are expected to redeliver any message whose `DeliveryId`
/// has not been confirmed, including across a process restart. This crate
/// never implements that retry loop itself - it only calls `deliver` and
/// `confirm` at the right points in a task's lifecycle.
#[async_trait]
pub trait DeliveryPrimitive: Send + Sync + std::fmt::Debug {
    /// Allocate the next delivery id for a message bound for `destination`.
    ///
    /// This is split from `send` (rather than taking a `D -> Message`
    /// factory as `spec.md` §6 phrases it) so a task can compute its
    /// correlation id from the freshly allocated `DeliveryId` before the
    /// message itself is constructed - see `Task::start`.
    async fn next_delivery_id(&self, destination: &Destination) -> DeliveryId;

    /// Transmit `message` to `destination`, tagged with `delivery_id`.
    /// Implementations schedule retransmission until `confirm` is called
    /// with the same id.
    async fn send(&self, destination: &Destination, delivery_id: DeliveryId, message: Value);

    /// Stop retransmitting `delivery_id`: the orchestrator has matched a
    /// reply (or no longer cares).
    async fn confirm(&self, delivery_id: DeliveryId);
}
