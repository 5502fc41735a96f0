//! # tasker-orchestrator-shared
//!
//! Identifiers, the error/abort taxonomy, settings, and the two traits the
//! orchestration engine treats as external collaborators: the persistent
//! event log (`PersistenceStore`) and the at-least-once delivery primitive
//! (`DeliveryPrimitive`). Nothing in this crate makes a scheduling decision -
//! that lives in `tasker-orchestrator-core`.

pub mod delivery;
pub mod error;
pub mod ids;
pub mod persistence;
pub mod settings;

pub use delivery::DeliveryPrimitive;
pub use error::{AbortCause, OrchestratorError, OrchestratorResult};
pub use ids::{CorrelationId, DeliveryId, Destination};
pub use persistence::{OrchestratorEvent, PersistenceStore, ReplayItem};
pub use settings::Settings;
