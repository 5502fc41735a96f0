//! Orchestrator-wide tunables (`spec.md` §6).

use serde::{Deserialize, Serialize};

/// Host-supplied configuration. This crate never parses a file itself (no
/// CLI/file-format surface, per the spec's Non-goals) - a host application
/// loads this with its own `config`/`toml` layer and passes it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Snapshot roughly every N persisted messages. `0` disables automatic
    /// snapshotting entirely.
    pub save_snapshot_roughly_every_x_messages: u32,

    /// Whether to persist a `TaskTimedOut(index)` event when a per-task
    /// timeout fires, rather than relying on elapsed wall-clock time during
    /// replay. `spec.md` §9 recommends always doing this; see DESIGN.md for
    /// why this crate defaults it to `true` instead of leaving it open.
    pub persist_task_timed_out_events: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            save_snapshot_roughly_every_x_messages: 0,
            persist_task_timed_out_events: true,
        }
    }
}
