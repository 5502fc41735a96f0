//! Root crate: no library code of its own.
//!
//! The orchestrator engine lives in `tasker-orchestrator-shared` and
//! `tasker-orchestrator-core`; this crate only hosts the black-box scenario
//! tests under `tests/` that exercise those crates' public API together.
