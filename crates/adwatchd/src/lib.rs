//! # adwatchd
//!
//! The capture daemon: wires an authenticated directory session, the
//! schema registry and the versioned store together, then drives the
//! change-data-capture loop.
//!
//! One cycle:
//!
//! 1. build the change filter from the current watermark
//! 2. drain every page of matching entries
//! 3. parse entries and project snapshots, dropping per-entry failures
//! 4. persist the batch in one transaction
//! 5. on success, refresh the watermark from the Root DSE
//!
//! A failed cycle logs, leaves the watermark alone and waits for the next
//! tick; the loop itself never dies on a cycle error.

pub mod cli;
pub mod orchestrator;

pub use cli::{Cli, Command};
pub use orchestrator::{CycleStats, Orchestrator, OrchestratorConfig};
