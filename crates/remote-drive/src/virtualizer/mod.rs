//! Command orchestration, enumeration sessions and reconciliation.

mod commands;
mod engine;
mod enumeration;
mod reconcile;

pub use commands::CommandRegistry;
pub use engine::VirtualizationEngine;
pub use enumeration::ActiveEnumeration;
pub use reconcile::{RemoteChange, SyncReport};
