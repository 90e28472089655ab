pub mod billing;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod migration;
pub mod reconcile;
pub mod scheduler;
pub mod usage;

#[cfg(test)]
mod testing;

pub use dispatch::{EventDispatcher, NetworkEvent};
pub use reconcile::{BatchResult, NetworkReconciler, OpResult, ReconcileSettings};
pub use usage::{CollectReport, UsageCollector};
