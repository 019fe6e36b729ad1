//! Core services wiring the ports together.
//!
//! - [`IndexerService`]: factory discovery and startup recovery
//! - [`SubscriptionManager`]: one watcher task per auction instance
//! - [`EventProcessor`]: event to store-operation mapping

mod indexer;
mod processor;
mod subscriptions;

pub use indexer::*;
pub use processor::*;
pub use subscriptions::*;

#[cfg(test)]
pub(crate) mod mock;
