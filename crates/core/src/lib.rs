//! Core domain layer for the Gavel indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! business logic services for the sealed-bid auction indexer. It follows
//! hexagonal architecture principles - this is the innermost layer with
//! no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      gavel (binary)                         │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │          gavel-evm           │        gavel-storage         │
//! │     (WebSocket RPC, ABI)     │         (PostgreSQL)         │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │                     gavel-core  ← YOU ARE HERE              │
//! │                  (models, ports, services)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Auction, Commitment, Settlement, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Core business logic (IndexerService)
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! Ports define interfaces that external adapters must implement:
//!
//! - [`ports::EventSource`] - Subscribe to and fetch contract events
//! - [`ports::Repositories`] - Persist and query indexed data
//!
//! ## Indexer Lifecycle
//!
//! 1. Rebuild the watched set from the auctions table (store-as-truth)
//! 2. Subscribe to the factory's creation events
//! 3. Persist each discovered auction, then spawn its instance watcher
//! 4. Watchers map instance events onto idempotent store operations
//! 5. On stream loss, reconnect with backoff and fetch the missed range

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;
