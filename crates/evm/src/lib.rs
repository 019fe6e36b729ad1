//! EVM RPC adapter for the Gavel indexer.
//!
//! This crate implements the [`EventSource`] port from `gavel-core`,
//! providing connectivity to EVM chains via WebSocket RPC.
//!
//! # Features
//!
//! - Live log subscriptions for the factory and each auction instance
//! - Ranged log fetches for catch-up after a reconnect
//! - Typed event decoding via alloy's `sol!` interfaces
//!
//! # Usage
//!
//! ```ignore
//! use gavel_evm::{EvmClient, EvmClientConfig};
//!
//! let config = EvmClientConfig {
//!     ws_url: "ws://localhost:8545".to_string(),
//! };
//!
//! let client = EvmClient::connect(config).await?;
//! let chain_id = client.chain_id().await?;
//! let mut stream = client.subscribe_creations(&factory).await?;
//!
//! while let Some(creation) = stream.next().await {
//!     // Process creation...
//! }
//! ```
//!
//! # Architecture
//!
//! One subscription is held per contract: one for the factory and one
//! per watched auction instance, each filtered server-side down to the
//! protocol's event topics. Logs are decoded into the `CreationEvent`
//! and `AuctionEvent` types defined in `gavel-core`; undecodable logs
//! are dropped with a warning rather than failing the stream.
//!
//! [`EventSource`]: gavel_core::ports::EventSource

mod abi;
mod client;

pub use client::{EvmClient, EvmClientConfig};
