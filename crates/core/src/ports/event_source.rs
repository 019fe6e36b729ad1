//! Port trait for the on-chain event source.
//!
//! This trait defines the interface for subscribing to and fetching
//! decoded auction events from an EVM chain. Implementations live in
//! the infrastructure layer (e.g., `gavel-evm`).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::ChainResult;
use crate::models::{Address, Amount, CommitmentHash};

/// Decoded factory creation event, before domain transformation.
#[derive(Debug, Clone)]
pub struct CreationEvent {
    /// Address of the newly deployed auction contract.
    pub auction: Address,
    /// Account that created the auction.
    pub creator: Address,
    /// Token being auctioned.
    pub token: Address,
    /// Total supply on offer.
    pub total_supply: Amount,
    /// Price at auction start.
    pub start_price: Amount,
    /// Price floor at auction end.
    pub end_price: Amount,
    /// Auction start time (unix seconds).
    pub start_time: u64,
    /// Block the event was emitted in.
    pub block_number: u64,
    /// Position of the log within the block.
    pub log_index: u64,
}

/// Decoded event emitted by an auction instance.
#[derive(Debug, Clone)]
pub struct AuctionEvent {
    /// Emitting auction contract (the log address).
    pub auction: Address,
    /// Block the event was emitted in.
    pub block_number: u64,
    /// Position of the log within the block.
    pub log_index: u64,
    /// Decoded payload.
    pub kind: AuctionEventKind,
}

/// The five event kinds an auction instance emits over its life.
#[derive(Debug, Clone)]
pub enum AuctionEventKind {
    /// A bidder locked funds behind a sealed commitment.
    CommitmentMade {
        bidder: Address,
        commitment_hash: CommitmentHash,
        locked_amount: Amount,
    },
    /// A bidder disclosed the quantity behind their commitment.
    CommitmentRevealed { bidder: Address, quantity: Amount },
    /// The auction cleared at a uniform price.
    AuctionCleared {
        clearing_price: Amount,
        total_demand: Amount,
        timestamp: u64,
    },
    /// A winning bidder claimed tokens (plus any overpayment refund).
    TokensClaimed {
        bidder: Address,
        amount: Amount,
        refund: Amount,
    },
    /// A losing bidder claimed their locked funds back.
    RefundClaimed { bidder: Address, amount: Amount },
}

impl AuctionEventKind {
    /// Stable name used for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            AuctionEventKind::CommitmentMade { .. } => "commitment_made",
            AuctionEventKind::CommitmentRevealed { .. } => "commitment_revealed",
            AuctionEventKind::AuctionCleared { .. } => "auction_cleared",
            AuctionEventKind::TokensClaimed { .. } => "tokens_claimed",
            AuctionEventKind::RefundClaimed { .. } => "refund_claimed",
        }
    }
}

/// Stream of factory creation events.
pub type CreationStream = Pin<Box<dyn Stream<Item = ChainResult<CreationEvent>> + Send>>;

/// Stream of events from a single auction instance.
pub type AuctionEventStream = Pin<Box<dyn Stream<Item = ChainResult<AuctionEvent>> + Send>>;

/// Port trait for the on-chain event source.
///
/// Subscriptions deliver decoded events from the moment they are
/// established; the ranged fetch methods cover gaps after a reconnect.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Chain id of the connected node.
    async fn chain_id(&self) -> ChainResult<u64>;

    /// Latest block number seen by the connected node.
    async fn latest_block(&self) -> ChainResult<u64>;

    /// Subscribe to creation events emitted by the factory.
    async fn subscribe_creations(&self, factory: &Address) -> ChainResult<CreationStream>;

    /// Subscribe to all auction events emitted by one instance.
    async fn subscribe_auction_events(&self, auction: &Address) -> ChainResult<AuctionEventStream>;

    /// Fetch creation events in an inclusive block range.
    async fn fetch_creations(
        &self,
        factory: &Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<CreationEvent>>;

    /// Fetch one instance's events in an inclusive block range.
    async fn fetch_auction_events(
        &self,
        auction: &Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<AuctionEvent>>;
}
