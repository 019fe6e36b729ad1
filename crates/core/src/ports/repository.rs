//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `gavel-storage`).
//!
//! Every write is keyed so that replaying the same chain event is
//! harmless: commitments upsert on `(auction, bidder)`, settlements
//! conflict on `(auction, bidder, kind)`, and the clearing update only
//! fires on the `cleared` false-to-true transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::models::{Address, Amount, Auction, Commitment, Notification, Settlement};

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for auction instances.
#[async_trait]
pub trait AuctionRepository: Send + Sync {
    /// Insert a newly discovered auction.
    ///
    /// Returns `false` without touching the row when the address is
    /// already recorded (duplicate creation events are expected).
    async fn insert_auction(&self, auction: &Auction) -> StorageResult<bool>;

    /// Get an auction by address.
    async fn get_auction(&self, address: &Address) -> StorageResult<Option<Auction>>;

    /// All recorded auction addresses (the bootstrap reload).
    async fn list_addresses(&self) -> StorageResult<Vec<Address>>;

    /// Set the clearing fields, once.
    ///
    /// Returns `true` only when this call performed the false-to-true
    /// transition; `false` when the auction was already cleared or is
    /// unknown. Callers gate the notification fan-out on that flag.
    async fn mark_cleared(
        &self,
        address: &Address,
        clearing_price: &Amount,
        total_demand: &Amount,
        cleared_at: DateTime<Utc>,
    ) -> StorageResult<bool>;
}

/// Repository for sealed bid commitments.
#[async_trait]
pub trait CommitmentRepository: Send + Sync {
    /// Record a commitment, keyed by `(auction, bidder)`.
    ///
    /// On conflict the hash and locked amount are refreshed while reveal
    /// state is left untouched, so a commitment landing after a raced
    /// reveal completes the row instead of clobbering it.
    async fn record_commitment(&self, commitment: &Commitment) -> StorageResult<()>;

    /// Mark a commitment revealed, creating the row if the commitment
    /// event has not landed yet.
    async fn record_reveal(
        &self,
        auction: &Address,
        bidder: &Address,
        quantity: &Amount,
        revealed_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Get one commitment by its natural key.
    async fn get_commitment(
        &self,
        auction: &Address,
        bidder: &Address,
    ) -> StorageResult<Option<Commitment>>;

    /// Bidder addresses with a commitment on an auction, in ascending
    /// address order, keyset-paginated for bounded fan-out memory.
    async fn list_bidders(
        &self,
        auction: &Address,
        after: Option<&Address>,
        limit: i64,
    ) -> StorageResult<Vec<Address>>;
}

/// Repository for settlement records.
#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Append a claim settlement.
    ///
    /// Returns `false` when the same `(auction, bidder, kind)` claim was
    /// already recorded; callers skip the companion notification then.
    async fn record_claim(&self, settlement: &Settlement) -> StorageResult<bool>;

    /// All settlements recorded against an auction.
    async fn list_for_auction(&self, auction: &Address) -> StorageResult<Vec<Settlement>>;
}

/// Repository for user notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert a single notification.
    async fn insert_notification(&self, notification: &Notification) -> StorageResult<()>;

    /// Insert a batch of notifications in one transaction (fan-out pages).
    async fn insert_notifications(&self, notifications: &[Notification]) -> StorageResult<()>;

    /// All notifications addressed to a recipient, newest first.
    async fn list_for_recipient(&self, recipient: &Address) -> StorageResult<Vec<Notification>>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the indexer services.
pub trait Repositories: Send + Sync {
    /// Access the auction repository.
    fn auctions(&self) -> &dyn AuctionRepository;

    /// Access the commitment repository.
    fn commitments(&self) -> &dyn CommitmentRepository;

    /// Access the settlement repository.
    fn settlements(&self) -> &dyn SettlementRepository;

    /// Access the notification repository.
    fn notifications(&self) -> &dyn NotificationRepository;
}
