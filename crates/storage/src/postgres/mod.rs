//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `gavel-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgAuctionRepository`, `PgCommitmentRepository`, etc.
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod auction_repo;
mod commitment_repo;
mod database;
mod helpers;
mod notification_repo;
mod settlement_repo;

pub use auction_repo::PgAuctionRepository;
pub use commitment_repo::PgCommitmentRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use notification_repo::PgNotificationRepository;
pub use settlement_repo::PgSettlementRepository;

use std::sync::Arc;

use gavel_core::ports::{
    AuctionRepository, CommitmentRepository, NotificationRepository, Repositories,
    SettlementRepository,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations.
pub struct PgRepositories {
    auctions: PgAuctionRepository,
    commitments: PgCommitmentRepository,
    settlements: PgSettlementRepository,
    notifications: PgNotificationRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            auctions: PgAuctionRepository::new(&db),
            commitments: PgCommitmentRepository::new(&db),
            settlements: PgSettlementRepository::new(&db),
            notifications: PgNotificationRepository::new(&db),
        }
    }
}

impl Repositories for PgRepositories {
    fn auctions(&self) -> &dyn AuctionRepository {
        &self.auctions
    }

    fn commitments(&self) -> &dyn CommitmentRepository {
        &self.commitments
    }

    fn settlements(&self) -> &dyn SettlementRepository {
        &self.settlements
    }

    fn notifications(&self) -> &dyn NotificationRepository {
        &self.notifications
    }
}
