//! Core indexer service - discovers auction instances and drives ingestion.
//!
//! The service owns the factory subscription: every creation event is
//! persisted first, then the new instance is registered with the
//! subscription manager. Restart recovery is store-as-truth, so the
//! watched set is rebuilt from the auctions table before the live
//! factory stream starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::{record_auction_discovered, record_subscription_reconnect};
use crate::models::{Address, Auction};
use crate::ports::{CreationEvent, EventSource, Repositories};
use crate::services::SubscriptionManager;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Factory contract whose creation events announce new auctions.
    pub factory: Address,
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service.
///
/// # Flow
///
/// 1. Rebuild the watched set from the store
/// 2. Subscribe to the factory's creation events
/// 3. For each creation: persist the instance, then register it
/// 4. On stream loss: reconnect with backoff and fetch missed creations
pub struct IndexerService<S: EventSource, R: Repositories> {
    config: IndexerConfig,
    source: Arc<S>,
    repositories: Arc<R>,
    subscriptions: Arc<SubscriptionManager<S, R>>,
}

impl<S, R> IndexerService<S, R>
where
    S: EventSource + 'static,
    R: Repositories + 'static,
{
    pub fn new(
        config: IndexerConfig,
        source: Arc<S>,
        repositories: Arc<R>,
        subscriptions: Arc<SubscriptionManager<S, R>>,
    ) -> Self {
        Self {
            config,
            source,
            repositories,
            subscriptions,
        }
    }

    /// Start the indexer.
    ///
    /// Returns only on shutdown (as [`IndexerError::ShutdownRequested`])
    /// or when startup recovery fails. Watcher tasks are drained before
    /// this returns, so in-flight writes complete.
    #[instrument(skip_all, fields(factory = %self.config.factory))]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        info!("⚖️  Starting auction indexer");

        let restored = self.subscriptions.bootstrap().await?;
        debug!(restored, "Bootstrap complete");

        let result = self.follow_factory(&mut shutdown_rx).await;

        self.subscriptions.shutdown().await;
        result
    }

    /// Follow factory creation events via subscription.
    #[instrument(skip_all)]
    async fn follow_factory(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        debug!("Subscribing to factory creation events");

        // Exponential backoff configuration
        const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
        const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
        let mut retry_delay = INITIAL_RETRY_DELAY;
        let mut last_seen: Option<u64> = None;

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            match self.source.subscribe_creations(&self.config.factory).await {
                Ok(mut stream) => {
                    debug!("📡 Factory subscription established");
                    retry_delay = INITIAL_RETRY_DELAY;

                    if let Some(seen) = last_seen {
                        self.catch_up_creations(seen + 1, &mut last_seen).await;
                    }

                    loop {
                        tokio::select! {
                            item = stream.next() => match item {
                                Some(Ok(creation)) => {
                                    last_seen = Some(
                                        last_seen.map_or(creation.block_number, |n| n.max(creation.block_number)),
                                    );
                                    self.handle_creation(&creation).await;
                                }
                                Some(Err(e)) => {
                                    warn!(error = ?e, "⚠️  Factory stream error, reconnecting...");
                                    break;
                                }
                                None => {
                                    warn!("⚠️  Factory stream ended, reconnecting...");
                                    break;
                                }
                            },
                            res = shutdown_rx.changed() => {
                                if res.is_err() || *shutdown_rx.borrow() {
                                    debug!("Shutdown requested");
                                    return Err(IndexerError::ShutdownRequested);
                                }
                            }
                        }
                    }
                    record_subscription_reconnect("factory");
                }
                Err(e) => {
                    warn!(
                        error = ?e,
                        retry_in_ms = retry_delay.as_millis(),
                        "⚠️  Failed to subscribe to factory, retrying..."
                    );
                    record_subscription_reconnect("factory");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {
                    debug!(retry_delay_ms = retry_delay.as_millis(), "🔄 Reconnecting to factory...");
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                }
                res = shutdown_rx.changed() => {
                    if res.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown requested");
                        return Err(IndexerError::ShutdownRequested);
                    }
                }
            }
        }
    }

    /// Persist a discovered auction, then register it for watching.
    ///
    /// The order is fixed: the instance row must exist before any of its
    /// events can be stored. When the write fails the instance is not
    /// registered, so nothing dangles; the row and the watcher both
    /// appear on a later delivery or not at all.
    #[instrument(skip_all, fields(auction = %creation.auction))]
    async fn handle_creation(&self, creation: &CreationEvent) {
        match self
            .repositories
            .auctions()
            .insert_auction(&new_auction(creation))
            .await
        {
            Ok(true) => {
                info!(
                    creator = %creation.creator,
                    block = creation.block_number,
                    "🎉 New auction discovered"
                );
                record_auction_discovered();
            }
            Ok(false) => {
                debug!("Auction already recorded");
            }
            Err(e) => {
                error!(error = ?e, "❌ Failed to persist discovered auction, not subscribing");
                return;
            }
        }

        if !self.subscriptions.register(creation.auction.clone()).await {
            debug!("Auction already watched");
        }
    }

    /// Fetch creation events missed while the factory stream was down.
    async fn catch_up_creations(&self, from_block: u64, last_seen: &mut Option<u64>) {
        let to_block = match self.source.latest_block().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = ?e, "⚠️  Catch-up head probe failed");
                return;
            }
        };
        if to_block < from_block {
            return;
        }

        match self
            .source
            .fetch_creations(&self.config.factory, from_block, to_block)
            .await
        {
            Ok(mut creations) => {
                if creations.is_empty() {
                    return;
                }
                creations.sort_by_key(|c| (c.block_number, c.log_index));
                debug!(
                    count = creations.len(),
                    from_block,
                    to_block,
                    "⏪ Applying missed creation events"
                );
                for creation in &creations {
                    *last_seen = Some(
                        last_seen.map_or(creation.block_number, |n| n.max(creation.block_number)),
                    );
                    self.handle_creation(creation).await;
                }
            }
            Err(e) => {
                warn!(error = ?e, "⚠️  Catch-up fetch failed");
            }
        }
    }
}

/// Build the instance record for a discovered auction.
///
/// Title and description are not part of the creation event; they stay
/// empty until filled in out of band.
fn new_auction(creation: &CreationEvent) -> Auction {
    Auction {
        address: creation.auction.clone(),
        creator: creation.creator.clone(),
        token: creation.token.clone(),
        total_supply: creation.total_supply.clone(),
        start_price: creation.start_price.clone(),
        end_price: creation.end_price.clone(),
        start_time: creation.start_time,
        title: String::new(),
        description: String::new(),
        cleared: false,
        clearing_price: None,
        total_demand: None,
        cleared_at: None,
        created_at: Utc::now(),
    }
}
