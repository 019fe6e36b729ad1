//! Subscription manager - owns the set of watched auction instances.
//!
//! One watcher task per instance. Registration is an atomic
//! compare-and-insert, so bootstrap, live discovery and duplicate
//! creation events can race without ever producing a second watcher
//! for the same address.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{IndexerError, IndexerResult, StorageError};
use crate::metrics::{
    record_event_error, record_subscription_reconnect, record_subscription_started,
    record_subscription_stopped,
};
use crate::models::Address;
use crate::ports::{AuctionEvent, EventSource, Repositories};
use crate::services::EventProcessor;

// Exponential backoff for lost instance subscriptions
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Tracks which auction instances are being watched and runs one
/// watcher task per instance.
///
/// The watched set is the in-memory mirror of the auctions table:
/// `bootstrap` rebuilds it from the store after a restart, `register`
/// extends it as the factory announces new instances.
pub struct SubscriptionManager<S: EventSource, R: Repositories> {
    source: Arc<S>,
    repositories: Arc<R>,
    processor: Arc<EventProcessor<R>>,
    watched: Mutex<HashSet<Address>>,
    watchers: Mutex<JoinSet<()>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S, R> SubscriptionManager<S, R>
where
    S: EventSource + 'static,
    R: Repositories + 'static,
{
    pub fn new(
        source: Arc<S>,
        repositories: Arc<R>,
        processor: Arc<EventProcessor<R>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            repositories,
            processor,
            watched: Mutex::new(HashSet::new()),
            watchers: Mutex::new(JoinSet::new()),
            shutdown_rx,
        }
    }

    /// Register an auction instance for watching.
    ///
    /// Returns `false` when the address is already watched; only the
    /// first registration spawns a watcher task.
    pub async fn register(&self, auction: Address) -> bool {
        {
            let mut watched = self.watched.lock().await;
            if !watched.insert(auction.clone()) {
                return false;
            }
        }

        let source = Arc::clone(&self.source);
        let processor = Arc::clone(&self.processor);
        let shutdown_rx = self.shutdown_rx.clone();
        let address = auction.clone();
        self.watchers.lock().await.spawn(async move {
            watch_auction(source, processor, address, shutdown_rx).await;
        });

        record_subscription_started();
        debug!(auction = %auction, "Watching auction instance");
        true
    }

    /// Rebuild the watched set from the store.
    ///
    /// Runs once at startup, before the live factory subscription, so
    /// instances discovered in earlier runs resume without replaying
    /// their creation events.
    #[instrument(skip_all)]
    pub async fn bootstrap(&self) -> IndexerResult<usize> {
        let addresses = self.repositories.auctions().list_addresses().await?;

        let mut restored = 0usize;
        for address in addresses {
            if self.register(address).await {
                restored += 1;
            }
        }

        info!(restored, "📥 Watched set restored from store");
        Ok(restored)
    }

    /// Whether an instance is currently watched.
    pub async fn is_watched(&self, auction: &Address) -> bool {
        self.watched.lock().await.contains(auction)
    }

    /// Number of watched instances.
    pub async fn watched_count(&self) -> usize {
        self.watched.lock().await.len()
    }

    /// Wait for every watcher task to finish.
    ///
    /// Callers flip the shutdown channel first; watchers exit at the
    /// next event boundary, so in-flight writes complete before this
    /// returns.
    pub async fn shutdown(&self) {
        let mut watchers = self.watchers.lock().await;
        while watchers.join_next().await.is_some() {}
        debug!("All instance watchers stopped");
    }
}

/// Follow one auction instance until shutdown.
///
/// Stream loss triggers a reconnect with exponential backoff; events
/// missed while disconnected are fetched by block range before the live
/// stream resumes. Per-event failures are logged and skipped so one bad
/// write never stalls the instance.
async fn watch_auction<S, R>(
    source: Arc<S>,
    processor: Arc<EventProcessor<R>>,
    auction: Address,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: EventSource + 'static,
    R: Repositories + 'static,
{
    let mut last_seen: Option<u64> = None;
    let mut retry_delay = INITIAL_RETRY_DELAY;

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match source.subscribe_auction_events(&auction).await {
            Ok(mut stream) => {
                debug!(auction = %auction, "📡 Instance subscription established");
                retry_delay = INITIAL_RETRY_DELAY;

                if let Some(seen) = last_seen {
                    catch_up(&*source, &processor, &auction, seen + 1, &mut last_seen).await;
                }

                loop {
                    tokio::select! {
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                apply_event(&processor, &event, &mut last_seen).await;
                            }
                            Some(Err(e)) => {
                                warn!(auction = %auction, error = ?e, "⚠️  Instance stream error, reconnecting...");
                                break;
                            }
                            None => {
                                warn!(auction = %auction, "⚠️  Instance stream ended, reconnecting...");
                                break;
                            }
                        },
                        res = shutdown_rx.changed() => {
                            if res.is_err() || *shutdown_rx.borrow() {
                                break 'outer;
                            }
                        }
                    }
                }
                record_subscription_reconnect("auction");
            }
            Err(e) => {
                warn!(
                    auction = %auction,
                    error = ?e,
                    retry_in_ms = retry_delay.as_millis(),
                    "⚠️  Failed to subscribe to instance, retrying..."
                );
                record_subscription_reconnect("auction");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {
                retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
            }
            res = shutdown_rx.changed() => {
                if res.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    record_subscription_stopped();
    debug!(auction = %auction, "Instance watcher stopped");
}

/// Fetch and apply events missed while the subscription was down.
async fn catch_up<S, R>(
    source: &S,
    processor: &EventProcessor<R>,
    auction: &Address,
    from_block: u64,
    last_seen: &mut Option<u64>,
) where
    S: EventSource,
    R: Repositories,
{
    let to_block = match source.latest_block().await {
        Ok(n) => n,
        Err(e) => {
            warn!(auction = %auction, error = ?e, "⚠️  Catch-up head probe failed");
            return;
        }
    };
    if to_block < from_block {
        return;
    }

    match source.fetch_auction_events(auction, from_block, to_block).await {
        Ok(mut events) => {
            if events.is_empty() {
                return;
            }
            // Ranged fetches are not guaranteed ordered across blocks
            events.sort_by_key(|e| (e.block_number, e.log_index));
            debug!(
                auction = %auction,
                count = events.len(),
                from_block,
                to_block,
                "⏪ Applying missed events"
            );
            for event in &events {
                apply_event(processor, event, last_seen).await;
            }
        }
        Err(e) => {
            warn!(auction = %auction, error = ?e, "⚠️  Catch-up fetch failed");
        }
    }
}

/// Apply one event, logging failures without propagating them.
///
/// The block watermark advances either way; store writes are idempotent,
/// so there is no per-event retry.
async fn apply_event<R: Repositories>(
    processor: &EventProcessor<R>,
    event: &AuctionEvent,
    last_seen: &mut Option<u64>,
) {
    if let Err(e) = processor.apply(event).await {
        match &e {
            IndexerError::Storage(StorageError::ConstraintViolation(_)) => {
                warn!(
                    auction = %event.auction,
                    kind = event.kind.name(),
                    "⚠️  Event references an unknown auction, dropped"
                );
            }
            _ => {
                error!(
                    auction = %event.auction,
                    kind = event.kind.name(),
                    block = event.block_number,
                    error = ?e,
                    "❌ Event processing failed"
                );
            }
        }
        record_event_error(event.kind.name());
    }
    *last_seen = Some(last_seen.map_or(event.block_number, |n| n.max(event.block_number)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, CommitmentHash};
    use crate::ports::AuctionEventKind;
    use crate::services::mock::{MockEventSource, MockRepositories};

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn made_event(auction: &Address, bidder: u8, block: u64) -> AuctionEvent {
        AuctionEvent {
            auction: auction.clone(),
            block_number: block,
            log_index: 0,
            kind: AuctionEventKind::CommitmentMade {
                bidder: addr(bidder),
                commitment_hash: CommitmentHash([0x22; 32]),
                locked_amount: Amount::from_units(100u64),
            },
        }
    }

    fn reveal_event(auction: &Address, bidder: u8, block: u64) -> AuctionEvent {
        AuctionEvent {
            auction: auction.clone(),
            block_number: block,
            log_index: 1,
            kind: AuctionEventKind::CommitmentRevealed {
                bidder: addr(bidder),
                quantity: Amount::from_units(60u64),
            },
        }
    }

    struct Harness {
        source: Arc<MockEventSource>,
        repos: Arc<MockRepositories>,
        manager: Arc<SubscriptionManager<MockEventSource, MockRepositories>>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let source = Arc::new(MockEventSource::default());
        let repos = Arc::new(MockRepositories::default());
        let processor = Arc::new(EventProcessor::new(Arc::clone(&repos)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = Arc::new(SubscriptionManager::new(
            Arc::clone(&source),
            Arc::clone(&repos),
            processor,
            shutdown_rx,
        ));
        Harness {
            source,
            repos,
            manager,
            shutdown_tx,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn register_is_idempotent() {
        let h = harness();

        assert!(h.manager.register(addr(0xA1)).await);
        assert!(!h.manager.register(addr(0xA1)).await);
        assert_eq!(h.manager.watched_count().await, 1);
        assert!(h.manager.is_watched(&addr(0xA1)).await);

        h.shutdown_tx.send(true).ok();
        h.manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_registration_spawns_one_watcher() {
        let h = harness();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&h.manager);
            handles.push(tokio::spawn(async move {
                manager.register(addr(0xA1)).await
            }));
        }

        let mut first_count = 0;
        for handle in handles {
            if handle.await.unwrap() {
                first_count += 1;
            }
        }

        assert_eq!(first_count, 1);
        assert_eq!(h.manager.watched_count().await, 1);

        h.shutdown_tx.send(true).ok();
        h.manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_restores_watched_set_from_store() {
        let h = harness();
        h.repos.seed_auction(addr(0xA1));
        h.repos.seed_auction(addr(0xA2));
        h.repos.seed_auction(addr(0xA3));

        let restored = h.manager.bootstrap().await.unwrap();
        assert_eq!(restored, 3);
        assert_eq!(h.manager.watched_count().await, 3);

        // A replayed creation event after bootstrap is a no-op
        assert!(!h.manager.register(addr(0xA2)).await);
        assert_eq!(h.manager.watched_count().await, 3);

        h.shutdown_tx.send(true).ok();
        h.manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_applies_streamed_events_in_order() {
        let h = harness();
        let auction = addr(0xA1);
        h.repos.seed_auction(auction.clone());
        h.source.script_auction_events(
            &auction,
            vec![
                Ok(made_event(&auction, 0xB1, 10)),
                Ok(reveal_event(&auction, 0xB1, 11)),
            ],
        );

        h.manager.register(auction.clone()).await;

        let repos = Arc::clone(&h.repos);
        wait_until(move || {
            repos
                .commitment(&auction, &addr(0xB1))
                .map(|c| c.revealed)
                .unwrap_or(false)
        })
        .await;
        assert_eq!(h.repos.commitment_count(), 1);

        h.shutdown_tx.send(true).ok();
        h.manager.shutdown().await;
    }

    // After a stream drop the watcher must fetch the blocks it missed
    // before resuming, starting just past its watermark.
    #[tokio::test(start_paused = true)]
    async fn watcher_catches_up_after_stream_loss() {
        let h = harness();
        let auction = addr(0xA1);
        h.repos.seed_auction(auction.clone());
        h.source.set_latest_block(20);
        // First subscription delivers one event at block 5, then drops
        h.source
            .script_auction_events(&auction, vec![Ok(made_event(&auction, 0xB1, 5))]);
        // The reveal lands while disconnected; only a ranged fetch sees it
        h.source
            .stub_auction_fetch(&auction, vec![reveal_event(&auction, 0xB1, 7)]);

        h.manager.register(auction.clone()).await;

        let repos = Arc::clone(&h.repos);
        let probe = auction.clone();
        wait_until(move || {
            repos
                .commitment(&probe, &addr(0xB1))
                .map(|c| c.revealed)
                .unwrap_or(false)
        })
        .await;

        let fetches = h.source.auction_fetch_calls();
        assert!(!fetches.is_empty(), "reconnect must trigger a catch-up fetch");
        assert_eq!(fetches[0], (auction.clone(), 6, 20));

        h.shutdown_tx.send(true).ok();
        h.manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_watchers() {
        let h = harness();
        h.manager.register(addr(0xA1)).await;
        h.manager.register(addr(0xA2)).await;

        h.shutdown_tx.send(true).ok();
        tokio::time::timeout(Duration::from_secs(5), h.manager.shutdown())
            .await
            .expect("watchers drain promptly");
    }

    // A write failure on one event must not stall the stream behind it.
    #[tokio::test(start_paused = true)]
    async fn watcher_skips_failed_events_and_continues() {
        let h = harness();
        let auction = addr(0xA1);
        h.repos.seed_auction(auction.clone());

        // The reveal for an unknown auction fails its foreign key; the
        // commitment after it must still land.
        let stranger = addr(0xEE);
        h.source.script_auction_events(
            &auction,
            vec![
                Ok(reveal_event(&stranger, 0xB9, 10)),
                Ok(made_event(&auction, 0xB1, 11)),
            ],
        );

        h.manager.register(auction.clone()).await;

        let repos = Arc::clone(&h.repos);
        let probe = auction.clone();
        wait_until(move || repos.commitment(&probe, &addr(0xB1)).is_some()).await;
        assert!(h.repos.commitment(&stranger, &addr(0xB9)).is_none());

        h.shutdown_tx.send(true).ok();
        h.manager.shutdown().await;
    }
}
