//! In-memory port implementations for service tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream;

use crate::error::{ChainResult, StorageError, StorageResult};
use crate::models::{Address, Amount, Auction, Commitment, Notification, Settlement};
use crate::ports::{
    AuctionEvent, AuctionEventStream, AuctionRepository, CommitmentRepository, CreationEvent,
    CreationStream, EventSource, NotificationRepository, Repositories, SettlementRepository,
};

// =============================================================================
// MockRepositories
// =============================================================================

/// In-memory store enforcing the same keys and foreign keys as the
/// real schema. Locks are never held across an await point.
#[derive(Default)]
pub struct MockRepositories {
    auctions: Mutex<BTreeMap<Address, Auction>>,
    commitments: Mutex<BTreeMap<(Address, Address), Commitment>>,
    settlements: Mutex<Vec<Settlement>>,
    notifications: Mutex<Vec<Notification>>,
    fail_writes: AtomicBool,
}

impl MockRepositories {
    /// Insert an auction row directly, bypassing the repository.
    pub fn seed_auction(&self, address: Address) {
        let auction = Auction {
            address: address.clone(),
            creator: Address([0xCC; 20]),
            token: Address([0x70; 20]),
            total_supply: Amount::from_units(1_000_000u64),
            start_price: Amount::from_units(100u64),
            end_price: Amount::from_units(10u64),
            start_time: 1_700_000_000,
            title: String::new(),
            description: String::new(),
            cleared: false,
            clearing_price: None,
            total_demand: None,
            cleared_at: None,
            created_at: Utc::now(),
        };
        self.auctions.lock().unwrap().insert(address, auction);
    }

    /// When set, every write fails with a query error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn auction(&self, address: &Address) -> Option<Auction> {
        self.auctions.lock().unwrap().get(address).cloned()
    }

    pub fn auction_count(&self) -> usize {
        self.auctions.lock().unwrap().len()
    }

    pub fn commitment(&self, auction: &Address, bidder: &Address) -> Option<Commitment> {
        self.commitments
            .lock()
            .unwrap()
            .get(&(auction.clone(), bidder.clone()))
            .cloned()
    }

    pub fn commitment_count(&self) -> usize {
        self.commitments.lock().unwrap().len()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryError("injected write failure".into()));
        }
        Ok(())
    }

    fn check_auction_exists(&self, address: &Address, constraint: &str) -> StorageResult<()> {
        if !self.auctions.lock().unwrap().contains_key(address) {
            return Err(StorageError::ConstraintViolation(constraint.into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuctionRepository for MockRepositories {
    async fn insert_auction(&self, auction: &Auction) -> StorageResult<bool> {
        self.check_writable()?;
        let mut auctions = self.auctions.lock().unwrap();
        if auctions.contains_key(&auction.address) {
            return Ok(false);
        }
        auctions.insert(auction.address.clone(), auction.clone());
        Ok(true)
    }

    async fn get_auction(&self, address: &Address) -> StorageResult<Option<Auction>> {
        Ok(self.auctions.lock().unwrap().get(address).cloned())
    }

    async fn list_addresses(&self) -> StorageResult<Vec<Address>> {
        Ok(self.auctions.lock().unwrap().keys().cloned().collect())
    }

    async fn mark_cleared(
        &self,
        address: &Address,
        clearing_price: &Amount,
        total_demand: &Amount,
        cleared_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.check_writable()?;
        let mut auctions = self.auctions.lock().unwrap();
        match auctions.get_mut(address) {
            Some(auction) if !auction.cleared => {
                auction.cleared = true;
                auction.clearing_price = Some(clearing_price.clone());
                auction.total_demand = Some(total_demand.clone());
                auction.cleared_at = Some(cleared_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl CommitmentRepository for MockRepositories {
    async fn record_commitment(&self, commitment: &Commitment) -> StorageResult<()> {
        self.check_writable()?;
        self.check_auction_exists(&commitment.auction, "commitments_auction_fkey")?;
        let mut commitments = self.commitments.lock().unwrap();
        let key = (commitment.auction.clone(), commitment.bidder.clone());
        match commitments.get_mut(&key) {
            Some(existing) => {
                existing.commitment_hash = commitment.commitment_hash.clone();
                existing.locked_amount = commitment.locked_amount.clone();
            }
            None => {
                commitments.insert(key, commitment.clone());
            }
        }
        Ok(())
    }

    async fn record_reveal(
        &self,
        auction: &Address,
        bidder: &Address,
        quantity: &Amount,
        revealed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.check_writable()?;
        self.check_auction_exists(auction, "commitments_auction_fkey")?;
        let mut commitments = self.commitments.lock().unwrap();
        let entry = commitments
            .entry((auction.clone(), bidder.clone()))
            .or_insert_with(|| Commitment {
                auction: auction.clone(),
                bidder: bidder.clone(),
                commitment_hash: None,
                locked_amount: Amount::zero(),
                revealed: false,
                revealed_quantity: None,
                created_at: revealed_at,
                revealed_at: None,
            });
        entry.revealed = true;
        entry.revealed_quantity = Some(quantity.clone());
        entry.revealed_at = Some(revealed_at);
        Ok(())
    }

    async fn get_commitment(
        &self,
        auction: &Address,
        bidder: &Address,
    ) -> StorageResult<Option<Commitment>> {
        Ok(self.commitment(auction, bidder))
    }

    async fn list_bidders(
        &self,
        auction: &Address,
        after: Option<&Address>,
        limit: i64,
    ) -> StorageResult<Vec<Address>> {
        let commitments = self.commitments.lock().unwrap();
        Ok(commitments
            .keys()
            .filter(|(a, _)| a == auction)
            .map(|(_, bidder)| bidder)
            .filter(|bidder| after.is_none_or(|cursor| *bidder > cursor))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettlementRepository for MockRepositories {
    async fn record_claim(&self, settlement: &Settlement) -> StorageResult<bool> {
        self.check_writable()?;
        self.check_auction_exists(&settlement.auction, "settlements_auction_fkey")?;
        let mut settlements = self.settlements.lock().unwrap();
        let duplicate = settlements.iter().any(|s| {
            s.auction == settlement.auction
                && s.bidder == settlement.bidder
                && s.kind == settlement.kind
        });
        if duplicate {
            return Ok(false);
        }
        settlements.push(settlement.clone());
        Ok(true)
    }

    async fn list_for_auction(&self, auction: &Address) -> StorageResult<Vec<Settlement>> {
        Ok(self
            .settlements
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.auction == auction)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for MockRepositories {
    async fn insert_notification(&self, notification: &Notification) -> StorageResult<()> {
        self.check_writable()?;
        self.check_auction_exists(&notification.auction, "notifications_auction_fkey")?;
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn insert_notifications(&self, notifications: &[Notification]) -> StorageResult<()> {
        self.check_writable()?;
        for notification in notifications {
            self.check_auction_exists(&notification.auction, "notifications_auction_fkey")?;
        }
        self.notifications.lock().unwrap().extend_from_slice(notifications);
        Ok(())
    }

    async fn list_for_recipient(&self, recipient: &Address) -> StorageResult<Vec<Notification>> {
        let mut found: Vec<Notification> = self
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| &n.recipient == recipient)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }
}

impl Repositories for MockRepositories {
    fn auctions(&self) -> &dyn AuctionRepository {
        self
    }

    fn commitments(&self) -> &dyn CommitmentRepository {
        self
    }

    fn settlements(&self) -> &dyn SettlementRepository {
        self
    }

    fn notifications(&self) -> &dyn NotificationRepository {
        self
    }
}

// =============================================================================
// MockEventSource
// =============================================================================

/// Scripted event source.
///
/// Each call to a subscribe method consumes one script segment; the
/// stream ends when its segment runs out, which drives the watcher into
/// its reconnect path. With no segment left the stream stays open and
/// silent.
#[derive(Default)]
pub struct MockEventSource {
    creation_scripts: Mutex<VecDeque<Vec<ChainResult<CreationEvent>>>>,
    auction_scripts: Mutex<HashMap<Address, VecDeque<Vec<ChainResult<AuctionEvent>>>>>,
    creation_fetch: Mutex<Vec<CreationEvent>>,
    auction_fetch: Mutex<HashMap<Address, Vec<AuctionEvent>>>,
    creation_fetch_calls: Mutex<Vec<(u64, u64)>>,
    auction_fetch_calls: Mutex<Vec<(Address, u64, u64)>>,
    latest_block: AtomicU64,
}

impl MockEventSource {
    /// Queue one factory stream segment.
    pub fn script_creations(&self, events: Vec<ChainResult<CreationEvent>>) {
        self.creation_scripts.lock().unwrap().push_back(events);
    }

    /// Queue one instance stream segment.
    pub fn script_auction_events(&self, auction: &Address, events: Vec<ChainResult<AuctionEvent>>) {
        self.auction_scripts
            .lock()
            .unwrap()
            .entry(auction.clone())
            .or_default()
            .push_back(events);
    }

    /// Stub the ranged creation fetch.
    pub fn stub_creation_fetch(&self, events: Vec<CreationEvent>) {
        *self.creation_fetch.lock().unwrap() = events;
    }

    /// Stub the ranged instance fetch.
    pub fn stub_auction_fetch(&self, auction: &Address, events: Vec<AuctionEvent>) {
        self.auction_fetch
            .lock()
            .unwrap()
            .insert(auction.clone(), events);
    }

    pub fn set_latest_block(&self, number: u64) {
        self.latest_block.store(number, Ordering::SeqCst);
    }

    pub fn creation_fetch_calls(&self) -> Vec<(u64, u64)> {
        self.creation_fetch_calls.lock().unwrap().clone()
    }

    pub fn auction_fetch_calls(&self) -> Vec<(Address, u64, u64)> {
        self.auction_fetch_calls.lock().unwrap().clone()
    }
}

fn scripted_stream<T: Send + 'static>(
    segment: Option<Vec<T>>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    match segment {
        Some(items) => Box::pin(stream::iter(items)),
        None => Box::pin(stream::pending()),
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn chain_id(&self) -> ChainResult<u64> {
        Ok(31337)
    }

    async fn latest_block(&self) -> ChainResult<u64> {
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn subscribe_creations(&self, _factory: &Address) -> ChainResult<CreationStream> {
        let segment = self.creation_scripts.lock().unwrap().pop_front();
        Ok(scripted_stream(segment))
    }

    async fn subscribe_auction_events(&self, auction: &Address) -> ChainResult<AuctionEventStream> {
        let segment = self
            .auction_scripts
            .lock()
            .unwrap()
            .get_mut(auction)
            .and_then(|scripts| scripts.pop_front());
        Ok(scripted_stream(segment))
    }

    async fn fetch_creations(
        &self,
        _factory: &Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<CreationEvent>> {
        self.creation_fetch_calls
            .lock()
            .unwrap()
            .push((from_block, to_block));
        Ok(self.creation_fetch.lock().unwrap().clone())
    }

    async fn fetch_auction_events(
        &self,
        auction: &Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<AuctionEvent>> {
        self.auction_fetch_calls
            .lock()
            .unwrap()
            .push((auction.clone(), from_block, to_block));
        Ok(self
            .auction_fetch
            .lock()
            .unwrap()
            .get(auction)
            .cloned()
            .unwrap_or_default())
    }
}
