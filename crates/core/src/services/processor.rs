//! Event processor - maps decoded auction events to store operations.
//!
//! Every mapping is an upsert keyed by the event's natural key, so the
//! at-least-once delivery of the underlying subscription never produces
//! duplicate commitments, double-counted claims or repeated fan-outs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::IndexerResult;
use crate::metrics::{ProcessingTimer, record_event_processed, record_notifications_created};
use crate::models::{
    Address, Amount, Commitment, CommitmentHash, Notification, Settlement, SettlementKind,
};
use crate::ports::{AuctionEvent, AuctionEventKind, Repositories};

/// How many bidders a clearing fan-out reads per page.
const DEFAULT_FANOUT_PAGE_SIZE: i64 = 500;

/// Applies decoded auction events to the store.
///
/// The processor is stateless; ordering guarantees come from the caller
/// (one watcher task per instance applies events sequentially).
pub struct EventProcessor<R: Repositories> {
    repositories: Arc<R>,
    fanout_page_size: i64,
}

impl<R: Repositories> EventProcessor<R> {
    pub fn new(repositories: Arc<R>) -> Self {
        Self {
            repositories,
            fanout_page_size: DEFAULT_FANOUT_PAGE_SIZE,
        }
    }

    /// Override the fan-out page size.
    pub fn with_fanout_page_size(mut self, size: i64) -> Self {
        self.fanout_page_size = size;
        self
    }

    /// Apply one decoded event to the store.
    ///
    /// Replays of an already-applied event are no-ops. An event whose
    /// auction is unknown to the store fails with a constraint violation;
    /// the caller logs it and moves on.
    #[instrument(skip_all, fields(auction = %event.auction, kind = event.kind.name()))]
    pub async fn apply(&self, event: &AuctionEvent) -> IndexerResult<()> {
        let _timer = ProcessingTimer::new();

        match &event.kind {
            AuctionEventKind::CommitmentMade {
                bidder,
                commitment_hash,
                locked_amount,
            } => {
                self.apply_commitment(&event.auction, bidder, commitment_hash, locked_amount)
                    .await?
            }
            AuctionEventKind::CommitmentRevealed { bidder, quantity } => {
                self.apply_reveal(&event.auction, bidder, quantity).await?
            }
            AuctionEventKind::AuctionCleared {
                clearing_price,
                total_demand,
                ..
            } => {
                self.apply_clearing(&event.auction, clearing_price, total_demand)
                    .await?
            }
            AuctionEventKind::TokensClaimed {
                bidder,
                amount,
                refund,
            } => {
                self.apply_winner_claim(&event.auction, bidder, amount, refund)
                    .await?
            }
            AuctionEventKind::RefundClaimed { bidder, amount } => {
                self.apply_refund_claim(&event.auction, bidder, amount)
                    .await?
            }
        }

        record_event_processed(event.kind.name());
        Ok(())
    }

    /// Record a sealed commitment.
    async fn apply_commitment(
        &self,
        auction: &Address,
        bidder: &Address,
        hash: &CommitmentHash,
        locked_amount: &Amount,
    ) -> IndexerResult<()> {
        let commitment = Commitment {
            auction: auction.clone(),
            bidder: bidder.clone(),
            commitment_hash: Some(hash.clone()),
            locked_amount: locked_amount.clone(),
            revealed: false,
            revealed_quantity: None,
            created_at: Utc::now(),
            revealed_at: None,
        };
        self.repositories
            .commitments()
            .record_commitment(&commitment)
            .await?;

        info!(bidder = %bidder, locked = %locked_amount, "🔒 Commitment recorded");
        Ok(())
    }

    /// Mark a commitment revealed.
    ///
    /// The repository creates the row if the commitment event has not
    /// landed yet, so a reveal racing its commitment is never lost.
    async fn apply_reveal(
        &self,
        auction: &Address,
        bidder: &Address,
        quantity: &Amount,
    ) -> IndexerResult<()> {
        self.repositories
            .commitments()
            .record_reveal(auction, bidder, quantity, Utc::now())
            .await?;

        info!(bidder = %bidder, quantity = %quantity, "👁️  Commitment revealed");
        Ok(())
    }

    /// Set the clearing fields and notify every committed bidder.
    ///
    /// The fan-out only runs when this event performed the false-to-true
    /// transition on the `cleared` flag; a replayed clearing event
    /// changes nothing and notifies no one.
    async fn apply_clearing(
        &self,
        auction: &Address,
        clearing_price: &Amount,
        total_demand: &Amount,
    ) -> IndexerResult<()> {
        let cleared_now = self
            .repositories
            .auctions()
            .mark_cleared(auction, clearing_price, total_demand, Utc::now())
            .await?;

        if !cleared_now {
            debug!("Clearing already applied or auction unknown, skipping fan-out");
            return Ok(());
        }

        let notified = self.fan_out_clearing(auction, clearing_price).await?;
        info!(price = %clearing_price, notified, "🔨 Auction cleared");
        Ok(())
    }

    /// One notification per committed bidder, paged to bound memory.
    ///
    /// Bidders who commit after the fan-out ran do not retroactively
    /// receive the notification.
    async fn fan_out_clearing(&self, auction: &Address, price: &Amount) -> IndexerResult<u64> {
        let message = format!("Auction cleared at {} wei!", price);
        let mut after: Option<Address> = None;
        let mut notified = 0u64;

        loop {
            let bidders = self
                .repositories
                .commitments()
                .list_bidders(auction, after.as_ref(), self.fanout_page_size)
                .await?;
            if bidders.is_empty() {
                break;
            }

            let count = bidders.len() as u64;
            let full_page = bidders.len() as i64 == self.fanout_page_size;
            after = bidders.last().cloned();

            let now = Utc::now();
            let batch: Vec<Notification> = bidders
                .into_iter()
                .map(|bidder| Notification {
                    auction: auction.clone(),
                    recipient: bidder,
                    message: message.clone(),
                    read: false,
                    created_at: now,
                })
                .collect();
            self.repositories
                .notifications()
                .insert_notifications(&batch)
                .await?;

            notified += count;
            record_notifications_created(count);

            if !full_page {
                break;
            }
        }

        Ok(notified)
    }

    /// Settle a winning bidder's token claim.
    async fn apply_winner_claim(
        &self,
        auction: &Address,
        bidder: &Address,
        amount: &Amount,
        refund: &Amount,
    ) -> IndexerResult<()> {
        let settlement = Settlement {
            auction: auction.clone(),
            bidder: bidder.clone(),
            kind: SettlementKind::Winner,
            token_amount: Some(amount.clone()),
            refund_amount: refund.clone(),
            claimed_at: Utc::now(),
        };
        self.record_settlement(settlement, "Tokens claimed successfully!")
            .await
    }

    /// Settle a losing bidder's refund claim.
    async fn apply_refund_claim(
        &self,
        auction: &Address,
        bidder: &Address,
        amount: &Amount,
    ) -> IndexerResult<()> {
        let settlement = Settlement {
            auction: auction.clone(),
            bidder: bidder.clone(),
            kind: SettlementKind::Refund,
            token_amount: None,
            refund_amount: amount.clone(),
            claimed_at: Utc::now(),
        };
        self.record_settlement(settlement, "Refund claimed successfully!")
            .await
    }

    /// Append the settlement; notify the bidder only when this is the
    /// first time the claim is seen.
    async fn record_settlement(
        &self,
        settlement: Settlement,
        message: &str,
    ) -> IndexerResult<()> {
        let inserted = self
            .repositories
            .settlements()
            .record_claim(&settlement)
            .await?;
        if !inserted {
            debug!(
                bidder = %settlement.bidder,
                kind = settlement.kind.as_str(),
                "Claim already recorded, skipping"
            );
            return Ok(());
        }

        let notification = Notification {
            auction: settlement.auction.clone(),
            recipient: settlement.bidder.clone(),
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        self.repositories
            .notifications()
            .insert_notification(&notification)
            .await?;
        record_notifications_created(1);

        info!(
            bidder = %settlement.bidder,
            kind = settlement.kind.as_str(),
            "💸 Claim settled"
        );
        Ok(())
    }
}
