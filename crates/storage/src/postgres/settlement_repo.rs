//! Settlement repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use gavel_core::error::{StorageError, StorageResult};
use gavel_core::models::{Address, Amount, Settlement, SettlementKind};
use gavel_core::ports::SettlementRepository;

use super::database::Database;
use super::helpers::{amount_from_text, bytes_to_address, map_query_err, optional_amount_from_text};

/// PostgreSQL implementation of SettlementRepository.
pub struct PgSettlementRepository {
    pool: PgPool,
}

impl PgSettlementRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl SettlementRepository for PgSettlementRepository {
    async fn record_claim(&self, settlement: &Settlement) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO settlements (
                auction, bidder, kind, token_amount, refund_amount, claimed_at
            )
            VALUES ($1, $2, $3, $4::NUMERIC, $5::NUMERIC, $6)
            ON CONFLICT (auction, bidder, kind) DO NOTHING
            "#,
        )
        .bind(&settlement.auction.0[..])
        .bind(&settlement.bidder.0[..])
        .bind(settlement.kind.as_str())
        .bind(settlement.token_amount.as_ref().map(Amount::as_str))
        .bind(settlement.refund_amount.as_str())
        .bind(settlement.claimed_at)
        .execute(&self.pool)
        .await
        .map_err(map_query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_auction(&self, auction: &Address) -> StorageResult<Vec<Settlement>> {
        let rows: Vec<SettlementRow> = sqlx::query_as(
            r#"
            SELECT auction, bidder, kind, token_amount::TEXT,
                   refund_amount::TEXT, claimed_at
            FROM settlements
            WHERE auction = $1
            ORDER BY id ASC
            "#,
        )
        .bind(&auction.0[..])
        .fetch_all(&self.pool)
        .await
        .map_err(map_query_err)?;

        rows.into_iter().map(SettlementRow::into_settlement).collect()
    }
}

/// Database row representation for Settlement.
#[derive(sqlx::FromRow)]
struct SettlementRow {
    auction: Vec<u8>,
    bidder: Vec<u8>,
    kind: String,
    token_amount: Option<String>,
    refund_amount: String,
    claimed_at: chrono::DateTime<chrono::Utc>,
}

impl SettlementRow {
    fn into_settlement(self) -> StorageResult<Settlement> {
        let kind = SettlementKind::parse(&self.kind).map_err(|_| {
            StorageError::SerializationError(format!(
                "settlement.kind is not a known kind: {:?}",
                self.kind
            ))
        })?;

        Ok(Settlement {
            auction: bytes_to_address(self.auction, "settlement.auction")?,
            bidder: bytes_to_address(self.bidder, "settlement.bidder")?,
            kind,
            token_amount: optional_amount_from_text(self.token_amount, "settlement.token_amount")?,
            refund_amount: amount_from_text(self.refund_amount, "settlement.refund_amount")?,
            claimed_at: self.claimed_at,
        })
    }
}
