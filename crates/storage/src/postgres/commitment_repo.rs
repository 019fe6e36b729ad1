//! Commitment repository implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use gavel_core::error::StorageResult;
use gavel_core::models::{Address, Amount, Commitment};
use gavel_core::ports::CommitmentRepository;

use super::database::Database;
use super::helpers::{
    amount_from_text, bytes_to_address, bytes_to_optional_hash, map_query_err,
    optional_amount_from_text,
};

/// PostgreSQL implementation of CommitmentRepository.
pub struct PgCommitmentRepository {
    pool: PgPool,
}

impl PgCommitmentRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CommitmentRepository for PgCommitmentRepository {
    async fn record_commitment(&self, commitment: &Commitment) -> StorageResult<()> {
        // The conflict arm only refreshes the commitment side; a reveal
        // that raced ahead of this event keeps its fields
        sqlx::query(
            r#"
            INSERT INTO commitments (
                auction, bidder, commitment_hash, locked_amount,
                revealed, revealed_quantity, created_at, revealed_at
            )
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6::NUMERIC, $7, $8)
            ON CONFLICT (auction, bidder) DO UPDATE SET
                commitment_hash = EXCLUDED.commitment_hash,
                locked_amount = EXCLUDED.locked_amount
            "#,
        )
        .bind(&commitment.auction.0[..])
        .bind(&commitment.bidder.0[..])
        .bind(commitment.commitment_hash.as_ref().map(|h| &h.0[..]))
        .bind(commitment.locked_amount.as_str())
        .bind(commitment.revealed)
        .bind(commitment.revealed_quantity.as_ref().map(Amount::as_str))
        .bind(commitment.created_at)
        .bind(commitment.revealed_at)
        .execute(&self.pool)
        .await
        .map_err(map_query_err)?;

        Ok(())
    }

    async fn record_reveal(
        &self,
        auction: &Address,
        bidder: &Address,
        quantity: &Amount,
        revealed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        // Insert a placeholder row when the commitment event has not
        // landed yet; it is completed by the late commitment
        sqlx::query(
            r#"
            INSERT INTO commitments (
                auction, bidder, commitment_hash, locked_amount,
                revealed, revealed_quantity, created_at, revealed_at
            )
            VALUES ($1, $2, NULL, 0, TRUE, $3::NUMERIC, $4, $4)
            ON CONFLICT (auction, bidder) DO UPDATE SET
                revealed = TRUE,
                revealed_quantity = EXCLUDED.revealed_quantity,
                revealed_at = EXCLUDED.revealed_at
            "#,
        )
        .bind(&auction.0[..])
        .bind(&bidder.0[..])
        .bind(quantity.as_str())
        .bind(revealed_at)
        .execute(&self.pool)
        .await
        .map_err(map_query_err)?;

        Ok(())
    }

    async fn get_commitment(
        &self,
        auction: &Address,
        bidder: &Address,
    ) -> StorageResult<Option<Commitment>> {
        let row = sqlx::query_as::<_, CommitmentRow>(
            r#"
            SELECT auction, bidder, commitment_hash, locked_amount::TEXT,
                   revealed, revealed_quantity::TEXT, created_at, revealed_at
            FROM commitments
            WHERE auction = $1 AND bidder = $2
            "#,
        )
        .bind(&auction.0[..])
        .bind(&bidder.0[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(map_query_err)?;

        row.map(CommitmentRow::into_commitment).transpose()
    }

    async fn list_bidders(
        &self,
        auction: &Address,
        after: Option<&Address>,
        limit: i64,
    ) -> StorageResult<Vec<Address>> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT bidder
            FROM commitments
            WHERE auction = $1 AND ($2::BYTEA IS NULL OR bidder > $2)
            ORDER BY bidder ASC
            LIMIT $3
            "#,
        )
        .bind(&auction.0[..])
        .bind(after.map(|a| &a.0[..]))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_query_err)?;

        rows.into_iter()
            .map(|(bytes,)| bytes_to_address(bytes, "commitment.bidder"))
            .collect()
    }
}

/// Database row representation for Commitment.
#[derive(sqlx::FromRow)]
struct CommitmentRow {
    auction: Vec<u8>,
    bidder: Vec<u8>,
    commitment_hash: Option<Vec<u8>>,
    locked_amount: String,
    revealed: bool,
    revealed_quantity: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    revealed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CommitmentRow {
    fn into_commitment(self) -> StorageResult<Commitment> {
        Ok(Commitment {
            auction: bytes_to_address(self.auction, "commitment.auction")?,
            bidder: bytes_to_address(self.bidder, "commitment.bidder")?,
            commitment_hash: bytes_to_optional_hash(
                self.commitment_hash,
                "commitment.commitment_hash",
            )?,
            locked_amount: amount_from_text(self.locked_amount, "commitment.locked_amount")?,
            revealed: self.revealed,
            revealed_quantity: optional_amount_from_text(
                self.revealed_quantity,
                "commitment.revealed_quantity",
            )?,
            created_at: self.created_at,
            revealed_at: self.revealed_at,
        })
    }
}
