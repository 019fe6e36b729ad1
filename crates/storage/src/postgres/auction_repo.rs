//! Auction repository implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use gavel_core::error::StorageResult;
use gavel_core::models::{Address, Amount, Auction};
use gavel_core::ports::AuctionRepository;

use super::database::Database;
use super::helpers::{amount_from_text, bytes_to_address, map_query_err, optional_amount_from_text};

/// PostgreSQL implementation of AuctionRepository.
pub struct PgAuctionRepository {
    pool: PgPool,
}

impl PgAuctionRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl AuctionRepository for PgAuctionRepository {
    async fn insert_auction(&self, auction: &Auction) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO auctions (
                address, creator, token, total_supply, start_price, end_price,
                start_time, title, description, cleared, clearing_price,
                total_demand, cleared_at, created_at
            )
            VALUES ($1, $2, $3, $4::NUMERIC, $5::NUMERIC, $6::NUMERIC,
                    $7, $8, $9, $10, $11::NUMERIC, $12::NUMERIC, $13, $14)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(&auction.address.0[..])
        .bind(&auction.creator.0[..])
        .bind(&auction.token.0[..])
        .bind(auction.total_supply.as_str())
        .bind(auction.start_price.as_str())
        .bind(auction.end_price.as_str())
        .bind(auction.start_time as i64)
        .bind(&auction.title)
        .bind(&auction.description)
        .bind(auction.cleared)
        .bind(auction.clearing_price.as_ref().map(Amount::as_str))
        .bind(auction.total_demand.as_ref().map(Amount::as_str))
        .bind(auction.cleared_at)
        .bind(auction.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_auction(&self, address: &Address) -> StorageResult<Option<Auction>> {
        let row = sqlx::query_as::<_, AuctionRow>(
            r#"
            SELECT address, creator, token, total_supply::TEXT, start_price::TEXT,
                   end_price::TEXT, start_time, title, description, cleared,
                   clearing_price::TEXT, total_demand::TEXT, cleared_at, created_at
            FROM auctions
            WHERE address = $1
            "#,
        )
        .bind(&address.0[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(map_query_err)?;

        row.map(AuctionRow::into_auction).transpose()
    }

    async fn list_addresses(&self) -> StorageResult<Vec<Address>> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as("SELECT address FROM auctions ORDER BY address")
            .fetch_all(&self.pool)
            .await
            .map_err(map_query_err)?;

        rows.into_iter()
            .map(|(bytes,)| bytes_to_address(bytes, "auction.address"))
            .collect()
    }

    async fn mark_cleared(
        &self,
        address: &Address,
        clearing_price: &Amount,
        total_demand: &Amount,
        cleared_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        // The `cleared = FALSE` guard makes the transition observable:
        // exactly one caller sees rows_affected = 1
        let result = sqlx::query(
            r#"
            UPDATE auctions
            SET cleared = TRUE,
                clearing_price = $2::NUMERIC,
                total_demand = $3::NUMERIC,
                cleared_at = $4
            WHERE address = $1 AND cleared = FALSE
            "#,
        )
        .bind(&address.0[..])
        .bind(clearing_price.as_str())
        .bind(total_demand.as_str())
        .bind(cleared_at)
        .execute(&self.pool)
        .await
        .map_err(map_query_err)?;

        Ok(result.rows_affected() == 1)
    }
}

/// Database row representation for Auction.
#[derive(sqlx::FromRow)]
struct AuctionRow {
    address: Vec<u8>,
    creator: Vec<u8>,
    token: Vec<u8>,
    total_supply: String,
    start_price: String,
    end_price: String,
    start_time: i64,
    title: String,
    description: String,
    cleared: bool,
    clearing_price: Option<String>,
    total_demand: Option<String>,
    cleared_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl AuctionRow {
    fn into_auction(self) -> StorageResult<Auction> {
        Ok(Auction {
            address: bytes_to_address(self.address, "auction.address")?,
            creator: bytes_to_address(self.creator, "auction.creator")?,
            token: bytes_to_address(self.token, "auction.token")?,
            total_supply: amount_from_text(self.total_supply, "auction.total_supply")?,
            start_price: amount_from_text(self.start_price, "auction.start_price")?,
            end_price: amount_from_text(self.end_price, "auction.end_price")?,
            start_time: self.start_time as u64,
            title: self.title,
            description: self.description,
            cleared: self.cleared,
            clearing_price: optional_amount_from_text(
                self.clearing_price,
                "auction.clearing_price",
            )?,
            total_demand: optional_amount_from_text(self.total_demand, "auction.total_demand")?,
            cleared_at: self.cleared_at,
            created_at: self.created_at,
        })
    }
}
