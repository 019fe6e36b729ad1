//! Domain models representing indexed auction data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

// =============================================================================
// Fixed-width Byte Types
// =============================================================================

/// Macro to generate fixed-width byte newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; N]>` implementation
macro_rules! bytes_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

bytes_newtype!(
    /// 20-byte EVM address (auction contract, factory, bidder or token).
    Address,
    20
);

bytes_newtype!(
    /// 32-byte sealed commitment hash.
    CommitmentHash,
    32
);

// =============================================================================
// On-chain Amounts
// =============================================================================

/// An on-chain integer amount carried as an opaque decimal string.
///
/// Supplies, prices, locked amounts and clearing results are uint256
/// values on chain. The indexer never narrows them into native integers
/// or floats; they travel end-to-end as decimal strings and the database
/// stores them as NUMERIC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(String);

impl Amount {
    /// Parse an untrusted decimal string (storage reads, external input).
    pub fn parse(s: &str) -> DomainResult<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::InvalidAmount(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Wrap a value whose `Display` output is a plain decimal integer.
    ///
    /// Intended for native unsigned integers and uint256 decodes, which
    /// always render as digit strings.
    pub fn from_units<T: std::fmt::Display>(value: T) -> Self {
        Self(value.to_string())
    }

    /// The zero amount.
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// The decimal string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Auction Instances
// =============================================================================

/// Indexed auction instance discovered through the factory.
///
/// One record per deployed auction contract. The address is the unique
/// key; instances are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    /// Auction contract address (unique key).
    pub address: Address,
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
    /// Display title, empty until back-filled by an external service.
    pub title: String,
    /// Display description, empty until back-filled.
    pub description: String,
    /// Whether the clearing event has been applied. Clearing fields are
    /// set at most once.
    pub cleared: bool,
    /// Uniform clearing price, once cleared.
    pub clearing_price: Option<Amount>,
    /// Total revealed demand, once cleared.
    pub total_demand: Option<Amount>,
    /// When the clearing event was applied.
    pub cleared_at: Option<DateTime<Utc>>,
    /// When this auction was first indexed.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Commitments
// =============================================================================

/// Sealed bid commitment, keyed by `(auction, bidder)`.
///
/// The reveal mutates the row in place; there is never more than one
/// commitment per bidder per auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    /// Auction the commitment belongs to.
    pub auction: Address,
    /// Committing bidder.
    pub bidder: Address,
    /// Sealed hash of the bid. `None` when a raced reveal created the
    /// row before the commitment event landed.
    pub commitment_hash: Option<CommitmentHash>,
    /// Funds locked with the commitment.
    pub locked_amount: Amount,
    /// Whether the bid has been revealed.
    pub revealed: bool,
    /// Quantity disclosed by the reveal.
    pub revealed_quantity: Option<Amount>,
    /// When the commitment was first indexed.
    pub created_at: DateTime<Utc>,
    /// When the reveal was applied.
    pub revealed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Settlements
// =============================================================================

/// Which claim produced a settlement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    /// Winning bidder claimed tokens (and any overpayment refund).
    Winner,
    /// Losing bidder claimed their locked funds back.
    Refund,
}

impl SettlementKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::Winner => "winner",
            SettlementKind::Refund => "refund",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "winner" => Ok(SettlementKind::Winner),
            "refund" => Ok(SettlementKind::Refund),
            other => Err(DomainError::UnknownSettlementKind(other.to_string())),
        }
    }
}

/// Append-only record of a claim settlement.
///
/// A bidder can have up to one record per kind on an auction: a winner
/// claim and a refund claim are distinct settlements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// Auction the claim was made against.
    pub auction: Address,
    /// Claiming bidder.
    pub bidder: Address,
    /// Winner or refund claim.
    pub kind: SettlementKind,
    /// Tokens received (winner claims only).
    pub token_amount: Option<Amount>,
    /// Funds returned.
    pub refund_amount: Amount,
    /// When the claim was indexed.
    pub claimed_at: DateTime<Utc>,
}

// =============================================================================
// Notifications
// =============================================================================

/// User-facing notification produced by the event pipeline.
///
/// Append-only; a separate read API marks notifications as read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Auction the notification concerns.
    pub auction: Address,
    /// Receiving account.
    pub recipient: Address,
    /// Human-readable message.
    pub message: String,
    /// Read flag, false at creation.
    pub read: bool,
    /// When the notification was created.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
