//! Shared helper functions for PostgreSQL row conversion.

use gavel_core::error::{StorageError, StorageResult};
use gavel_core::models::{Address, Amount, CommitmentHash};

/// Convert a `Vec<u8>` to a 20-byte address.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_address(bytes: Vec<u8>, field_name: &str) -> StorageResult<Address> {
    let arr: [u8; 20] = bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 20, got {}",
            field_name,
            v.len()
        ))
    })?;
    Ok(Address(arr))
}

/// Convert an optional `Vec<u8>` to an optional 32-byte commitment hash.
pub fn bytes_to_optional_hash(
    bytes: Option<Vec<u8>>,
    field_name: &str,
) -> StorageResult<Option<CommitmentHash>> {
    match bytes {
        Some(b) => {
            let arr: [u8; 32] = b.try_into().map_err(|v: Vec<u8>| {
                StorageError::SerializationError(format!(
                    "{} has invalid length: expected 32, got {}",
                    field_name,
                    v.len()
                ))
            })?;
            Ok(Some(CommitmentHash(arr)))
        }
        None => Ok(None),
    }
}

/// Parse a `NUMERIC` column selected as `::TEXT` into an [`Amount`].
pub fn amount_from_text(text: String, field_name: &str) -> StorageResult<Amount> {
    Amount::parse(&text).map_err(|_| {
        StorageError::SerializationError(format!(
            "{} is not a valid decimal amount: {:?}",
            field_name, text
        ))
    })
}

/// Parse an optional `NUMERIC` column selected as `::TEXT`.
pub fn optional_amount_from_text(
    text: Option<String>,
    field_name: &str,
) -> StorageResult<Option<Amount>> {
    match text {
        Some(t) => Ok(Some(amount_from_text(t, field_name)?)),
        None => Ok(None),
    }
}

/// Map a sqlx error onto the storage error taxonomy.
///
/// Foreign key violations get their own variant: they mark events whose
/// auction the store does not know, which callers drop instead of
/// retrying.
pub fn map_query_err(e: sqlx::Error) -> StorageError {
    if let Some(db_err) = e.as_database_error()
        && matches!(db_err.kind(), sqlx::error::ErrorKind::ForeignKeyViolation)
    {
        let constraint = db_err.constraint().unwrap_or("unknown").to_string();
        return StorageError::ConstraintViolation(constraint);
    }
    StorageError::QueryError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: erreurs incluent le nom du champ pour debug
    #[test]
    fn test_error_includes_field_name() {
        let bad_bytes = vec![1u8; 16]; // mauvaise longueur
        let err = bytes_to_address(bad_bytes, "auction.creator").unwrap_err();
        assert!(err.to_string().contains("auction.creator"));
        assert!(err.to_string().contains("expected 20"));
    }

    #[test]
    fn test_amount_roundtrip_through_text() {
        let amount = amount_from_text("340282366920938463463374607431768211456".into(), "x")
            .expect("valid uint256 text");
        assert_eq!(amount.as_str(), "340282366920938463463374607431768211456");
    }

    // Test critique: une colonne corrompue ne doit pas passer pour un montant
    #[test]
    fn test_amount_rejects_non_decimal_text() {
        let err = amount_from_text("1.5e10".into(), "settlement.refund_amount").unwrap_err();
        assert!(matches!(err, StorageError::SerializationError(_)));
        assert!(err.to_string().contains("settlement.refund_amount"));
    }

    #[test]
    fn test_optional_hash_passes_none_through() {
        assert_eq!(bytes_to_optional_hash(None, "x").unwrap(), None);
        let hash = bytes_to_optional_hash(Some(vec![0xAB; 32]), "x").unwrap();
        assert_eq!(hash, Some(CommitmentHash([0xAB; 32])));
    }
}
