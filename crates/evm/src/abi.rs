//! Contract interfaces and log decoding for the auction protocol.

use alloy::{
    primitives::{B256, U256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};

use gavel_core::error::{ChainError, ChainResult};
use gavel_core::models::{Address, Amount, CommitmentHash};
use gavel_core::ports::{AuctionEvent, AuctionEventKind, CreationEvent};

sol! {
    /// Factory contract that deploys sealed-bid auction instances.
    #[derive(Debug)]
    interface IAuctionFactory {
        /// Emitted once per deployed auction instance.
        event AuctionCreated(
            address indexed auction,
            address indexed creator,
            address token,
            uint256 totalSupply,
            uint256 startPrice,
            uint256 endPrice,
            uint256 startTime
        );
    }
}

sol! {
    /// A deployed sealed-bid auction instance.
    #[derive(Debug)]
    interface ISealedAuction {
        /// Emitted when a bidder locks funds behind a sealed commitment.
        event CommitmentMade(
            address indexed bidder,
            bytes32 commitmentHash,
            uint256 lockedAmount
        );

        /// Emitted when a bidder discloses the quantity behind their commitment.
        event CommitmentRevealed(address indexed bidder, uint256 quantity);

        /// Emitted once when the auction clears at a uniform price.
        event AuctionCleared(
            uint256 clearingPrice,
            uint256 totalDemand,
            uint256 timestamp
        );

        /// Emitted when a winning bidder claims tokens and any overpayment.
        event TokensClaimed(address indexed bidder, uint256 amount, uint256 refund);

        /// Emitted when a losing bidder claims their locked funds back.
        event RefundClaimed(address indexed bidder, uint256 amount);
    }
}

/// Topic0 of the factory's creation event.
pub fn creation_signature() -> B256 {
    IAuctionFactory::AuctionCreated::SIGNATURE_HASH
}

/// Topic0 values of every auction instance event.
pub fn auction_event_signatures() -> Vec<B256> {
    vec![
        ISealedAuction::CommitmentMade::SIGNATURE_HASH,
        ISealedAuction::CommitmentRevealed::SIGNATURE_HASH,
        ISealedAuction::AuctionCleared::SIGNATURE_HASH,
        ISealedAuction::TokensClaimed::SIGNATURE_HASH,
        ISealedAuction::RefundClaimed::SIGNATURE_HASH,
    ]
}

// =============================================================================
// Log decoding
// =============================================================================

/// Decode a factory log into a creation event.
///
/// Factory subscriptions filter on the creation topic, so every log
/// handed here is expected to decode.
pub fn decode_creation_log(log: &Log) -> ChainResult<CreationEvent> {
    let (block_number, log_index) = log_position(log)?;
    let event = decode::<IAuctionFactory::AuctionCreated>(log)?;

    Ok(CreationEvent {
        auction: domain_address(event.auction),
        creator: domain_address(event.creator),
        token: domain_address(event.token),
        total_supply: domain_amount(event.totalSupply),
        start_price: domain_amount(event.startPrice),
        end_price: domain_amount(event.endPrice),
        start_time: unix_seconds(event.startTime, "startTime")?,
        block_number,
        log_index,
    })
}

/// Decode an auction instance log into an auction event.
///
/// Returns `Ok(None)` when the topic is not one of the five auction
/// events, so subscribers can ignore foreign logs without failing.
pub fn decode_auction_log(log: &Log) -> ChainResult<Option<AuctionEvent>> {
    let Some(topic) = log.inner.data.topics().first().copied() else {
        return Ok(None);
    };

    let kind = if topic == ISealedAuction::CommitmentMade::SIGNATURE_HASH {
        let event = decode::<ISealedAuction::CommitmentMade>(log)?;
        AuctionEventKind::CommitmentMade {
            bidder: domain_address(event.bidder),
            commitment_hash: CommitmentHash::from(event.commitmentHash.0),
            locked_amount: domain_amount(event.lockedAmount),
        }
    } else if topic == ISealedAuction::CommitmentRevealed::SIGNATURE_HASH {
        let event = decode::<ISealedAuction::CommitmentRevealed>(log)?;
        AuctionEventKind::CommitmentRevealed {
            bidder: domain_address(event.bidder),
            quantity: domain_amount(event.quantity),
        }
    } else if topic == ISealedAuction::AuctionCleared::SIGNATURE_HASH {
        let event = decode::<ISealedAuction::AuctionCleared>(log)?;
        AuctionEventKind::AuctionCleared {
            clearing_price: domain_amount(event.clearingPrice),
            total_demand: domain_amount(event.totalDemand),
            timestamp: unix_seconds(event.timestamp, "timestamp")?,
        }
    } else if topic == ISealedAuction::TokensClaimed::SIGNATURE_HASH {
        let event = decode::<ISealedAuction::TokensClaimed>(log)?;
        AuctionEventKind::TokensClaimed {
            bidder: domain_address(event.bidder),
            amount: domain_amount(event.amount),
            refund: domain_amount(event.refund),
        }
    } else if topic == ISealedAuction::RefundClaimed::SIGNATURE_HASH {
        let event = decode::<ISealedAuction::RefundClaimed>(log)?;
        AuctionEventKind::RefundClaimed {
            bidder: domain_address(event.bidder),
            amount: domain_amount(event.amount),
        }
    } else {
        return Ok(None);
    };

    let (block_number, log_index) = log_position(log)?;

    Ok(Some(AuctionEvent {
        auction: domain_address(log.inner.address),
        block_number,
        log_index,
        kind,
    }))
}

/// Widen a domain address into the alloy form used in filters.
pub fn evm_address(address: &Address) -> alloy::primitives::Address {
    alloy::primitives::Address::from(*address.as_bytes())
}

/// Decode one event type out of a log, naming it in the error.
fn decode<E: SolEvent>(log: &Log) -> ChainResult<E> {
    Ok(E::decode_log(&log.inner, true)
        .map_err(|e| ChainError::DecodeError(format!("{}: {e}", E::SIGNATURE)))?
        .data)
}

fn domain_address(address: alloy::primitives::Address) -> Address {
    Address::from(address.0.0)
}

fn domain_amount(value: U256) -> Amount {
    // uint256 always renders as a plain decimal string
    Amount::from_units(value)
}

fn unix_seconds(value: U256, field: &str) -> ChainResult<u64> {
    u64::try_from(value)
        .map_err(|_| ChainError::DecodeError(format!("{field} does not fit in u64: {value}")))
}

fn log_position(log: &Log) -> ChainResult<(u64, u64)> {
    match (log.block_number, log.log_index) {
        (Some(block_number), Some(log_index)) => Ok((block_number, log_index)),
        _ => Err(ChainError::DecodeError(
            "log carries no block number or log index".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address as EvmAddress, Bytes, Log as InnerLog, LogData};

    fn rpc_log(address: EvmAddress, data: LogData, block_number: u64, log_index: u64) -> Log {
        Log {
            inner: InnerLog { address, data },
            block_number: Some(block_number),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    #[test]
    fn creation_log_decodes_every_field() {
        let event = IAuctionFactory::AuctionCreated {
            auction: EvmAddress::repeat_byte(0xA1),
            creator: EvmAddress::repeat_byte(0xC1),
            token: EvmAddress::repeat_byte(0x70),
            totalSupply: U256::from(1_000_000u64),
            startPrice: U256::from(500u64),
            endPrice: U256::from(50u64),
            startTime: U256::from(1_700_000_000u64),
        };
        let log = rpc_log(EvmAddress::repeat_byte(0xFA), event.encode_log_data(), 12, 3);

        let creation = decode_creation_log(&log).unwrap();

        assert_eq!(creation.auction, Address::from([0xA1; 20]));
        assert_eq!(creation.creator, Address::from([0xC1; 20]));
        assert_eq!(creation.token, Address::from([0x70; 20]));
        assert_eq!(creation.total_supply.as_str(), "1000000");
        assert_eq!(creation.start_price.as_str(), "500");
        assert_eq!(creation.end_price.as_str(), "50");
        assert_eq!(creation.start_time, 1_700_000_000);
        assert_eq!((creation.block_number, creation.log_index), (12, 3));
    }

    // uint256 amounts must survive decoding without narrowing.
    #[test]
    fn creation_amounts_keep_full_uint256_width() {
        let supply = U256::MAX;
        let event = IAuctionFactory::AuctionCreated {
            auction: EvmAddress::repeat_byte(0xA1),
            creator: EvmAddress::repeat_byte(0xC1),
            token: EvmAddress::repeat_byte(0x70),
            totalSupply: supply,
            startPrice: U256::from(1u64),
            endPrice: U256::from(1u64),
            startTime: U256::from(1_700_000_000u64),
        };
        let log = rpc_log(EvmAddress::repeat_byte(0xFA), event.encode_log_data(), 1, 0);

        let creation = decode_creation_log(&log).unwrap();

        assert_eq!(creation.total_supply.as_str(), supply.to_string());
    }

    #[test]
    fn commitment_made_log_decodes() {
        let event = ISealedAuction::CommitmentMade {
            bidder: EvmAddress::repeat_byte(0xB1),
            commitmentHash: B256::repeat_byte(0x5E),
            lockedAmount: U256::from(777u64),
        };
        let log = rpc_log(EvmAddress::repeat_byte(0xA1), event.encode_log_data(), 9, 0);

        let decoded = decode_auction_log(&log).unwrap().unwrap();

        assert_eq!(decoded.auction, Address::from([0xA1; 20]));
        assert_eq!((decoded.block_number, decoded.log_index), (9, 0));
        match decoded.kind {
            AuctionEventKind::CommitmentMade {
                bidder,
                commitment_hash,
                locked_amount,
            } => {
                assert_eq!(bidder, Address::from([0xB1; 20]));
                assert_eq!(commitment_hash, CommitmentHash::from([0x5E; 32]));
                assert_eq!(locked_amount.as_str(), "777");
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn every_auction_event_kind_is_recognized() {
        let bidder = EvmAddress::repeat_byte(0xB1);
        let cases: Vec<(LogData, &str)> = vec![
            (
                ISealedAuction::CommitmentMade {
                    bidder,
                    commitmentHash: B256::repeat_byte(0x01),
                    lockedAmount: U256::from(1u64),
                }
                .encode_log_data(),
                "commitment_made",
            ),
            (
                ISealedAuction::CommitmentRevealed {
                    bidder,
                    quantity: U256::from(2u64),
                }
                .encode_log_data(),
                "commitment_revealed",
            ),
            (
                ISealedAuction::AuctionCleared {
                    clearingPrice: U256::from(3u64),
                    totalDemand: U256::from(4u64),
                    timestamp: U256::from(1_700_000_000u64),
                }
                .encode_log_data(),
                "auction_cleared",
            ),
            (
                ISealedAuction::TokensClaimed {
                    bidder,
                    amount: U256::from(5u64),
                    refund: U256::from(6u64),
                }
                .encode_log_data(),
                "tokens_claimed",
            ),
            (
                ISealedAuction::RefundClaimed {
                    bidder,
                    amount: U256::from(7u64),
                }
                .encode_log_data(),
                "refund_claimed",
            ),
        ];

        for (data, expected) in cases {
            let log = rpc_log(EvmAddress::repeat_byte(0xA9), data, 1, 0);
            let event = decode_auction_log(&log).unwrap().expect(expected);
            assert_eq!(event.kind.name(), expected);
        }
    }

    #[test]
    fn foreign_topic_is_skipped() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Bytes::new());
        let log = rpc_log(EvmAddress::repeat_byte(0xA1), data, 4, 1);

        assert!(decode_auction_log(&log).unwrap().is_none());
    }

    #[test]
    fn factory_log_with_wrong_event_is_a_decode_error() {
        let event = ISealedAuction::CommitmentRevealed {
            bidder: EvmAddress::repeat_byte(0xB1),
            quantity: U256::from(2u64),
        };
        let log = rpc_log(EvmAddress::repeat_byte(0xFA), event.encode_log_data(), 2, 0);

        assert!(matches!(
            decode_creation_log(&log),
            Err(ChainError::DecodeError(_))
        ));
    }

    // Pending logs carry no block position; the indexer never wants them.
    #[test]
    fn log_without_block_position_is_rejected() {
        let event = ISealedAuction::CommitmentRevealed {
            bidder: EvmAddress::repeat_byte(0xB1),
            quantity: U256::from(2u64),
        };
        let log = Log {
            inner: InnerLog {
                address: EvmAddress::repeat_byte(0xA1),
                data: event.encode_log_data(),
            },
            log_index: Some(0),
            ..Default::default()
        };

        assert!(matches!(
            decode_auction_log(&log),
            Err(ChainError::DecodeError(_))
        ));
    }

    #[test]
    fn clearing_timestamp_overflow_is_a_decode_error() {
        let event = ISealedAuction::AuctionCleared {
            clearingPrice: U256::from(10u64),
            totalDemand: U256::from(100u64),
            timestamp: U256::MAX,
        };
        let log = rpc_log(EvmAddress::repeat_byte(0xA1), event.encode_log_data(), 3, 0);

        assert!(matches!(
            decode_auction_log(&log),
            Err(ChainError::DecodeError(_))
        ));
    }
}
