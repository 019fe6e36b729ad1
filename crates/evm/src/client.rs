//! EVM WebSocket client for factory and auction log streams.

use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, instrument, warn};

use gavel_core::error::{ChainError, ChainResult};
use gavel_core::metrics::record_decode_error;
use gavel_core::models::Address;
use gavel_core::ports::{
    AuctionEvent, AuctionEventStream, CreationEvent, CreationStream, EventSource,
};

use crate::abi;

/// Configuration for the EVM client.
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// WebSocket URL (e.g., "ws://localhost:8545").
    pub ws_url: String,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8545".to_string(),
        }
    }
}

/// EVM client adapter implementing the EventSource port.
pub struct EvmClient {
    provider: RootProvider<PubSubFrontend>,
}

impl EvmClient {
    /// Connect to an EVM node over WebSocket.
    #[instrument(skip_all, fields(url = %config.ws_url))]
    pub async fn connect(config: EvmClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let provider: RootProvider<PubSubFrontend> = ProviderBuilder::new()
            .on_ws(WsConnect::new(config.ws_url.as_str()))
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!("Connected successfully");

        Ok(Self { provider })
    }
}

#[async_trait]
impl EventSource for EvmClient {
    async fn chain_id(&self) -> ChainResult<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    async fn latest_block(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    async fn subscribe_creations(&self, factory: &Address) -> ChainResult<CreationStream> {
        let subscription = self
            .provider
            .subscribe_logs(&creation_filter(factory))
            .await
            .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let stream = subscription
            .into_stream()
            .filter_map(|log| async move { decode_creation(&log).map(Ok) });

        Ok(Box::pin(stream))
    }

    async fn subscribe_auction_events(&self, auction: &Address) -> ChainResult<AuctionEventStream> {
        let subscription = self
            .provider
            .subscribe_logs(&auction_filter(auction))
            .await
            .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let stream = subscription
            .into_stream()
            .filter_map(|log| async move { decode_auction(&log).map(Ok) });

        Ok(Box::pin(stream))
    }

    async fn fetch_creations(
        &self,
        factory: &Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<CreationEvent>> {
        let filter = creation_filter(factory)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(logs.iter().filter_map(decode_creation).collect())
    }

    async fn fetch_auction_events(
        &self,
        auction: &Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<AuctionEvent>> {
        let filter = auction_filter(auction)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        Ok(logs.iter().filter_map(decode_auction).collect())
    }
}

// =============================================================================
// Filters and log decoding
// =============================================================================

/// Filter matching the factory's creation event.
fn creation_filter(factory: &Address) -> Filter {
    Filter::new()
        .address(abi::evm_address(factory))
        .event_signature(abi::creation_signature())
}

/// Filter matching the five auction instance events.
fn auction_filter(auction: &Address) -> Filter {
    Filter::new()
        .address(abi::evm_address(auction))
        .event_signature(abi::auction_event_signatures())
}

/// Decode a factory log, dropping ones that fail.
fn decode_creation(log: &Log) -> Option<CreationEvent> {
    match abi::decode_creation_log(log) {
        Ok(creation) => Some(creation),
        Err(e) => {
            warn!(error = %e, "Dropping undecodable factory log");
            record_decode_error("factory");
            None
        }
    }
}

/// Decode an auction instance log, dropping ones that fail.
fn decode_auction(log: &Log) -> Option<AuctionEvent> {
    match abi::decode_auction_log(log) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Dropping undecodable auction log");
            record_decode_error("auction");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_filter_pins_factory_address_and_topic() {
        let factory = Address::from([0x11; 20]);
        let filter = creation_filter(&factory);

        assert!(filter.address.matches(&abi::evm_address(&factory)));
        assert!(filter.topics[0].matches(&abi::creation_signature()));
    }

    #[test]
    fn auction_filter_covers_all_five_events() {
        let auction = Address::from([0x22; 20]);
        let filter = auction_filter(&auction);

        assert!(filter.address.matches(&abi::evm_address(&auction)));
        for signature in abi::auction_event_signatures() {
            assert!(filter.topics[0].matches(&signature));
        }
        assert!(!filter.topics[0].matches(&abi::creation_signature()));
    }
}
