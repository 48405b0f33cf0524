// =============================================================================
// Order/token contract caches — spec §4.8 "Caches"
// =============================================================================
//
// `OrderCreated` carries only the five fields Solidity actually logs
// (`id, user, tokenIn, tokenOut, amountIn`); everything else an Order row
// needs comes from an authenticated `trading.getOrder(id)` view call,
// cached by id so repeated lookups (e.g. a poison-pill retry) don't refetch
// chain state that cannot have changed for an already-created order.
// Grounded on `makeroftools-hypersdk-graphql`'s `ERC20::new(addr,
// provider.clone()).totalSupply().call()` contract-binding pattern, and on
// `event_processor.py`'s `_get_order_data_cached`/`contract_cache` dict.
// =============================================================================

use std::collections::HashMap;

use alloy::primitives::{Address as AlloyAddress, U256};
use alloy::providers::RootProvider;
use alloy::sol;
use parking_lot::Mutex;

use crate::error::{Error, Result};

sol! {
    #[sol(rpc)]
    interface ITrading {
        function getOrder(uint256 orderId) external view returns (
            uint256 id,
            address user,
            address tokenIn,
            address tokenOut,
            uint256 amountIn,
            uint256 targetPrice,
            uint256 minAmountOut,
            uint8 orderType,
            bool isLong,
            uint256 amountOut,
            uint256 createdAt,
            bool selfExecutable
        );
    }
}

/// The subset of `getOrder`'s return tuple a `CREATED` event needs to build
/// its `orders` row, in application-native shapes.
#[derive(Debug, Clone)]
pub struct CachedOrder {
    pub target_price_wei: String,
    pub min_amount_out_wei: String,
    pub order_type: u8,
    pub is_long: bool,
    pub self_executable: bool,
    pub created_at_ts: i64,
}

/// `token_cache: address→(symbol,decimals)` and `contract_cache:
/// id→raw_order_tuple`, both cleared on an hourly schedule so stale
/// token metadata or a bloated order cache never outlive the rest of the
/// process (spec §4.8). Never the source of truth — a cache miss always
/// falls through to a fresh chain read.
pub struct OrderCache {
    contract_cache: Mutex<HashMap<u64, CachedOrder>>,
    token_cache: Mutex<HashMap<String, (String, u8)>>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self { contract_cache: Mutex::new(HashMap::new()), token_cache: Mutex::new(HashMap::new()) }
    }

    /// Resolve order `id`'s authoritative tuple, via cache or a live
    /// `getOrder` call.
    pub async fn get_order(&self, provider: &RootProvider, trading_address: AlloyAddress, id: u64) -> Result<CachedOrder> {
        if let Some(cached) = self.contract_cache.lock().get(&id).cloned() {
            return Ok(cached);
        }

        let trading = ITrading::new(trading_address, provider.clone());
        let result = trading
            .getOrder(U256::from(id))
            .call()
            .await
            .map_err(|e| Error::Chain(format!("getOrder({id}) failed: {e}")))?;

        let cached = CachedOrder {
            target_price_wei: result.targetPrice.to_string(),
            min_amount_out_wei: result.minAmountOut.to_string(),
            order_type: result.orderType,
            is_long: result.isLong,
            self_executable: result.selfExecutable,
            created_at_ts: result.createdAt.try_into().unwrap_or(0),
        };
        self.contract_cache.lock().insert(id, cached.clone());
        Ok(cached)
    }

    /// Drop every cached entry. Called on a fixed hourly tick from the
    /// projector's poll loop wrapper — token metadata can change and the
    /// order cache should not grow unbounded across a long-lived process.
    pub fn clear(&self) {
        let mut contract_cache = self.contract_cache.lock();
        let mut token_cache = self.token_cache.lock();
        let cleared = contract_cache.len() + token_cache.len();
        contract_cache.clear();
        token_cache.clear();
        tracing::info!(cleared, "order/token contract cache cleared");
    }
}

impl Default for OrderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_empties_both_maps() {
        let cache = OrderCache::new();
        cache.contract_cache.lock().insert(
            1,
            CachedOrder {
                target_price_wei: "1".to_string(),
                min_amount_out_wei: "1".to_string(),
                order_type: 0,
                is_long: true,
                self_executable: false,
                created_at_ts: 0,
            },
        );
        cache.token_cache.lock().insert("0xabc".to_string(), ("USDT".to_string(), 6));
        cache.clear();
        assert!(cache.contract_cache.lock().is_empty());
        assert!(cache.token_cache.lock().is_empty());
    }
}
