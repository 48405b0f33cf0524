// =============================================================================
// Contract event ABI and decoding — the four order-lifecycle log topics
// =============================================================================
//
// Grounded on the pack's only real on-chain log-scanning code
// (`IMorpho`/`IERC4626` event decoding via `sol!` + `decode_log_data`):
// the event shapes are declared once via `alloy::sol!` and matched on
// `log.topic0()` against each event's `SIGNATURE_HASH`.
// =============================================================================

use alloy::primitives::{Address as AlloyAddress, B256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    event OrderCreated(
        uint256 indexed id,
        address indexed user,
        address tokenIn,
        address tokenOut,
        uint256 amountIn
    );

    event OrderExecuted(
        uint256 indexed id,
        address indexed executor,
        uint256 amountOut,
        uint256 timestamp
    );

    event OrderCancelled(uint256 indexed id, uint256 timestamp);

    event OrderModified(
        uint256 indexed id,
        uint256 targetPrice,
        uint256 minAmountOut,
        uint256 timestamp
    );
}

/// The four topics the projector subscribes to, in the fixed order spec
/// §4.8 lists them — used both to build fetch filters and for readable
/// logging.
pub const TOPICS: [&str; 4] = ["OrderCreated", "OrderExecuted", "OrderCancelled", "OrderModified"];

pub fn signature_hash(topic: &str) -> B256 {
    match topic {
        "OrderCreated" => OrderCreated::SIGNATURE_HASH,
        "OrderExecuted" => OrderExecuted::SIGNATURE_HASH,
        "OrderCancelled" => OrderCancelled::SIGNATURE_HASH,
        "OrderModified" => OrderModified::SIGNATURE_HASH,
        other => unreachable!("unknown projector topic: {other}"),
    }
}

/// A decoded log, normalized into the shape the applier needs regardless
/// of which of the four event types it was. `log_index`/`block_number`/
/// `tx_hash` are metadata carried alongside the decoded body for ordering
/// and ledger bookkeeping.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub block_number: i64,
    pub log_index: i64,
    pub tx_hash: String,
    pub body: EventBody,
}

#[derive(Debug, Clone)]
pub enum EventBody {
    Created {
        id: u64,
        user: String,
        token_in: String,
        token_out: String,
        amount_in_wei: String,
    },
    Executed {
        id: u64,
        executor: String,
        amount_out_wei: String,
        timestamp: i64,
    },
    Cancelled {
        id: u64,
        timestamp: i64,
    },
    Modified {
        id: u64,
        target_price_wei: String,
        min_amount_out_wei: String,
        timestamp: i64,
    },
}

impl EventBody {
    pub fn order_id(&self) -> u64 {
        match self {
            Self::Created { id, .. } | Self::Executed { id, .. } | Self::Cancelled { id, .. } | Self::Modified { id, .. } => *id,
        }
    }
}

fn addr_to_string(a: AlloyAddress) -> String {
    format!("{a:#x}")
}

/// Decode one fetched log. Returns `Err` (the log's raw hex data,
/// preserved for the poison-pill path) when the topic is unrecognized or
/// the ABI decode fails — callers still record the log as processed so a
/// single bad entry never stalls the cursor (spec §4.8 step 4).
pub fn decode(log: &Log) -> Result<DecodedLog, String> {
    let block_number = log.block_number.ok_or("log missing block_number")? as i64;
    let log_index = log.log_index.ok_or("log missing log_index")? as i64;
    let tx_hash = log
        .transaction_hash
        .map(|h| format!("{h:#x}"))
        .ok_or("log missing transaction_hash")?;

    let Some(topic0) = log.topic0() else {
        return Err("log missing topic0".to_string());
    };

    let body = if *topic0 == OrderCreated::SIGNATURE_HASH {
        let ev = OrderCreated::decode_log_data(&log.inner).map_err(|e| e.to_string())?;
        EventBody::Created {
            id: ev.id.try_into().unwrap_or(u64::MAX),
            user: addr_to_string(ev.user),
            token_in: addr_to_string(ev.tokenIn),
            token_out: addr_to_string(ev.tokenOut),
            amount_in_wei: ev.amountIn.to_string(),
        }
    } else if *topic0 == OrderExecuted::SIGNATURE_HASH {
        let ev = OrderExecuted::decode_log_data(&log.inner).map_err(|e| e.to_string())?;
        EventBody::Executed {
            id: ev.id.try_into().unwrap_or(u64::MAX),
            executor: addr_to_string(ev.executor),
            amount_out_wei: ev.amountOut.to_string(),
            timestamp: ev.timestamp.try_into().unwrap_or(0),
        }
    } else if *topic0 == OrderCancelled::SIGNATURE_HASH {
        let ev = OrderCancelled::decode_log_data(&log.inner).map_err(|e| e.to_string())?;
        EventBody::Cancelled { id: ev.id.try_into().unwrap_or(u64::MAX), timestamp: ev.timestamp.try_into().unwrap_or(0) }
    } else if *topic0 == OrderModified::SIGNATURE_HASH {
        let ev = OrderModified::decode_log_data(&log.inner).map_err(|e| e.to_string())?;
        EventBody::Modified {
            id: ev.id.try_into().unwrap_or(u64::MAX),
            target_price_wei: ev.targetPrice.to_string(),
            min_amount_out_wei: ev.minAmountOut.to_string(),
            timestamp: ev.timestamp.try_into().unwrap_or(0),
        }
    } else {
        return Err(format!("unrecognized topic0: {topic0:#x}"));
    };

    Ok(DecodedLog { block_number, log_index, tx_hash, body })
}

/// Sort logs by `(blockNumber, logIndex)` — mandatory before application,
/// per spec §4.8, since ordering across topics within a block must follow
/// `logIndex`.
pub fn sort_by_block_and_log_index(logs: &mut [DecodedLog]) {
    logs.sort_by_key(|l| (l.block_number, l.log_index));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_at(block: i64, log_index: i64, id: u64) -> DecodedLog {
        DecodedLog {
            block_number: block,
            log_index,
            tx_hash: "0xabc".to_string(),
            body: EventBody::Cancelled { id, timestamp: 0 },
        }
    }

    #[test]
    fn sort_orders_by_block_then_log_index() {
        // Scenario 3: CreatedLogIndex=3, ExecutedLogIndex=1 in the same
        // block must apply in logIndex order, i.e. index 1 before index 3.
        let mut logs = vec![log_at(10, 3, 7), log_at(10, 1, 7), log_at(9, 5, 1)];
        sort_by_block_and_log_index(&mut logs);
        assert_eq!((logs[0].block_number, logs[0].log_index), (9, 5));
        assert_eq!((logs[1].block_number, logs[1].log_index), (10, 1));
        assert_eq!((logs[2].block_number, logs[2].log_index), (10, 3));
    }
}
