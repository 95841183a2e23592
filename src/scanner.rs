use crate::bindings::KeeperRegistryLogic20Events;
use crate::state::{EventMeta, RegistryIndex};
use ethers::abi::RawLog;
use ethers::contract::EthLogDecode;
use ethers::providers::Middleware;
use ethers::types::{Address, BlockNumber, Filter, Log};
use eyre::{eyre, Result};
use std::cmp;
use std::time::Duration;

/// Log chunk floor; below this a failing range is treated as a hard error.
const MIN_CHUNK: u64 = 10;

#[derive(Debug, Clone)]
pub struct AppliedEvent {
    pub meta: EventMeta,
    pub event: KeeperRegistryLogic20Events,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub from: u64,
    pub to: u64,
    pub applied: usize,
    /// Logs at the registry address that are not registry events.
    pub skipped: usize,
    pub events: Vec<AppliedEvent>,
}

/// Decode a raw log into a registry event plus its chain position.
///
/// Returns `None` for removed logs, pending logs and foreign topics.
pub fn decode_registry_log(log: &Log) -> Option<AppliedEvent> {
    if log.removed == Some(true) {
        return None;
    }
    let block = log.block_number?.as_u64();
    let log_index = log.log_index?.low_u64();

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let event = KeeperRegistryLogic20Events::decode_log(&raw).ok()?;
    Some(AppliedEvent {
        meta: EventMeta { block, log_index },
        event,
    })
}

pub async fn scan_registry_events<M: Middleware>(
    client: &M,
    registry: Address,
    start_block: u64,
    confirmations: u64,
    log_chunk_size: u64,
    index: &mut RegistryIndex,
) -> Result<ScanOutcome> {
    let latest = client
        .get_block_number()
        .await
        .map_err(|e| eyre!("eth_blockNumber failed: {e}"))?
        .as_u64();
    let target = latest.saturating_sub(confirmations);

    let from = index.last_scanned_block.saturating_add(1).max(start_block);

    if from > target {
        tracing::debug!(
            from,
            target,
            "no new blocks to scan (waiting for confirmations)"
        );
        return Ok(ScanOutcome {
            from,
            to: target,
            ..Default::default()
        });
    }

    let mut chunk = log_chunk_size.max(1);
    let mut outcome = ScanOutcome {
        from,
        to: target,
        ..Default::default()
    };

    tracing::info!(
        from,
        to = target,
        confirmations,
        chunk,
        "scanning registry logs"
    );

    let mut cursor = from;
    while cursor <= target {
        let end = cmp::min(cursor.saturating_add(chunk - 1), target);

        let logs = match fetch_logs_with_retries(client, registry, cursor, end).await {
            Ok(logs) => logs,
            Err(err) => {
                // Shrink range and retry; some RPCs reject wide getLogs ranges.
                if chunk <= MIN_CHUNK {
                    return Err(err);
                }
                chunk = cmp::max(MIN_CHUNK, chunk / 2);
                tracing::warn!(
                    cursor,
                    end,
                    chunk,
                    "log fetch failed; reducing chunk size and retrying"
                );
                continue;
            }
        };

        let mut decoded = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_registry_log(log) {
                Some(ev) => decoded.push(ev),
                None => {
                    outcome.skipped += 1;
                    tracing::debug!(
                        tx = ?log.transaction_hash,
                        topic0 = ?log.topics.first(),
                        "skipping non-registry or pending log"
                    );
                }
            }
        }
        decoded.sort_by_key(|ev| ev.meta);

        for ev in decoded {
            if index.apply(&ev.event, ev.meta) {
                outcome.applied += 1;
                outcome.events.push(ev);
            }
        }

        // Advance only after the chunk's events are folded in.
        index.last_scanned_block = end;
        cursor = end.saturating_add(1);
    }

    tracing::info!(
        applied = outcome.applied,
        skipped = outcome.skipped,
        last_scanned_block = index.last_scanned_block,
        upkeeps = index.upkeeps.len(),
        "scan complete"
    );

    Ok(outcome)
}

async fn fetch_logs_with_retries<M: Middleware>(
    client: &M,
    registry: Address,
    from: u64,
    to: u64,
) -> Result<Vec<Log>> {
    if from > to {
        return Err(eyre!("invalid log range: from({from}) > to({to})"));
    }

    let filter = Filter::new()
        .address(registry)
        .from_block(BlockNumber::Number(from.into()))
        .to_block(BlockNumber::Number(to.into()));

    // A few quick retries with exponential backoff help with flaky / rate-limited RPCs.
    let mut delay = Duration::from_millis(200);

    for attempt in 1..=3 {
        match client.get_logs(&filter).await {
            Ok(logs) => return Ok(logs),
            Err(err) => {
                if attempt == 3 {
                    return Err(eyre!("eth_getLogs [{from}, {to}] failed: {err}"));
                }
                tracing::warn!(
                    attempt,
                    from,
                    to,
                    sleep_ms = delay.as_millis() as u64,
                    error = %err,
                    "getLogs failed; retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
    }

    Err(eyre!("unreachable"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{UpkeepPausedFilter, UpkeepRegisteredFilter};
    use crate::state::UpkeepStatus;
    use ethers::abi::Token;
    use ethers::contract::EthEvent;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::{H256, U256, U64};

    fn id_topic(v: u64) -> H256 {
        let mut out = [0u8; 32];
        U256::from(v).to_big_endian(&mut out);
        H256(out)
    }

    fn registered_log(registry: Address, id: u64, block: u64, log_index: u64) -> Log {
        Log {
            address: registry,
            topics: vec![UpkeepRegisteredFilter::signature(), id_topic(id)],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(250_000u64)),
                Token::Address(Address::from_low_u64_be(0xad)),
            ])
            .into(),
            block_number: Some(U64::from(block)),
            log_index: Some(U256::from(log_index)),
            ..Default::default()
        }
    }

    fn paused_log(registry: Address, id: u64, block: u64, log_index: u64) -> Log {
        Log {
            address: registry,
            topics: vec![UpkeepPausedFilter::signature(), id_topic(id)],
            block_number: Some(U64::from(block)),
            log_index: Some(U256::from(log_index)),
            ..Default::default()
        }
    }

    #[test]
    fn decode_skips_pending_removed_and_foreign_logs() {
        let registry = Address::from_low_u64_be(0x1234);

        let mut pending = registered_log(registry, 1, 10, 0);
        pending.block_number = None;
        assert!(decode_registry_log(&pending).is_none());

        let mut removed = registered_log(registry, 1, 10, 0);
        removed.removed = Some(true);
        assert!(decode_registry_log(&removed).is_none());

        let mut foreign = registered_log(registry, 1, 10, 0);
        foreign.topics[0] = H256::repeat_byte(0x11);
        assert!(decode_registry_log(&foreign).is_none());

        let ok = decode_registry_log(&registered_log(registry, 1, 10, 4)).unwrap();
        assert_eq!(ok.meta, EventMeta { block: 10, log_index: 4 });
    }

    #[tokio::test]
    async fn scan_applies_events_in_chain_order_and_advances_cursor() {
        let registry = Address::from_low_u64_be(0x1234);
        let (provider, mock) = Provider::<MockProvider>::mocked();

        // MockProvider pops responses LIFO: push the last request's response first.
        let foreign = Log {
            address: registry,
            topics: vec![H256::repeat_byte(0x22)],
            block_number: Some(U64::from(101)),
            log_index: Some(U256::from(0)),
            ..Default::default()
        };
        mock.push::<Vec<Log>, _>(vec![
            paused_log(registry, 5, 102, 0),
            foreign,
            registered_log(registry, 5, 101, 1),
        ])
        .unwrap();
        mock.push::<U64, _>(U64::from(104)).unwrap();

        let mut index = RegistryIndex::new(100);
        let out = scan_registry_events(&provider, registry, 100, 2, 1_000, &mut index)
            .await
            .unwrap();

        assert_eq!(out.from, 100);
        assert_eq!(out.to, 102);
        assert_eq!(out.applied, 2);
        assert_eq!(out.skipped, 1);
        assert_eq!(index.last_scanned_block, 102);
        assert_eq!(
            index.get(U256::from(5)).unwrap().status,
            UpkeepStatus::Paused
        );
        assert!(!index.get(U256::from(5)).unwrap().partial);
    }

    #[tokio::test]
    async fn scan_waits_for_confirmations() {
        let registry = Address::from_low_u64_be(0x1234);
        let (provider, mock) = Provider::<MockProvider>::mocked();
        mock.push::<U64, _>(U64::from(101)).unwrap();

        let mut index = RegistryIndex::new(100);
        index.last_scanned_block = 100;
        let out = scan_registry_events(&provider, registry, 100, 2, 1_000, &mut index)
            .await
            .unwrap();

        assert_eq!(out.applied, 0);
        assert_eq!(index.last_scanned_block, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ranges_shrink_to_the_floor_before_erroring() {
        let registry = Address::from_low_u64_be(0x1234);
        let (provider, mock) = Provider::<MockProvider>::mocked();
        // Every eth_getLogs finds the queue empty and fails.
        mock.push::<U64, _>(U64::from(1_000)).unwrap();

        let mut index = RegistryIndex::new(100);
        let err = scan_registry_events(&provider, registry, 100, 0, 40, &mut index)
            .await
            .unwrap_err();

        // 40 -> 20 -> 10 blocks, three attempts each; the error names the floor-sized range.
        assert!(err.to_string().contains("eth_getLogs [100, 109] failed"), "{err}");
        assert_eq!(index.last_scanned_block, 99);
        assert!(index.upkeeps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn halved_chunks_resume_after_retries_are_exhausted() {
        let registry = Address::from_low_u64_be(0x1234);
        let (provider, mock) = Provider::<MockProvider>::mocked();

        // Requests: blockNumber, 3 failing getLogs over [100, 139], then [100, 119]
        // and [120, 139]. A JSON string does not decode as logs.
        mock.push::<Vec<Log>, _>(vec![paused_log(registry, 8, 130, 0)])
            .unwrap();
        mock.push::<Vec<Log>, _>(vec![registered_log(registry, 8, 105, 2)])
            .unwrap();
        for _ in 0..3 {
            mock.push::<String, _>("not logs".to_string()).unwrap();
        }
        mock.push::<U64, _>(U64::from(139)).unwrap();

        let mut index = RegistryIndex::new(100);
        let out = scan_registry_events(&provider, registry, 100, 0, 40, &mut index)
            .await
            .unwrap();

        assert_eq!(out.applied, 2);
        assert_eq!(index.last_scanned_block, 139);
        let rec = index.get(U256::from(8)).unwrap();
        assert_eq!(rec.status, UpkeepStatus::Paused);
        assert_eq!(rec.registered_at_block, Some(105));
    }
}
