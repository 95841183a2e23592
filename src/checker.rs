use crate::registry::Registry;
use crate::types::CheckResult;
use ethers::providers::Middleware;
use ethers::types::U256;
use futures::stream;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[derive(Debug, Default, Clone, Serialize)]
pub struct CheckStats {
    pub checked: usize,
    pub needed: usize,
    pub not_needed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpkeepCheck {
    pub id: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub stats: CheckStats,
    /// Sorted by upkeep id.
    pub results: Vec<UpkeepCheck>,
    /// Count per label ("needed", failure reason, or "error").
    pub by_reason: BTreeMap<String, usize>,
}

/// Simulate `checkUpkeep` for many upkeeps with bounded concurrency.
///
/// Per-upkeep RPC failures are recorded, not returned: one flaky call should not
/// hide the rest of the batch.
pub async fn check_upkeeps<M: Middleware + 'static>(
    registry: Arc<Registry<M>>,
    ids: Vec<U256>,
    max_concurrency: usize,
) -> CheckOutcome {
    let stats = Arc::new(AtomicStats::default());
    let results_out = Arc::new(tokio::sync::Mutex::new(Vec::<UpkeepCheck>::new()));

    stream::iter(ids)
        .for_each_concurrent(max_concurrency.max(1), |id| {
            let registry = registry.clone();
            let stats = stats.clone();
            let results_out = results_out.clone();
            async move {
                stats.checked.fetch_add(1, Ordering::Relaxed);

                let entry = match registry.check_upkeep(id).await {
                    Ok(res) => {
                        if res.upkeep_needed {
                            stats.needed.fetch_add(1, Ordering::Relaxed);
                            tracing::info!(
                                upkeep_id = %id,
                                gas_used = %res.gas_used,
                                perform_data_len = res.perform_data.len(),
                                "upkeep needed"
                            );
                        } else {
                            stats.not_needed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(upkeep_id = %id, reason = %res.label(), "upkeep not needed");
                        }
                        UpkeepCheck {
                            id,
                            result: Some(res),
                            error: None,
                        }
                    }
                    Err(err) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(upkeep_id = %id, error = %err, "checkUpkeep simulation failed");
                        UpkeepCheck {
                            id,
                            result: None,
                            error: Some(err.to_string()),
                        }
                    }
                };
                results_out.lock().await.push(entry);
            }
        })
        .await;

    let mut results = results_out.lock().await.clone();
    results.sort_by_key(|r| r.id);
    let by_reason = tally(&results);

    CheckOutcome {
        stats: stats.into_check_stats(),
        results,
        by_reason,
    }
}

fn tally(results: &[UpkeepCheck]) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for r in results {
        let label = match &r.result {
            Some(res) => res.label(),
            None => "error".to_string(),
        };
        *out.entry(label).or_insert(0) += 1;
    }
    out
}

#[derive(Debug, Default)]
struct AtomicStats {
    checked: AtomicUsize,
    needed: AtomicUsize,
    not_needed: AtomicUsize,
    failed: AtomicUsize,
}

impl AtomicStats {
    fn into_check_stats(self: Arc<Self>) -> CheckStats {
        CheckStats {
            checked: self.checked.load(Ordering::Relaxed),
            needed: self.needed.load(Ordering::Relaxed),
            not_needed: self.not_needed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TxOptions;
    use ethers::abi::Token;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::{Address, Bytes};

    fn check_return(needed: bool, reason: u8) -> Bytes {
        ethers::abi::encode(&[
            Token::Bool(needed),
            Token::Bytes(vec![]),
            Token::Uint(U256::from(reason)),
            Token::Uint(U256::from(40_000u64)),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
        ])
        .into()
    }

    #[test]
    fn tally_groups_by_label() {
        let ok = |needed, reason| {
            Some(CheckResult::from((
                needed,
                Bytes::default(),
                reason,
                U256::zero(),
                U256::zero(),
                U256::zero(),
            )))
        };
        let results = vec![
            UpkeepCheck { id: U256::from(1u64), result: ok(true, 0), error: None },
            UpkeepCheck { id: U256::from(2u64), result: ok(false, 2), error: None },
            UpkeepCheck { id: U256::from(3u64), result: ok(false, 2), error: None },
            UpkeepCheck { id: U256::from(4u64), result: None, error: Some("rpc".into()) },
        ];
        let t = tally(&results);
        assert_eq!(t.get("needed"), Some(&1));
        assert_eq!(t.get("upkeep-paused"), Some(&2));
        assert_eq!(t.get("error"), Some(&1));
    }

    #[tokio::test]
    async fn sequential_batch_records_results_and_failures() {
        let (provider, mock) = Provider::<MockProvider>::mocked();
        // With concurrency 1 ids are checked in order; LIFO mock: last id's response first.
        // The third request finds the queue empty and fails.
        mock.push::<Bytes, _>(check_return(false, 4)).unwrap();
        mock.push::<Bytes, _>(check_return(true, 0)).unwrap();

        let registry = Arc::new(Registry::new(
            Address::from_low_u64_be(0x5eed),
            Arc::new(provider),
            TxOptions::default(),
        ));
        let out = check_upkeeps(
            registry,
            vec![U256::from(10u64), U256::from(11u64), U256::from(12u64)],
            1,
        )
        .await;

        assert_eq!(out.stats.checked, 3);
        assert_eq!(out.stats.needed, 1);
        assert_eq!(out.stats.not_needed, 1);
        assert_eq!(out.stats.failed, 1);
        assert_eq!(out.results[0].id, U256::from(10u64));
        assert!(out.results[0].result.as_ref().unwrap().upkeep_needed);
        assert!(out.results[2].error.is_some());
        assert_eq!(out.by_reason.get("upkeep-not-needed"), Some(&1));
    }
}
