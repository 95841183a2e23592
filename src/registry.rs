use crate::bindings::{KeeperRegistryLogic20, UpkeepRegisteredFilter};
use crate::link::LinkToken;
use crate::revert::contract_report;
use crate::types::{CheckResult, MigrationPermission, PaymentModel, PERFORM_GAS_MIN};
use ethers::abi::Detokenize;
use ethers::contract::{ContractCall, EthEvent};
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256, U64};
use eyre::{eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound of `addFunds(uint256,uint96)` amounts.
pub const MAX_UINT96: u128 = (1u128 << 96) - 1;

#[derive(Debug, Clone)]
pub struct TxOptions {
    pub gas_limit: Option<u64>,
    /// Fixed gas price in wei. When set, transactions go out as legacy (type 0).
    pub gas_price: Option<U256>,
    pub tx_timeout: Duration,
    pub simulate: bool,
    pub dry_run: bool,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            gas_limit: None,
            gas_price: None,
            tx_timeout: Duration::from_secs(120),
            simulate: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum TxStatus {
    Mined { block: Option<u64>, gas_used: Option<U256> },
    Reverted { block: Option<u64> },
    /// Sent, but no receipt within the timeout (or the receipt fetch failed).
    Pending,
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutcome {
    pub action: String,
    pub tx_hash: Option<H256>,
    #[serde(flatten)]
    pub status: TxStatus,
    #[serde(skip)]
    pub receipt: Option<TransactionReceipt>,
}

impl TxOutcome {
    fn dry_run(action: &str) -> Self {
        Self {
            action: action.to_string(),
            tx_hash: None,
            status: TxStatus::DryRun,
            receipt: None,
        }
    }

    /// Turn a mined revert into an error; everything else passes through.
    pub fn ensure_not_reverted(self) -> Result<Self> {
        if let TxStatus::Reverted { block } = self.status {
            return Err(eyre!(
                "{} tx {:?} mined but reverted (block {:?})",
                self.action,
                self.tx_hash,
                block
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryInfo {
    pub address: Address,
    pub owner: Address,
    pub link: Address,
    pub link_native_feed: Address,
    pub fast_gas_feed: Address,
    pub payment_model: PaymentModel,
}

#[derive(Debug, Clone)]
pub struct UpkeepRegistration {
    pub target: Address,
    pub gas_limit: u32,
    pub admin: Address,
    pub check_data: Bytes,
    pub offchain_config: Bytes,
}

/// Typed client over the generated binding.
///
/// Attach it at the main registry address: the registry delegates unknown selectors to
/// the logic contract, so both calls and events live there.
#[derive(Debug, Clone)]
pub struct Registry<M> {
    contract: KeeperRegistryLogic20<M>,
    client: Arc<M>,
    address: Address,
    opts: TxOptions,
}

pub fn validate_gas_limit(gas_limit: u32) -> Result<()> {
    if gas_limit < PERFORM_GAS_MIN {
        return Err(eyre!(
            "gas limit {gas_limit} is below the registry minimum {PERFORM_GAS_MIN}"
        ));
    }
    Ok(())
}

fn require_nonzero(field: &str, addr: Address) -> Result<()> {
    if addr.is_zero() {
        return Err(eyre!("{field} must not be the zero address"));
    }
    Ok(())
}

/// Pull the new upkeep id out of a registration receipt's logs.
pub fn upkeep_id_from_logs(logs: &[Log], registry: Address) -> Option<U256> {
    let topic0 = UpkeepRegisteredFilter::signature();
    logs.iter()
        .filter(|l| l.address == registry)
        .find(|l| l.topics.len() >= 2 && l.topics[0] == topic0)
        .map(|l| U256::from_big_endian(l.topics[1].as_bytes()))
}

/// Deploy a fresh logic contract and return it with its deployment receipt.
pub async fn deploy<M: Middleware + 'static>(
    client: Arc<M>,
    payment_model: PaymentModel,
    link: Address,
    link_native_feed: Address,
    fast_gas_feed: Address,
) -> Result<(KeeperRegistryLogic20<M>, TransactionReceipt)> {
    require_nonzero("link", link)?;
    require_nonzero("linkNativeFeed", link_native_feed)?;
    require_nonzero("fastGasFeed", fast_gas_feed)?;

    let deployer = KeeperRegistryLogic20::deploy(
        client,
        (u8::from(payment_model), link, link_native_feed, fast_gas_feed),
    )
    .map_err(|e| contract_report("failed to build deploy tx:", e))?;

    let (contract, receipt) = deployer
        .send_with_receipt()
        .await
        .map_err(|e| contract_report("deploy failed:", e))?;

    tracing::info!(
        address = ?contract.address(),
        tx = ?receipt.transaction_hash,
        block = receipt.block_number.map(|b| b.as_u64()),
        %payment_model,
        "registry logic deployed"
    );
    Ok((contract, receipt))
}

impl<M: Middleware + 'static> Registry<M> {
    pub fn new(address: Address, client: Arc<M>, opts: TxOptions) -> Self {
        Self {
            contract: KeeperRegistryLogic20::new(address, client.clone()),
            client,
            address,
            opts,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn contract(&self) -> &KeeperRegistryLogic20<M> {
        &self.contract
    }

    pub async fn info(&self) -> Result<RegistryInfo> {
        let owner = self.contract.owner();
        let link = self.contract.get_link_address();
        let link_native_feed = self.contract.get_link_native_feed_address();
        let fast_gas_feed = self.contract.get_fast_gas_feed_address();
        let payment_model = self.contract.get_payment_model();

        let (owner, link, link_native_feed, fast_gas_feed, payment_model) = futures::try_join!(
            owner.call(),
            link.call(),
            link_native_feed.call(),
            fast_gas_feed.call(),
            payment_model.call(),
        )
        .map_err(|e| contract_report("registry getters failed:", e))?;

        Ok(RegistryInfo {
            address: self.address,
            owner,
            link,
            link_native_feed,
            fast_gas_feed,
            payment_model: PaymentModel::try_from(payment_model)?,
        })
    }

    /// Simulate `checkUpkeep` as the off-chain nodes do: an eth_call with
    /// `tx.origin == address(0)`, which the registry requires.
    pub async fn check_upkeep(&self, id: U256) -> Result<CheckResult> {
        let raw = self
            .contract
            .check_upkeep(id)
            .from(Address::zero())
            .call()
            .await
            .map_err(|e| contract_report(format!("checkUpkeep({id})"), e))?;
        Ok(CheckResult::from(raw))
    }

    /// Simulate (optionally), send, and wait for the receipt.
    async fn submit<D: Detokenize>(
        &self,
        action: &str,
        mut call: ContractCall<M, D>,
    ) -> Result<TxOutcome> {
        if let Some(price) = self.opts.gas_price {
            call = call.legacy().gas_price(price);
        }

        if self.opts.simulate {
            // Final guardrail: eth_call first so reverts cost nothing.
            if let Err(err) = call.call().await {
                return Err(contract_report(format!("{action} simulation"), err));
            }
        }

        if self.opts.dry_run {
            tracing::info!(action, registry = ?self.address, "DRY RUN: would send tx");
            return Ok(TxOutcome::dry_run(action));
        }

        if let Some(gl) = self.opts.gas_limit {
            call = call.gas(U256::from(gl));
        }

        let pending = call
            .send()
            .await
            .map_err(|e| contract_report(format!("{action} send failed:"), e))?;
        let tx_hash = pending.tx_hash();
        tracing::info!(action, tx = ?tx_hash, "tx sent; waiting for receipt");

        let receipt_res = tokio::time::timeout(self.opts.tx_timeout, pending).await;

        let (status, receipt) = match receipt_res {
            Ok(Ok(Some(rcpt))) => {
                let block = rcpt.block_number.map(|b| b.as_u64());
                if rcpt.status == Some(U64::from(1)) {
                    tracing::info!(action, tx = ?tx_hash, block, "tx succeeded");
                    (
                        TxStatus::Mined {
                            block,
                            gas_used: rcpt.gas_used,
                        },
                        Some(rcpt),
                    )
                } else {
                    tracing::warn!(action, tx = ?tx_hash, block, "tx mined but reverted");
                    (TxStatus::Reverted { block }, Some(rcpt))
                }
            }
            Ok(Ok(None)) => {
                // Uncommon: provider dropped the tx from its pool.
                tracing::warn!(action, tx = ?tx_hash, "tx sent but no receipt available");
                (TxStatus::Pending, None)
            }
            Ok(Err(err)) => {
                tracing::warn!(action, tx = ?tx_hash, error = %err, "receipt error; tx may still land");
                (TxStatus::Pending, None)
            }
            Err(_) => {
                tracing::warn!(
                    action,
                    tx = ?tx_hash,
                    timeout_s = self.opts.tx_timeout.as_secs(),
                    "tx still pending after timeout"
                );
                (TxStatus::Pending, None)
            }
        };

        Ok(TxOutcome {
            action: action.to_string(),
            tx_hash: Some(tx_hash),
            status,
            receipt,
        })
    }

    // --- upkeep lifecycle ---

    /// Register an upkeep; returns the outcome and, once mined, the new upkeep id.
    pub async fn register_upkeep(
        &self,
        reg: UpkeepRegistration,
    ) -> Result<(TxOutcome, Option<U256>)> {
        validate_gas_limit(reg.gas_limit)?;
        require_nonzero("target", reg.target)?;
        require_nonzero("admin", reg.admin)?;

        let call = self.contract.register_upkeep(
            reg.target,
            reg.gas_limit,
            reg.admin,
            reg.check_data,
            reg.offchain_config,
        );
        let outcome = self.submit("registerUpkeep", call).await?.ensure_not_reverted()?;

        let id = match &outcome.receipt {
            Some(rcpt) => Some(upkeep_id_from_logs(&rcpt.logs, self.address).ok_or_else(
                || eyre!("registerUpkeep mined but no UpkeepRegistered log was found"),
            )?),
            None => None,
        };
        if let Some(id) = id {
            tracing::info!(upkeep_id = %id, target = ?reg.target, "upkeep registered");
        }
        Ok((outcome, id))
    }

    /// Fund an upkeep with LINK. The registry pulls the amount with transferFrom,
    /// so balance and allowance of the signer are checked first.
    pub async fn add_funds(&self, id: U256, amount: u128, approve: bool) -> Result<TxOutcome> {
        if amount == 0 {
            return Err(eyre!("amount must be > 0"));
        }
        if amount > MAX_UINT96 {
            return Err(eyre!("amount {amount} does not fit uint96 (max {MAX_UINT96})"));
        }
        let sender = self
            .client
            .default_sender()
            .ok_or_else(|| eyre!("add-funds needs a signer (no default sender)"))?;

        let link_address = self
            .contract
            .get_link_address()
            .call()
            .await
            .map_err(|e| contract_report("getLinkAddress failed:", e))?;
        let link = LinkToken::new(link_address, self.client.clone());
        let needed = U256::from(amount);

        let balance = link
            .balance_of(sender)
            .call()
            .await
            .map_err(|e| contract_report("LINK balanceOf failed:", e))?;
        if balance < needed {
            return Err(eyre!("insufficient LINK: balance {balance} < amount {needed}"));
        }

        let allowance = link
            .allowance(sender, self.address)
            .call()
            .await
            .map_err(|e| contract_report("LINK allowance failed:", e))?;
        if allowance < needed {
            if !approve {
                return Err(eyre!(
                    "insufficient LINK allowance {allowance} < amount {needed}; rerun with --approve"
                ));
            }
            tracing::info!(allowance = %allowance, amount = %needed, "approving registry to pull LINK");
            let approved = self
                .submit("approve", link.approve(self.address, needed))
                .await?
                .ensure_not_reverted()?;
            if approved.status == TxStatus::DryRun {
                // addFunds would not simulate without the approval on chain.
                return Ok(TxOutcome::dry_run("addFunds"));
            }
            if approved.status == TxStatus::Pending {
                return Err(eyre!(
                    "LINK approve {:?} still pending; retry add-funds once it is mined",
                    approved.tx_hash
                ));
            }
        }

        self.submit("addFunds", self.contract.add_funds(id, amount))
            .await
    }

    pub async fn cancel_upkeep(&self, id: U256) -> Result<TxOutcome> {
        self.submit("cancelUpkeep", self.contract.cancel_upkeep(id))
            .await
    }

    pub async fn pause_upkeep(&self, id: U256) -> Result<TxOutcome> {
        self.submit("pauseUpkeep", self.contract.pause_upkeep(id))
            .await
    }

    pub async fn unpause_upkeep(&self, id: U256) -> Result<TxOutcome> {
        self.submit("unpauseUpkeep", self.contract.unpause_upkeep(id))
            .await
    }

    pub async fn set_upkeep_gas_limit(&self, id: U256, gas_limit: u32) -> Result<TxOutcome> {
        validate_gas_limit(gas_limit)?;
        self.submit(
            "setUpkeepGasLimit",
            self.contract.set_upkeep_gas_limit(id, gas_limit),
        )
        .await
    }

    pub async fn set_upkeep_offchain_config(&self, id: U256, config: Bytes) -> Result<TxOutcome> {
        self.submit(
            "setUpkeepOffchainConfig",
            self.contract.set_upkeep_offchain_config(id, config),
        )
        .await
    }

    pub async fn update_check_data(&self, id: U256, check_data: Bytes) -> Result<TxOutcome> {
        self.submit(
            "updateCheckData",
            self.contract.update_check_data(id, check_data),
        )
        .await
    }

    pub async fn transfer_upkeep_admin(&self, id: U256, proposed: Address) -> Result<TxOutcome> {
        self.submit(
            "transferUpkeepAdmin",
            self.contract.transfer_upkeep_admin(id, proposed),
        )
        .await
    }

    pub async fn accept_upkeep_admin(&self, id: U256) -> Result<TxOutcome> {
        self.submit("acceptUpkeepAdmin", self.contract.accept_upkeep_admin(id))
            .await
    }

    /// Withdraw the full balance of a canceled upkeep.
    pub async fn withdraw_funds(&self, id: U256, to: Address) -> Result<TxOutcome> {
        require_nonzero("to", to)?;
        self.submit("withdrawFunds", self.contract.withdraw_funds(id, to))
            .await
    }

    pub async fn migrate_upkeeps(&self, ids: Vec<U256>, destination: Address) -> Result<TxOutcome> {
        if ids.is_empty() {
            return Err(eyre!("migrate needs at least one upkeep id"));
        }
        require_nonzero("destination", destination)?;
        self.submit(
            "migrateUpkeeps",
            self.contract.migrate_upkeeps(ids, destination),
        )
        .await
    }

    pub async fn receive_upkeeps(&self, encoded: Bytes) -> Result<TxOutcome> {
        if encoded.is_empty() {
            return Err(eyre!("encoded upkeeps payload is empty"));
        }
        self.submit("receiveUpkeeps", self.contract.receive_upkeeps(encoded))
            .await
    }

    // --- registry owner ---

    pub async fn pause(&self) -> Result<TxOutcome> {
        self.submit("pause", self.contract.pause()).await
    }

    pub async fn unpause(&self) -> Result<TxOutcome> {
        self.submit("unpause", self.contract.unpause()).await
    }

    pub async fn set_payees(&self, payees: Vec<Address>) -> Result<TxOutcome> {
        if payees.is_empty() {
            return Err(eyre!("set-payees needs at least one payee"));
        }
        self.submit("setPayees", self.contract.set_payees(payees))
            .await
    }

    pub async fn set_peer_registry_migration_permission(
        &self,
        peer: Address,
        permission: MigrationPermission,
    ) -> Result<TxOutcome> {
        require_nonzero("peer", peer)?;
        self.submit(
            "setPeerRegistryMigrationPermission",
            self.contract
                .set_peer_registry_migration_permission(peer, u8::from(permission)),
        )
        .await
    }

    pub async fn withdraw_owner_funds(&self) -> Result<TxOutcome> {
        self.submit("withdrawOwnerFunds", self.contract.withdraw_owner_funds())
            .await
    }

    pub async fn recover_funds(&self) -> Result<TxOutcome> {
        self.submit("recoverFunds", self.contract.recover_funds())
            .await
    }

    pub async fn transfer_ownership(&self, to: Address) -> Result<TxOutcome> {
        require_nonzero("to", to)?;
        self.submit("transferOwnership", self.contract.transfer_ownership(to))
            .await
    }

    pub async fn accept_ownership(&self) -> Result<TxOutcome> {
        self.submit("acceptOwnership", self.contract.accept_ownership())
            .await
    }

    // --- transmitter payees ---

    pub async fn transfer_payeeship(
        &self,
        transmitter: Address,
        proposed: Address,
    ) -> Result<TxOutcome> {
        self.submit(
            "transferPayeeship",
            self.contract.transfer_payeeship(transmitter, proposed),
        )
        .await
    }

    pub async fn accept_payeeship(&self, transmitter: Address) -> Result<TxOutcome> {
        self.submit("acceptPayeeship", self.contract.accept_payeeship(transmitter))
            .await
    }

    pub async fn withdraw_payment(&self, from: Address, to: Address) -> Result<TxOutcome> {
        require_nonzero("to", to)?;
        self.submit("withdrawPayment", self.contract.withdraw_payment(from, to))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;
    use ethers::contract::ContractError;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::Transaction;

    const REGISTRY: u64 = 0x5eed;
    const SENDER: u64 = 0xa11ce;

    fn registry_with_mock(opts: TxOptions) -> (Registry<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::<MockProvider>::mocked();
        let provider = provider
            .interval(Duration::from_millis(10))
            .with_sender(Address::from_low_u64_be(SENDER));
        let registry = Registry::new(
            Address::from_low_u64_be(REGISTRY),
            Arc::new(provider),
            opts,
        );
        (registry, mock)
    }

    #[test]
    fn gas_limit_floor_is_enforced() {
        assert!(validate_gas_limit(2_299).is_err());
        assert!(validate_gas_limit(PERFORM_GAS_MIN).is_ok());
        assert!(validate_gas_limit(5_000_000).is_ok());
    }

    #[test]
    fn upkeep_id_is_read_from_registry_log_only() {
        let registry = Address::from_low_u64_be(0x5eed);
        let mut id_bytes = [0u8; 32];
        U256::from(123_456u64).to_big_endian(&mut id_bytes);

        let foreign = Log {
            address: Address::from_low_u64_be(0xf00),
            topics: vec![UpkeepRegisteredFilter::signature(), H256::repeat_byte(0x99)],
            ..Default::default()
        };
        let ours = Log {
            address: registry,
            topics: vec![UpkeepRegisteredFilter::signature(), H256(id_bytes)],
            ..Default::default()
        };

        assert_eq!(
            upkeep_id_from_logs(&[foreign.clone(), ours], registry),
            Some(U256::from(123_456u64))
        );
        assert_eq!(upkeep_id_from_logs(&[foreign], registry), None);
    }

    #[tokio::test]
    async fn check_upkeep_decodes_return_tuple() {
        let (registry, mock) = registry_with_mock(TxOptions::default());
        let ret = ethers::abi::encode(&[
            Token::Bool(false),
            Token::Bytes(vec![]),
            Token::Uint(U256::from(4u64)),
            Token::Uint(U256::from(65_000u64)),
            Token::Uint(U256::from(30_000_000_000u64)),
            Token::Uint(U256::from(5_000_000_000_000_000u64)),
        ]);
        mock.push::<Bytes, _>(Bytes::from(ret)).unwrap();

        let res = registry.check_upkeep(U256::from(1u64)).await.unwrap();
        assert!(!res.upkeep_needed);
        assert_eq!(res.label(), "upkeep-not-needed");
        assert_eq!(res.gas_used, U256::from(65_000u64));
        assert_eq!(res.fast_gas_wei, U256::from(30_000_000_000u64));
    }

    #[tokio::test]
    async fn dry_run_without_simulation_sends_nothing() {
        let (registry, _mock) = registry_with_mock(TxOptions {
            simulate: false,
            dry_run: true,
            ..Default::default()
        });
        let out = registry.cancel_upkeep(U256::from(7u64)).await.unwrap();
        assert_eq!(out.status, TxStatus::DryRun);
        assert!(out.tx_hash.is_none());
        assert_eq!(out.action, "cancelUpkeep");
    }

    #[tokio::test]
    async fn client_side_validation_runs_before_rpc() {
        let (registry, _mock) = registry_with_mock(TxOptions::default());
        let err = registry
            .migrate_upkeeps(vec![], Address::from_low_u64_be(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least one upkeep id"));

        let err = registry
            .set_upkeep_gas_limit(U256::from(1u64), 100)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("below the registry minimum"));

        let err = registry
            .withdraw_funds(U256::from(1u64), Address::zero())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("zero address"));
    }

    #[test]
    fn reverted_outcome_becomes_error() {
        let out = TxOutcome {
            action: "pauseUpkeep".into(),
            tx_hash: Some(H256::repeat_byte(1)),
            status: TxStatus::Reverted { block: Some(9) },
            receipt: None,
        };
        assert!(out.ensure_not_reverted().is_err());
    }

    /// Fixed gas and legacy pricing, so sending needs no estimation round trips.
    fn sending_opts() -> TxOptions {
        TxOptions {
            gas_limit: Some(300_000),
            gas_price: Some(U256::from(1_000_000_000u64)),
            tx_timeout: Duration::from_secs(5),
            simulate: false,
            dry_run: false,
        }
    }

    /// Queue eth_sendTransaction, eth_getTransactionByHash and eth_getTransactionReceipt
    /// responses. MockProvider is LIFO, so the receipt goes in first.
    fn push_mined(mock: &MockProvider, hash: H256, status: u64, logs: Vec<Log>) {
        mock.push::<TransactionReceipt, _>(TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(7)),
            gas_used: Some(U256::from(52_000u64)),
            status: Some(U64::from(status)),
            logs,
            ..Default::default()
        })
        .unwrap();
        mock.push::<Transaction, _>(Transaction {
            hash,
            block_number: Some(U64::from(7)),
            ..Default::default()
        })
        .unwrap();
        mock.push::<H256, _>(hash).unwrap();
    }

    fn word_address(a: Address) -> Bytes {
        ethers::abi::encode(&[Token::Address(a)]).into()
    }

    fn word_uint(v: u128) -> Bytes {
        ethers::abi::encode(&[Token::Uint(U256::from(v))]).into()
    }

    /// Responses for getLinkAddress, balanceOf and allowance, pushed in reverse.
    fn push_link_state(mock: &MockProvider, balance: u128, allowance: u128) {
        mock.push::<Bytes, _>(word_uint(allowance)).unwrap();
        mock.push::<Bytes, _>(word_uint(balance)).unwrap();
        mock.push::<Bytes, _>(word_address(Address::from_low_u64_be(0x11c))).unwrap();
    }

    fn registration() -> UpkeepRegistration {
        UpkeepRegistration {
            target: Address::from_low_u64_be(0x7a7),
            gas_limit: 500_000,
            admin: Address::from_low_u64_be(SENDER),
            check_data: Bytes::default(),
            offchain_config: Bytes::default(),
        }
    }

    #[tokio::test]
    async fn rpc_failures_keep_the_contract_error_as_source() {
        let (registry, _mock) = registry_with_mock(TxOptions::default());
        let err = registry.check_upkeep(U256::from(1u64)).await.unwrap_err();

        assert!(err.to_string().starts_with("checkUpkeep(1)"));
        assert!(err
            .downcast_ref::<ContractError<Provider<MockProvider>>>()
            .is_some());
    }

    #[tokio::test]
    async fn simulated_then_mined_tx_reports_block_and_gas() {
        let (registry, mock) = registry_with_mock(TxOptions {
            simulate: true,
            ..sending_opts()
        });
        let hash = H256::repeat_byte(0xab);
        push_mined(&mock, hash, 1, vec![]);
        // The eth_call simulation runs first.
        mock.push::<Bytes, _>(Bytes::default()).unwrap();

        let out = registry.cancel_upkeep(U256::from(3u64)).await.unwrap();
        assert_eq!(out.action, "cancelUpkeep");
        assert_eq!(out.tx_hash, Some(hash));
        assert_eq!(
            out.status,
            TxStatus::Mined {
                block: Some(7),
                gas_used: Some(U256::from(52_000u64)),
            }
        );
        assert!(out.receipt.is_some());
    }

    #[tokio::test]
    async fn failed_receipt_status_is_reverted() {
        let (registry, mock) = registry_with_mock(sending_opts());
        push_mined(&mock, H256::repeat_byte(0x0e), 0, vec![]);

        let out = registry.pause_upkeep(U256::from(3u64)).await.unwrap();
        assert_eq!(out.status, TxStatus::Reverted { block: Some(7) });
        assert!(out.ensure_not_reverted().is_err());
    }

    #[tokio::test]
    async fn missing_receipt_within_timeout_is_pending() {
        let (registry, mock) = registry_with_mock(TxOptions {
            tx_timeout: Duration::from_millis(300),
            ..sending_opts()
        });
        let hash = H256::repeat_byte(0x42);
        mock.push::<H256, _>(hash).unwrap();

        let out = registry.unpause_upkeep(U256::from(3u64)).await.unwrap();
        assert_eq!(out.status, TxStatus::Pending);
        assert_eq!(out.tx_hash, Some(hash));
        assert!(out.receipt.is_none());
    }

    #[tokio::test]
    async fn register_reads_upkeep_id_from_receipt() {
        let (registry, mock) = registry_with_mock(sending_opts());
        let mut id_bytes = [0u8; 32];
        U256::from(77u64).to_big_endian(&mut id_bytes);
        let registered = Log {
            address: Address::from_low_u64_be(REGISTRY),
            topics: vec![UpkeepRegisteredFilter::signature(), H256(id_bytes)],
            data: ethers::abi::encode(&[
                Token::Uint(U256::from(500_000u64)),
                Token::Address(Address::from_low_u64_be(SENDER)),
            ])
            .into(),
            ..Default::default()
        };
        push_mined(&mock, H256::repeat_byte(0x01), 1, vec![registered]);

        let (out, id) = registry.register_upkeep(registration()).await.unwrap();
        assert!(matches!(out.status, TxStatus::Mined { .. }));
        assert_eq!(id, Some(U256::from(77u64)));
    }

    #[tokio::test]
    async fn register_without_registered_log_is_an_error() {
        let (registry, mock) = registry_with_mock(sending_opts());
        push_mined(&mock, H256::repeat_byte(0x02), 1, vec![]);

        let err = registry.register_upkeep(registration()).await.unwrap_err();
        assert!(err.to_string().contains("no UpkeepRegistered log"));
    }

    #[tokio::test]
    async fn add_funds_checks_balance_then_allowance() {
        let (registry, mock) = registry_with_mock(sending_opts());

        // Only getLinkAddress and balanceOf are reached when the balance is short.
        mock.push::<Bytes, _>(word_uint(10)).unwrap();
        mock.push::<Bytes, _>(word_address(Address::from_low_u64_be(0x11c)))
            .unwrap();
        let err = registry
            .add_funds(U256::from(1u64), 100, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient LINK: balance 10"));

        push_link_state(&mock, 1_000, 5);
        let err = registry
            .add_funds(U256::from(1u64), 100, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rerun with --approve"));
    }

    #[tokio::test]
    async fn add_funds_rejects_amounts_above_uint96() {
        let (registry, _mock) = registry_with_mock(sending_opts());
        let err = registry
            .add_funds(U256::from(1u64), MAX_UINT96 + 1, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not fit uint96"));
    }

    #[tokio::test]
    async fn dry_run_approve_stops_before_add_funds() {
        let (registry, mock) = registry_with_mock(TxOptions {
            dry_run: true,
            ..sending_opts()
        });
        push_link_state(&mock, 1_000, 0);

        let out = registry
            .add_funds(U256::from(1u64), 100, true)
            .await
            .unwrap();
        assert_eq!(out.action, "addFunds");
        assert_eq!(out.status, TxStatus::DryRun);
    }

    #[tokio::test]
    async fn pending_approve_is_an_error() {
        let (registry, mock) = registry_with_mock(TxOptions {
            tx_timeout: Duration::from_millis(300),
            ..sending_opts()
        });
        // Sent after the three reads; no receipt ever arrives.
        mock.push::<H256, _>(H256::repeat_byte(0x0a)).unwrap();
        push_link_state(&mock, 1_000, 0);

        let err = registry
            .add_funds(U256::from(1u64), 100, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still pending"));
    }
}
