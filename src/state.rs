use crate::bindings::KeeperRegistryLogic20Events as Ev;
use crate::types::IGNORE_ADDRESS;
use ethers::types::{Address, Bytes, U256};
use eyre::{eyre, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    path::Path,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum UpkeepStatus {
    Active,
    Paused,
    Canceled { at_block: u64 },
    Migrated { destination: Address },
}

impl UpkeepStatus {
    pub fn name(&self) -> &'static str {
        match self {
            UpkeepStatus::Active => "active",
            UpkeepStatus::Paused => "paused",
            UpkeepStatus::Canceled { .. } => "canceled",
            UpkeepStatus::Migrated { .. } => "migrated",
        }
    }

    /// Canceled and migrated upkeeps never come back on this registry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpkeepStatus::Canceled { .. } | UpkeepStatus::Migrated { .. }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportCounts {
    pub cancelled: u64,
    pub insufficient_funds: u64,
    pub reorged: u64,
    pub stale: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpkeepRecord {
    pub id: U256,
    pub status: UpkeepStatus,
    #[serde(default)]
    pub admin: Option<Address>,
    #[serde(default)]
    pub proposed_admin: Option<Address>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    /// LINK (juels) we believe the upkeep holds, derived from events only.
    pub balance: U256,
    #[serde(default)]
    pub check_data: Option<Bytes>,
    #[serde(default)]
    pub offchain_config: Option<Bytes>,
    pub performs: u64,
    pub failed_performs: u64,
    pub total_payment: U256,
    #[serde(default)]
    pub last_perform_block: Option<u64>,
    #[serde(default)]
    pub reports: ReportCounts,
    #[serde(default)]
    pub registered_at_block: Option<u64>,
    #[serde(default)]
    pub imported_from: Option<Address>,
    /// Set when the first event seen for this id was not its registration, so
    /// fields before the scan window are unknown.
    #[serde(default)]
    pub partial: bool,
}

impl UpkeepRecord {
    fn new(id: U256) -> Self {
        Self {
            id,
            status: UpkeepStatus::Active,
            admin: None,
            proposed_admin: None,
            gas_limit: None,
            balance: U256::zero(),
            check_data: None,
            offchain_config: None,
            performs: 0,
            failed_performs: 0,
            total_payment: U256::zero(),
            last_perform_block: None,
            reports: ReportCounts::default(),
            registered_at_block: None,
            imported_from: None,
            partial: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryView {
    #[serde(default)]
    pub owner: Option<Address>,
    #[serde(default)]
    pub proposed_owner: Option<Address>,
    pub paused: bool,
    /// transmitter -> payee, from the latest `PayeesUpdated` / payeeship transfers.
    #[serde(default)]
    pub payees: BTreeMap<String, Address>,
    /// transmitter -> proposed payee.
    #[serde(default)]
    pub proposed_payees: BTreeMap<String, Address>,
    #[serde(default)]
    pub owner_funds_withdrawn: U256,
}

/// Position of a log on chain, used to order and dedupe application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub block: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryIndex {
    /// The highest block number fully scanned for registry events.
    pub last_scanned_block: u64,

    /// Last applied log position; events at or before it are ignored on re-application.
    #[serde(default)]
    pub last_applied: Option<EventMeta>,

    #[serde(default)]
    pub registry: RegistryView,

    /// Upkeeps keyed by decimal id (ids are uint256, JSON keys must be strings).
    #[serde(default)]
    pub upkeeps: BTreeMap<String, UpkeepRecord>,
}

impl RegistryIndex {
    pub fn new(start_block: u64) -> Self {
        Self {
            last_scanned_block: start_block.saturating_sub(1),
            last_applied: None,
            registry: RegistryView::default(),
            upkeeps: BTreeMap::new(),
        }
    }

    pub fn load_or_init(path: impl AsRef<Path>, start_block: u64) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read_to_string(path)
                .map_err(|e| eyre!("failed to read index file {}: {e}", path.display()))?;
            let idx: RegistryIndex = serde_json::from_str(&raw)
                .map_err(|e| eyre!("failed to parse index file {}: {e}", path.display()))?;
            return Ok(idx);
        }

        let init = RegistryIndex::new(start_block);
        init.save(path)?;
        Ok(init)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    eyre!("failed to create index directory {}: {e}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| eyre!("failed to serialize registry index: {e}"))?;

        // Write to a temp file then rename so an interrupted save keeps the old index.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| {
            eyre!(
                "failed to write temp index file {}: {e}",
                tmp_path.display()
            )
        })?;

        // On Windows, rename fails if the destination exists.
        if let Err(err) = fs::rename(&tmp_path, path) {
            if cfg!(windows) {
                let _ = fs::remove_file(path);
                fs::rename(&tmp_path, path)
                    .map_err(|e| eyre!("failed to replace index file {}: {e}", path.display()))?;
            } else {
                return Err(eyre!(
                    "failed to replace index file {}: {err}",
                    path.display()
                ));
            }
        }
        Ok(())
    }

    /// Take an exclusive lock beside the index file so two writers never share it.
    ///
    /// The lock is held for as long as the returned handle lives.
    pub fn lock(path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    eyre!("failed to create index directory {}: {e}", parent.display())
                })?;
            }
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
        lock_file.try_lock_exclusive().map_err(|e| {
            eyre!(
                "index already in use or lock unavailable ({}): {e}",
                lock_path.display()
            )
        })?;
        Ok(lock_file)
    }

    pub fn get(&self, id: U256) -> Option<&UpkeepRecord> {
        self.upkeeps.get(&id.to_string())
    }

    /// Ids of upkeeps currently believed `Active`, in key order.
    pub fn active_ids(&self) -> Vec<U256> {
        self.upkeeps
            .values()
            .filter(|r| r.status == UpkeepStatus::Active)
            .map(|r| r.id)
            .collect()
    }

    fn upkeep_mut(&mut self, id: U256, creates: bool) -> &mut UpkeepRecord {
        self.upkeeps.entry(id.to_string()).or_insert_with(|| {
            let mut rec = UpkeepRecord::new(id);
            rec.partial = !creates;
            rec
        })
    }

    /// Fold one decoded registry event into the index.
    ///
    /// Returns `false` (and changes nothing) if the event is at or before the last
    /// applied position.
    pub fn apply(&mut self, event: &Ev, meta: EventMeta) -> bool {
        if let Some(last) = self.last_applied {
            if meta <= last {
                return false;
            }
        }
        self.last_applied = Some(meta);

        match event {
            Ev::UpkeepRegisteredFilter(e) => {
                let rec = self.upkeep_mut(e.id, true);
                rec.status = UpkeepStatus::Active;
                rec.gas_limit = Some(u64::from(e.execute_gas));
                rec.admin = Some(e.admin);
                rec.registered_at_block = Some(meta.block);
                rec.partial = false;
            }
            Ev::UpkeepReceivedFilter(e) => {
                let rec = self.upkeep_mut(e.id, true);
                rec.status = UpkeepStatus::Active;
                rec.balance = e.starting_balance;
                rec.imported_from = Some(e.imported_from);
                rec.registered_at_block = Some(meta.block);
                rec.partial = false;
            }
            Ev::UpkeepPausedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                if !rec.status.is_terminal() {
                    rec.status = UpkeepStatus::Paused;
                }
            }
            Ev::UpkeepUnpausedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                if !rec.status.is_terminal() {
                    rec.status = UpkeepStatus::Active;
                }
            }
            Ev::UpkeepCanceledFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.status = UpkeepStatus::Canceled {
                    at_block: e.at_block_height,
                };
            }
            Ev::UpkeepMigratedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.status = UpkeepStatus::Migrated {
                    destination: e.destination,
                };
                rec.balance = U256::zero();
            }
            Ev::FundsAddedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.balance = rec.balance.saturating_add(U256::from(e.amount));
            }
            Ev::FundsWithdrawnFilter(e) => {
                // withdrawFunds always drains the whole upkeep balance.
                let rec = self.upkeep_mut(e.id, false);
                rec.balance = U256::zero();
            }
            Ev::UpkeepPerformedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                let payment = U256::from(e.total_payment);
                rec.balance = rec.balance.saturating_sub(payment);
                rec.total_payment = rec.total_payment.saturating_add(payment);
                if e.success {
                    rec.performs += 1;
                } else {
                    rec.failed_performs += 1;
                }
                rec.last_perform_block = Some(meta.block);
            }
            Ev::UpkeepGasLimitSetFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.gas_limit = Some(u64::try_from(e.gas_limit).unwrap_or(u64::MAX));
            }
            Ev::UpkeepCheckDataUpdatedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.check_data = Some(e.new_check_data.clone());
            }
            Ev::UpkeepOffchainConfigSetFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.offchain_config = Some(e.offchain_config.clone());
            }
            Ev::UpkeepAdminTransferRequestedFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.proposed_admin = Some(e.to);
            }
            Ev::UpkeepAdminTransferredFilter(e) => {
                let rec = self.upkeep_mut(e.id, false);
                rec.admin = Some(e.to);
                rec.proposed_admin = None;
            }
            Ev::CancelledUpkeepReportFilter(e) => {
                self.upkeep_mut(e.id, false).reports.cancelled += 1;
            }
            Ev::InsufficientFundsUpkeepReportFilter(e) => {
                self.upkeep_mut(e.id, false).reports.insufficient_funds += 1;
            }
            Ev::ReorgedUpkeepReportFilter(e) => {
                self.upkeep_mut(e.id, false).reports.reorged += 1;
            }
            Ev::StaleUpkeepReportFilter(e) => {
                self.upkeep_mut(e.id, false).reports.stale += 1;
            }
            Ev::PausedFilter(_) => self.registry.paused = true,
            Ev::UnpausedFilter(_) => self.registry.paused = false,
            Ev::OwnershipTransferRequestedFilter(e) => {
                self.registry.proposed_owner = Some(e.to);
            }
            Ev::OwnershipTransferredFilter(e) => {
                self.registry.owner = Some(e.to);
                self.registry.proposed_owner = None;
            }
            Ev::PayeesUpdatedFilter(e) => {
                for (t, p) in e.transmitters.iter().zip(e.payees.iter()) {
                    if *p == IGNORE_ADDRESS {
                        continue;
                    }
                    self.registry.payees.insert(format!("{t:#x}"), *p);
                }
            }
            Ev::PayeeshipTransferRequestedFilter(e) => {
                self.registry
                    .proposed_payees
                    .insert(format!("{:#x}", e.transmitter), e.to);
            }
            Ev::PayeeshipTransferredFilter(e) => {
                let key = format!("{:#x}", e.transmitter);
                self.registry.proposed_payees.remove(&key);
                self.registry.payees.insert(key, e.to);
            }
            Ev::OwnerFundsWithdrawnFilter(e) => {
                self.registry.owner_funds_withdrawn = self
                    .registry
                    .owner_funds_withdrawn
                    .saturating_add(U256::from(e.amount));
            }
            Ev::PaymentWithdrawnFilter(_) => {}
        }
        true
    }
}
