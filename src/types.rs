use ethers::types::{Address, Bytes, H160, U256};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel in `setPayees` / `PayeesUpdated` meaning "keep the current payee".
pub const IGNORE_ADDRESS: Address = H160([0xff; 20]);

/// Lower bound the registry enforces on an upkeep's perform gas limit.
pub const PERFORM_GAS_MIN: u32 = 2_300;

/// `KeeperRegistryBase2_0.PaymentModel`: selects how L1 data fees are priced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PaymentModel {
    Default,
    Arbitrum,
    Optimism,
}

impl TryFrom<u8> for PaymentModel {
    type Error = eyre::Report;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Default),
            1 => Ok(Self::Arbitrum),
            2 => Ok(Self::Optimism),
            other => Err(eyre!("unknown payment model {other}")),
        }
    }
}

impl From<PaymentModel> for u8 {
    fn from(v: PaymentModel) -> Self {
        v as u8
    }
}

impl FromStr for PaymentModel {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "default" | "0" => Ok(Self::Default),
            "arbitrum" | "1" => Ok(Self::Arbitrum),
            "optimism" | "2" => Ok(Self::Optimism),
            _ => Err(eyre!(
                "invalid payment model '{s}' (expected default, arbitrum or optimism)"
            )),
        }
    }
}

impl fmt::Display for PaymentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Arbitrum => "arbitrum",
            Self::Optimism => "optimism",
        };
        f.write_str(s)
    }
}

/// `KeeperRegistryBase2_0.MigrationPermission` for a peer registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MigrationPermission {
    None,
    Outgoing,
    Incoming,
    Bidirectional,
}

impl TryFrom<u8> for MigrationPermission {
    type Error = eyre::Report;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Outgoing),
            2 => Ok(Self::Incoming),
            3 => Ok(Self::Bidirectional),
            other => Err(eyre!("unknown migration permission {other}")),
        }
    }
}

impl From<MigrationPermission> for u8 {
    fn from(v: MigrationPermission) -> Self {
        v as u8
    }
}

impl FromStr for MigrationPermission {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "none" | "0" => Ok(Self::None),
            "outgoing" | "1" => Ok(Self::Outgoing),
            "incoming" | "2" => Ok(Self::Incoming),
            "bidirectional" | "3" => Ok(Self::Bidirectional),
            _ => Err(eyre!(
                "invalid migration permission '{s}' (expected none, outgoing, incoming or bidirectional)"
            )),
        }
    }
}

/// Reason code returned by `checkUpkeep` alongside `upkeepNeeded == false`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum UpkeepFailureReason {
    None,
    UpkeepCancelled,
    UpkeepPaused,
    TargetCheckReverted,
    UpkeepNotNeeded,
    PerformDataExceedsLimit,
    InsufficientBalance,
}

impl TryFrom<u8> for UpkeepFailureReason {
    type Error = eyre::Report;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::UpkeepCancelled),
            2 => Ok(Self::UpkeepPaused),
            3 => Ok(Self::TargetCheckReverted),
            4 => Ok(Self::UpkeepNotNeeded),
            5 => Ok(Self::PerformDataExceedsLimit),
            6 => Ok(Self::InsufficientBalance),
            other => Err(eyre!("unknown upkeep failure reason {other}")),
        }
    }
}

impl fmt::Display for UpkeepFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::UpkeepCancelled => "upkeep-cancelled",
            Self::UpkeepPaused => "upkeep-paused",
            Self::TargetCheckReverted => "target-check-reverted",
            Self::UpkeepNotNeeded => "upkeep-not-needed",
            Self::PerformDataExceedsLimit => "perform-data-exceeds-limit",
            Self::InsufficientBalance => "insufficient-balance",
        };
        f.write_str(s)
    }
}

/// Decoded `checkUpkeep` return tuple.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub upkeep_needed: bool,
    pub perform_data: Bytes,
    /// `Err(code)` keeps reason codes this client does not know about.
    #[serde(serialize_with = "serialize_reason")]
    pub failure_reason: std::result::Result<UpkeepFailureReason, u8>,
    pub gas_used: U256,
    pub fast_gas_wei: U256,
    pub link_native: U256,
}

impl From<(bool, Bytes, u8, U256, U256, U256)> for CheckResult {
    fn from(v: (bool, Bytes, u8, U256, U256, U256)) -> Self {
        let (upkeep_needed, perform_data, reason, gas_used, fast_gas_wei, link_native) = v;
        Self {
            upkeep_needed,
            perform_data,
            failure_reason: UpkeepFailureReason::try_from(reason).map_err(|_| reason),
            gas_used,
            fast_gas_wei,
            link_native,
        }
    }
}

impl CheckResult {
    /// Short label for aggregation: "needed", a failure reason, or "reason-<code>".
    pub fn label(&self) -> String {
        if self.upkeep_needed {
            return "needed".to_string();
        }
        match self.failure_reason {
            Ok(r) => r.to_string(),
            Err(code) => format!("reason-{code}"),
        }
    }
}

fn serialize_reason<S: serde::Serializer>(
    v: &std::result::Result<UpkeepFailureReason, u8>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match v {
        Ok(r) => s.serialize_str(&r.to_string()),
        Err(code) => s.serialize_u8(*code),
    }
}

/// Parse a uint256 from decimal, or hex with a `0x` prefix.
///
/// Upkeep ids are large decimal numbers in most tooling, while `U256::from_str` reads hex.
pub fn parse_u256(s: &str) -> Result<U256> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| eyre!("invalid hex uint256 '{s}': {e}")),
        None => U256::from_dec_str(s).map_err(|e| eyre!("invalid uint256 '{s}': {e}")),
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['_', ' '], "-")
}
