use crate::bindings::{KeeperRegistryLogic20Errors, KEEPERREGISTRYLOGIC20_ABI};
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::contract::ContractError;
use ethers::providers::Middleware;

/// Decode raw revert data (selector + args) into a registry custom error.
pub fn decode_revert_data(data: &[u8]) -> Option<KeeperRegistryLogic20Errors> {
    if data.len() < 4 {
        return None;
    }
    KeeperRegistryLogic20Errors::decode(data).ok()
}

/// Name of the registry custom error whose selector starts `data`.
pub fn registry_error_name(data: &[u8]) -> Option<&'static str> {
    let selector = data.get(..4)?;
    KEEPERREGISTRYLOGIC20_ABI
        .errors()
        .find(|e| &e.signature().as_bytes()[..4] == selector)
        .map(|e| e.name.as_str())
}

/// Human-readable rendering of a registry custom error.
pub fn describe_registry_error(err: &KeeperRegistryLogic20Errors) -> String {
    match err {
        KeeperRegistryLogic20Errors::TargetCheckReverted(e) => {
            format!("TargetCheckReverted(reason={})", e.reason)
        }
        KeeperRegistryLogic20Errors::RevertString(s) => format!("revert: {s}"),
        other => registry_error_name(&other.clone().encode())
            .unwrap_or("unknown registry error")
            .to_string(),
    }
}

/// Render a contract error for logs. Registry reverts are named; anything else uses
/// the error's own display.
pub fn describe_contract_error<M: Middleware>(err: &ContractError<M>) -> String {
    match err.as_revert().and_then(|data| decode_revert_data(data)) {
        Some(decoded) => format!("reverted with {}", describe_registry_error(&decoded)),
        None => err.to_string(),
    }
}

/// Wrap a contract error with `context` and its decoded description, keeping the
/// `ContractError` itself as the report's source.
pub fn contract_report<M: Middleware + 'static>(
    context: impl std::fmt::Display,
    err: ContractError<M>,
) -> eyre::Report {
    let msg = format!("{context} {}", describe_contract_error(&err));
    eyre::Report::new(err).wrap_err(msg)
}
