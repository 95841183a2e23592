use crate::deployments::DeploymentArtifact;
use ethers::types::Address;
use eyre::{eyre, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

pub const RPC_URL_ENV: &str = "KEEPER_REGISTRY_RPC_URL";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub registry: Address,
    pub start_block: u64,

    pub private_key_env: String,

    pub gas_limit: Option<u64>,

    /// How long to wait for a transaction receipt before reporting it as pending.
    pub tx_timeout: Duration,

    /// Whether to simulate a transaction via eth_call before sending it.
    ///
    /// Reverts surface as decoded registry errors without spending gas.
    pub simulate: bool,
    pub dry_run: bool,

    pub poll_interval: Duration,
    pub log_chunk_size: u64,
    pub confirmations: u64,
    pub max_concurrency: usize,

    pub index_file: PathBuf,
    pub once: bool,
}

impl RegistryConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli_and_deployment(
        deployment: &DeploymentArtifact,
        rpc_override: Option<String>,
        private_key_env: String,
        gas_limit: Option<u64>,
        tx_timeout_seconds: u64,
        simulate: bool,
        dry_run: bool,
        poll_seconds: u64,
        log_chunk: u64,
        confirmations: u64,
        max_concurrency: usize,
        index_file: PathBuf,
        once: bool,
    ) -> Result<Self> {
        let rpc_url = resolve_rpc_url(deployment, rpc_override, |k| std::env::var(k).ok())?;

        let registry = Address::from_str(deployment.registry.trim())
            .map_err(|e| eyre!("invalid registry address '{}': {e}", deployment.registry))?;

        if log_chunk == 0 {
            return Err(eyre!("log chunk size must be > 0"));
        }
        if max_concurrency == 0 {
            return Err(eyre!("max concurrency must be > 0"));
        }
        if let Some(gl) = gas_limit {
            if gl == 0 {
                return Err(eyre!("gas limit must be > 0 when set"));
            }
        }

        if rpc_url.contains("alchemy.com/v2/") || rpc_url.contains("infura.io/v3/") {
            tracing::warn!("RPC URL looks like it may contain an API key; consider using {RPC_URL_ENV} env instead of committing it.");
        }

        Ok(Self {
            chain_id: deployment.chain_id,
            rpc_url,
            registry,
            start_block: deployment.start_block,
            private_key_env,
            gas_limit,
            tx_timeout: Duration::from_secs(tx_timeout_seconds.max(5)),
            simulate,
            dry_run,
            poll_interval: Duration::from_secs(poll_seconds.max(1)),
            log_chunk_size: log_chunk,
            confirmations,
            max_concurrency,
            index_file,
            once,
        })
    }
}

/// RPC precedence: CLI override, `KEEPER_REGISTRY_RPC_URL`, `deployment.rpcEnvVar`,
/// then `deployment.rpc`.
pub fn resolve_rpc_url(
    deployment: &DeploymentArtifact,
    rpc_override: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    // A blank source (e.g. `KEEPER_REGISTRY_RPC_URL=` in .env) falls through to the next.
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    non_blank(rpc_override)
        .or_else(|| non_blank(env(RPC_URL_ENV)))
        .or_else(|| non_blank(deployment.rpc_env_var.as_deref().and_then(&env)))
        .or_else(|| non_blank(deployment.rpc.clone()))
        .ok_or_else(|| {
            eyre!(
                "no rpc url provided. pass --rpc-url, set {RPC_URL_ENV}, set deployment.rpcEnvVar, or include rpc in deployment json"
            )
        })
}

/// Parse an optional address field from the deployment artifact.
pub fn parse_optional_address(field: &str, value: Option<&str>) -> Result<Option<Address>> {
    value
        .map(|v| {
            Address::from_str(v.trim()).map_err(|e| eyre!("invalid {field} address '{v}': {e}"))
        })
        .transpose()
}
