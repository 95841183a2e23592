use eyre::{eyre, Result};
use serde::Deserialize;
use std::{fs, path::Path};

/// Deployment artifact describing one registry on one chain.
///
/// Extra fields are ignored so the same file can carry notes for other tooling.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentArtifact {
    pub chain_id: u64,
    #[serde(default)]
    pub rpc: Option<String>,
    /// Optional name of an environment variable that contains the RPC URL.
    /// Useful to avoid committing provider API keys.
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    /// Main registry address. Logic calls are reached through its fallback.
    pub registry: String,
    pub start_block: u64,

    // Constructor inputs, only needed by `deploy` and `info` cross-checks.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub link_native_feed: Option<String>,
    #[serde(default)]
    pub fast_gas_feed: Option<String>,
    #[serde(default)]
    pub payment_model: Option<String>,
}

impl DeploymentArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| eyre!("failed to read deployment artifact {}: {e}", path.display()))?;
        Self::parse(&raw).map_err(|e| {
            eyre!(
                "failed to parse deployment artifact {}: {e}",
                path.display()
            )
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let art: DeploymentArtifact = serde_json::from_str(raw)?;

        if art.registry.trim().is_empty() {
            return Err(eyre!("deployment artifact registry is empty"));
        }
        if art.start_block == 0 {
            // Not strictly invalid, but almost always wrong for log scanning.
            tracing::warn!(
                "deployment artifact startBlock is 0; this will scan from genesis and may be slow"
            );
        }

        Ok(art)
    }
}
