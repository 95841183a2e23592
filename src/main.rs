use clap::{Args, Parser, Subcommand};
use ethers::middleware::NonceManagerMiddleware;
use ethers::prelude::{Http, LocalWallet, Provider, SignerMiddleware};
use ethers::providers::Middleware;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, U256};
use eyre::{eyre, Result};
use keeper_registry::checker::check_upkeeps;
use keeper_registry::config::{parse_optional_address, resolve_rpc_url, RegistryConfig};
use keeper_registry::deployments::DeploymentArtifact;
use keeper_registry::registry::{self, Registry, TxOptions, TxOutcome, UpkeepRegistration};
use keeper_registry::scanner::{scan_registry_events, ScanOutcome};
use keeper_registry::state::RegistryIndex;
use keeper_registry::types::{parse_u256, MigrationPermission, PaymentModel};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

type SignerClient = NonceManagerMiddleware<SignerMiddleware<Provider<Http>, LocalWallet>>;

#[derive(Parser, Debug)]
#[command(
    name = "keeper-registry",
    version,
    about = "Chainlink Automation KeeperRegistry 2.0 operator CLI (Rust)"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a new KeeperRegistryLogic2_0 contract.
    Deploy(DeployArgs),

    /// Print registry owner, LINK and feed addresses, and payment model.
    Info(ReadArgs),

    /// Register a new upkeep (owner or registrar only).
    Register(RegisterArgs),

    /// Fund an upkeep with LINK.
    AddFunds(AddFundsArgs),

    /// Cancel an upkeep.
    Cancel(UpkeepIdArgs),

    /// Pause an upkeep (admin only).
    PauseUpkeep(UpkeepIdArgs),

    /// Unpause an upkeep (admin only).
    UnpauseUpkeep(UpkeepIdArgs),

    /// Change an upkeep's perform gas limit.
    SetGasLimit(SetGasLimitArgs),

    /// Replace an upkeep's offchain config.
    SetOffchainConfig(SetOffchainConfigArgs),

    /// Replace an upkeep's check data.
    UpdateCheckData(UpdateCheckDataArgs),

    /// Propose a new admin for an upkeep.
    TransferAdmin(TransferAdminArgs),

    /// Accept a pending admin transfer.
    AcceptAdmin(UpkeepIdArgs),

    /// Withdraw the balance of a canceled upkeep.
    WithdrawFunds(WithdrawFundsArgs),

    /// Migrate upkeeps to a peer registry.
    Migrate(MigrateArgs),

    /// Import upkeeps encoded by a peer registry (peer registry only).
    ReceiveUpkeeps(ReceiveUpkeepsArgs),

    /// Pause the whole registry (owner only).
    PauseRegistry(TxArgs),

    /// Unpause the registry (owner only).
    UnpauseRegistry(TxArgs),

    /// Set payees for the current transmitters (owner only).
    SetPayees(SetPayeesArgs),

    /// Set migration permission for a peer registry (owner only).
    SetMigrationPermission(SetMigrationPermissionArgs),

    /// Withdraw accumulated owner fees (owner only).
    WithdrawOwnerFunds(TxArgs),

    /// Send LINK held above the expected balance back to the owner.
    RecoverFunds(TxArgs),

    /// Propose a new registry owner.
    TransferOwnership(AddressToArgs),

    /// Accept a pending ownership transfer.
    AcceptOwnership(TxArgs),

    /// Propose a new payee for a transmitter (current payee only).
    TransferPayeeship(TransferPayeeshipArgs),

    /// Accept a pending payeeship transfer.
    AcceptPayeeship(AcceptPayeeshipArgs),

    /// Withdraw a transmitter's earned LINK (payee only).
    WithdrawPayment(WithdrawPaymentArgs),

    /// Simulate checkUpkeep for one upkeep.
    Check(CheckArgs),

    /// Simulate checkUpkeep for many upkeeps (indexed active upkeeps by default).
    CheckAll(CheckAllArgs),

    /// Run one catch-up pass over registry events into the local index.
    Scan(IndexArgs),

    /// Poll for registry events and print each applied event as a JSON line.
    Watch(IndexArgs),

    /// List upkeeps from the local index.
    Upkeeps(UpkeepsArgs),
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Path to a deployment artifact JSON (e.g., deployments/local.json)
    #[arg(long, default_value = "deployments/local.json")]
    deployment: PathBuf,

    /// Override RPC URL. If omitted, uses KEEPER_REGISTRY_RPC_URL, deployment.rpcEnvVar or deployment.rpc.
    #[arg(long)]
    rpc_url: Option<String>,

    /// Environment variable name that contains the signer's private key.
    #[arg(long, default_value = "KEEPER_REGISTRY_PRIVATE_KEY")]
    private_key_env: String,

    /// Optional fixed gas limit for sent transactions.
    #[arg(long)]
    gas_limit: Option<u64>,

    /// Fixed gas price in wei; sends legacy transactions instead of EIP-1559 fee estimation.
    #[arg(long, value_parser = u256_arg)]
    gas_price_wei: Option<U256>,

    /// How many seconds to wait for a transaction receipt before treating it as "still pending".
    #[arg(long, default_value_t = 120)]
    tx_timeout_seconds: u64,

    /// Disable the eth_call simulation guardrail before sending.
    #[arg(long)]
    no_simulate: bool,

    /// Don't send transactions; only print what would be done.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ReadArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct TxArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// default, arbitrum or optimism. Falls back to deployment.paymentModel.
    #[arg(long, value_parser = payment_model_arg)]
    payment_model: Option<PaymentModel>,

    /// LINK token. Falls back to deployment.link.
    #[arg(long, value_parser = address_arg)]
    link: Option<Address>,

    /// LINK/native price feed. Falls back to deployment.linkNativeFeed.
    #[arg(long, value_parser = address_arg)]
    link_native_feed: Option<Address>,

    /// Fast gas feed. Falls back to deployment.fastGasFeed.
    #[arg(long, value_parser = address_arg)]
    fast_gas_feed: Option<Address>,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Contract the registry will call checkUpkeep/performUpkeep on.
    #[arg(long, value_parser = address_arg)]
    target: Address,

    /// Perform gas limit for the upkeep.
    #[arg(long = "upkeep-gas-limit")]
    upkeep_gas_limit: u32,

    #[arg(long, value_parser = address_arg)]
    admin: Address,

    /// Hex bytes passed to checkUpkeep.
    #[arg(long, value_parser = bytes_arg, default_value = "0x")]
    check_data: Bytes,

    #[arg(long, value_parser = bytes_arg, default_value = "0x")]
    offchain_config: Bytes,
}

#[derive(Args, Debug)]
struct UpkeepIdArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Upkeep id (decimal, or hex with 0x).
    #[arg(long, value_parser = u256_arg)]
    id: U256,
}

#[derive(Args, Debug)]
struct AddFundsArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,

    /// Amount in juels (1 LINK = 10^18).
    #[arg(long)]
    amount: u128,

    /// Send approve(registry, amount) first when the LINK allowance is short.
    #[arg(long)]
    approve: bool,
}

#[derive(Args, Debug)]
struct SetGasLimitArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,

    /// New perform gas limit for the upkeep.
    #[arg(long = "upkeep-gas-limit")]
    upkeep_gas_limit: u32,
}

#[derive(Args, Debug)]
struct SetOffchainConfigArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,

    #[arg(long, value_parser = bytes_arg)]
    config: Bytes,
}

#[derive(Args, Debug)]
struct UpdateCheckDataArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,

    #[arg(long, value_parser = bytes_arg)]
    check_data: Bytes,
}

#[derive(Args, Debug)]
struct TransferAdminArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,

    #[arg(long, value_parser = address_arg)]
    proposed: Address,
}

#[derive(Args, Debug)]
struct WithdrawFundsArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,

    #[arg(long, value_parser = address_arg)]
    to: Address,
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated upkeep ids.
    #[arg(long, value_parser = u256_arg, value_delimiter = ',', required = true)]
    ids: Vec<U256>,

    #[arg(long, value_parser = address_arg)]
    destination: Address,
}

#[derive(Args, Debug)]
struct ReceiveUpkeepsArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Hex payload produced by the source registry's migrateUpkeeps.
    #[arg(long, value_parser = bytes_arg)]
    encoded: Bytes,
}

#[derive(Args, Debug)]
struct SetPayeesArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated payees, one per transmitter in order.
    #[arg(long, value_parser = address_arg, value_delimiter = ',', required = true)]
    payees: Vec<Address>,
}

#[derive(Args, Debug)]
struct SetMigrationPermissionArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = address_arg)]
    peer: Address,

    /// none, outgoing, incoming or bidirectional.
    #[arg(long, value_parser = migration_permission_arg)]
    permission: MigrationPermission,
}

#[derive(Args, Debug)]
struct AddressToArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = address_arg)]
    to: Address,
}

#[derive(Args, Debug)]
struct TransferPayeeshipArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = address_arg)]
    transmitter: Address,

    #[arg(long, value_parser = address_arg)]
    proposed: Address,
}

#[derive(Args, Debug)]
struct AcceptPayeeshipArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = address_arg)]
    transmitter: Address,
}

#[derive(Args, Debug)]
struct WithdrawPaymentArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Transmitter whose balance is withdrawn.
    #[arg(long, value_parser = address_arg)]
    from: Address,

    #[arg(long, value_parser = address_arg)]
    to: Address,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_parser = u256_arg)]
    id: U256,
}

#[derive(Args, Debug)]
struct CheckAllArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated upkeep ids. Defaults to active upkeeps in the index.
    #[arg(long, value_parser = u256_arg, value_delimiter = ',')]
    ids: Vec<U256>,

    /// Max concurrent checkUpkeep simulations.
    #[arg(long, default_value_t = 10)]
    max_concurrency: usize,

    /// Where the registry index is stored.
    #[arg(long, default_value = "state/registry-index.json")]
    index_file: PathBuf,
}

#[derive(Args, Debug)]
struct IndexArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Where to store the registry index (last scanned block, upkeep records).
    #[arg(long, default_value = "state/registry-index.json")]
    index_file: PathBuf,

    /// Block confirmations to wait before scanning logs.
    #[arg(long, default_value_t = 2)]
    confirmations: u64,

    /// Log scan chunk size (blocks per eth_getLogs request).
    #[arg(long, default_value_t = 2000)]
    log_chunk: u64,

    /// Polling interval in seconds (watch only).
    #[arg(long, default_value_t = 15)]
    poll_seconds: u64,

    /// Run a single scan and exit (watch only).
    #[arg(long)]
    once: bool,
}

#[derive(Args, Debug)]
struct UpkeepsArgs {
    #[arg(long, default_value = "state/registry-index.json")]
    index_file: PathBuf,

    /// Only list upkeeps in this status (active, paused, canceled, migrated).
    #[arg(long)]
    status: Option<String>,
}

fn u256_arg(s: &str) -> std::result::Result<U256, String> {
    parse_u256(s).map_err(|e| e.to_string())
}

fn address_arg(s: &str) -> std::result::Result<Address, String> {
    Address::from_str(s.trim()).map_err(|e| format!("invalid address '{s}': {e}"))
}

fn bytes_arg(s: &str) -> std::result::Result<Bytes, String> {
    Bytes::from_str(s.trim()).map_err(|e| format!("invalid hex bytes '{s}': {e}"))
}

fn payment_model_arg(s: &str) -> std::result::Result<PaymentModel, String> {
    s.parse().map_err(|e: eyre::Report| e.to_string())
}

fn migration_permission_arg(s: &str) -> std::result::Result<MigrationPermission, String> {
    s.parse().map_err(|e: eyre::Report| e.to_string())
}

/// Defaults applied where a command has no index or polling flags.
const DEFAULT_INDEX_FILE: &str = "state/registry-index.json";
const DEFAULT_MAX_CONCURRENCY: usize = 10;

struct IndexSettings {
    index_file: PathBuf,
    confirmations: u64,
    log_chunk: u64,
    poll_seconds: u64,
    max_concurrency: usize,
    once: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index_file: PathBuf::from(DEFAULT_INDEX_FILE),
            confirmations: 2,
            log_chunk: 2000,
            poll_seconds: 15,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            once: true,
        }
    }
}

fn load_config(common: &CommonArgs, idx: IndexSettings) -> Result<RegistryConfig> {
    let deployment = DeploymentArtifact::load(&common.deployment)?;
    RegistryConfig::from_cli_and_deployment(
        &deployment,
        common.rpc_url.clone(),
        common.private_key_env.clone(),
        common.gas_limit,
        common.tx_timeout_seconds,
        !common.no_simulate,
        common.dry_run,
        idx.poll_seconds,
        idx.log_chunk,
        idx.confirmations,
        idx.max_concurrency,
        idx.index_file,
        idx.once,
    )
}

fn tx_options(cfg: &RegistryConfig, gas_price: Option<U256>) -> TxOptions {
    TxOptions {
        gas_limit: cfg.gas_limit,
        gas_price,
        tx_timeout: cfg.tx_timeout,
        simulate: cfg.simulate,
        dry_run: cfg.dry_run,
    }
}

/// Connect and refuse to continue on a chain id mismatch.
async fn connect(rpc_url: &str, expected_chain_id: u64) -> Result<Provider<Http>> {
    let provider =
        Provider::<Http>::try_from(rpc_url)?.interval(Duration::from_millis(800));

    let remote_chain_id = provider.get_chainid().await?.as_u64();
    if remote_chain_id != expected_chain_id {
        return Err(eyre!(
            "RPC chainId mismatch: deployment expects {}, but RPC reports {}. Refusing to run.",
            expected_chain_id,
            remote_chain_id
        ));
    }
    Ok(provider)
}

async fn connect_registry(cfg: &RegistryConfig) -> Result<Provider<Http>> {
    let provider = connect(&cfg.rpc_url, cfg.chain_id).await?;

    let code = provider.get_code(cfg.registry, None).await?;
    if code.0.is_empty() {
        return Err(eyre!(
            "no contract code found at registry address {:?}. Check deployments JSON and RPC.",
            cfg.registry
        ));
    }
    Ok(provider)
}

fn signer_client(
    provider: Provider<Http>,
    private_key_env: &str,
    chain_id: u64,
) -> Result<Arc<SignerClient>> {
    let private_key = std::env::var(private_key_env).map_err(|_| {
        eyre!(
            "missing private key env var '{}'. Set it in your shell or .env before running.",
            private_key_env
        )
    })?;

    let wallet: LocalWallet = private_key
        .parse::<LocalWallet>()
        .map_err(|e| eyre!("invalid private key in {private_key_env}: {e}"))?
        .with_chain_id(chain_id);

    tracing::info!(signer = ?wallet.address(), "using signer");
    let address = wallet.address();
    let signer = SignerMiddleware::new(provider, wallet);
    Ok(Arc::new(NonceManagerMiddleware::new(signer, address)))
}

async fn read_registry(common: &CommonArgs) -> Result<(RegistryConfig, Registry<Provider<Http>>)> {
    let cfg = load_config(common, IndexSettings::default())?;
    let provider = connect_registry(&cfg).await?;
    let registry = Registry::new(
        cfg.registry,
        Arc::new(provider),
        tx_options(&cfg, common.gas_price_wei),
    );
    Ok((cfg, registry))
}

async fn tx_registry(common: &CommonArgs) -> Result<Registry<SignerClient>> {
    let cfg = load_config(common, IndexSettings::default())?;
    let provider = connect_registry(&cfg).await?;
    let client = signer_client(provider, &cfg.private_key_env, cfg.chain_id)?;

    tracing::info!(
        chain_id = cfg.chain_id,
        registry = ?cfg.registry,
        dry_run = cfg.dry_run,
        simulate = cfg.simulate,
        "registry client ready"
    );
    Ok(Registry::new(
        cfg.registry,
        client,
        tx_options(&cfg, common.gas_price_wei),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| eyre!("failed to serialize output: {e}"))?;
    println!("{out}");
    Ok(())
}

/// Print the outcome, then fail the process if the tx was mined but reverted.
fn finish_tx(outcome: TxOutcome) -> Result<()> {
    print_json(&outcome)?;
    outcome.ensure_not_reverted().map(|_| ())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        // Logs go to stderr so stdout stays machine-readable.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Deploy(args) => cmd_deploy(args).await,
        Command::Info(args) => cmd_info(args).await,
        Command::Register(args) => cmd_register(args).await,
        Command::AddFunds(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.add_funds(args.id, args.amount, args.approve).await?)
        }
        Command::Cancel(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.cancel_upkeep(args.id).await?)
        }
        Command::PauseUpkeep(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.pause_upkeep(args.id).await?)
        }
        Command::UnpauseUpkeep(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.unpause_upkeep(args.id).await?)
        }
        Command::SetGasLimit(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(
                registry
                    .set_upkeep_gas_limit(args.id, args.upkeep_gas_limit)
                    .await?,
            )
        }
        Command::SetOffchainConfig(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(
                registry
                    .set_upkeep_offchain_config(args.id, args.config)
                    .await?,
            )
        }
        Command::UpdateCheckData(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.update_check_data(args.id, args.check_data).await?)
        }
        Command::TransferAdmin(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.transfer_upkeep_admin(args.id, args.proposed).await?)
        }
        Command::AcceptAdmin(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.accept_upkeep_admin(args.id).await?)
        }
        Command::WithdrawFunds(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.withdraw_funds(args.id, args.to).await?)
        }
        Command::Migrate(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.migrate_upkeeps(args.ids, args.destination).await?)
        }
        Command::ReceiveUpkeeps(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.receive_upkeeps(args.encoded).await?)
        }
        Command::PauseRegistry(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.pause().await?)
        }
        Command::UnpauseRegistry(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.unpause().await?)
        }
        Command::SetPayees(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.set_payees(args.payees).await?)
        }
        Command::SetMigrationPermission(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(
                registry
                    .set_peer_registry_migration_permission(args.peer, args.permission)
                    .await?,
            )
        }
        Command::WithdrawOwnerFunds(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.withdraw_owner_funds().await?)
        }
        Command::RecoverFunds(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.recover_funds().await?)
        }
        Command::TransferOwnership(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.transfer_ownership(args.to).await?)
        }
        Command::AcceptOwnership(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.accept_ownership().await?)
        }
        Command::TransferPayeeship(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(
                registry
                    .transfer_payeeship(args.transmitter, args.proposed)
                    .await?,
            )
        }
        Command::AcceptPayeeship(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.accept_payeeship(args.transmitter).await?)
        }
        Command::WithdrawPayment(args) => {
            let registry = tx_registry(&args.common).await?;
            finish_tx(registry.withdraw_payment(args.from, args.to).await?)
        }
        Command::Check(args) => {
            let (_, registry) = read_registry(&args.common).await?;
            let res = registry.check_upkeep(args.id).await?;
            print_json(&serde_json::json!({ "id": args.id.to_string(), "result": res }))
        }
        Command::CheckAll(args) => cmd_check_all(args).await,
        Command::Scan(args) => cmd_scan(args, false).await,
        Command::Watch(args) => cmd_scan(args, true).await,
        Command::Upkeeps(args) => cmd_upkeeps(args),
    }
}

async fn cmd_deploy(args: DeployArgs) -> Result<()> {
    let common = &args.common;
    let deployment = DeploymentArtifact::load(&common.deployment)?;
    let rpc_url = resolve_rpc_url(&deployment, common.rpc_url.clone(), |k| std::env::var(k).ok())?;

    let payment_model = match args.payment_model {
        Some(m) => m,
        None => deployment
            .payment_model
            .as_deref()
            .map(PaymentModel::from_str)
            .transpose()?
            .unwrap_or(PaymentModel::Default),
    };
    let link = args
        .link
        .or(parse_optional_address("link", deployment.link.as_deref())?)
        .ok_or_else(|| eyre!("missing --link (or deployment.link)"))?;
    let link_native_feed = args
        .link_native_feed
        .or(parse_optional_address(
            "linkNativeFeed",
            deployment.link_native_feed.as_deref(),
        )?)
        .ok_or_else(|| eyre!("missing --link-native-feed (or deployment.linkNativeFeed)"))?;
    let fast_gas_feed = args
        .fast_gas_feed
        .or(parse_optional_address(
            "fastGasFeed",
            deployment.fast_gas_feed.as_deref(),
        )?)
        .ok_or_else(|| eyre!("missing --fast-gas-feed (or deployment.fastGasFeed)"))?;

    if common.dry_run {
        tracing::info!(%payment_model, ?link, ?link_native_feed, ?fast_gas_feed, "DRY RUN: would deploy registry logic");
        return print_json(&serde_json::json!({
            "action": "deploy",
            "status": "dryRun",
            "paymentModel": payment_model,
            "link": link,
            "linkNativeFeed": link_native_feed,
            "fastGasFeed": fast_gas_feed,
        }));
    }

    let provider = connect(&rpc_url, deployment.chain_id).await?;
    let client = signer_client(provider, &common.private_key_env, deployment.chain_id)?;

    let (contract, receipt) =
        registry::deploy(client, payment_model, link, link_native_feed, fast_gas_feed).await?;

    print_json(&serde_json::json!({
        "action": "deploy",
        "address": contract.address(),
        "txHash": receipt.transaction_hash,
        "block": receipt.block_number.map(|b| b.as_u64()),
        "paymentModel": payment_model,
    }))
}

async fn cmd_info(args: ReadArgs) -> Result<()> {
    let (cfg, registry) = read_registry(&args.common).await?;
    let info = registry.info().await?;

    let deployment = DeploymentArtifact::load(&args.common.deployment)?;
    if let Some(expected) = parse_optional_address("link", deployment.link.as_deref())? {
        if expected != info.link {
            tracing::warn!(expected = ?expected, actual = ?info.link, registry = ?cfg.registry, "registry LINK differs from deployment.link");
        }
    }

    print_json(&info)
}

async fn cmd_register(args: RegisterArgs) -> Result<()> {
    let registry = tx_registry(&args.common).await?;
    let (outcome, upkeep_id) = registry
        .register_upkeep(UpkeepRegistration {
            target: args.target,
            gas_limit: args.upkeep_gas_limit,
            admin: args.admin,
            check_data: args.check_data,
            offchain_config: args.offchain_config,
        })
        .await?;

    print_json(&serde_json::json!({
        "outcome": outcome,
        "upkeepId": upkeep_id.map(|id| id.to_string()),
    }))
}

async fn cmd_check_all(args: CheckAllArgs) -> Result<()> {
    let (cfg, registry) = read_registry(&args.common).await?;

    let ids = if args.ids.is_empty() {
        if !args.index_file.exists() {
            return Err(eyre!(
                "index file {} not found; run `scan` first or pass --ids",
                args.index_file.display()
            ));
        }
        RegistryIndex::load_or_init(&args.index_file, cfg.start_block)?.active_ids()
    } else {
        args.ids
    };

    if ids.is_empty() {
        tracing::info!("no active upkeeps to check");
    } else {
        tracing::info!(checking = ids.len(), max_concurrency = args.max_concurrency, "checking upkeeps");
    }

    let outcome = check_upkeeps(Arc::new(registry), ids, args.max_concurrency.max(1)).await;
    tracing::info!(stats = ?outcome.stats, "check complete");
    print_json(&outcome)
}

async fn cmd_scan(args: IndexArgs, watch: bool) -> Result<()> {
    let cfg = load_config(
        &args.common,
        IndexSettings {
            index_file: args.index_file,
            confirmations: args.confirmations,
            log_chunk: args.log_chunk,
            poll_seconds: args.poll_seconds,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            once: args.once || !watch,
        },
    )?;
    let provider = connect_registry(&cfg).await?;

    // Single-writer guard on the index; held until return.
    let _lock_guard = RegistryIndex::lock(&cfg.index_file)?;
    let mut index = RegistryIndex::load_or_init(&cfg.index_file, cfg.start_block)?;

    tracing::info!(
        chain_id = cfg.chain_id,
        registry = ?cfg.registry,
        start_block = cfg.start_block,
        last_scanned_block = index.last_scanned_block,
        once = cfg.once,
        "indexer starting"
    );

    loop {
        let outcome = scan_registry_events(
            &provider,
            cfg.registry,
            cfg.start_block,
            cfg.confirmations,
            cfg.log_chunk_size,
            &mut index,
        )
        .await?;

        index.save(&cfg.index_file)?;

        if watch {
            print_events(&outcome)?;
        } else {
            print_json(&serde_json::json!({
                "from": outcome.from,
                "to": outcome.to,
                "applied": outcome.applied,
                "skipped": outcome.skipped,
                "lastScannedBlock": index.last_scanned_block,
                "upkeeps": index.upkeeps.len(),
            }))?;
        }

        tracing::info!(
            applied = outcome.applied,
            skipped = outcome.skipped,
            last_scanned_block = index.last_scanned_block,
            upkeeps = index.upkeeps.len(),
            "scan pass complete"
        );

        if cfg.once {
            break;
        }

        tokio::time::sleep(cfg.poll_interval).await;
    }

    Ok(())
}

/// One compact JSON object per applied event.
fn print_events(outcome: &ScanOutcome) -> Result<()> {
    for ev in &outcome.events {
        let line = serde_json::to_string(&serde_json::json!({
            "block": ev.meta.block,
            "logIndex": ev.meta.log_index,
            "event": ev.event,
        }))
        .map_err(|e| eyre!("failed to serialize event: {e}"))?;
        println!("{line}");
    }
    Ok(())
}

fn cmd_upkeeps(args: UpkeepsArgs) -> Result<()> {
    if !args.index_file.exists() {
        return Err(eyre!(
            "index file {} not found; run `scan` first",
            args.index_file.display()
        ));
    }
    let index = RegistryIndex::load_or_init(&args.index_file, 0)?;

    let wanted = args.status.as_deref().map(|s| s.trim().to_ascii_lowercase());
    let upkeeps: Vec<_> = index
        .upkeeps
        .values()
        .filter(|r| wanted.as_deref().map_or(true, |w| r.status.name() == w))
        .collect();

    print_json(&upkeeps)
}
