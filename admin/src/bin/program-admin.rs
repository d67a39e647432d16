use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use oracle_types::{parse_products_json, parse_publishers_json, read_reference_file, ReferencePublishers};
use program_admin::{
    commands::{
        set_minimum_publishers_json, toggle_publisher_json, update_product_metadata_json, ProgramAdmin, ReferenceData,
    },
    config::{parse_bool_flag, AdminConfig, DEFAULT_COMMITMENT},
    keys::FsKeyStore,
    sender::{CancelFlag, SubmitReport},
};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;

#[derive(Parser, Debug)]
#[command(name = "program-admin", version, about = "Oracle program administration")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

/// Flags shared by every command that talks to a cluster.
#[derive(Args, Debug)]
struct ClusterArgs {
    /// devnet|testnet|mainnet-beta|localhost, or any name with --rpc-endpoint
    #[arg(long, env = "NETWORK")]
    network: String,

    #[arg(long, env = "RPC_ENDPOINT")]
    rpc_endpoint: Option<String>,

    #[arg(long, env = "PROGRAM_KEY")]
    program_key: Pubkey,

    /// Key store directory
    #[arg(long, env = "KEYS")]
    keys: PathBuf,

    /// processed|confirmed|finalized
    #[arg(long, env = "COMMITMENT", default_value = DEFAULT_COMMITMENT)]
    commitment: String,

    /// Submit transactions; `false` prints the instructions instead
    #[arg(
        long,
        env = "SEND_TRANSACTIONS",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_bool_flag
    )]
    send_transactions: bool,

    /// Also write dry-run JSON here
    #[arg(long, env = "OUTFILE")]
    outfile: Option<PathBuf>,

    #[arg(long, env = "CONFIRM_TIMEOUT_SECS", default_value_t = 90)]
    confirm_timeout_secs: u64,

    /// Stop submitting new batches after this many seconds
    #[arg(long, env = "RUN_TIMEOUT_SECS")]
    run_timeout_secs: Option<u64>,
}

impl ClusterArgs {
    fn config(&self) -> Result<AdminConfig> {
        let mut cfg = AdminConfig::new(&self.network, self.rpc_endpoint.as_deref(), self.program_key, &self.keys)?
            .with_commitment(&self.commitment)?;
        cfg.send_transactions = self.send_transactions;
        cfg.outfile = self.outfile.clone();
        cfg.confirm_timeout = Duration::from_secs(self.confirm_timeout_secs);
        cfg.run_timeout = self.run_timeout_secs.map(Duration::from_secs);
        Ok(cfg)
    }
}

/// Flags of the commands that only print an instruction.
#[derive(Args, Debug)]
struct OfflineArgs {
    #[arg(long, env = "PROGRAM_KEY")]
    program_key: Pubkey,

    #[arg(long, env = "FUNDING_KEY")]
    funding_key: Pubkey,

    #[arg(long, env = "OUTFILE")]
    outfile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Reconcile the program with the reference files
    Sync {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(long, env = "PRODUCTS")]
        products: PathBuf,
        #[arg(long, env = "PUBLISHERS")]
        publishers: PathBuf,
        #[arg(long, env = "PERMISSIONS")]
        permissions: PathBuf,
        #[arg(long, env = "OVERRIDES")]
        overrides: Option<PathBuf>,
        /// Create keypairs for accounts that do not exist yet
        #[arg(
            long,
            env = "GENERATE_KEYS",
            default_value = "false",
            action = ArgAction::Set,
            value_parser = parse_bool_flag
        )]
        generate_keys: bool,
    },
    /// Print mappings, products, prices and publishers
    ListAccounts {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(long, env = "PUBLISHERS")]
        publishers: Option<PathBuf>,
    },
    /// Recreate key store labels from the on-chain chain
    RestoreLinks {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(long, env = "PRODUCTS")]
        products: PathBuf,
    },
    DeletePrice {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(long, env = "PRODUCT_KEY")]
        product_key: Pubkey,
        #[arg(long, env = "PRICE_KEY")]
        price_key: Pubkey,
    },
    DeleteProduct {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(long, env = "MAPPING_KEY")]
        mapping_key: Pubkey,
        #[arg(long, env = "PRODUCT_KEY")]
        product_key: Pubkey,
    },
    /// Propose a new upgrade authority; the funding key must be the current one
    MigrateUpgradeAuthority {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[arg(long, env = "NEW_AUTHORITY")]
        new_authority: Pubkey,
    },
    TogglePublisher {
        #[command(flatten)]
        offline: OfflineArgs,
        #[arg(long, env = "PRICE_KEY")]
        price_key: Pubkey,
        #[arg(long, env = "PUBLISHER_KEY")]
        publisher_key: Pubkey,
        /// true adds the publisher, false removes it
        #[arg(long, action = ArgAction::Set, value_parser = parse_bool_flag)]
        status: bool,
    },
    SetMinimumPublishers {
        #[command(flatten)]
        offline: OfflineArgs,
        #[arg(long, env = "PRICE_KEY")]
        price_key: Pubkey,
        #[arg(long)]
        value: u8,
    },
    UpdateProductMetadata {
        #[command(flatten)]
        offline: OfflineArgs,
        #[arg(long, env = "PRODUCT_KEY")]
        product_key: Pubkey,
        /// JSON object of metadata fields, written in the given order
        #[arg(long)]
        metadata: String,
    },
}

fn connect(cfg: AdminConfig) -> ProgramAdmin<RpcClient> {
    tracing::info!(network = %cfg.network, rpc = %cfg.rpc_endpoint, program = %cfg.program_key, "connecting");
    let rpc = RpcClient::new_with_commitment(cfg.rpc_endpoint.clone(), cfg.commitment);
    let keys = Arc::new(FsKeyStore::new(cfg.key_dir.clone()));
    ProgramAdmin::new(rpc, cfg, keys)
}

/// Cancels on Ctrl-C or once the run timeout elapses.
fn cancel_flag(run_timeout: Option<Duration>) -> CancelFlag {
    let flag = CancelFlag::new();
    let on_signal = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; no new batches will be sent");
            on_signal.cancel();
        }
    });
    if let Some(limit) = run_timeout {
        let on_timeout = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            tracing::warn!(?limit, "run timeout; no new batches will be sent");
            on_timeout.cancel();
        });
    }
    flag
}

fn finish(report: &SubmitReport) -> Result<()> {
    for b in &report.batches {
        println!("{b}");
    }
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} of {} batches did not confirm", report.batches.len());
    }
    Ok(())
}

fn load_publishers(path: Option<&Path>) -> Result<ReferencePublishers> {
    match path {
        Some(p) => Ok(parse_publishers_json(&read_reference_file(p)?)?),
        None => Ok(ReferencePublishers::default()),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries command output (dry-run JSON, account tree)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_writer(std::io::stderr).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    match cli.cmd {
        Cmd::Sync { cluster, products, publishers, permissions, overrides, generate_keys } => {
            let reference =
                ReferenceData::load(&products, &publishers, &permissions, overrides.as_deref(), &cluster.network)
                    .context("loading reference files")?;
            let mut cfg = cluster.config()?;
            cfg.generate_keys = generate_keys;
            let cancel = cancel_flag(cfg.run_timeout);
            let admin = connect(cfg);

            let outcome = admin.sync(&reference, cancel).await?;
            for issue in &outcome.plan.issues {
                eprintln!("{issue}");
            }
            match &outcome.report {
                Some(report) => finish(report)?,
                None => tracing::info!(steps = outcome.plan.steps.len(), "nothing submitted"),
            }
        }
        Cmd::ListAccounts { cluster, publishers } => {
            let publishers = load_publishers(publishers.as_deref())?;
            let admin = connect(cluster.config()?);
            print!("{}", admin.list_accounts(&publishers).await?);
        }
        Cmd::RestoreLinks { cluster, products } => {
            let products = parse_products_json(&read_reference_file(&products)?)?;
            let admin = connect(cluster.config()?);
            let restored = admin.restore_links(&products).await?;
            println!("restored {restored} links");
        }
        Cmd::DeletePrice { cluster, product_key, price_key } => {
            let admin = connect(cluster.config()?);
            let cancel = cancel_flag(admin.config().run_timeout);
            finish(&admin.delete_price(product_key, price_key, cancel).await?)?;
        }
        Cmd::DeleteProduct { cluster, mapping_key, product_key } => {
            let admin = connect(cluster.config()?);
            let cancel = cancel_flag(admin.config().run_timeout);
            finish(&admin.delete_product(mapping_key, product_key, cancel).await?)?;
        }
        Cmd::MigrateUpgradeAuthority { cluster, new_authority } => {
            let admin = connect(cluster.config()?);
            let cancel = cancel_flag(admin.config().run_timeout);
            finish(&admin.migrate_upgrade_authority(new_authority, cancel).await?)?;
        }
        Cmd::TogglePublisher { offline, price_key, publisher_key, status } => {
            toggle_publisher_json(
                &offline.program_key,
                &offline.funding_key,
                &price_key,
                &publisher_key,
                status,
                offline.outfile.as_deref(),
            )?;
        }
        Cmd::SetMinimumPublishers { offline, price_key, value } => {
            set_minimum_publishers_json(
                &offline.program_key,
                &offline.funding_key,
                &price_key,
                value,
                offline.outfile.as_deref(),
            )?;
        }
        Cmd::UpdateProductMetadata { offline, product_key, metadata } => {
            update_product_metadata_json(
                &offline.program_key,
                &offline.funding_key,
                &product_key,
                &metadata,
                offline.outfile.as_deref(),
            )?;
        }
    }
    Ok(())
}
