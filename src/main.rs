//! Command line front end for the nonce coordinator.
//!
//! Each invocation connects the configured store, runs one command against
//! the gateway, and saves the store snapshot before exiting. Concurrent
//! invocations sharing a snapshot queue on its lock file for the whole run.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use gateway_nonce::config::{load_config, SdkConfig};
use gateway_nonce::nonce::AccountKey;
use gateway_nonce::observability::logging::init_logging;
use gateway_nonce::{ChainNonceQuery, GatewayNonceQuery, MemoryNonceStore, NonceClass, NonceCoordinator};

#[derive(Parser)]
#[command(name = "gateway-nonce")]
#[command(about = "Nonce coordination for proxied gateway transactions", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue the next nonce for a signer
    Next {
        /// Signer public key, or a registered address
        #[arg(long)]
        account: String,
        #[arg(long, default_value = "transfer")]
        class: NonceClass,
        /// Address to register against the public key
        #[arg(long)]
        address: Option<String>,
    },
    /// Query the gateway's authoritative nonce
    Chain {
        #[arg(long)]
        account: String,
        #[arg(long, default_value = "transfer")]
        class: NonceClass,
    },
    /// Show cached entries for a signer
    Show {
        #[arg(long)]
        account: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SdkConfig::default(),
    };
    init_logging(&config.observability);

    tracing::debug!(
        rpc_url = %config.gateway.rpc_url,
        processing_time_ms = config.nonce.processing_time_ms,
        lock_poll_interval_ms = config.nonce.lock_poll_interval_ms,
        "Configuration loaded"
    );

    let store_config = config.store.clone();
    let store = tokio::task::spawn_blocking(move || MemoryNonceStore::connect(&store_config)).await??;

    match cli.command {
        Commands::Next {
            account,
            class,
            address,
        } => {
            let gateway = GatewayNonceQuery::new(&config.gateway)?;
            let coordinator = NonceCoordinator::new(Arc::new(store.clone()), &config.nonce);

            if let Some(address) = &address {
                coordinator.accounts().register(address, &account)?;
            }
            let key = coordinator.init_user_nonce_cache(&account).await?;
            let outcome = coordinator
                .get_nonce_and_increment(&account, class, &gateway)
                .await;
            store.save_snapshot()?;

            let nonce = outcome?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "account": key,
                    "class": class,
                    "nonce": nonce,
                }))?
            );
        }
        Commands::Chain { account, class } => {
            let gateway = GatewayNonceQuery::new(&config.gateway)?;
            let key = AccountKey::from_public_key(&account)?;
            let nonce = gateway.get_authoritative_nonce(&key, class).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "account": key,
                    "class": class,
                    "chain_nonce": nonce,
                }))?
            );
        }
        Commands::Show { account } => {
            let key = AccountKey::from_public_key(&account)?;
            let entries: Vec<_> = store
                .entries_for(&key)
                .into_iter()
                .map(|(class, entry)| {
                    json!({
                        "class": class,
                        "nonce": entry.nonce,
                        "last_updated_ms": entry.last_updated_ms,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "account": key,
                    "entries": entries,
                }))?
            );
        }
    }

    Ok(())
}
