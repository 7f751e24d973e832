//! TSS Party CLI
//!
//! Command-line signing client:
//! - Sign a message against remote signer nodes
//! - Run a complete ceremony against in-memory nodes
//! - Deal a simulated deployment for the node service
//! - Inspect the coefficients of a participating set

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tss_core::field::{scalar_from_hex, scalar_to_hex};
use tss_core::providers::{LocalCustody, StaticAttestation, StaticDirectory};
use tss_core::sim::{network_config, DealerEngine, SimulatedDeployment};
use tss_core::{
    CoefficientSet, Collaborators, HashAlgorithm, NodeIndex, ParticipatingSet, Signature, Signer,
    SignerConfig,
};
use tss_transport_ws::WsTransport;

const CONFIG_FILE: &str = "config.json";
const CUSTODY_FILE: &str = "custody.json";
const ATTESTATION_FILE: &str = "attestation.json";
const FACTOR_FILE: &str = "factor.hex";
const LOCAL_NETWORK: &str = "local";

/// TSS Party - threshold signing client
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Threshold ECDSA signing client")]
#[command(version)]
struct Cli {
    /// Data directory for configuration, custody and attestation files
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a message with the signer nodes of the configured network
    Sign {
        /// Message to sign
        #[arg(short, long)]
        message: String,

        /// Treat the message as hex-encoded bytes
        #[arg(long)]
        hex: bool,

        /// Hash algorithm (keccak256 or sha256)
        #[arg(long, default_value = "keccak256")]
        hash: HashAlgorithm,

        /// Signer configuration (defaults to <dest>/config.json)
        #[arg(short, long, env = "TSS_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Sign a message against in-memory signer nodes
    Simulate {
        /// Message to sign
        #[arg(short, long, default_value = "hello world")]
        message: String,

        /// Hash algorithm (keccak256 or sha256)
        #[arg(long, default_value = "keccak256")]
        hash: HashAlgorithm,

        /// Total parties including this client
        #[arg(short, long, default_value_t = tss_core::DEFAULT_PARTIES)]
        parties: usize,
    },

    /// Deal a simulated deployment for local node services
    Deal {
        /// Number of signer nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Participating node indexes (comma-separated, ascending)
        #[arg(short, long)]
        participants: Option<String>,

        /// Share index of the client
        #[arg(long, default_value = "2")]
        client_share_index: u32,

        /// Port of node 1; node i listens on base_port + i - 1
        #[arg(long, default_value = "8081")]
        base_port: u16,
    },

    /// Show the coefficients of a participating set
    Coeffs {
        /// Participating node indexes (comma-separated, ascending)
        #[arg(short, long)]
        nodes: String,

        /// Share index of the client
        #[arg(long, default_value = "2")]
        client_share_index: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sign {
            ref message,
            hex: is_hex,
            hash,
            ref config,
        } => {
            let config = config.clone().unwrap_or_else(|| cli.dest.join(CONFIG_FILE));
            run_sign(&cli.dest, &config, &message_bytes(message, is_hex)?, hash).await?;
        }
        Commands::Simulate {
            ref message,
            hash,
            parties,
        } => {
            run_simulate(message.as_bytes(), hash, parties).await?;
        }
        Commands::Deal {
            nodes,
            ref participants,
            client_share_index,
            base_port,
        } => {
            run_deal(&cli.dest, nodes, participants.as_deref(), client_share_index, base_port)?;
        }
        Commands::Coeffs {
            ref nodes,
            client_share_index,
        } => {
            show_coefficients(nodes, client_share_index)?;
        }
    }

    Ok(())
}

async fn run_sign(
    dest: &Path,
    config_path: &Path,
    message: &[u8],
    hash: HashAlgorithm,
) -> Result<()> {
    let config = SignerConfig::from_file(config_path)?;
    let factor_hex = std::fs::read_to_string(dest.join(FACTOR_FILE))
        .with_context(|| format!("reading {}", dest.join(FACTOR_FILE).display()))?;
    let factor_secret = scalar_from_hex(factor_hex.trim())?;

    let collaborators = Collaborators {
        custody: Arc::new(LocalCustody::from_file(dest.join(CUSTODY_FILE))?),
        attestation: Arc::new(StaticAttestation::from_file(dest.join(ATTESTATION_FILE))?),
        directory: Arc::new(StaticDirectory::new(config.networks.clone())),
        transport: Arc::new(WsTransport::new().with_timeout(config.connect_timeout())),
        engine: Arc::new(DealerEngine::new()),
    };

    info!(
        network = %config.network,
        parties = config.parties,
        hash = %hash,
        "Starting signing ceremony"
    );

    let signer = Signer::new(config, factor_secret, collaborators);
    let signature = signer
        .sign_message_with_abort(message, hash, abort_on(tokio::signal::ctrl_c()))
        .await?;

    print_signature(&signature)
}

async fn run_simulate(message: &[u8], hash: HashAlgorithm, parties: usize) -> Result<()> {
    let deployment = SimulatedDeployment::new(&mut OsRng, parties)?;

    info!(parties, hash = %hash, "Starting simulated signing ceremony");

    let signature = deployment.signer().sign_message(message, hash).await?;

    println!(
        "Public Key: {}",
        tss_core::AggregatedPublicKey::from_point(&deployment.sharing.public_key())?.to_base64()
    );
    print_signature(&signature)
}

fn run_deal(
    dest: &Path,
    nodes: usize,
    participants: Option<&str>,
    client_share_index: u32,
    base_port: u16,
) -> Result<()> {
    let participating = match participants {
        Some(list) => parse_node_indexes(list)?,
        None => (1..=nodes as NodeIndex).collect(),
    };

    let mut deployment = SimulatedDeployment::with_participants(
        &mut OsRng,
        nodes,
        participating,
        client_share_index,
    )?;
    deployment.config.network = LOCAL_NETWORK.to_string();
    deployment.config.networks.clear();
    deployment.config.networks.insert(
        LOCAL_NETWORK.to_string(),
        network_config(nodes, |node| {
            format!("http://127.0.0.1:{}", u32::from(base_port) + node - 1)
        }),
    );

    std::fs::create_dir_all(dest)?;
    write_json(&dest.join(CONFIG_FILE), &deployment.config)?;
    write_json(&dest.join(CUSTODY_FILE), &deployment.custody)?;
    write_json(&dest.join(ATTESTATION_FILE), &deployment.attestation)?;
    std::fs::write(dest.join(FACTOR_FILE), scalar_to_hex(deployment.factor_secret()))?;
    for share in deployment.node_shares() {
        write_json(&dest.join(format!("node-{}.json", share.node_index)), &share)?;
    }

    let public_key =
        tss_core::AggregatedPublicKey::from_point(&deployment.sharing.public_key())?;
    info!(
        nodes,
        path = ?dest,
        public_key = %public_key.to_hex(),
        "Deployment dealt"
    );

    println!("Public Key: {}", public_key.to_base64());
    for node in 1..=nodes {
        println!(
            "  tss-node-svc --listen 127.0.0.1:{} --share {}",
            usize::from(base_port) + node - 1,
            dest.join(format!("node-{}.json", node)).display()
        );
    }

    Ok(())
}

fn show_coefficients(nodes: &str, client_share_index: u32) -> Result<()> {
    let set = ParticipatingSet::new(parse_node_indexes(nodes)?)?;
    let coefficients = CoefficientSet::derive(&set, client_share_index)?;

    println!("Coefficients:");
    println!(
        "  client (share index {}): {}",
        client_share_index,
        scalar_to_hex(coefficients.client())
    );
    for (node, coefficient) in coefficients.server_coefficients_hex() {
        println!("  node {}: {}", node, coefficient);
    }

    Ok(())
}

/// Completes when `signal` fires. A signal that cannot be listened for
/// never aborts.
async fn abort_on<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Cannot listen for Ctrl-C, ceremony cannot be aborted: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_signature(signature: &Signature) -> Result<()> {
    println!("Signature:");
    println!("  r: {}", hex::encode(signature.r));
    println!("  s: {}", hex::encode(signature.s));
    println!("  v: {}", signature.recovery_id);
    println!("  rsv: {}", signature.to_rsv_hex());
    println!("  DER: {}", hex::encode(signature.to_der()?));
    Ok(())
}

fn message_bytes(message: &str, is_hex: bool) -> Result<Vec<u8>> {
    if is_hex {
        let digits = message.strip_prefix("0x").unwrap_or(message);
        Ok(hex::decode(digits).context("message is not valid hex")?)
    } else {
        Ok(message.as_bytes().to_vec())
    }
}

fn parse_node_indexes(list: &str) -> Result<Vec<NodeIndex>> {
    Ok(list
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
