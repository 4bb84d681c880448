use art_seller::tss::TxFunctionResponse;
use art_seller::{
    ArtifactRecord, AssetIssuanceService, DeliveryRequest, IssuanceError, SellerConfig, TssClient,
};
use base64::{engine::general_purpose, Engine as _};
use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use ledger::{HorizonGateway, LedgerGateway, Lumens, PublicKey, SimulatedLedger};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Balance given to the seller account when running against the in-memory ledger
const SIMULATED_SELLER_FUNDS: Lumens = Lumens::from_whole(10_000);

#[derive(Parser, Debug)]
#[command(author, version, about = "Issue artifact assets and deliver them to buyers", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Environment file to load before reading configuration
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Use an in-memory ledger with a funded seller account
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the asset public key an artifact would be issued under
    Derive(ArtifactArgs),
    /// Activate and custody the asset account for an artifact
    Issue(ArtifactArgs),
    /// Show how far an asset account has been provisioned
    Status {
        #[arg(long)]
        asset: PublicKey,
    },
    /// Run the sale contract and hand the asset to its buyer
    Deliver {
        #[arg(long)]
        buyer: PublicKey,
        #[arg(long)]
        asset: PublicKey,
        /// Claimable balance holding the buyer's payment
        #[arg(long)]
        claim: String,
    },
    /// Submit again an envelope from a failed delivery, as printed in its log
    Resubmit {
        #[arg(long)]
        asset: PublicKey,
        /// Unsigned envelope XDR returned by the remote service
        #[arg(long)]
        envelope: String,
        /// Base64 signature returned by the remote service
        #[arg(long)]
        signature: String,
        /// Defaults to the configured remote signer
        #[arg(long)]
        signer: Option<PublicKey>,
    },
}

#[derive(Args, Debug)]
struct ArtifactArgs {
    /// Content hash of the generated artifact
    #[arg(long)]
    id: String,
    /// Buyer identifier
    #[arg(long)]
    name: String,
    #[arg(long)]
    image_url: String,
}

impl From<ArtifactArgs> for ArtifactRecord {
    fn from(args: ArtifactArgs) -> Self {
        ArtifactRecord::new(args.id, args.name, args.image_url)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG may come from the env file
    load_env(cli.env_file.as_deref())?;

    tracing_subscriber::registry()
        .with(log_filter(&cli.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SellerConfig::from_env().wrap_err("Invalid configuration")?;

    tracing::info!(
        seller = %config.seller.public_key(),
        network = %config.ledger.network.passphrase,
        horizon = %config.ledger.network.horizon_url,
        tss = %config.remote.endpoint_base,
        simulate = cli.simulate,
        "Config loaded"
    );

    let tss = TssClient::new(
        Duration::from_secs(config.tss_timeout_secs),
        config.ledger.network.clone(),
    )?;

    if cli.simulate {
        let ledger = SimulatedLedger::new(config.ledger.network.clone());
        ledger.fund_account(&config.seller.public_key(), SIMULATED_SELLER_FUNDS);
        run(AssetIssuanceService::new(config, Arc::new(ledger), tss), cli.command).await
    } else {
        let gateway = HorizonGateway::new(
            config.ledger.network.clone(),
            Duration::from_secs(config.ledger.horizon_timeout_secs),
        )?;
        run(AssetIssuanceService::new(config, Arc::new(gateway), tss), cli.command).await
    }
}

fn load_env(env_file: Option<&Path>) -> Result<()> {
    match env_file {
        Some(path) => {
            dotenv::from_path(path).wrap_err_with(|| format!("Failed to load {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }
    Ok(())
}

fn log_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into())
}

async fn run<G>(service: AssetIssuanceService<G>, command: Command) -> Result<()>
where
    G: LedgerGateway,
{
    match command {
        Command::Derive(args) => {
            let asset = service.derive_identity(&args.into())?;
            println!("{}", asset.into_public_key());
        }
        Command::Issue(args) => {
            let report = service.issue_asset_with_report(&args.into()).await?;
            println!("asset:       {}", report.asset);
            if let Some(receipt) = &report.activation {
                println!("activation:  {} (ledger {})", receipt.hash, receipt.ledger);
            }
            if let Some(receipt) = &report.signatories {
                println!("signatories: {} (ledger {})", receipt.hash, receipt.ledger);
            }
        }
        Command::Status { asset } => {
            let state = service.provisioning_state(&asset).await?;
            println!("{asset}: {state:?}");
        }
        Command::Deliver { buyer, asset, claim } => {
            let request = DeliveryRequest::new(buyer, asset, claim);
            match service.deliver_asset(&request).await {
                Ok(delivery) => {
                    println!("delivered {} to {}", delivery.asset, delivery.buyer);
                    println!("transaction: {} (ledger {})", delivery.receipt.hash, delivery.receipt.ledger);
                }
                Err(e) => {
                    if let IssuanceError::DeliveryRejected { envelope, .. } = &e {
                        // Fields match the `resubmit` arguments
                        if let Ok(xdr) = envelope.envelope.to_xdr_base64() {
                            tracing::error!(
                                envelope = %xdr,
                                signer = %envelope.signer,
                                signature = %general_purpose::STANDARD.encode(&envelope.signature),
                                "Delivery envelope not committed"
                            );
                        }
                    }
                    tracing::error!(kind = ?e.kind(), retryable = e.is_retryable(), "Delivery failed");
                    return Err(e.into());
                }
            }
        }
        Command::Resubmit {
            asset,
            envelope,
            signature,
            signer,
        } => {
            let reply = TxFunctionResponse {
                xdr: envelope,
                signer: signer.unwrap_or(service.config().remote.remote_signer).to_string(),
                signature,
            };
            let receipt = service.resubmit_response(&asset, reply).await?;
            println!("transaction: {} (ledger {})", receipt.hash, receipt.ledger);
        }
    }

    Ok(())
}
