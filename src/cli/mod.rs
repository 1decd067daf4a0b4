//! Command-line interface for beatchain.
//!
//! Provides commands for running the HTTP server, finalizing and minting
//! beats, contributing segments, and inspecting the ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{ContentStore, LedgerReader};
use crate::config::Settings;
use crate::core::{retry, submit_mint, upload_name_hint};
use crate::domain::Contributor;
use crate::server::{self, BeatView, Services};

/// beatchain - collaborative beat finalization service
#[derive(Parser, Debug)]
#[command(name = "beatchain")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Assemble and publish a completed beat
    Finalize {
        /// Beat ID
        beat_id: u64,

        /// Submit the mint transaction afterwards
        #[arg(long, requires = "from")]
        mint: bool,

        /// Sender address for the mint transaction
        #[arg(long)]
        from: Option<String>,
    },

    /// Pin a file to the content store
    Upload {
        /// File to upload
        file: PathBuf,
    },

    /// Start a new beat with an opening segment
    Start {
        /// WAV file of the opening segment
        file: PathBuf,

        /// Contributor address
        #[arg(long)]
        from: String,
    },

    /// Contribute the next segment of a beat
    AddSegment {
        /// Beat ID
        beat_id: u64,

        /// WAV file of the segment
        file: PathBuf,

        /// Contributor address
        #[arg(long)]
        from: String,
    },

    /// Show a beat's ledger record
    Beat {
        /// Beat ID
        beat_id: u64,
    },

    /// List beats on the ledger
    Beats {
        /// Maximum number of beats to show (most recent first)
        #[arg(short, long, default_value = "20")]
        limit: u64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut settings = Settings::load().context("Failed to load configuration")?;

        match self.command {
            Commands::Serve { bind } => {
                if let Some(bind) = bind {
                    settings.bind_address = bind;
                }
                server::serve(&settings).await
            }
            Commands::Finalize {
                beat_id,
                mint,
                from,
            } => {
                finalize(&settings, beat_id, mint, from).await
            }
            Commands::Upload { file } => {
                upload(&settings, &file).await
            }
            Commands::Start { file, from } => {
                start_beat(&settings, &file, &from).await
            }
            Commands::AddSegment {
                beat_id,
                file,
                from,
            } => {
                add_segment(&settings, beat_id, &file, &from).await
            }
            Commands::Beat { beat_id } => {
                show_beat(&settings, beat_id).await
            }
            Commands::Beats { limit } => {
                list_beats(&settings, limit).await
            }
            Commands::Config => {
                show_config(&settings)
            }
        }
    }
}

fn services(settings: &Settings) -> Result<Services> {
    Services::from_settings(settings).context("Configuration is incomplete")
}

fn contributor(address: &str) -> Result<Contributor> {
    Contributor::new(address).with_context(|| format!("Invalid contributor: {}", address))
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Finalize a beat and optionally mint it
async fn finalize(
    settings: &Settings,
    beat_id: u64,
    mint: bool,
    from: Option<String>,
) -> Result<()> {
    let services = services(settings)?;

    let result = services
        .orchestrator
        .finalize(beat_id)
        .await
        .with_context(|| format!("Failed to finalize beat {}", beat_id))?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if mint {
        let from = contributor(from.as_deref().unwrap_or_default())?;
        let receipt = submit_mint(
            services.writer.as_ref(),
            &from,
            &result,
            settings.retry.attempt_timeout(),
        )
        .await
        .context("Mint transaction failed")?;

        eprintln!("[Beat {} minted: {}]", beat_id, receipt.tx_hash);
    }

    Ok(())
}

/// Pin a raw file
async fn upload(settings: &Settings, file: &Path) -> Result<()> {
    let store = server::store_from_settings(settings).context("Configuration is incomplete")?;
    let bytes = read_file(file).await?;

    let name = upload_name_hint(chrono::Utc::now());
    let (store, name, bytes) = (&store, name.as_str(), &bytes);
    let cid = retry(&settings.retry, "upload", move || store.put(bytes.clone(), name))
        .await
        .map_err(crate::Error::from)
        .with_context(|| format!("Failed to upload {}", file.display()))?;

    println!("{}", cid);
    Ok(())
}

/// Create a new beat
async fn start_beat(settings: &Settings, file: &Path, from: &str) -> Result<()> {
    let services = services(settings)?;
    let from = contributor(from)?;
    let audio = read_file(file).await?;

    let cid = services.admission.admit_initial(&from, audio).await?;
    let receipt = services
        .admission
        .submit_initial(services.writer.as_ref(), &from, &cid)
        .await
        .context("startBeat transaction failed")?;

    println!("Segment: {}", cid);
    println!("Transaction: {}", receipt.tx_hash);
    Ok(())
}

/// Append the next segment to a beat
async fn add_segment(settings: &Settings, beat_id: u64, file: &Path, from: &str) -> Result<()> {
    let services = services(settings)?;
    let from = contributor(from)?;
    let audio = read_file(file).await?;

    let request = services.admission.admit(beat_id, &from, audio).await?;
    let receipt = services
        .admission
        .submit(services.writer.as_ref(), &request)
        .await
        .with_context(|| {
            format!(
                "Segment {} was uploaded but the ledger did not accept it",
                request.cid
            )
        })?;

    println!("Slot: {}", request.slot + 1);
    println!("Segment: {}", request.cid);
    println!("Transaction: {}", receipt.tx_hash);
    Ok(())
}

fn ledger(settings: &Settings) -> Result<Arc<dyn LedgerReader>> {
    let ledger = server::ledger_from_settings(settings).context("Configuration is incomplete")?;
    Ok(Arc::new(ledger))
}

/// Show a single beat
async fn show_beat(settings: &Settings, beat_id: u64) -> Result<()> {
    let reader = ledger(settings)?;
    let reader = reader.as_ref();

    let beat = retry(&settings.retry, "read beat", move || reader.get_beat_details(beat_id))
        .await
        .map_err(crate::Error::from)?;

    println!("{}", serde_json::to_string_pretty(&BeatView::from(&beat))?);
    Ok(())
}

/// List recent beats
async fn list_beats(settings: &Settings, limit: u64) -> Result<()> {
    let reader = ledger(settings)?;
    let reader = reader.as_ref();

    let total = retry(&settings.retry, "count beats", move || reader.get_total_beats())
        .await
        .map_err(crate::Error::from)?;

    if total == 0 {
        println!("No beats found");
        return Ok(());
    }

    println!("{:<8} {:<12} {:<10} {:<8}", "BEAT", "STATUS", "SEGMENTS", "MINTED");
    println!("{}", "-".repeat(42));

    let oldest = total.saturating_sub(limit) + 1;
    for beat_id in (oldest..=total).rev() {
        let beat = retry(&settings.retry, "read beat", move || reader.get_beat_details(beat_id))
            .await
            .map_err(crate::Error::from)?;

        println!(
            "{:<8} {:<12} {:<10} {:<8}",
            beat.id(),
            beat.status().to_string(),
            format!("{}/3", beat.segment_count()),
            if beat.is_minted() { "yes" } else { "no" }
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(settings: &Settings) -> Result<()> {
    println!("beatchain configuration");
    println!();
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Server:");
    println!("  Bind:            {}", settings.bind_address);
    println!("  Max upload:      {} bytes", settings.max_upload_bytes);
    println!();
    println!("Store:");
    println!("  API:             {}", settings.store.api_url);
    println!("  Gateway:         {}", settings.store.gateway_url);
    println!(
        "  Credentials:     {}",
        match settings.pinata_credentials() {
            Ok(crate::adapters::PinataCredentials::Jwt(_)) => "JWT",
            Ok(crate::adapters::PinataCredentials::KeyPair { .. }) => "API key pair",
            Err(_) => "(missing)",
        }
    );
    println!();
    println!("Ledger:");
    println!(
        "  RPC URL:         {}",
        settings.ledger.rpc_url.as_deref().unwrap_or("(missing)")
    );
    println!(
        "  Contract:        {}",
        settings.ledger.contract_address.as_deref().unwrap_or("(missing)")
    );
    println!();
    println!("Retry policy:");
    println!("  Max attempts:    {}", settings.retry.max_attempts);
    println!("  Initial delay:   {}ms", settings.retry.initial_delay_ms);
    println!("  Max delay:       {}ms", settings.retry.max_delay_ms);
    println!("  Multiplier:      {}", settings.retry.backoff_multiplier);
    println!("  Attempt timeout: {}ms", settings.retry.attempt_timeout_ms);
    println!();
    println!("Admission:");
    println!(
        "  Self-collaboration: {}",
        settings.admission.allow_self_collaboration
    );
    println!("  Max segment:        {} bytes", settings.admission.max_segment_bytes);
    if let Some(format) = settings.admission.expected_format {
        println!("  Expected format:    {}", format);
    }

    Ok(())
}
