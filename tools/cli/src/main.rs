//! MedLedger CLI - Command line interface for the record ledger.
//!
//! This tool provides a command-line interface for creating a store,
//! writing and reading encrypted records, managing access grants, and
//! mining and verifying the ledger.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use medledger_app::{CreateOptions, MedLedger, MedLedgerManager};
use medledger_common::{Error, SubjectId};
use medledger_crypto::KdfParams;
use medledger_ledger::Difficulty;
use medledger_records::KeyPolicy;

const PASSWORD_ENV: &str = "MEDLEDGER_PASSWORD";
const LOG_ENV: &str = "MEDLEDGER_LOG";

#[derive(Parser)]
#[command(name = "medledger")]
#[command(about = "MedLedger - Encrypted medical records with a tamper-evident ledger")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the store (default: platform data dir).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new store.
    Init {
        /// KDF strength: "standard" or "sensitive".
        #[arg(short, long, default_value = "standard")]
        strength: String,

        /// Leading zero hex digits required of block hashes.
        #[arg(long, default_value_t = 4)]
        difficulty: u8,

        /// Use one data key for every subject instead of one per subject.
        #[arg(long)]
        shared_key: bool,
    },

    /// Add a record for a subject.
    Add {
        /// Subject the record belongs to.
        subject: String,

        /// Record payload as JSON.
        payload: String,

        /// Accessor performing the write (default: the subject).
        #[arg(long = "as")]
        accessor: Option<String>,
    },

    /// Read one record.
    Read {
        subject: String,
        index: u64,

        /// Accessor performing the read (default: the subject).
        #[arg(long = "as")]
        accessor: Option<String>,

        /// Purpose recorded in the access log.
        #[arg(short, long, default_value = "Record review")]
        purpose: String,
    },

    /// Read every record of a subject.
    History {
        subject: String,

        #[arg(long = "as")]
        accessor: Option<String>,
    },

    /// Replace a record with a new payload.
    Update {
        subject: String,
        index: u64,

        /// New payload as JSON.
        payload: String,

        #[arg(long = "as")]
        accessor: Option<String>,
    },

    /// Let an accessor read a subject's records.
    Grant {
        subject: String,
        accessor: String,

        /// Expire the grant after this many days (1-365, 30 if given bare).
        #[arg(long, num_args = 0..=1, default_missing_value = "30")]
        days: Option<u32>,
    },

    /// Withdraw an accessor's grant.
    Revoke { subject: String, accessor: String },

    /// Show the access log of a subject's records.
    Audit {
        subject: String,

        #[arg(long = "as")]
        accessor: Option<String>,
    },

    /// Mine pending anchors into a block. Ctrl-C cancels.
    Mine {
        /// Miner identity recorded in the log.
        #[arg(short, long, default_value = "node")]
        miner: String,
    },

    /// Verify the ledger.
    Verify,

    /// Print the chain, or one subject's committed anchors.
    Chain {
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Show store information.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    match cli.command {
        Commands::Init {
            strength,
            difficulty,
            shared_key,
        } => cmd_init(&data_dir, &strength, difficulty, shared_key),

        Commands::Add {
            subject,
            payload,
            accessor,
        } => cmd_add(&data_dir, &subject, &payload, accessor.as_deref()),

        Commands::Read {
            subject,
            index,
            accessor,
            purpose,
        } => cmd_read(&data_dir, &subject, index, accessor.as_deref(), &purpose),

        Commands::History { subject, accessor } => {
            cmd_history(&data_dir, &subject, accessor.as_deref())
        }

        Commands::Update {
            subject,
            index,
            payload,
            accessor,
        } => cmd_update(&data_dir, &subject, index, &payload, accessor.as_deref()),

        Commands::Grant {
            subject,
            accessor,
            days,
        } => cmd_grant(&data_dir, &subject, &accessor, days),

        Commands::Revoke { subject, accessor } => cmd_revoke(&data_dir, &subject, &accessor),

        Commands::Audit { subject, accessor } => {
            cmd_audit(&data_dir, &subject, accessor.as_deref())
        }

        Commands::Mine { miner } => cmd_mine(&data_dir, &miner).await,

        Commands::Verify => cmd_verify(&data_dir),

        Commands::Chain { subject } => cmd_chain(&data_dir, subject.as_deref()),

        Commands::Info => cmd_info(&data_dir),
    }
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("medledger"))
        .context("Could not determine a data directory; pass --data-dir")
}

/// Read the password from the environment or prompt for it.
fn read_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(password.into_bytes()));
    }
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password.into_bytes()))
}

fn location(data_dir: &Path) -> serde_json::Value {
    serde_json::json!({ "root": data_dir.to_string_lossy() })
}

fn open(data_dir: &Path) -> Result<MedLedger> {
    let password = read_password("Enter password: ")?;
    MedLedgerManager::new()
        .open("local", location(data_dir), &password)
        .with_context(|| format!("Failed to open store at {}", data_dir.display()))
}

fn subject(id: &str) -> Result<SubjectId> {
    SubjectId::new(id).with_context(|| format!("Invalid subject id '{}'", id))
}

/// The accessor, defaulting to the subject itself.
fn accessor_or(subject_id: &SubjectId, accessor: Option<&str>) -> Result<SubjectId> {
    match accessor {
        Some(id) => subject(id),
        None => Ok(subject_id.clone()),
    }
}

fn parse_payload(payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload).context("Payload is not valid JSON")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Create a new store.
fn cmd_init(data_dir: &Path, strength: &str, difficulty: u8, shared_key: bool) -> Result<()> {
    info!("Creating new store at {}", data_dir.display());

    let kdf_params = match strength {
        "standard" => KdfParams::standard(),
        "sensitive" => KdfParams::sensitive(),
        _ => {
            anyhow::bail!("Invalid strength. Use: standard or sensitive");
        }
    };
    let difficulty = Difficulty::new(difficulty).context("Invalid difficulty")?;
    let key_policy = if shared_key {
        KeyPolicy::Shared
    } else {
        KeyPolicy::PerSubject
    };

    let password = read_password("Enter password: ")?;
    if std::env::var(PASSWORD_ENV).is_err() {
        let confirm = read_password("Confirm password: ")?;
        if password != confirm {
            anyhow::bail!("Passwords do not match");
        }
    }
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let options = CreateOptions {
        kdf_params,
        difficulty,
        key_policy,
    };
    let mut core = MedLedgerManager::new()
        .create(&password, "local", location(data_dir), options)
        .context("Failed to create store")?;
    core.flush()?;

    println!("Store created successfully!");
    println!("  Location: {}", data_dir.display());
    println!("  Difficulty: {}", difficulty);
    println!("  Key policy: {}", key_policy);

    Ok(())
}

/// Add a record.
fn cmd_add(data_dir: &Path, subject_id: &str, payload: &str, accessor: Option<&str>) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = accessor_or(&subject_id, accessor)?;
    let payload = parse_payload(payload)?;

    let mut core = open(data_dir)?;
    let id = core
        .create_record(&subject_id, &accessor, &payload)
        .context("Failed to add record")?;
    core.flush()?;

    println!("Record added: {}", id);
    Ok(())
}

/// Read one record.
fn cmd_read(
    data_dir: &Path,
    subject_id: &str,
    index: u64,
    accessor: Option<&str>,
    purpose: &str,
) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = accessor_or(&subject_id, accessor)?;

    let core = open(data_dir)?;
    let payload = core
        .read_record(&subject_id, index, &accessor, purpose)
        .context("Failed to read record")?;

    print_json(&payload)
}

/// Read a subject's full history.
fn cmd_history(data_dir: &Path, subject_id: &str, accessor: Option<&str>) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = accessor_or(&subject_id, accessor)?;

    let core = open(data_dir)?;
    let history = core
        .read_history(&subject_id, &accessor)
        .context("Failed to read history")?;

    if history.is_empty() {
        println!("No records for {}.", subject_id);
        return Ok(());
    }
    print_json(&history)
}

/// Replace a record.
fn cmd_update(
    data_dir: &Path,
    subject_id: &str,
    index: u64,
    payload: &str,
    accessor: Option<&str>,
) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = accessor_or(&subject_id, accessor)?;
    let payload = parse_payload(payload)?;

    let mut core = open(data_dir)?;
    let updated = core
        .update_record(&subject_id, index, &accessor, &payload)
        .context("Failed to update record")?;
    core.flush()?;

    if updated {
        println!("Record updated: {}/{}", subject_id, index);
    } else {
        println!("No record at {}/{}; nothing changed.", subject_id, index);
    }
    Ok(())
}

/// Grant access.
fn cmd_grant(data_dir: &Path, subject_id: &str, accessor: &str, days: Option<u32>) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = subject(accessor)?;

    let core = open(data_dir)?;
    match days {
        Some(days) => {
            core.grant_access_for(&subject_id, &accessor, days)
                .context("Failed to grant access")?;
            println!("Granted {} access to {} for {} days.", accessor, subject_id, days);
        }
        None => {
            core.grant_access(&subject_id, &accessor)
                .context("Failed to grant access")?;
            println!("Granted {} access to {} until revoked.", accessor, subject_id);
        }
    }
    Ok(())
}

/// Revoke access.
fn cmd_revoke(data_dir: &Path, subject_id: &str, accessor: &str) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = subject(accessor)?;

    let core = open(data_dir)?;
    core.revoke_access(&subject_id, &accessor)
        .context("Failed to revoke access")?;

    println!("Revoked {}'s access to {}.", accessor, subject_id);
    Ok(())
}

/// Show the access log.
fn cmd_audit(data_dir: &Path, subject_id: &str, accessor: Option<&str>) -> Result<()> {
    let subject_id = subject(subject_id)?;
    let accessor = accessor_or(&subject_id, accessor)?;

    let core = open(data_dir)?;
    let log = core
        .read_audit_log(&subject_id, &accessor)
        .context("Failed to read access log")?;

    if log.is_empty() {
        println!("No accesses recorded for {}.", subject_id);
        return Ok(());
    }
    for entry in log {
        println!(
            "{}  {:<20} {}",
            entry.timestamp.to_rfc3339(),
            entry.accessor_id,
            entry.purpose
        );
    }
    Ok(())
}

/// Mine a block on a blocking thread, cancelling on Ctrl-C.
async fn cmd_mine(data_dir: &Path, miner: &str) -> Result<()> {
    let miner = subject(miner)?;
    let core = Arc::new(open(data_dir)?);
    let pending = core.ledger().pending_transactions().len();
    info!(pending, difficulty = %core.ledger().difficulty(), "Mining");

    let cancel = Arc::new(AtomicBool::new(false));
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping mining");
                cancel.store(true, Ordering::Relaxed);
            }
        }
    });

    let result = tokio::task::spawn_blocking({
        let core = core.clone();
        let cancel = cancel.clone();
        move || core.mine_cancellable(&miner, &cancel)
    })
    .await
    .context("Mining task panicked")?;
    watcher.abort();

    match result {
        Ok(block) => {
            println!("Mined block {}", block.index);
            println!("  Hash: {}", block.hash);
            println!("  Nonce: {}", block.nonce);
            println!("  Transactions: {}", block.transactions.len());
            Ok(())
        }
        Err(Error::MiningCancelled(index)) => {
            println!("Mining of block {} cancelled; pending anchors kept.", index);
            Ok(())
        }
        Err(e) => Err(e).context("Mining failed"),
    }
}

/// Verify the chain.
fn cmd_verify(data_dir: &Path) -> Result<()> {
    let core = open(data_dir)?;
    match core.verify_ledger_detailed() {
        Ok(()) => {
            println!("Ledger valid ({} blocks).", core.ledger().len());
            Ok(())
        }
        Err(e) => {
            println!("Ledger INVALID: {}", e);
            std::process::exit(2);
        }
    }
}

/// Print blocks or a subject's anchors.
fn cmd_chain(data_dir: &Path, subject_id: Option<&str>) -> Result<()> {
    let core = open(data_dir)?;
    match subject_id {
        Some(id) => print_json(&core.subject_transactions(&subject(id)?)),
        None => print_json(&core.ledger().blocks()),
    }
}

/// Show store information.
fn cmd_info(data_dir: &Path) -> Result<()> {
    let core = open(data_dir)?;
    let config = core.config().context("Store has no configuration")?;
    let ledger = core.ledger();

    println!("Store Information:");
    println!("  Location: {}", data_dir.display());
    println!("  Version: {}.{}", config.version.major, config.version.minor);
    println!("  Backend: {}", config.backend_type);
    println!("  Created: {}", config.created_at);
    println!("  Modified: {}", config.modified_at);
    println!("  KDF iterations: {}", config.kdf_params.iterations);
    println!("  Key policy: {}", config.key_policy);
    println!("  Difficulty: {}", config.difficulty);
    println!("Ledger:");
    println!("  Blocks: {}", ledger.len());
    println!("  Pending transactions: {}", ledger.pending_transactions().len());
    if let Some(tip) = ledger.last_block() {
        println!("  Tip: {} ({})", tip.index, tip.hash);
    }
    println!("Records:");
    for subject_id in core.subjects() {
        println!("  {}: {}", subject_id, core.record_count(&subject_id));
    }

    Ok(())
}
