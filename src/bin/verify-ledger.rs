use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vault_ledger::ledger::{Checkpoint, Digest, EMPTY_ROOT};
use vault_ledger::store::open_store;
use vault_ledger::verify::{
    error_exit_code, exit_code, VerificationResult, VerificationService, EXIT_ERROR, EXIT_INVALID,
};
use vault_ledger::{LedgerConfig, LedgerError};

/// Verify the integrity of a persisted vault ledger
#[derive(Parser, Debug)]
#[command(name = "verify-ledger", version, about)]
struct Args {
    /// Configuration file (TOML); environment overrides still apply
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Trust entries before this sequence and verify from it onward
    #[arg(short, long, value_name = "SEQUENCE", conflicts_with = "checkpoint")]
    since: Option<u64>,

    /// Resume from a checkpoint written by --save-checkpoint
    #[arg(long, value_name = "PATH")]
    checkpoint: Option<PathBuf>,

    /// Write the last verified checkpoint here
    #[arg(long, value_name = "PATH")]
    save_checkpoint: Option<PathBuf>,

    /// Expected Merkle root of the whole ledger (hex)
    #[arg(short = 'm', long, value_name = "HASH")]
    expected_root: Option<String>,

    /// Scan the whole chain and report every finding
    #[arg(short, long, conflicts_with_all = ["since", "checkpoint"])]
    audit: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    let code = match run(&args).await {
        Ok(code) => code,
        Err(err) => {
            error!("Ledger verification aborted: {:#}", err);
            if !args.quiet {
                eprintln!("Error: {:#}", err);
            }
            err.downcast_ref::<LedgerError>()
                .map_or(EXIT_ERROR, error_exit_code)
        }
    };
    std::process::exit(code);
}

fn init_logging(args: &Args) {
    let filter = if args.quiet {
        EnvFilter::new("error")
    } else if args.verbose {
        EnvFilter::new("vault_ledger=debug,verify_ledger=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("vault_ledger=info,verify_ledger=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: &Args) -> Result<i32> {
    let config = LedgerConfig::load(args.config.as_deref())?;
    let opened = open_store(&config.storage).await?.ok_or_else(|| {
        LedgerError::ConfigError(
            "memory backend holds no persisted ledger; configure file or sqlite storage"
                .to_string(),
        )
    })?;
    let store = &*opened;
    let service = VerificationService::new(&config.verification);

    if args.audit {
        let report = service.audit_chain(store).await?;
        if !args.quiet {
            println!("{}", report.summary());
        }
        return Ok(report.exit_code());
    }

    let outcome = match (&args.checkpoint, args.since) {
        (Some(path), _) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading checkpoint {}", path.display()))?;
            let checkpoint: Checkpoint = serde_json::from_str(&raw).map_err(LedgerError::from)?;
            info!("Loaded {}", checkpoint.summary());
            service.verify_from_checkpoint(store, &checkpoint).await
        }
        (None, Some(since)) => service.verify_since(store, since).await,
        (None, None) => service.verify_chain(store).await,
    };
    let code = exit_code(&outcome);
    let result = outcome?;

    if !args.quiet {
        println!("{}", result.summary());
        if args.verbose {
            print_details(&result);
        }
    }

    if !result.valid {
        return Ok(code);
    }

    if let Some(path) = &args.save_checkpoint {
        match &result.checkpoint {
            Some(checkpoint) => {
                tokio::fs::write(path, serde_json::to_string_pretty(checkpoint)?)
                    .await
                    .with_context(|| format!("writing checkpoint {}", path.display()))?;
                info!("Saved {} to {}", checkpoint.summary(), path.display());
            }
            None => info!("Ledger is empty; no checkpoint written"),
        }
    }

    if let Some(expected) = &args.expected_root {
        let expected: Digest = expected.parse()?;
        let actual = result
            .checkpoint
            .as_ref()
            .map_or(EMPTY_ROOT, |c| c.merkle_root);
        if actual != expected {
            error!("Merkle root mismatch. Expected: {}, Got: {}", expected, actual);
            if !args.quiet {
                println!("❌ Merkle root {} does not match expected {}", actual, expected);
            }
            return Ok(EXIT_INVALID);
        }
        if !args.quiet {
            println!("✅ Merkle root matches expected value");
        }
    }

    Ok(code)
}

fn print_details(result: &VerificationResult) {
    println!("\nLedger Summary:");
    println!("  Entries checked: {}", result.entries_checked);
    println!("  Hashes computed: {}", result.hashes_computed);
    if let Some(checkpoint) = &result.checkpoint {
        println!("  Head sequence: {}", checkpoint.sequence);
        println!("  Head hash: {}", checkpoint.entry_hash);
        println!("  Merkle root: {}", checkpoint.merkle_root);
    }
}
