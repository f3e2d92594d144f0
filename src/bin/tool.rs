//! Token Scan Store Tool
//!
//! Offline inspection of a store directory: dump the write log, dump the
//! index content, check the store file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use token_scan_store::store::StoreHeader;
use token_scan_store::tree::Tree;
use token_scan_store::writelog::{dump_write_log, write_log_path, DumpOptions, TxFilter};
use token_scan_store::{Config, EmptyStream, EntityType, Result, TokenScanStore};
use tracing_subscriber::{fmt, EnvFilter};

/// Token scan store inspection tool
#[derive(Parser, Debug)]
#[command(name = "tokenscan-tool")]
#[command(about = "Inspect token scan store files and write logs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the write log of a store, oldest file first
    DumpWritelog {
        /// Database directory
        db_dir: PathBuf,

        #[arg(long, value_enum, default_value = "node")]
        entity_type: EntityTypeArg,

        /// Write to `<writelog>.txt` instead of stdout
        #[arg(long)]
        to_file: bool,

        /// Only show these transactions, e.g. `1,5-9`
        #[arg(long)]
        tx_filter: Option<String>,

        /// Also show ranges, merges, flushes and session ends
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print every range of the index with its entities and tokens
    DumpStore {
        /// Database directory
        db_dir: PathBuf,

        #[arg(long, value_enum, default_value = "node")]
        entity_type: EntityTypeArg,
    },

    /// Check the structure of the store file
    Check {
        /// Database directory
        db_dir: PathBuf,

        #[arg(long, value_enum, default_value = "node")]
        entity_type: EntityTypeArg,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum EntityTypeArg {
    Node,
    Relationship,
}

impl From<EntityTypeArg> for EntityType {
    fn from(arg: EntityTypeArg) -> Self {
        match arg {
            EntityTypeArg::Node => EntityType::Node,
            EntityTypeArg::Relationship => EntityType::Relationship,
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,token_scan_store=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::DumpWritelog {
            db_dir,
            entity_type,
            to_file,
            tx_filter,
            verbose,
        } => dump_writelog(&db_dir, entity_type.into(), to_file, tx_filter.as_deref(), verbose),
        Command::DumpStore {
            db_dir,
            entity_type,
        } => dump_store(&db_dir, entity_type.into()),
        Command::Check {
            db_dir,
            entity_type,
        } => check(&db_dir, entity_type.into()),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn dump_writelog(
    db_dir: &Path,
    entity_type: EntityType,
    to_file: bool,
    tx_filter: Option<&str>,
    verbose: bool,
) -> Result<bool> {
    let store_file = Config::store_file_in(db_dir, entity_type);
    let options = DumpOptions {
        tx_filter: tx_filter.map(TxFilter::parse).transpose()?,
        verbose,
    };

    let summary = if to_file {
        let mut target = write_log_path(&store_file).into_os_string();
        target.push(".txt");
        let mut out = BufWriter::new(File::create(&target)?);
        let summary = dump_write_log(&store_file, &options, &mut out)?;
        out.flush()?;
        tracing::info!("Dump written to {}", PathBuf::from(target).display());
        summary
    } else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        dump_write_log(&store_file, &options, &mut out)?
    };

    tracing::info!(
        files = summary.files,
        records = summary.records,
        entity_changes = summary.entity_changes,
        sessions = summary.sessions,
        torn_files = summary.torn_files,
        "write log dumped"
    );
    Ok(true)
}

fn dump_store(db_dir: &Path, entity_type: EntityType) -> Result<bool> {
    let config = Config::builder()
        .store_dir(db_dir)
        .entity_type(entity_type)
        .read_only(true)
        .build();
    let store = TokenScanStore::open(config, EmptyStream)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut ranges = 0u64;
    for range in store.all_entity_token_ranges()? {
        writeln!(out, "{}", range)?;
        ranges += 1;
    }

    tracing::info!(ranges, path = %store.path().display(), "store dumped");
    Ok(true)
}

fn check(db_dir: &Path, entity_type: EntityType) -> Result<bool> {
    let store_file = Config::store_file_in(db_dir, entity_type);
    let mut issues: Vec<String> = Vec::new();

    match Tree::open(&store_file) {
        Ok(tree) => {
            match StoreHeader::decode(&tree.header()) {
                Ok(header) => tracing::info!(state = ?header.state, "store header"),
                Err(e) => issues.push(e.to_string()),
            }
            tree.consistency_check(&mut issues)?;
        }
        Err(e) if e.is_structural() => issues.push(e.to_string()),
        Err(e) => return Err(e),
    }

    for issue in &issues {
        println!("{}", issue);
    }
    if issues.is_empty() {
        tracing::info!(path = %store_file.display(), "store is consistent");
    } else {
        tracing::warn!(path = %store_file.display(), issues = issues.len(), "store has issues");
    }
    Ok(issues.is_empty())
}
