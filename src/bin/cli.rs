//! tickstore CLI
//!
//! Offline tools for WAL files and bucket files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tickstore::integrity::{self, IntegrityOptions};
use tickstore::storage::PrimaryStore;
use tickstore::wal::WalFile;
use tracing_subscriber::{fmt, EnvFilter};

/// tickstore CLI
#[derive(Parser, Debug)]
#[command(name = "tickstore-cli")]
#[command(about = "Inspection tools for tickstore data directories")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the messages of a WAL file without modifying it
    WalInspect {
        /// The WAL file to read
        file: PathBuf,
    },

    /// Print chunk checksums of every bucket file under a data directory
    Integrity {
        /// Data directory to scan
        #[arg(long)]
        root_dir: PathBuf,

        /// Number of data chunks per file
        #[arg(long, default_value = "12")]
        chunks: usize,

        #[arg(long)]
        year_start: Option<i32>,

        #[arg(long)]
        year_end: Option<i32>,

        /// First month to print (with 12 chunks)
        #[arg(long)]
        month_start: Option<u32>,

        /// Last month to print (with 12 chunks)
        #[arg(long)]
        month_end: Option<u32>,

        /// Check files on several threads
        #[arg(long)]
        parallel: bool,

        /// Rewrite all-Int32 OHLC headers as Float32 before checking
        #[arg(long)]
        fix_headers: bool,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let result = match args.command {
        Commands::WalInspect { file } => wal_inspect(file),
        Commands::Integrity {
            root_dir,
            chunks,
            year_start,
            year_end,
            month_start,
            month_end,
            parallel,
            fix_headers,
        } => {
            let opts = IntegrityOptions {
                root_dir,
                chunks,
                year_start,
                year_end,
                month_start,
                month_end,
                parallel,
                fix_headers,
            };
            integrity::run(&opts).map(|reports| {
                for report in reports {
                    println!("{}", report);
                }
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn wal_inspect(file: PathBuf) -> tickstore::Result<()> {
    let mut wal = WalFile::open_read_only(&file)?;
    let status = wal.status();
    println!("{}", file.display());
    println!(
        "  status: {:?} {:?} owner={}",
        status.file_status, status.replay_state, status.owning_instance_id
    );

    // Verbose replay never touches the store
    let store = PrimaryStore::new(file.parent().unwrap_or(file.as_path()));
    let report = wal.replay(true, &store)?;
    for line in &report.groups {
        println!("  {}", line);
    }
    println!(
        "  valid groups: {}  checkpointed: {}  pending replay: {:?}",
        report.valid_groups, report.checkpointed, report.applied_tgids
    );
    if let Some(reason) = &report.stop_reason {
        println!("  stopped early: {}", reason);
    }
    Ok(())
}
