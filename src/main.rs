//! # FBS CLI (`fbs`)
//!
//! The `fbs` binary drives scanning, reconciliation and the helpers around
//! them.
//!
//! ## Usage
//!
//! ```bash
//! fbs --config ./config/fbs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fbs init` | Create the index (or the SQLite schema) |
//! | `fbs scan` | Extract and index a dataset, a file list, or a window of one |
//! | `fbs reconcile <spot>` | Find unindexed files, or delete stale documents |
//! | `fbs make-list <dataset>` | Write the file list of a dataset (or `all`) |
//! | `fbs plan <list-dir>` | Emit one windowed `fbs scan` command per job |
//! | `fbs classify <paths..>` | Show which extractor handles each path |
//! | `fbs stats` | Document counts |
//!
//! ## Examples
//!
//! ```bash
//! # Scan one window of a prepared list at level 3
//! fbs scan --file-list lists/faam.txt --level 3 --start 800 --count 800
//!
//! # Report files under a spot that never made it into the index
//! fbs reconcile spot-1234-faam --output faam_missing.txt
//!
//! # Remove documents for files deleted from disk
//! fbs reconcile spot-1234-faam --deleted
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use fbs::config::{self, Config};
use fbs::file_list::{self, Datasets};
use fbs::reconcile::{self, ReconcileRequest};
use fbs::scan::{self, ScanRequest, ScanSource};
use fbs::{classifier, logging, stats};

/// File-based search indexer for scientific data archives.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fbs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fbs",
    about = "FBS: file-based metadata crawler and search-index builder",
    version,
    long_about = "FBS walks archive directories, extracts per-file metadata (stat info, \
    phenomena, spatial and temporal coverage) and bulk-loads it into a search index keyed \
    by the SHA-1 of each path. It also reconciles the index against the filesystem."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/fbs.toml`. Index, scan, handler, identity and
    /// logging settings are read from this file.
    #[arg(long, global = true, default_value = "./config/fbs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index.
    ///
    /// For Elasticsearch this creates the index with the keyword mapping;
    /// for SQLite it creates the database file and tables. Idempotent.
    Init,

    /// Extract metadata from files and index it.
    ///
    /// Exits 0 whenever the run completes, even if individual files failed;
    /// the summary line reports the error counts.
    Scan(ScanArgs),

    /// Compare the index with the filesystem for one spot.
    ///
    /// Without `--deleted`, lists files on disk that have no document.
    /// With `--deleted`, finds documents whose files are gone and deletes
    /// them.
    Reconcile {
        /// Spot name, as stored in `info.spot_name`.
        spot: String,

        /// Directory to walk. Defaults to the spot's path in the spot mapping.
        path: Option<PathBuf>,

        /// Look for deleted files instead of missing ones.
        #[arg(long)]
        deleted: bool,

        /// With `--deleted`: report stale documents without deleting them.
        #[arg(long)]
        dry_run: bool,

        /// Output file. Defaults to `<spot>_missing.txt` or `<spot>_deleted.txt`.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Walk a dataset directory and write its file list.
    MakeList {
        /// Dataset id from the datasets file, or `all`.
        dataset: String,

        /// Directory the `<dataset>.txt` lists are written to.
        #[arg(long, default_value = "./lists")]
        out_dir: PathBuf,

        /// Datasets file. Overrides `scan.datasets_file`.
        #[arg(long)]
        datasets: Option<PathBuf>,
    },

    /// Partition file lists into scan windows for a batch scheduler.
    ///
    /// Prints (or writes) one `fbs scan` command per window of every
    /// `.txt` list in LIST_DIR.
    Plan {
        list_dir: PathBuf,

        /// Files per window.
        #[arg(long, default_value_t = 10_000)]
        size: usize,

        #[arg(long, short, default_value_t = 2)]
        level: u8,

        /// Write the commands here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show which extractor the classifier picks for each path.
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show document counts.
    Stats {
        /// Only count documents of this spot.
        #[arg(long)]
        spot: Option<String>,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Dataset id from the datasets file; its directory is walked.
    #[arg(long, conflicts_with = "file_list", required_unless_present = "file_list")]
    dataset: Option<String>,

    /// File list, one absolute path per line.
    #[arg(long)]
    file_list: Option<PathBuf>,

    /// Detail level: 1 stat, 2 phenomena, 3 spatial/temporal coverage.
    #[arg(long, short)]
    level: Option<u8>,

    /// First list entry of the window.
    #[arg(long, requires = "count")]
    start: Option<usize>,

    /// Number of list entries in the window.
    #[arg(long, requires = "start")]
    count: Option<usize>,

    /// Target index name. Overrides `index.name`.
    #[arg(long)]
    index: Option<String>,

    /// Compute SHA-256 content checksums.
    #[arg(long)]
    checksum: bool,
}

/// Load the config file when it exists, otherwise run with defaults.
fn load_optional(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require a config file
    match &cli.command {
        Commands::Classify { paths } => {
            let cfg = load_optional(&cli.config)?;
            logging::init_logging(&cfg.logging, None)?;
            classifier::run_classify(&cfg.handlers, paths)?;
            return Ok(());
        }
        Commands::Plan {
            list_dir,
            size,
            level,
            output,
        } => {
            let cfg = load_optional(&cli.config)?;
            logging::init_logging(&cfg.logging, None)?;
            let commands = file_list::plan_commands(list_dir, *size, *level, &cli.config)?;
            match output {
                Some(path) => {
                    let n = file_list::write_file_list(path, &commands)?;
                    println!("{} commands written to {}", n, path.display());
                }
                None => {
                    for command in &commands {
                        println!("{}", command);
                    }
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            logging::init_logging(&cfg.logging, None)?;
            let index = fbs::open_index(&cfg).await?;
            index.create_index().await?;
            println!("Index '{}' initialized.", cfg.index.name);
        }
        Commands::Scan(args) => {
            if let Some(name) = args.index {
                cfg.index.name = name;
                config::validate(&cfg)?;
            }
            let source = match (args.dataset, args.file_list) {
                (Some(dataset), _) => ScanSource::Dataset(dataset),
                (None, Some(list)) => ScanSource::FileList(list),
                (None, None) => anyhow::bail!("one of --dataset or --file-list is required"),
            };
            let window = scan::window_from_args(args.start, args.count)?;
            let run_label = match window {
                Some(w) => format!("{} {} {}", source.label(), w.start, w.count),
                None => source.label(),
            };
            logging::init_logging(&cfg.logging, Some((cfg.index.name.as_str(), run_label.as_str())))?;

            scan::run_scan(
                &cfg,
                ScanRequest {
                    source,
                    level: args.level,
                    window,
                    checksum: args.checksum,
                },
            )
            .await?;
        }
        Commands::Reconcile {
            spot,
            path,
            deleted,
            dry_run,
            output,
        } => {
            let mode = if deleted { "deleted" } else { "missing" };
            let run_label = format!("{} {}", spot, mode);
            logging::init_logging(&cfg.logging, Some((cfg.index.name.as_str(), run_label.as_str())))?;
            reconcile::run_reconcile(
                &cfg,
                ReconcileRequest {
                    spot,
                    path,
                    deleted,
                    dry_run,
                    output,
                },
            )
            .await?;
        }
        Commands::MakeList {
            dataset,
            out_dir,
            datasets,
        } => {
            logging::init_logging(&cfg.logging, None)?;
            let table = datasets
                .or_else(|| cfg.scan.datasets_file.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("no datasets file: pass --datasets or set scan.datasets_file")
                })?;
            let datasets = Datasets::load(&table)?;
            for (id, n) in file_list::make_lists(&datasets, &dataset, &out_dir, &cfg.scan)? {
                println!("{}: {} files", id, n);
            }
        }
        Commands::Stats { spot } => {
            logging::init_logging(&cfg.logging, None)?;
            stats::run_stats(&cfg, spot.as_deref()).await?;
        }
        Commands::Classify { .. } | Commands::Plan { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
