//! mirrorkeep - one-way directory mirroring driven by per-directory rules files.
//!
//! Usage:
//!   mirrorkeep run                  Mirror every configured source
//!   mirrorkeep run -s DIR -d DEST   Mirror without a config file
//!   mirrorkeep roots                List backup roots and their destinations
//!   mirrorkeep init                 Write a sample config file
//!   mirrorkeep --help               Show help

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use mirrorkeep_core::{BackupConfig, DestinationLayout};
use mirrorkeep_sync::{BackupRunner, RunReport};

use settings::{FileConfig, Overrides};

/// Exit status of a run that finished but logged failures.
const EXIT_WITH_ERRORS: u8 = 2;

#[derive(Parser)]
#[command(
    name = "mirrorkeep",
    version,
    about = "One-way directory mirroring for backups",
    long_about = "mirrorkeep mirrors every directory that carries a rules file \
                  (backups.gitignore by default) into a backup destination, \
                  skipping entries that match the file's glob patterns."
)]
struct Cli {
    /// Config file (defaults to <config dir>/mirrorkeep/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror every backup root into the destination
    Run {
        /// Source directory to search for backup roots (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<PathBuf>,

        /// Destination root
        #[arg(short, long = "dest")]
        destination: Option<PathBuf>,

        /// Snapshot file
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Copy worker threads (0 = one per CPU)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// How roots are placed under the destination
        #[arg(long)]
        layout: Option<LayoutArg>,

        /// Save the snapshot after each source
        #[arg(long)]
        checkpoint: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List discovered backup roots
    Roots {
        /// Source directory to search (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<PathBuf>,

        /// Destination root
        #[arg(short, long = "dest")]
        destination: Option<PathBuf>,

        /// How roots are placed under the destination
        #[arg(long)]
        layout: Option<LayoutArg>,
    },

    /// Write a commented sample config file
    Init {
        /// Output file (defaults to --config or the default location)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayoutArg {
    Flat,
    Namespaced,
}

impl From<LayoutArg> for DestinationLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Flat => DestinationLayout::Flat,
            LayoutArg::Namespaced => DestinationLayout::Namespaced,
        }
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            sources,
            destination,
            snapshot,
            threads,
            layout,
            checkpoint,
            json,
        } => {
            let overrides = Overrides {
                sources,
                destination,
                snapshot_path: snapshot,
                threads,
                layout: layout.map(Into::into),
                checkpoint,
            };
            let config = FileConfig::load(cli.config.as_deref())?.into_backup_config(overrides)?;
            run_backup(config, json)
        }
        Command::Roots {
            sources,
            destination,
            layout,
        } => {
            let overrides = Overrides {
                sources,
                destination,
                layout: layout.map(Into::into),
                ..Default::default()
            };
            let config = FileConfig::load(cli.config.as_deref())?.into_backup_config(overrides)?;
            run_roots(config)
        }
        Command::Init { output, force } => {
            let Some(path) = output.or(cli.config).or_else(settings::default_config_path) else {
                bail!("No config directory found; pass --output");
            };
            settings::write_sample(&path, force)?;
            eprintln!("Wrote sample config to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Log to stderr so `--json` output stays clean. `RUST_LOG` wins over flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Perform a backup run and print its report.
fn run_backup(config: BackupConfig, json: bool) -> Result<ExitCode> {
    let runner = BackupRunner::new(config);
    let report = runner.run().wrap_err("Backup failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&runner.config().destination, &report);
    }

    Ok(exit_code(report.is_clean()))
}

fn print_summary(destination: &std::path::Path, report: &RunReport) {
    let stats = &report.stats;

    println!();
    println!("{}", "─".repeat(60));
    println!(" Backup to {}", destination.display());
    println!(
        " Copied {} files. Deleted {} files. Modified {} files.",
        stats.copied, stats.deleted, stats.modified
    );
    println!(
        " {} entries checked, {} files hashed, {} written",
        stats.checked,
        stats.hashed,
        format_size(stats.bytes_copied)
    );
    println!(
        " {} roots in {:.2}s, snapshot holds {} entries",
        report.roots.len(),
        report.duration.as_secs_f64(),
        report.snapshot_entries
    );
    println!("{}", "─".repeat(60));

    if !report.errors.is_empty() {
        println!();
        println!(" {} error(s):", report.errors.len());
        for error in &report.errors {
            println!("   {error}");
        }
    }
}

/// List backup roots under every source and where each is mirrored.
fn run_roots(config: BackupConfig) -> Result<ExitCode> {
    let runner = BackupRunner::new(config);
    let (roots, errors) = runner.discover();

    for root in &roots {
        match runner.config().destination_for(&root.source, &root.path) {
            Some(destination) => println!("{} -> {}", root.path.display(), destination.display()),
            None => println!("{}", root.path.display()),
        }
    }
    for error in &errors {
        eprintln!("warning: {error}");
    }

    Ok(exit_code(errors.is_empty()))
}

fn exit_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_WITH_ERRORS)
    }
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
