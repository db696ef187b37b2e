use clap::{ArgAction, Parser, Subcommand};
use sheetdisk::config::{TransferConfig, DEFAULT_CHARS_PER_RECORD, DEFAULT_RECORDS_PER_CONTAINER};
use sheetdisk::transfer::{DownloadOrchestrator, UploadOrchestrator, UploadStart};
use sheetdisk::{LocalBackend, Manifest};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheet-disk", about = "Resumable file transfer over record-limited container stores")]
struct Cli {
    /// Root directory of the container store
    #[arg(long, env = "SHEET_DISK_STORE", default_value = "sheet-disk-store", global = true)]
    store: PathBuf,
    /// Increase log detail (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Do not draw the progress bar
    #[arg(long, global = true)]
    no_progress: bool,
    /// Parallel record workers per container (default 10 up, 11 down)
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Encoded characters per record, excluding the reserved marker
    #[arg(long, default_value_t = DEFAULT_CHARS_PER_RECORD, global = true)]
    chars_per_record: usize,
    /// Records per container
    #[arg(long, default_value_t = DEFAULT_RECORDS_PER_CONTAINER, global = true)]
    records_per_container: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file; pass a manifest to resume an interrupted upload
    Upload {
        file:     PathBuf,
        manifest: Option<PathBuf>,
        /// Where the manifest is written
        #[arg(long, default_value = ".")]
        manifest_dir: PathBuf,
    },
    /// Rebuild a file from its manifest
    Download {
        output:   PathBuf,
        manifest: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut config = TransferConfig {
        chars_per_record:      cli.chars_per_record,
        records_per_container: cli.records_per_container,
        show_progress:         !cli.no_progress,
        ..TransferConfig::default()
    };
    if let Some(workers) = cli.workers {
        config.upload_workers = workers;
        config.download_workers = workers;
    }
    config.validate()?;

    // First Ctrl-C stops between containers so state is saved; the second
    // exits at once.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            if stop.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            warn!("interrupt received, stopping after the current container (press Ctrl-C again to abort)");
        })?;
    }

    match cli.command {

        // ── Upload ───────────────────────────────────────────────────────────
        Commands::Upload { file, manifest, manifest_dir } => {
            if !file.is_file() {
                return Err(format!("file to upload not found: {}", file.display()).into());
            }
            if let Some(path) = &manifest {
                Manifest::load(path)?;
            }
            let backend = open_store(&cli.store, &config)?;
            let report = UploadOrchestrator::new(&backend, config, &file)
                .manifest_dir(&manifest_dir)
                .stop_flag(stop)
                .run(manifest.as_deref())?;

            if let UploadStart::Resuming { committed } = report.start {
                println!("Resumed after {committed} committed container(s)");
            }
            println!(
                "Uploaded {} container(s), skipped {} ({}/{} committed)",
                report.uploaded,
                report.skipped,
                report.manifest.committed(),
                report.manifest.container_count,
            );
            if let Some(path) = report.manifest_path {
                println!("Manifest: {}", path.display());
            }
        }

        // ── Download ─────────────────────────────────────────────────────────
        Commands::Download { output, manifest } => {
            let manifest = Manifest::load(&manifest)?;
            let backend = open_store(&cli.store, &config)?;
            let report = DownloadOrchestrator::new(&backend, config, manifest, &output)?
                .stop_flag(stop)
                .run()?;
            println!(
                "Downloaded {} container(s), reused {}, wrote {} bytes to {}",
                report.retrieved,
                report.reused,
                report.bytes_written,
                output.display(),
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_store(root: &PathBuf, config: &TransferConfig) -> std::io::Result<LocalBackend> {
    // One extra character per record for the reserved marker.
    LocalBackend::open(root, config.records_per_container, config.chars_per_record + 1)
}
