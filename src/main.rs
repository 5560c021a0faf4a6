//! Portabook - Portable Audiobook Library Builder
//!
//! Entry point of the `portabook` command line tool.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use portabook::cli::{Args, Commands};
use portabook::config::Config;
use portabook::metadata::MkvInfo;
use portabook::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "portabook.toml";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // The guard flushes the file log when dropped
    let guard = match setup_logging(args.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("\n********** portabook failed! **********");
        eprintln!("{:#}", e);
        drop(guard);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // No configuration needs to load for this one
    if let Commands::InitConfig { path } = &args.command {
        return init_config(path);
    }

    let config = load_config(args.config.as_deref())?;
    let workflow = Workflow::new(config)?.with_progress(true);

    let cancel = workflow.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after killing the running process");
            cancel.cancel();
        }
    });

    match args.command {
        Commands::Normalize {
            activation_bytes,
            source_dir,
            destination_dir,
        } => {
            workflow.check_tools().await.context("checking external tools")?;
            let entries = workflow
                .normalize_all(&activation_bytes, &source_dir, destination_dir.as_deref())
                .await
                .with_context(|| format!("normalizing {}", source_dir.display()))?;

            println!("\n********** Normalized {} audiobooks **********", entries.len());
            for entry in &entries {
                println!("  {}", entry.directory.display());
            }
        }
        Commands::Portable { destination, mkv } => {
            workflow.check_tools().await.context("checking external tools")?;
            let entries = workflow
                .convert_many_to_portable(&mkv, &destination)
                .await
                .context("converting to portable")?;

            println!("\n********** Converted {} audiobooks **********", entries.len());
            for entry in &entries {
                println!("  {}", entry.playlist.display());
            }
        }
        Commands::Info { mkv, json } => {
            let record = workflow
                .read_metadata(&mkv)
                .await
                .with_context(|| format!("reading metadata of {}", mkv.display()))?;

            if json {
                println!("{}", record.to_json()?);
            } else {
                print_info(&record);
            }
        }
        Commands::Dashcam { source_dir } => {
            workflow.check_tools().await.context("checking external tools")?;
            let converted = workflow
                .convert_dashcam(&source_dir)
                .await
                .with_context(|| format!("converting clips in {}", source_dir.display()))?;

            println!("\n********** Converted {} clips **********", converted.len());
        }
        Commands::InitConfig { path } => init_config(&path)?,
    }

    info!("portabook completed successfully");
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    Config::default()
        .save_to_file(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Explicit path, else `portabook.toml` in the working directory, else defaults.
/// Environment overrides apply last.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env_overrides();
    Ok(config)
}

fn print_info(record: &MkvInfo) {
    println!("Author:   {}", record.author);
    println!("Title:    {}", record.title);
    println!("Chapters: {}", record.chapters.len());
    for (index, chapter) in record.chapters.iter().enumerate() {
        println!(
            "  {:>3}. [{} - {}] {}",
            index + 1,
            chapter.start,
            chapter.end,
            chapter.name
        );
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".portabook").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation
    let file_appender = rolling::daily(&log_dir, "portabook.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("portabook.log").display()
    );

    Ok(guard)
}
