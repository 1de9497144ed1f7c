//! Reconciler CLI
//!
//! Local entry point for merging URL sources, syncing scores and watching
//! for changes.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reconciler::{
    error::{AppError, Result},
    models::{Config, WatchStrategy},
    pipeline::{self, reconcile, CacheInvalidator, ChangeWatcher, CommandRegenerator, Regenerate},
    storage::LocalStorage,
};

const DEFAULT_CONFIG: &str = "reconciler.toml";

/// Reconciler - listing data reconciliation and report regeneration
#[derive(Parser, Debug)]
#[command(
    name = "reconciler",
    version,
    about = "Reconciles scored listing data and regenerates the report when it changes"
)]
struct Cli {
    /// Root directory all configured paths are relative to
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Path to the config file (default: {root}/reconciler.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration
    Validate,

    /// Merge URL sources into the canonical list
    Merge,

    /// Sync fresh listing fields into score records
    Sync {
        /// Collection file of raw records, relative to the root
        /// (default: per-listing files)
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Rebuild the aggregate from the score records
    Rebuild,

    /// Watch for changes and regenerate the report
    Watch {
        /// Poll instead of using filesystem notifications
        #[arg(long)]
        poll: bool,
    },

    /// Regenerate the report once
    Regenerate,

    /// Ask the backend to drop its cache
    Invalidate,

    /// Show what is on disk
    Info,
}

/// Initialize logging based on verbosity flags.
fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// An explicit config must load; the implicit one falls back to defaults.
fn load_config(root: &Path, explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => Config::load(path).map_err(|e| {
            AppError::config(format!("cannot load {}: {}", path.display(), e))
        }),
        None => {
            let path = root.join(DEFAULT_CONFIG);
            if path.exists() {
                Ok(Config::load_or_default(&path))
            } else {
                log::debug!("No {} found, using defaults", path.display());
                Ok(Config::default())
            }
        }
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(DEFAULT_CONFIG));

    if let Command::Init { force } = cli.command {
        if config_path.exists() && !force {
            log::warn!(
                "Config already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
            return Ok(());
        }
        std::fs::write(&config_path, Config::default().to_toml()?)?;
        log::info!("Default configuration written to {}", config_path.display());
        return Ok(());
    }

    let config = load_config(&cli.root, cli.config.as_deref())?;
    let storage = LocalStorage::new(&cli.root, &config.paths);

    match cli.command {
        Command::Init { .. } => {}

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({} sources, {} synced fields, {} watch targets)",
                config.sources.len(),
                config.sync.fields.len(),
                config.watch.targets.len()
            );
        }

        Command::Merge => {
            config.validate()?;
            let summary = pipeline::run_merge(&config, &storage).await?;
            reconcile::log_merge(&summary);
        }

        Command::Sync { from } => {
            config.validate()?;
            let report = pipeline::run_sync(&config, &storage, from.as_deref()).await?;
            reconcile::log_sync(&report.sync);
            if let Some(rebuild) = &report.rebuild {
                reconcile::log_rebuild(rebuild);
            }
        }

        Command::Rebuild => {
            let summary = pipeline::rebuild(&storage).await?;
            reconcile::log_rebuild(&summary);
        }

        Command::Watch { poll } => {
            config.validate()?;
            let regenerator = CommandRegenerator::new(&config.regenerate).rooted_at(&cli.root);
            let invalidator = if config.cache.invalidate_after_regenerate {
                Some(CacheInvalidator::new(&config.cache)?)
            } else {
                None
            };

            let mut watcher = ChangeWatcher::new(&storage, &config.watch, &regenerator);
            if poll {
                watcher = watcher.with_strategy(WatchStrategy::Poll);
            }
            if let Some(invalidator) = &invalidator {
                watcher = watcher.with_invalidator(invalidator);
            }

            log::info!("Press Ctrl-C to stop");
            let report = watcher.run().await?;
            log::info!(
                "{} observations, {} changes debounced",
                report.ticks,
                report.debounced
            );
        }

        Command::Regenerate => {
            let outcome = CommandRegenerator::new(&config.regenerate)
                .rooted_at(&cli.root)
                .run()
                .await;
            outcome.log();
            if let Some(e) = outcome.error() {
                return Err(e);
            }
        }

        Command::Invalidate => {
            let invalidator = CacheInvalidator::new(&config.cache)?;
            let outcome = invalidator.invalidate().await;
            outcome.log(invalidator.url());
            if !outcome.is_success() {
                return Err(AppError::external("cache invalidation did not succeed"));
            }
        }

        Command::Info => {
            log::info!("Config: {}", config_path.display());
            let info = pipeline::info(&storage).await?;
            reconcile::log_info(&storage, &info);
        }
    }

    Ok(())
}
