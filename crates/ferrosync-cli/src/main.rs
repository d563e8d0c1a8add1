//! FerroSync - two-replica file synchronizer
//!
//! Commits a reconciled set of decisions to a pair of replicas: updates and
//! merges first, deletions afterwards, with a bounded number of transfers in
//! flight and a human-readable transfer log.

mod display;
mod json_output;
mod progress;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use console::{style, Term};
use ferrosync_config::{Config, ConfigBuilder, ConfigLoader, LoggingConfig};
use ferrosync_engine::{EngineBuilder, Fingerprinter, LocalReplica};
use ferrosync_types::{ReconciledItem, ReplicaRoot, SyncPath};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::display::{display_info, display_report, display_success, display_warning};
use crate::json_output::CommitResultJson;
use crate::progress::TerminalObserver;

/// FerroSync - two-replica file synchronizer
#[derive(Parser)]
#[command(
    name = "ferrosync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Propagate reconciled changes between two replicas",
    long_about = "FerroSync commits a reconciled plan to two replicas.\n\
                  Each path is copied, merged, or deleted in the chosen direction,\n\
                  with deletions held back until every update has finished."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit a reconciled plan to two local replicas
    Commit {
        /// Left replica root
        left: PathBuf,
        /// Right replica root
        right: PathBuf,
        /// Reconciled plan (JSON array of items)
        #[arg(long)]
        plan: PathBuf,
        /// Maximum number of actions running at once
        #[arg(long)]
        max_transfers: Option<u32>,
        /// Ask before committing each merge result
        #[arg(long)]
        confirm_merges: bool,
        /// Re-fingerprint transferred files and compare with the source
        #[arg(long)]
        verify: bool,
        /// Append the transfer log to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the content fingerprint of a file or a byte range of it
    Fingerprint {
        /// File to fingerprint
        file: PathBuf,
        /// Start of the range
        #[arg(long)]
        offset: Option<u64>,
        /// Length of the range
        #[arg(long)]
        length: Option<u64>,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Write a default configuration file
        #[arg(long, value_name = "PATH")]
        generate: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ConfigLoader::load_default().context("loading configuration")?,
    };

    init_logging(&config.logging, cli.debug, cli.quiet, cli.verbose)?;

    info!("FerroSync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Commit {
            left,
            right,
            plan,
            max_transfers,
            confirm_merges,
            verify,
            log_file,
            json,
        } => {
            let overrides = CommitOverrides {
                max_transfers,
                confirm_merges,
                verify,
                log_file,
            };
            commit_command(config, &left, &right, &plan, overrides, cli.quiet, json).await
        }
        Commands::Fingerprint {
            file,
            offset,
            length,
        } => fingerprint_command(&config, &file, offset, length).await,
        Commands::Config { default, generate } => config_command(&config, default, generate),
    }
}

fn init_logging(logging: &LoggingConfig, debug: bool, quiet: bool, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow!("invalid log level '{}': {}", level, e))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(logging.colored_output)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().try_init().map_err(|e| anyhow!(e))
    } else {
        builder.try_init().map_err(|e| anyhow!(e))
    }
}

struct CommitOverrides {
    max_transfers: Option<u32>,
    confirm_merges: bool,
    verify: bool,
    log_file: Option<PathBuf>,
}

impl CommitOverrides {
    fn apply(self, config: &mut Config) {
        if let Some(max) = self.max_transfers {
            config.propagation.max_simultaneous_transfers = max;
        }
        if self.confirm_merges {
            config.propagation.confirm_before_merge_commit = true;
        }
        if self.verify {
            config.propagation.verify_transfers = true;
        }
        if self.log_file.is_some() {
            config.logging.log_file = self.log_file;
        }
    }
}

fn load_plan(path: &Path) -> Result<Vec<ReconciledItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing plan {}", path.display()))
}

async fn commit_command(
    mut config: Config,
    left: &Path,
    right: &Path,
    plan: &Path,
    overrides: CommitOverrides,
    quiet: bool,
    json: bool,
) -> Result<()> {
    overrides.apply(&mut config);
    ConfigBuilder::validate(&config).context("invalid configuration")?;

    let mut items = load_plan(plan)?;
    info!("Loaded {} item(s) from {}", items.len(), plan.display());

    let interactive = !json && Term::stdout().is_term();
    let observer = Arc::new(TerminalObserver::new(quiet || json, interactive));
    let replicas = Arc::new(LocalReplica::from_config(&config.propagation));

    let engine = EngineBuilder::new()
        .with_config(config)
        .with_replicas(replicas)
        .with_observer(observer.clone())
        .build()?;

    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting running actions finish");
            abort.abort();
        }
    });

    let (left, right) = (ReplicaRoot::local(left), ReplicaRoot::local(right));
    let report = engine.commit(&left, &right, &mut items).await?;
    observer.finish(&report);

    if json {
        let doc = CommitResultJson::new(&left, &right, &report, &items);
        println!("{}", doc.to_json_string()?);
    } else if !quiet {
        display_report(&report, &items);
        if report.is_clean() {
            println!();
            display_success("Replicas are in sync");
        }
    }

    if report.failed > 0 {
        bail!("{} item(s) failed to propagate", report.failed);
    }
    if report.not_started > 0 {
        bail!("propagation aborted; {} item(s) not started", report.not_started);
    }
    Ok(())
}

async fn fingerprint_command(
    config: &Config,
    file: &Path,
    offset: Option<u64>,
    length: Option<u64>,
) -> Result<()> {
    let fingerprinter = Fingerprinter::new(config.propagation.fingerprint_buffer_size);

    let fingerprint = match (offset, length) {
        (None, None) => {
            let name = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("{} does not name a file", file.display()))?;
            let root = file.parent().unwrap_or_else(|| Path::new("."));
            fingerprinter
                .whole_file(root, &SyncPath::new(name)?)
                .await?
        }
        (offset, Some(length)) => {
            fingerprinter
                .byte_range(file, offset.unwrap_or(0), length)
                .await?
        }
        (Some(offset), None) => {
            let size = tokio::fs::metadata(file)
                .await
                .with_context(|| format!("reading metadata of {}", file.display()))?
                .len();
            if offset > size {
                bail!("offset {} is past the end of {} ({} bytes)", offset, file.display(), size);
            }
            fingerprinter.byte_range(file, offset, size - offset).await?
        }
    };

    println!("{}  {}", fingerprint.to_hex(), file.display());
    Ok(())
}

fn config_command(config: &Config, default: bool, generate: Option<PathBuf>) -> Result<()> {
    if let Some(path) = generate {
        ConfigLoader::generate_default_config(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        display_success(&format!("Wrote default configuration to {}", path.display()));
        return Ok(());
    }

    let shown = if default {
        display_info("Default configuration");
        Config::default()
    } else {
        match ConfigLoader::config_exists() {
            Some(path) => display_info(&format!("Configuration from {}", path.display())),
            None => display_warning("No configuration file found, showing effective settings"),
        }
        config.clone()
    };

    println!("{}", style("---").dim());
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        CommitOverrides {
            max_transfers: Some(3),
            confirm_merges: true,
            verify: false,
            log_file: Some(PathBuf::from("/tmp/ferrosync.log")),
        }
        .apply(&mut config);

        assert_eq!(config.propagation.max_simultaneous_transfers, 3);
        assert!(config.propagation.confirm_before_merge_commit);
        assert!(!config.propagation.verify_transfers);
        assert_eq!(
            config.logging.log_file.as_deref(),
            Some(Path::new("/tmp/ferrosync.log"))
        );
    }

    #[test]
    fn test_load_plan_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let plan = temp_dir.path().join("plan.json");
        std::fs::write(&plan, "not json").unwrap();

        let err = load_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("parsing plan"));
    }

    #[test]
    fn test_load_plan_empty_array() {
        let temp_dir = TempDir::new().unwrap();
        let plan = temp_dir.path().join("plan.json");
        std::fs::write(&plan, "[]").unwrap();

        assert!(load_plan(&plan).unwrap().is_empty());
    }
}
