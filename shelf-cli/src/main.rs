use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use shelf_index::ClientManifest;
use shelf_sync::SyncManager;

mod config;
mod plex;

use config::{get_config_path, Config, PlexConfig};
use plex::PlexSource;

#[derive(Parser)]
#[command(name = "shelfsync")]
#[command(about = "Delta sync for a self-hosted game and media library", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.shelfsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull the configured Plex library into the local store
    Pull {
        /// Snapshot name for this source
        #[arg(short, long, default_value = "plex")]
        target: String,
    },

    /// Compute what a client must upload from its manifest
    Delta {
        /// Client name used for locking
        #[arg(short, long, default_value = "default")]
        client: String,

        /// Manifest JSON file
        manifest: PathBuf,
    },

    /// List the documents of a group
    List {
        group: String,

        /// Snapshot the cache follows
        #[arg(short, long, default_value = "plex")]
        target: String,
    },

    /// Show the last committed snapshot of a target
    Snapshot {
        #[arg(default_value = "plex")]
        target: String,
    },

    /// Store a media file under a relative path
    MediaPut {
        relative: String,
        file: PathBuf,

        /// Expected blake3 hash (hex) of the stored file
        #[arg(long)]
        hash: Option<String>,
    },

    /// Print the absolute path of a stored media file
    MediaGet { relative: String },

    /// Show or update the configuration
    Config {
        #[arg(long)]
        data_root: Option<PathBuf>,

        #[arg(long)]
        plex_url: Option<String>,

        #[arg(long)]
        plex_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config_path = match cli.config {
        Some(path) => path,
        None => get_config_path()?,
    };
    let mut config = Config::load_or_default(&config_path)?;

    let command = cli.command;

    if let Commands::Config {
        data_root,
        plex_url,
        plex_token,
    } = &command
    {
        let changed = data_root.is_some() || plex_url.is_some() || plex_token.is_some();
        if let Some(data_root) = data_root {
            config.data_root = data_root.clone();
        }
        if plex_url.is_some() || plex_token.is_some() {
            let current = config.plex.take().unwrap_or(PlexConfig {
                url: String::new(),
                token: String::new(),
            });
            config.plex = Some(PlexConfig {
                url: plex_url.clone().unwrap_or(current.url),
                token: plex_token.clone().unwrap_or(current.token),
            });
        }
        if changed {
            config.save(&config_path)?;
            info!("Saved configuration to {}", config_path.display());
        }
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let manager = SyncManager::new(config.sync_config())
        .await
        .context("Failed to open data root")?;

    match command {
        Commands::Pull { target } => {
            let Some(plex) = config.plex.as_ref() else {
                bail!(
                    "No Plex server configured; \
                     run `shelfsync config --plex-url ... --plex-token ...`"
                );
            };
            let source = Arc::new(PlexSource::new(plex)?);
            let report = manager.pull(&target, source).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Delta { client, manifest } => {
            let content = std::fs::read_to_string(&manifest)
                .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
            let manifest: ClientManifest =
                serde_json::from_str(&content).context("Failed to parse manifest")?;
            let delta = manager.push_delta(&client, &manifest).await?;
            println!("{}", serde_json::to_string_pretty(&delta)?);
        }
        Commands::List { group, target } => {
            let rows = manager.list(&target, &group).await?;
            println!("{}", serde_json::to_string_pretty(rows.as_ref())?);
        }
        Commands::Snapshot { target } => {
            let snapshot = manager.snapshot(&target).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::MediaPut {
            relative,
            file,
            hash,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let outcome = manager.put_media(&relative, &data, hash.as_deref()).await?;
            println!("{} {} ({} bytes)", outcome.status.as_str(), relative, outcome.bytes);
        }
        Commands::MediaGet { relative } => {
            let path = manager.get_media(&relative).await?;
            println!("{}", path.display());
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
