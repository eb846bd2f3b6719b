use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use slimeworld::{Config, LoaderRegistry, SlimeManager};
use slimeworld_benchmark::BenchmarkMetrics;
use slimeworld_format::{Difficulty, WorldProperties};

#[derive(Parser)]
#[command(name = "slimeworld", about = "Manage worlds stored in the slime region format")]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Postgres connection string, overrides the configured one
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Print the metrics report when done
    #[arg(long)]
    pub report: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty world
    Create {
        name: String,
        #[arg(short, long, default_value = "file")]
        source: String,
        #[arg(long)]
        difficulty: Option<Difficulty>,
    },
    /// Import an anvil world directory
    Import {
        dir: PathBuf,
        /// Defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = "file")]
        source: String,
    },
    /// Show a stored world's header and properties
    Info {
        name: String,
        #[arg(short, long, default_value = "file")]
        source: String,
    },
    /// Move a world to another data source
    Migrate {
        name: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Copy a world under a new name
    Clone {
        name: String,
        new_name: String,
        #[arg(short, long, default_value = "file")]
        source: String,
        /// Data source for the copy, defaults to the original's
        #[arg(long)]
        target_source: Option<String>,
    },
    /// Release a world lock
    Unlock {
        name: String,
        #[arg(short, long, default_value = "file")]
        source: String,
        /// Clear the lock even if another loader holds it
        #[arg(long)]
        force: bool,
    },
    /// Delete a stored world
    Delete {
        name: String,
        #[arg(short, long, default_value = "file")]
        source: String,
    },
    /// List stored worlds
    List {
        #[arg(short, long, default_value = "file")]
        source: String,
    },
    /// Rewrite a stored world at another format version
    Upgrade {
        name: String,
        #[arg(short, long, default_value = "file")]
        source: String,
        /// Defaults to the configured target version
        #[arg(long)]
        to: Option<u8>,
    },
    /// Open the configured startup worlds and hold them until Ctrl+C
    Start,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = args.database_url.clone() {
        config.override_database_url(url);
    }

    let metrics = Arc::new(BenchmarkMetrics::new(config.summary()));
    let registry = LoaderRegistry::from_config(&config)
        .await
        .context("Failed to set up data sources")?;
    let manager = SlimeManager::new(registry, config.target_version).with_metrics(metrics.clone());

    run(&manager, &config, args.command).await?;

    if args.report {
        println!("{}", metrics.generate_report());
    }
    Ok(())
}

async fn run(manager: &SlimeManager, config: &Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Create { name, source, difficulty } => {
            let mut properties = WorldProperties::default();
            if let Some(difficulty) = difficulty {
                properties.difficulty = difficulty;
            }
            let world = manager.create_empty_world(&source, &name, properties).await?;
            manager.unload_world(&world, false).await?;
            println!("Created world {} on {}", name, source);
        }
        Command::Import { dir, name, source } => {
            let name = match name {
                Some(name) => name,
                None => dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("Cannot derive a world name from the directory, pass --name")?,
            };
            let world = manager
                .import_world(&dir, &name, &source)
                .await
                .with_context(|| format!("Failed to import {}", dir.display()))?;
            println!("Imported {} as {} ({} chunks)", dir.display(), name, world.chunks.len());
        }
        Command::Info { name, source } => {
            let info = manager.inspect_world(&source, &name).await?;
            let props = &info.properties;
            println!("World: {} ({})", info.name, info.source);
            println!("Format version: {}", info.header.version);
            println!("Size: {} bytes", info.size_bytes);
            println!("Chunks: {}", info.header.chunks.len());
            println!(
                "Bounds: x {}..{}, z {}..{}",
                info.header.bounds.min_x,
                info.header.bounds.min_x as i32 + info.header.bounds.width as i32,
                info.header.bounds.min_z,
                info.header.bounds.min_z as i32 + info.header.bounds.depth as i32
            );
            println!("Locked: {}", if info.locked { "yes" } else { "no" });
            println!(
                "Spawn: {:.1} {:.1} {:.1}",
                props.spawn_x, props.spawn_y, props.spawn_z
            );
            println!(
                "Difficulty: {}, environment: {}, pvp: {}",
                props.difficulty, props.environment, props.pvp
            );
        }
        Command::Migrate { name, from, to } => {
            manager.migrate_world(&name, &from, &to).await?;
            println!("Migrated {} from {} to {}", name, from, to);
        }
        Command::Clone { name, new_name, source, target_source } => {
            let target = target_source.unwrap_or_else(|| source.clone());
            let original = manager.load_world(&source, &name, true).await?;
            let copy = manager.clone_world(&original, &new_name, &target, false).await?;
            manager.unload_world(&copy, false).await?;
            manager.unload_world(&original, false).await?;
            println!("Cloned {} to {} on {}", name, new_name, target);
        }
        Command::Unlock { name, source, force } => {
            manager.unlock_world(&source, &name, force).await?;
            println!("Unlocked {}", name);
        }
        Command::Delete { name, source } => {
            manager.delete_world(&source, &name).await?;
            println!("Deleted {}", name);
        }
        Command::List { source } => {
            let worlds = manager.list_worlds(&source).await?;
            if worlds.is_empty() {
                println!("No worlds on {}", source);
            }
            for (name, locked) in worlds {
                println!("{}{}", name, if locked { " (locked)" } else { "" });
            }
        }
        Command::Upgrade { name, source, to } => {
            let target = to.unwrap_or(config.target_version);
            let from = manager.upgrade_stored_world(&source, &name, target).await?;
            println!("Converted {} from version {} to {}", name, from, target);
        }
        Command::Start => {
            let (worlds, errored) = manager.load_startup_worlds(config).await;
            if worlds.is_empty() && !errored.is_empty() {
                bail!("No startup world could be loaded");
            }
            println!(
                "Loaded {} worlds ({} failed). Press Ctrl+C to release them",
                worlds.len(),
                errored.len()
            );
            tokio::signal::ctrl_c()
                .await
                .context("Failed to install Ctrl+C handler")?;
            for world in &worlds {
                manager.unload_world(world, !world.is_read_only()).await?;
            }
        }
    }
    Ok(())
}
