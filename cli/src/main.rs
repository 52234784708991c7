use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use tidelog_kernel::runtime::{Runtime, RuntimeOptions};
use tidelog_kernel::{
    DeltaTable, EngineConfig, PartitionFilter, StorageOptions, TableOptions, TableVersion, VacuumOptions, Version,
};

/// Tidelog table inspection and maintenance CLI
#[derive(Parser, Debug)]
#[command(name = "tidelog")]
#[command(about = "Inspect and maintain transaction-log tables", long_about = None)]
struct Cli {
    /// Table location: a local path or an object store URL
    table: String,

    /// Path to engine config JSON
    #[arg(long)]
    config: Option<String>,

    /// Storage option passed to the object store, as KEY=VALUE
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Worker threads for the runtime
    #[arg(long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Version, protocol and metadata of the table
    Info {
        #[arg(long)]
        version: Option<Version>,
    },
    /// Active data files
    Files {
        #[arg(long)]
        version: Option<Version>,
        /// Partition filter such as `day=1`, `day!=1`, `day in 1,2`
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Print absolute URIs instead of relative paths
        #[arg(long)]
        uris: bool,
    },
    /// Commit history, newest first
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Table schema
    Schema,
    /// Commit a new version equal to an older one
    Restore { version: Version },
    /// Write a checkpoint for the latest version
    Checkpoint,
    /// Delete unreferenced data files
    Vacuum {
        #[arg(long)]
        retention_hours: Option<u64>,
        #[arg(long)]
        dry_run: bool,
        /// Allow retention below the configured minimum
        #[arg(long)]
        no_enforce: bool,
    },
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    table_uri: String,
    version: Version,
    protocol: serde_json::Value,
    metadata: serde_json::Value,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = match &cli.config {
        Some(path) => {
            let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            EngineConfig::from_json(&data)?
        }
        None => EngineConfig::default_config(),
    };
    tracing::debug!(?config, "engine config");

    let storage_options = cli
        .options
        .iter()
        .map(|raw| {
            raw.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("storage option `{raw}` is not KEY=VALUE"))
        })
        .collect::<Result<StorageOptions>>()?;

    let runtime = Runtime::new(&RuntimeOptions {
        worker_threads: cli.threads,
    })?;

    let output = runtime.block_on(run(cli.command, &cli.table, config, storage_options))?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn run(
    command: Command,
    location: &str,
    config: EngineConfig,
    storage_options: StorageOptions,
) -> Result<serde_json::Value> {
    let at = |version: Option<Version>| version.map_or(TableVersion::Latest, TableVersion::Version);
    let open = |version: TableVersion| {
        let options = TableOptions::default()
            .at_version(version)
            .with_storage_options(storage_options.clone());
        let config = config.clone();
        async move {
            let table = DeltaTable::new(location, options)?.with_config(config);
            table.load().await?;
            Ok::<_, anyhow::Error>(table)
        }
    };

    let value = match command {
        Command::Info { version } => {
            let table = open(at(version)).await?;
            let snapshot = table.snapshot()?;
            serde_json::to_value(InfoOutput {
                table_uri: table.table_uri(),
                version: snapshot.version(),
                protocol: serde_json::to_value(snapshot.protocol())?,
                metadata: serde_json::to_value(snapshot.metadata())?,
            })?
        }
        Command::Files { version, filters, uris } => {
            let table = open(at(version)).await?;
            let files: Vec<String> = if !filters.is_empty() {
                let filters = filters
                    .iter()
                    .map(|raw| raw.parse::<PartitionFilter>())
                    .collect::<Result<Vec<_>, _>>()?;
                let root = table.table_uri();
                table
                    .files_by_partitions(&filters)
                    .await?
                    .into_iter()
                    .map(|path| if uris { format!("{root}/{path}") } else { path })
                    .collect()
            } else if uris {
                table.file_uris().await?
            } else {
                table.files().await?
            };
            serde_json::to_value(files)?
        }
        Command::History { limit } => {
            let table = open(TableVersion::Latest).await?;
            serde_json::to_value(table.history(limit).await?)?
        }
        Command::Schema => {
            let table = open(TableVersion::Latest).await?;
            serde_json::to_value(table.schema()?)?
        }
        Command::Restore { version } => {
            let table = open(TableVersion::Latest).await?;
            serde_json::to_value(table.restore(version).await?)?
        }
        Command::Checkpoint => {
            let table = open(TableVersion::Latest).await?;
            serde_json::to_value(table.checkpoint().await?)?
        }
        Command::Vacuum {
            retention_hours,
            dry_run,
            no_enforce,
        } => {
            let table = open(TableVersion::Latest).await?;
            let options = VacuumOptions {
                dry_run,
                retention_hours,
                enforce_retention_duration: !no_enforce,
                custom_metadata: None,
            };
            serde_json::to_value(table.vacuum(options).await?)?
        }
    };

    Ok(value)
}
