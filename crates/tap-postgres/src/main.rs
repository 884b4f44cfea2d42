use anyhow::Context;
use clap::Parser;
use singer::{Catalog, Emitter, State};
use std::fs::File;
use std::path::PathBuf;
use tap_postgres::{discover, Config, Connector};

/// Singer tap for PostgreSQL: discovers streams and extracts records
/// through table scans or logical replication.
#[derive(Debug, Parser)]
#[clap(author, version, name = "tap-postgres")]
struct Args {
    /// Path to the tap configuration JSON file.
    #[clap(long, env = "TAP_POSTGRES_CONFIG")]
    config: PathBuf,
    /// Inspect the database and print the catalog instead of syncing.
    #[clap(long)]
    discover: bool,
    /// Catalog file, typically produced by --discover and edited to select
    /// streams.
    #[clap(long)]
    catalog: Option<PathBuf>,
    /// State file carrying bookmarks from a previous run.
    #[clap(long)]
    state: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config: Config = serde_json::from_reader(
        File::open(&args.config)
            .with_context(|| format!("opening config file {}", args.config.display()))?,
    )
    .context("parsing config file")?;
    let connector = Connector::new(config);

    if args.discover {
        let streams = discover(&connector).await?;
        serde_json::to_writer_pretty(std::io::stdout().lock(), &Catalog { streams })?;
        println!();
        return Ok(());
    }

    let catalog_path = args
        .catalog
        .context("sync mode requires --catalog (run --discover first)")?;
    let catalog: Catalog = serde_json::from_reader(
        File::open(&catalog_path)
            .with_context(|| format!("opening catalog file {}", catalog_path.display()))?,
    )
    .context("parsing catalog file")?;

    let state = match &args.state {
        Some(path) => serde_json::from_reader(
            File::open(path).with_context(|| format!("opening state file {}", path.display()))?,
        )
        .context("parsing state file")?,
        None => State::default(),
    };

    let mut emitter = Emitter::new(std::io::stdout().lock());
    tap_postgres::runtime::sync(&connector, &catalog, state, &mut emitter).await?;
    Ok(())
}
