use clap::Parser;
use club_directory::{
    directory::Directory,
    fixture::{self, Fixture},
    models::EntityKind,
    store::{postgres::connect_to_db, MemoryStore, PgStore, Store},
};
use envconfig::Envconfig;
use itertools::Itertools;
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

/// Loads a fixture file into the database in a single batch.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Fixture file to load.
    path: PathBuf,

    /// Parse and resolve the fixture against an empty in-memory store
    /// instead of the database.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Envconfig)]
struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub db_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let text = std::fs::read_to_string(&args.path)?;
    let fixture = Fixture::parse(&text)?;

    let store: Arc<dyn Store> = if args.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        let config = Config::init_from_env()?;
        Arc::new(PgStore::new(connect_to_db(&config.db_url)?))
    };
    let directory = Directory::new(store);

    let entities = fixture::load(&fixture, &directory).await?;
    let counts = entities.iter().counts_by(|e| e.kind());
    for kind in EntityKind::ALL {
        if let Some(count) = counts.get(&kind) {
            println!("{count:>6} {kind}");
        }
    }
    if args.dry_run {
        println!("dry run: nothing was written");
    }
    Ok(())
}
