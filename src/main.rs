use anyhow::Context;
use catalog_import::{
    attribute,
    catalog::{CatalogAdapter, InMemoryCatalog, SqliteCatalog},
    config::ImporterConfig,
    feed,
    grouping::{self, Grouping},
    import::{BatchRequest, Importer},
    progress::{InMemoryProgressStore, ProgressStore, SqliteProgressStore},
};
use catalog_types::Stage;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Imports supplier product feeds into the catalog")]
struct Cli {
    /// Supplier XML feed
    #[arg(long, global = true, default_value = "feed.xml")]
    feed: PathBuf,
    /// Use an in-memory catalog and progress store instead of the database
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single batch of one stage
    Batch {
        #[arg(long, value_parser = parse_stage)]
        stage: Stage,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        force_update: bool,
    },
    /// Run all stages until every batch is done
    Run {
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        force_update: bool,
    },
    /// Parse and group the feed without importing
    Group,
    /// Show import progress
    Status,
    /// Clear all import progress
    Reset,
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse::<u8>()
        .ok()
        .and_then(|n| Stage::try_from(n).ok())
        .ok_or_else(|| format!("stage must be 1, 2 or 3, got {s}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_groups(cli: &Cli, config: &ImporterConfig) -> anyhow::Result<Grouping> {
    let options = config.feed_options()?;
    let parsed = feed::read_feed(&cli.feed, &options)
        .await
        .with_context(|| format!("Unable to load feed {:?}", cli.feed))?;
    let grouping = grouping::group(parsed.records, &config.safety_valve);
    let summary = grouping.summary();
    log::info!(
        "{} groups ({} variable, {} synthesized), {} rejected, {} unmatched, {} re-admitted",
        summary.groups,
        summary.variable,
        summary.synthesized,
        parsed.rejected.len(),
        summary.dropped,
        summary.readmitted,
    );
    Ok(grouping)
}

async fn open_stores(
    dry_run: bool,
    config: &ImporterConfig,
) -> anyhow::Result<(Arc<dyn CatalogAdapter>, Arc<dyn ProgressStore>)> {
    if dry_run {
        log::info!("Dry run, nothing will be persisted");
        let catalog: Arc<dyn CatalogAdapter> = Arc::new(InMemoryCatalog::default());
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::default());
        return Ok((catalog, progress));
    }
    if let Some(dir) = PathBuf::from(&config.db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(&config.db_path).await?;
    let catalog: Arc<dyn CatalogAdapter> = Arc::new(SqliteCatalog::init(conn).await?);
    let conn = Connection::open(&config.db_path).await?;
    let progress: Arc<dyn ProgressStore> = Arc::new(SqliteProgressStore::init(conn).await?);
    Ok((catalog, progress))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    if std::path::Path::new(".env").exists() {
        envmnt::load_file(".env")?;
    }

    let cli = Cli::parse();
    let config = ImporterConfig::load()?;
    if !attribute::install(config.code_table()?) {
        log::warn!("Attribute code table already installed");
    }
    let (catalog, progress) = open_stores(cli.dry_run, &config).await?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(_) => ctrl_c.cancel(),
            Err(err) => log::error!("Unable to listen to shutdown: {err}"),
        }
    });

    match &cli.command {
        Command::Status => print_json(&progress.summary().await?)?,
        Command::Reset => {
            progress.reset_all().await?;
            print_json(&progress.summary().await?)?;
        }
        Command::Group => {
            let grouping = load_groups(&cli, &config).await?;
            print_json(&grouping.summary())?;
        }
        Command::Batch {
            stage,
            offset,
            batch_size,
            force_update,
        } => {
            let grouping = load_groups(&cli, &config).await?;
            let importer = Importer::new(catalog, progress, config.import_options());
            let request = BatchRequest {
                stage: *stage,
                batch_size: batch_size.unwrap_or(config.batch_size),
                offset: *offset,
                force_update: *force_update || config.force_update,
            };
            let result = importer.run_batch(&grouping.groups, &request, &token).await;
            print_json(&result)?;
        }
        Command::Run {
            batch_size,
            force_update,
        } => {
            let grouping = load_groups(&cli, &config).await?;
            let importer = Importer::new(catalog, progress, config.import_options());
            let report = importer
                .run_all(
                    &grouping.groups,
                    batch_size.unwrap_or(config.batch_size),
                    *force_update || config.force_update,
                    &token,
                )
                .await;
            print_json(&report)?;
        }
    }
    Ok(())
}
