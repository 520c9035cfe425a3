//! findash CLI: run the ingestion pipeline or one stage of it.
//!
//! Commands:
//! - `run`: the whole graph (`--dry-run` stays on the local machine)
//! - `fetch-macro`, `fetch-market`: fetch and write one snapshot
//! - `upload`: upload every snapshot in the raw directory
//! - `load`: load one uploaded snapshot into a warehouse table
//! - `transform`: `dbt run` then `dbt test`
//! - `plan`: print the graph layers
//! - `history`: print recorded runs

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use findash_core::auth::{ServiceAccount, StaticToken, TokenSource};
use findash_core::domain::{DateRange, RemoteObject, WarehouseTable};
use findash_core::provider::{WorldBankProvider, YahooProvider};
use findash_core::storage::{upload_snapshots, GcsStore, LocalStore, ObjectStore};
use findash_core::transform::TransformRunner;
use findash_core::warehouse::{BigQueryWarehouse, LocalWarehouse, Warehouse, DEFAULT_LOCATION};
use findash_runner::{
    Pipeline, PipelineFile, RunHistory, RunReport, RuntimeConfig, Scheduler,
    StageTracker, WarehouseTarget,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "findash",
    about = "findash: macro & market data ingestion into the warehouse"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Optional TOML pipeline file (source tables, range, retry, job timeout).
    #[arg(long, global = true, env = "FINDASH_PIPELINE")]
    pipeline: Option<PathBuf>,

    /// Local snapshot directory.
    #[arg(long, global = true, env = "FINDASH_RAW_DIR")]
    raw_dir: Option<PathBuf>,

    /// Bucket receiving the snapshots.
    #[arg(long, global = true, env = "FINDASH_BUCKET")]
    bucket: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline graph.
    Run {
        /// Use a directory-backed bucket and an in-memory warehouse; skip dbt.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Root of the local bucket for --dry-run.
        #[arg(long, default_value = "data/dry-run")]
        dry_run_dir: PathBuf,

        /// JSONL file receiving the run report.
        #[arg(long, default_value = "data/runs.jsonl")]
        history: PathBuf,
    },
    /// Fetch World Bank indicators and write the macro snapshot.
    FetchMacro,
    /// Fetch index closes and write the market snapshot.
    FetchMarket {
        /// Start date (YYYY-MM-DD). Defaults to the pipeline file or 2000-01-01.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Upload every *.parquet in the raw directory as raw/<file>.
    Upload,
    /// Load one Parquet object into a warehouse table (truncate and replace).
    Load {
        #[arg(long, default_value = findash_runner::config::DEFAULT_BUCKET)]
        bucket: String,

        /// Object key, e.g. raw/macro_data.parquet.
        #[arg(long)]
        source: String,

        #[arg(long, env = "BQ_DATASET")]
        dataset: String,

        #[arg(long)]
        table: String,

        #[arg(long, env = "GCP_PROJECT_ID")]
        project: String,

        #[arg(long, default_value = DEFAULT_LOCATION)]
        location: String,
    },
    /// Run `dbt run` then `dbt test` in the dbt project.
    Transform {
        #[arg(long, env = "FINDASH_DBT_DIR")]
        dbt_dir: Option<PathBuf>,
    },
    /// Print the graph layers without running anything.
    Plan {
        /// Plan the dry-run graph (no dbt nodes).
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print recorded runs.
    History {
        #[arg(long, default_value = "data/runs.jsonl")]
        path: PathBuf,

        /// Print only the latest report with this id.
        #[arg(long)]
        run_id: Option<String>,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.global.log_json);

    let mut config = RuntimeConfig::from_env();
    if let Some(dir) = cli.global.raw_dir.clone() {
        config.raw_dir = dir;
    }
    if let Some(bucket) = cli.global.bucket.clone() {
        config.bucket = bucket;
    }
    let file = PipelineFile::load(cli.global.pipeline.as_deref())?;

    match cli.command {
        Commands::Run {
            dry_run,
            dry_run_dir,
            history,
        } => run_pipeline(&config, &file, dry_run, &dry_run_dir, history),
        Commands::FetchMacro => {
            let info = offline_pipeline(&config, &file, file.date_range()?)?.fetch_macro()?;
            println!("{} rows -> {} ({})", info.rows, info.path.display(), &info.content_hash[..12]);
            Ok(())
        }
        Commands::FetchMarket { start, end } => {
            let mut range = file.date_range()?;
            range.start = start.unwrap_or(range.start);
            range.end = end.unwrap_or(range.end);
            if range.start > range.end {
                bail!("--start {} is after --end {}", range.start, range.end);
            }
            let info = offline_pipeline(&config, &file, range)?.fetch_market()?;
            println!("{} rows -> {} ({})", info.rows, info.path.display(), &info.content_hash[..12]);
            Ok(())
        }
        Commands::Upload => {
            let store = GcsStore::new(token_source(&config)?)?;
            let objects = upload_snapshots(&store, &config.bucket, &config.raw_dir)?;
            if objects.is_empty() {
                println!("No snapshots in {}", config.raw_dir.display());
            }
            Ok(())
        }
        Commands::Load {
            bucket,
            source,
            dataset,
            table,
            project,
            location,
        } => {
            let warehouse = BigQueryWarehouse::new(token_source(&config)?)?
                .with_polling(file.poll_interval(), file.job_timeout());
            let report = warehouse.load(
                &RemoteObject::new(bucket, source),
                &WarehouseTable::new(project, dataset, table),
                &location,
            )?;
            println!("Loaded {} rows into {}", report.rows, report.table);
            Ok(())
        }
        Commands::Transform { dbt_dir } => {
            let runner = transform_runner(&config, dbt_dir.unwrap_or_else(|| config.dbt_dir.clone()));
            runner.run()?;
            runner.test()?;
            Ok(())
        }
        Commands::Plan { dry_run } => {
            let mut pipeline = offline_pipeline(&config, &file, file.date_range()?)?;
            if !dry_run {
                pipeline.transform = Some(Arc::new(transform_runner(&config, config.dbt_dir.clone())));
            }
            let layers = Arc::new(pipeline).graph(file.retry_policy())?.plan()?;
            for (i, layer) in layers.iter().enumerate() {
                println!("{i}: {}", layer.join(", "));
            }
            Ok(())
        }
        Commands::History { path, run_id } => print_history(&RunHistory::new(path), run_id.as_deref()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// `GCP_ACCESS_TOKEN` wins over the service account key file.
fn token_source(config: &RuntimeConfig) -> Result<Arc<dyn TokenSource>> {
    if let Some(token) = &config.access_token {
        return Ok(Arc::new(StaticToken::new(token.clone())));
    }
    let key = config
        .credentials
        .as_deref()
        .context("set GCP_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS")?;
    Ok(Arc::new(ServiceAccount::from_key_file(key)?))
}

fn transform_runner(config: &RuntimeConfig, dbt_dir: PathBuf) -> TransformRunner {
    let runner = TransformRunner::new(dbt_dir);
    match &config.credentials {
        Some(key) => runner.with_credentials(key),
        None => runner,
    }
}

/// A pipeline whose fetch stages are live but whose cloud side is local.
/// Enough for the fetch commands and for `--dry-run`.
fn offline_pipeline(config: &RuntimeConfig, file: &PipelineFile, range: DateRange) -> Result<Pipeline> {
    local_pipeline(config, file, range, Path::new("data/dry-run"))
}

fn local_pipeline(
    config: &RuntimeConfig,
    file: &PipelineFile,
    range: DateRange,
    bucket_root: &Path,
) -> Result<Pipeline> {
    let store = LocalStore::new(bucket_root);
    Ok(Pipeline {
        sources: file.sources.clone(),
        range,
        raw_dir: config.raw_dir.clone(),
        bucket: config.bucket.clone(),
        target: WarehouseTarget {
            project: config.project_id.clone().unwrap_or_else(|| "local".into()),
            dataset: config.dataset.clone().unwrap_or_else(|| "local".into()),
            location: config.region.clone(),
        },
        indicators: Arc::new(WorldBankProvider::new()?),
        prices: Arc::new(YahooProvider::new()?),
        store: Arc::new(store.clone()),
        warehouse: Arc::new(LocalWarehouse::new(store)),
        transform: None,
        stages: Arc::new(StageTracker::new()),
    })
}

fn cloud_pipeline(config: &RuntimeConfig, file: &PipelineFile) -> Result<Pipeline> {
    let tokens = token_source(config)?;
    let store: Arc<dyn ObjectStore> = Arc::new(GcsStore::new(Arc::clone(&tokens))?);
    let warehouse: Arc<dyn Warehouse> = Arc::new(
        BigQueryWarehouse::new(tokens)?.with_polling(file.poll_interval(), file.job_timeout()),
    );

    Ok(Pipeline {
        sources: file.sources.clone(),
        range: file.date_range()?,
        raw_dir: config.raw_dir.clone(),
        bucket: config.bucket.clone(),
        target: WarehouseTarget {
            project: config.require_project()?.to_string(),
            dataset: config.require_dataset()?.to_string(),
            location: config.region.clone(),
        },
        indicators: Arc::new(WorldBankProvider::new()?),
        prices: Arc::new(YahooProvider::new()?),
        store,
        warehouse,
        transform: Some(Arc::new(transform_runner(config, config.dbt_dir.clone()))),
        stages: Arc::new(StageTracker::new()),
    })
}

fn run_pipeline(
    config: &RuntimeConfig,
    file: &PipelineFile,
    dry_run: bool,
    dry_run_dir: &Path,
    history: PathBuf,
) -> Result<()> {
    let pipeline = if dry_run {
        local_pipeline(config, file, file.date_range()?, dry_run_dir)?
    } else {
        cloud_pipeline(config, file)?
    };
    let pipeline = Arc::new(pipeline);

    let scheduler = Scheduler::with_history(RunHistory::new(history));
    let report = pipeline.run(&scheduler, file.retry_policy())?;
    print_report(&report);

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {}: {:?}", report.run_id, report.status);
    for node in &report.nodes {
        println!(
            "  {:<28} {:<16} attempts={}",
            node.id,
            format!("{:?}", node.state),
            node.attempts
        );
    }

    for node in report.failed_nodes() {
        match &node.error {
            Some(error) => println!("  {} failed: {error}", node.id),
            None => println!("  {} skipped: upstream did not succeed", node.id),
        }
    }
}

fn print_history(history: &RunHistory, run_id: Option<&str>) -> Result<()> {
    match run_id {
        Some(id) => match history.observe(id)? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => bail!("no run with id {id} in {}", history.path().display()),
        },
        None => {
            for report in history.read_all()? {
                println!(
                    "{}  {:?}  {} tasks  started {}",
                    report.run_id,
                    report.status,
                    report.nodes.len(),
                    report.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn load_location_defaults_to_existing_dataset_region() {
        let cli = Cli::try_parse_from([
            "findash", "load", "--source", "raw/macro_data.parquet", "--dataset", "finance",
            "--table", "macro_data", "--project", "proj",
        ])
        .unwrap();
        match cli.command {
            Commands::Load { location, bucket, .. } => {
                assert_eq!(location, "europe-central2");
                assert_eq!(bucket, "financedashboard-raw-data");
            }
            _ => panic!("expected load"),
        }
    }

    #[test]
    fn dry_run_flag_parses() {
        let cli = Cli::try_parse_from(["findash", "--log-json", "run", "--dry-run"]).unwrap();
        assert!(cli.global.log_json);
        assert!(matches!(cli.command, Commands::Run { dry_run: true, .. }));
    }
}
