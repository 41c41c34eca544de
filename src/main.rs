use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use scrapeflow::{
    Config, QueueBuilder, RunRequest,
    model::{PipelineModel, Properties, ScraperModel},
    pipeline::Registry,
    pool::{WORKER_INDEX_ENV, serve_stdio},
    queue::PipelineExecutorFactory,
    runtime::ServicesFactory,
};

/// Scrapeflow - declarative scraping pipelines with a process-isolated worker pool
#[derive(Parser)]
#[command(name = "scrapeflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the toml config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the queue until interrupted
    Serve {
        /// Scraper definitions (yaml or json list) saved to the store on startup
        #[arg(long)]
        scrapers: Option<PathBuf>,
    },
    /// Run scrapers once and print their summaries
    Run {
        /// Ids of stored scrapers
        ids: Vec<String>,
        /// Ad-hoc pipeline file to run instead of a stored scraper
        #[arg(long)]
        pipeline: Option<PathBuf>,
        /// Scraper definitions saved to the store before running
        #[arg(long)]
        scrapers: Option<PathBuf>,
        /// Run property as key=value, the value parsed as json when possible
        #[arg(long = "prop", short)]
        props: Vec<String>,
    },
    /// Serve tasks on stdin/stdout as a pool worker
    Worker,
    /// Build a pipeline file and report unknown kinds or invalid nodes
    Validate {
        pipeline: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::create(path)?,
        None => Config::default(),
    };
    if let Some(path) = &cli.config {
        // workers load the same config
        config.pool.worker_args.push("--config".into());
        config.pool.worker_args.push(path.to_string_lossy().into_owned());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("failed to start the tokio runtime")?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Serve {
                scrapers,
            } => serve(config, scrapers).await,
            Commands::Run {
                ids,
                pipeline,
                scrapers,
                props,
            } => run(config, ids, pipeline, scrapers, props).await,
            Commands::Worker => worker(config).await,
            Commands::Validate {
                pipeline,
            } => validate(&pipeline),
        }
    })
}

/// Logs go to stderr; stdout belongs to the worker protocol and summaries.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

async fn serve(
    config: Config,
    scrapers: Option<PathBuf>,
) -> Result<()> {
    let queue = QueueBuilder::new(config).build()?;
    if let Some(path) = scrapers {
        seed_scrapers(&queue, &path)?;
    }
    queue.launch()?;
    for job in queue.scheduled_jobs() {
        info!("'{}' next runs at {:?}", job.scraper_name, job.next_run);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = queue.wait_shutdown() => {}
    }
    queue.shutdown().await?;
    Ok(())
}

async fn run(
    mut config: Config,
    ids: Vec<String>,
    pipeline: Option<PathBuf>,
    scrapers: Option<PathBuf>,
    props: Vec<String>,
) -> Result<()> {
    if ids.is_empty() && pipeline.is_none() {
        bail!("nothing to run: pass scraper ids or --pipeline");
    }
    config.scheduler.enabled = false;
    let properties = parse_props(&props)?;
    let queue = QueueBuilder::new(config).build()?;
    if let Some(path) = scrapers {
        seed_scrapers(&queue, &path)?;
    }
    queue.launch()?;

    let mut requests = Vec::new();
    for id in &ids {
        let scraper = queue.store().scraper(id).with_context(|| format!("unknown scraper '{}'", id))?;
        requests.push(RunRequest::now(scraper, properties.clone()));
    }
    if let Some(path) = pipeline {
        let name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_else(|| "pipeline".into());
        let scraper = ScraperModel {
            id: name.clone(),
            name,
            source: fs::read_to_string(&path).with_context(|| format!("failed to read {:?}", path))?,
            ..Default::default()
        };
        requests.push(RunRequest::now(scraper, properties.clone()));
    }

    let mut failed = false;
    for request in requests {
        let summary = queue.run(request).await?;
        failed |= summary.status != scrapeflow::model::RunStatus::Success;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    queue.pool().wait_for_slots_to_finish(true).await?;
    queue.shutdown().await?;
    if failed {
        bail!("some runs did not succeed");
    }
    Ok(())
}

async fn worker(config: Config) -> Result<()> {
    let index = std::env::var(WORKER_INDEX_ENV).ok().and_then(|value| value.parse::<usize>().ok()).unwrap_or(0);
    let factory = PipelineExecutorFactory::new(ServicesFactory::from_config(&config)?, Arc::new(Registry::default()));
    info!("worker {} serving on stdio", index);
    serve_stdio(Arc::new(factory), index).await?;
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let source = fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let model = PipelineModel::from_source(&source)?;
    let registry = Registry::default();
    match registry.validate(&model.root()) {
        Ok(()) => {
            println!("{}: ok", path.display());
            Ok(())
        }
        Err(err) => {
            println!("known kinds: {}", registry.kinds().join(", "));
            bail!("{}: {}", path.display(), err)
        }
    }
}

fn seed_scrapers(
    queue: &scrapeflow::RunQueue,
    path: &Path,
) -> Result<()> {
    let source = fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let scrapers: Vec<ScraperModel> = serde_yaml::from_str(&source).with_context(|| format!("invalid scraper list in {:?}", path))?;
    for scraper in &scrapers {
        queue.store().save_scraper(scraper)?;
    }
    info!("loaded {} scrapers", scrapers.len());
    Ok(())
}

fn parse_props(props: &[String]) -> Result<Properties> {
    let mut properties = Properties::new();
    for prop in props {
        let Some((key, value)) = prop.split_once('=') else {
            bail!("property '{}' is not key=value", prop);
        };
        let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
        properties.insert(key.trim().to_string(), value);
    }
    Ok(properties)
}
