//! Funding pipeline CLI.
//!
//! Loads companies from CSV, runs the checkpointed pipeline against a SQLite
//! database, and prints statistics and provider usage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use funding_engine::config::EnvConfig;
use funding_engine::pipeline::load_companies;
use funding_engine::traits::{CheckpointStore, StatsStore, UsageStore};
use funding_engine::{
    build_providers, Collaborators, CompanyInput, EdgarFilings, Pipeline, PipelineConfig,
    SqliteStore, Stage, TavilySearcher,
};

const NAME_COLUMNS: [&str; 3] = ["Companies", "company", "Company"];

#[derive(Parser)]
#[command(name = "funding-pipeline")]
#[command(about = "Collect and deduplicate funding rounds per company")]
struct Cli {
    /// TOML file overriding the built-in defaults
    #[arg(long, global = true, env = "FUNDING_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add companies from a CSV file
    Load {
        #[arg(long)]
        csv: PathBuf,
    },

    /// Process unfinished companies
    Run {
        /// Load this CSV first
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Stop after this many companies
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Dataset statistics
    Stats,

    /// Provider usage per day
    Usage,

    /// Re-open stages for every company, or re-admit failed ones
    Reset {
        /// resolve, filings, search or merge (later stages are reset too)
        #[arg(long)]
        stage: Vec<Stage>,

        #[arg(long)]
        failed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,funding_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let env = EnvConfig::from_env();
    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Load { csv } => {
            let store = open_store(&env, &config).await?;
            let inputs = read_companies(&csv)?;
            let loaded = load_companies(store.as_ref(), &inputs).await?;
            println!(
                "Loaded {} companies ({} new, {} existing, {} skipped)",
                inputs.len(),
                loaded.created,
                loaded.existing,
                loaded.skipped
            );
        }
        Commands::Run { csv, limit, workers } => {
            let store = open_store(&env, &config).await?;
            let pipeline = build_pipeline(store, &env, &config)?;
            if let Some(csv) = csv {
                pipeline.load_companies(&read_companies(&csv)?).await?;
            }
            run(&pipeline, limit, workers).await?;
        }
        Commands::Stats => {
            let store = open_store(&env, &config).await?;
            let stats = store.statistics().await?;
            println!("Companies:            {}", stats.companies);
            println!("Funding rounds:       {}", stats.funding_rounds);
            println!("  including dupes:    {}", stats.total_rounds);
            println!("Duplicates found:     {}", stats.duplicates_found);
            println!("Investors:            {}", stats.investors);
            println!("Sources:              {}", stats.sources);
            println!("Total raised (USD):   {:.0}", stats.total_amount_raised);
            for (source, count) in &stats.rounds_by_source {
                println!("  {:<18} {}", source, count);
            }
            let p = &stats.progress;
            println!(
                "Progress: resolved {}, filings {}, search {}, merged {}, errors {}, terminal {}",
                p.resolved,
                p.filings_collected,
                p.search_extracted,
                p.merged,
                p.with_errors,
                p.terminal_failures
            );
        }
        Commands::Usage => {
            let store = open_store(&env, &config).await?;
            let records = store.usage_records().await?;
            if records.is_empty() {
                println!("No provider usage recorded");
            }
            for r in records {
                println!(
                    "{} {} / {}: {} calls ({} ok, {} failed, {} rate limited), avg {}",
                    r.day,
                    r.provider,
                    r.model,
                    r.total_calls,
                    r.successful_calls,
                    r.failed_calls,
                    r.rate_limited_calls,
                    r.avg_latency_ms()
                        .map(|ms| format!("{:.0} ms", ms))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Commands::Reset { stage, failed } => {
            if stage.is_empty() && !failed {
                bail!("nothing to reset: pass --stage and/or --failed");
            }
            let store = open_store(&env, &config).await?;
            if let Some(earliest) = stage.iter().min() {
                let changed = store.reset_stages(*earliest).await?;
                println!("Reset {} companies from {}", changed, earliest);
            }
            if failed {
                let changed = store.clear_failures().await?;
                println!("Cleared failures on {} companies", changed);
            }
        }
    }

    Ok(())
}

async fn run(pipeline: &Pipeline<SqliteStore>, limit: Option<usize>, workers: Option<usize>) -> Result<()> {
    let shutdown = pipeline.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight stages");
            shutdown.cancel();
        }
    });

    let summary = pipeline.run_pipeline(limit, workers).await?;

    println!(
        "Processed {} companies, {} failed, {} interrupted",
        summary.companies_processed, summary.companies_failed, summary.companies_interrupted
    );
    println!(
        "Rounds found: {}, duplicates removed: {} ({:.1}s)",
        summary.rounds_found,
        summary.duplicates_removed,
        summary.elapsed.as_secs_f64()
    );
    for failure in &summary.errors {
        println!(
            "  {} [{}] {}: {}{}",
            failure.company,
            failure.stage.map(|s| s.as_str()).unwrap_or("commit"),
            failure.kind,
            failure.message,
            if failure.terminal { " (terminal)" } else { "" }
        );
    }
    if summary.cancelled {
        println!("Run interrupted. Re-run `funding-pipeline run` to resume from the last checkpoint.");
    }
    Ok(())
}

async fn open_store(env: &EnvConfig, config: &PipelineConfig) -> Result<Arc<SqliteStore>> {
    let url = config.database.url.as_deref().unwrap_or(&env.database_url);
    let max_connections = config
        .database
        .max_connections
        .unwrap_or(config.orchestrator.workers as u32 + 1);
    let store = SqliteStore::connect(url, max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", url))?;
    Ok(Arc::new(store))
}

fn build_pipeline(
    store: Arc<SqliteStore>,
    env: &EnvConfig,
    config: &PipelineConfig,
) -> Result<Pipeline<SqliteStore>> {
    let providers = build_providers(&config.providers, &config.router);
    if providers.is_empty() {
        bail!("no provider API keys configured");
    }

    let key = env
        .tavily_api_key
        .clone()
        .context("TAVILY_API_KEY is not set")?;
    let searcher = TavilySearcher::new(key, config.search.timeout())?;

    let filings = EdgarFilings::from_user_agents(env.sec_user_agents.clone(), &config.filings)
        .context("SEC_USER_AGENT_1..10 or SEC_USER_AGENT must be set")?;

    let router = Pipeline::router_for(store.clone(), providers, config);
    Ok(Pipeline::new(
        store,
        Collaborators {
            filings: Arc::new(filings),
            searcher: Arc::new(searcher),
            router,
        },
        config,
    ))
}

/// Company names (and optional CIKs) from a CSV with a header row.
fn read_companies(path: &Path) -> Result<Vec<CompanyInput>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let name_col = NAME_COLUMNS
        .iter()
        .find_map(|name| headers.iter().position(|h| h.trim() == *name))
        .with_context(|| format!("{} has no Companies/company/Company column", path.display()))?;
    let cik_col = headers.iter().position(|h| h.trim().eq_ignore_ascii_case("cik"));

    let mut inputs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = record.get(name_col).unwrap_or_default().trim();
        if name.is_empty() {
            continue;
        }
        let mut input = CompanyInput::new(name);
        if let Some(cik) = cik_col.and_then(|i| record.get(i)).map(str::trim) {
            if !cik.is_empty() {
                input = input.with_registry_id(cik);
            }
        }
        inputs.push(input);
    }
    Ok(inputs)
}
