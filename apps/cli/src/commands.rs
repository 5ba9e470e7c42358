//! CLI command definitions, routing, and tracing setup.

use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use companyintel_core::eval::EvalStatus;
use companyintel_core::jobs::{JobSnapshot, JobStatus, TriggerOutcome};
use companyintel_core::services::Services;
use companyintel_shared::{AppConfig, BackendSettings, init_config, load_config};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Interval between status polls of a background job.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Company Intel: per-company knowledge bases for retrieval.
#[derive(Parser)]
#[command(
    name = "companyintel",
    version,
    about = "Scrape a company's public web presence into a searchable knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scrape a company and (unless skipped) ingest it into the index.
    Scrape {
        company: String,

        /// Stop after saving raw documents.
        #[arg(long)]
        skip_ingest: bool,
    },

    /// Re-ingest a company's saved raw documents.
    Ingest { company: String },

    /// Search the knowledge base.
    Search {
        query: String,

        /// Restrict results to one company.
        #[arg(short, long)]
        company: Option<String>,
    },

    /// List companies with saved raw documents.
    List,

    /// Delete a company's vectors and raw documents.
    Delete { company: String },

    /// Evaluate retrieval against a company's golden dataset.
    Eval { company: String },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "companyintel=info",
        1 => "companyintel=debug",
        _ => "companyintel=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Scrape {
            company,
            skip_ingest,
        } => cmd_scrape(&build_services()?, &company, skip_ingest).await,
        Command::Ingest { company } => cmd_ingest(&build_services()?, &company).await,
        Command::Search { query, company } => {
            cmd_search(&build_services()?, &query, company.as_deref()).await
        }
        Command::List => cmd_list(&build_services()?),
        Command::Delete { company } => cmd_delete(&build_services()?, &company).await,
        Command::Eval { company } => cmd_eval(&build_services()?, &company).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Backend wiring comes from the environment and fails fast when incomplete.
fn build_services() -> Result<Services> {
    let config = load_config()?;
    let settings = BackendSettings::from_env()?;
    Ok(Services::new(config, settings)?)
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn cmd_scrape(services: &Services, company: &str, skip_ingest: bool) -> Result<()> {
    let outcome = if skip_ingest {
        services.jobs.trigger_scrape_only(company)?
    } else {
        services.jobs.trigger(company)?
    };
    match &outcome {
        TriggerOutcome::Started(id) => info!(company, job_id = %id, skip_ingest, "scrape started"),
        TriggerOutcome::AlreadyRunning(id) => {
            println!("A job for '{company}' is already running ({id}); following it.");
        }
    }

    let spinner = spinner();
    let job = loop {
        let job = services
            .jobs
            .status(company)
            .ok_or_else(|| eyre!("job for '{company}' disappeared"))?;
        if job.status != JobStatus::Running {
            break job;
        }
        spinner.set_message(job.phase.unwrap_or_else(|| "Starting".into()));
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    spinner.finish_and_clear();

    print_job(&job);
    match job.status {
        JobStatus::Failed => Err(eyre!(
            "job failed: {}",
            job.error.unwrap_or_else(|| "unknown error".into())
        )),
        _ => Ok(()),
    }
}

fn print_job(job: &JobSnapshot) {
    println!();
    println!("  Company:   {}", job.company);
    println!("  Status:    {}", job.status);
    if let Some(scrape) = &job.scrape {
        println!("  Website:   {} pages", scrape.website_pages);
        println!("  Search:    {} pages", scrape.search_pages);
        println!(
            "  Wikipedia: {} ({} pages)",
            if scrape.wikipedia_scraped { "yes" } else { "no" },
            scrape.wikipedia_pages
        );
        println!("  Documents: {}", scrape.total_documents);
        if !scrape.errors.is_empty() {
            println!("  Errors:    {}", scrape.errors.len());
            for error in &scrape.errors {
                println!("    - {error}");
            }
        }
    }
    if let Some(ingestion) = &job.ingestion {
        println!("  Chunks:    {}", ingestion.chunks_produced);
        println!("  Vectors:   {}", ingestion.vectors_stored);
    }
    if let Some(finished) = job.finished_at {
        let elapsed = finished - job.started_at;
        println!("  Time:      {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
    println!();
}

async fn cmd_ingest(services: &Services, company: &str) -> Result<()> {
    let spinner = spinner();
    spinner.set_message(format!("Ingesting {company}"));
    let result = services
        .ingestor
        .ingest_company(company, services.orchestrator.store())
        .await;
    spinner.finish_and_clear();
    let result = result?;

    println!();
    println!("  Company:   {}", result.company);
    println!("  Documents: {}", result.documents_loaded);
    println!("  Chunks:    {}", result.chunks_produced);
    println!("  Vectors:   {}", result.vectors_stored);
    println!();
    Ok(())
}

async fn cmd_search(services: &Services, query: &str, company: Option<&str>) -> Result<()> {
    let outcome = services
        .retriever
        .search_knowledge_base(query, company)
        .await?;
    println!("{outcome}");
    Ok(())
}

fn cmd_list(services: &Services) -> Result<()> {
    let companies = services.admin.list_companies()?;
    if companies.is_empty() {
        println!("No companies scraped yet.");
        return Ok(());
    }
    for entry in companies {
        println!("  {:<30} {:>5} files", entry.company, entry.files);
    }
    Ok(())
}

async fn cmd_delete(services: &Services, company: &str) -> Result<()> {
    let outcome = services.admin.delete_company(company).await?;
    println!("{}", outcome.message());
    Ok(())
}

async fn cmd_eval(services: &Services, company: &str) -> Result<()> {
    let run_id = services.eval.trigger(company)?.id().clone();
    info!(%run_id, "evaluation triggered");

    let spinner = spinner();
    let run = loop {
        let run = services
            .eval
            .status(&run_id)
            .ok_or_else(|| eyre!("evaluation run '{run_id}' not found"))?;
        if run.status != EvalStatus::Running {
            break run;
        }
        let phase = run.phase;
        spinner.set_message(match &run.progress {
            Some(progress) => format!("{phase} [{progress}]"),
            None => phase.to_string(),
        });
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    spinner.finish_and_clear();

    if run.status == EvalStatus::Failed {
        return Err(eyre!(
            "evaluation failed: {}",
            run.error.unwrap_or_else(|| "unknown error".into())
        ));
    }

    println!();
    println!("  Run:       {}", run.run_id);
    if let Some(ingestion) = &run.ingestion {
        println!("  Vectors:   {}", ingestion.vectors_stored);
    }
    if let Some(metrics) = run.metrics {
        println!("  Queries:   {}", metrics.queries_evaluated);
        println!("  Hit rate:  {:.3}", metrics.hit_rate);
        println!("  Recall:    {:.3}", metrics.context_recall);
    }
    if let Some(path) = run.report_path {
        println!("  Report:    {}", path.display());
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
