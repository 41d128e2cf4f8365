use greenindex::assistant::NdviAssistant;
use greenindex::config::Config;
use greenindex::dataset::{title_case, Dataset};
use greenindex::query_extractor::ValidationPolicy;
use greenindex::session::{EntryKind, Session};
use greenindex::worker::{SessionHandle, SessionWorker};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "greenindex")]
#[command(about = "Ask about NDVI vegetation readings for Indian states in plain language")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// NDVI dataset file, .json or .csv (or set GREENINDEX_DATA)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// LLM API key (or set GROQ_API_KEY / OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model used to extract filters from queries
    #[arg(long, global = true)]
    query_model: Option<String>,

    /// Model used to answer follow-up questions
    #[arg(long, global = true)]
    analysis_model: Option<String>,

    /// NDVI image service base URL
    #[arg(long, global = true)]
    image_api_url: Option<String>,

    /// Skip NDVI map fetching
    #[arg(long, global = true)]
    no_images: bool,

    /// Timeout for every outbound HTTP call, in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// What to do with filters outside the dataset: skip or abort
    #[arg(long, global = true)]
    policy: Option<ValidationPolicy>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query and print the matching entries
    Query {
        /// e.g. "NDVI for Andhra Pradesh in May 2025"
        text: String,
    },
    /// Interactive session with follow-up questions
    Repl,
    /// List the states, months and years in the dataset
    States,
}

impl Args {
    /// Environment first, flags on top.
    fn config(&self) -> Result<Config> {
        let mut config = Config::from_env()?;
        if let Some(path) = &self.data {
            config.data_path = path.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if let Some(model) = &self.query_model {
            config.query_model = model.clone();
        }
        if let Some(model) = &self.analysis_model {
            config.analysis_model = model.clone();
        }
        if let Some(url) = &self.image_api_url {
            config.image_api_url = url.clone();
        }
        if self.no_images {
            config.images_enabled = false;
        }
        if let Some(secs) = self.timeout_secs {
            anyhow::ensure!(secs > 0, "--timeout-secs must be positive");
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = self.policy {
            config.validation_policy = policy;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "greenindex=debug" } else { "greenindex=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = args.config()?;
    let dataset = Dataset::load(&config.data_path)
        .with_context(|| format!("loading NDVI dataset from {}", config.data_path.display()))?;
    info!("Loaded {} NDVI records from {}", dataset.len(), config.data_path.display());
    let dataset = Arc::new(dataset);

    match args.command {
        Commands::States => {
            print_states(&dataset);
            Ok(())
        }
        Commands::Query { text } => {
            let assistant = NdviAssistant::from_config(&config, dataset)?;
            run_query(&assistant, &text).await
        }
        Commands::Repl => {
            let assistant = Arc::new(NdviAssistant::from_config(&config, dataset)?);
            run_repl(assistant).await
        }
    }
}

fn print_states(dataset: &Dataset) {
    let allow = dataset.allow_list();

    println!("\n=== States ({}) ===", allow.states.len());
    for state in &allow.states {
        println!("  {}", title_case(state));
    }
    let months: Vec<String> = allow.months.iter().map(|m| title_case(m)).collect();
    println!("\nMonths: {}", months.join(", "));
    let years: Vec<String> = allow.years.iter().map(|y| y.to_string()).collect();
    println!("Years: {}", years.join(", "));
    if let Some(coverage) = dataset.coverage() {
        println!("Coverage: {}", coverage);
    }
}

async fn run_query(assistant: &NdviAssistant, text: &str) -> Result<()> {
    let mut session = Session::new();
    let report = assistant.run_query(&mut session, text).await?;

    for warning in report.warnings() {
        println!("! {}", warning);
    }
    if report.is_empty() {
        println!("No matching NDVI data found.");
        return Ok(());
    }

    println!("\n=== NDVI Results ===");
    for entry in session.entries() {
        println!("\n{}", entry);
    }
    Ok(())
}

fn print_notice(dataset: &Dataset) {
    println!("GreenIndex: NDVI insights for Indian states");
    if let Some(coverage) = dataset.coverage() {
        println!("Data covers {}.", coverage);
    }
    println!("Some state boundaries are merged in the source data, so neighbouring states may share readings.");
    println!("Mention both a month and a year in every query, e.g. \"NDVI for Kerala in May 2025\".");
    println!("Start a line with '?' to ask about results so far. 'history' lists them, 'quit' exits.\n");
}

async fn run_repl(assistant: Arc<NdviAssistant>) -> Result<()> {
    print_notice(assistant.dataset());

    let (handle, worker) = SessionWorker::spawn(assistant);
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "quit" | "exit" => break,
            "history" => print_history(&handle).await,
            _ => {
                if let Some(question) = line.strip_prefix('?') {
                    match handle.followup(question).await {
                        Ok(answer) => println!("\n{}\n", answer),
                        Err(e) => error!("{}", e),
                    }
                } else {
                    submit_query(&handle, line).await;
                }
            }
        }
    }

    handle.shutdown().await?;
    worker.await?;
    Ok(())
}

async fn submit_query(handle: &SessionHandle, text: &str) {
    let outcome = match handle.query(text).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    for warning in outcome.report.warnings() {
        println!("! {}", warning);
    }
    if outcome.entries.is_empty() {
        println!("No matching NDVI data found.");
    }
    for entry in &outcome.entries {
        println!("\n{}", entry);
    }
    println!();
}

async fn print_history(handle: &SessionHandle) {
    let entries = match handle.history().await {
        Ok(entries) => entries,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    if entries.is_empty() {
        println!("Nothing yet.");
        return;
    }
    for (i, entry) in entries.iter().enumerate() {
        let label = match entry.kind {
            EntryKind::Data(_) => "data",
            EntryKind::Qa(_) => "q&a",
        };
        println!("\n[{}] {} @ {}", i + 1, label, entry.appended_at.format("%H:%M:%S"));
        println!("{}", entry);
    }
    println!();
}
