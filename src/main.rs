use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use certlookup::logging::init_logging;
use certlookup::{
    AppConfig, DataSource, Record, SearchOrchestrator, SearchPhase, SearchState, build_source,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const SETTLE_MARGIN: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(
    name = "certlookup",
    version,
    about = "Look up course certificates by student name"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "CERTLOOKUP_CONFIG", default_value = "certlookup.toml")]
    config: PathBuf,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search certificates by name (accent and case insensitive)
    Search {
        /// Name or part of a name; every word must appear
        term: String,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every certificate in the dataset
    List {
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read queries from stdin, one per line, as if typed into a search box.
    /// A blank line clears the results; `:clear` also resets the query.
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let cfg = AppConfig::load(&cli.config).context("failed to load certlookup config")?;
    info!(
        stage = "startup",
        event = "config.load.end",
        result = "ok",
        source = cfg.source.kind(),
        config_path = %cli.config.display(),
        "configuration loaded"
    );
    let source = build_source(&cfg.source).context("failed to set up data source")?;

    match cli.command {
        Command::Search { term, json } => {
            let records = source.search(&term).await?;
            print_records(&records, json)
        }
        Command::List { json } => {
            let records = source.fetch_all().await?;
            print_records(&records, json)
        }
        Command::Interactive => {
            let debounce = cfg.search.debounce;
            interactive(SearchOrchestrator::with_debounce(source, debounce), debounce).await
        }
    }
}

async fn interactive(orchestrator: SearchOrchestrator, debounce: Duration) -> Result<()> {
    let mut updates = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print_state(&state);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim() == ":clear" {
            orchestrator.clear();
        } else {
            orchestrator.set_query(&line);
        }
    }

    // Input closed: let the last debounced query run to completion.
    tokio::time::sleep(debounce + SETTLE_MARGIN).await;
    orchestrator
        .subscribe()
        .wait_for(|state| !state.loading)
        .await
        .context("search state closed")?;
    tokio::task::yield_now().await;
    printer.abort();
    Ok(())
}

fn print_state(state: &SearchState) {
    match state.phase {
        SearchPhase::Searching => println!("searching \"{}\"...", state.query.trim()),
        SearchPhase::Success => {
            println!("{} result(s) for \"{}\"", state.results.len(), state.query.trim());
            for record in &state.results {
                println!("  {}", format_record(record));
            }
        }
        SearchPhase::Failed => {
            println!("error: {}", state.error.as_deref().unwrap_or("search failed"));
        }
        SearchPhase::Idle => {}
    }
}

fn print_records(records: &[Record], json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(records).context("failed to serialize results")?;
        println!("{out}");
        return Ok(());
    }

    if records.is_empty() {
        println!("no certificates found");
    }
    for record in records {
        println!("{}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &Record) -> String {
    let download = if record.download_url().is_empty() {
        "(no document)"
    } else {
        record.download_url()
    };
    format!(
        "{} | {} | {} | {}",
        record.name(),
        record.location(),
        record.completion_date(),
        download
    )
}
