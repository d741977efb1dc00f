//! Recollect CLI
//!
//! Command-line interface for writing and querying conversational memory.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recollect::error::Result;
use recollect::types::*;
use recollect::MemorySystem;

#[derive(Parser)]
#[command(name = "recollect")]
#[command(about = "Conversational fact memory CLI")]
#[command(version)]
struct Cli {
    /// Database path (":memory:" keeps nothing between runs)
    #[arg(
        long,
        env = "RECOLLECT_DB_PATH",
        default_value = "~/.local/share/recollect/facts.db"
    )]
    db_path: String,

    /// User the memory belongs to
    #[arg(short, long, env = "RECOLLECT_USER_ID", default_value = "default_user")]
    user: String,

    /// Agent the memory belongs to
    #[arg(short, long, env = "RECOLLECT_AGENT_ID", default_value = "default_agent")]
    agent: String,

    /// Reconciliation strategy (similarity, llm)
    #[arg(long, env = "RECOLLECT_RECONCILE")]
    reconcile: Option<ReconcileStrategy>,

    /// Emit logs as JSON
    #[arg(long, env = "RECOLLECT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract facts from a conversation turn and store them
    Write {
        /// Conversation text
        conversation: String,
    },
    /// Search remembered facts
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "5")]
        limit: i64,
    },
    /// Show the facts extracted from a conversation turn without storing them
    Extract {
        /// Conversation text
        conversation: String,
    },
    /// List remembered facts
    List,
    /// Delete a fact
    Delete {
        /// Fact ID
        id: FactId,
    },
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = MemoryConfig::from_env()?;

    // Expand ~ in path
    config.storage.db_path = shellexpand::tilde(&cli.db_path).to_string();
    if let Some(strategy) = cli.reconcile {
        config.reconcile.strategy = strategy;
    }

    let system = MemorySystem::from_config(config)?;
    let (user, agent) = (cli.user.as_str(), cli.agent.as_str());

    match cli.command {
        Commands::Write { conversation } => {
            let report = system.write_memory(&conversation, user, agent).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Search { query, limit } => {
            let hits = system.search_memory(&query, user, agent, limit).await?;
            if hits.is_empty() {
                println!("No memories found");
            }
            for hit in hits {
                println!("{:.3}  {}", hit.score, hit.text);
            }
        }
        Commands::Extract { conversation } => {
            let facts = system.extract_facts(&conversation).await;
            println!("{}", serde_json::to_string_pretty(&facts)?);
        }
        Commands::List => {
            let facts = system.list_memories(user, agent)?;
            for fact in &facts {
                println!(
                    "{}  {}  {}",
                    fact.id,
                    fact.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    fact.text
                );
            }
            println!("{} fact(s)", facts.len());
        }
        Commands::Delete { id } => {
            system.delete_memory(id, user, agent).await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}
