//! # pagechat CLI
//!
//! The `pagechat` binary drives the engine end to end: database setup,
//! crawl-dump ingestion, search, one-off chat turns, and the HTTP server.
//!
//! ```bash
//! pagechat --config ./config/pagechat.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagechat init` | Create the SQLite database and run schema migrations |
//! | `pagechat ingest <file>` | Ingest a JSON-lines crawl dump |
//! | `pagechat search "<query>"` | Search indexed fragments |
//! | `pagechat chat "<message>"` | Run one chat turn |
//! | `pagechat serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pagechat::config;

/// pagechat — answer questions about an organization's web content.
///
/// All commands read a TOML configuration file; see
/// `config/pagechat.example.toml` for a documented example.
#[derive(Parser)]
#[command(
    name = "pagechat",
    about = "Retrieval-and-ingestion engine for web-content Q&A",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pagechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// fragments, fragments_fts). Idempotent.
    Init,

    /// Ingest a JSON-lines crawl dump.
    ///
    /// Each line is one document: `{"url", "content", "title", "doc_type",
    /// "scraped_at"}`. Unchanged urls are skipped, changed ones replaced
    /// atomically; a document whose embedding fails is reported and the run
    /// continues.
    Ingest {
        /// Path to the `.jsonl` dump file.
        file: PathBuf,
    },

    /// Search indexed fragments.
    Search {
        /// The search query.
        query: String,

        /// Retrieval mode: `text` (FTS5), `vector`, or `hybrid` (RRF).
        /// Vector and hybrid require an embedding provider.
        #[arg(long, default_value = "text")]
        mode: String,

        /// Maximum number of results.
        #[arg(long)]
        top: Option<usize>,

        /// Only return fragments of this document type (e.g. `webpage`, `pdf`).
        #[arg(long = "type")]
        doc_type: Option<String>,
    },

    /// Run one chat turn against the indexed content.
    ///
    /// Requires a generation provider; retrieval follows the configured
    /// mode. Conversation state lives for the process lifetime, so reuse
    /// `--conversation` across calls within a session.
    Chat {
        /// The user message.
        message: String,

        /// Conversation id for session state.
        #[arg(long, default_value = "cli")]
        conversation: String,

        /// Print the full retrieval/prompt trace as JSON.
        #[arg(long)]
        trace: bool,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is reserved for command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pagechat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            pagechat::migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            pagechat::migrate::run_migrations(&cfg).await?;
            pagechat::ingest::run_ingest(&cfg, &file).await?;
        }
        Commands::Search { query, mode, top, doc_type } => {
            pagechat::search::run_search(&cfg, &query, &mode, top, doc_type).await?;
        }
        Commands::Chat { message, conversation, trace } => {
            run_chat(&cfg, &message, &conversation, trace).await?;
        }
        Commands::Serve => {
            pagechat::server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_chat(
    cfg: &config::Config,
    message: &str,
    conversation: &str,
    print_trace: bool,
) -> anyhow::Result<()> {
    use pagechat_core::embedding::Embedder;
    use pagechat_core::generation::Generator;
    use pagechat_core::search::SearchParams;
    use pagechat_core::session::SessionStore;
    use pagechat_core::store::Store;

    if !cfg.generation.is_enabled() {
        anyhow::bail!("Chat requires a generation provider. Set [generation] provider in config.");
    }

    let pool = pagechat::db::connect(cfg).await?;
    let store = Arc::new(pagechat::sqlite_store::SqliteStore::new(pool.clone()));
    let embedder: Arc<dyn Embedder> = Arc::from(pagechat::embedding::create_embedder(&cfg.embedding)?);
    let generator: Arc<dyn Generator> =
        Arc::from(pagechat::generation::create_generator(&cfg.generation)?);

    let router = pagechat::ChatRouter::new(
        store as Arc<dyn Store>,
        embedder,
        generator,
        pagechat::prompts::PromptBundle::default(),
        Arc::new(SessionStore::new()),
        pagechat::router::RouterSettings {
            default_mode: cfg.retrieval.mode.parse()?,
            default_top: cfg.retrieval.top,
            search_params: SearchParams {
                breadth: cfg.retrieval.breadth,
                rrf_k: cfg.retrieval.rrf_k,
            },
            with_user_profile: cfg.chat.with_user_profile,
            history_limit: cfg.chat.history_limit,
        },
    );

    let request = pagechat::ChatRequest {
        conversation_id: conversation.to_string(),
        messages: vec![pagechat_core::models::ChatMessage::user(message)],
        overrides: Default::default(),
        user_profile: None,
    };

    let response = router.chat(&request).await;
    println!("{}", response.answer);
    if print_trace {
        println!();
        println!("{}", serde_json::to_string_pretty(&response.trace)?);
    }

    pool.close().await;
    Ok(())
}
