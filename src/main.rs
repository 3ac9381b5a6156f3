//! # finsight CLI
//!
//! The `finsight` binary is the single-process interface to the
//! pipeline: ingest a PDF into a session directory, ask one-shot
//! questions, run an interactive chat loop, or start the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! finsight --config ./config/finsight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finsight ingest <pdf> --session <dir>` | Parse, segment, summarize charts, and build the knowledge store |
//! | `finsight ask <question> --session <dir>` | Answer one question (no history) |
//! | `finsight chat --session <dir>` | Interactive multi-turn chat |
//! | `finsight serve` | Start the session HTTP API |

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::{Parser, Subcommand};

use finsight::config::{load_config, Config};
use finsight::embedding::create_embedder;
use finsight::extract::PdfTextParser;
use finsight::ingest::{ingest_document, store_path};
use finsight::llm::{create_chat_model, create_vision_model};
use finsight::models::Turn;
use finsight::rag;
use finsight::server::run_server;
use finsight::store::KnowledgeStore;

/// finsight — conversational retrieval over financial PDF reports.
#[derive(Parser)]
#[command(
    name = "finsight",
    about = "Ask questions about the text, tables, and charts of a financial PDF report",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/finsight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a PDF report into a session directory.
    ///
    /// Parses the document, splits text into overlapping chunks, keeps
    /// tables whole, summarizes chart images with the vision model, and
    /// builds the session's knowledge store. Re-running replaces the
    /// store entirely.
    Ingest {
        /// Path to the PDF file.
        pdf: PathBuf,

        /// Session directory (created if missing).
        #[arg(long)]
        session: PathBuf,
    },

    /// Ask a single question against an ingested session.
    Ask {
        /// The question.
        question: String,

        /// Session directory created by `ingest`.
        #[arg(long)]
        session: PathBuf,
    },

    /// Interactive multi-turn chat against an ingested session.
    ///
    /// Follow-up questions are rewritten into standalone queries using
    /// the in-memory conversation history. `exit` or EOF quits.
    Chat {
        /// Session directory created by `ingest`.
        #[arg(long)]
        session: PathBuf,
    },

    /// Start the session-facing HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Ingest { pdf, session } => run_ingest(&config, &pdf, &session).await,
        Commands::Ask { question, session } => run_ask(&config, &question, &session).await,
        Commands::Chat { session } => run_chat(&config, &session).await,
        Commands::Serve => run_server(&config).await,
    }
}

async fn run_ingest(config: &Config, pdf: &PathBuf, session: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(session)?;

    let embedder = create_embedder(&config.embedding)?;
    let vision = create_vision_model(&config.vision)?;
    let cancelled = AtomicBool::new(false);

    let report = ingest_document(
        &PdfTextParser,
        embedder.as_ref(),
        vision.as_ref(),
        config,
        pdf,
        session,
        &cancelled,
    )
    .await?;

    println!("ingest {}", pdf.display());
    println!("  text chunks: {}", report.text_units);
    println!("  tables: {}", report.table_units);
    println!("  chart summaries: {}", report.image_units);
    println!("  store: {}", store_path(session).display());
    println!("ok");
    Ok(())
}

async fn run_ask(config: &Config, question: &str, session: &PathBuf) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let chat = create_chat_model(&config.generation)?;
    let store = KnowledgeStore::open(&store_path(session), embedder.as_ref()).await?;

    let answer = rag::answer(
        &store,
        embedder.as_ref(),
        chat.as_ref(),
        &config.retrieval,
        &[],
        question,
    )
    .await;
    store.close().await;
    let answer = answer?;

    println!("{}", answer.text);
    print_sources(&answer.sources);
    Ok(())
}

async fn run_chat(config: &Config, session: &PathBuf) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let chat = create_chat_model(&config.generation)?;
    let store = KnowledgeStore::open(&store_path(session), embedder.as_ref()).await?;

    let mut history: Vec<Turn> = Vec::new();
    let stdin = std::io::stdin();

    println!("Ask about revenue, risks, or specific charts. `exit` quits.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "exit" || message == "quit" {
            break;
        }

        match rag::answer(
            &store,
            embedder.as_ref(),
            chat.as_ref(),
            &config.retrieval,
            &history,
            message,
        )
        .await
        {
            Ok(answer) => {
                println!("{}", answer.text);
                print_sources(&answer.sources);
                history.push(Turn::user(message));
                history.push(Turn::assistant(&answer.text));
            }
            Err(e) => eprintln!("Warning: request failed: {:#}", e),
        }
    }

    store.close().await;
    Ok(())
}

fn print_sources(sources: &[finsight::models::SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, source) in sources.iter().enumerate() {
        let snippet = source.snippet.replace('\n', " ");
        println!("  {}. [{}] {}", i + 1, source.source_type, snippet.trim());
        if let Some(ref path) = source.image_path {
            println!("     image: {}", path);
        }
    }
}
