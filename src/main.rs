//! # docqa CLI
//!
//! The `docqa` binary builds an index from a documents directory and answers
//! questions against it, one-shot, interactively, or over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa build` | Load, chunk, embed and persist the documents directory |
//! | `docqa ask "<question>"` | Answer one question and list its sources |
//! | `docqa chat` | Interactive conversation with streamed answers |
//! | `docqa serve` | Start the HTTP API |
//! | `docqa info` | Describe the persisted index |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `docqa=info`).

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docqa::config::{self, Config};
use docqa::conversation::{self, ExchangeEvent, Orchestrator};
use docqa::embedding::create_embedder;
use docqa::generation::create_generator;
use docqa::{index_store, info, ingest, server};
use docqa_core::models::TurnStatus;
use docqa_core::session::Session;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const PREVIEW_CHARS: usize = 200;

/// docqa: question answering over a private document collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, built-in defaults (local Ollama) are used.
#[derive(Parser)]
#[command(name = "docqa", version, about = "Ask questions about your documents")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the documents directory.
    ///
    /// Replaces any previous index once the new one is fully written.
    Build,

    /// Answer a single question.
    Ask {
        question: String,

        /// Generation model (defaults to `generation.model`).
        #[arg(long)]
        model: Option<String>,

        /// Transcript of an earlier conversation to continue.
        #[arg(long, default_value = "")]
        history: String,
    },

    /// Start an interactive conversation.
    ///
    /// Type `exit` or `quit` to leave, `/reset` to clear the history.
    Chat {
        /// Generation model (defaults to `generation.model`).
        #[arg(long)]
        model: Option<String>,
    },

    /// Start the HTTP server.
    Serve,

    /// Show what the persisted index contains.
    Info,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docqa=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Build => {
            let embedder = create_embedder(&cfg.embedding)?;
            ingest::run_build(&cfg, embedder.as_ref()).await?;
        }
        Commands::Ask {
            question,
            model,
            history,
        } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let generator = create_generator(&cfg.generation)?;
            let response = match conversation::ask(
                &cfg,
                embedder,
                generator,
                &question,
                &history,
                model.as_deref(),
            )
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    eprintln!("error: {}", e);
                    std::process::exit(1);
                }
            };

            println!("{}", response.answer);
            if !response.context.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.context {
                    println!("  - {}", source);
                }
            }
        }
        Commands::Chat { model } => {
            run_chat(&cfg, model.as_deref()).await?;
        }
        Commands::Serve => {
            let embedder = create_embedder(&cfg.embedding)?;
            let generator = create_generator(&cfg.generation)?;
            server::run_server(&cfg, embedder, generator).await?;
        }
        Commands::Info => {
            info::run_info(&cfg).await?;
        }
    }

    Ok(())
}

/// Interactive loop: one exchange per input line, answers streamed to stdout.
async fn run_chat(cfg: &Config, model: Option<&str>) -> Result<()> {
    let embedder = create_embedder(&cfg.embedding)?;
    let generator = create_generator(&cfg.generation)?;
    let index = load_index(cfg, embedder.as_ref()).await?;
    let orchestrator = Orchestrator::new(Arc::new(index), embedder, generator, cfg.retrieval.params()?)
        .with_known_models(cfg.generation.models.clone());

    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Ask a question (`exit` to quit, `/reset` to clear history).");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                session.reset();
                println!("(history cleared)");
                continue;
            }
            _ => {}
        }

        let (tx, mut rx) = mpsc::channel(32);
        let exchange = async {
            let tx = tx;
            orchestrator
                .respond(&mut session, question, model, Some(&tx))
                .await
        };
        let printer = async {
            while let Some(event) = rx.recv().await {
                if let ExchangeEvent::Fragment(text) = event {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
            }
        };
        let (result, ()) = tokio::join!(exchange, printer);
        println!();

        match result {
            Ok(outcome) => {
                if outcome.status == TurnStatus::Completed && !outcome.context.is_empty() {
                    println!();
                    println!("Sources:");
                    for chunk in &outcome.context {
                        println!("  - {}", docqa_core::models::SourceInfo::from(chunk));
                        println!("    {}", preview(&chunk.content));
                    }
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
        println!();
    }

    Ok(())
}

/// Load the configured index or exit with a hint to build it.
async fn load_index(
    cfg: &Config,
    embedder: &dyn docqa_core::embedding::EmbeddingProvider,
) -> Result<docqa_core::index::memory::InMemoryIndex> {
    match index_store::load_compatible(&cfg.index.path, embedder).await {
        Ok(index) => Ok(index),
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!(
                "hint: run `docqa build` to index {}",
                cfg.docs.dir.display()
            );
            std::process::exit(1);
        }
    }
}

/// First [`PREVIEW_CHARS`] characters on one line.
fn preview(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", cut)
}
