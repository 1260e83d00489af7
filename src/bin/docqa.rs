//! DocQA CLI
//!
//! Command-line interface for building the document index and asking
//! questions against it. Every command prints JSON on stdout; logs go to
//! stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docqa_lib::{
    // Config
    DataLayout, PipelineConfig,
    // Build stages
    build_index, load_embedder, process_raw_dir, run_pipeline, ChunkStore, IndexStore,
    // Query time
    AnswerLog, HttpGenerator, QaEngine, Retriever,
};

/// Chat defaults, kept small for interactive use
const CHAT_TOP_K: usize = 3;
const CHAT_MAX_TOKENS: usize = 150;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "DocQA - Question answering over local PDF and HTML documents", long_about = None)]
struct Cli {
    /// Config file (default: $DOCQA_CONFIG, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding raw/, processed/ and embeddings/
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from raw documents and write chunks
    Ingest {
        /// Words per chunk (default from config)
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Embed all chunks and save the index
    Embed,
    /// Run ingest, embed and the post-build command
    Pipeline,
    /// Show the chunks closest to a query
    Search {
        query: String,
        /// Number of chunks to return (default from config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Answer a single question
    Ask {
        question: String,
        /// Number of chunks used as context (default from config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Generation budget (default from config)
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Do not write an answer log
        #[arg(long)]
        no_log: bool,
    },
    /// Interactive question answering
    Chat {
        #[arg(short = 'k', long, default_value_t = CHAT_TOP_K)]
        top_k: usize,
        #[arg(long, default_value_t = CHAT_MAX_TOKENS)]
        max_tokens: usize,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatTurn {
    role: &'static str,
    content: String,
}

// ============ Main ============

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Ingest { chunk_size } => handle_ingest(&config, chunk_size),
        Commands::Embed => handle_embed(&config),
        Commands::Pipeline => handle_pipeline(&config),
        Commands::Search { query, top_k } => handle_search(&config, &query, top_k),
        Commands::Ask { question, top_k, max_tokens, no_log } => {
            handle_ask(&config, &question, top_k, max_tokens, no_log)
        }
        Commands::Chat { top_k, max_tokens } => handle_chat(&config, top_k, max_tokens),
    });

    match result {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput { error: format!("{:#}", e) };
            println!("{}", serde_json::to_string(&error).unwrap_or_else(|_| e.to_string()));
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::discover(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = &cli.data_dir {
        config.layout = DataLayout::rooted_at(dir);
    }
    Ok(config)
}

// ============ Handlers ============

fn handle_ingest(config: &PipelineConfig, chunk_size: Option<usize>) -> Result<String> {
    let layout = &config.layout;
    let chunks = ChunkStore::new(&layout.chunks_dir);
    let report = process_raw_dir(
        &layout.raw_dir,
        &layout.processed_dir,
        &chunks,
        chunk_size.unwrap_or(config.chunk_size),
    )?;
    Ok(serde_json::to_string(&report)?)
}

fn handle_embed(config: &PipelineConfig) -> Result<String> {
    let embedder = load_embedder(&config.embedding)?;
    let chunks = ChunkStore::new(&config.layout.chunks_dir);
    let store = IndexStore::new(&config.layout.embeddings_dir);
    let report = build_index(&chunks, &store, embedder.as_ref())?;
    Ok(serde_json::to_string(&report)?)
}

fn handle_pipeline(config: &PipelineConfig) -> Result<String> {
    let report = run_pipeline(config, || load_embedder(&config.embedding));
    let json = serde_json::to_string(&report)?;
    if !report.succeeded() {
        // The report still goes to stdout so callers see which step failed.
        println!("{}", json);
        std::process::exit(1);
    }
    Ok(json)
}

fn handle_search(config: &PipelineConfig, query: &str, top_k: Option<usize>) -> Result<String> {
    let retriever = open_retriever(config)?;
    let results = retriever.retrieve(query, top_k.unwrap_or(config.top_k))?;
    Ok(serde_json::to_string(&results)?)
}

fn handle_ask(
    config: &PipelineConfig,
    question: &str,
    top_k: Option<usize>,
    max_tokens: Option<usize>,
    no_log: bool,
) -> Result<String> {
    let engine = open_engine(config)?;
    let answer = engine.answer(
        question,
        top_k.unwrap_or(config.top_k),
        max_tokens.unwrap_or(config.max_new_tokens),
        config.save_log && !no_log,
    )?;
    Ok(serde_json::to_string(&answer)?)
}

/// Line-oriented chat. Prints answers as plain text while running and the
/// session transcript as JSON on exit.
fn handle_chat(config: &PipelineConfig, top_k: usize, max_tokens: usize) -> Result<String> {
    let engine = open_engine(config)?;
    let mut history: Vec<ChatTurn> = Vec::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    eprintln!("Ask a question (:history to review, :quit to leave)");
    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        match question {
            "" => continue,
            ":quit" | ":q" | "exit" => break,
            ":history" => {
                for turn in &history {
                    eprintln!("[{}] {}", turn.role, turn.content);
                }
                continue;
            }
            _ => {}
        }

        history.push(ChatTurn { role: "user", content: question.to_string() });
        match engine.answer(question, top_k, max_tokens, config.save_log) {
            Ok(answer) => {
                writeln!(stdout, "{}\n", answer.answer)?;
                stdout.flush()?;
                history.push(ChatTurn { role: "assistant", content: answer.answer });
            }
            Err(e) => {
                warn!(error = %e, "Question failed");
                eprintln!("error: {}", e);
            }
        }
    }

    Ok(serde_json::to_string(&history)?)
}

// ============ Helpers ============

fn open_retriever(config: &PipelineConfig) -> Result<Retriever> {
    let embedder = load_embedder(&config.embedding)?;
    let retriever = Retriever::open(
        &IndexStore::new(&config.layout.embeddings_dir),
        ChunkStore::new(&config.layout.chunks_dir),
        embedder,
    )?;
    Ok(retriever)
}

fn open_engine(config: &PipelineConfig) -> Result<QaEngine> {
    let retriever = open_retriever(config)?;
    let generator = HttpGenerator::from_config(&config.generation)?;
    Ok(QaEngine::new(
        retriever,
        Box::new(generator),
        &config.generation,
        AnswerLog::new(&config.layout.logs_dir),
    ))
}
