//! # folio CLI
//!
//! Command-line interface for folio, a semantic retrieval service over books.
//!
//! Books are ingested offline from PDFs into a chunk store; the `serve`
//! command exposes vector search with optional reranking and context
//! expansion over HTTP.
//!
//! ## Commands
//!
//! - `folio ingest <PDF> --book-id <ID> --title <T> --author <A>` - Ingest a book
//! - `folio serve` - Serve `POST /search` and `GET /health`
//! - `folio query <QUERY>` - Run one search from the command line
//! - `folio status` - Show book and chunk counts
//! - `folio reset` - Drop the index and delete every book and chunk
//! - `folio config show|init|path` - Inspect configuration
//!
//! ## Examples
//!
//! ```bash
//! # Ingest a manual
//! folio ingest manual.pdf --book-id crane-2019 --title "Crane Manual" --author "ACME"
//!
//! # Search with two sentences of context on each side
//! folio query "钢丝绳更换标准" --window 2
//!
//! # Get JSON output
//! folio query "brake inspection" --no-deep --format json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use folio_core::{Book, SearchRequest};
use folio_embed::EmbedderPool;
use folio_ingest::Ingestor;
use folio_query::RetrievalEngine;
use folio_server::{SearchBody, serve};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod components;
mod config;

use components::{build_context, build_embedder, ensure_dimensions, open_store};
use config::Config;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Semantic retrieval over books")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/folio/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the search API
    Serve {
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ingest a PDF as a new book
    Ingest {
        /// PDF file
        pdf: PathBuf,

        /// Unique book identifier
        #[arg(long)]
        book_id: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        author: String,
    },

    /// Run one search
    Query {
        /// Query string
        query: String,

        /// Restrict to one book
        #[arg(short, long)]
        book_id: Option<String>,

        /// Number of results (default: search.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Rerank candidates with the configured reranker
        #[arg(long)]
        rerank: bool,

        /// Return ranked chunks instead of expanded context
        #[arg(long)]
        no_deep: bool,

        /// Sentences of context on each side of a hit
        #[arg(short, long, default_value = "1")]
        window: u32,

        /// Collapse expanded context into one text
        #[arg(long)]
        flatten: bool,
    },

    /// Drop the vector index and delete all books and chunks
    Reset,

    /// Show store statistics
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print sample configuration file
    Init,
    /// Show config file path
    Path,
}

/// Output structure for query results.
#[derive(Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    results: SearchBody,
}

/// Output structure for status.
#[derive(Serialize)]
struct StatusOutput {
    store: String,
    dimension: usize,
    total_books: u64,
    total_chunks: u64,
    index_ready: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.clone()).context("Failed to load config")?;

    // Setup logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Serve { host, port } => {
            let mut server = config.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            let addr = server.addr()?;

            let ctx = build_context(&config).await?;
            let engine = Arc::new(RetrievalEngine::new(ctx));

            serve(engine, addr, shutdown_signal())
                .await
                .context("Server failed")?;
        }

        Commands::Ingest {
            pdf,
            book_id,
            title,
            author,
        } => {
            if !pdf.exists() {
                anyhow::bail!("File does not exist: {}", pdf.display());
            }

            let store = open_store(&config).await?;
            let embedder = build_embedder(&config).await?;
            ensure_dimensions(store.as_ref(), embedder.as_ref())?;

            let pool = Arc::new(EmbedderPool::new(
                embedder,
                config.embedding.max_concurrent,
            ));
            let ingestor = Ingestor::new(store, pool)
                .with_embedding_config(config.embedding.embedding_config());

            let book = Book {
                book_id,
                title,
                author,
            };
            let report = ingestor
                .ingest_pdf(&pdf, book)
                .await
                .with_context(|| format!("Failed to ingest {}", pdf.display()))?;

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Text => {
                    println!("Ingested {} from {}", report.book_id, pdf.display());
                    println!("  Pages:     {}", report.pages);
                    println!("  Sentences: {}", report.sentences);
                    println!("  Chunks:    {}", report.chunks);
                }
            }
        }

        Commands::Query {
            query,
            book_id,
            top_k,
            rerank,
            no_deep,
            window,
            flatten,
        } => {
            let ctx = build_context(&config).await?;
            let engine = RetrievalEngine::new(ctx);

            let request = SearchRequest {
                query: query.clone(),
                book_id,
                top_k: top_k.unwrap_or(config.search.default_top_k),
                use_rerank: rerank,
                deep_search: !no_deep,
                expand_window: window,
                flatten,
            };
            let response = engine
                .search(&request)
                .await
                .context("Search failed")?;
            let results = SearchBody::from(response);

            match cli.format {
                OutputFormat::Json => {
                    let output = QueryOutput {
                        query: &query,
                        results,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => print_results(&query, &results),
            }
        }

        Commands::Reset => {
            let store = open_store(&config).await?;
            let before = store.stats().await?;
            store.reset().await.context("Failed to reset store")?;
            info!(
                "Reset store: removed {} books, {} chunks",
                before.total_books, before.total_chunks
            );

            match cli.format {
                OutputFormat::Json => {
                    let output = serde_json::json!({
                        "removed_books": before.total_books,
                        "removed_chunks": before.total_chunks,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!(
                        "Removed {} books and {} chunks.",
                        before.total_books, before.total_chunks
                    );
                }
            }
        }

        Commands::Status => {
            let store = open_store(&config).await?;
            let stats = store.stats().await?;
            let location = config.store.dir()?;

            match cli.format {
                OutputFormat::Json => {
                    let output = StatusOutput {
                        store: location.to_string_lossy().to_string(),
                        dimension: store.dimension(),
                        total_books: stats.total_books,
                        total_chunks: stats.total_chunks,
                        index_ready: stats.index_ready,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!("Store at {}", location.display());
                    println!("  Books:     {}", stats.total_books);
                    println!("  Chunks:    {}", stats.total_chunks);
                    println!("  Dimension: {}", store.dimension());
                    println!(
                        "  Index:     {}",
                        if stats.index_ready { "ready" } else { "missing" }
                    );
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&config)
                            .context("Failed to serialize config")?
                    );
                }
                OutputFormat::Text => {
                    println!(
                        "{}",
                        toml::to_string_pretty(&config).context("Failed to serialize config")?
                    );
                }
            },
            ConfigAction::Init => {
                println!("{}", Config::sample_toml());
            }
            ConfigAction::Path => {
                if let Some(path) = cli.config.or_else(Config::config_path) {
                    println!("{}", path.display());
                } else {
                    println!("Could not determine config directory");
                }
            }
        },
    }

    Ok(())
}

fn print_results(query: &str, results: &SearchBody) {
    println!("Query: {query}\n");

    match results {
        SearchBody::Hits(hits) if hits.is_empty() => println!("No results found."),
        SearchBody::Passages(passages) if passages.is_empty() => println!("No results found."),
        SearchBody::Hits(hits) => {
            for (i, hit) in hits.iter().enumerate() {
                let score = match hit.rerank_score {
                    Some(rerank) => {
                        format!("similarity: {:.3}, rerank: {rerank:.3}", hit.similarity)
                    }
                    None => format!("similarity: {:.3}", hit.similarity),
                };
                println!("{}. {} ({score})", i + 1, hit.chunk_id);
                println!(
                    "   Book {} page {}, sentences {}-{}",
                    hit.book_id, hit.page_number, hit.start_pos, hit.end_pos
                );
                println!("   {}", truncate(&hit.text, 100));
                println!();
            }
        }
        SearchBody::Passages(passages) => {
            for (i, passage) in passages.iter().enumerate() {
                println!(
                    "{}. {} page {}, window {}-{} ({} chunks)",
                    i + 1,
                    passage.book_id,
                    passage.page_number,
                    passage.window_start,
                    passage.window_end,
                    passage.merged_chunk_ids.len()
                );
                println!("   {}", passage.text);
                println!();
            }
        }
        SearchBody::Flattened([flat]) => println!("{}", flat.text),
    }
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Truncate a string to at most `max_chars` characters, adding ellipsis if needed.
fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ").replace('\r', "");
    if s.chars().count() <= max_chars {
        s
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("钢丝绳必须定期更换", 6), "钢丝绳...");
        assert_eq!(truncate("a\nb\r", 10), "a b");
    }

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::try_parse_from([
            "folio", "query", "钢丝绳", "--book-id", "crane", "-k", "3", "--rerank", "--flatten",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                query,
                book_id,
                top_k,
                rerank,
                no_deep,
                window,
                flatten,
            } => {
                assert_eq!(query, "钢丝绳");
                assert_eq!(book_id.as_deref(), Some("crane"));
                assert_eq!(top_k, Some(3));
                assert!(rerank);
                assert!(!no_deep);
                assert_eq!(window, 1);
                assert!(flatten);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_cli_parses_ingest() {
        let cli = Cli::try_parse_from([
            "folio", "--format", "json", "ingest", "manual.pdf", "--book-id", "m1", "--title",
            "Manual", "--author", "ACME",
        ])
        .unwrap();

        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Ingest { ref book_id, .. } if book_id == "m1"));
    }
}
