use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use codeseek_core::{CodeseekConfig, EmbeddingConfig, OutputFormat, SearchResult};
use codeseek_index::{save, IndexBuilder, OpenAiEmbedder, SemanticSearch};

#[derive(Parser)]
#[command(
    name = "codeseek",
    version,
    about = "Semantic code search over a local source tree",
    long_about = "Codeseek splits a source tree into functions and blocks, embeds them with an\n\
                   OpenAI-compatible embedding model, and answers natural-language queries by\n\
                   cosine similarity.\n\n\
                   Examples:\n  \
                     codeseek init                         Write a default .codeseek.toml\n  \
                     codeseek index --path .               Build the index for a repository\n  \
                     codeseek search 'open a socket'       Query the index\n  \
                     codeseek search 'retry logic' -k 10   Return more results"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .codeseek.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable listing (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build the search index for a source tree
    #[command(long_about = "Build the search index for a source tree.\n\n\
        Walks the tree (respecting .gitignore), extracts code units, embeds them,\n\
        and writes the index atomically. Press Ctrl-C to cancel; the previous index\n\
        is left untouched.\n\n\
        Examples:\n  codeseek index --path .\n  codeseek index --path ../project --output /tmp/project.json")]
    Index {
        /// Source tree to index (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Where to write the index (default: <path>/.codeseek/index.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Search the index with a natural-language query
    #[command(long_about = "Search the index with a natural-language query.\n\n\
        Requires an index built with `codeseek index` and the same embedding model.\n\n\
        Examples:\n  codeseek search 'parse command line flags'\n  codeseek search 'free a linked list' --top-k 3 --format json")]
    Search {
        /// What to look for
        query: String,

        /// Indexed source tree (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Index file to read (default: <path>/.codeseek/index.json)
        #[arg(long)]
        index_file: Option<PathBuf>,

        /// Number of results (default: search.top_k from config, 5)
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },
    /// Create a default .codeseek.toml in the current directory
    Init,
}

const DEFAULT_CONFIG: &str = r#"# Codeseek Configuration

[embedding]
# OpenAI-compatible embeddings endpoint. The key falls back to OPENAI_API_KEY.
# provider = "openai"
# model = "text-embedding-3-small"
# base_url = "https://api.openai.com/v1"
# dimensions = 1536
# max_input_tokens = 8000
# batch_size = 100
# max_concurrent_requests = 2
# max_retries = 3
# retry_base_delay_ms = 1000
# timeout_secs = 30

[index]
# path = ".codeseek/index.json"
# extensions = ["c", "h", "cpp", "hpp", "py", "js", "sh"]
# ignore_patterns = ["vendor/**", "*.min.js"]
# fragment_lines = 20
# max_file_size = 1048576

[search]
# top_k = 5
"#;

fn load_config(path: Option<&Path>) -> Result<CodeseekConfig> {
    let config = match path {
        Some(path) => CodeseekConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".codeseek.toml");
            if default_path.exists() {
                CodeseekConfig::from_file(default_path)?
            } else {
                CodeseekConfig::default()
            }
        }
    };
    Ok(config)
}

fn make_embedder(config: &EmbeddingConfig) -> Result<OpenAiEmbedder> {
    if config.provider != "openai" {
        miette::bail!(miette::miette!(
            help = "Set provider = \"openai\" and point base_url at any OpenAI-compatible server",
            "Unsupported embedding provider '{}'",
            config.provider
        ));
    }
    let api_key = config
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .ok_or_else(|| {
            miette::miette!(
                help = "Set OPENAI_API_KEY or add api_key in your .codeseek.toml under [embedding]",
                "No API key configured for embedding provider '{}'",
                config.provider
            )
        })?;
    Ok(OpenAiEmbedder::with_config(config, &api_key)?)
}

fn progress_bar() -> Result<Option<indicatif::ProgressBar>> {
    if !std::io::stderr().is_terminal() {
        return Ok(None);
    }
    let pb = indicatif::ProgressBar::new(0);
    pb.set_style(
        indicatif::ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} units {msg} ({elapsed})",
        )
        .into_diagnostic()?
        .progress_chars("=> "),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Ok(Some(pb))
}

async fn run_index(
    config: &CodeseekConfig,
    path: &Path,
    output: Option<PathBuf>,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let embedder = Arc::new(make_embedder(&config.embedding)?);
    let index_path = output.unwrap_or_else(|| path.join(&config.index.path));

    let mut builder = IndexBuilder::with_config(embedder, &config.embedding);
    let spinner = progress_bar()?;
    if let Some(pb) = &spinner {
        let pb = pb.clone();
        builder = builder.with_progress(move |done, total, phase| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
            pb.set_message(phase.to_string());
        });
    }

    let cancel = builder.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    eprintln!("Indexing {} ...", path.display());
    let report = builder
        .build_from_root(path, &config.index)
        .await
        .inspect_err(|_e| {
            if let Some(pb) = &spinner {
                pb.finish_with_message("failed");
            }
        })?;
    if let Some(pb) = spinner {
        pb.finish_with_message("done");
    }

    save(&report.index, &index_path)?;

    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "indexPath": index_path.display().to_string(),
                "entries": report.index.len(),
                "unitsTotal": report.units_total,
                "failed": report.failures.len(),
                "vectorDim": report.index.vector_dim(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).into_diagnostic()?
            );
        }
        OutputFormat::Markdown => {
            println!("# Index Summary\n");
            println!("- **Index:** `{}`", index_path.display());
            println!("- **Entries:** {}", report.index.len());
            println!("- **Failed units:** {}", report.failures.len());
        }
        OutputFormat::Text => {
            eprintln!(
                "Indexed {} of {} units ({} failed) into {}",
                report.index.len(),
                report.units_total,
                report.failures.len(),
                index_path.display(),
            );
        }
    }

    if verbose {
        for failure in &report.failures {
            eprintln!(
                "  failed {}:{}-{}: {}",
                failure.source_path, failure.start_line, failure.end_line, failure.message
            );
        }
    }
    Ok(())
}

async fn run_search(
    config: &CodeseekConfig,
    query: &str,
    index_path: &Path,
    top_k: usize,
    format: OutputFormat,
) -> Result<()> {
    if !index_path.exists() {
        miette::bail!(miette::miette!(
            help = "Run `codeseek index` first, or pass --index-file",
            "No index found at {}",
            index_path.display()
        ));
    }

    let embedder = Arc::new(make_embedder(&config.embedding)?);
    let search = SemanticSearch::open(index_path, embedder)?.with_call_timeout(
        std::time::Duration::from_secs(config.embedding.timeout_secs.max(1)),
    );

    let built_with = &search.index().metadata().provider_model_id;
    if *built_with != config.embedding.model {
        eprintln!(
            "warning: index was built with '{built_with}' but the configured model is '{}'",
            config.embedding.model
        );
    }

    let results = search.query(query, top_k).await?;
    print_results(&results, format)
}

fn print_results(results: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(results).into_diagnostic()?
            );
        }
        OutputFormat::Markdown => {
            if results.is_empty() {
                println!("No results found.");
            } else {
                println!("# Search Results\n");
                for r in results {
                    println!(
                        "## {}. `{}` in `{}:{}–{}` (score: {:.4})\n\n```\n{}\n```\n",
                        r.rank, r.name, r.source_path, r.start_line, r.end_line, r.score, r.snippet,
                    );
                }
            }
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No results found.");
            } else {
                for r in results {
                    println!(
                        "{}. {}:{}–{} {} [{}] (score: {:.4})",
                        r.rank, r.source_path, r.start_line, r.end_line, r.name, r.unit_kind, r.score,
                    );
                    // Show a snippet preview (first 3 lines)
                    let preview: String = r
                        .snippet
                        .lines()
                        .take(3)
                        .map(|l| format!("   {l}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    println!("{preview}\n");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    // CODESEEK_LOG overrides the level, e.g. CODESEEK_LOG=debug codeseek index
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CODESEEK_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    if cli.verbose {
        eprintln!("format: {}", cli.format);
        eprintln!(
            "embedding: {} ({} dims, batch {})",
            config.embedding.model, config.embedding.dimensions, config.embedding.batch_size
        );
    }

    match cli.command {
        None => {
            Cli::command().print_help().into_diagnostic()?;
        }
        Some(Command::Index { ref path, output }) => {
            run_index(&config, path, output, cli.format, cli.verbose).await?;
        }
        Some(Command::Search {
            ref query,
            ref path,
            index_file,
            top_k,
        }) => {
            let index_path = index_file.unwrap_or_else(|| path.join(&config.index.path));
            let top_k = top_k.unwrap_or(config.search.top_k);
            run_search(&config, query, &index_path, top_k, cli.format).await?;
        }
        Some(Command::Init) => {
            let path = Path::new(".codeseek.toml");
            if path.exists() {
                miette::bail!(".codeseek.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .codeseek.toml with default configuration");
        }
    }

    Ok(())
}
