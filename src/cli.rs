//! CLI implementation for vecgrep.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::embedding::{CachingProvider, HttpProvider};
use crate::indexer::{IndexProgress, Indexer};
use crate::search::{Mode, OutputFormat, SearchOptions, SearchOrchestrator};
use crate::store::{CollectionParams, Store};

#[derive(Parser)]
#[command(name = "vecgrep")]
#[command(about = "Local-first semantic code search")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index (or re-index) a project
    Index {
        /// Project root; defaults to the current directory
        #[arg(long)]
        project: Option<PathBuf>,
        /// Re-embed every file regardless of hash match
        #[arg(long)]
        force: bool,
    },
    /// Search the index
    Search {
        /// Query text (natural language or literal)
        query: String,
        /// Project root; defaults to the current directory
        #[arg(long)]
        project: Option<PathBuf>,
        /// Retrieval mode: semantic, keyword, hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Max results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        /// Filter by language
        #[arg(short = 'l', long)]
        lang: Option<String>,
        /// Filter by file glob pattern
        #[arg(long)]
        file_pattern: Option<String>,
        /// Filter by directory prefix
        #[arg(long)]
        directory: Option<String>,
        /// Output format: default, compact, json
        #[arg(long, default_value = "default")]
        format: String,
        /// Include explain metadata in the store query
        #[arg(long)]
        explain: bool,
    },
    /// Show index statistics
    Stats {
        /// Project root; defaults to the current directory
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Drop and recreate the collection, discarding every record
    Reset {
        /// Project root; defaults to the current directory
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    run_with(cli)
}

fn run_with(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index { project, force } => cmd_index(project, force),
        Commands::Search {
            query,
            project,
            mode,
            limit,
            lang,
            file_pattern,
            directory,
            format,
            explain,
        } => cmd_search(query, project, mode, limit, lang, file_pattern, directory, format, explain),
        Commands::Stats { project } => cmd_stats(project),
        Commands::Reset { project } => cmd_reset(project),
    }
}

fn find_project_root(given: Option<PathBuf>) -> PathBuf {
    if let Some(p) = given {
        return p;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn data_dir(project_root: &Path) -> PathBuf {
    project_root.join(".vecgrep")
}

fn open_store(project_root: &Path, config: &Config) -> Result<Store> {
    let dir = data_dir(project_root);
    std::fs::create_dir_all(&dir).context("failed to create .vecgrep data directory")?;
    let params = CollectionParams {
        dimensions: config.dimensions,
        distance_metric: config.distance_metric,
        hnsw_m: config.hnsw_m,
        hnsw_ef_construction: config.hnsw_ef_construction,
        hnsw_ef_search: config.hnsw_ef_search,
    };
    Store::create_or_open(&dir.join("index.db"), &dir.join("hnsw"), params).context("failed to open index")
}

fn build_provider(config: &Config) -> Result<CachingProvider<HttpProvider>> {
    let endpoint = config
        .provider_endpoint
        .clone()
        .context("no embedding provider endpoint configured; set provider_endpoint in .vecgrep.toml")?;
    let model = config
        .provider_model
        .clone()
        .context("no embedding provider model configured; set provider_model in .vecgrep.toml")?;
    let inner = HttpProvider::new(endpoint, model, config.dimensions, config.provider_max_retries);
    Ok(CachingProvider::new(inner, config.cache_max_entries, Duration::from_secs(config.cache_ttl_secs)))
}

fn cmd_index(project: Option<PathBuf>, force: bool) -> Result<()> {
    let root = find_project_root(project);
    let config = Config::load(&root)?;
    let store = open_store(&root, &config)?;
    let provider = build_provider(&config)?;
    let indexer = Indexer::new(store, provider, config);

    let mut report = |progress: IndexProgress| {
        eprintln!(
            "indexed {}/{} files ({} chunks, {} errors)",
            progress.processed_files, progress.total_files, progress.total_chunks, progress.errors_so_far
        );
    };

    let result = indexer.run(&root, None, force, Some(&mut report))?;

    println!("files processed: {}", result.files_processed);
    println!("files skipped:   {}", result.files_skipped);
    println!("chunks created:  {}", result.chunks_created);
    println!("duration:        {:?}", result.duration);
    if !result.errors.is_empty() {
        println!("errors:");
        for err in &result.errors {
            println!("  {}: {}", err.path.display(), err.message);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    query: String,
    project: Option<PathBuf>,
    mode: String,
    limit: usize,
    lang: Option<String>,
    file_pattern: Option<String>,
    directory: Option<String>,
    format: String,
    explain: bool,
) -> Result<()> {
    let root = find_project_root(project);
    let config = Config::load(&root)?;
    let store = open_store(&root, &config)?;
    let provider = build_provider(&config)?;
    let orchestrator = SearchOrchestrator::new(store, provider);

    let mode = match mode.as_str() {
        "semantic" => Mode::Semantic,
        "keyword" => Mode::Keyword,
        "hybrid" => Mode::Hybrid,
        other => bail!("unknown search mode '{other}'; expected semantic, keyword, or hybrid"),
    };
    let format = match format.as_str() {
        "default" => OutputFormat::Default,
        "compact" => OutputFormat::Compact,
        "json" => OutputFormat::Json,
        other => bail!("unknown output format '{other}'; expected default, compact, or json"),
    };

    let mut options = SearchOptions::new(limit);
    options.mode = Some(mode);
    options.vector_weight = config.hybrid_vector_weight;
    options.over_request_factor = config.search_over_request_factor;
    options.explain = explain;
    options.language = lang;
    options.file_pattern = file_pattern;
    options.directory = directory;

    let results = orchestrator.search(&query, &options)?;
    if results.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Compact => println!(),
            OutputFormat::Default => println!("No results found."),
        }
        return Ok(());
    }
    println!("{}", crate::search::format_results(&results, format));
    Ok(())
}

fn cmd_stats(project: Option<PathBuf>) -> Result<()> {
    let root = find_project_root(project);
    let config = Config::load(&root)?;
    let store = open_store(&root, &config)?;
    let count = store.count()?;
    let params = store.params();

    println!("Index Statistics");
    println!("================");
    println!("Project root:  {}", root.display());
    println!("Total chunks:  {count}");
    println!("Dimensions:    {}", params.dimensions);
    println!("Distance:      {:?}", params.distance_metric);
    println!("HNSW M:        {}", params.hnsw_m);
    println!("ef_construct:  {}", params.hnsw_ef_construction);
    println!("ef_search:     {}", params.hnsw_ef_search);
    Ok(())
}

fn cmd_reset(project: Option<PathBuf>) -> Result<()> {
    let root = find_project_root(project);
    let config = Config::load(&root)?;
    let store = open_store(&root, &config)?;
    let removed = store.delete_where(None)?;
    println!("Removed {removed} records. Collection dropped and recreated.");
    Ok(())
}
