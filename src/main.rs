use anyhow::Context as _;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use ragmill::service::{ContextRequest, DeleteRequest, IngestRequest, QueryRequest};
use ragmill::types::{DocumentId, JobId, JobPriority, JobStatus};
use ragmill::{CollectionSpec, RagService, Settings};

#[derive(Parser)]
#[command(name = "ragmill")]
#[command(about = "Embedded RAG indexing and query engine", version)]
struct Cli {
    /// Settings file (defaults to .ragmill/settings.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration under .ragmill/
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Create a collection
    Create {
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Target chunk size in tokens
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap carried between chunks, in tokens
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Hard cap on chunk size in tokens
        #[arg(long)]
        max_chunk_size: Option<usize>,
    },

    /// List collections
    Collections,

    /// Ingest a file or folder into a collection
    Ingest {
        path: PathBuf,

        #[arg(short, long)]
        collection: String,

        /// Do not recurse into subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Glob patterns for files to include (repeatable)
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Keep watching the path and re-index on changes
        #[arg(long)]
        watch: bool,

        /// Block until the queued job finishes
        #[arg(long)]
        wait: bool,

        /// High-priority job
        #[arg(long)]
        high: bool,
    },

    /// Query a collection
    Query {
        text: String,

        #[arg(short, long)]
        collection: String,

        #[arg(long, default_value_t = 5)]
        top_k: usize,

        #[arg(long, default_value_t = 0.0)]
        min_similarity: f32,
    },

    /// Assemble a token-budgeted context across collections
    Context {
        text: String,

        /// Collection names (repeatable)
        #[arg(short, long = "collection")]
        collections: Vec<String>,

        #[arg(long, default_value_t = 2000)]
        max_tokens: usize,

        /// Keep duplicate chunk content
        #[arg(long)]
        no_dedup: bool,
    },

    /// Delete a document by id or source path
    Delete {
        #[arg(short, long)]
        collection: String,

        #[arg(long)]
        document: Option<i64>,

        #[arg(long)]
        path: Option<PathBuf>,

        /// Confirm the deletion
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show recent jobs, or one job by id
    Jobs {
        id: Option<i64>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show collection statistics
    Stats {
        #[arg(short, long)]
        collection: String,
    },

    /// Watch a folder and keep a collection current until Ctrl-C
    Watch {
        path: PathBuf,

        #[arg(short, long)]
        collection: String,

        #[arg(long = "pattern")]
        patterns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?;

    ragmill::logging::init_with_config(&settings.logging);

    if let Commands::Init { force } = &cli.command {
        let path = Settings::init_config_file(*force)?;
        println!("Created configuration at {}", path.display());
        return Ok(());
    }

    let service = RagService::start(settings)
        .await
        .context("failed to start engine")?;

    let result = run(&cli.command, &service).await;
    service.shutdown().await;
    result
}

async fn run(command: &Commands, service: &RagService) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } => unreachable!("handled before startup"),

        Commands::Create {
            name,
            description,
            chunk_size,
            chunk_overlap,
            max_chunk_size,
        } => {
            let collection = service
                .create_collection(
                    name,
                    CollectionSpec {
                        description: description.clone(),
                        chunk_size: *chunk_size,
                        chunk_overlap: *chunk_overlap,
                        max_chunk_size: *max_chunk_size,
                    },
                )
                .await?;
            println!(
                "Created collection '{}' (id {}, model {}, chunks {}/{} overlap {})",
                collection.name,
                collection.id,
                collection.embedding_model,
                collection.chunk_size,
                collection.max_chunk_size,
                collection.chunk_overlap
            );
        }

        Commands::Collections => {
            let collections = service.list_collections().await?;
            if collections.is_empty() {
                println!("No collections yet. Create one with `ragmill create <name>`.");
            }
            for c in collections {
                println!("{:>4}  {}  (model {})", c.id, c.name, c.embedding_model);
            }
        }

        Commands::Ingest {
            path,
            collection,
            no_recursive,
            patterns,
            watch,
            wait,
            high,
        } => {
            let collection = service.get_collection_by_name(collection).await?;
            let mut request = IngestRequest::new(path.clone(), collection.id);
            request.recursive = !no_recursive;
            request.file_patterns = patterns.clone();
            request.auto_update = *watch;
            request.priority = if *high {
                JobPriority::High
            } else {
                JobPriority::Normal
            };

            let job_id = service.ingest(request).await?;
            println!("Queued job {job_id} for {}", path.display());

            if *wait {
                wait_for_job(service, job_id).await?;
            }
            if *watch {
                println!("Watching {} for changes; Ctrl-C to stop", path.display());
                tokio::signal::ctrl_c().await?;
            }
        }

        Commands::Query {
            text,
            collection,
            top_k,
            min_similarity,
        } => {
            let collection = service.get_collection_by_name(collection).await?;
            let mut request = QueryRequest::new(text.clone(), collection.id);
            request.top_k = *top_k;
            request.min_similarity = *min_similarity;

            let response = service.query(request).await?;
            if response.results.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in response.results.iter().enumerate() {
                let heading = hit
                    .metadata
                    .heading
                    .as_deref()
                    .or(hit.metadata.symbol.as_deref())
                    .unwrap_or("-");
                println!(
                    "{:>2}. [{:.3}] {} ({heading})",
                    rank + 1,
                    hit.similarity,
                    hit.source_path
                );
                println!("    {}", preview(&hit.content, 160));
            }
        }

        Commands::Context {
            text,
            collections,
            max_tokens,
            no_dedup,
        } => {
            let mut ids = Vec::new();
            for name in collections {
                ids.push(service.get_collection_by_name(name).await?.id);
            }

            let mut request = ContextRequest::new(text.clone(), ids);
            request.max_tokens = *max_tokens;
            request.deduplicate = !no_dedup;

            let response = service.get_context(request).await?;
            println!(
                "# context: {} chunks, ~{} tokens\n",
                response.chunks_included, response.token_count
            );
            println!("{}", response.context);
            println!("\n# sources");
            for source in &response.sources {
                println!("  [{:.3}] {}", source.similarity, source.source_path);
            }
        }

        Commands::Delete {
            collection,
            document,
            path,
            yes,
        } => {
            if !yes {
                anyhow::bail!("refusing to delete without --yes");
            }
            let collection = service.get_collection_by_name(collection).await?;
            let outcome = service
                .delete_document(DeleteRequest {
                    collection_id: collection.id,
                    document_id: document.map(DocumentId::new),
                    path: path.clone(),
                })
                .await?;
            println!(
                "Deleted: {} ({} chunks removed)",
                outcome.deleted, outcome.chunks_removed
            );
        }

        Commands::Jobs { id, limit } => match id {
            Some(raw) => {
                let job = service.job_status(JobId::new(*raw)).await?;
                println!(
                    "job {}: {} {} [{}] {:.0}%{}",
                    job.id,
                    job.kind,
                    job.target,
                    job.status,
                    job.progress * 100.0,
                    job.error
                        .as_deref()
                        .map(|e| format!(" error: {e}"))
                        .unwrap_or_default()
                );
            }
            None => {
                for job in service.list_jobs(*limit).await? {
                    println!(
                        "{:>4}  {:<12} {:<10} {:>4.0}%  {}",
                        job.id,
                        job.kind.to_string(),
                        job.status.to_string(),
                        job.progress * 100.0,
                        job.target
                    );
                }
            }
        },

        Commands::Stats { collection } => {
            let collection = service.get_collection_by_name(collection).await?;
            let stats = service.get_collection_stats(collection.id).await?;
            let cache = service.embedding_cache_stats();
            println!("collection '{}' (id {})", collection.name, collection.id);
            println!(
                "  documents: {} ({} indexed, {} failed)",
                stats.document_count, stats.indexed_count, stats.failed_count
            );
            println!("  chunks:    {}", stats.chunk_count);
            println!("  bytes:     {}", stats.total_size_bytes);
            println!(
                "  cache:     {} entries, {} hits / {} misses",
                cache.entries, cache.hits, cache.misses
            );
        }

        Commands::Watch {
            path,
            collection,
            patterns,
        } => {
            let collection = service.get_collection_by_name(collection).await?;

            // Initial sweep, then keep following changes.
            let mut request = IngestRequest::new(path.clone(), collection.id);
            request.file_patterns = patterns.clone();
            request.auto_update = true;
            let job_id = service.ingest(request).await?;
            println!("Initial ingest queued as job {job_id}");
            println!("Watching {}; Ctrl-C to stop", path.display());

            tokio::signal::ctrl_c().await?;
            println!("Stopping");
        }
    }

    Ok(())
}

/// Poll a job until it settles, rendering progress.
async fn wait_for_job(service: &RagService, job_id: JobId) -> anyhow::Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        let job = service.job_status(job_id).await?;
        bar.set_position((job.progress * 100.0) as u64);

        match job.status {
            JobStatus::Completed => {
                bar.finish_with_message("done");
                return Ok(());
            }
            JobStatus::Failed => {
                bar.abandon_with_message("failed");
                anyhow::bail!(
                    "job {job_id} failed: {}",
                    job.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            JobStatus::Queued | JobStatus::Processing => {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }
    }
}

/// First `max_chars` of content on one line, on a UTF-8 boundary.
fn preview(content: &str, max_chars: usize) -> String {
    let single_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let truncated: String = single_line.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}
