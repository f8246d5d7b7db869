use sheaf::cli::{Cli, Commands, ConfigAction, DocsAction, MaintenanceAction, QueueAction};
use sheaf::config::Config;
use sheaf::embed::{FastEmbedVectorizer, NoopKeywordGenerator, Vectorizer};
use sheaf::error::{ErrorKind, Result, SheafError};
use sheaf::extract::{ContentExtractor, ExtractMode, ProcessingOptions, TextExtractor};
use sheaf::index::{DocFilter, IndexAdapter};
use sheaf::manager::IndexManager;
use sheaf::queue::worker::WorkerPool;
use sheaf::queue::{JobKind, JobPayload, JobPriority, JobState};
use sheaf::registry::{DocumentState, ListFilter, Paging};
use sheaf::search::{HybridSearcher, SearchMethod, SearchQuery, SearchType};
use sheaf::storage::StorageContext;
use std::path::PathBuf;
use std::sync::Arc;

// CLI exit codes: 0 success, 2 invalid usage, 3 partial success (some
// jobs failed), 4 consistency repair required, 5 unrecoverable
const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_PARTIAL: i32 = 3;
const EXIT_REPAIR_NEEDED: i32 = 4;
const EXIT_FATAL: i32 = 5;

fn main() {
    init_logging();

    let cli = Cli::parse_args();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            match e.kind() {
                ErrorKind::Validation => EXIT_USAGE,
                ErrorKind::Consistency => EXIT_REPAIR_NEEDED,
                _ => EXIT_FATAL,
            }
        }
    };
    std::process::exit(code);
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_env("SHEAF_LOG").unwrap_or_else(|_| EnvFilter::new("sheaf=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.clone(), cli.data_dir.clone())?;

    match cli.command {
        Commands::Add {
            source,
            mode,
            prompt,
            augment_keywords,
            force,
            enqueue_only,
        }
        | Commands::Update {
            source,
            mode,
            prompt,
            augment_keywords,
            force,
            enqueue_only,
        } => cmd_ingest(
            &config,
            source,
            mode,
            prompt,
            augment_keywords,
            force,
            enqueue_only,
        ),
        Commands::Remove {
            target,
            by_id,
            enqueue_only,
        } => cmd_remove(&config, target, by_id, enqueue_only),
        Commands::Search {
            query,
            top_k,
            search_type,
            method,
            filter,
            json,
        } => cmd_search(&config, query, top_k, search_type, method, filter, json),
        Commands::Queue { action } => cmd_queue(&config, action),
        Commands::Status { detailed } => cmd_status(&config, detailed),
        Commands::Maintenance { action } => cmd_maintenance(&config, action),
        Commands::Config { action } => cmd_config(cli.config, action),
        Commands::Docs { action } => cmd_docs(&config, action),
    }
}

fn load_config(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let mut config = if path.exists() {
        Config::load(&path)?
    } else {
        tracing::debug!("No config file at {}; using defaults", path.display());
        Config::default()
    };

    if let Some(root) = data_dir {
        config.paths = sheaf::config::PathsConfig::under_root(&root);
    }

    Ok(config)
}

/// Load the embedding model once; it is shared between the manager and
/// the searcher.
fn build_vectorizer(config: &Config) -> Result<Arc<dyn Vectorizer>> {
    let vectorizer: Arc<dyn Vectorizer> = Arc::new(FastEmbedVectorizer::with_default_model()?);
    if vectorizer.dimensions() != config.vector.dimensions {
        return Err(SheafError::Validation(format!(
            "Configured vector.dimensions = {} but the embedding model produces {}",
            config.vector.dimensions,
            vectorizer.dimensions()
        )));
    }
    Ok(vectorizer)
}

/// Build the capability set and manager over an opened storage context
fn build_manager(
    ctx: &StorageContext,
    config: &Config,
    vectorizer: Arc<dyn Vectorizer>,
) -> Arc<IndexManager> {
    let extractor: Arc<dyn ContentExtractor> = Arc::new(TextExtractor::new());

    Arc::new(IndexManager::new(
        ctx.registry.clone(),
        ctx.fingerprints.clone(),
        ctx.cache.clone(),
        ctx.vector.clone(),
        ctx.keyword.clone(),
        ctx.intents.clone(),
        extractor,
        vectorizer,
        Some(Arc::new(NoopKeywordGenerator)),
        config.clone(),
    ))
}

fn build_searcher(
    ctx: &StorageContext,
    config: &Config,
    vectorizer: Arc<dyn Vectorizer>,
) -> Arc<HybridSearcher> {
    Arc::new(HybridSearcher::new(
        ctx.vector.clone(),
        ctx.keyword.clone(),
        vectorizer,
        config.hybrid.clone(),
    ))
}

fn parse_mode(mode: &str) -> Result<ExtractMode> {
    mode.parse().map_err(SheafError::Validation)
}

#[allow(clippy::too_many_arguments)]
fn cmd_ingest(
    config: &Config,
    source: String,
    mode: String,
    prompt: String,
    augment_keywords: bool,
    force: bool,
    enqueue_only: bool,
) -> Result<i32> {
    let mode = parse_mode(&mode)?;
    let mut options = ProcessingOptions::new(
        mode,
        config.chunking.size,
        config.chunking.overlap,
    );
    options.prompt = prompt;
    options.augment_keywords = augment_keywords;

    let handle = sheaf::source::SourceHandle::parse(&source);
    let payload = JobPayload::Ingest {
        source: handle.normalized(),
        options,
        force,
    };

    let ctx = StorageContext::open(config)?;
    let kind = if force { JobKind::Update } else { JobKind::Add };
    let job_id = ctx.queue.enqueue(kind, &payload, JobPriority::Normal)?;
    println!("✓ Enqueued job {}", &job_id[..8]);

    if enqueue_only {
        return Ok(EXIT_OK);
    }

    drain_queue(config, &ctx, Some(&job_id))
}

fn cmd_remove(
    config: &Config,
    target: String,
    by_id: bool,
    enqueue_only: bool,
) -> Result<i32> {
    let payload = if by_id {
        JobPayload::Remove {
            source: None,
            doc_id: Some(target),
        }
    } else {
        let handle = sheaf::source::SourceHandle::parse(&target);
        JobPayload::Remove {
            source: Some(handle.normalized()),
            doc_id: None,
        }
    };

    let ctx = StorageContext::open(config)?;
    let job_id = ctx
        .queue
        .enqueue(JobKind::Remove, &payload, JobPriority::High)?;
    println!("✓ Enqueued remove job {}", &job_id[..8]);

    if enqueue_only {
        return Ok(EXIT_OK);
    }

    drain_queue(config, &ctx, Some(&job_id))
}

/// Run the worker pool until the queue drains, then report the outcome of
/// the job we care about (or the whole run).
fn drain_queue(config: &Config, ctx: &StorageContext, watch_job: Option<&str>) -> Result<i32> {
    let vectorizer = build_vectorizer(config)?;
    let manager = build_manager(ctx, config, vectorizer.clone());
    let searcher = build_searcher(ctx, config, vectorizer);

    // Reconcile interrupted work before starting workers
    let recovered = manager.recover()?;
    if recovered > 0 {
        println!("✓ Recovered {} interrupted operations", recovered);
    }
    ctx.queue.reset_running()?;

    let failed_before = ctx.queue.stats()?.count(JobState::Failed);

    let pool = WorkerPool::start(
        ctx.queue.clone(),
        manager,
        searcher,
        config.workers.count,
        config.workers.max_attempts,
    );
    pool.wait_until_drained()?;
    pool.shutdown();

    if let Some(job_id) = watch_job {
        let job = ctx
            .queue
            .get(job_id)?
            .ok_or_else(|| SheafError::Validation(format!("Job vanished: {}", job_id)))?;
        match job.state {
            JobState::Succeeded => {
                if let Some(result) = &job.result {
                    println!("✓ {}", result);
                }
                Ok(EXIT_OK)
            }
            JobState::Cancelled => {
                println!("Job was cancelled");
                Ok(EXIT_OK)
            }
            _ => {
                eprintln!(
                    "Job failed after {} attempts: {}",
                    job.attempts,
                    job.last_error.as_deref().unwrap_or("unknown error")
                );
                Ok(EXIT_PARTIAL)
            }
        }
    } else {
        let failed_after = ctx.queue.stats()?.count(JobState::Failed);
        if failed_after > failed_before {
            Ok(EXIT_PARTIAL)
        } else {
            Ok(EXIT_OK)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    config: &Config,
    query: String,
    top_k: usize,
    search_type: String,
    method: Option<String>,
    filter: Vec<String>,
    json: bool,
) -> Result<i32> {
    let search_type: SearchType = search_type.parse().map_err(SheafError::Validation)?;
    let method: Option<SearchMethod> = match method {
        Some(m) => Some(m.parse().map_err(SheafError::Validation)?),
        None => None,
    };

    let ctx = StorageContext::open(config)?;
    let searcher = build_searcher(&ctx, config, build_vectorizer(config)?);

    let search_query = SearchQuery {
        text: query,
        top_k,
        search_type,
        method,
        filter: if filter.is_empty() {
            None
        } else {
            Some(DocFilter::new(filter))
        },
    };

    let hits = searcher.search(&search_query)?;

    if json {
        let rows: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "chunk_id": h.chunk.to_string(),
                    "doc_id": h.chunk.doc_id,
                    "score": h.score,
                    "source": h.payload.source,
                    "text": h.text,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
    } else if hits.is_empty() {
        println!("No results");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            let preview: String = hit.text.chars().take(160).collect();
            println!(
                "{:>2}. [{:.4}] {} ({})",
                i + 1,
                hit.score,
                preview.replace('\n', " "),
                hit.chunk
            );
        }
    }

    Ok(EXIT_OK)
}

fn stop_file(config: &Config) -> PathBuf {
    config.paths.queue.join("queue.stop")
}

fn cmd_queue(config: &Config, action: QueueAction) -> Result<i32> {
    match action {
        QueueAction::Start { workers, follow } => {
            let ctx = StorageContext::open(config)?;
            let vectorizer = build_vectorizer(config)?;
            let manager = build_manager(&ctx, config, vectorizer.clone());
            let searcher = build_searcher(&ctx, config, vectorizer);

            let stop = stop_file(config);
            let _ = std::fs::remove_file(&stop);

            let recovered = manager.recover()?;
            if recovered > 0 {
                println!("✓ Recovered {} interrupted operations", recovered);
            }
            ctx.queue.reset_running()?;

            let failed_before = ctx.queue.stats()?.count(JobState::Failed);
            let worker_count = workers.unwrap_or(config.workers.count);
            let pool = WorkerPool::start(
                ctx.queue.clone(),
                manager,
                searcher,
                worker_count,
                config.workers.max_attempts,
            );
            println!("✓ Queue running with {} workers", worker_count);

            loop {
                if stop.exists() {
                    println!("Stop requested");
                    break;
                }
                if !follow && !ctx.queue.has_open_jobs()? {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            pool.shutdown();
            let _ = std::fs::remove_file(&stop);

            let failed_after = ctx.queue.stats()?.count(JobState::Failed);
            if failed_after > failed_before {
                println!("⚠ Some jobs failed; see `sheaf queue status`");
                Ok(EXIT_PARTIAL)
            } else {
                println!("✓ Queue drained");
                Ok(EXIT_OK)
            }
        }
        QueueAction::Stop => {
            let stop = stop_file(config);
            if let Some(parent) = stop.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SheafError::Io {
                    source: e,
                    context: "Failed to create queue directory".to_string(),
                })?;
            }
            std::fs::write(&stop, b"stop").map_err(|e| SheafError::Io {
                source: e,
                context: "Failed to write stop file".to_string(),
            })?;
            println!("✓ Stop requested; a running `sheaf queue start` will exit");
            Ok(EXIT_OK)
        }
        QueueAction::Status => {
            let ctx = StorageContext::open(config)?;
            let stats = ctx.queue.stats()?;
            println!("Queue status");
            println!("============");
            for state in ["pending", "running", "succeeded", "failed", "cancelled"] {
                let count = stats.by_state.get(state).copied().unwrap_or(0);
                println!("  {:<10} {}", state, count);
            }
            Ok(EXIT_OK)
        }
        QueueAction::Cancel { job_id } => {
            let ctx = StorageContext::open(config)?;
            let state = ctx.queue.cancel(&job_id)?;
            match state {
                JobState::Cancelled => println!("✓ Job cancelled"),
                JobState::Running => {
                    println!("Job is running; it will stop at the next step boundary")
                }
                other => println!("Job is {}", other.as_str()),
            }
            Ok(EXIT_OK)
        }
        QueueAction::Clear => {
            let ctx = StorageContext::open(config)?;
            let removed = ctx.queue.clear_terminal()?;
            println!("✓ Cleared {} finished jobs", removed);
            Ok(EXIT_OK)
        }
    }
}

fn cmd_status(config: &Config, detailed: bool) -> Result<i32> {
    let ctx = StorageContext::open(config)?;

    println!("Sheaf status");
    println!("============");

    let registry_stats = ctx.registry.stats()?;
    println!("\nDocuments: {} total", registry_stats.total);
    let mut states: Vec<_> = registry_stats.by_state.iter().collect();
    states.sort();
    for (state, count) in states {
        println!("  {:<10} {}", state, count);
    }

    let queue_stats = ctx.queue.stats()?;
    let open = queue_stats.count(JobState::Pending) + queue_stats.count(JobState::Running);
    println!("\nQueue: {} open jobs", open);

    if detailed {
        for state in ["pending", "running", "succeeded", "failed", "cancelled"] {
            let count = queue_stats.by_state.get(state).copied().unwrap_or(0);
            println!("  {:<10} {}", state, count);
        }

        let counters = ctx.cache.counters();
        println!(
            "\nCache: {} entries ({} hits / {} misses this session)",
            ctx.cache.entry_count()?,
            counters.hits,
            counters.misses
        );

        let fp_stats = ctx.fingerprints.stats()?;
        println!(
            "Fingerprints: {} sources ({} with documents)",
            fp_stats.total_sources, fp_stats.with_doc_id
        );

        println!(
            "Index chunks: {} vector / {} keyword",
            ctx.vector.count(None)?,
            ctx.keyword.count(None)?
        );

        let pending_intents = ctx.intents.in_progress()?.len();
        println!("In-flight intents: {}", pending_intents);
    }

    Ok(EXIT_OK)
}

fn cmd_maintenance(config: &Config, action: MaintenanceAction) -> Result<i32> {
    let ctx = StorageContext::open(config)?;

    match action {
        MaintenanceAction::Repair => {
            let vectorizer = build_vectorizer(config)?;
            let manager = build_manager(&ctx, config, vectorizer);
            let summary = manager.repair()?;
            println!(
                "✓ Repair examined {} documents, repaired {}",
                summary.examined, summary.repaired
            );
            for (doc_id, error) in &summary.failed {
                eprintln!("  ✗ {}: {}", doc_id, error);
            }
            let report = manager.verify()?;
            if report.is_consistent() {
                Ok(EXIT_OK)
            } else {
                eprintln!("⚠ Inconsistencies remain");
                Ok(EXIT_REPAIR_NEEDED)
            }
        }
        MaintenanceAction::Cleanup => {
            let swept = ctx.cache.sweep()?;
            let compacted = ctx.intents.compact(7 * 24 * 3600)?;
            let cleared = ctx.queue.clear_terminal()?;
            let horizon = chrono::Utc::now().timestamp() - 90 * 24 * 3600;
            let fingerprints = ctx.fingerprints.sweep(horizon)?;
            println!(
                "✓ Cleanup: {} cache entries swept, {} intents compacted, {} jobs cleared, {} fingerprints dropped",
                swept, compacted, cleared, fingerprints
            );
            Ok(EXIT_OK)
        }
        MaintenanceAction::ConsistencyCheck => {
            // Consistency checks never need the embedding model
            let vector = sheaf::registry::AdapterReport {
                doc_counts: ctx.vector.doc_counts()?,
            };
            let keyword = sheaf::registry::AdapterReport {
                doc_counts: ctx.keyword.doc_counts()?,
            };
            let report = ctx.registry.verify_consistency(&vector, &keyword)?;

            if report.is_consistent() {
                println!("✓ All {} documents consistent", report.entries.len());
                Ok(EXIT_OK)
            } else {
                println!("Inconsistencies found:");
                for entry in report.problems() {
                    println!("  {} -> {:?}", entry.doc_id, entry.status);
                }
                Ok(EXIT_REPAIR_NEEDED)
            }
        }
    }
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<i32> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match action {
        ConfigAction::List => {
            let config = if path.exists() {
                Config::load(&path)?
            } else {
                Config::default()
            };
            for (key, value) in config.list_values() {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Get { key } => {
            let config = if path.exists() {
                Config::load(&path)?
            } else {
                Config::default()
            };
            println!("{}", config.get_value(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = if path.exists() {
                Config::load(&path)?
            } else {
                Config::default()
            };
            config.set_value(&key, &value)?;
            config.save(&path)?;
            println!("✓ {} = {}", key, value);
        }
        ConfigAction::Reset => {
            Config::default().save(&path)?;
            println!("✓ Configuration reset to defaults at {}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(EXIT_OK);
            }
            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(EXIT_OK)
}

fn cmd_docs(config: &Config, action: DocsAction) -> Result<i32> {
    let ctx = StorageContext::open(config)?;

    match action {
        DocsAction::List { state, limit } => {
            let state = match state.as_deref() {
                None => None,
                Some("pending") => Some(DocumentState::Pending),
                Some("parsing") => Some(DocumentState::Parsing),
                Some("indexing") => Some(DocumentState::Indexing),
                Some("ready") => Some(DocumentState::Ready),
                Some("failed") => Some(DocumentState::Failed),
                Some("removing") => Some(DocumentState::Removing),
                Some(other) => {
                    return Err(SheafError::Validation(format!(
                        "Unknown document state: {}",
                        other
                    )))
                }
            };

            let records = ctx.registry.list(
                &ListFilter {
                    state,
                    source: None,
                },
                Paging { limit, offset: 0 },
            )?;

            if records.is_empty() {
                println!("No documents");
            }
            for record in records {
                println!(
                    "{}  {:<9} {:>4} chunks  {}",
                    record.doc_id,
                    record.state.as_str(),
                    record.chunk_ids.len(),
                    record.source
                );
            }
        }
        DocsAction::Show { doc_id } => {
            match ctx.registry.get(&doc_id)? {
                None => {
                    println!("No such document: {}", doc_id);
                    return Ok(EXIT_USAGE);
                }
                Some(record) => {
                    println!("doc_id:          {}", record.doc_id);
                    println!("source:          {}", record.source);
                    println!("state:           {}", record.state.as_str());
                    println!("fingerprint:     {}", record.fingerprint);
                    println!("options_fp:      {}", record.options_fp);
                    println!("chunks:          {}", record.chunk_ids.len());
                    println!("vector_indexed:  {}", record.vector_indexed);
                    println!("keyword_indexed: {}", record.keyword_indexed);
                    println!("pairs:           {}", record.pairs.len());
                    for pair in &record.pairs {
                        println!("  {} / {}", pair.model_name, pair.part_number);
                    }
                    if let Some(error) = &record.last_error {
                        println!("last_error:      {}", error);
                    }
                }
            }
        }
    }

    Ok(EXIT_OK)
}
