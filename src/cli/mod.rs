//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sheaf",
    version,
    about = "Document ingestion and hybrid search for datasheets and technical documents",
    long_about = "Sheaf ingests PDF datasheets, Markdown, and plain text into a dual search \
                  index (dense vectors + BM25 keywords), detects what actually changed between \
                  ingests, and keeps both indexes consistent through a durable job queue with \
                  crash recovery."
)]
pub struct Cli {
    /// Config file path (defaults to ~/.config/sheaf/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root directory for all stores, overriding configured paths
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a document (no-op if nothing changed)
    Add {
        /// Local file path to ingest
        source: String,

        /// Extraction mode: datasheet, generic, markdown, or auto
        #[arg(short, long, default_value = "auto")]
        mode: String,

        /// Extraction prompt for LLM-backed extractors
        #[arg(long, default_value = "")]
        prompt: String,

        /// Append generated keywords to chunks before indexing
        #[arg(long)]
        augment_keywords: bool,

        /// Reprocess even if the content is unchanged
        #[arg(short, long)]
        force: bool,

        /// Only enqueue; do not run workers
        #[arg(long)]
        enqueue_only: bool,
    },

    /// Re-ingest a document with change detection (alias of add)
    Update {
        source: String,

        #[arg(short, long, default_value = "auto")]
        mode: String,

        #[arg(long, default_value = "")]
        prompt: String,

        #[arg(long)]
        augment_keywords: bool,

        #[arg(short, long)]
        force: bool,

        #[arg(long)]
        enqueue_only: bool,
    },

    /// Remove a document from both indexes and the registry
    Remove {
        /// Source path, or a document id with --by-id
        target: String,

        /// Treat the target as a document id instead of a source
        #[arg(long)]
        by_id: bool,

        #[arg(long)]
        enqueue_only: bool,
    },

    /// Search the indexes
    Search {
        /// Query text
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Index to search: vector, keyword, or hybrid
        #[arg(short = 't', long = "type", default_value = "hybrid")]
        search_type: String,

        /// Fusion method for hybrid search: rrf, weighted, or adaptive
        #[arg(short, long)]
        method: Option<String>,

        /// Restrict results to these document ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        filter: Vec<String>,

        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Operate the job queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Show engine status
    Status {
        /// Include per-store statistics
        #[arg(short, long)]
        detailed: bool,
    },

    /// Run maintenance tasks
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect indexed documents
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Run workers until the queue drains (or `queue stop` is issued)
    Start {
        /// Worker count override
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep running after the queue drains
        #[arg(long)]
        follow: bool,
    },

    /// Ask a running `queue start` to stop gracefully
    Stop,

    /// Show queue depths
    Status,

    /// Cancel a job by id
    Cancel {
        job_id: String,
    },

    /// Drop finished, failed, and cancelled jobs
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum MaintenanceAction {
    /// Re-align adapters with the registry wherever they disagree
    Repair,

    /// Sweep expired cache entries, compact the intent log, clear old jobs
    Cleanup,

    /// Report per-document consistency between the registry and adapters
    ConsistencyCheck,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print every settable key with its current value
    List,

    /// Print one configuration value
    Get { key: String },

    /// Set a configuration value and save the file
    Set { key: String, value: String },

    /// Rewrite the configuration file with defaults
    Reset,

    /// Create a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DocsAction {
    /// List registry records
    List {
        /// Filter by state: pending, parsing, indexing, ready, failed,
        /// removing
        #[arg(short, long)]
        state: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show one record in full
    Show { doc_id: String },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
