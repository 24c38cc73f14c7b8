//! # chat-context CLI (`cctx`)
//!
//! Command-line access to the context pipeline: trigger classification,
//! debounced suggestions, context creation and linking, the embedding job
//! queue, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! cctx --config ./config/cctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cctx init` | Create the SQLite database and tables |
//! | `cctx stats` | Print table counts |
//! | `cctx classify "<text>"` | Classify input by trigger prefix or URL |
//! | `cctx suggest "<text>"` | Ranked suggestions for input text |
//! | `cctx context create\|link\|list\|similar` | Manage contexts |
//! | `cctx jobs queue\|status\|advance\|pending` | Embedding job queue |
//! | `cctx serve` | Start the HTTP server |
//! | `cctx completions <shell>` | Print shell completions |

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_context::config::{self, Config};
use chat_context::pipeline::Pipeline;
use chat_context::similarity::SimilarityOptions;
use chat_context::{migrate, server, stats};
use chat_context_core::models::{ContentType, ContextKind, JobStatus};
use chat_context_core::trigger::classify;

/// chat-context CLI: context suggestions, links, and embedding jobs for a chat client.
#[derive(Parser)]
#[command(name = "cctx", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Show database statistics.
    Stats,

    /// Classify input text by trigger prefix (`@`, `>`, `#`) or URL.
    ///
    /// Does not read the config file.
    Classify { text: String },

    /// Get ranked suggestions for input text.
    Suggest {
        text: String,
        /// Restrict to contexts scoped to this chat (global contexts always match).
        #[arg(long)]
        chat: Option<String>,
        /// Restrict index results to these kinds (repeatable).
        #[arg(long = "kind")]
        kinds: Vec<ContextKind>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage reusable contexts.
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Inspect and drive the embedding job queue.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions { shell: clap_complete::Shell },
}

#[derive(Subcommand)]
enum ContextAction {
    /// Embed content and store it as a new context.
    Create {
        /// Text to embed.
        content: String,
        #[arg(long = "type")]
        kind: ContextKind,
        /// Metadata as a JSON object.
        #[arg(long, default_value = "{}")]
        metadata: String,
        #[arg(long)]
        chat: Option<String>,
    },
    /// Link a context to a message.
    Link {
        context_id: String,
        message_id: String,
        /// Link metadata as a JSON object.
        #[arg(long, default_value = "{}")]
        metadata: String,
    },
    /// List contexts linked to a message.
    List { message_id: String },
    /// Find contexts similar to text.
    Similar {
        text: String,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long = "kind")]
        kinds: Vec<ContextKind>,
        #[arg(long)]
        chat: Option<String>,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// Queue content for background embedding. Prints the job id.
    Queue {
        content_id: String,
        #[arg(long = "type")]
        content_type: ContentType,
    },
    /// Show a job's status.
    Status { job_id: String },
    /// Move a job to a new status.
    Advance {
        job_id: String,
        status: JobStatus,
        #[arg(long)]
        error: Option<String>,
    },
    /// List pending jobs, oldest first.
    Pending {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_logging(level: &str) {
    // RUST_LOG takes precedence over [logging].level
    let default_filter = format!("chat_context={level},chat_context_core={level},tower_http=info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_json_arg(raw: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("invalid JSON '{}': {}", raw, e))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Classify { text } => {
            return print_json(&classify(text));
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "cctx", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Suggest {
            text,
            chat,
            kinds,
            limit,
        } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let mut options = pipeline.suggestion_options();
            options.kinds = kinds;
            options.chat_id = chat;
            if let Some(limit) = limit {
                options.limit = limit;
            }
            match pipeline.suggestions.get_suggestions(&text, &options).await {
                Some(result) => print_json(&result)?,
                None => println!("(superseded)"),
            }
        }
        Commands::Context { action } => run_context(&cfg, action).await?,
        Commands::Jobs { action } => run_jobs(&cfg, action).await?,
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Classify { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

async fn run_context(cfg: &Config, action: ContextAction) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(cfg).await?;

    match action {
        ContextAction::Create {
            content,
            kind,
            metadata,
            chat,
        } => {
            let context = pipeline
                .contexts
                .create_context(&content, kind, parse_json_arg(&metadata)?, chat)
                .await?;
            println!("{}", context.id);
        }
        ContextAction::Link {
            context_id,
            message_id,
            metadata,
        } => {
            let created = pipeline
                .contexts
                .link_context_to_message(&context_id, &message_id, parse_json_arg(&metadata)?)
                .await?;
            if created {
                println!("Linked {} -> {}", context_id, message_id);
            } else {
                println!("Already linked {} -> {}", context_id, message_id);
            }
        }
        ContextAction::List { message_id } => {
            let contexts = pipeline.contexts.get_message_contexts(&message_id).await?;
            if contexts.is_empty() {
                println!("No contexts linked to {}.", message_id);
            }
            for (i, c) in contexts.iter().enumerate() {
                println!("{}. [{}] {}", i + 1, c.kind, c.title);
                if let Some(subtitle) = &c.subtitle {
                    println!("    {}", subtitle);
                }
                println!("    id: {}", c.id);
            }
        }
        ContextAction::Similar {
            text,
            threshold,
            limit,
            kinds,
            chat,
        } => {
            let defaults = SimilarityOptions::default();
            let options = SimilarityOptions {
                threshold: threshold.unwrap_or(defaults.threshold),
                limit: limit.unwrap_or(defaults.limit),
                kinds,
                chat_id: chat,
            };
            let refs = pipeline
                .contexts
                .find_similar_contexts(&text, &options)
                .await?;
            if refs.is_empty() {
                println!("No matches.");
            }
            for (i, r) in refs.iter().enumerate() {
                println!("{}. [{:.2}] {} ({})", i + 1, r.similarity, r.title, r.kind);
                println!("    id: {}", r.id);
            }
        }
    }

    Ok(())
}

async fn run_jobs(cfg: &Config, action: JobsAction) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(cfg).await?;

    match action {
        JobsAction::Queue {
            content_id,
            content_type,
        } => {
            let id = pipeline
                .jobs
                .queue_for_embedding(&content_id, content_type)
                .await?;
            println!("{}", id);
        }
        JobsAction::Status { job_id } => {
            print_json(&pipeline.jobs.check_embedding_status(&job_id).await)?;
        }
        JobsAction::Advance {
            job_id,
            status,
            error,
        } => {
            let job = pipeline
                .jobs
                .advance(&job_id, status, error.as_deref())
                .await?;
            println!("{} -> {}", job.id, job.status);
        }
        JobsAction::Pending { limit } => {
            let jobs = pipeline.jobs.pending_jobs(limit).await?;
            if jobs.is_empty() {
                println!("No pending jobs.");
            }
            for job in jobs {
                println!("{}  {:<8} {}", job.id, job.content_type.as_str(), job.content_id);
            }
        }
    }

    Ok(())
}
