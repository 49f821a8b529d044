mod config;
mod plan_cmds;
mod serve_cmd;
mod suggestion_cmds;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use careplan_core::PlanLedger;
use careplan_core::generate::GeneratedSuggestion;
use careplan_core::store::{PgStore, PlanStore};
use careplan_db::PlanContent;
use careplan_db::pool;

use config::CareplanConfig;

#[derive(Parser)]
#[command(
    name = "careplan",
    about = "Safety-gated treatment plan suggestions with clinician review"
)]
struct Cli {
    /// Database URL (overrides CAREPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Clinician recorded as the author of plan changes and reviews
    #[arg(long = "as", global = true, env = "CAREPLAN_USER", value_name = "USER")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a careplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/careplan")]
        db_url: String,
        /// Command that answers structured-output requests on stdin/stdout
        #[arg(long)]
        model_command: Option<String>,
        /// Extra argument passed to the model command (repeatable)
        #[arg(long = "model-arg", requires = "model_command")]
        model_args: Vec<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the careplan database (requires config file or env vars)
    DbInit,
    /// Start the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Print a JSON Schema
    Schema {
        /// Print the generator output schema instead of plan content
        #[arg(long)]
        suggestion: bool,
    },
    /// Treatment plan and version history management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Session analysis and suggestion review
    Suggestion {
        #[command(subcommand)]
        command: SuggestionCommands,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a patient's treatment plan with its first version
    Create {
        /// Patient ID
        patient_id: String,
        /// JSON file with the initial plan content (empty plan when omitted)
        #[arg(long)]
        file: Option<String>,
    },
    /// Show the current version of a plan
    Show {
        /// Treatment plan ID
        plan_id: String,
    },
    /// List every version of a plan, oldest first
    History {
        /// Treatment plan ID
        plan_id: String,
    },
    /// Commit a manual edit on top of a known version
    Edit {
        /// Treatment plan ID
        plan_id: String,
        /// JSON file with the full new plan content
        #[arg(long)]
        file: String,
        /// Version the edit was made against
        #[arg(long)]
        base_version: i32,
        /// Why the plan changed
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SuggestionCommands {
    /// Classify and analyse a session, storing a pending suggestion
    Analyze {
        /// Session ID
        session_id: String,
    },
    /// Show a suggestion, or the pending suggestion for a session
    Show {
        /// Suggestion ID
        #[arg(required_unless_present = "session")]
        suggestion_id: Option<String>,
        /// Look up the pending suggestion for this session instead
        #[arg(long, conflicts_with = "suggestion_id")]
        session: Option<String>,
    },
    /// Approve a pending suggestion, committing a new plan version
    Approve {
        /// Suggestion ID
        suggestion_id: String,
    },
    /// Reject a pending suggestion
    Reject {
        /// Suggestion ID
        suggestion_id: String,
        /// Why the suggestion was rejected
        #[arg(long)]
        reason: String,
    },
}

/// Parse a UUID argument, naming the entity in the error.
pub(crate) fn parse_id(raw: &str, entity: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid {entity} ID: {raw}"))
}

/// The acting clinician, required for anything that records authorship.
pub(crate) fn require_actor(actor: Option<&str>) -> anyhow::Result<&str> {
    match actor.map(str::trim) {
        Some(a) if !a.is_empty() => Ok(a),
        _ => anyhow::bail!("this command records who made the change; pass --as <USER> or set CAREPLAN_USER"),
    }
}

/// Read and validate plan content from a JSON file.
pub(crate) fn read_content(path: &str) -> anyhow::Result<PlanContent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan content file: {path}"))?;
    PlanContent::from_json_str(&raw)
        .with_context(|| format!("invalid plan content in {path}"))
}

/// Execute the `careplan init` command: write config file.
fn cmd_init(
    db_url: &str,
    model_command: Option<String>,
    model_args: Vec<String>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let model = model_command.map(|command| config::ModelSection {
        command,
        args: model_args,
    });

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        model,
        workflow: careplan_core::WorkflowConfig::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    match &cfg.model {
        Some(m) => println!("  model.command = {}", m.command),
        None => println!("  model.command = (unset; analysis is unavailable until configured)"),
    }
    println!();
    println!("Next: run `careplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `careplan db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CareplanConfig::resolve(cli_db_url)?;

    println!("Initializing careplan database...");

    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database.");
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("careplan db-init complete.");
    Ok(())
}

fn cmd_schema(suggestion: bool) -> anyhow::Result<()> {
    let schema = if suggestion {
        GeneratedSuggestion::json_schema()
    } else {
        PlanContent::json_schema()
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let actor = cli.actor.as_deref();

    match cli.command {
        Commands::Init {
            db_url,
            model_command,
            model_args,
            force,
        } => {
            cmd_init(&db_url, model_command, model_args, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Schema { suggestion } => {
            cmd_schema(suggestion)?;
        }
        Commands::Serve { bind, port } => {
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            if resolved.model.is_none() {
                tracing::warn!("no model provider configured; every analysis will be blocked");
            }
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let store: Arc<dyn PlanStore> = Arc::new(PgStore::new(db_pool.clone()));
            let workflow = resolved.build_workflow(store.clone());
            let ledger = PlanLedger::new(store, resolved.workflow.max_commit_retries);
            let result =
                serve_cmd::run_serve(serve_cmd::AppState::new(workflow, ledger), &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan { command } => {
            if let PlanCommands::Edit { .. } = &command {
                require_actor(actor)?;
            }
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let store: Arc<dyn PlanStore> = Arc::new(PgStore::new(db_pool.clone()));
            let ledger = PlanLedger::new(store, resolved.workflow.max_commit_retries);
            let result = plan_cmds::run_plan_command(command, &ledger, actor).await;
            db_pool.close().await;
            result?;
        }
        Commands::Suggestion { command } => {
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            suggestion_cmds::preflight(&command, &resolved, actor)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let store: Arc<dyn PlanStore> = Arc::new(PgStore::new(db_pool.clone()));
            let result =
                suggestion_cmds::run_suggestion_command(command, &resolved, store, actor).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
