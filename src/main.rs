use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use intake_janitor::{
    cleanup::{self, CleanupEngine, DbJobStatusReporter, JobStatusReporter},
    config::JanitorConfig,
    db::{DbPool, TokenCursor},
    models::JobDescriptor,
    observability,
};
use uuid::Uuid;

/// CLI arguments for the intake janitor
#[derive(Parser, Debug)]
#[command(version, about = "Cleanup of expired public intake tokens", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./intake-janitor.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one cleanup job and exit
    ///
    /// Prints the run summary as JSON. On failure the exit code is 1 and the
    /// cursor to resume from is printed on stderr.
    Run {
        /// Job identifier to report status under (defaults to a random UUID)
        #[arg(long)]
        job_id: Option<Uuid>,
        /// Continue after this cursor, as printed by a previous run
        #[arg(long)]
        resume_from: Option<TokenCursor>,
        /// Roll back every page instead of committing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a cleanup job every `cleanup.interval_hours` until interrupted
    Worker,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref());

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    match args.command {
        Command::Run {
            job_id,
            resume_from,
            dry_run,
        } => {
            if dry_run {
                config.cleanup.safety.dry_run = true;
            }
            run_once(config, job_id, resume_from).await;
        }
        Command::Worker => run_worker(config).await,
        Command::Migrate => run_migrate(config).await,
    }
}

fn resolve_config_path(explicit_path: Option<&str>) -> Result<PathBuf, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(path);
    }

    let cwd_config = PathBuf::from("intake-janitor.toml");
    if cwd_config.exists() {
        return Ok(cwd_config);
    }

    Err("No config file given and ./intake-janitor.toml does not exist".into())
}

fn load_config(explicit_path: Option<&str>) -> JanitorConfig {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match JanitorConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

async fn connect(config: &JanitorConfig) -> DbPool {
    if config.database.is_none() {
        eprintln!("Error: Database is not configured.");
        std::process::exit(1);
    }

    let pool = match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = pool.health_check().await {
        tracing::error!(error = %e, "Database health check failed");
        eprintln!("Error: Database health check failed: {}", e);
        std::process::exit(1);
    }

    pool
}

fn init_metrics(config: &JanitorConfig) {
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        eprintln!("Error: Failed to initialize metrics: {}", e);
        std::process::exit(1);
    }
}

async fn run_once(config: JanitorConfig, job_id: Option<Uuid>, resume_from: Option<TokenCursor>) {
    init_metrics(&config);
    let db = connect(&config).await;

    let engine = CleanupEngine::new(db.intake(), config.cleanup.clone());
    let reporter = DbJobStatusReporter::new(db.jobs());
    let mut job = JobDescriptor::now();
    if let Some(id) = job_id {
        job.id = id;
    }

    let result = cleanup::run_job(&engine, &reporter, &job, resume_from).await;
    db.close().await;

    match result {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize run summary: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(cursor) = e.resume_from() {
                eprintln!("Resume with: --resume-from {}", cursor);
            }
            std::process::exit(1);
        }
    }
}

async fn run_worker(config: JanitorConfig) {
    init_metrics(&config);
    let db = connect(&config).await;

    let engine = Arc::new(CleanupEngine::new(db.intake(), config.cleanup.clone()));
    let reporter: Arc<dyn JobStatusReporter> = Arc::new(DbJobStatusReporter::new(db.jobs()));

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = cleanup::start_cleanup_worker(engine, reporter) => {},
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    // An interrupted page rolls back with its transaction
    tracing::info!("Shutdown signal received, stopping cleanup worker");
    db.close().await;
}

async fn run_migrate(config: JanitorConfig) {
    tracing::info!("Running database migrations");
    let db = connect(&config).await;

    match db.run_migrations().await {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
            db.close().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}
