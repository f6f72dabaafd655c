//! BlackKeyX backend entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blackkeyx::api::{create_router, ApiSettings, AppState};
use blackkeyx::config::Config;
use blackkeyx::metrics;
use blackkeyx::migrate::{
    MemorySchemaBackend, MigrationHistory, MigrationReport, Migrator, PgSchemaBackend,
    SchemaBackend, Target,
};
use blackkeyx::services::{ExtractionService, LocalDocumentStore};
use blackkeyx::store::{MemoryStore, PgStore, Store};
use blackkeyx::utils::shutdown_signal;

/// BlackKeyX Autonomous Capital Alignment System backend.
#[derive(Parser, Debug)]
#[command(name = "blackkeyx")]
#[command(about = "Lead intake, admin dashboard and deal memo API")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default).
    Serve {
        /// Interface to bind (overrides HOST).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,

        /// Upgrade the schema to head before serving.
        #[arg(long)]
        migrate: bool,
    },

    /// Manage the database schema.
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[derive(Subcommand, Debug)]
enum MigrateAction {
    /// Apply pending revisions up to TARGET.
    Upgrade {
        /// `head`, or a revision id.
        #[arg(default_value = "head")]
        target: String,
    },

    /// Revert revisions down to TARGET.
    Downgrade {
        /// `base` (empty schema), or a revision id.
        target: String,
    },

    /// Print the recorded revision.
    Current,

    /// Print the revision chain.
    History,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("blackkeyx=debug,tower_http=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| fmt::layer().json()))
        .with((!args.log_json).then(|| fmt::layer()))
        .init();

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::Migrate { action }) => cmd_migrate(action).await,
        Some(Command::Serve {
            host,
            port,
            migrate,
        }) => cmd_serve(host, port, migrate).await,
        None => cmd_serve(None, None, false).await,
    }
}

/// Load and validate configuration, logging failures.
fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }
    Ok(config)
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BLACKKEYX - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    // Check embedded migrations
    print!("Checking migration history... ");
    match MigrationHistory::embedded() {
        Ok(history) => {
            println!("OK");
            println!("  Head revision: {}", history.head().revision);
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Migration history is invalid"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Database: {}", config.redacted_database_url());
    println!(
        "  Store: {}",
        if config.uses_memory_store() { "in-memory" } else { "PostgreSQL" }
    );
    println!("  Pool Size: {}", config.database_max_connections);
    println!("  Listen: {}", config.bind_addr());
    println!("  CORS Origins: {}", config.cors_origins.join(", "));
    println!(
        "  Admin Auth: {}",
        if config.admin_auth_required { "required" } else { "disabled" }
    );
    if config.uses_default_password() {
        println!("  WARNING: ADMIN_PASSWORD is still the default!");
    }
    println!("  Upload Dir: {}", config.upload_dir);
    println!("  Max Upload: {} bytes", config.max_upload_bytes);
    if config.extraction_enabled() {
        println!("  Extraction: {} via {}", config.openai_model, config.openai_base_url);
    } else {
        println!("  Extraction: disabled (fallback only)");
    }
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run a migration command against the configured database.
async fn cmd_migrate(action: MigrateAction) -> anyhow::Result<()> {
    let config = load_config()?;
    let history = MigrationHistory::embedded()?;

    if config.uses_memory_store() {
        warn!("DATABASE_URL selects the in-memory store; nothing is persisted");
        let mut migrator = Migrator::new(history, MemorySchemaBackend::new());
        return run_migrate_action(&mut migrator, action).await;
    }

    info!("Connecting to {}", config.redacted_database_url());
    let backend = PgSchemaBackend::connect(&config.database_url).await?;
    let mut migrator = Migrator::new(history, backend);
    let result = run_migrate_action(&mut migrator, action).await;
    migrator.into_backend().close().await?;
    result
}

async fn run_migrate_action<B: SchemaBackend>(
    migrator: &mut Migrator<B>,
    action: MigrateAction,
) -> anyhow::Result<()> {
    match action {
        MigrateAction::Upgrade { target } => {
            let report = migrator.upgrade(&target.parse::<Target>()?).await?;
            print_report(&report);
        }
        MigrateAction::Downgrade { target } => {
            let report = migrator.downgrade(&target.parse::<Target>()?).await?;
            print_report(&report);
        }
        MigrateAction::Current => {
            let current = migrator.current().await?;
            let head = migrator.history().head().revision;
            match current.as_deref() {
                Some(rev) if rev == head => println!("{rev} (head)"),
                Some(rev) => println!("{rev}"),
                None => println!("base (empty schema)"),
            }
        }
        MigrateAction::History => {
            for status in migrator.history_status().await?.iter().rev() {
                let marker = if status.current {
                    " (current)"
                } else if status.applied {
                    ""
                } else {
                    " (pending)"
                };
                println!(
                    "{} -> {}, {}{}",
                    status.down_revision.unwrap_or("<base>"),
                    status.revision,
                    status.description,
                    marker
                );
            }
        }
    }
    Ok(())
}

fn print_report(report: &MigrationReport) {
    let from = report.from.as_deref().unwrap_or("base");
    let to = report.to.as_deref().unwrap_or("base");
    if report.is_noop() {
        println!("Already at {to}; nothing to {}", report.direction);
    } else {
        println!(
            "{} {} -> {} ({} step(s): {})",
            report.direction,
            from,
            to,
            report.applied.len(),
            report.applied.join(", ")
        );
    }
}

/// Bring a PostgreSQL schema to head, or warn when it is behind.
async fn prepare_schema(config: &Config, migrate: bool) -> anyhow::Result<()> {
    let history = MigrationHistory::embedded()?;
    let backend = PgSchemaBackend::connect(&config.database_url).await?;
    let mut migrator = Migrator::new(history, backend);

    let result = if migrate {
        migrator.upgrade(&Target::Head).await.map(|report| {
            if report.is_noop() {
                info!("Schema already at head");
            } else {
                info!("Schema upgraded to {}", report.to.as_deref().unwrap_or("base"));
            }
        })
    } else {
        migrator.current().await.map(|current| {
            let head = migrator.history().head().revision;
            if current.as_deref() != Some(head) {
                warn!(
                    "Schema is at {} but head is {}; run `blackkeyx migrate upgrade`",
                    current.as_deref().unwrap_or("base"),
                    head
                );
            }
        })
    };

    migrator.into_backend().close().await?;
    Ok(result?)
}

/// Start the HTTP server.
async fn cmd_serve(host: Option<String>, port: Option<u16>, migrate: bool) -> anyhow::Result<()> {
    // Load configuration
    info!("Loading configuration...");
    let mut config = load_config()?;

    // Override with CLI args if provided
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    info!("Configuration loaded successfully");
    info!("Database: {}", config.redacted_database_url());
    if config.uses_default_password() {
        warn!("ADMIN_PASSWORD is the default; set it before exposing the dashboard");
    }
    if !config.admin_auth_required {
        warn!("Admin authentication is disabled");
    }

    // Initialize metrics
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    metrics::init_metrics();

    // Persistence
    let store: Arc<dyn Store> = if config.uses_memory_store() {
        info!("Using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        prepare_schema(&config, migrate).await?;
        Arc::new(PgStore::connect(&config).await?)
    };

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let documents = Arc::new(LocalDocumentStore::new(&config.upload_dir));

    let extraction = ExtractionService::from_config(&config)?;
    if extraction.is_enabled() {
        info!("Document extraction via {}", config.openai_model);
    } else {
        warn!("OPENAI_API_KEY not set; extraction returns placeholders");
    }

    // Create app state
    let app_state = AppState::new(
        store,
        documents,
        extraction,
        ApiSettings::from_config(&config),
    )
    .with_metrics(prometheus.clone());

    // Periodic housekeeping
    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            prometheus.run_upkeep();
            let purged = sessions.purge_expired();
            if purged > 0 {
                info!("Expired {} admin session(s)", purged);
            }
        }
    });

    // Start HTTP server
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    let router = create_router(app_state.clone());
    app_state.set_ready(true);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}
