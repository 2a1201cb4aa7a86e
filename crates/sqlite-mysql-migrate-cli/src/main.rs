//! sqlite-mysql-migrate CLI - SQLite to MySQL migration from the terminal.

use clap::{ArgAction, Args, Parser, Subcommand};
use sqlite_mysql_migrate::{
    ConnectionConfig, DuplicateStrategy, EngineConfig, JobRegistry, JobStatus, MigrateError,
    MigrationOptions, MigrationOrchestrator, MigrationRequest, MysqlConnector, SourceStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// How often `migrate` polls the job.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "sqlite-mysql-migrate")]
#[command(about = "Migrate a SQLite database into MySQL")]
#[command(version)]
struct Cli {
    /// Path to YAML engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Also treat Grafana's well-known unique columns as duplicate keys
    #[arg(long)]
    grafana_hints: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConnectionArgs {
    /// MySQL host
    #[arg(long)]
    host: String,

    /// MySQL port
    #[arg(long, default_value = "3306")]
    port: u32,

    /// MySQL user
    #[arg(long)]
    user: String,

    /// MySQL password
    #[arg(long, default_value = "")]
    password: String,

    /// Target database
    #[arg(long)]
    database: String,
}

impl From<ConnectionArgs> for ConnectionConfig {
    fn from(args: ConnectionArgs) -> Self {
        ConnectionConfig {
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
        }
    }
}

#[derive(Args, Clone)]
struct DataArgs {
    /// Create the schema only, without rows
    #[arg(long)]
    no_data: bool,

    /// Drop duplicate rows in flight
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    resolve_duplicates: bool,

    /// Which duplicate survives: remove or keep-first
    #[arg(long, default_value = "remove")]
    duplicate_strategy: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tables, columns and row counts of a SQLite file
    Schema {
        /// SQLite database file
        file: PathBuf,
    },

    /// Print a page of rows from one table
    Preview {
        /// SQLite database file
        file: PathBuf,

        /// Table name
        table: String,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Check that the MySQL target accepts the given credentials
    TestConnection {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Migrate a SQLite file into MySQL
    Migrate {
        /// SQLite database file
        file: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        data: DataArgs,
    },

    /// Write the migration as a standalone SQL script
    Export {
        /// SQLite database file
        file: PathBuf,

        #[command(flatten)]
        data: DataArgs,

        /// Output path [default: migration_<timestamp>.sql]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Resolves source handles as local file paths.
struct LocalFiles;

impl SourceStore for LocalFiles {
    fn resolve(&self, file_id: &str) -> sqlite_mysql_migrate::Result<PathBuf> {
        let path = PathBuf::from(file_id);
        if !path.is_file() {
            return Err(MigrateError::SourceUnreadable(format!(
                "{}: file not found",
                path.display()
            )));
        }
        Ok(path)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = match &cli.config {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => EngineConfig::default(),
    }
    .with_auto_tuning();
    if cli.grafana_hints {
        config.grafana_hints = Some(true);
    }

    let connector = Arc::new(MysqlConnector::from_config(&config));
    let orchestrator = MigrationOrchestrator::new(
        config,
        Arc::new(JobRegistry::new()),
        Arc::new(LocalFiles),
        connector,
    );

    match cli.command {
        Commands::Schema { file } => {
            let schema = orchestrator.schema(&file_id(&file)).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                for table in &schema.tables {
                    println!("{} ({} rows)", table.name, table.record_count);
                    for col in &table.columns {
                        let mut flags = Vec::new();
                        if col.is_primary_key {
                            flags.push("pk");
                        }
                        if !col.nullable {
                            flags.push("not null");
                        }
                        println!("  {} {} {}", col.name, col.declared_type, flags.join(", "));
                    }
                }
            }
        }

        Commands::Preview {
            file,
            table,
            limit,
            offset,
        } => {
            let rows = orchestrator
                .preview(&file_id(&file), &table, limit, offset)
                .await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Commands::TestConnection { connection } => {
            let result = orchestrator.test_connection(&connection.into()).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{}: {}",
                    result.status,
                    result.message.as_deref().unwrap_or_default()
                );
            }
            if !result.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Migrate {
            file,
            connection,
            data,
        } => {
            let request = MigrationRequest {
                sqlite_file_id: file_id(&file),
                connection: connection.into(),
                include_data: !data.no_data,
                resolve_duplicates: data.resolve_duplicates,
                duplicate_strategy: data.duplicate_strategy,
            };
            let cancel = setup_signal_handler();
            return watch_migration(&orchestrator, request, cancel, cli.output_json).await;
        }

        Commands::Export { file, data, output } => {
            let options = MigrationOptions {
                include_data: !data.no_data,
                resolve_duplicates: data.resolve_duplicates,
                duplicate_strategy: DuplicateStrategy::parse(&data.duplicate_strategy)?,
                ..Default::default()
            };
            let export = orchestrator.export(&file_id(&file), options).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&export.file_name));
            std::fs::write(&path, &export.bytes)?;

            if cli.output_json {
                let summary = serde_json::json!({
                    "file": path.display().to_string(),
                    "content_type": export.content_type,
                    "bytes": export.bytes.len(),
                    "tables": export.tables,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Wrote {} ({} bytes)", path.display(), export.bytes.len());
                for table in &export.tables {
                    println!("  {}: {} rows", table.name, table.rows);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn file_id(path: &std::path::Path) -> String {
    path.display().to_string()
}

/// Start a job and poll it until it finishes, printing new log lines.
/// A cancelled `cancel` token cancels the job.
async fn watch_migration(
    orchestrator: &MigrationOrchestrator,
    request: MigrationRequest,
    cancel: CancellationToken,
    output_json: bool,
) -> Result<ExitCode, MigrateError> {
    let started = orchestrator.start_migration(request)?;
    let id = started.migration_id;
    info!("Migration {} started", id);

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut printed = 0usize;
    let mut cancel_sent = false;

    let snapshot = loop {
        tokio::select! {
            _ = cancel.cancelled(), if !cancel_sent => {
                warn!("Cancelling migration {}", id);
                orchestrator.cancel(&id)?;
                cancel_sent = true;
            }
            _ = interval.tick() => {}
        }

        let snapshot = orchestrator.status(&id)?;
        if !output_json {
            for line in &snapshot.logs[printed..] {
                println!("[{:>3}%] {}", snapshot.progress, line);
            }
            printed = snapshot.logs.len();
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
    };

    if output_json {
        let result = serde_json::json!({
            "migration_id": id,
            "status": snapshot.status,
            "progress": snapshot.progress,
            "logs": snapshot.logs,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(match snapshot.status {
        JobStatus::Completed => ExitCode::SUCCESS,
        _ if cancel_sent => ExitCode::from(MigrateError::Cancelled.exit_code()),
        _ => ExitCode::FAILURE,
    })
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so stdout stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Cancelling migration...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Cannot install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling migration...");
            token.cancel();
        }
    });

    cancel_token
}
