//! Schema Crawler - PostgreSQL schema snapshots and change tracking
//!
//! Crawls a schema into immutable snapshots, stores them in SQLite and
//! computes structural diffs between any two of them. Changes can be
//! attributed to database users through a DDL audit log.
//!
//! Runs either as a one-shot CLI or as an HTTP API (`serve`).

mod audit;
mod config;
mod connection;
mod error;
mod introspection;
mod routes;
mod service;
mod snapshot;
mod state;

use crate::config::{Settings, MAX_RETENTION_DAYS};
use crate::routes::create_router;
use crate::snapshot::{ExportFormat, MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
use crate::state::AppState;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "schema-crawler", version, about = "PostgreSQL schema snapshots and diffs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Crawl the schema and store a snapshot
    Crawl(CrawlArgs),
    /// List stored snapshots
    List,
    /// Compare two snapshots
    Diff(DiffArgs),
    /// Compare the two most recent snapshots
    DiffLatest(ReportArgs),
    /// Export a snapshot
    Export(ExportArgs),
    /// Delete old snapshots
    Prune(PruneArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Schema to crawl, overriding CRAWL_SCHEMA
    #[arg(long)]
    schema: Option<String>,
    /// Only crawl these tables (repeatable)
    #[arg(long = "include-table", value_name = "TABLE")]
    include_tables: Vec<String>,
    /// Skip these tables (repeatable)
    #[arg(long = "exclude-table", value_name = "TABLE")]
    exclude_tables: Vec<String>,
    /// Only crawl tables matching a wildcard pattern (repeatable)
    #[arg(long = "include-pattern", value_name = "PATTERN")]
    include_patterns: Vec<String>,
    /// Skip tables matching a wildcard pattern (repeatable)
    #[arg(long = "exclude-pattern", value_name = "PATTERN")]
    exclude_patterns: Vec<String>,
    /// Match table names case-sensitively
    #[arg(long, default_value_t = false)]
    case_sensitive: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Write the Markdown report to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Attribute changes using the DDL audit log
    #[arg(long, default_value_t = false)]
    attribute: bool,
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Older snapshot id
    from: i64,
    /// Newer snapshot id
    to: i64,
    #[command(flatten)]
    report: ReportArgs,
}

#[derive(Args, Debug)]
struct ExportArgs {
    id: i64,
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
    format: ExportFormat,
    /// Output file, stdout when absent
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PruneArgs {
    /// Keep snapshots newer than this many days (SNAPSHOT_RETENTION_DAYS by default)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=MAX_RETENTION_DAYS))]
    days: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    let store = open_store(&settings)?;

    match cli.command {
        Command::Serve => serve(settings, store).await,
        Command::Crawl(args) => {
            apply_crawl_args(&mut settings, args);
            let state = AppState::new(settings.clone(), store, Some(source_pool(&settings)?));
            let meta = state.snapshots.crawl().await?;
            println!(
                "Saved snapshot {} of schema {}: {} tables, {} columns (checksum {})",
                meta.id,
                meta.schema_name,
                meta.table_count,
                meta.column_count,
                meta.checksum.get(..12).unwrap_or(&meta.checksum)
            );
            Ok(())
        }
        Command::List => {
            let state = AppState::new(settings, store, None);
            let snapshots = state.snapshots.list().await?;
            if snapshots.is_empty() {
                println!("No snapshots found.");
                return Ok(());
            }
            println!("{:>6}  {:<25}  {:<16}  {:>6}  {:>7}", "ID", "CRAWLED", "SCHEMA", "TABLES", "COLUMNS");
            for s in snapshots {
                println!(
                    "{:>6}  {:<25}  {:<16}  {:>6}  {:>7}",
                    s.id,
                    s.crawl_timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    s.schema_name,
                    s.table_count,
                    s.column_count
                );
            }
            Ok(())
        }
        Command::Diff(args) => {
            let state = diff_state(settings, store, args.report.attribute)?;
            let outcome = state
                .snapshots
                .diff(args.from, args.to, args.report.attribute)
                .await?;
            emit(args.report.output, &outcome.report())
        }
        Command::DiffLatest(args) => {
            let state = diff_state(settings, store, args.attribute)?;
            let outcome = state.snapshots.diff_latest(args.attribute).await?;
            emit(args.output, &outcome.report())
        }
        Command::Export(args) => {
            let state = AppState::new(settings, store, None);
            let document = state.snapshots.export(args.id, args.format).await?;
            emit(args.output, &document)
        }
        Command::Prune(args) => {
            let days = args
                .days
                .map(i64::from)
                .unwrap_or(settings.store.retention_days);
            let state = AppState::new(settings, store, None);
            let removed = state.snapshots.prune(days).await?;
            println!("Removed {} snapshots older than {} days", removed, days);
            Ok(())
        }
    }
}

async fn serve(settings: Settings, store: Arc<dyn SnapshotStore>) -> anyhow::Result<()> {
    info!("Starting schema crawler API...");

    let source = match source_pool(&settings) {
        Ok(pool) => {
            match connection::check_connection(&pool).await {
                Ok(check) => info!("Crawling {} on {}", settings.crawler.schema, check.server_version),
                Err(e) => warn!("Database not reachable yet, crawls will fail until it is: {}", e),
            }
            Some(pool)
        }
        Err(e) => {
            warn!("Running without a crawl source: {}", e);
            None
        }
    };

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    let state = Arc::new(AppState::new(settings, store, source));
    let app = create_router(state);

    info!("Server listening on http://{}", addr);
    info!("   GET  /health");
    info!("   POST /api/snapshots             - Crawl and store a snapshot");
    info!("   GET  /api/snapshots             - List snapshots");
    info!("   GET  /api/snapshots/{{id}}        - Fetch a snapshot");
    info!("   GET  /api/snapshots/{{id}}/export - Export (json, csv, markdown)");
    info!("   POST /api/snapshots/prune       - Delete old snapshots");
    info!("   GET  /api/diff?from=&to=        - Compare two snapshots");
    info!("   GET  /api/diff/latest           - Compare the latest two");
    info!("   GET  /api/diff/report           - Markdown change report");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging; `LOG_FORMAT=json` for JSON lines
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schema_crawler=debug,tower_http=debug"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let compact = (!json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .compact()
    });
    let structured = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(compact)
        .with(structured)
        .init();
}

/// `:memory:` keeps snapshots for the life of the process only
fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn SnapshotStore>> {
    if settings.store.path.as_os_str() == ":memory:" {
        warn!("Using an in-memory snapshot store, snapshots will not survive a restart");
        return Ok(Arc::new(MemorySnapshotStore::new()));
    }
    Ok(Arc::new(SqliteSnapshotStore::open(&settings.store.path)?))
}

fn source_pool(settings: &Settings) -> anyhow::Result<deadpool_postgres::Pool> {
    Ok(connection::create_pool(&settings.database)?)
}

/// Attribution needs the audited database; plain diffs only need the store
fn diff_state(
    settings: Settings,
    store: Arc<dyn SnapshotStore>,
    attribute: bool,
) -> anyhow::Result<AppState> {
    let source = if attribute {
        Some(source_pool(&settings)?)
    } else {
        None
    };
    Ok(AppState::new(settings, store, source))
}

fn apply_crawl_args(settings: &mut Settings, args: CrawlArgs) {
    if let Some(schema) = args.schema {
        settings.crawler.schema = schema;
    }

    let filter = &mut settings.crawler.table_filter;
    if !args.include_tables.is_empty() {
        filter.include_tables = args.include_tables;
    }
    if !args.exclude_tables.is_empty() {
        filter.exclude_tables = args.exclude_tables;
    }
    if !args.include_patterns.is_empty() {
        filter.include_patterns = args.include_patterns;
    }
    if !args.exclude_patterns.is_empty() {
        filter.exclude_patterns = args.exclude_patterns;
    }
    if args.case_sensitive {
        filter.case_sensitive = true;
    }
}

fn emit(output: Option<PathBuf>, content: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, content)?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_diff_arguments() {
        let cli = Cli::try_parse_from(["schema-crawler", "diff", "3", "5", "--attribute", "-o", "out.md"]).unwrap();
        match cli.command {
            Command::Diff(args) => {
                assert_eq!((args.from, args.to), (3, 5));
                assert!(args.report.attribute);
                assert_eq!(args.report.output, Some(PathBuf::from("out.md")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_crawl_arguments_override_filter() {
        let cli = Cli::try_parse_from([
            "schema-crawler",
            "crawl",
            "--schema",
            "sales",
            "--exclude-table",
            "audit_log",
            "--include-pattern",
            "app_*",
        ])
        .unwrap();

        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        let mut settings = Settings::default();
        apply_crawl_args(&mut settings, args);

        assert_eq!(settings.crawler.schema, "sales");
        assert_eq!(settings.crawler.table_filter.exclude_tables, vec!["audit_log"]);
        assert_eq!(settings.crawler.table_filter.include_patterns, vec!["app_*"]);
        assert!(!settings.crawler.table_filter.case_sensitive);
    }

    #[test]
    fn test_prune_days_are_bounded() {
        let cli = Cli::try_parse_from(["schema-crawler", "prune", "--days", "7"]).unwrap();
        let Command::Prune(args) = cli.command else {
            panic!("expected prune");
        };
        assert_eq!(args.days, Some(7));

        assert!(Cli::try_parse_from(["schema-crawler", "prune", "--days", "4294967295"]).is_err());
        assert!(Cli::try_parse_from(["schema-crawler", "prune", "--days", "36501"]).is_err());
    }

    #[test]
    fn test_export_format_argument() {
        let cli = Cli::try_parse_from(["schema-crawler", "export", "2", "--format", "markdown"]).unwrap();
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.format, ExportFormat::Markdown);
        assert!(Cli::try_parse_from(["schema-crawler", "export", "2", "--format", "xml"]).is_err());
    }
}
