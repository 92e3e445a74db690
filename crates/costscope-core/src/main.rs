//! Costscope CLI
//!
//! Command-line interface for the Costscope cost-analytics engine.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use costscope::analytics::BillingAnalytics;
use costscope::api::HttpServer;
use costscope::cache::EntityNameCache;
use costscope::config::LoggingConfig;
use costscope::db::PostgresExecutor;
use costscope::lookup::NoopLookup;
use costscope::models::BillingQuery;
use costscope::query::{CompiledQuery, FilterResolver, QueryCompiler};
use costscope::Config;
use tracing::info;

/// Costscope - Cost analytics over cloud billing data
#[derive(Parser)]
#[command(name = "costscope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "COSTSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ExplainKind {
    Aggregate,
    TrendStats,
    FilterValues,
    TotalCount,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// HTTP API port (overrides the configuration file)
        #[arg(long, env = "COSTSCOPE_HTTP_PORT")]
        http_port: Option<u16>,
    },

    /// Compile a JSON request and print the SQL without touching the database
    Explain {
        /// Request file (`-` reads stdin)
        #[arg(default_value = "-")]
        file: PathBuf,

        /// Query variant to compile
        #[arg(long, value_enum, default_value = "aggregate")]
        kind: ExplainKind,
    },

    /// Check connectivity to the billing database
    Health,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Environment overrides may live in a local .env file
    dotenvy::dotenv().ok();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Serve { http_port } => run_serve(config, http_port).await,
        Commands::Explain { file, kind } => run_explain(config, &file, kind).await,
        Commands::Health => run_health(config).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn compiler(config: &Config) -> QueryCompiler {
    QueryCompiler::new(config.query.clone(), FilterResolver::default())
}

async fn run_serve(config: Config, http_port: Option<u16>) -> anyhow::Result<()> {
    let executor = PostgresExecutor::new(&config.database)
        .await
        .context("connecting to the billing database")?;
    let names = EntityNameCache::new(config.cache.entity_name_capacity, Arc::new(NoopLookup));
    let analytics = BillingAnalytics::new(compiler(&config), Arc::new(executor), Arc::new(names));

    let port = http_port.unwrap_or(config.server.http_port);
    let addr = format!("{}:{}", config.server.host, port);
    info!(table = %config.query.daily_table, "Starting Costscope API on {}", addr);

    tokio::select! {
        result = HttpServer::new(Arc::new(analytics)).serve(&addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

async fn run_explain(config: Config, file: &Path, kind: ExplainKind) -> anyhow::Result<()> {
    let mut body = String::new();
    if file.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut body)?;
    } else {
        body = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
    }
    let query: BillingQuery = serde_json::from_str(&body).context("parsing billing request")?;

    let compiler = compiler(&config);
    let compiled: CompiledQuery = match kind {
        ExplainKind::Aggregate => compiler.compile(&query).await?,
        ExplainKind::TrendStats => compiler.compile_trend_stats(&query).await?,
        ExplainKind::FilterValues => compiler.compile_filter_values(&query).await?,
        ExplainKind::TotalCount => compiler.compile_total_count(&query).await?,
    };

    println!("{}", serde_json::to_string_pretty(&compiled)?);
    Ok(())
}

async fn run_health(config: Config) -> anyhow::Result<()> {
    let executor = PostgresExecutor::new(&config.database).await?;
    executor.health_check().await?;
    println!("Database: connected ({})", config.query.daily_table);
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "costscope", &mut io::stdout());
}
