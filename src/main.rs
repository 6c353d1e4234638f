//! starter-kit-api: status service and deployment tooling.
//!
//! This is the application entry point. It initializes tracing, loads
//! configuration from TOML, and then either serves HTTP (the default) or
//! works with the deployment topology: printing it, rendering the build
//! stage, or running the delivery pipeline locally.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use starter_kit_api::config::{AppConfig, LogFormat, RunMode, DEFAULT_LOG_FILTER};
use starter_kit_api::deploy::{short_commit, BuildSpec, Pipeline, ShellExecutor, SourceEvent};
use starter_kit_api::http::{HttpServer, ServerConfig};
use starter_kit_api::routes::create_router;
use starter_kit_api::state::AppState;

/// starter-kit-api: status service and its deployment pipeline
#[derive(Parser, Debug)]
#[command(name = "starter-kit-api", version, about)]
struct Args {
    /// Path to configuration file (default: config/default.toml if present)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level filter (e.g., "starter_kit_api=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve HTTP (default)
    Serve,
    /// Print the resolved deployment topology as JSON
    Topology,
    /// Print the build stage as a shell script for a commit
    Buildspec {
        /// Full commit hash to tag the image with
        #[arg(long)]
        commit: String,
    },
    /// Run Source → Build → Deploy for a push
    Pipeline {
        /// Branch that was pushed (default: the configured branch)
        #[arg(long)]
        branch: Option<String>,
        /// Commit to deploy (default: branch head)
        #[arg(long)]
        commit: Option<String>,
        /// Checkout directory the commands run in
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::load_or_default(args.config.as_deref())?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(config = ?args.config, "Loaded configuration");

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await?,
        Command::Topology => {
            let topology = &config.deployment;
            let output = serde_json::json!({
                "topology": topology,
                "resources": topology.resources(),
                "containerHealthCheck": topology.container_health_command(),
                "taskDefinition": topology.task_definition(&topology.task_image()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Buildspec { commit } => {
            let tag = short_commit(&commit)?;
            let descriptor = PathBuf::from(&config.deployment.pipeline.build.descriptor_file);
            let spec = BuildSpec::render(&config.deployment, &tag, descriptor);
            print!("{}", spec.to_script());
        }
        Command::Pipeline {
            branch,
            commit,
            workdir,
        } => {
            let pipeline = Pipeline::from_topology(&config.deployment, &workdir)?;
            let event = SourceEvent {
                branch: branch.unwrap_or_else(|| pipeline.branch().to_string()),
                commit,
            };
            let executor = ShellExecutor::new(&workdir);
            let report = pipeline.run(&event, &executor).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mode = RunMode::from_env();
    let server_config = ServerConfig::from_app_config(&config, mode)?;

    tracing::info!(
        ?mode,
        keyword_lookup = config.routes.keyword_lookup,
        "Configured routes"
    );

    let state = AppState::new(config);
    let app = create_router(state);

    HttpServer::new(server_config).run(app).await?;

    Ok(())
}
