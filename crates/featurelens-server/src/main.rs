//! # FeatureLens Server
//!
//! REST server for feature view query construction and training dataset
//! planning.
//!
//! ## Startup Flow
//!
//! 1. Initialize tracing/logging
//! 2. Parse command-line arguments
//! 3. Load configuration and open the registry
//! 4. Start HTTP server
//!
//! ## Usage
//!
//! ```bash
//! # Start server with defaults
//! featurelens serve
//!
//! # Specify configuration file and port
//! featurelens serve --config featurelens.yaml --port 8080
//!
//! # Print the batch query of a feature view
//! featurelens query --featurestore demo_featurestore --name fv --version 1 --start-time 1234
//! ```

use clap::{Parser, Subcommand};
use featurelens_server::{api, config, shutdown, state::AppState};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

const DEFAULT_REGISTRY: &str = ".featurelens/registry.db";

/// FeatureLens command-line interface
#[derive(Parser)]
#[command(name = "featurelens")]
#[command(about = "Feature view query construction and training dataset planning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Configuration file path
        #[arg(short, long, default_value = "featurelens.yaml")]
        config: String,

        /// Port to listen on (overrides the configuration file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides the configuration file)
        #[arg(long)]
        host: Option<String>,
    },

    /// List feature views
    List {
        /// Registry database path
        #[arg(long, default_value = DEFAULT_REGISTRY)]
        registry: String,

        /// Only this feature store
        #[arg(long)]
        featurestore: Option<String>,

        /// Only versions of this feature view
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print the query of a feature view, optionally bounded by event time
    Query {
        /// Registry database path
        #[arg(long, default_value = DEFAULT_REGISTRY)]
        registry: String,

        #[arg(long)]
        featurestore: String,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        version: i32,

        /// Inclusive lower bound, epoch milliseconds
        #[arg(long)]
        start_time: Option<i64>,

        /// Inclusive upper bound, epoch milliseconds
        #[arg(long)]
        end_time: Option<i64>,
    },

    /// Check the structure of a query JSON file without a registry
    Validate {
        /// Path to the query JSON file
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG sets the level, LOG_FORMAT=json switches to structured output
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .init();
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, host } => {
            serve(&config, host, port).await?;
        }
        Commands::List {
            registry,
            featurestore,
            name,
        } => {
            cli::list(&registry, featurestore.as_deref(), name.as_deref()).await?;
        }
        Commands::Query {
            registry,
            featurestore,
            name,
            version,
            start_time,
            end_time,
        } => {
            cli::query(
                &registry,
                &featurestore,
                &name,
                version,
                start_time,
                end_time,
            )
            .await?;
        }
        Commands::Validate { file } => {
            cli::validate(&file)?;
        }
    }

    Ok(())
}

/// Start the HTTP server
///
/// Command-line `host` and `port` take precedence over the configuration file.
async fn serve(config_path: &str, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    info!("Starting FeatureLens server");
    info!("Loading configuration from: {}", config_path);

    let mut config = config::load(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = AppState::from_config(&config).await?;

    info!(
        max_body_mb = config.server.max_body_bytes / (1024 * 1024),
        request_timeout_secs = config.server.request_timeout_secs,
        "Server resilience config"
    );

    let app = api::app(state, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}
