//! Command-line access to the trellis platform API
//!
//! `trellis call` invokes a single operation and prints the response;
//! `trellis listen` tails one or more event channels until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info};
use trellis_client::{ChannelEvent, ClientConfig, Middleware, PaginationOptions, RequestBuilder};

#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Call platform operations and tail event channels", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "TRELLIS_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Invoke one operation and print its result and errors as JSON
    Call {
        /// Operation id, e.g. platform.shared.GetAsset
        operation: String,

        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,

        /// Page number, starting at 1
        #[arg(long)]
        page: Option<i64>,

        /// Items per page
        #[arg(long)]
        limit: Option<i64>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print events from the given channels until Ctrl-C
    Listen {
        /// Channel names, e.g. project:123
        #[arg(required = true)]
        channels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    debug!(endpoint = %config.query_endpoint(), events = %config.event_url, "Configuration loaded");
    let middleware = Middleware::new(config).context("Failed to create middleware")?;

    let outcome = match cli.command {
        Commands::Call {
            operation,
            args,
            page,
            limit,
            timeout,
        } => call(&middleware, operation, args, page, limit, timeout).await,
        Commands::Listen { channels } => listen(&middleware, channels).await,
    };

    middleware.shutdown().await?;
    outcome
}

fn load_config(path: Option<&std::path::Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = ClientConfig::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn call(
    middleware: &Middleware,
    operation: String,
    args: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut builder = RequestBuilder::<Value>::new(operation);
    if let Some(args) = args {
        let Value::Object(object) =
            serde_json::from_str::<Value>(&args).context("--args is not valid JSON")?
        else {
            bail!("--args must be a JSON object");
        };
        builder = builder.args_from_object(object);
    }
    if page.is_some() || limit.is_some() {
        builder = builder.paginate(PaginationOptions::new(page, limit)?);
    }
    let request = builder.build()?;

    let dispatcher = middleware.dispatcher()?;
    let response = match timeout {
        Some(secs) => {
            dispatcher
                .send_timeout(&request, Duration::from_secs(secs))
                .await?
        }
        None => dispatcher.send(&request).await?,
    };

    let (result, errors) = response.into_parts();
    let missing = result.is_none();
    let output = json!({ "result": result, "errors": errors });
    println!("{}", serde_json::to_string_pretty(&output)?);
    if missing {
        bail!("{} returned no result", request.operation());
    }
    Ok(())
}

async fn listen(middleware: &Middleware, channels: Vec<String>) -> Result<()> {
    let mut states = middleware.state_changes();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(%state, "Event connection");
        }
    });

    for channel in &channels {
        middleware
            .subscribe(channel.as_str(), print_event)
            .await
            .with_context(|| format!("Failed to subscribe to {channel}"))?;
    }
    info!(channels = channels.len(), "Listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    info!("Interrupted, shutting down");
    Ok(())
}

fn print_event(event: &ChannelEvent) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
