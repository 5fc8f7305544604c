use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "orderdesk")]
#[command(version, about = "Order-desk back office for document chasing and AI validation")]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, env = "ORDERDESK_CONFIG", default_value = orderdesk::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dashboard HTTP server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "8501")]
        port: u16,

        /// Allow cross-origin requests from any origin
        #[arg(long)]
        cors: bool,
    },
    /// Place, list and remove orders
    Orders {
        #[command(subcommand)]
        command: OrdersCommands,
    },
    /// Free-text search over a collection
    Search {
        collection: String,
        /// Search term; omit to list everything
        #[arg(default_value = "")]
        term: String,
    },
    /// Browse the event log
    Events {
        /// Free text matched against every field
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        order: Option<String>,
        /// Event types (comma-separated)
        #[arg(long)]
        types: Option<String>,
    },
    /// Send one message to the agent and wait for its answer
    Ask {
        message: String,
        /// Agent role to address
        #[arg(long)]
        role: Option<String>,
        /// Seconds to wait before giving up
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand, Clone)]
pub enum OrdersCommands {
    /// Place a new order, one record per document
    Add {
        #[arg(long)]
        order: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        country: Option<String>,
        #[arg(long, default_value = "")]
        phone: String,
        /// Document type; repeat for several
        #[arg(short, long = "document", required = true)]
        documents: Vec<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<chrono::NaiveDate>,
    },
    /// Delete every record of the given orders
    Delete {
        /// Comma-separated order ids
        ids: String,
    },
    /// List order records
    List {
        /// Comma-separated order ids
        #[arg(long)]
        ids: Option<String>,
    },
    /// Document counts by status and per-order progress
    Stats,
    /// Documents still outstanding for an order
    Missing { order: String },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info,orderdesk=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let settings = cmd::load_settings(&cli.config)?;

    match &cli.command {
        Commands::Serve { host, port, cors } => {
            cmd::cmd_serve(&settings, host.clone(), *port, *cors).await?;
        }
        Commands::Orders { command } => cmd::cmd_orders(&settings, command.clone()).await?,
        Commands::Search { collection, term } => {
            cmd::cmd_search(&settings, collection, term).await?
        }
        Commands::Events { text, order, types } => {
            cmd::cmd_events(&settings, text.clone(), order.clone(), types.as_deref()).await?
        }
        Commands::Ask {
            message,
            role,
            timeout,
        } => cmd::cmd_ask(&settings, message, role.as_deref(), *timeout).await?,
        Commands::Config => cmd::cmd_config(&settings)?,
    }

    Ok(())
}
