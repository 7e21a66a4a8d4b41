//! Tidecart CLI - drive the cart engine against a cart server.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart
//! tidecart --email ana@loja.com show
//!
//! # Add two units of product 12
//! tidecart add --product 12 --quantity 2
//!
//! # Change a line's quantity by -1
//! tidecart update --line 31 --delta -1
//!
//! # Buy everything
//! tidecart checkout
//!
//! # Replay queued purchases
//! tidecart queue flush
//!
//! # Keep flushing queued purchases until Ctrl-C
//! tidecart watch
//! ```
//!
//! # Environment Variables
//!
//! Same as the engine: `TIDECART_API_URL` is required, and
//! `TIDECART_CLIENT_EMAIL` supplies the client when `--email` is omitted.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tidecart")]
#[command(author, version, about = "Tidecart cart synchronization CLI")]
struct Cli {
    /// Client e-mail (overrides `TIDECART_CLIENT_EMAIL`)
    #[arg(short, long, global = true)]
    email: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile and print the cart
    Show,
    /// Add a product to the cart
    Add {
        /// Catalog product ID
        #[arg(short, long)]
        product: i64,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Change a line's quantity by a delta
    Update {
        /// Cart line ID
        #[arg(short, long)]
        line: String,

        /// Quantity change; reaching zero removes the line
        #[arg(short, long, allow_hyphen_values = true)]
        delta: i64,
    },
    /// Remove a line from the cart
    Remove {
        /// Cart line ID
        #[arg(short, long)]
        line: String,
    },
    /// Empty the cart
    Clear,
    /// Buy every line in the cart
    Checkout,
    /// Inspect or replay the pending-sale queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Flush the pending-sale queue periodically until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queued sales
    List,
    /// Replay queued sales now
    Flush,
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tidecart_sync=info,tidecart_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let session = commands::open_session(cli.email.as_deref()).await?;

    let result = match cli.command {
        Commands::Show => commands::cart::show(&session).await,
        Commands::Add { product, quantity } => {
            commands::cart::add(&session, product, quantity).await
        }
        Commands::Update { line, delta } => commands::cart::update(&session, &line, delta).await,
        Commands::Remove { line } => commands::cart::remove(&session, &line).await,
        Commands::Clear => commands::cart::clear(&session).await,
        Commands::Checkout => commands::cart::checkout(&session).await,
        Commands::Queue { action } => match action {
            QueueAction::List => commands::queue::list(&session).await,
            QueueAction::Flush => commands::queue::flush(&session).await,
        },
        Commands::Watch => commands::queue::watch(&session).await,
    };

    session.shutdown().await;
    result?;
    Ok(())
}
