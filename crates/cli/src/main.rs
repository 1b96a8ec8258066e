//! Assistive Store CLI - inspect and edit the offline-capable cart.
//!
//! # Usage
//!
//! ```bash
//! # Show the locally persisted cart and pending actions
//! as-cart show
//!
//! # Add two units of a product
//! as-cart add braille-display -q 2 --name "Braille Display" --price 45999.00 --stock 4
//!
//! # Change or remove a line
//! as-cart update braille-display 1
//! as-cart remove braille-display
//!
//! # Replace the local cart with the server's, or replay queued changes
//! as-cart fetch
//! as-cart sync
//! ```
//!
//! # Commands
//!
//! - `show` - Print the cart
//! - `add`, `remove`, `update`, `clear` - Cart mutations
//! - `fetch` - Replace the local cart with the remote cart
//! - `sync` - Replay queued offline changes
//! - `pending` - List queued offline changes

#![cfg_attr(not(test), forbid(unsafe_code))]

use assistive_store_cart::CartConfig;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "as-cart")]
#[command(author, version, about = "Assistive Store cart tools")]
struct Cli {
    /// Treat the cart service as unreachable (changes are queued)
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cart
    Show,
    /// Add units of a product
    Add {
        /// Product identifier
        product_id: String,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Product name
        #[arg(long)]
        name: String,

        /// Unit price
        #[arg(long)]
        price: Decimal,

        /// Units in stock
        #[arg(long)]
        stock: u32,

        /// Product image URL
        #[arg(long)]
        image: Option<String>,
    },
    /// Remove a product's line
    Remove {
        /// Product identifier
        product_id: String,
    },
    /// Set a product's quantity (0 removes the line)
    Update {
        /// Product identifier
        product_id: String,

        /// New quantity
        quantity: u32,
    },
    /// Empty the local cart and drop queued changes
    Clear,
    /// Replace the local cart with the remote cart
    Fetch,
    /// Replay queued offline changes
    Sync,
    /// List queued offline changes
    Pending,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CartConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };

    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "assistive_store_cart=info,as_cart=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &CartConfig) -> Result<(), commands::CommandError> {
    let session = commands::Session::open(config, cli.offline).await?;

    let result = match cli.command {
        Commands::Show => {
            commands::show::cart(&session);
            Ok(())
        }
        Commands::Add {
            product_id,
            quantity,
            name,
            price,
            stock,
            image,
        } => {
            let details = assistive_store_core::ProductDetails {
                name,
                price,
                image,
                stock,
            };
            commands::edit::add(&session, product_id, quantity, details).await
        }
        Commands::Remove { product_id } => commands::edit::remove(&session, product_id).await,
        Commands::Update {
            product_id,
            quantity,
        } => commands::edit::update(&session, product_id, quantity).await,
        Commands::Clear => {
            commands::edit::clear(&session);
            Ok(())
        }
        Commands::Fetch => commands::sync::fetch(&session).await,
        Commands::Sync => commands::sync::drain(&session).await,
        Commands::Pending => {
            commands::show::pending(&session);
            Ok(())
        }
    };

    session.close();
    result
}
