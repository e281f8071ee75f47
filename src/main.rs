use clap::{Parser, Subcommand};
use dealwire::application::grading::GradingService;
use dealwire::application::settings::SettingsService;
use dealwire::config::AppConfig;
use dealwire::domain::money::{Amount, FeeRate, Money};
use dealwire::domain::ports::{DynSettingsStore, DynUserStore};
use dealwire::domain::pricing::{DiscountValue, price_deal};
use dealwire::error::PaymentError;
use dealwire::interfaces::csv::user_reader::UserReader;
use dealwire::interfaces::csv::user_writer::UserWriter;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Price a deal and print the quote as JSON
    Quote {
        /// Principal in whole currency units
        #[arg(long)]
        amount: Decimal,

        /// Fee rate in percent, e.g. 5.5
        #[arg(long)]
        fee_rate: Decimal,

        /// Flat discount, clamped to the fee
        #[arg(long, conflicts_with = "discount_percent")]
        discount_amount: Option<Decimal>,

        /// Discount as a percentage of the fee
        #[arg(long)]
        discount_percent: Option<Decimal>,
    },
    /// Close the month for a users CSV and print the updated users
    Rollover {
        /// Users CSV file
        input: PathBuf,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Quote {
            amount,
            fee_rate,
            discount_amount,
            discount_percent,
        } => quote(amount, fee_rate, discount_amount, discount_percent),
        Command::Rollover {
            input,
            db_path,
            config,
        } => rollover(&input, db_path.as_deref(), config.as_deref()).await,
    }
}

fn quote(
    amount: Decimal,
    fee_rate: Decimal,
    discount_amount: Option<Decimal>,
    discount_percent: Option<Decimal>,
) -> Result<()> {
    let principal = Amount::new(amount).into_diagnostic()?;
    let fee_rate = FeeRate::new(fee_rate).into_diagnostic()?;
    let discount = match (discount_amount, discount_percent) {
        (Some(value), _) => Some(DiscountValue::Amount(Money::new(value))),
        (None, Some(percent)) => Some(DiscountValue::FeePercent(percent)),
        (None, None) => None,
    };
    let quote = price_deal(principal, fee_rate, discount.as_ref());
    println!("{}", serde_json::to_string_pretty(&quote).into_diagnostic()?);
    Ok(())
}

async fn rollover(input: &Path, db_path: Option<&Path>, config: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config).into_diagnostic()?;
    let deployment = config.grades_layer().into_diagnostic()?;
    let (users, settings_store) = open_stores(db_path)?;

    let file = File::open(input).into_diagnostic()?;
    let now = chrono::Utc::now();
    let mut loaded = 0usize;
    for record in UserReader::new(file).records() {
        match record {
            Ok(record) => match users.insert(record.into_user(now)).await {
                Ok(()) => loaded += 1,
                Err(PaymentError::AlreadyExists { id, .. }) => {
                    warn!(uid = %id, "User already stored; keeping stored record");
                }
                Err(e) => return Err(e).into_diagnostic(),
            },
            Err(e) => warn!(error = %e, "Skipping unreadable user row"),
        }
    }
    info!(loaded, "Users loaded");

    let grading = GradingService::new(
        users.clone(),
        SettingsService::new(settings_store, deployment),
    );
    grading.run_monthly().await.into_diagnostic()?;

    let all = users.all().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = UserWriter::new(stdout.lock());
    writer.write_users(&all).into_diagnostic()?;
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<(DynUserStore, DynSettingsStore)> {
    use dealwire::infrastructure::in_memory::{InMemorySettingsStore, InMemoryUserStore};
    use dealwire::infrastructure::rocksdb::RocksDbStore;
    use std::sync::Arc;

    if let Some(path) = db_path {
        let store = RocksDbStore::open(path).into_diagnostic()?;
        let users: DynUserStore = Arc::new(store.clone());
        let settings: DynSettingsStore = Arc::new(store);
        return Ok((users, settings));
    }
    let users: DynUserStore = Arc::new(InMemoryUserStore::new());
    let settings: DynSettingsStore = Arc::new(InMemorySettingsStore::new());
    Ok((users, settings))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<(DynUserStore, DynSettingsStore)> {
    use dealwire::infrastructure::in_memory::{InMemorySettingsStore, InMemoryUserStore};
    use std::sync::Arc;

    if db_path.is_some() {
        warn!("Persistent storage requested but this binary was built without storage-rocksdb; using in-memory storage");
    }
    let users: DynUserStore = Arc::new(InMemoryUserStore::new());
    let settings: DynSettingsStore = Arc::new(InMemorySettingsStore::new());
    Ok((users, settings))
}
