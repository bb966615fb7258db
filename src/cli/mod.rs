use std::{borrow::Cow, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::{
    database::{DatabaseOptions, PostgresConnection},
    exchange_rates::{ExchangeRateApiProvider, ExchangeRates},
    ledger::{
        domain::period::SalaryMonth,
        services::{LedgerConfig, LedgerService},
    },
    repos::{DynAccountRepo, DynCategoryRepo, DynTransactionRepo},
};

mod migrate;

#[derive(Parser)]
#[clap(about = "Personal finance ledger")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// DSN to tell Sentry where to send events.
    ///
    /// If provided, errors will be sent to Sentry.
    #[clap(long = "sentry-dsn", env = "SENTRY_DSN")]
    sentry_dsn: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations.
    Migrate(MigrateOpts),
    /// Give an owner the default set of categories.
    SeedCategories(SeedCategoriesOpts),
    /// Print the budget summary for an owner's salary month.
    Summary(SummaryOpts),
    /// Print the exchange rate from a currency into the base currency.
    Rate(RateOpts),
}

#[derive(Args)]
struct MigrateOpts {
    /// Connection string for the database.
    #[clap(long = "database-url", env = "DATABASE_URL")]
    database_url: String,
}

impl From<MigrateOpts> for migrate::MigrationOpts {
    fn from(opts: MigrateOpts) -> Self {
        Self {
            database_url: opts.database_url,
        }
    }
}

#[derive(Args)]
struct DatabaseOpts {
    /// The number of connections to use for the database pool.
    #[clap(long = "database-pool-size", default_value = "16")]
    database_pool_size: u32,

    /// The number of seconds before a database connection times out.
    #[clap(long = "database-timeout", default_value = "5")]
    database_timeout: u8,

    /// Connection string for the application database.
    #[clap(long = "database-url", env = "DATABASE_URL")]
    database_url: String,
}

impl From<DatabaseOpts> for DatabaseOptions {
    fn from(opts: DatabaseOpts) -> Self {
        Self {
            url: opts.database_url,
            pool_size: opts.database_pool_size,
            timeout_seconds: opts.database_timeout,
        }
    }
}

#[derive(Args)]
struct ExchangeRateOpts {
    /// Currency that amounts are converted into for reporting.
    #[clap(long = "base-currency", env = "BASE_CURRENCY", default_value = "SEK")]
    base_currency: String,

    /// API key for ExchangeRate-API.
    #[clap(long = "exchange-rate-api-key", env = "EXCHANGE_RATE_API_KEY")]
    exchange_rate_api_key: String,

    /// Seconds a fetched exchange rate is reused.
    #[clap(long = "exchange-rate-ttl", default_value = "3600")]
    exchange_rate_ttl: u64,

    /// Seconds before an exchange rate request is abandoned.
    #[clap(long = "exchange-rate-timeout", default_value = "3")]
    exchange_rate_timeout: u64,
}

impl ExchangeRateOpts {
    fn into_exchange_rates(self) -> ExchangeRates {
        let provider = ExchangeRateApiProvider::new(self.exchange_rate_api_key);

        ExchangeRates::new(Arc::new(provider), self.base_currency.to_ascii_uppercase())
            .with_ttl(Duration::from_secs(self.exchange_rate_ttl))
            .with_fetch_timeout(Duration::from_secs(self.exchange_rate_timeout))
    }
}

#[derive(Args)]
struct LedgerOpts {
    #[clap(flatten)]
    database: DatabaseOpts,

    #[clap(flatten)]
    exchange_rates: ExchangeRateOpts,

    /// Day of the month salary months start on.
    #[clap(long = "salary-start-day", env = "SALARY_START_DAY", default_value = "25")]
    salary_start_day: u32,

    /// Day of the month salary months end on.
    #[clap(long = "salary-end-day", env = "SALARY_END_DAY", default_value = "24")]
    salary_end_day: u32,

    /// Seconds a single ledger operation may take.
    #[clap(long = "operation-timeout", default_value = "10")]
    operation_timeout: u64,
}

impl LedgerOpts {
    async fn into_service(self) -> anyhow::Result<LedgerService> {
        let db_connection = PostgresConnection::connect(&self.database.into()).await?;

        let account_repo: DynAccountRepo = Arc::new(db_connection.clone());
        let category_repo: DynCategoryRepo = Arc::new(db_connection.clone());
        let transaction_repo: DynTransactionRepo = Arc::new(db_connection);

        let config = LedgerConfig {
            salary_month: SalaryMonth {
                start_day: self.salary_start_day,
                end_day: self.salary_end_day,
            },
            period_start_day: self.salary_start_day,
            operation_timeout: Duration::from_secs(self.operation_timeout),
        };

        Ok(LedgerService::new(
            account_repo,
            category_repo,
            transaction_repo,
            Arc::new(self.exchange_rates.into_exchange_rates()),
            config,
        ))
    }
}

#[derive(Args)]
struct SeedCategoriesOpts {
    #[clap(flatten)]
    ledger: LedgerOpts,

    /// The owner to seed categories for.
    #[clap(long = "owner")]
    owner: String,
}

#[derive(Args)]
struct SummaryOpts {
    #[clap(flatten)]
    ledger: LedgerOpts,

    /// The owner to summarize.
    #[clap(long = "owner")]
    owner: String,

    /// An instant inside the salary month to summarize. Defaults to now.
    #[clap(long = "at")]
    at: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct RateOpts {
    #[clap(flatten)]
    exchange_rates: ExchangeRateOpts,

    /// The currency to convert from.
    currency: String,
}

pub async fn run_with_sys_args() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;

    let cli = Cli::parse();

    let sentry_config = cli.sentry_dsn.map(|dsn| {
        debug!("Enabled sentry.");

        let release_name = option_env!("GIT_SHA")
            .map(Cow::from)
            .or_else(|| sentry::release_name!());

        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: release_name,
                ..Default::default()
            },
        ))
    });

    let sentry_tracing_layer = if sentry_config.is_some() {
        Some(sentry_tracing::layer())
    } else {
        None
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sentry_tracing_layer)
        .init();

    match cli.command {
        Commands::Migrate(opts) => migrate::run_migrations(opts.into()).await,
        Commands::SeedCategories(opts) => {
            let service = opts.ledger.into_service().await?;
            let inserted = service.seed_default_categories(&opts.owner).await?;

            println!("Added {} categories for {}.", inserted, opts.owner);

            Ok(())
        }
        Commands::Summary(opts) => {
            let service = opts.ledger.into_service().await?;
            let salary_month = service.config().salary_month;
            let summary = service
                .summarize_at(&opts.owner, salary_month, opts.at.unwrap_or_else(Utc::now))
                .await?;

            println!("{}", serde_json::to_string_pretty(&summary)?);

            Ok(())
        }
        Commands::Rate(opts) => {
            let exchange_rates = opts.exchange_rates.into_exchange_rates();
            let rate = exchange_rates
                .rate(&opts.currency.to_ascii_uppercase())
                .await?;

            println!(
                "1 {} = {} {}",
                opts.currency.to_ascii_uppercase(),
                rate,
                exchange_rates.base_currency()
            );

            Ok(())
        }
    }
}
