//! `cohort`: parse, inspect and run enrollee search rules from the shell.

mod config;

use clap::Parser;
use cohort_search::model::StudyEnvironmentId;
use cohort_search::store::SqlExecutor;
use cohort_search::{EnrolleeSearchExpressionParser, EnrolleeSearchOptions, EnrolleeSearchService};
use std::sync::Arc;
use tracing::info;

use config::{CliConfig, Command, StorageBackendMode, init_logging};

#[cfg(feature = "sqlite")]
use cohort_search::backends::sqlite::SqliteBackend;

#[cfg(feature = "postgres")]
use cohort_search::backends::postgres::PostgresBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    // Parsing never needs a database.
    if let Command::Parse {
        rule,
        dialect,
        study_env,
    } = &config.command
    {
        let expression = EnrolleeSearchExpressionParser::default().parse_rule(rule)?;
        let query = expression.compile(
            &StudyEnvironmentId::new(study_env.as_str()),
            (*dialect).into(),
            config.default_limit,
        );
        println!("{}", query.query.sql);
        for (i, param) in query.query.params.iter().enumerate() {
            println!("  ${} = {:?}", i + 1, param);
        }
        return Ok(());
    }

    let backend_mode = config.storage_backend_mode();
    info!(storage_backend = %backend_mode, "Opening participant store");

    match backend_mode {
        StorageBackendMode::Sqlite => run_sqlite(config).await,
        StorageBackendMode::Postgres => run_postgres(config).await,
    }
}

#[cfg(feature = "sqlite")]
async fn run_sqlite(config: CliConfig) -> anyhow::Result<()> {
    let backend = if config.database_url == ":memory:" {
        SqliteBackend::in_memory()?
    } else {
        SqliteBackend::open(&config.database_url)?
    };
    backend.init_schema()?;
    if config.command == Command::InitSchema {
        info!(database = %config.database_url, "SQLite schema ready");
        return Ok(());
    }
    run_command(backend, &config).await
}

#[cfg(not(feature = "sqlite"))]
async fn run_sqlite(_config: CliConfig) -> anyhow::Result<()> {
    anyhow::bail!(
        "The sqlite backend requires the 'sqlite' feature. \
         Build with: cargo build -p cohort-cli --features sqlite"
    )
}

#[cfg(feature = "postgres")]
async fn run_postgres(config: CliConfig) -> anyhow::Result<()> {
    let backend = PostgresBackend::from_connection_string(&config.database_url).await?;
    backend.init_schema().await?;
    if config.command == Command::InitSchema {
        info!("PostgreSQL schema ready");
        return Ok(());
    }
    run_command(backend, &config).await
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(_config: CliConfig) -> anyhow::Result<()> {
    anyhow::bail!(
        "The postgres backend requires the 'postgres' feature. \
         Build with: cargo build -p cohort-cli --features postgres"
    )
}

async fn run_command<E: SqlExecutor>(executor: E, config: &CliConfig) -> anyhow::Result<()> {
    let service = EnrolleeSearchService::new(
        executor,
        Arc::new(cohort_search::TermRegistry::with_defaults()),
        config.search_config(),
    );

    match &config.command {
        Command::Facets { study_env } => {
            let facets = service.facets(&StudyEnvironmentId::new(study_env.as_str())).await?;
            println!("{}", serde_json::to_string_pretty(&facets)?);
        }
        Command::Search {
            rule,
            study_env,
            limit,
        } => {
            let rows = service
                .execute_search_expression(
                    &StudyEnvironmentId::new(study_env.as_str()),
                    rule,
                    EnrolleeSearchOptions { limit: *limit },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Evaluate { enrollee_id, rule } => {
            let matched = service.evaluate_enrollee(enrollee_id, rule).await?;
            println!("{}", matched);
        }
        Command::InitSchema | Command::Parse { .. } => {}
    }
    Ok(())
}
