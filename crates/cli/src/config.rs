//! Command-line configuration for the `cohort` binary.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COHORT_DATABASE_URL` | cohort.db | SQLite path, `:memory:`, or `postgres://` URL |
//! | `COHORT_LOG_LEVEL` | info | Log level |
//! | `COHORT_QUERY_TIMEOUT_MS` | 30000 | Search statement timeout |
//! | `COHORT_DEFAULT_LIMIT` | | Row limit when `--limit` is not given |
//! | `COHORT_MAX_LIMIT` | 10000 | Upper bound on any row limit, 0 for none |
//! | `COHORT_STUDY_ENV` | | Study environment for `facets` and `search` |

use std::fmt;

use clap::{Parser, Subcommand, ValueEnum};
use cohort_search::SearchConfig;
use cohort_search::sql::SqlDialect;

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "cohort")]
#[command(about = "Parse, inspect and run enrollee search rules")]
pub struct CliConfig {
    /// Database location: a SQLite file path, `:memory:`, or a postgres:// URL.
    #[arg(long, env = "COHORT_DATABASE_URL", default_value = "cohort.db")]
    pub database_url: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "COHORT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Search statement timeout in milliseconds.
    #[arg(long, env = "COHORT_QUERY_TIMEOUT_MS", default_value = "30000")]
    pub query_timeout_ms: u64,

    /// Row limit used when a search gives none.
    #[arg(long, env = "COHORT_DEFAULT_LIMIT")]
    pub default_limit: Option<usize>,

    /// Upper bound on any row limit. 0 removes the cap, so a search with no
    /// limit returns every match.
    #[arg(long, env = "COHORT_MAX_LIMIT", default_value = "10000")]
    pub max_limit: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create or migrate the participant tables.
    InitSchema,

    /// List the variables a study environment supports.
    Facets {
        #[arg(long, env = "COHORT_STUDY_ENV")]
        study_env: String,
    },

    /// Check a rule and print the SQL it compiles to. Does not connect.
    Parse {
        rule: String,

        #[arg(long, value_enum, default_value_t = DialectArg::Sqlite)]
        dialect: DialectArg,

        /// Environment id bound into the printed query.
        #[arg(long, env = "COHORT_STUDY_ENV", default_value = "example")]
        study_env: String,
    },

    /// Run a rule against a study environment.
    Search {
        rule: String,

        #[arg(long, env = "COHORT_STUDY_ENV")]
        study_env: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Evaluate a rule in memory for one enrollee.
    Evaluate {
        enrollee_id: String,
        rule: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DialectArg {
    Sqlite,
    Postgres,
}

impl From<DialectArg> for SqlDialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => SqlDialect::Sqlite,
            DialectArg::Postgres => SqlDialect::Postgres,
        }
    }
}

/// Which backend the database URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendMode {
    Sqlite,
    Postgres,
}

impl fmt::Display for StorageBackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackendMode::Sqlite => write!(f, "sqlite"),
            StorageBackendMode::Postgres => write!(f, "postgres"),
        }
    }
}

impl CliConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database_url.trim().is_empty() {
            errors.push("Database URL cannot be empty".to_string());
        }

        if self.query_timeout_ms == 0 {
            errors.push("Query timeout cannot be 0".to_string());
        }

        if self.max_limit != 0 && self.default_limit.is_some_and(|limit| limit > self.max_limit) {
            errors.push("Default limit cannot exceed max limit".to_string());
        }

        match &self.command {
            Command::Facets { study_env } | Command::Search { study_env, .. }
                if study_env.trim().is_empty() =>
            {
                errors.push("Study environment cannot be empty".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn storage_backend_mode(&self) -> StorageBackendMode {
        if self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://")
        {
            StorageBackendMode::Postgres
        } else {
            StorageBackendMode::Sqlite
        }
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            query_timeout_ms: self.query_timeout_ms,
            default_limit: self.default_limit,
            max_limit: (self.max_limit != 0).then_some(self.max_limit),
        }
    }
}

/// Initializes logging to stderr so command output stays machine-readable.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("cohort={level},cohort_search={level}", level = level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
