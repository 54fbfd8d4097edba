//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::sql::{ColumnType, SQLITE_INSTANT_FORMAT, SqlDialect, SqlParam, SqlQuery, SqlRow};
use crate::store::SqlExecutor;
use crate::value::{DATE_FORMAT, parse_instant};

use super::{functions, schema};

const BACKEND_NAME: &str = "sqlite";

/// SQLite backend for participant data.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool. In-memory databases always
    /// use a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    pub fn in_memory() -> BackendResult<Self> {
        Self::with_config(":memory:", SqliteBackendConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a backend with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteBackendConfig) -> BackendResult<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let is_memory = path_str == ":memory:";

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms as u64);
        let enable_foreign_keys = config.enable_foreign_keys;
        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(path.as_ref())
        }
        .with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            functions::register(conn)?;
            if enable_foreign_keys {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            }
            Ok(())
        });

        // Every in-memory connection is its own database, so the pool keeps
        // exactly one alive for the lifetime of the backend.
        let builder = if is_memory {
            Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder()
                .max_size(config.max_connections)
                .min_idle(Some(config.min_connections))
        };

        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            })?;

        let backend = Self {
            pool,
            config,
            is_memory,
        };

        backend.configure_connection()?;
        debug!(path = %path_str, is_memory, "Opened SQLite backend");

        Ok(backend)
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> BackendResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    fn get_connection(&self) -> BackendResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| BackendError::ConnectionFailed {
            backend_name: BACKEND_NAME.to_string(),
            message: e.to_string(),
        })
    }

    /// Configure database-wide settings.
    fn configure_connection(&self) -> BackendResult<()> {
        if self.config.enable_wal && !self.is_memory {
            let conn = self.get_connection()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| BackendError::Internal {
                    backend_name: BACKEND_NAME.to_string(),
                    message: format!("Failed to enable WAL mode: {}", e),
                    source: None,
                })?;
        }
        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }
}

fn to_sql_value(param: &SqlParam) -> Value {
    match param {
        SqlParam::Text(s) => Value::Text(s.clone()),
        SqlParam::Integer(i) => Value::Integer(*i),
        SqlParam::Float(f) => Value::Real(*f),
        SqlParam::Bool(b) => Value::Integer(i64::from(*b)),
        SqlParam::Date(d) => Value::Text(d.format(DATE_FORMAT).to_string()),
        SqlParam::Timestamp(t) => Value::Text(t.format(SQLITE_INSTANT_FORMAT).to_string()),
        SqlParam::Null => Value::Null,
    }
}

fn sqlite_error(err: rusqlite::Error, timeout_ms: u64) -> BackendError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == ErrorCode::OperationInterrupted =>
        {
            BackendError::Timeout { timeout_ms }
        }
        other => BackendError::from(other),
    }
}

fn join_error(err: tokio::task::JoinError) -> BackendError {
    BackendError::Internal {
        backend_name: BACKEND_NAME.to_string(),
        message: format!("blocking task failed: {}", err),
        source: Some(Box::new(err)),
    }
}

fn read_cell(row: &rusqlite::Row<'_>, index: usize, column_type: ColumnType) -> BackendResult<SqlParam> {
    let decode_error = move |message: String| BackendError::Decode {
        column: index,
        message,
    };
    let get_text = || {
        row.get::<_, Option<String>>(index)
            .map_err(|e| decode_error(e.to_string()))
    };

    let value = match column_type {
        ColumnType::Text => get_text()?.map(SqlParam::Text),
        ColumnType::Integer => row
            .get::<_, Option<i64>>(index)
            .map_err(|e| decode_error(e.to_string()))?
            .map(SqlParam::Integer),
        ColumnType::Float => row
            .get::<_, Option<f64>>(index)
            .map_err(|e| decode_error(e.to_string()))?
            .map(SqlParam::Float),
        ColumnType::Bool => row
            .get::<_, Option<bool>>(index)
            .map_err(|e| decode_error(e.to_string()))?
            .map(SqlParam::Bool),
        ColumnType::Date => match get_text()? {
            Some(text) => Some(SqlParam::Date(
                NaiveDate::parse_from_str(&text, DATE_FORMAT)
                    .map_err(|e| decode_error(format!("invalid date '{}': {}", text, e)))?,
            )),
            None => None,
        },
        ColumnType::Timestamp => match get_text()? {
            Some(text) => Some(SqlParam::Timestamp(
                parse_instant(&text)
                    .ok_or_else(|| decode_error(format!("invalid timestamp '{}'", text)))?,
            )),
            None => None,
        },
    };
    Ok(value.unwrap_or(SqlParam::Null))
}

/// VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1000;

fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    columns: &[ColumnType],
    deadline: Option<Instant>,
    timeout_ms: u64,
) -> BackendResult<Vec<SqlRow>> {
    if let Some(deadline) = deadline {
        if Instant::now() >= deadline {
            return Err(BackendError::Timeout { timeout_ms });
        }
        // The statement stops itself even if the caller has already given up.
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));
    }
    let result = read_rows(conn, sql, params, columns, timeout_ms);
    if deadline.is_some() {
        conn.progress_handler(0, None::<fn() -> bool>);
    }
    result
}

fn read_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    columns: &[ColumnType],
    timeout_ms: u64,
) -> BackendResult<Vec<SqlRow>> {
    let mut stmt = conn.prepare(sql).map_err(|e| sqlite_error(e, timeout_ms))?;
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| sqlite_error(e, timeout_ms))?;

    let mut decoded = Vec::new();
    while let Some(row) = rows.next().map_err(|e| sqlite_error(e, timeout_ms))? {
        let cells = columns
            .iter()
            .enumerate()
            .map(|(index, column_type)| read_cell(row, index, *column_type))
            .collect::<BackendResult<Vec<_>>>()?;
        decoded.push(SqlRow::new(cells));
    }
    Ok(decoded)
}

#[async_trait]
impl SqlExecutor for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn query(
        &self,
        query: &SqlQuery,
        columns: &[ColumnType],
        timeout: Option<Duration>,
    ) -> BackendResult<Vec<SqlRow>> {
        let conn = self.get_connection()?;
        let interrupt = conn.get_interrupt_handle();
        let sql = query.sql.clone();
        let params: Vec<Value> = query.params.iter().map(to_sql_value).collect();
        let columns = columns.to_vec();
        let timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        let deadline = timeout.map(|limit| Instant::now() + limit);

        let task = tokio::task::spawn_blocking(move || {
            run_query(&conn, &sql, &params, &columns, deadline, timeout_ms)
        });

        // The deadline inside the task is authoritative. This outer bound
        // covers time spent outside the VM, such as waiting on a busy lock.
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    interrupt.interrupt();
                    warn!(timeout_ms, "SQLite query exceeded its timeout, interrupted");
                    return Err(BackendError::Timeout { timeout_ms });
                }
            },
            None => task.await,
        };
        joined.map_err(join_error)?
    }

    async fn execute(&self, statement: &SqlQuery) -> BackendResult<u64> {
        let conn = self.get_connection()?;
        let sql = statement.sql.clone();
        let params: Vec<Value> = statement.params.iter().map(to_sql_value).collect();

        tokio::task::spawn_blocking(move || {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map(|affected| affected as u64)
                .map_err(BackendError::from)
        })
        .await
        .map_err(join_error)?
    }
}
