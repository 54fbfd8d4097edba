//! PostgreSQL schema definitions and migrations.

use crate::error::{BackendError, BackendResult};
use crate::sql::{DATE_FUNCTION, INSTANT_FUNCTION};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema.
pub async fn initialize_schema(client: &deadpool_postgres::Client) -> BackendResult<()> {
    let current_version = get_schema_version(client).await?;

    if current_version == 0 {
        create_schema_v1(client).await?;
        set_schema_version(client, 1).await?;
        migrate_schema(client, 1).await?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(client, current_version).await?;
    }

    tracing::debug!(version = SCHEMA_VERSION, "PostgreSQL schema ready");
    Ok(())
}

/// Get the current schema version.
async fn get_schema_version(client: &deadpool_postgres::Client) -> BackendResult<i32> {
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
            &[],
        )
        .await
        .map_err(|e| pg_error(format!("Failed to create schema_version table: {}", e)))?;

    let row = client
        .query_opt("SELECT version FROM schema_version LIMIT 1", &[])
        .await
        .map_err(|e| pg_error(format!("Failed to query schema version: {}", e)))?;

    Ok(row.map(|r| r.get::<_, i32>(0)).unwrap_or(0))
}

/// Set the schema version.
async fn set_schema_version(client: &deadpool_postgres::Client, version: i32) -> BackendResult<()> {
    client
        .execute("DELETE FROM schema_version", &[])
        .await
        .map_err(|e| pg_error(format!("Failed to clear schema_version: {}", e)))?;

    client
        .execute(
            "INSERT INTO schema_version (version) VALUES ($1)",
            &[&version],
        )
        .await
        .map_err(|e| pg_error(format!("Failed to set schema_version: {}", e)))?;

    Ok(())
}

/// Create the participant tables (version 1).
async fn create_schema_v1(client: &deadpool_postgres::Client) -> BackendResult<()> {
    let tables = [
        (
            "participant_user",
            "CREATE TABLE IF NOT EXISTS participant_user (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                username TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                last_login TIMESTAMP
            )",
        ),
        (
            "mailing_address",
            "CREATE TABLE IF NOT EXISTS mailing_address (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                street1 TEXT,
                city TEXT,
                state TEXT,
                postal_code TEXT,
                country TEXT
            )",
        ),
        (
            "profile",
            "CREATE TABLE IF NOT EXISTS profile (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                given_name TEXT,
                family_name TEXT,
                birth_date DATE,
                contact_email TEXT,
                phone_number TEXT,
                do_not_email BOOLEAN NOT NULL DEFAULT FALSE,
                sex_at_birth TEXT,
                mailing_address_id TEXT COLLATE \"C\" REFERENCES mailing_address(id)
            )",
        ),
        (
            "portal_participant_user",
            "CREATE TABLE IF NOT EXISTS portal_participant_user (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                participant_user_id TEXT COLLATE \"C\" NOT NULL REFERENCES participant_user(id),
                profile_id TEXT COLLATE \"C\" REFERENCES profile(id),
                created_at TIMESTAMP NOT NULL,
                last_login TIMESTAMP
            )",
        ),
        (
            "enrollee",
            "CREATE TABLE IF NOT EXISTS enrollee (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                shortcode TEXT NOT NULL,
                study_environment_id TEXT NOT NULL,
                participant_user_id TEXT COLLATE \"C\" REFERENCES participant_user(id),
                profile_id TEXT COLLATE \"C\" REFERENCES profile(id),
                subject BOOLEAN NOT NULL DEFAULT TRUE,
                consented BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP NOT NULL
            )",
        ),
        (
            "answer",
            "CREATE TABLE IF NOT EXISTS answer (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                enrollee_id TEXT COLLATE \"C\" NOT NULL REFERENCES enrollee(id),
                survey_stable_id TEXT NOT NULL,
                question_stable_id TEXT NOT NULL,
                string_value TEXT,
                created_at TIMESTAMP NOT NULL,
                UNIQUE (enrollee_id, survey_stable_id, question_stable_id)
            )",
        ),
        (
            "participant_task",
            "CREATE TABLE IF NOT EXISTS participant_task (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                enrollee_id TEXT COLLATE \"C\" NOT NULL REFERENCES enrollee(id),
                target_stable_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )",
        ),
        (
            "kit_request",
            "CREATE TABLE IF NOT EXISTS kit_request (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                enrollee_id TEXT COLLATE \"C\" NOT NULL REFERENCES enrollee(id),
                kit_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )",
        ),
        (
            "family",
            "CREATE TABLE IF NOT EXISTS family (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                shortcode TEXT NOT NULL,
                study_environment_id TEXT NOT NULL,
                proband_enrollee_id TEXT COLLATE \"C\" REFERENCES enrollee(id),
                created_at TIMESTAMP NOT NULL
            )",
        ),
        (
            "family_enrollee",
            "CREATE TABLE IF NOT EXISTS family_enrollee (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                family_id TEXT COLLATE \"C\" NOT NULL REFERENCES family(id),
                enrollee_id TEXT COLLATE \"C\" NOT NULL REFERENCES enrollee(id),
                created_at TIMESTAMP NOT NULL
            )",
        ),
        (
            "enrollee_relation",
            "CREATE TABLE IF NOT EXISTS enrollee_relation (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                enrollee_id TEXT COLLATE \"C\" NOT NULL REFERENCES enrollee(id),
                target_enrollee_id TEXT COLLATE \"C\" NOT NULL REFERENCES enrollee(id),
                relationship_type TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )",
        ),
        (
            "survey_question_definition",
            "CREATE TABLE IF NOT EXISTS survey_question_definition (
                id TEXT COLLATE \"C\" PRIMARY KEY,
                study_environment_id TEXT NOT NULL,
                survey_stable_id TEXT NOT NULL,
                question_stable_id TEXT NOT NULL,
                question_text TEXT,
                choices TEXT,
                UNIQUE (study_environment_id, survey_stable_id, question_stable_id)
            )",
        ),
    ];

    for (table, sql) in tables {
        client
            .execute(sql, &[])
            .await
            .map_err(|e| pg_error(format!("Failed to create {} table: {}", table, e)))?;
    }

    Ok(())
}

/// Run schema migrations from current version to latest.
async fn migrate_schema(client: &deadpool_postgres::Client, from_version: i32) -> BackendResult<()> {
    let mut version = from_version;

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(client).await?,
            2 => migrate_v2_to_v3(client).await?,
            _ => {
                return Err(BackendError::MigrationError {
                    message: format!("Unknown schema version: {}", version),
                });
            }
        }
        version += 1;
        set_schema_version(client, version).await?;
    }

    Ok(())
}

/// v1 -> v2: lookup indexes for search joins and context loading.
async fn migrate_v1_to_v2(client: &deadpool_postgres::Client) -> BackendResult<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_enrollee_env ON enrollee(study_environment_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_enrollee_profile ON enrollee(profile_id)",
        "CREATE INDEX IF NOT EXISTS idx_task_enrollee_target
         ON participant_task(enrollee_id, target_stable_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_kit_enrollee ON kit_request(enrollee_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_family_enrollee_enrollee
         ON family_enrollee(enrollee_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_relation_enrollee ON enrollee_relation(enrollee_id)",
        "CREATE INDEX IF NOT EXISTS idx_relation_target ON enrollee_relation(target_enrollee_id)",
        "CREATE INDEX IF NOT EXISTS idx_portal_user_profile
         ON portal_participant_user(profile_id, created_at)",
    ];

    for sql in &indexes {
        client
            .execute(*sql, &[])
            .await
            .map_err(|e| pg_error(format!("Migration v1->v2 failed: {}", e)))?;
    }

    Ok(())
}

/// Accepted date text, matching the `%Y-%m-%d` format string values parse with.
const DATE_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}$";

/// Accepted instant text: RFC 3339, a zone-less timestamp or a bare date.
const INSTANT_PATTERN: &str =
    r"^\d{4}-\d{2}-\d{2}([Tt ]\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:\d{2})?)?$";

/// The body of a lenient conversion: NULL for text outside `pattern` or that
/// the server rejects, so a bad stored value never fails a whole search.
fn lenient_cast_function(name: &str, returns: &str, pattern: &str, cast: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {name}(value TEXT) RETURNS {returns} AS $$
         DECLARE
             trimmed TEXT := btrim(value, E' \\t\\r\\n');
         BEGIN
             IF trimmed !~ '{pattern}' THEN
                 RETURN NULL;
             END IF;
             RETURN {cast};
         EXCEPTION WHEN OTHERS THEN
             RETURN NULL;
         END;
         $$ LANGUAGE plpgsql STABLE STRICT"
    )
}

/// v2 -> v3: lenient string to date/instant conversions used by comparisons
/// between text and temporal values.
async fn migrate_v2_to_v3(client: &deadpool_postgres::Client) -> BackendResult<()> {
    let functions = [
        lenient_cast_function(DATE_FUNCTION, "DATE", DATE_PATTERN, "CAST(trimmed AS DATE)"),
        lenient_cast_function(
            INSTANT_FUNCTION,
            "TIMESTAMP",
            INSTANT_PATTERN,
            "CAST(trimmed AS TIMESTAMPTZ) AT TIME ZONE 'UTC'",
        ),
    ];

    for sql in &functions {
        client
            .execute(sql.as_str(), &[])
            .await
            .map_err(|e| pg_error(format!("Migration v2->v3 failed: {}", e)))?;
    }

    Ok(())
}

fn pg_error(message: String) -> BackendError {
    BackendError::MigrationError { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_cast_function_sql() {
        let sql = lenient_cast_function(DATE_FUNCTION, "DATE", DATE_PATTERN, "CAST(trimmed AS DATE)");
        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION search_date(value TEXT) RETURNS DATE"));
        assert!(sql.contains(r"IF trimmed !~ '^\d{4}-\d{2}-\d{2}$' THEN"));
        assert!(sql.contains("EXCEPTION WHEN OTHERS THEN"));
        assert!(sql.ends_with("LANGUAGE plpgsql STABLE STRICT"));
    }
}
