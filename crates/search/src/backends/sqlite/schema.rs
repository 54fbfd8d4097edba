//! SQLite schema definitions and migrations.

use rusqlite::Connection;

use crate::error::{BackendError, BackendResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

fn migration_error(step: &str, err: rusqlite::Error) -> BackendError {
    BackendError::MigrationError {
        message: format!("{}: {}", step, err),
    }
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> BackendResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate_schema(conn, 1)?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(conn, current_version)?;
    }

    tracing::debug!(version = SCHEMA_VERSION, "SQLite schema ready");
    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> BackendResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("Failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> BackendResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| migration_error("Failed to clear schema_version", e))?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )
    .map_err(|e| migration_error("Failed to set schema_version", e))?;
    Ok(())
}

/// Create the participant tables.
fn create_schema_v1(conn: &Connection) -> BackendResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS participant_user (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_login TEXT
        );

        CREATE TABLE IF NOT EXISTS mailing_address (
            id TEXT PRIMARY KEY,
            street1 TEXT,
            city TEXT,
            state TEXT,
            postal_code TEXT,
            country TEXT
        );

        CREATE TABLE IF NOT EXISTS profile (
            id TEXT PRIMARY KEY,
            given_name TEXT,
            family_name TEXT,
            birth_date TEXT,
            contact_email TEXT,
            phone_number TEXT,
            do_not_email INTEGER NOT NULL DEFAULT 0,
            sex_at_birth TEXT,
            mailing_address_id TEXT REFERENCES mailing_address(id)
        );

        CREATE TABLE IF NOT EXISTS portal_participant_user (
            id TEXT PRIMARY KEY,
            participant_user_id TEXT NOT NULL REFERENCES participant_user(id),
            profile_id TEXT REFERENCES profile(id),
            created_at TEXT NOT NULL,
            last_login TEXT
        );

        CREATE TABLE IF NOT EXISTS enrollee (
            id TEXT PRIMARY KEY,
            shortcode TEXT NOT NULL,
            study_environment_id TEXT NOT NULL,
            participant_user_id TEXT REFERENCES participant_user(id),
            profile_id TEXT REFERENCES profile(id),
            subject INTEGER NOT NULL DEFAULT 1,
            consented INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS answer (
            id TEXT PRIMARY KEY,
            enrollee_id TEXT NOT NULL REFERENCES enrollee(id),
            survey_stable_id TEXT NOT NULL,
            question_stable_id TEXT NOT NULL,
            string_value TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (enrollee_id, survey_stable_id, question_stable_id)
        );

        CREATE TABLE IF NOT EXISTS participant_task (
            id TEXT PRIMARY KEY,
            enrollee_id TEXT NOT NULL REFERENCES enrollee(id),
            target_stable_id TEXT NOT NULL,
            task_type TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kit_request (
            id TEXT PRIMARY KEY,
            enrollee_id TEXT NOT NULL REFERENCES enrollee(id),
            kit_type TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS family (
            id TEXT PRIMARY KEY,
            shortcode TEXT NOT NULL,
            study_environment_id TEXT NOT NULL,
            proband_enrollee_id TEXT REFERENCES enrollee(id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS family_enrollee (
            id TEXT PRIMARY KEY,
            family_id TEXT NOT NULL REFERENCES family(id),
            enrollee_id TEXT NOT NULL REFERENCES enrollee(id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS enrollee_relation (
            id TEXT PRIMARY KEY,
            enrollee_id TEXT NOT NULL REFERENCES enrollee(id),
            target_enrollee_id TEXT NOT NULL REFERENCES enrollee(id),
            relationship_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS survey_question_definition (
            id TEXT PRIMARY KEY,
            study_environment_id TEXT NOT NULL,
            survey_stable_id TEXT NOT NULL,
            question_stable_id TEXT NOT NULL,
            question_text TEXT,
            choices TEXT,
            UNIQUE (study_environment_id, survey_stable_id, question_stable_id)
        );
        ",
    )
    .map_err(|e| migration_error("Failed to create participant tables", e))
}

/// Run schema migrations from current version to latest.
fn migrate_schema(conn: &Connection, from_version: i32) -> BackendResult<()> {
    let mut version = from_version;

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            _ => {
                return Err(BackendError::MigrationError {
                    message: format!("Unknown schema version: {}", version),
                });
            }
        }
        version += 1;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

/// Migrate from schema version 1 to version 2.
///
/// Adds the lookup indexes used by search joins and context loading.
fn migrate_v1_to_v2(conn: &Connection) -> BackendResult<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_enrollee_env
            ON enrollee(study_environment_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_enrollee_profile ON enrollee(profile_id);
        CREATE INDEX IF NOT EXISTS idx_task_enrollee_target
            ON participant_task(enrollee_id, target_stable_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_kit_enrollee ON kit_request(enrollee_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_family_enrollee_enrollee
            ON family_enrollee(enrollee_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_relation_enrollee ON enrollee_relation(enrollee_id);
        CREATE INDEX IF NOT EXISTS idx_relation_target ON enrollee_relation(target_enrollee_id);
        CREATE INDEX IF NOT EXISTS idx_portal_user_profile
            ON portal_participant_user(profile_id, created_at);
        ",
    )
    .map_err(|e| migration_error("Failed to create indexes", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = tables(&conn);
        for table in [
            "enrollee",
            "profile",
            "answer",
            "participant_task",
            "kit_request",
            "family_enrollee",
            "survey_question_definition",
            "schema_version",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrates_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        get_schema_version(&conn).unwrap();
        create_schema_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_enrollee_env'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
    }

    #[test]
    fn test_answers_are_unique_per_question() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO enrollee (id, shortcode, study_environment_id, created_at)
                 VALUES ('e1', 'AAA', 'env', '2024-01-01 00:00:00.000');
             INSERT INTO answer (id, enrollee_id, survey_stable_id, question_stable_id, created_at)
                 VALUES ('a1', 'e1', 'basics', 'diet', '2024-01-01 00:00:00.000');",
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO answer (id, enrollee_id, survey_stable_id, question_stable_id, created_at)
                 VALUES ('a2', 'e1', 'basics', 'diet', '2024-01-02 00:00:00.000')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
