//! Scalar functions registered on every SQLite connection.
//!
//! SQLite's `LOWER` only folds ASCII and its `date()` accepts formats (Julian
//! day numbers, trailing modifiers) that string values never parse from.
//! These replacements run the same Rust code as in-memory evaluation.

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::sql::{DATE_FUNCTION, INSTANT_FUNCTION, LOWER_FUNCTION, SQLITE_INSTANT_FORMAT};
use crate::value::{DATE_FORMAT, SearchValue, SearchValueKind};

/// Registers the search functions on a connection.
pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function(LOWER_FUNCTION, 1, flags, search_lower)?;
    conn.create_scalar_function(DATE_FUNCTION, 1, flags, search_date)?;
    conn.create_scalar_function(INSTANT_FUNCTION, 1, flags, search_instant)?;
    Ok(())
}

fn text_arg(ctx: &Context<'_>) -> Option<String> {
    match ctx.get_raw(0) {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn search_lower(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(text_arg(ctx).map(|s| s.to_lowercase()))
}

fn search_date(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(parse_text(ctx, SearchValueKind::Date).and_then(|value| match value {
        SearchValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        _ => None,
    }))
}

fn search_instant(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(parse_text(ctx, SearchValueKind::Instant).and_then(|value| match value {
        SearchValue::Instant(t) => Some(t.format(SQLITE_INSTANT_FORMAT).to_string()),
        _ => None,
    }))
}

fn parse_text(ctx: &Context<'_>, target: SearchValueKind) -> Option<SearchValue> {
    text_arg(ctx).and_then(|s| SearchValue::String(s).parse_to(target).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        conn
    }

    fn scalar(conn: &Connection, sql: &str) -> Option<String> {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_lower_folds_unicode() {
        let conn = conn();
        assert_eq!(scalar(&conn, "SELECT search_lower('ÉMILE Ørsted')").as_deref(), Some("émile ørsted"));
        assert_eq!(scalar(&conn, "SELECT LOWER('ÉMILE')").as_deref(), Some("Émile"));
        assert_eq!(scalar(&conn, "SELECT search_lower(NULL)"), None);
    }

    #[test]
    fn test_date_accepts_only_search_formats() {
        let conn = conn();
        assert_eq!(scalar(&conn, "SELECT search_date(' 2023-03-04 ')").as_deref(), Some("2023-03-04"));
        assert_eq!(scalar(&conn, "SELECT search_date('soon')"), None);
        assert_eq!(scalar(&conn, "SELECT search_date('2023-02-30')"), None);
        // SQLite's own date() reads this as a Julian day number.
        assert_eq!(scalar(&conn, "SELECT search_date('2460000')"), None);
    }

    #[test]
    fn test_instant_normalizes_to_utc_storage_format() {
        let conn = conn();
        assert_eq!(
            scalar(&conn, "SELECT search_instant('2024-01-01T12:30:00+02:00')").as_deref(),
            Some("2024-01-01 10:30:00.000")
        );
        assert_eq!(
            scalar(&conn, "SELECT search_instant('2024-01-01')").as_deref(),
            Some("2024-01-01 00:00:00.000")
        );
        assert_eq!(scalar(&conn, "SELECT search_instant('later')"), None);
    }
}
