//! PostgreSQL backend integration tests.
//!
//! Configuration tests run without a database. The integration module spins
//! up PostgreSQL with testcontainers and requires Docker.
//!
//! Run with: `cargo test -p cohort-search --features postgres -- postgres`

#![cfg(feature = "postgres")]

mod common;

use cohort_search::backends::postgres::{PostgresConfig, PostgresSslMode};

// ============================================================================
// Backend Configuration Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_config_defaults() {
    let config = PostgresConfig::default();
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 5432);
    assert_eq!(config.dbname, "cohort");
    assert_eq!(config.user, "cohort");
    assert!(config.password.is_none());
    assert_eq!(config.ssl_mode, PostgresSslMode::Prefer);
    assert_eq!(config.max_connections, 10);
    assert_eq!(config.connect_timeout_secs, 5);
    assert_eq!(config.statement_timeout_ms, 30000);
}

#[test]
fn test_postgres_config_serde() {
    let config: PostgresConfig =
        serde_json::from_str(r#"{"host": "db", "ssl_mode": "require"}"#).unwrap();
    assert_eq!(config.host, "db");
    assert_eq!(config.ssl_mode, PostgresSslMode::Require);
    assert_eq!(config.port, 5432);
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

/// Run with:
///   cargo test -p cohort-search --features postgres -- postgres_integration
///
/// Skip if no Docker:
///   cargo test -p cohort-search --features postgres -- --skip postgres_integration
#[cfg(test)]
mod postgres_integration {
    use std::time::Duration;

    use cohort_search::backends::postgres::{PostgresBackend, PostgresConfig};
    use cohort_search::error::{BackendError, SearchError};
    use cohort_search::model::StudyEnvironmentId;
    use cohort_search::service::{EnrolleeSearchOptions, EnrolleeSearchService};
    use cohort_search::sql::{ColumnType, SqlQuery};
    use cohort_search::store::SqlExecutor;
    use cohort_search::value::SearchValueKind;

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use tokio::sync::OnceCell;

    use super::common::*;

    const ENV: &str = "heartdemo-live";

    /// Shared PostgreSQL container reused across all tests in this module.
    struct SharedPg {
        host: String,
        port: u16,
        /// Kept alive for the duration of the test binary; dropped at process exit.
        _container: testcontainers::ContainerAsync<Postgres>,
    }

    static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

    fn config_for(host: &str, port: u16) -> PostgresConfig {
        PostgresConfig {
            host: host.to_string(),
            port,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: Some("postgres".to_string()),
            max_connections: 5,
            ..Default::default()
        }
    }

    async fn shared_pg() -> &'static SharedPg {
        SHARED_PG
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = Postgres::default()
                    .with_label("github.run_id", &run_id)
                    .start()
                    .await
                    .expect("Failed to start PostgreSQL container");

                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("Failed to get host port");

                let host = container
                    .get_host()
                    .await
                    .expect("Failed to get host")
                    .to_string();

                // Schema and cohort are written once; tests only read.
                let backend = PostgresBackend::new(config_for(&host, port))
                    .await
                    .expect("Failed to create PostgresBackend");
                backend
                    .init_schema()
                    .await
                    .expect("Failed to initialize schema");
                let service = EnrolleeSearchService::with_defaults(backend);
                seed_cohort(&service.store().writer(), &StudyEnvironmentId::new(ENV)).await;

                SharedPg {
                    host,
                    port,
                    _container: container,
                }
            })
            .await
    }

    async fn create_service() -> EnrolleeSearchService<PostgresBackend> {
        let pg = shared_pg().await;
        let backend = PostgresBackend::new(config_for(&pg.host, pg.port))
            .await
            .expect("Failed to create PostgresBackend");
        EnrolleeSearchService::with_defaults(backend)
    }

    async fn sql_ids(service: &EnrolleeSearchService<PostgresBackend>, rule: &str) -> Vec<String> {
        service
            .execute_search_expression(
                &StudyEnvironmentId::new(ENV),
                rule,
                EnrolleeSearchOptions::default(),
            )
            .await
            .unwrap_or_else(|e| panic!("rule {:?} failed in SQL: {}", rule, e))
            .into_iter()
            .map(|row| row.enrollee.id)
            .collect()
    }

    async fn memory_ids(
        service: &EnrolleeSearchService<PostgresBackend>,
        rule: &str,
    ) -> Vec<String> {
        service
            .find_matching_in_memory(&StudyEnvironmentId::new(ENV), rule)
            .await
            .unwrap_or_else(|e| panic!("rule {:?} failed in memory: {}", rule, e))
            .into_iter()
            .map(|context| context.enrollee.id)
            .collect()
    }

    #[tokio::test]
    async fn postgres_integration_init_schema_is_idempotent() {
        let service = create_service().await;
        service.store().executor().init_schema().await.unwrap();
        service.store().executor().init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn postgres_integration_age_and_name_scenario() {
        let service = create_service().await;

        let ids = sql_ids(&service, "{age} > 18 and {profile.givenName} contains 'Jo'").await;
        assert_eq!(ids, vec![JONAS, JOSEPHINE]);
        assert!(service.evaluate_enrollee(JONAS, "{age} > 18").await.unwrap());
        assert!(!service.evaluate_enrollee(EVE, "{age} > 18").await.unwrap());
    }

    #[tokio::test]
    async fn postgres_integration_sql_matches_in_memory_for_every_rule() {
        let service = create_service().await;

        for rule in EQUIVALENCE_RULES {
            let from_sql = sql_ids(&service, rule).await;
            let from_memory = memory_ids(&service, rule).await;
            assert_eq!(from_sql, from_memory, "rule {:?} disagrees", rule);
        }
    }

    #[tokio::test]
    async fn postgres_integration_instants_round_trip_in_utc() {
        let service = create_service().await;

        let context = service.store().load_context(MIRA).await.unwrap().unwrap();
        assert_eq!(context.enrollee.created_at, instant(2023, 12, 31, 23, 59, 59));

        let rows = service
            .execute_search_expression(
                &StudyEnvironmentId::new(ENV),
                "include 'e-mira'",
                EnrolleeSearchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(rows[0].enrollee, context.enrollee);
    }

    #[tokio::test]
    async fn postgres_integration_lenient_temporal_conversions() {
        let service = create_service().await;
        let rows = service
            .store()
            .executor()
            .query(
                &SqlQuery {
                    sql: "SELECT search_date('soon'), search_date(' 2023-03-04 '), \
                          search_date('2023-02-30'), \
                          search_instant('2024-01-01T12:30:00+02:00'), search_instant('later')"
                        .to_string(),
                    params: Vec::new(),
                },
                &[
                    ColumnType::Date,
                    ColumnType::Date,
                    ColumnType::Date,
                    ColumnType::Timestamp,
                    ColumnType::Timestamp,
                ],
                None,
            )
            .await
            .unwrap();
        let row = &rows[0];
        assert_eq!(row.opt_date(0).unwrap(), None);
        assert_eq!(
            row.opt_date(1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2023, 3, 4)
        );
        assert_eq!(row.opt_date(2).unwrap(), None);
        assert_eq!(row.opt_timestamp(3).unwrap(), Some(instant(2024, 1, 1, 10, 30, 0)));
        assert_eq!(row.opt_timestamp(4).unwrap(), None);
    }

    #[tokio::test]
    async fn postgres_integration_facets() {
        let service = create_service().await;

        let facets = service.facets(&StudyEnvironmentId::new(ENV)).await.unwrap();
        assert_eq!(facets["answer.basics.diet"].choices.len(), 2);
        assert_eq!(facets["task.demographics.status"].kind, SearchValueKind::String);
        assert_eq!(facets["family.count"].kind, SearchValueKind::Number);
    }

    #[tokio::test]
    async fn postgres_integration_timeout_cancels_statement() {
        let pg = shared_pg().await;
        let backend = PostgresBackend::new(config_for(&pg.host, pg.port))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = backend
            .query(
                &SqlQuery {
                    sql: "SELECT pg_sleep(10)".to_string(),
                    params: Vec::new(),
                },
                &[],
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { timeout_ms: 200 }));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The pool still hands out working connections.
        let service = EnrolleeSearchService::with_defaults(backend);
        assert!(service.store().load_context(JONAS).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn postgres_integration_timeout_is_reported_as_invalid_expression() {
        let pg = shared_pg().await;
        let config = PostgresConfig {
            statement_timeout_ms: 1,
            ..config_for(&pg.host, pg.port)
        };
        let backend = PostgresBackend::new(config).await.unwrap();
        let err = backend
            .query(
                &SqlQuery {
                    sql: "SELECT pg_sleep(1)".to_string(),
                    params: Vec::new(),
                },
                &[],
                None,
            )
            .await
            .unwrap_err();
        let err = SearchError::from_execution(err);
        assert!(
            matches!(err, SearchError::InvalidSearchExpression { ref message } if message.contains("cancelled")),
            "unexpected error: {}",
            err
        );
    }
}
