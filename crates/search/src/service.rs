//! The entry point callers use to run search rules.
//!
//! [`EnrolleeSearchService`] ties together the rule parser, the participant
//! store and the search configuration. It is cheap to clone; clones share the
//! store and the term registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::context::EnrolleeSearchContext;
use crate::error::{SearchError, SearchResult};
use crate::expression::{EnrolleeSearchExpression, EnrolleeSearchExpressionParser};
use crate::model::StudyEnvironmentId;
use crate::store::{ParticipantStore, SqlExecutor};
use crate::term::TermRegistry;
use crate::value::SearchValueTypeDefinition;

pub use crate::store::EnrolleeSearchRow;

/// Per-request search options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolleeSearchOptions {
    /// Maximum number of rows. Falls back to the configured default and is
    /// always capped at the configured maximum.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EnrolleeSearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Parses, compiles and runs enrollee search rules.
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "sqlite")]
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use cohort_search::backends::sqlite::SqliteBackend;
/// use cohort_search::model::StudyEnvironmentId;
/// use cohort_search::service::{EnrolleeSearchOptions, EnrolleeSearchService};
///
/// let backend = SqliteBackend::in_memory()?;
/// backend.init_schema()?;
///
/// let service = EnrolleeSearchService::with_defaults(backend);
/// let rows = service
///     .execute_search_expression(
///         &StudyEnvironmentId::new("heartdemo-sandbox"),
///         "{age} > 18",
///         EnrolleeSearchOptions::default(),
///     )
///     .await?;
/// println!("{} enrollees", rows.len());
/// # Ok(())
/// # }
/// ```
pub struct EnrolleeSearchService<E> {
    store: Arc<ParticipantStore<E>>,
    parser: EnrolleeSearchExpressionParser,
    config: Arc<SearchConfig>,
}

impl<E> Clone for EnrolleeSearchService<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            parser: self.parser.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E: SqlExecutor> std::fmt::Debug for EnrolleeSearchService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrolleeSearchService")
            .field("executor", self.store.executor())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: SqlExecutor> EnrolleeSearchService<E> {
    /// Creates a service over an executor with an explicit registry and
    /// configuration.
    pub fn new(executor: E, registry: Arc<TermRegistry>, config: SearchConfig) -> Self {
        Self {
            store: Arc::new(ParticipantStore::new(executor)),
            parser: EnrolleeSearchExpressionParser::new(registry),
            config: Arc::new(config),
        }
    }

    /// Creates a service with the built-in resolvers and default limits.
    pub fn with_defaults(executor: E) -> Self {
        Self::new(
            executor,
            Arc::new(TermRegistry::with_defaults()),
            SearchConfig::default(),
        )
    }

    pub fn store(&self) -> &ParticipantStore<E> {
        &self.store
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn registry(&self) -> &TermRegistry {
        self.parser.registry()
    }

    /// Parses and type-checks a rule without touching the database.
    pub fn parse_rule(&self, rule: &str) -> SearchResult<EnrolleeSearchExpression> {
        self.parser.parse_rule(rule)
    }

    /// Every variable a rule may use in the environment, with its kind.
    ///
    /// Regenerated on every call from the environment's current questions
    /// and task targets.
    pub async fn facets(
        &self,
        study_env: &StudyEnvironmentId,
    ) -> SearchResult<BTreeMap<String, SearchValueTypeDefinition>> {
        let catalog = self.store.catalog(study_env).await?;
        let facets = self.registry().facets(&catalog);
        debug!(study_env = %study_env, facets = facets.len(), "Generated search facets");
        Ok(facets)
    }

    /// Runs a rule against the database and returns the matching enrollees,
    /// newest first.
    ///
    /// Failures raised by the database while running the compiled statement,
    /// including timeouts, are reported as
    /// [`SearchError::InvalidSearchExpression`].
    pub async fn execute_search_expression(
        &self,
        study_env: &StudyEnvironmentId,
        rule: &str,
        options: EnrolleeSearchOptions,
    ) -> SearchResult<Vec<EnrolleeSearchRow>> {
        let expression = self.parse_rule(rule)?;
        let limit = self.config.effective_limit(options.limit);
        let query = expression.compile(study_env, self.store.dialect(), limit);
        debug!(
            study_env = %study_env,
            sql = %query.query.sql,
            params = query.query.params.len(),
            "Compiled search rule"
        );

        let started = Instant::now();
        let rows = self
            .store
            .search(&query, Some(self.config.query_timeout()))
            .await
            .map_err(|e| {
                warn!(study_env = %study_env, rule = %rule, error = %e, "Search execution failed");
                SearchError::from_execution(e)
            })?;

        info!(
            study_env = %study_env,
            params = query.query.params.len(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Executed search rule"
        );
        Ok(rows)
    }

    /// Evaluates a rule in memory against one enrollee.
    pub async fn evaluate_enrollee(&self, enrollee_id: &str, rule: &str) -> SearchResult<bool> {
        let expression = self.parse_rule(rule)?;
        let context = self.store.load_context(enrollee_id).await?.ok_or_else(|| {
            SearchError::EnrolleeNotFound {
                enrollee_id: enrollee_id.to_string(),
            }
        })?;
        Ok(expression.evaluate(&context)?)
    }

    /// Evaluates a rule in memory against every enrollee of an environment.
    ///
    /// Returns the matching contexts in the same order the database search
    /// uses.
    pub async fn find_matching_in_memory(
        &self,
        study_env: &StudyEnvironmentId,
        rule: &str,
    ) -> SearchResult<Vec<EnrolleeSearchContext>> {
        let expression = self.parse_rule(rule)?;
        let started = Instant::now();
        let contexts = self.store.load_contexts(study_env).await?;
        let total = contexts.len();

        let mut matching = Vec::new();
        for context in contexts {
            if expression.evaluate(&context)? {
                matching.push(context);
            }
        }

        debug!(
            study_env = %study_env,
            evaluated = total,
            matched = matching.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Evaluated search rule in memory"
        );
        Ok(matching)
    }
}
