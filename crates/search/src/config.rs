//! Search service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied by the search service.
///
/// ```
/// use cohort_search::config::SearchConfig;
///
/// let config: SearchConfig = serde_json::from_str(r#"{"max_limit": 50}"#).unwrap();
/// assert_eq!(config.max_limit, Some(50));
/// assert_eq!(config.query_timeout_ms, 30_000);
///
/// // With no cap and no default, a search without a limit returns every row.
/// let unbounded: SearchConfig = serde_json::from_str(r#"{"max_limit": null}"#).unwrap();
/// assert_eq!(unbounded.effective_limit(None), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// How long one compiled search may run before it is cancelled.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Row limit used when the caller asks for none.
    #[serde(default)]
    pub default_limit: Option<usize>,

    /// Upper bound on any requested limit. `None` allows unlimited searches.
    #[serde(default = "default_max_limit")]
    pub max_limit: Option<usize>,
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_max_limit() -> Option<usize> {
    Some(10_000)
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            default_limit: None,
            max_limit: default_max_limit(),
        }
    }
}

impl SearchConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// The limit to apply for a request: the requested one, else
    /// `default_limit`, capped at `max_limit`. `None` means no LIMIT clause.
    pub fn effective_limit(&self, requested: Option<usize>) -> Option<usize> {
        match (requested.or(self.default_limit), self.max_limit) {
            (Some(limit), Some(max)) => Some(limit.min(max)),
            (Some(limit), None) => Some(limit),
            (None, max) => max,
        }
    }
}
