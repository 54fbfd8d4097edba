//! Ordered registry of term resolvers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ExpressionError, ExpressionResult};
use crate::model::StudyEnvironmentCatalog;
use crate::value::SearchValueTypeDefinition;

use super::SearchTerm;
use super::age::AgeTermResolver;
use super::answer::AnswerTermResolver;
use super::enrollee::EnrolleeTermResolver;
use super::family::FamilyTermResolver;
use super::kit::KitTermResolver;
use super::profile::ProfileTermResolver;
use super::task::TaskTermResolver;
use super::user::{PortalUserTermResolver, UserTermResolver};

/// Resolves the variables of one schema area.
pub trait TermResolver: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns true if the variable belongs to this resolver's namespace.
    fn matches(&self, variable: &str) -> bool;

    /// Builds the term for a matching variable. Fails with
    /// [`ExpressionError::UnknownVariable`] if the namespace matches but the
    /// field does not exist.
    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>>;

    /// Describes every variable this resolver offers in an environment.
    fn facets(&self, catalog: &StudyEnvironmentCatalog)
    -> BTreeMap<String, SearchValueTypeDefinition>;
}

pub(crate) fn unknown_variable(variable: &str) -> ExpressionError {
    ExpressionError::UnknownVariable {
        variable: variable.to_string(),
    }
}

/// The resolvers consulted, in order, when a rule names a variable.
#[derive(Debug)]
pub struct TermRegistry {
    resolvers: Vec<Box<dyn TermResolver>>,
}

impl TermRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Creates a registry with every built-in resolver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EnrolleeTermResolver);
        registry.register(ProfileTermResolver);
        registry.register(AgeTermResolver);
        registry.register(AnswerTermResolver);
        registry.register(TaskTermResolver);
        registry.register(KitTermResolver);
        registry.register(FamilyTermResolver);
        registry.register(UserTermResolver);
        registry.register(PortalUserTermResolver);
        registry
    }

    /// Appends a resolver. Earlier resolvers win when namespaces overlap.
    pub fn register(&mut self, resolver: impl TermResolver + 'static) {
        self.resolvers.push(Box::new(resolver));
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Names of the registered resolvers, in resolution order.
    pub fn resolver_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Resolves a variable with the first matching resolver.
    pub fn resolve(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.matches(variable))
            .ok_or_else(|| unknown_variable(variable))?;
        tracing::trace!(variable, resolver = resolver.name(), "Resolving search variable");
        resolver.resolve_variable(variable)
    }

    /// Aggregates the facets of every resolver.
    pub fn facets(
        &self,
        catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        let mut facets = BTreeMap::new();
        for resolver in &self.resolvers {
            for (key, definition) in resolver.facets(catalog) {
                facets.entry(key).or_insert(definition);
            }
        }
        facets
    }
}

impl Default for TermRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionDefinition, StudyEnvironmentId};
    use crate::value::SearchValueKind;

    fn catalog() -> StudyEnvironmentCatalog {
        StudyEnvironmentCatalog {
            questions: vec![QuestionDefinition {
                id: "q1".to_string(),
                study_environment_id: StudyEnvironmentId::new("env"),
                survey_stable_id: "basics".to_string(),
                question_stable_id: "diet".to_string(),
                question_text: Some("What do you eat?".to_string()),
                choices: vec![],
            }],
            task_targets: vec!["consent".to_string()],
        }
    }

    #[test]
    fn test_default_resolution_order() {
        let registry = TermRegistry::with_defaults();
        assert_eq!(
            registry.resolver_names(),
            vec![
                "enrollee",
                "profile",
                "age",
                "answer",
                "task",
                "kit",
                "family",
                "user",
                "portalUser"
            ]
        );
    }

    #[test]
    fn test_unknown_namespace() {
        let registry = TermRegistry::with_defaults();
        let err = registry.resolve("nonexistent.field").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::UnknownVariable {
                variable: "nonexistent.field".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_field_in_known_namespace() {
        let registry = TermRegistry::with_defaults();
        assert!(matches!(
            registry.resolve("profile.shoeSize"),
            Err(ExpressionError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        let registry = TermRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve("age").is_err());
    }

    #[test]
    fn test_facets_cover_every_namespace() {
        let facets = TermRegistry::with_defaults().facets(&catalog());
        for key in [
            "enrollee.shortcode",
            "enrolledDate",
            "profile.givenName",
            "profile.mailingAddress.city",
            "age",
            "answer.basics.diet",
            "task.consent.status",
            "kit.latest.status",
            "family.isProband",
            "user.username",
            "portalUser.lastLogin",
        ] {
            assert!(facets.contains_key(key), "missing facet {}", key);
        }
        assert_eq!(facets["age"].kind, SearchValueKind::Number);
        assert_eq!(
            facets["answer.basics.diet"].description.as_deref(),
            Some("What do you eat?")
        );
    }

    #[test]
    fn test_every_facet_resolves() {
        let registry = TermRegistry::with_defaults();
        for (key, definition) in registry.facets(&catalog()) {
            let term = registry
                .resolve(&key)
                .unwrap_or_else(|e| panic!("facet {} does not resolve: {}", key, e));
            assert_eq!(term.kind(), Some(definition.kind), "kind mismatch for {}", key);
        }
    }

    #[test]
    fn test_facets_are_idempotent() {
        let registry = TermRegistry::with_defaults();
        assert_eq!(registry.facets(&catalog()), registry.facets(&catalog()));
    }
}
