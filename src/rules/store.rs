use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::domain::{AcademicRule, RuleCode, RuleConfiguration, RuleContext};
use crate::error::RepositoryError;

/// Storage abstraction for rule definitions and their context-scoped configurations.
pub trait RuleStore: Send + Sync {
    /// Fetch a rule by code, including retired rules.
    fn rule(&self, code: &RuleCode) -> Result<Option<AcademicRule>, RepositoryError>;
    fn rules(&self) -> Result<Vec<AcademicRule>, RepositoryError>;
    fn upsert_rule(&self, rule: AcademicRule) -> Result<(), RepositoryError>;
    fn configurations(&self, code: &RuleCode) -> Result<Vec<RuleConfiguration>, RepositoryError>;
    /// Insert or replace the configuration keyed by (rule, session, program, department).
    fn upsert_configuration(
        &self,
        configuration: RuleConfiguration,
    ) -> Result<RuleConfiguration, RepositoryError>;
    fn remove_configuration(
        &self,
        code: &RuleCode,
        context: &RuleContext,
    ) -> Result<Option<RuleConfiguration>, RepositoryError>;
}

#[derive(Debug, Default)]
struct RuleTables {
    rules: BTreeMap<RuleCode, AcademicRule>,
    configurations: Vec<RuleConfiguration>,
}

/// Process-local rule store used by hosts without a database and by tests.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    tables: Mutex<RuleTables>,
}

impl InMemoryRuleStore {
    pub fn with_rules(rules: impl IntoIterator<Item = AcademicRule>) -> Self {
        Self::from_parts(rules, Vec::new())
    }

    pub fn from_parts(
        rules: impl IntoIterator<Item = AcademicRule>,
        configurations: Vec<RuleConfiguration>,
    ) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| (rule.code.clone(), rule))
            .collect();
        Self {
            tables: Mutex::new(RuleTables {
                rules,
                configurations,
            }),
        }
    }

    /// Copy out every rule and configuration, e.g. for persisting a dataset.
    pub fn export(&self) -> Result<(Vec<AcademicRule>, Vec<RuleConfiguration>), RepositoryError> {
        let tables = self.lock()?;
        Ok((
            tables.rules.values().cloned().collect(),
            tables.configurations.clone(),
        ))
    }

    fn lock(&self) -> Result<MutexGuard<'_, RuleTables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("rule store mutex poisoned".to_string()))
    }
}

impl RuleStore for InMemoryRuleStore {
    fn rule(&self, code: &RuleCode) -> Result<Option<AcademicRule>, RepositoryError> {
        Ok(self.lock()?.rules.get(code).cloned())
    }

    fn rules(&self) -> Result<Vec<AcademicRule>, RepositoryError> {
        Ok(self.lock()?.rules.values().cloned().collect())
    }

    fn upsert_rule(&self, rule: AcademicRule) -> Result<(), RepositoryError> {
        self.lock()?.rules.insert(rule.code.clone(), rule);
        Ok(())
    }

    fn configurations(&self, code: &RuleCode) -> Result<Vec<RuleConfiguration>, RepositoryError> {
        Ok(self
            .lock()?
            .configurations
            .iter()
            .filter(|configuration| &configuration.rule_code == code)
            .cloned()
            .collect())
    }

    fn upsert_configuration(
        &self,
        configuration: RuleConfiguration,
    ) -> Result<RuleConfiguration, RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.rules.contains_key(&configuration.rule_code) {
            return Err(RepositoryError::NotFound(configuration.rule_code.0.clone()));
        }

        match tables.configurations.iter_mut().find(|existing| {
            existing.rule_code == configuration.rule_code
                && existing.context == configuration.context
        }) {
            Some(existing) => *existing = configuration.clone(),
            None => tables.configurations.push(configuration.clone()),
        }
        Ok(configuration)
    }

    fn remove_configuration(
        &self,
        code: &RuleCode,
        context: &RuleContext,
    ) -> Result<Option<RuleConfiguration>, RepositoryError> {
        let mut tables = self.lock()?;
        let position = tables
            .configurations
            .iter()
            .position(|existing| &existing.rule_code == code && &existing.context == context);
        Ok(position.map(|index| tables.configurations.remove(index)))
    }
}
