use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use super::cache::{ResolvedRule, RuleCache, RuleCacheKey};
use super::domain::{
    AcademicRule, ConfigurationChange, RuleCategory, RuleCode, RuleConfiguration, RuleContext,
};
use super::store::RuleStore;
use super::value::{ConstraintViolation, RuleValue, ValueParseError, ValueType};
use crate::audit::{self, ActorId, AuditSink};
use crate::clock::Clock;
use crate::error::{ErrorKind, RepositoryError};

/// Every constraint a proposed value violates.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("value for {code} violates {} constraint(s): {}", .violations.len(), summarize(.violations))]
pub struct RuleValidationError {
    pub code: RuleCode,
    pub violations: Vec<ConstraintViolation>,
}

fn summarize(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule {0} is not defined or not in force")]
    NotFound(RuleCode),
    #[error("invalid value for rule {code}: {source}")]
    InvalidRuleValue {
        code: RuleCode,
        #[source]
        source: ValueParseError,
    },
    #[error("rule {code} resolved to a {found} value, expected {expected}")]
    TypeMismatch {
        code: RuleCode,
        expected: &'static str,
        found: ValueType,
    },
    #[error(transparent)]
    Validation(#[from] RuleValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl RuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuleError::NotFound(_) => ErrorKind::NotFound,
            RuleError::InvalidRuleValue { .. }
            | RuleError::TypeMismatch { .. }
            | RuleError::Validation(_) => ErrorKind::Validation,
            RuleError::Repository(err) => err.kind(),
        }
    }
}

/// Resolves the effective, typed value of a rule for a context.
///
/// Lookup order is exact context, then session-only, then global; the first effective
/// configuration wins and levels are never merged. Resolutions are cached per
/// (code, context) and writes invalidate every cached context their scope participates in.
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    cache: Arc<dyn RuleCache>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl RuleEngine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        cache: Arc<dyn RuleCache>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            audit,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolve the in-force rule and its winning configuration for `context`.
    pub fn resolve(&self, code: &str, context: &RuleContext) -> Result<ResolvedRule, RuleError> {
        let key = RuleCacheKey::new(RuleCode::new(code), context.clone());
        if let Some(hit) = self.cache.get(&key) {
            debug!(rule = code, "rule cache hit");
            return Ok(hit);
        }

        let today = self.clock.today();
        let rule = self
            .store
            .rule(&key.code)?
            .filter(|rule| rule.is_in_force(today))
            .ok_or_else(|| RuleError::NotFound(key.code.clone()))?;

        let configurations = self.store.configurations(&key.code)?;
        let configuration = context.resolution_levels().into_iter().find_map(|level| {
            configurations
                .iter()
                .find(|candidate| candidate.context == level && candidate.is_effective(today))
                .cloned()
        });

        debug!(
            rule = code,
            configured = configuration.is_some(),
            "rule resolved from store"
        );

        let resolved = ResolvedRule {
            rule,
            configuration,
        };
        self.cache.set(key, resolved.clone());
        Ok(resolved)
    }

    pub fn get_rule(&self, code: &str, context: &RuleContext) -> Result<AcademicRule, RuleError> {
        self.resolve(code, context).map(|resolved| resolved.rule)
    }

    /// Typed value for `code`, or `None` when the rule is absent or holds no value.
    pub fn get_value(
        &self,
        code: &str,
        context: &RuleContext,
    ) -> Result<Option<RuleValue>, RuleError> {
        match self.resolve(code, context) {
            Ok(resolved) => Ok(resolved.value().cloned()),
            Err(RuleError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn get_boolean(
        &self,
        code: &str,
        context: &RuleContext,
        default: bool,
    ) -> Result<bool, RuleError> {
        self.typed(code, context, default, "boolean", RuleValue::as_bool)
    }

    pub fn get_integer(
        &self,
        code: &str,
        context: &RuleContext,
        default: i64,
    ) -> Result<i64, RuleError> {
        self.typed(code, context, default, "integer", RuleValue::as_i64)
    }

    pub fn get_decimal(
        &self,
        code: &str,
        context: &RuleContext,
        default: f64,
    ) -> Result<f64, RuleError> {
        self.typed(code, context, default, "decimal", RuleValue::as_f64)
    }

    pub fn get_string(
        &self,
        code: &str,
        context: &RuleContext,
        default: &str,
    ) -> Result<String, RuleError> {
        self.typed(code, context, default.to_string(), "string", |value| {
            Some(value.to_raw())
        })
    }

    pub fn get_array(
        &self,
        code: &str,
        context: &RuleContext,
        default: &[&str],
    ) -> Result<Vec<String>, RuleError> {
        let default = default.iter().map(|item| item.to_string()).collect();
        self.typed(code, context, default, "array", RuleValue::as_list)
    }

    fn typed<T>(
        &self,
        code: &str,
        context: &RuleContext,
        default: T,
        expected: &'static str,
        cast: impl Fn(&RuleValue) -> Option<T>,
    ) -> Result<T, RuleError> {
        let Some(value) = self.get_value(code, context)? else {
            return Ok(default);
        };

        cast(&value).ok_or_else(|| RuleError::TypeMismatch {
            code: RuleCode::new(code),
            expected,
            found: value.value_type(),
        })
    }

    /// In-force rules of a category, ordered by priority then display order.
    pub fn rules_by_category(
        &self,
        category: RuleCategory,
    ) -> Result<Vec<AcademicRule>, RuleError> {
        let today = self.clock.today();
        let mut rules: Vec<AcademicRule> = self
            .store
            .rules()?
            .into_iter()
            .filter(|rule| rule.category == category && rule.is_in_force(today))
            .collect();
        rules.sort_by_key(|rule| (rule.priority, rule.display_order));
        Ok(rules)
    }

    /// Decode and validate `raw` against the rule's declared type and constraints without
    /// storing anything.
    pub fn validate_value(&self, code: &str, raw: &str) -> Result<RuleValue, RuleError> {
        let rule = self.live_rule(code)?;
        let value = RuleValue::parse(rule.value_type, raw).map_err(|source| {
            RuleError::InvalidRuleValue {
                code: rule.code.clone(),
                source,
            }
        })?;

        let violations = rule.constraints().check(&value);
        if violations.is_empty() {
            Ok(value)
        } else {
            Err(RuleValidationError {
                code: rule.code,
                violations,
            }
            .into())
        }
    }

    /// Validate and upsert the configuration for (code, context), then invalidate the cached
    /// resolutions that configuration participates in.
    pub fn set_configuration(
        &self,
        code: &str,
        change: ConfigurationChange,
        actor: &ActorId,
    ) -> Result<RuleConfiguration, RuleError> {
        let rule = self.live_rule(code)?;

        let mut violations = Vec::new();
        let parsed = match RuleValue::parse(rule.value_type, &change.value) {
            Ok(value) => {
                violations.extend(rule.constraints().check(&value));
                Some(value)
            }
            Err(err) => {
                violations.push(ConstraintViolation::Undecodable {
                    reason: err.to_string(),
                });
                None
            }
        };

        let reason_missing = change
            .override_reason
            .as_deref()
            .map_or(true, |reason| reason.trim().is_empty());
        if change.is_override && reason_missing {
            violations.push(ConstraintViolation::MissingOverrideReason);
        }

        let value = match parsed {
            Some(value) if violations.is_empty() => value,
            _ => {
                return Err(RuleValidationError {
                    code: rule.code,
                    violations,
                }
                .into())
            }
        };

        let previous = self
            .store
            .configurations(&rule.code)?
            .into_iter()
            .find(|existing| existing.context == change.context);

        let configuration = RuleConfiguration {
            rule_code: rule.code.clone(),
            context: change.context,
            value,
            is_override: change.is_override,
            override_reason: change.override_reason,
            approved_by: change.approved_by,
            effective_from: change.effective_from,
            effective_to: change.effective_to,
            is_active: true,
            updated_by: actor.clone(),
            updated_at: self.clock.now(),
        };

        let stored = self.store.upsert_configuration(configuration)?;
        self.invalidate_scope(&stored.rule_code, &stored.context);

        info!(
            rule = %stored.rule_code,
            value = %stored.value,
            is_override = stored.is_override,
            "rule configuration saved"
        );
        audit::emit(
            self.audit.as_ref(),
            "rule.configured",
            actor,
            stored.rule_code.0.clone(),
            audit::snapshot(&previous),
            audit::snapshot(&stored),
            self.clock.now(),
        );

        Ok(stored)
    }

    /// Delete the configuration stored for exactly (code, context). Returns whether one existed.
    pub fn remove_configuration(
        &self,
        code: &str,
        context: &RuleContext,
        actor: &ActorId,
    ) -> Result<bool, RuleError> {
        let code = RuleCode::new(code);
        let removed = self.store.remove_configuration(&code, context)?;
        self.invalidate_scope(&code, context);

        if let Some(configuration) = &removed {
            info!(rule = %code, "rule configuration removed");
            audit::emit(
                self.audit.as_ref(),
                "rule.configuration_removed",
                actor,
                code.0.clone(),
                audit::snapshot(configuration),
                serde_json::Value::Null,
                self.clock.now(),
            );
        }

        Ok(removed.is_some())
    }

    /// Create or replace a rule definition. The rule's own value and default must satisfy its
    /// declared type and constraints.
    pub fn define_rule(&self, rule: AcademicRule, actor: &ActorId) -> Result<(), RuleError> {
        let mut violations = Vec::new();
        for value in [rule.value.as_ref(), rule.default_value.as_ref()]
            .into_iter()
            .flatten()
        {
            if value.value_type() != rule.value_type {
                violations.push(ConstraintViolation::Undecodable {
                    reason: format!(
                        "{} value stored for a {} rule",
                        value.value_type(),
                        rule.value_type
                    ),
                });
            }
            violations.extend(rule.constraints().check(value));
        }
        if !violations.is_empty() {
            return Err(RuleValidationError {
                code: rule.code,
                violations,
            }
            .into());
        }

        let previous = self.store.rule(&rule.code)?;
        self.store.upsert_rule(rule.clone())?;
        self.invalidate_rule(&rule.code);

        info!(rule = %rule.code, category = rule.category.label(), "rule defined");
        audit::emit(
            self.audit.as_ref(),
            "rule.defined",
            actor,
            rule.code.0.clone(),
            audit::snapshot(&previous),
            audit::snapshot(&rule),
            self.clock.now(),
        );
        Ok(())
    }

    /// Soft-delete a rule. Its history stays in the store; lookups stop seeing it.
    pub fn retire_rule(&self, code: &str, actor: &ActorId) -> Result<AcademicRule, RuleError> {
        let before = self.live_rule(code)?;
        let mut retired = before.clone();
        retired.is_active = false;
        retired.deleted_at = Some(self.clock.now());

        self.store.upsert_rule(retired.clone())?;
        self.invalidate_rule(&retired.code);

        info!(rule = %retired.code, "rule retired");
        audit::emit(
            self.audit.as_ref(),
            "rule.retired",
            actor,
            retired.code.0.clone(),
            audit::snapshot(&before),
            audit::snapshot(&retired),
            self.clock.now(),
        );
        Ok(retired)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn live_rule(&self, code: &str) -> Result<AcademicRule, RuleError> {
        let code = RuleCode::new(code);
        self.store
            .rule(&code)?
            .filter(|rule| !rule.is_deleted())
            .ok_or(RuleError::NotFound(code))
    }

    fn invalidate_scope(&self, code: &RuleCode, scope: &RuleContext) {
        self.cache
            .invalidate_where(&|key| &key.code == code && scope.covers(&key.context));
    }

    fn invalidate_rule(&self, code: &RuleCode) {
        self.cache.invalidate_where(&|key| &key.code == code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::FixedClock;
    use crate::rules::cache::TtlRuleCache;
    use crate::rules::catalog::{codes, default_rules};
    use crate::rules::domain::{DepartmentId, ProgramId, SessionId};
    use crate::rules::store::InMemoryRuleStore;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Harness {
        engine: RuleEngine,
        store: Arc<InMemoryRuleStore>,
        audit: MemoryAuditSink,
        clock: Arc<FixedClock>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::on(
            NaiveDate::from_ymd_opt(2025, 7, 1).expect("valid date"),
        ));
        let store = Arc::new(InMemoryRuleStore::with_rules(default_rules()));
        let audit = MemoryAuditSink::default();
        let cache = Arc::new(TtlRuleCache::new(Duration::from_secs(300), clock.clone()));
        let engine = RuleEngine::new(store.clone(), cache, clock.clone(), Arc::new(audit.clone()));
        Harness {
            engine,
            store,
            audit,
            clock,
        }
    }

    fn admin() -> ActorId {
        ActorId::new("registrar")
    }

    fn session() -> RuleContext {
        RuleContext::for_session(SessionId("2025-26".to_string()))
    }

    fn full() -> RuleContext {
        session()
            .with_program(ProgramId("BSC".to_string()))
            .with_department(DepartmentId("PHY".to_string()))
    }

    #[test]
    fn falls_back_to_rule_value_without_configuration() {
        let h = harness();
        assert_eq!(
            h.engine
                .get_decimal(codes::PASS_PERCENTAGE, &full(), 0.0)
                .expect("decimal"),
            40.0
        );
        assert_eq!(
            h.engine
                .get_integer("UNKNOWN_RULE", &full(), 7)
                .expect("default"),
            7
        );
        assert_eq!(h.engine.get_value("UNKNOWN_RULE", &full()).expect("ok"), None);
    }

    #[test]
    fn most_specific_configuration_wins_without_merging() {
        let h = harness();
        h.engine
            .set_configuration(
                codes::PASS_PERCENTAGE,
                ConfigurationChange::new(session(), "35"),
                &admin(),
            )
            .expect("session override");
        h.engine
            .set_configuration(
                codes::PASS_PERCENTAGE,
                ConfigurationChange::new(full(), "45"),
                &admin(),
            )
            .expect("exact override");

        assert_eq!(
            h.engine
                .get_decimal(codes::PASS_PERCENTAGE, &full(), 0.0)
                .expect("exact"),
            45.0
        );
        let other_department = session()
            .with_program(ProgramId("BSC".to_string()))
            .with_department(DepartmentId("CHE".to_string()));
        assert_eq!(
            h.engine
                .get_decimal(codes::PASS_PERCENTAGE, &other_department, 0.0)
                .expect("session level"),
            35.0
        );
        assert_eq!(
            h.engine
                .get_decimal(codes::PASS_PERCENTAGE, &RuleContext::global(), 0.0)
                .expect("global"),
            40.0
        );
    }

    #[test]
    fn writes_invalidate_cached_reads_they_affect() {
        let h = harness();
        let other_session = RuleContext::for_session(SessionId("2026-27".to_string()));

        assert_eq!(
            h.engine
                .get_decimal(codes::GRACE_MARKS, &full(), 0.0)
                .expect("warm exact"),
            5.0
        );
        assert_eq!(
            h.engine
                .get_decimal(codes::GRACE_MARKS, &other_session, 0.0)
                .expect("warm other"),
            5.0
        );

        h.engine
            .set_configuration(
                codes::GRACE_MARKS,
                ConfigurationChange::new(session(), "3"),
                &admin(),
            )
            .expect("configure");

        assert_eq!(
            h.engine
                .get_decimal(codes::GRACE_MARKS, &full(), 0.0)
                .expect("fresh exact"),
            3.0
        );
        assert_eq!(
            h.engine
                .get_decimal(codes::GRACE_MARKS, &other_session, 0.0)
                .expect("unaffected"),
            5.0
        );
    }

    #[test]
    fn validation_lists_every_violation() {
        let h = harness();
        let change = ConfigurationChange {
            is_override: true,
            ..ConfigurationChange::new(full(), "140")
        };

        match h
            .engine
            .set_configuration(codes::PASS_PERCENTAGE, change, &admin())
        {
            Err(RuleError::Validation(err)) => {
                assert_eq!(err.violations.len(), 2);
                assert!(err
                    .violations
                    .contains(&ConstraintViolation::MissingOverrideReason));
                assert!(err
                    .violations
                    .iter()
                    .any(|violation| matches!(violation, ConstraintViolation::AboveMaximum { .. })));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(h
            .store
            .configurations(&RuleCode::new(codes::PASS_PERCENTAGE))
            .expect("configs")
            .is_empty());
    }

    #[test]
    fn undecodable_payloads_are_rejected_at_write_time() {
        let h = harness();
        let err = h
            .engine
            .set_configuration(
                codes::COMPULSORY_SUBJECTS,
                ConfigurationChange::new(full(), "[unterminated"),
                &admin(),
            )
            .expect_err("bad json");
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(matches!(
            h.engine.validate_value(codes::COMPULSORY_SUBJECTS, "{oops"),
            Err(RuleError::InvalidRuleValue { .. })
        ));
    }

    #[test]
    fn expired_configurations_are_skipped() {
        let h = harness();
        h.engine
            .set_configuration(
                codes::ATKT_MAX_SUBJECTS,
                ConfigurationChange::new(full(), "2").effective_between(
                    None,
                    Some(NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")),
                ),
                &admin(),
            )
            .expect("configure");

        assert_eq!(
            h.engine
                .get_integer(codes::ATKT_MAX_SUBJECTS, &full(), 0)
                .expect("rule value"),
            3
        );
    }

    #[test]
    fn retired_rules_stop_resolving() {
        let h = harness();
        h.engine
            .get_boolean(codes::FEE_CLEARANCE_REQUIRED, &full(), false)
            .expect("warm");
        h.engine
            .retire_rule(codes::FEE_CLEARANCE_REQUIRED, &admin())
            .expect("retire");

        assert!(matches!(
            h.engine.get_rule(codes::FEE_CLEARANCE_REQUIRED, &full()),
            Err(RuleError::NotFound(_))
        ));
        assert!(!h
            .engine
            .get_boolean(codes::FEE_CLEARANCE_REQUIRED, &full(), false)
            .expect("default"));
        assert!(h
            .store
            .rule(&RuleCode::new(codes::FEE_CLEARANCE_REQUIRED))
            .expect("lookup")
            .is_some_and(|rule| rule.is_deleted()));
    }

    #[test]
    fn define_rule_rejects_values_outside_bounds() {
        let h = harness();
        let rule = AcademicRule::new(
            "MAX_RETESTS",
            "Maximum retests",
            RuleCategory::Examination,
            RuleValue::Integer(12),
        )
        .with_bounds(Some(0.0), Some(5.0));

        assert!(matches!(
            h.engine.define_rule(rule, &admin()),
            Err(RuleError::Validation(_))
        ));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let h = harness();
        assert!(matches!(
            h.engine.get_array(codes::PASS_PERCENTAGE, &full(), &[]),
            Err(RuleError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rules_by_category_respects_effective_dates() {
        let h = harness();
        let future = AcademicRule::new(
            "REVALUATION_WINDOW_DAYS",
            "Revaluation window",
            RuleCategory::Result,
            RuleValue::Integer(15),
        )
        .effective_between(
            Some(NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date")),
            None,
        );
        h.engine.define_rule(future, &admin()).expect("define");

        let before = h
            .engine
            .rules_by_category(RuleCategory::Result)
            .expect("rules");
        assert!(before
            .iter()
            .all(|rule| rule.code.as_str() != "REVALUATION_WINDOW_DAYS"));

        h.clock.set(
            NaiveDate::from_ymd_opt(2026, 1, 2)
                .expect("valid date")
                .and_hms_opt(0, 0, 0)
                .expect("valid time")
                .and_utc(),
        );
        let after = h
            .engine
            .rules_by_category(RuleCategory::Result)
            .expect("rules");
        assert!(after
            .iter()
            .any(|rule| rule.code.as_str() == "REVALUATION_WINDOW_DAYS"));
    }

    #[test]
    fn mutations_are_audited() {
        let h = harness();
        h.engine
            .set_configuration(
                codes::GRACE_MARKS,
                ConfigurationChange::new(full(), "2").as_override("board directive", None),
                &admin(),
            )
            .expect("configure");
        assert!(h
            .engine
            .remove_configuration(codes::GRACE_MARKS, &full(), &admin())
            .expect("remove"));

        assert_eq!(
            h.audit.event_types(),
            vec!["rule.configured", "rule.configuration_removed"]
        );
    }
}
