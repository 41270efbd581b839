use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use super::domain::{AcademicRule, RuleCode, RuleConfiguration, RuleContext};
use super::value::RuleValue;
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleCacheKey {
    pub code: RuleCode,
    pub context: RuleContext,
}

impl RuleCacheKey {
    pub fn new(code: RuleCode, context: RuleContext) -> Self {
        Self { code, context }
    }
}

/// Outcome of resolving a rule for one context: the rule plus the winning configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRule {
    pub rule: AcademicRule,
    pub configuration: Option<RuleConfiguration>,
}

impl ResolvedRule {
    /// The configuration's value when one won, else the rule's own value or default.
    pub fn value(&self) -> Option<&RuleValue> {
        match &self.configuration {
            Some(configuration) => Some(&configuration.value),
            None => self.rule.typed_value(),
        }
    }
}

/// Shared cache of resolved rules. Writers invalidate exactly the keys they affect.
pub trait RuleCache: Send + Sync {
    fn get(&self, key: &RuleCacheKey) -> Option<ResolvedRule>;
    fn set(&self, key: RuleCacheKey, value: ResolvedRule);
    fn invalidate(&self, key: &RuleCacheKey);
    fn invalidate_where(&self, predicate: &dyn Fn(&RuleCacheKey) -> bool);
    fn clear(&self);
}

/// Expiring in-memory cache. Entries older than the TTL are treated as absent.
pub struct TtlRuleCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<RuleCacheKey, (DateTime<Utc>, ResolvedRule)>>,
}

impl TtlRuleCache {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500));
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleCache for TtlRuleCache {
    fn get(&self, key: &RuleCacheKey) -> Option<ResolvedRule> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.get(key) {
            Some((stored_at, value)) if now - *stored_at < self.ttl => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: RuleCacheKey, value: ResolvedRule) {
        let now = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (now, value));
        }
    }

    fn invalidate(&self, key: &RuleCacheKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn invalidate_where(&self, predicate: &dyn Fn(&RuleCacheKey) -> bool) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| !predicate(key));
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Cache that never stores anything; every lookup resolves against the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRuleCache;

impl RuleCache for NoRuleCache {
    fn get(&self, _key: &RuleCacheKey) -> Option<ResolvedRule> {
        None
    }

    fn set(&self, _key: RuleCacheKey, _value: ResolvedRule) {}

    fn invalidate(&self, _key: &RuleCacheKey) {}

    fn invalidate_where(&self, _predicate: &dyn Fn(&RuleCacheKey) -> bool) {}

    fn clear(&self) {}
}
