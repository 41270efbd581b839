//! Rule definitions, context-scoped configuration, and resolution.

mod cache;
pub mod catalog;
mod domain;
mod engine;
mod store;
mod value;

pub use cache::{NoRuleCache, ResolvedRule, RuleCache, RuleCacheKey, TtlRuleCache};
pub use catalog::{codes, default_rules};
pub use domain::{
    AcademicRule, ConfigurationChange, DepartmentId, ProgramId, RuleCategory, RuleCode,
    RuleConfiguration, RuleContext, SessionId,
};
pub use engine::{RuleEngine, RuleError, RuleValidationError};
pub use store::{InMemoryRuleStore, RuleStore};
pub use value::{ConstraintViolation, RuleValue, ValueConstraints, ValueParseError, ValueType};
