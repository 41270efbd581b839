use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::value::{RuleValue, ValueConstraints, ValueType};
use crate::audit::ActorId;

/// Stable identifier of a rule, e.g. `PASS_PERCENTAGE`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleCode(pub String);

impl RuleCode {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuleCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ProgramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Result,
    Attendance,
    Promotion,
    Fee,
    Atkt,
    Examination,
    General,
}

impl RuleCategory {
    pub const fn label(self) -> &'static str {
        match self {
            RuleCategory::Result => "result",
            RuleCategory::Attendance => "attendance",
            RuleCategory::Promotion => "promotion",
            RuleCategory::Fee => "fee",
            RuleCategory::Atkt => "atkt",
            RuleCategory::Examination => "examination",
            RuleCategory::General => "general",
        }
    }
}

impl std::str::FromStr for RuleCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "result" => Ok(Self::Result),
            "attendance" => Ok(Self::Attendance),
            "promotion" => Ok(Self::Promotion),
            "fee" => Ok(Self::Fee),
            "atkt" => Ok(Self::Atkt),
            "examination" => Ok(Self::Examination),
            "general" => Ok(Self::General),
            other => Err(format!("unknown rule category '{other}'")),
        }
    }
}

/// The (session, program, department) tuple a rule is resolved for. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleContext {
    pub session: Option<SessionId>,
    pub program: Option<ProgramId>,
    pub department: Option<DepartmentId>,
}

impl RuleContext {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn for_session(session: SessionId) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    pub fn with_program(mut self, program: ProgramId) -> Self {
        self.program = Some(program);
        self
    }

    pub fn with_department(mut self, department: DepartmentId) -> Self {
        self.department = Some(department);
        self
    }

    pub fn is_global(&self) -> bool {
        self.session.is_none() && self.program.is_none() && self.department.is_none()
    }

    fn session_only(&self) -> Option<Self> {
        self.session.clone().map(Self::for_session)
    }

    /// Lookup order for configurations: the exact context, then session-only, then global.
    pub fn resolution_levels(&self) -> Vec<RuleContext> {
        let mut levels = vec![self.clone()];
        for candidate in [self.session_only(), Some(Self::global())]
            .into_iter()
            .flatten()
        {
            if !levels.contains(&candidate) {
                levels.push(candidate);
            }
        }
        levels
    }

    /// Whether a configuration stored at this scope takes part in resolving `lookup`.
    pub fn covers(&self, lookup: &RuleContext) -> bool {
        lookup.resolution_levels().contains(self)
    }
}

pub(crate) fn within_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> bool {
    from.map_or(true, |start| start <= today) && to.map_or(true, |end| today <= end)
}

/// A named, typed, institution-wide policy knob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicRule {
    pub code: RuleCode,
    pub name: String,
    pub category: RuleCategory,
    pub value_type: ValueType,
    pub value: Option<RuleValue>,
    pub default_value: Option<RuleValue>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    pub validation_pattern: Option<String>,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
    pub is_active: bool,
    pub is_mandatory: bool,
    pub priority: i32,
    pub display_order: i32,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AcademicRule {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        category: RuleCategory,
        value: RuleValue,
    ) -> Self {
        Self {
            code: RuleCode::new(code),
            name: name.into(),
            category,
            value_type: value.value_type(),
            default_value: Some(value.clone()),
            value: Some(value),
            min_value: None,
            max_value: None,
            allowed_values: Vec::new(),
            validation_pattern: None,
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: false,
            priority: 0,
            display_order: 0,
            deleted_at: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_allowed_values(mut self, allowed: &[&str]) -> Self {
        self.allowed_values = allowed.iter().map(|value| value.to_string()).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.validation_pattern = Some(pattern.into());
        self
    }

    pub fn effective_between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.effective_from = from;
        self.effective_to = to;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.is_mandatory = true;
        self
    }

    pub fn ordered(mut self, priority: i32, display_order: i32) -> Self {
        self.priority = priority;
        self.display_order = display_order;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// In force when active, not retired, and `today` falls inside the effective range.
    pub fn is_in_force(&self, today: NaiveDate) -> bool {
        self.is_active
            && !self.is_deleted()
            && within_range(self.effective_from, self.effective_to, today)
    }

    /// The rule's own value, falling back to its declared default.
    pub fn typed_value(&self) -> Option<&RuleValue> {
        self.value.as_ref().or(self.default_value.as_ref())
    }

    pub fn constraints(&self) -> ValueConstraints<'_> {
        ValueConstraints {
            min_value: self.min_value,
            max_value: self.max_value,
            allowed_values: &self.allowed_values,
            validation_pattern: self.validation_pattern.as_deref(),
        }
    }
}

/// A context-specific override of a rule's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfiguration {
    pub rule_code: RuleCode,
    #[serde(flatten)]
    pub context: RuleContext,
    pub value: RuleValue,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub approved_by: Option<ActorId>,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
    pub is_active: bool,
    pub updated_by: ActorId,
    pub updated_at: DateTime<Utc>,
}

impl RuleConfiguration {
    pub fn is_effective(&self, today: NaiveDate) -> bool {
        self.is_active && within_range(self.effective_from, self.effective_to, today)
    }
}

/// Input for `RuleEngine::set_configuration`. The raw value is decoded against the rule's
/// declared type before anything is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationChange {
    pub context: RuleContext,
    pub value: String,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub approved_by: Option<ActorId>,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
}

impl ConfigurationChange {
    pub fn new(context: RuleContext, value: impl Into<String>) -> Self {
        Self {
            context,
            value: value.into(),
            is_override: false,
            override_reason: None,
            approved_by: None,
            effective_from: None,
            effective_to: None,
        }
    }

    pub fn as_override(mut self, reason: impl Into<String>, approved_by: Option<ActorId>) -> Self {
        self.is_override = true;
        self.override_reason = Some(reason.into());
        self.approved_by = approved_by;
        self
    }

    pub fn effective_between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.effective_from = from;
        self.effective_to = to;
        self
    }
}
