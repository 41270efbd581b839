//! Rules seeded at institution setup.

use super::domain::{AcademicRule, RuleCategory};
use super::value::RuleValue;

pub mod codes {
    pub const PASS_PERCENTAGE: &str = "PASS_PERCENTAGE";
    pub const GRACE_MARKS: &str = "GRACE_MARKS";
    pub const ATKT_MAX_SUBJECTS: &str = "ATKT_MAX_SUBJECTS";
    pub const ATKT_MAX_ATTEMPTS: &str = "ATKT_MAX_ATTEMPTS";
    pub const COMPULSORY_SUBJECTS: &str = "COMPULSORY_SUBJECTS";
    pub const FEE_CLEARANCE_REQUIRED: &str = "FEE_CLEARANCE_REQUIRED";
    pub const MIN_ATTENDANCE_PERCENTAGE: &str = "MIN_ATTENDANCE_PERCENTAGE";
    pub const CONDONABLE_ATTENDANCE_PERCENTAGE: &str = "CONDONABLE_ATTENDANCE_PERCENTAGE";
}

pub fn default_rules() -> Vec<AcademicRule> {
    vec![
        AcademicRule::new(
            codes::PASS_PERCENTAGE,
            "Minimum percentage to pass a subject",
            RuleCategory::Result,
            RuleValue::Decimal(40.0),
        )
        .with_bounds(Some(0.0), Some(100.0))
        .mandatory()
        .ordered(1, 1),
        AcademicRule::new(
            codes::GRACE_MARKS,
            "Maximum grace marks per subject",
            RuleCategory::Result,
            RuleValue::Decimal(5.0),
        )
        .with_bounds(Some(0.0), Some(20.0))
        .ordered(1, 2),
        AcademicRule::new(
            codes::COMPULSORY_SUBJECTS,
            "Subjects whose failure always fails the examination",
            RuleCategory::Examination,
            RuleValue::List(Vec::new()),
        )
        .ordered(1, 1),
        AcademicRule::new(
            codes::ATKT_MAX_SUBJECTS,
            "Maximum failed subjects allowed to keep terms",
            RuleCategory::Atkt,
            RuleValue::Integer(3),
        )
        .with_bounds(Some(0.0), Some(10.0))
        .mandatory()
        .ordered(1, 1),
        AcademicRule::new(
            codes::ATKT_MAX_ATTEMPTS,
            "Maximum attempts to clear backlogs",
            RuleCategory::Atkt,
            RuleValue::Integer(3),
        )
        .with_bounds(Some(1.0), Some(10.0))
        .ordered(1, 2),
        AcademicRule::new(
            codes::FEE_CLEARANCE_REQUIRED,
            "Fees must be cleared before promotion",
            RuleCategory::Fee,
            RuleValue::Boolean(true),
        )
        .ordered(1, 1),
        AcademicRule::new(
            codes::MIN_ATTENDANCE_PERCENTAGE,
            "Attendance percentage required for eligibility",
            RuleCategory::Attendance,
            RuleValue::Decimal(75.0),
        )
        .with_bounds(Some(0.0), Some(100.0))
        .mandatory()
        .ordered(1, 1),
        AcademicRule::new(
            codes::CONDONABLE_ATTENDANCE_PERCENTAGE,
            "Lowest attendance percentage that may be condoned",
            RuleCategory::Attendance,
            RuleValue::Decimal(65.0),
        )
        .with_bounds(Some(0.0), Some(100.0))
        .ordered(1, 2),
    ]
}
