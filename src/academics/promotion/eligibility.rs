use serde::{Deserialize, Serialize};

use crate::academics::domain::{AttendanceStatus, ResultStatus, StudentAcademicRecord};
use crate::rules::{codes, RuleContext, RuleEngine, RuleError};

/// Rule values promotion eligibility is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EligibilityCriteria {
    pub fee_clearance_required: bool,
    pub max_atkt_subjects: u32,
}

impl EligibilityCriteria {
    pub fn resolve(rules: &RuleEngine, context: &RuleContext) -> Result<Self, RuleError> {
        let max_atkt_subjects = rules.get_integer(codes::ATKT_MAX_SUBJECTS, context, 3)?;
        Ok(Self {
            fee_clearance_required: rules.get_boolean(
                codes::FEE_CLEARANCE_REQUIRED,
                context,
                true,
            )?,
            max_atkt_subjects: u32::try_from(max_atkt_subjects).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IneligibilityReason {
    #[error("result status {} does not permit promotion", .status.label())]
    ResultStatus { status: ResultStatus },
    #[error("attendance is below the condonable minimum")]
    AttendanceShortage { percentage: Option<f64> },
    #[error("fees of {outstanding} are outstanding")]
    FeesOutstanding { outstanding: f64 },
    #[error("{backlogs} backlog(s) exceed the ATKT limit of {limit}")]
    TooManyBacklogs { backlogs: u32, limit: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum EligibilityWarning {
    #[error("attendance requires condonation")]
    AttendanceCondonable { percentage: Option<f64> },
    #[error("promotion carries {backlogs} backlog(s)")]
    CarriesBacklogs { backlogs: u32 },
}

/// Every failing reason and every warning found for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub eligible: bool,
    /// Promotion would carry backlogs forward under ATKT.
    pub conditional: bool,
    pub reasons: Vec<IneligibilityReason>,
    pub warnings: Vec<EligibilityWarning>,
}

pub fn check_eligibility(
    record: &StudentAcademicRecord,
    criteria: &EligibilityCriteria,
) -> EligibilityReport {
    let mut reasons = Vec::new();
    let mut warnings = Vec::new();
    let mut conditional = false;

    if !record.result_status.permits_promotion() {
        reasons.push(IneligibilityReason::ResultStatus {
            status: record.result_status,
        });
    }

    match record.attendance_status {
        AttendanceStatus::NotEligible => reasons.push(IneligibilityReason::AttendanceShortage {
            percentage: record.attendance_percentage,
        }),
        AttendanceStatus::Condonable => warnings.push(EligibilityWarning::AttendanceCondonable {
            percentage: record.attendance_percentage,
        }),
        AttendanceStatus::Eligible => {}
    }

    if criteria.fee_clearance_required && !record.fee_cleared {
        reasons.push(IneligibilityReason::FeesOutstanding {
            outstanding: record.outstanding_amount,
        });
    }

    if record.result_status == ResultStatus::Atkt {
        if record.backlog_count > criteria.max_atkt_subjects {
            reasons.push(IneligibilityReason::TooManyBacklogs {
                backlogs: record.backlog_count,
                limit: criteria.max_atkt_subjects,
            });
        } else {
            conditional = true;
            warnings.push(EligibilityWarning::CarriesBacklogs {
                backlogs: record.backlog_count,
            });
        }
    }

    EligibilityReport {
        eligible: reasons.is_empty(),
        conditional,
        reasons,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academics::domain::{Placement, ProgramId, SessionId, StudentId};
    use chrono::Utc;

    fn record(status: ResultStatus) -> StudentAcademicRecord {
        let mut record = StudentAcademicRecord::new(
            StudentId::new("stu-1"),
            Placement {
                session: SessionId("2025-26".to_string()),
                program: ProgramId("BCOM".to_string()),
                department: None,
                year: 2,
                division: "B".to_string(),
            },
            Utc::now(),
        );
        record.result_status = status;
        record
    }

    const CRITERIA: EligibilityCriteria = EligibilityCriteria {
        fee_clearance_required: true,
        max_atkt_subjects: 3,
    };

    #[test]
    fn passing_record_is_eligible_without_warnings() {
        let report = check_eligibility(&record(ResultStatus::Pass), &CRITERIA);
        assert!(report.eligible);
        assert!(!report.conditional);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn all_failing_reasons_are_accumulated() {
        let mut record = record(ResultStatus::Fail);
        record.attendance_status = AttendanceStatus::NotEligible;
        record.fee_cleared = false;
        record.outstanding_amount = 1200.0;

        let report = check_eligibility(&record, &CRITERIA);
        assert!(!report.eligible);
        assert_eq!(report.reasons.len(), 3);
        assert!(report
            .reasons
            .contains(&IneligibilityReason::FeesOutstanding { outstanding: 1200.0 }));
    }

    #[test]
    fn fee_rule_can_be_switched_off() {
        let mut record = record(ResultStatus::Pass);
        record.fee_cleared = false;
        let relaxed = EligibilityCriteria {
            fee_clearance_required: false,
            ..CRITERIA
        };
        assert!(check_eligibility(&record, &relaxed).eligible);
    }

    #[test]
    fn atkt_within_limit_is_conditional() {
        let mut record = record(ResultStatus::Atkt);
        record.backlog_count = 2;
        record.attendance_status = AttendanceStatus::Condonable;

        let report = check_eligibility(&record, &CRITERIA);
        assert!(report.eligible);
        assert!(report.conditional);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn atkt_above_limit_is_ineligible() {
        let mut record = record(ResultStatus::Atkt);
        record.backlog_count = 4;

        let report = check_eligibility(&record, &CRITERIA);
        assert!(!report.eligible);
        assert!(!report.conditional);
        assert_eq!(
            report.reasons,
            vec![IneligibilityReason::TooManyBacklogs {
                backlogs: 4,
                limit: 3
            }]
        );
    }
}
