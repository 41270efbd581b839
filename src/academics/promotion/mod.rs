//! Moving students between academic sessions, with eligibility checks, an override path,
//! batch runs, and rollback.

mod eligibility;

pub use eligibility::{
    check_eligibility, EligibilityCriteria, EligibilityReport, EligibilityWarning,
    IneligibilityReason,
};

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Placement, ProgramId, PromotionLog, PromotionLogId, PromotionLogStatus, PromotionStatus,
    PromotionType, RecordId, ResultStatus, SessionId, StudentAcademicRecord, StudentId,
    StudentStatus,
};
use super::repository::{AcademicRepository, RepositoryError, UnitOfWork};
use crate::audit::{self, ActorId, AuditSink};
use crate::error::ErrorKind;
use crate::rules::{codes, RuleEngine, RuleError};

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error("student {student} is {} and cannot be promoted", .status.label())]
    StudentInactive {
        student: StudentId,
        status: StudentStatus,
    },
    #[error("student {0} has no academic record for the current session")]
    NoCurrentRecord(StudentId),
    #[error("promotion log {0} not found")]
    LogNotFound(PromotionLogId),
    #[error("student {student} is not eligible for promotion: {}", summarize(.reasons))]
    NotEligible {
        student: StudentId,
        reasons: Vec<IneligibilityReason>,
        warnings: Vec<EligibilityWarning>,
    },
    #[error("promotion log {log} is {} and cannot be rolled back", .status.label())]
    InvalidRollbackState {
        log: PromotionLogId,
        status: PromotionLogStatus,
    },
    #[error("promotion log {0} has been superseded by a later placement change")]
    PromotionSuperseded(PromotionLogId),
    #[error("academic record {0} is locked")]
    RecordLocked(RecordId),
    #[error("an override promotion requires a reason")]
    MissingOverrideReason,
    #[error("student {student} is already placed in session {session}")]
    SameSession {
        student: StudentId,
        session: SessionId,
    },
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn summarize(reasons: &[IneligibilityReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PromotionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PromotionError::StudentNotFound(_)
            | PromotionError::NoCurrentRecord(_)
            | PromotionError::LogNotFound(_) => ErrorKind::NotFound,
            PromotionError::NotEligible { .. } => ErrorKind::Eligibility,
            PromotionError::StudentInactive { .. }
            | PromotionError::InvalidRollbackState { .. }
            | PromotionError::PromotionSuperseded(_)
            | PromotionError::RecordLocked(_) => ErrorKind::StateConflict,
            PromotionError::MissingOverrideReason | PromotionError::SameSession { .. } => {
                ErrorKind::Validation
            }
            PromotionError::Rules(err) => err.kind(),
            PromotionError::Repository(err) => err.kind(),
        }
    }
}

/// Where a student should move and whether eligibility may be overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionRequest {
    pub student_id: StudentId,
    pub to: Placement,
    pub is_override: bool,
    pub override_reason: Option<String>,
}

impl PromotionRequest {
    pub fn new(student_id: StudentId, to: Placement) -> Self {
        Self {
            student_id,
            to,
            is_override: false,
            override_reason: None,
        }
    }

    pub fn with_override(mut self, reason: impl Into<String>) -> Self {
        self.is_override = true;
        self.override_reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionOutcome {
    pub success: bool,
    pub student_id: StudentId,
    pub promotion_type: PromotionType,
    pub conditional: bool,
    pub is_override: bool,
    pub log_id: PromotionLogId,
    pub previous_record_id: RecordId,
    pub new_record_id: RecordId,
    pub eligibility: EligibilityReport,
}

/// Target placement shared by every student of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkPromotionRequest {
    pub student_ids: Vec<StudentId>,
    pub to: Placement,
    pub is_override: bool,
    pub override_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkPromotionFailure {
    pub student_id: StudentId,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkPromotionReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub promoted: Vec<PromotionOutcome>,
    pub errors: Vec<BulkPromotionFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionPreview {
    pub student_id: StudentId,
    pub record_id: RecordId,
    pub result_status: ResultStatus,
    pub eligibility: EligibilityReport,
}

pub struct PromotionEngine<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    rules: Arc<RuleEngine>,
}

impl<R, A> PromotionEngine<R, A>
where
    R: AcademicRepository + 'static,
    A: AuditSink + 'static,
{
    pub fn new(repository: Arc<R>, audit: Arc<A>, rules: Arc<RuleEngine>) -> Self {
        Self {
            repository,
            audit,
            rules,
        }
    }

    /// Judge a record against the criteria in force for its own placement.
    pub fn check_eligibility(
        &self,
        record: &StudentAcademicRecord,
    ) -> Result<EligibilityReport, PromotionError> {
        let context = record.placement.rule_context();
        let criteria = EligibilityCriteria::resolve(&self.rules, &context)?;
        Ok(check_eligibility(record, &criteria))
    }

    /// Create the next session's record, close the current one, and log the move as a single
    /// unit of work.
    pub fn promote_student(
        &self,
        request: PromotionRequest,
        actor: &ActorId,
    ) -> Result<PromotionOutcome, PromotionError> {
        let student = self
            .repository
            .student(&request.student_id)?
            .ok_or_else(|| PromotionError::StudentNotFound(request.student_id.clone()))?;
        if student.status != StudentStatus::Active {
            return Err(PromotionError::StudentInactive {
                student: student.id,
                status: student.status,
            });
        }
        if request.to.session == student.placement.session {
            return Err(PromotionError::SameSession {
                student: student.id,
                session: request.to.session,
            });
        }

        let current = self
            .repository
            .current_record(&student)?
            .ok_or_else(|| PromotionError::NoCurrentRecord(student.id.clone()))?;
        if current.is_locked {
            return Err(PromotionError::RecordLocked(current.id));
        }

        let report = self.check_eligibility(&current)?;
        if !report.eligible {
            if !request.is_override {
                return Err(PromotionError::NotEligible {
                    student: student.id,
                    reasons: report.reasons,
                    warnings: report.warnings,
                });
            }
            let reason_missing = request
                .override_reason
                .as_deref()
                .map_or(true, |reason| reason.trim().is_empty());
            if reason_missing {
                return Err(PromotionError::MissingOverrideReason);
            }
        }

        let conditional = report.conditional;
        let promotion_type = if conditional {
            PromotionType::ConditionallyPromoted
        } else if current.result_status == ResultStatus::Completed {
            PromotionType::TcIssued
        } else {
            PromotionType::Promoted
        };

        let now = self.rules.clock().now();
        let max_attempts = self.rules.get_integer(
            codes::ATKT_MAX_ATTEMPTS,
            &request.to.rule_context(),
            i64::from(current.max_atkt_attempts),
        )?;

        let mut next = StudentAcademicRecord::new(student.id.clone(), request.to.clone(), now);
        next.promotion_status = PromotionStatus::Promoted;
        next.max_atkt_attempts = u32::try_from(max_attempts).unwrap_or(0);
        if conditional {
            next.backlog_count = current.backlog_count;
            next.current_atkt_attempt = current.current_atkt_attempt;
        }

        let mut closed = current.clone();
        closed.promotion_status = if conditional {
            PromotionStatus::ConditionallyPromoted
        } else {
            PromotionStatus::Promoted
        };

        let log = PromotionLog {
            id: PromotionLogId::generate(),
            student_id: student.id.clone(),
            from: current.placement.clone(),
            from_result_status: current.result_status,
            to: request.to.clone(),
            to_result_status: next.result_status,
            promotion_type,
            was_eligible: report.eligible,
            attendance_percentage: current.attendance_percentage,
            fee_cleared: current.fee_cleared,
            outstanding_amount: current.outstanding_amount,
            backlog_count: current.backlog_count,
            is_override: request.is_override,
            override_reason: request.override_reason.clone(),
            eligibility_reasons: report.reasons.iter().map(ToString::to_string).collect(),
            warnings: report.warnings.iter().map(ToString::to_string).collect(),
            performed_by: actor.clone(),
            status: PromotionLogStatus::Completed,
            previous_record_id: current.id.clone(),
            new_record_id: next.id.clone(),
            created_at: now,
            completed_at: Some(now),
            rolled_back_by: None,
            rolled_back_at: None,
            revision: 0,
        };

        let mut moved = student.clone();
        moved.placement = request.to.clone();

        let mut unit = UnitOfWork::new();
        unit.insert_record(next.clone())
            .update_record(closed)
            .insert_log(log.clone())
            .update_student(moved);
        self.repository.commit(unit)?;

        info!(
            student = %student.id,
            from = %log.from.session,
            to = %log.to.session,
            promotion_type = promotion_type.label(),
            is_override = request.is_override,
            "student promoted"
        );
        audit::emit(
            self.audit.as_ref(),
            "promotion.completed",
            actor,
            log.id.0.clone(),
            audit::snapshot(&current),
            audit::snapshot(&log),
            now,
        );

        Ok(PromotionOutcome {
            success: true,
            student_id: student.id,
            promotion_type,
            conditional,
            is_override: request.is_override,
            log_id: log.id,
            previous_record_id: current.id,
            new_record_id: next.id,
            eligibility: report,
        })
    }

    /// Undo a completed promotion. The record it created is soft-deleted and the record it
    /// closed is marked repeated rather than restored.
    pub fn rollback_promotion(
        &self,
        log_id: &PromotionLogId,
        actor: &ActorId,
    ) -> Result<PromotionLog, PromotionError> {
        let log = self
            .repository
            .promotion_log(log_id)?
            .ok_or_else(|| PromotionError::LogNotFound(log_id.clone()))?;
        if log.status != PromotionLogStatus::Completed {
            return Err(PromotionError::InvalidRollbackState {
                log: log.id,
                status: log.status,
            });
        }

        let student = self
            .repository
            .student(&log.student_id)?
            .ok_or_else(|| PromotionError::StudentNotFound(log.student_id.clone()))?;
        if student.placement.session != log.to.session {
            return Err(PromotionError::PromotionSuperseded(log.id));
        }

        let created = self.live_record(&log.new_record_id)?;
        let previous = self.live_record(&log.previous_record_id)?;
        for record in [&created, &previous].into_iter().flatten() {
            if record.is_locked {
                return Err(PromotionError::RecordLocked(record.id.clone()));
            }
        }

        let now = self.rules.clock().now();
        let mut unit = UnitOfWork::new();
        if let Some(mut created) = created {
            created.deleted_at = Some(now);
            unit.update_record(created);
        }
        if let Some(mut previous) = previous {
            previous.promotion_status = PromotionStatus::Repeated;
            unit.update_record(previous);
        }

        let mut rolled_back = log.clone();
        rolled_back.status = PromotionLogStatus::RolledBack;
        rolled_back.rolled_back_by = Some(actor.clone());
        rolled_back.rolled_back_at = Some(now);
        unit.update_log(rolled_back);

        let mut restored = student;
        restored.placement = log.from.clone();
        unit.update_student(restored);

        self.repository.commit(unit)?;
        let stored = self
            .repository
            .promotion_log(log_id)?
            .ok_or_else(|| PromotionError::LogNotFound(log_id.clone()))?;

        info!(
            log = %stored.id,
            student = %stored.student_id,
            actor = %actor,
            "promotion rolled back"
        );
        audit::emit(
            self.audit.as_ref(),
            "promotion.rolled_back",
            actor,
            stored.id.0.clone(),
            audit::snapshot(&log),
            audit::snapshot(&stored),
            now,
        );
        Ok(stored)
    }

    /// Promote each student independently. Failures are reported per student and never
    /// undo the promotions that succeeded.
    pub fn bulk_promote(
        &self,
        request: BulkPromotionRequest,
        actor: &ActorId,
    ) -> BulkPromotionReport {
        let mut report = BulkPromotionReport {
            total: request.student_ids.len(),
            successful: 0,
            failed: 0,
            promoted: Vec::new(),
            errors: Vec::new(),
        };

        for student_id in &request.student_ids {
            let single = PromotionRequest {
                student_id: student_id.clone(),
                to: request.to.clone(),
                is_override: request.is_override,
                override_reason: request.override_reason.clone(),
            };
            match self.promote_student(single, actor) {
                Ok(outcome) => {
                    report.successful += 1;
                    report.promoted.push(outcome);
                }
                Err(err) => {
                    warn!(student = %student_id, error = %err, "bulk promotion skipped student");
                    report.failed += 1;
                    report.errors.push(BulkPromotionFailure {
                        student_id: student_id.clone(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "bulk promotion finished"
        );
        report
    }

    /// Eligibility of every live record in a cohort. Nothing is written.
    pub fn preview_promotions(
        &self,
        session: &SessionId,
        program: Option<&ProgramId>,
    ) -> Result<Vec<PromotionPreview>, PromotionError> {
        self.repository
            .records_in(session, program)?
            .into_iter()
            .map(|record| {
                let eligibility = self.check_eligibility(&record)?;
                Ok(PromotionPreview {
                    student_id: record.student_id,
                    record_id: record.id,
                    result_status: record.result_status,
                    eligibility,
                })
            })
            .collect()
    }

    /// Promotion logs for a student, newest first.
    pub fn promotion_history(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<PromotionLog>, PromotionError> {
        let mut logs = self.repository.promotion_logs_for(student_id)?;
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    fn live_record(
        &self,
        record_id: &RecordId,
    ) -> Result<Option<StudentAcademicRecord>, PromotionError> {
        Ok(self
            .repository
            .record(record_id)?
            .filter(StudentAcademicRecord::is_live))
    }
}
