use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::domain::{
    AttendanceStatus, ProgramId, RecordId, SessionId, Student, StudentAcademicRecord, StudentId,
};
use super::repository::{AcademicRepository, RepositoryError, UnitOfWork};
use crate::audit::{self, ActorId, AuditSink};
use crate::error::ErrorKind;
use crate::rules::{codes, RuleEngine, RuleError};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error("academic record {0} not found")]
    RecordNotFound(RecordId),
    #[error("student {0} has no academic record for the current session")]
    NoCurrentRecord(StudentId),
    #[error("student {student} already has an academic record for session {session}")]
    AlreadyEnrolled {
        student: StudentId,
        session: SessionId,
    },
    #[error("academic record {0} is locked")]
    RecordLocked(RecordId),
    #[error("academic record {0} is not locked")]
    NotLocked(RecordId),
    #[error("attendance percentage {0} must be between 0 and 100")]
    InvalidAttendance(f64),
    #[error("outstanding amount {0} is not a finite number")]
    InvalidAmount(f64),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl RecordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordError::StudentNotFound(_)
            | RecordError::RecordNotFound(_)
            | RecordError::NoCurrentRecord(_) => ErrorKind::NotFound,
            RecordError::AlreadyEnrolled { .. } => ErrorKind::Duplicate,
            RecordError::RecordLocked(_) | RecordError::NotLocked(_) => ErrorKind::StateConflict,
            RecordError::InvalidAttendance(_) | RecordError::InvalidAmount(_) => {
                ErrorKind::Validation
            }
            RecordError::Rules(err) => err.kind(),
            RecordError::Repository(err) => err.kind(),
        }
    }
}

/// Per-status head counts for one session cohort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session: SessionId,
    pub program: Option<ProgramId>,
    pub total: usize,
    pub by_result_status: BTreeMap<&'static str, usize>,
    pub by_promotion_status: BTreeMap<&'static str, usize>,
    pub with_backlogs: usize,
    pub locked: usize,
}

/// Maintains the per-session academic record: enrollment, attendance, fees, and locking.
pub struct AcademicRecordService<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    rules: Arc<RuleEngine>,
}

impl<R, A> AcademicRecordService<R, A>
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

    /// Create the record for the session the student is currently placed in.
    pub fn enroll(
        &self,
        student_id: &StudentId,
        actor: &ActorId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        let student = self.student(student_id)?;
        let session = student.placement.session.clone();
        let already_enrolled = || RecordError::AlreadyEnrolled {
            student: student.id.clone(),
            session: session.clone(),
        };

        if self.repository.current_record(&student)?.is_some() {
            return Err(already_enrolled());
        }

        let context = student.placement.rule_context();
        let max_attempts = self
            .rules
            .get_integer(codes::ATKT_MAX_ATTEMPTS, &context, 3)?;

        let mut record = StudentAcademicRecord::new(
            student.id.clone(),
            student.placement.clone(),
            self.rules.clock().now(),
        );
        record.max_atkt_attempts = u32::try_from(max_attempts).unwrap_or(0);

        let mut unit = UnitOfWork::new();
        unit.insert_record(record.clone());
        self.repository.commit(unit).map_err(|err| match err {
            RepositoryError::Conflict(_) => already_enrolled(),
            other => other.into(),
        })?;

        info!(student = %student.id, session = %session, "student enrolled");
        self.emit(
            "record.enrolled",
            actor,
            &record.id,
            serde_json::Value::Null,
            audit::snapshot(&record),
        );
        Ok(record)
    }

    pub fn current_record(
        &self,
        student_id: &StudentId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        let student = self.student(student_id)?;
        self.repository
            .current_record(&student)?
            .ok_or_else(|| RecordError::NoCurrentRecord(student.id.clone()))
    }

    /// Store the attendance percentage and classify it against the attendance rules.
    pub fn record_attendance(
        &self,
        student_id: &StudentId,
        percentage: f64,
        actor: &ActorId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(RecordError::InvalidAttendance(percentage));
        }

        let before = self.unlocked_current(student_id)?;
        let context = before.placement.rule_context();
        let minimum = self
            .rules
            .get_decimal(codes::MIN_ATTENDANCE_PERCENTAGE, &context, 75.0)?;
        let condonable = self
            .rules
            .get_decimal(codes::CONDONABLE_ATTENDANCE_PERCENTAGE, &context, minimum)?;

        let mut record = before.clone();
        record.attendance_percentage = Some(percentage);
        record.attendance_status = AttendanceStatus::classify(percentage, minimum, condonable);

        let stored = self.save(record)?;
        info!(
            record = %stored.id,
            percentage,
            status = stored.attendance_status.label(),
            "attendance recorded"
        );
        self.emit(
            "record.attendance_updated",
            actor,
            &stored.id,
            audit::snapshot(&before),
            audit::snapshot(&stored),
        );
        Ok(stored)
    }

    /// Fees count as cleared once nothing is outstanding.
    pub fn record_fee_status(
        &self,
        student_id: &StudentId,
        outstanding_amount: f64,
        actor: &ActorId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        if !outstanding_amount.is_finite() {
            return Err(RecordError::InvalidAmount(outstanding_amount));
        }

        let before = self.unlocked_current(student_id)?;
        let mut record = before.clone();
        record.outstanding_amount = outstanding_amount;
        record.fee_cleared = outstanding_amount <= 0.0;

        let stored = self.save(record)?;
        info!(
            record = %stored.id,
            outstanding = stored.outstanding_amount,
            cleared = stored.fee_cleared,
            "fee status recorded"
        );
        self.emit(
            "record.fees_updated",
            actor,
            &stored.id,
            audit::snapshot(&before),
            audit::snapshot(&stored),
        );
        Ok(stored)
    }

    pub fn lock_record(
        &self,
        record_id: &RecordId,
        actor: &ActorId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        let before = self.record(record_id)?;
        if before.is_locked {
            return Err(RecordError::RecordLocked(before.id));
        }

        let mut record = before.clone();
        record.is_locked = true;
        record.locked_by = Some(actor.clone());
        record.locked_at = Some(self.rules.clock().now());

        let stored = self.save(record)?;
        info!(record = %stored.id, actor = %actor, "academic record locked");
        self.emit(
            "record.locked",
            actor,
            &stored.id,
            audit::snapshot(&before),
            audit::snapshot(&stored),
        );
        Ok(stored)
    }

    pub fn unlock_record(
        &self,
        record_id: &RecordId,
        actor: &ActorId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        let before = self.record(record_id)?;
        if !before.is_locked {
            return Err(RecordError::NotLocked(before.id));
        }

        let mut record = before.clone();
        record.is_locked = false;
        record.locked_by = None;
        record.locked_at = None;

        let stored = self.save(record)?;
        info!(record = %stored.id, actor = %actor, "academic record unlocked");
        self.emit(
            "record.unlocked",
            actor,
            &stored.id,
            audit::snapshot(&before),
            audit::snapshot(&stored),
        );
        Ok(stored)
    }

    pub fn session_summary(
        &self,
        session: &SessionId,
        program: Option<&ProgramId>,
    ) -> Result<SessionSummary, RecordError> {
        let records = self.repository.records_in(session, program)?;

        let mut summary = SessionSummary {
            session: session.clone(),
            program: program.cloned(),
            total: records.len(),
            by_result_status: BTreeMap::new(),
            by_promotion_status: BTreeMap::new(),
            with_backlogs: 0,
            locked: 0,
        };
        for record in &records {
            *summary
                .by_result_status
                .entry(record.result_status.label())
                .or_default() += 1;
            *summary
                .by_promotion_status
                .entry(record.promotion_status.label())
                .or_default() += 1;
            if record.has_backlogs() {
                summary.with_backlogs += 1;
            }
            if record.is_locked {
                summary.locked += 1;
            }
        }
        Ok(summary)
    }

    fn student(&self, student_id: &StudentId) -> Result<Student, RecordError> {
        self.repository
            .student(student_id)?
            .ok_or_else(|| RecordError::StudentNotFound(student_id.clone()))
    }

    fn record(&self, record_id: &RecordId) -> Result<StudentAcademicRecord, RecordError> {
        self.repository
            .record(record_id)?
            .filter(StudentAcademicRecord::is_live)
            .ok_or_else(|| RecordError::RecordNotFound(record_id.clone()))
    }

    fn unlocked_current(
        &self,
        student_id: &StudentId,
    ) -> Result<StudentAcademicRecord, RecordError> {
        let record = self.current_record(student_id)?;
        if record.is_locked {
            return Err(RecordError::RecordLocked(record.id));
        }
        Ok(record)
    }

    fn save(&self, record: StudentAcademicRecord) -> Result<StudentAcademicRecord, RecordError> {
        let id = record.id.clone();
        let mut unit = UnitOfWork::new();
        unit.update_record(record);
        self.repository.commit(unit)?;
        self.record(&id)
    }

    fn emit(
        &self,
        event_type: &str,
        actor: &ActorId,
        record_id: &RecordId,
        before: serde_json::Value,
        after: serde_json::Value,
    ) {
        audit::emit(
            self.audit.as_ref(),
            event_type,
            actor,
            record_id.0.clone(),
            before,
            after,
            self.rules.clock().now(),
        );
    }
}
