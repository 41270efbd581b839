//! Subject-by-subject result evaluation with grace marks, compulsory subjects and ATKT.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{PromotionStatus, ResultStatus, Student, StudentAcademicRecord, StudentId};
use super::repository::{AcademicRepository, RepositoryError, UnitOfWork};
use crate::audit::{self, ActorId, AuditSink};
use crate::error::ErrorKind;
use crate::rules::{codes, RuleContext, RuleEngine, RuleError};

/// Marks obtained in one subject of an examination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMark {
    pub subject_id: String,
    pub subject_name: String,
    pub max_marks: f64,
    pub obtained_marks: f64,
    #[serde(default)]
    pub is_absent: bool,
}

impl SubjectMark {
    pub fn new(
        subject_id: impl Into<String>,
        subject_name: impl Into<String>,
        max_marks: f64,
        obtained_marks: f64,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_name: subject_name.into(),
            max_marks,
            obtained_marks,
            is_absent: false,
        }
    }

    pub fn absent(
        subject_id: impl Into<String>,
        subject_name: impl Into<String>,
        max_marks: f64,
    ) -> Self {
        Self {
            is_absent: true,
            ..Self::new(subject_id, subject_name, max_marks, 0.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkSheet {
    pub student_id: StudentId,
    pub examination_id: String,
    pub marks: Vec<SubjectMark>,
}

/// Rule values a result is judged against, resolved once per evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPolicy {
    pub pass_percentage: f64,
    pub grace_marks: f64,
    pub atkt_max_subjects: u32,
    pub compulsory_subjects: Vec<String>,
}

impl ResultPolicy {
    pub fn resolve(rules: &RuleEngine, context: &RuleContext) -> Result<Self, RuleError> {
        let atkt_max_subjects = rules.get_integer(codes::ATKT_MAX_SUBJECTS, context, 3)?;
        Ok(Self {
            pass_percentage: rules.get_decimal(codes::PASS_PERCENTAGE, context, 40.0)?,
            grace_marks: rules.get_decimal(codes::GRACE_MARKS, context, 0.0)?,
            atkt_max_subjects: u32::try_from(atkt_max_subjects).unwrap_or(0),
            compulsory_subjects: rules.get_array(codes::COMPULSORY_SUBJECTS, context, &[])?,
        })
    }

    fn is_compulsory(&self, subject_id: &str) -> bool {
        self.compulsory_subjects
            .iter()
            .any(|compulsory| compulsory == subject_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectResult {
    pub subject_id: String,
    pub subject_name: String,
    pub max_marks: f64,
    pub obtained_marks: f64,
    /// `pass_percentage` of `max_marks`, unrounded.
    pub passing_marks: f64,
    /// Passing marks rounded up; grace lifts a narrow fail to exactly this value.
    pub threshold: f64,
    pub final_marks: f64,
    pub passed: bool,
    pub grace_applied: f64,
    pub deficit: f64,
    pub is_compulsory: bool,
    pub is_absent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pass,
    Fail,
    Atkt,
    NotEligible,
}

impl EvaluationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EvaluationStatus::Pass => "pass",
            EvaluationStatus::Fail => "fail",
            EvaluationStatus::Atkt => "atkt",
            EvaluationStatus::NotEligible => "not_eligible",
        }
    }

    /// Record status an evaluation outcome is persisted as.
    pub const fn result_status(self) -> ResultStatus {
        match self {
            EvaluationStatus::Pass => ResultStatus::Pass,
            EvaluationStatus::Fail => ResultStatus::Fail,
            EvaluationStatus::Atkt => ResultStatus::Atkt,
            EvaluationStatus::NotEligible => ResultStatus::ExamPending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvaluation {
    pub student_id: StudentId,
    pub examination_id: String,
    pub status: EvaluationStatus,
    pub reason: String,
    pub pass_percentage: f64,
    pub grace_marks: f64,
    pub atkt_max_subjects: u32,
    pub subjects: Vec<SubjectResult>,
    pub passed_count: u32,
    pub failed_count: u32,
    pub aggregate_percentage: f64,
}

impl ResultEvaluation {
    pub fn failed_subjects(&self) -> impl Iterator<Item = &SubjectResult> {
        self.subjects.iter().filter(|subject| !subject.passed)
    }

    pub fn grace_subjects(&self) -> impl Iterator<Item = &SubjectResult> {
        self.subjects
            .iter()
            .filter(|subject| subject.grace_applied > 0.0)
    }
}

/// Outcome of checking whether a student may attempt their backlogs again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtktEligibility {
    pub eligible: bool,
    pub failed_count: u32,
    pub max_subjects: u32,
    pub current_attempt: u32,
    pub max_attempts: u32,
    pub reasons: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error("student {0} has no academic record for the current session")]
    NoCurrentRecord(StudentId),
    #[error("invalid marks for subject {subject_id}: {reason}")]
    InvalidMarks { subject_id: String, reason: String },
    #[error("academic record for student {0} is locked")]
    RecordLocked(StudentId),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EvaluationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvaluationError::StudentNotFound(_) | EvaluationError::NoCurrentRecord(_) => {
                ErrorKind::NotFound
            }
            EvaluationError::InvalidMarks { .. } => ErrorKind::Validation,
            EvaluationError::RecordLocked(_) => ErrorKind::StateConflict,
            EvaluationError::Rules(err) => err.kind(),
            EvaluationError::Repository(err) => err.kind(),
        }
    }
}

fn validate_marks(sheet: &MarkSheet) -> Result<(), EvaluationError> {
    for mark in &sheet.marks {
        let invalid = |reason: &str| EvaluationError::InvalidMarks {
            subject_id: mark.subject_id.clone(),
            reason: reason.to_string(),
        };
        if !mark.max_marks.is_finite() || mark.max_marks <= 0.0 {
            return Err(invalid("maximum marks must be positive"));
        }
        if !mark.obtained_marks.is_finite()
            || mark.obtained_marks < 0.0
            || mark.obtained_marks > mark.max_marks
        {
            return Err(invalid("obtained marks must lie between 0 and the maximum"));
        }
    }
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn evaluate_subject(mark: &SubjectMark, policy: &ResultPolicy) -> SubjectResult {
    let passing_marks = policy.pass_percentage * mark.max_marks / 100.0;
    let threshold = passing_marks.ceil();
    let obtained = if mark.is_absent { 0.0 } else { mark.obtained_marks };
    // Grace lifts a subject to the whole-mark threshold, so the limit applies to that gap.
    let deficit = threshold - obtained;

    let (passed, final_marks, grace_applied, deficit) = if mark.is_absent {
        (false, 0.0, 0.0, threshold)
    } else if obtained >= passing_marks {
        (true, obtained, 0.0, 0.0)
    } else if deficit <= policy.grace_marks {
        (true, threshold, deficit, 0.0)
    } else {
        (false, obtained, 0.0, deficit)
    };

    SubjectResult {
        subject_id: mark.subject_id.clone(),
        subject_name: mark.subject_name.clone(),
        max_marks: mark.max_marks,
        obtained_marks: obtained,
        passing_marks,
        threshold,
        final_marks,
        passed,
        grace_applied,
        deficit,
        is_compulsory: policy.is_compulsory(&mark.subject_id),
        is_absent: mark.is_absent,
    }
}

/// Judge a mark sheet against a resolved policy. Pure; nothing is persisted.
pub fn evaluate_marks(sheet: &MarkSheet, policy: &ResultPolicy) -> ResultEvaluation {
    let subjects: Vec<SubjectResult> = sheet
        .marks
        .iter()
        .map(|mark| evaluate_subject(mark, policy))
        .collect();

    let failed: Vec<&SubjectResult> = subjects.iter().filter(|subject| !subject.passed).collect();
    let failed_count = failed.len() as u32;
    let passed_count = subjects.len() as u32 - failed_count;

    let total_max: f64 = subjects.iter().map(|subject| subject.max_marks).sum();
    let total_obtained: f64 = subjects.iter().map(|subject| subject.obtained_marks).sum();
    let aggregate_percentage = if total_max > 0.0 {
        round2(total_obtained / total_max * 100.0)
    } else {
        0.0
    };

    let compulsory_failures: Vec<&str> = failed
        .iter()
        .filter(|subject| subject.is_compulsory)
        .map(|subject| subject.subject_name.as_str())
        .collect();

    let (status, reason) = if subjects.is_empty() {
        (EvaluationStatus::NotEligible, "No marks found".to_string())
    } else if failed_count == 0 {
        (EvaluationStatus::Pass, "Passed all subjects".to_string())
    } else if !compulsory_failures.is_empty() {
        (
            EvaluationStatus::Fail,
            format!(
                "Failed compulsory subject(s): {}",
                compulsory_failures.join(", ")
            ),
        )
    } else if failed_count <= policy.atkt_max_subjects {
        (
            EvaluationStatus::Atkt,
            format!(
                "Failed {failed_count} subject(s), within the ATKT limit of {}",
                policy.atkt_max_subjects
            ),
        )
    } else {
        (
            EvaluationStatus::Fail,
            format!(
                "Failed {failed_count} subject(s), above the ATKT limit of {}",
                policy.atkt_max_subjects
            ),
        )
    };

    ResultEvaluation {
        student_id: sheet.student_id.clone(),
        examination_id: sheet.examination_id.clone(),
        status,
        reason,
        pass_percentage: policy.pass_percentage,
        grace_marks: policy.grace_marks,
        atkt_max_subjects: policy.atkt_max_subjects,
        passed_count,
        failed_count,
        aggregate_percentage,
        subjects,
    }
}

/// Evaluates examinations against the rules in force for the student's placement and
/// persists outcomes onto the current academic record.
pub struct ResultEvaluator<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    rules: Arc<RuleEngine>,
}

impl<R, A> ResultEvaluator<R, A>
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

    pub fn evaluate(&self, sheet: &MarkSheet) -> Result<ResultEvaluation, EvaluationError> {
        validate_marks(sheet)?;
        let student = self.student(&sheet.student_id)?;
        let policy = ResultPolicy::resolve(&self.rules, &student.placement.rule_context())?;
        let evaluation = evaluate_marks(sheet, &policy);

        debug!(
            student = %evaluation.student_id,
            examination = %evaluation.examination_id,
            status = evaluation.status.label(),
            failed = evaluation.failed_count,
            "examination evaluated"
        );
        Ok(evaluation)
    }

    /// Both the backlog count and the attempt count must be within their limits.
    pub fn check_atkt_eligibility(
        &self,
        student_id: &StudentId,
        failed_count: u32,
    ) -> Result<AtktEligibility, EvaluationError> {
        let (_, record) = self.current(student_id)?;
        let context = record.placement.rule_context();
        let max_subjects = self.rules.get_integer(codes::ATKT_MAX_SUBJECTS, &context, 3)?;
        let max_attempts = self.rules.get_integer(codes::ATKT_MAX_ATTEMPTS, &context, 3)?;
        let max_subjects = u32::try_from(max_subjects).unwrap_or(0);
        let max_attempts = u32::try_from(max_attempts).unwrap_or(0);

        let mut reasons = Vec::new();
        if failed_count > max_subjects {
            reasons.push(format!(
                "{failed_count} failed subject(s) exceed the ATKT limit of {max_subjects}"
            ));
        }
        if record.current_atkt_attempt >= max_attempts {
            reasons.push(format!(
                "attempt {} has reached the limit of {max_attempts} attempt(s)",
                record.current_atkt_attempt
            ));
        }

        Ok(AtktEligibility {
            eligible: reasons.is_empty(),
            failed_count,
            max_subjects,
            current_attempt: record.current_atkt_attempt,
            max_attempts,
            reasons,
        })
    }

    /// Persist an evaluation onto the student's current record.
    pub fn update_academic_record(
        &self,
        evaluation: &ResultEvaluation,
        actor: &ActorId,
    ) -> Result<StudentAcademicRecord, EvaluationError> {
        let (student, before) = self.current(&evaluation.student_id)?;
        if before.is_locked {
            return Err(EvaluationError::RecordLocked(student.id));
        }

        let result_status = evaluation.status.result_status();
        let mut record = before.clone();
        // Attempts carried over by a conditional promotion keep counting in the new session.
        record.current_atkt_attempt = match result_status {
            ResultStatus::Atkt => before.current_atkt_attempt + 1,
            ResultStatus::Pass => 0,
            _ => before.current_atkt_attempt,
        };
        record.result_status = result_status;
        record.backlog_count = evaluation.failed_count;
        record.aggregate_percentage = Some(evaluation.aggregate_percentage);
        record.evaluated_on = Some(self.rules.clock().today());
        record.promotion_status = if record.is_eligible_for_promotion() {
            PromotionStatus::Eligible
        } else {
            PromotionStatus::NotEligible
        };

        let id = record.id.clone();
        let mut unit = UnitOfWork::new();
        unit.update_record(record);
        self.repository.commit(unit)?;
        let stored = self
            .repository
            .record(&id)?
            .ok_or_else(|| EvaluationError::NoCurrentRecord(student.id.clone()))?;

        info!(
            student = %student.id,
            examination = %evaluation.examination_id,
            status = stored.result_status.label(),
            backlogs = stored.backlog_count,
            "result recorded"
        );
        audit::emit(
            self.audit.as_ref(),
            "result.recorded",
            actor,
            stored.id.0.clone(),
            audit::snapshot(&before),
            audit::snapshot(&stored),
            self.rules.clock().now(),
        );
        Ok(stored)
    }

    /// Evaluate and persist in one call.
    pub fn evaluate_and_record(
        &self,
        sheet: &MarkSheet,
        actor: &ActorId,
    ) -> Result<(ResultEvaluation, StudentAcademicRecord), EvaluationError> {
        let evaluation = self.evaluate(sheet)?;
        let record = self.update_academic_record(&evaluation, actor)?;
        Ok((evaluation, record))
    }

    fn student(&self, student_id: &StudentId) -> Result<Student, EvaluationError> {
        self.repository
            .student(student_id)?
            .ok_or_else(|| EvaluationError::StudentNotFound(student_id.clone()))
    }

    fn current(
        &self,
        student_id: &StudentId,
    ) -> Result<(Student, StudentAcademicRecord), EvaluationError> {
        let student = self.student(student_id)?;
        let record = self
            .repository
            .current_record(&student)?
            .ok_or_else(|| EvaluationError::NoCurrentRecord(student.id.clone()))?;
        Ok((student, record))
    }
}
