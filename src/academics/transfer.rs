//! Leaving-certificate workflow: `pending -> approved -> issued`, with cancellation allowed
//! until the certificate is issued.

use std::sync::{Arc, Mutex};

use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use super::domain::{
    PromotionStatus, ResultStatus, StudentId, StudentStatus, TransferId, TransferRecord,
    TransferStatus, TransferType,
};
use super::repository::{AcademicRepository, RepositoryError, UnitOfWork};
use crate::audit::{self, ActorId, AuditSink};
use crate::clock::Clock;
use crate::config::TransferPolicy;
use crate::error::ErrorKind;

const TC_NUMBER_ATTEMPTS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error("student {0} has no academic record for the current session")]
    NoCurrentRecord(StudentId),
    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),
    #[error("a transfer reason is required")]
    MissingReason,
    #[error("student {student} already has pending transfer {existing}")]
    PendingTransferExists {
        student: StudentId,
        existing: TransferId,
    },
    #[error("student {student} has {outstanding} in outstanding fees")]
    FeesOutstanding { student: StudentId, outstanding: f64 },
    #[error("transfer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransferId,
        from: TransferStatus,
        to: TransferStatus,
    },
    #[error("transfer {id} must be approved before issuing (currently {status})")]
    MustBeApprovedFirst {
        id: TransferId,
        status: TransferStatus,
    },
    #[error("transfer {0} has already been issued")]
    AlreadyIssued(TransferId),
    #[error("no unused TC number found after {0} attempts")]
    TcNumberExhausted(usize),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::StudentNotFound(_)
            | TransferError::NoCurrentRecord(_)
            | TransferError::TransferNotFound(_) => ErrorKind::NotFound,
            TransferError::MissingReason => ErrorKind::Validation,
            TransferError::PendingTransferExists { .. } => ErrorKind::Duplicate,
            TransferError::FeesOutstanding { .. } => ErrorKind::Eligibility,
            TransferError::InvalidTransition { .. }
            | TransferError::MustBeApprovedFirst { .. }
            | TransferError::AlreadyIssued(_) => ErrorKind::StateConflict,
            TransferError::TcNumberExhausted(_) => ErrorKind::Infrastructure,
            TransferError::Repository(err) => err.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub student_id: StudentId,
    pub transfer_type: TransferType,
    pub reason: String,
    pub destination_institution: Option<String>,
    pub destination_address: Option<String>,
    pub leaving_date: NaiveDate,
    pub remarks: Option<String>,
    /// Accept the request despite outstanding fees.
    pub is_override: bool,
}

impl TransferRequest {
    pub fn new(
        student_id: StudentId,
        transfer_type: TransferType,
        reason: impl Into<String>,
        leaving_date: NaiveDate,
    ) -> Self {
        Self {
            student_id,
            transfer_type,
            reason: reason.into(),
            destination_institution: None,
            destination_address: None,
            leaving_date,
            remarks: None,
            is_override: false,
        }
    }

    pub fn destination(mut self, institution: impl Into<String>, address: Option<String>) -> Self {
        self.destination_institution = Some(institution.into());
        self.destination_address = address;
        self
    }
}

pub struct TransferEngine<R, A> {
    repository: Arc<R>,
    audit: Arc<A>,
    clock: Arc<dyn Clock>,
    policy: TransferPolicy,
    rng: Mutex<StdRng>,
}

impl<R, A> TransferEngine<R, A>
where
    R: AcademicRepository + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<A>,
        clock: Arc<dyn Clock>,
        policy: TransferPolicy,
    ) -> Self {
        Self::with_rng(repository, audit, clock, policy, StdRng::from_entropy())
    }

    /// Engine whose TC numbers come from a seeded generator.
    pub fn with_seed(
        repository: Arc<R>,
        audit: Arc<A>,
        clock: Arc<dyn Clock>,
        policy: TransferPolicy,
        seed: u64,
    ) -> Self {
        Self::with_rng(repository, audit, clock, policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        repository: Arc<R>,
        audit: Arc<A>,
        clock: Arc<dyn Clock>,
        policy: TransferPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            repository,
            audit,
            clock,
            policy,
            rng: Mutex::new(rng),
        }
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Open a transfer for the student's current record, snapshotting its academic state.
    pub fn create_transfer_request(
        &self,
        request: TransferRequest,
        actor: &ActorId,
    ) -> Result<TransferRecord, TransferError> {
        if request.reason.trim().is_empty() {
            return Err(TransferError::MissingReason);
        }

        let student = self
            .repository
            .student(&request.student_id)?
            .ok_or_else(|| TransferError::StudentNotFound(request.student_id.clone()))?;
        let record = self
            .repository
            .current_record(&student)?
            .ok_or_else(|| TransferError::NoCurrentRecord(student.id.clone()))?;

        if let Some(pending) = self
            .repository
            .transfers_for(&student.id)?
            .into_iter()
            .find(|transfer| transfer.status == TransferStatus::Pending)
        {
            return Err(TransferError::PendingTransferExists {
                student: student.id,
                existing: pending.id,
            });
        }

        let owes_fees = !record.fee_cleared || record.outstanding_amount > 0.0;
        if owes_fees && self.policy.blocks_pending_fees() && !request.is_override {
            return Err(TransferError::FeesOutstanding {
                student: student.id,
                outstanding: record.outstanding_amount,
            });
        }

        let now = self.clock.now();
        let transfer = TransferRecord {
            id: TransferId::generate(),
            tc_number: self.next_tc_number(self.clock.today().year())?,
            student_id: student.id.clone(),
            record_id: record.id.clone(),
            placement: record.placement.clone(),
            result_status: record.result_status,
            attendance_percentage: record.attendance_percentage,
            fee_cleared: record.fee_cleared,
            outstanding_amount: record.outstanding_amount,
            backlog_count: record.backlog_count,
            transfer_type: request.transfer_type,
            reason: request.reason,
            destination_institution: request.destination_institution,
            destination_address: request.destination_address,
            leaving_date: request.leaving_date,
            remarks: request.remarks,
            status: TransferStatus::Pending,
            is_override: request.is_override,
            requested_by: actor.clone(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            issued_by: None,
            issued_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            revision: 0,
        };

        let mut unit = UnitOfWork::new();
        unit.insert_transfer(transfer.clone());
        self.repository.commit(unit)?;

        info!(
            student = %transfer.student_id,
            tc_number = %transfer.tc_number,
            "transfer requested"
        );
        self.emit("transfer.requested", actor, &transfer.id, None, &transfer);
        Ok(transfer)
    }

    /// Approve a pending transfer. With automatic status updates enabled the student is
    /// marked transferred and the current record is closed out in the same unit of work,
    /// regardless of any lock on that record.
    pub fn approve_transfer(
        &self,
        transfer_id: &TransferId,
        actor: &ActorId,
    ) -> Result<TransferRecord, TransferError> {
        let before = self.transfer(transfer_id)?;
        if before.status != TransferStatus::Pending {
            return Err(TransferError::InvalidTransition {
                id: before.id,
                from: before.status,
                to: TransferStatus::Approved,
            });
        }

        let now = self.clock.now();
        let mut approved = before.clone();
        approved.status = TransferStatus::Approved;
        approved.approved_by = Some(actor.clone());
        approved.approved_at = Some(now);

        let mut unit = UnitOfWork::new();
        unit.update_transfer(approved);

        if self.policy.auto_update_student_status {
            let mut student = self
                .repository
                .student(&before.student_id)?
                .ok_or_else(|| TransferError::StudentNotFound(before.student_id.clone()))?;
            let current = self.repository.current_record(&student)?;

            student.status = StudentStatus::Transferred;
            unit.update_student(student);

            if let Some(mut record) = current {
                record.result_status = ResultStatus::TcIssued;
                record.promotion_status = PromotionStatus::Transferred;
                unit.update_record(record);
            }
        }

        self.repository.commit(unit)?;
        let stored = self.transfer(transfer_id)?;

        info!(
            tc_number = %stored.tc_number,
            actor = %actor,
            student_updated = self.policy.auto_update_student_status,
            "transfer approved"
        );
        self.emit("transfer.approved", actor, &stored.id, Some(&before), &stored);
        Ok(stored)
    }

    pub fn issue_transfer_certificate(
        &self,
        transfer_id: &TransferId,
        actor: &ActorId,
    ) -> Result<TransferRecord, TransferError> {
        let before = self.transfer(transfer_id)?;
        match before.status {
            TransferStatus::Approved => {}
            TransferStatus::Issued => return Err(TransferError::AlreadyIssued(before.id)),
            status => {
                return Err(TransferError::MustBeApprovedFirst {
                    id: before.id,
                    status,
                })
            }
        }

        let mut issued = before.clone();
        issued.status = TransferStatus::Issued;
        issued.issued_by = Some(actor.clone());
        issued.issued_at = Some(self.clock.now());

        let mut unit = UnitOfWork::new();
        unit.update_transfer(issued);
        self.repository.commit(unit)?;
        let stored = self.transfer(transfer_id)?;

        info!(tc_number = %stored.tc_number, actor = %actor, "transfer certificate issued");
        self.emit("transfer.issued", actor, &stored.id, Some(&before), &stored);
        Ok(stored)
    }

    /// Cancel a pending or approved transfer. The student becomes active again when automatic
    /// status updates are enabled; the academic record is left as approval set it.
    pub fn cancel_transfer(
        &self,
        transfer_id: &TransferId,
        reason: impl Into<String>,
        actor: &ActorId,
    ) -> Result<TransferRecord, TransferError> {
        let before = self.transfer(transfer_id)?;
        match before.status {
            TransferStatus::Pending | TransferStatus::Approved => {}
            TransferStatus::Issued => return Err(TransferError::AlreadyIssued(before.id)),
            TransferStatus::Cancelled => {
                return Err(TransferError::InvalidTransition {
                    id: before.id,
                    from: TransferStatus::Cancelled,
                    to: TransferStatus::Cancelled,
                })
            }
        }

        let mut cancelled = before.clone();
        cancelled.status = TransferStatus::Cancelled;
        cancelled.cancelled_by = Some(actor.clone());
        cancelled.cancelled_at = Some(self.clock.now());
        cancelled.cancellation_reason = Some(reason.into());

        let mut unit = UnitOfWork::new();
        unit.update_transfer(cancelled);

        if self.policy.auto_update_student_status {
            match self.repository.student(&before.student_id)? {
                Some(mut student) if student.status == StudentStatus::Transferred => {
                    student.status = StudentStatus::Active;
                    unit.update_student(student);
                }
                Some(_) => {}
                None => warn!(
                    student = %before.student_id,
                    "cancelled transfer for unknown student"
                ),
            }
        }

        self.repository.commit(unit)?;
        let stored = self.transfer(transfer_id)?;

        info!(tc_number = %stored.tc_number, actor = %actor, "transfer cancelled");
        self.emit("transfer.cancelled", actor, &stored.id, Some(&before), &stored);
        Ok(stored)
    }

    /// Transfers for a student, newest first.
    pub fn transfer_history(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let mut transfers = self.repository.transfers_for(student_id)?;
        transfers.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(transfers)
    }

    pub fn find_by_tc_number(
        &self,
        tc_number: &str,
    ) -> Result<Option<TransferRecord>, TransferError> {
        Ok(self.repository.transfer_by_tc(tc_number)?)
    }

    fn transfer(&self, transfer_id: &TransferId) -> Result<TransferRecord, TransferError> {
        self.repository
            .transfer(transfer_id)?
            .ok_or_else(|| TransferError::TransferNotFound(transfer_id.clone()))
    }

    fn next_tc_number(&self, year: i32) -> Result<String, TransferError> {
        let mut rng = self.rng.lock().unwrap_or_else(|err| err.into_inner());
        for _ in 0..TC_NUMBER_ATTEMPTS {
            let candidate = format_tc_number(
                &self.policy.tc_prefix,
                year,
                rng.gen_range(0..1_000_000),
            );
            if self.repository.transfer_by_tc(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(TransferError::TcNumberExhausted(TC_NUMBER_ATTEMPTS))
    }

    fn emit(
        &self,
        event_type: &str,
        actor: &ActorId,
        id: &TransferId,
        before: Option<&TransferRecord>,
        after: &TransferRecord,
    ) {
        audit::emit(
            self.audit.as_ref(),
            event_type,
            actor,
            id.0.clone(),
            audit::snapshot(&before),
            audit::snapshot(after),
            self.clock.now(),
        );
    }
}

/// `<PREFIX>/<year>/<six digits>`.
pub fn format_tc_number(prefix: &str, year: i32, suffix: u32) -> String {
    format!("{prefix}/{year}/{suffix:06}")
}
