//! Students, per-session academic records, and the lifecycle workflows driven by rules:
//! result evaluation, promotion, and transfer.

pub mod domain;
pub mod marks;
pub mod promotion;
pub mod records;
pub mod repository;
pub mod results;
pub mod transfer;

#[cfg(test)]
mod tests;

pub use domain::{
    AttendanceStatus, DepartmentId, Placement, ProgramId, PromotionLog, PromotionLogId,
    PromotionLogStatus, PromotionStatus, PromotionType, RecordId, ResultStatus, SessionId,
    Student, StudentAcademicRecord, StudentId, StudentStatus, TransferId, TransferRecord,
    TransferStatus, TransferType,
};
pub use marks::parse_marks_csv;
pub use promotion::{
    check_eligibility, BulkPromotionFailure, BulkPromotionReport, BulkPromotionRequest,
    EligibilityCriteria, EligibilityReport, EligibilityWarning, IneligibilityReason,
    PromotionEngine, PromotionError, PromotionOutcome, PromotionPreview, PromotionRequest,
};
pub use records::{AcademicRecordService, RecordError, SessionSummary};
pub use repository::{
    AcademicDataset, AcademicRepository, InMemoryAcademicStore, RepositoryError, UnitOfWork,
    Write,
};
pub use results::{
    evaluate_marks, AtktEligibility, EvaluationError, EvaluationStatus, MarkSheet,
    ResultEvaluation, ResultEvaluator, ResultPolicy, SubjectMark, SubjectResult,
};
pub use transfer::{format_tc_number, TransferEngine, TransferError, TransferRequest};
