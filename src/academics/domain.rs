use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::ActorId;
pub use crate::rules::{DepartmentId, ProgramId, SessionId};
use crate::rules::RuleContext;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentId(pub String);

impl StudentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for academic records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

/// Identifier wrapper for promotion logs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromotionLogId(pub String);

/// Identifier wrapper for transfer (leaving certificate) records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(pub String);

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

macro_rules! display_inner {
    ($($name:ident),+) => {
        $(
            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

display_inner!(RecordId, PromotionLogId, TransferId);

impl RecordId {
    pub fn generate() -> Self {
        Self(generated_id())
    }
}

impl PromotionLogId {
    pub fn generate() -> Self {
        Self(generated_id())
    }
}

impl TransferId {
    pub fn generate() -> Self {
        Self(generated_id())
    }
}

/// Where a student sits for one academic session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub session: SessionId,
    pub program: ProgramId,
    pub department: Option<DepartmentId>,
    pub year: u8,
    pub division: String,
}

impl Placement {
    pub fn rule_context(&self) -> RuleContext {
        RuleContext {
            session: Some(self.session.clone()),
            program: Some(self.program.clone()),
            department: self.department.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Transferred,
    Alumni,
    Inactive,
}

impl StudentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Transferred => "transferred",
            StudentStatus::Alumni => "alumni",
            StudentStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub admission_number: String,
    pub placement: Placement,
    pub status: StudentStatus,
    #[serde(default)]
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Prospect,
    Active,
    ExamPending,
    Pass,
    Atkt,
    Fail,
    TcIssued,
    Completed,
}

impl ResultStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ResultStatus::Prospect => "prospect",
            ResultStatus::Active => "active",
            ResultStatus::ExamPending => "exam_pending",
            ResultStatus::Pass => "pass",
            ResultStatus::Atkt => "atkt",
            ResultStatus::Fail => "fail",
            ResultStatus::TcIssued => "tc_issued",
            ResultStatus::Completed => "completed",
        }
    }

    /// Statuses from which a student may move on to the next session.
    pub const fn permits_promotion(self) -> bool {
        matches!(
            self,
            ResultStatus::Pass | ResultStatus::Atkt | ResultStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    NotEligible,
    Eligible,
    Promoted,
    ConditionallyPromoted,
    Repeated,
    Transferred,
}

impl PromotionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PromotionStatus::NotEligible => "not_eligible",
            PromotionStatus::Eligible => "eligible",
            PromotionStatus::Promoted => "promoted",
            PromotionStatus::ConditionallyPromoted => "conditionally_promoted",
            PromotionStatus::Repeated => "repeated",
            PromotionStatus::Transferred => "transferred",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Eligible,
    NotEligible,
    Condonable,
}

impl AttendanceStatus {
    /// Classify an attendance percentage against the minimum and condonable thresholds.
    pub fn classify(percentage: f64, minimum: f64, condonable_from: f64) -> Self {
        if percentage >= minimum {
            AttendanceStatus::Eligible
        } else if percentage >= condonable_from {
            AttendanceStatus::Condonable
        } else {
            AttendanceStatus::NotEligible
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            AttendanceStatus::Eligible => "eligible",
            AttendanceStatus::NotEligible => "not_eligible",
            AttendanceStatus::Condonable => "condonable",
        }
    }
}

/// A student's standing for one academic session. Exactly one live record exists per
/// (student, session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAcademicRecord {
    pub id: RecordId,
    pub student_id: StudentId,
    pub placement: Placement,
    pub result_status: ResultStatus,
    pub promotion_status: PromotionStatus,
    pub backlog_count: u32,
    pub max_atkt_attempts: u32,
    pub current_atkt_attempt: u32,
    pub attendance_percentage: Option<f64>,
    pub attendance_status: AttendanceStatus,
    pub fee_cleared: bool,
    pub outstanding_amount: f64,
    pub aggregate_percentage: Option<f64>,
    pub evaluated_on: Option<NaiveDate>,
    pub is_locked: bool,
    pub locked_by: Option<ActorId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
}

impl StudentAcademicRecord {
    pub fn new(student_id: StudentId, placement: Placement, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::generate(),
            student_id,
            placement,
            result_status: ResultStatus::Active,
            promotion_status: PromotionStatus::NotEligible,
            backlog_count: 0,
            max_atkt_attempts: 0,
            current_atkt_attempt: 0,
            attendance_percentage: None,
            attendance_status: AttendanceStatus::Eligible,
            fee_cleared: true,
            outstanding_amount: 0.0,
            aggregate_percentage: None,
            evaluated_on: None,
            is_locked: false,
            locked_by: None,
            locked_at: None,
            created_at,
            deleted_at: None,
            revision: 0,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.placement.session
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Live record for the session the student is currently placed in.
    pub fn is_current(&self, student: &Student) -> bool {
        self.is_live()
            && self.student_id == student.id
            && self.placement.session == student.placement.session
    }

    pub fn has_backlogs(&self) -> bool {
        self.backlog_count > 0
    }

    /// Result and attendance allow promotion. Fee and backlog limits are rule-driven and
    /// checked by the promotion eligibility policy.
    pub fn is_eligible_for_promotion(&self) -> bool {
        self.result_status.permits_promotion()
            && self.attendance_status != AttendanceStatus::NotEligible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    Promoted,
    ConditionallyPromoted,
    Repeated,
    Demoted,
    Transferred,
    TcIssued,
}

impl PromotionType {
    pub const fn label(self) -> &'static str {
        match self {
            PromotionType::Promoted => "promoted",
            PromotionType::ConditionallyPromoted => "conditionally_promoted",
            PromotionType::Repeated => "repeated",
            PromotionType::Demoted => "demoted",
            PromotionType::Transferred => "transferred",
            PromotionType::TcIssued => "tc_issued",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionLogStatus {
    Pending,
    Completed,
    Cancelled,
    RolledBack,
}

impl PromotionLogStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PromotionLogStatus::Pending => "pending",
            PromotionLogStatus::Completed => "completed",
            PromotionLogStatus::Cancelled => "cancelled",
            PromotionLogStatus::RolledBack => "rolled_back",
        }
    }
}

/// Snapshot of one promotion event. Immutable once completed except for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionLog {
    pub id: PromotionLogId,
    pub student_id: StudentId,
    pub from: Placement,
    pub from_result_status: ResultStatus,
    pub to: Placement,
    pub to_result_status: ResultStatus,
    pub promotion_type: PromotionType,
    pub was_eligible: bool,
    pub attendance_percentage: Option<f64>,
    pub fee_cleared: bool,
    pub outstanding_amount: f64,
    pub backlog_count: u32,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub eligibility_reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub performed_by: ActorId,
    pub status: PromotionLogStatus,
    pub previous_record_id: RecordId,
    pub new_record_id: RecordId,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rolled_back_by: Option<ActorId>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Regular,
    MidSession,
    Migration,
    Expulsion,
}

impl std::str::FromStr for TransferType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "regular" => Ok(Self::Regular),
            "mid_session" => Ok(Self::MidSession),
            "migration" => Ok(Self::Migration),
            "expulsion" => Ok(Self::Expulsion),
            other => Err(format!("unknown transfer type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Issued,
    Cancelled,
}

impl TransferStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Issued => "issued",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One leaving-certificate workflow instance. The academic snapshot is taken when the
/// request is created and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub tc_number: String,
    pub student_id: StudentId,
    pub record_id: RecordId,
    pub placement: Placement,
    pub result_status: ResultStatus,
    pub attendance_percentage: Option<f64>,
    pub fee_cleared: bool,
    pub outstanding_amount: f64,
    pub backlog_count: u32,
    pub transfer_type: TransferType,
    pub reason: String,
    pub destination_institution: Option<String>,
    pub destination_address: Option<String>,
    pub leaving_date: NaiveDate,
    pub remarks: Option<String>,
    pub status: TransferStatus,
    pub is_override: bool,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<ActorId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub issued_by: Option<ActorId>,
    pub issued_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<ActorId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub revision: u64,
}
