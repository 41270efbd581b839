use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use academic_lifecycle::academics::{
    parse_marks_csv, BulkPromotionRequest, DepartmentId, MarkSheet, Placement, ProgramId,
    PromotionLogId, PromotionRequest, RecordId, SessionId, Student, StudentId, StudentStatus,
    TransferId, TransferRequest, TransferType,
};
use academic_lifecycle::audit::{ActorId, TracingAuditSink};
use academic_lifecycle::clock::SystemClock;
use academic_lifecycle::config::AppConfig;
use academic_lifecycle::rules::{
    AcademicRule, ConfigurationChange, RuleCategory, RuleContext, ValueType,
};
use academic_lifecycle::AppError;
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cli::ContextArgs;
use crate::infra::{parse_date, print_json, TargetArgs};
use crate::workspace::{DatasetFile, Workspace};

const CATEGORIES: [RuleCategory; 7] = [
    RuleCategory::Result,
    RuleCategory::Attendance,
    RuleCategory::Promotion,
    RuleCategory::Fee,
    RuleCategory::Atkt,
    RuleCategory::Examination,
    RuleCategory::General,
];

#[derive(Args, Debug)]
pub(crate) struct SetRuleArgs {
    /// Rule code, e.g. PASS_PERCENTAGE
    pub(crate) code: String,
    /// Raw value, decoded against the rule's declared type
    pub(crate) value: String,
    #[arg(long)]
    pub(crate) session: Option<String>,
    #[arg(long)]
    pub(crate) program: Option<String>,
    #[arg(long)]
    pub(crate) department: Option<String>,
    /// Mark the configuration as an override; a reason is mandatory
    #[arg(long)]
    pub(crate) override_reason: Option<String>,
    #[arg(long, requires = "override_reason")]
    pub(crate) approved_by: Option<String>,
    /// First day the value applies (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) effective_from: Option<NaiveDate>,
    /// Last day the value applies (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) effective_to: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct AdmitArgs {
    #[arg(long)]
    pub(crate) id: String,
    #[arg(long)]
    pub(crate) name: String,
    #[arg(long)]
    pub(crate) admission_number: String,
    #[arg(long)]
    pub(crate) session: String,
    #[arg(long)]
    pub(crate) program: String,
    #[arg(long)]
    pub(crate) department: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub(crate) year: u8,
    #[arg(long, default_value = "A")]
    pub(crate) division: String,
    /// Open the academic record for the admitted session straight away
    #[arg(long)]
    pub(crate) enroll: bool,
}

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    #[arg(long)]
    pub(crate) student: String,
    /// CSV with subject_id, subject_name, max_marks, obtained_marks, absent columns
    #[arg(long)]
    pub(crate) marks: PathBuf,
    #[arg(long, default_value = "final")]
    pub(crate) examination: String,
    /// Print the evaluation without updating the academic record
    #[arg(long)]
    pub(crate) dry_run: bool,
}

#[derive(Args, Debug)]
pub(crate) struct PromoteArgs {
    #[arg(long)]
    pub(crate) student: String,
    #[command(flatten)]
    pub(crate) target: TargetArgs,
    /// Promote despite failed eligibility checks, recording this reason
    #[arg(long)]
    pub(crate) override_reason: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct BulkPromoteArgs {
    #[arg(long, value_delimiter = ',', required = true)]
    pub(crate) students: Vec<String>,
    #[command(flatten)]
    pub(crate) target: TargetArgs,
    #[arg(long)]
    pub(crate) override_reason: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct TransferRequestArgs {
    #[arg(long)]
    pub(crate) student: String,
    /// regular, mid_session, migration or expulsion
    #[arg(long, default_value = "regular")]
    pub(crate) transfer_type: TransferType,
    #[arg(long)]
    pub(crate) reason: String,
    #[arg(long)]
    pub(crate) destination: Option<String>,
    #[arg(long)]
    pub(crate) destination_address: Option<String>,
    /// Leaving date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) leaving_date: Option<NaiveDate>,
    #[arg(long)]
    pub(crate) remarks: Option<String>,
    /// Accept the request even though fees are outstanding
    #[arg(long)]
    pub(crate) override_fees: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransferStep {
    Approve,
    Issue,
    Cancel(String),
}

#[derive(Debug, Serialize)]
struct RuleRow<'a> {
    code: &'a str,
    name: &'a str,
    category: &'static str,
    value_type: ValueType,
    value: Option<String>,
    mandatory: bool,
}

impl<'a> From<&'a AcademicRule> for RuleRow<'a> {
    fn from(rule: &'a AcademicRule) -> Self {
        Self {
            code: rule.code.as_str(),
            name: &rule.name,
            category: rule.category.label(),
            value_type: rule.value_type,
            value: rule.typed_value().map(|value| value.to_raw()),
            mandatory: rule.is_mandatory,
        }
    }
}

type CliWorkspace = Workspace<TracingAuditSink>;

fn open(ctx: &ContextArgs, config: &AppConfig) -> Result<CliWorkspace, AppError> {
    let dataset = DatasetFile::read(&ctx.dataset)?;
    Ok(Workspace::new(
        dataset,
        config,
        Arc::new(SystemClock),
        Arc::new(TracingAuditSink),
    ))
}

fn save(ctx: &ContextArgs, workspace: &CliWorkspace) -> Result<(), AppError> {
    workspace.snapshot()?.write(&ctx.dataset)
}

fn actor(ctx: &ContextArgs) -> ActorId {
    ActorId::new(ctx.actor.clone())
}

fn rule_context(
    session: Option<String>,
    program: Option<String>,
    department: Option<String>,
) -> Result<RuleContext, AppError> {
    let Some(session) = session else {
        if program.is_some() || department.is_some() {
            return Err(AppError::Input(
                "--program and --department require --session".to_string(),
            ));
        }
        return Ok(RuleContext::global());
    };

    let mut context = RuleContext::for_session(SessionId(session));
    if let Some(program) = program {
        context = context.with_program(ProgramId(program));
    }
    if let Some(department) = department {
        context = context.with_department(DepartmentId(department));
    }
    Ok(context)
}

pub(crate) fn list_rules(
    ctx: &ContextArgs,
    config: &AppConfig,
    category: Option<RuleCategory>,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let categories = match category {
        Some(category) => vec![category],
        None => CATEGORIES.to_vec(),
    };

    let mut rules = Vec::new();
    for category in categories {
        rules.extend(workspace.rules.rules_by_category(category)?);
    }
    let rows: Vec<RuleRow<'_>> = rules.iter().map(RuleRow::from).collect();
    print_json(&rows)
}

pub(crate) fn set_rule(
    ctx: &ContextArgs,
    config: &AppConfig,
    args: SetRuleArgs,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let context = rule_context(args.session, args.program, args.department)?;

    let mut change = ConfigurationChange::new(context, args.value)
        .effective_between(args.effective_from, args.effective_to);
    if let Some(reason) = args.override_reason {
        change = change.as_override(reason, args.approved_by.map(ActorId::new));
    }

    let stored = workspace
        .rules
        .set_configuration(&args.code, change, &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&stored)
}

pub(crate) fn unset_rule(
    ctx: &ContextArgs,
    config: &AppConfig,
    code: &str,
    session: Option<String>,
    program: Option<String>,
    department: Option<String>,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let context = rule_context(session, program, department)?;
    let removed = workspace
        .rules
        .remove_configuration(code, &context, &actor(ctx))?;
    if removed {
        save(ctx, &workspace)?;
    }
    print_json(&json!({ "code": code, "removed": removed }))
}

pub(crate) fn admit(
    ctx: &ContextArgs,
    config: &AppConfig,
    args: AdmitArgs,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let student = Student {
        id: StudentId::new(args.id),
        name: args.name,
        admission_number: args.admission_number,
        placement: Placement {
            session: SessionId(args.session),
            program: ProgramId(args.program),
            department: args.department.map(DepartmentId),
            year: args.year,
            division: args.division,
        },
        status: StudentStatus::Active,
        revision: 0,
    };
    workspace.store.add_student(student.clone())?;
    info!(student = %student.id, "student admitted");

    let record = if args.enroll {
        Some(workspace.records().enroll(&student.id, &actor(ctx))?)
    } else {
        None
    };
    save(ctx, &workspace)?;
    print_json(&json!({ "student": student, "record": record }))
}

pub(crate) fn enroll(
    ctx: &ContextArgs,
    config: &AppConfig,
    student: &str,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let record = workspace
        .records()
        .enroll(&StudentId::new(student), &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&record)
}

pub(crate) fn attendance(
    ctx: &ContextArgs,
    config: &AppConfig,
    student: &str,
    percentage: f64,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let student = StudentId::new(student);
    let record = workspace
        .records()
        .record_attendance(&student, percentage, &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&record)
}

pub(crate) fn fees(
    ctx: &ContextArgs,
    config: &AppConfig,
    student: &str,
    outstanding: f64,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let student = StudentId::new(student);
    let record = workspace
        .records()
        .record_fee_status(&student, outstanding, &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&record)
}

pub(crate) fn set_lock(
    ctx: &ContextArgs,
    config: &AppConfig,
    record: &str,
    locked: bool,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let records = workspace.records();
    let id = RecordId(record.to_string());
    let record = if locked {
        records.lock_record(&id, &actor(ctx))?
    } else {
        records.unlock_record(&id, &actor(ctx))?
    };
    save(ctx, &workspace)?;
    print_json(&record)
}

pub(crate) fn summary(
    ctx: &ContextArgs,
    config: &AppConfig,
    session: &str,
    program: Option<String>,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let program = program.map(ProgramId);
    let summary = workspace
        .records()
        .session_summary(&SessionId(session.to_string()), program.as_ref())?;
    print_json(&summary)
}

pub(crate) fn history(
    ctx: &ContextArgs,
    config: &AppConfig,
    student: &str,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let student = StudentId::new(student);
    let promotions = workspace.promotions().promotion_history(&student)?;
    let transfers = workspace.transfers().transfer_history(&student)?;
    print_json(&json!({
        "student_id": student,
        "promotions": promotions,
        "transfers": transfers,
    }))
}

pub(crate) fn evaluate(
    ctx: &ContextArgs,
    config: &AppConfig,
    args: EvaluateArgs,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let marks = parse_marks_csv(File::open(&args.marks)?)?;
    let sheet = MarkSheet {
        student_id: StudentId::new(args.student),
        examination_id: args.examination,
        marks,
    };

    let evaluator = workspace.evaluator();
    if args.dry_run {
        let evaluation = evaluator.evaluate(&sheet)?;
        return print_json(&evaluation);
    }

    let (evaluation, record) = evaluator.evaluate_and_record(&sheet, &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&json!({ "evaluation": evaluation, "record": record }))
}

pub(crate) fn promote(
    ctx: &ContextArgs,
    config: &AppConfig,
    args: PromoteArgs,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let mut request = PromotionRequest::new(StudentId::new(args.student), args.target.placement());
    if let Some(reason) = args.override_reason {
        request = request.with_override(reason);
    }

    let outcome = workspace.promotions().promote_student(request, &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&outcome)
}

pub(crate) fn bulk_promote(
    ctx: &ContextArgs,
    config: &AppConfig,
    args: BulkPromoteArgs,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let request = BulkPromotionRequest {
        student_ids: args.students.into_iter().map(StudentId::new).collect(),
        to: args.target.placement(),
        is_override: args.override_reason.is_some(),
        override_reason: args.override_reason,
    };

    let report = workspace.promotions().bulk_promote(request, &actor(ctx));
    if report.successful > 0 {
        save(ctx, &workspace)?;
    }
    print_json(&report)
}

pub(crate) fn preview(
    ctx: &ContextArgs,
    config: &AppConfig,
    session: &str,
    program: Option<String>,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let program = program.map(ProgramId);
    let preview = workspace
        .promotions()
        .preview_promotions(&SessionId(session.to_string()), program.as_ref())?;
    print_json(&preview)
}

pub(crate) fn rollback(ctx: &ContextArgs, config: &AppConfig, log: &str) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let log = workspace
        .promotions()
        .rollback_promotion(&PromotionLogId(log.to_string()), &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&log)
}

pub(crate) fn request_transfer(
    ctx: &ContextArgs,
    config: &AppConfig,
    args: TransferRequestArgs,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let leaving_date = args
        .leaving_date
        .unwrap_or_else(|| workspace.clock.today());

    let mut request = TransferRequest::new(
        StudentId::new(args.student),
        args.transfer_type,
        args.reason,
        leaving_date,
    );
    if let Some(destination) = args.destination {
        request = request.destination(destination, args.destination_address);
    }
    request.remarks = args.remarks;
    request.is_override = args.override_fees;

    let transfer = workspace
        .transfers()
        .create_transfer_request(request, &actor(ctx))?;
    save(ctx, &workspace)?;
    print_json(&transfer)
}

pub(crate) fn advance_transfer(
    ctx: &ContextArgs,
    config: &AppConfig,
    id: &str,
    step: TransferStep,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    let transfers = workspace.transfers();
    let id = TransferId(id.to_string());
    let actor = actor(ctx);

    let transfer = match step {
        TransferStep::Approve => transfers.approve_transfer(&id, &actor)?,
        TransferStep::Issue => transfers.issue_transfer_certificate(&id, &actor)?,
        TransferStep::Cancel(reason) => transfers.cancel_transfer(&id, reason, &actor)?,
    };
    save(ctx, &workspace)?;
    print_json(&transfer)
}

pub(crate) fn find_transfer(
    ctx: &ContextArgs,
    config: &AppConfig,
    tc_number: &str,
) -> Result<(), AppError> {
    let workspace = open(ctx, config)?;
    match workspace.transfers().find_by_tc_number(tc_number)? {
        Some(transfer) => print_json(&transfer),
        None => Err(AppError::Input(format!("no transfer with TC number {tc_number}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::test_config;
    use academic_lifecycle::academics::{ResultStatus, TransferStatus};
    use std::fs;

    fn context(dir: &tempfile::TempDir) -> ContextArgs {
        ContextArgs {
            dataset: dir.path().join("dataset.json"),
            actor: "registrar".to_string(),
        }
    }

    fn reload(ctx: &ContextArgs) -> DatasetFile {
        DatasetFile::read(&ctx.dataset).expect("dataset readable")
    }

    fn admit_args(id: &str) -> AdmitArgs {
        AdmitArgs {
            id: id.to_string(),
            name: format!("Student {id}"),
            admission_number: format!("ADM-{id}"),
            session: "2025-26".to_string(),
            program: "BSC".to_string(),
            department: None,
            year: 1,
            division: "A".to_string(),
            enroll: true,
        }
    }

    fn target() -> TargetArgs {
        TargetArgs {
            to_session: "2026-27".to_string(),
            to_program: "BSC".to_string(),
            to_department: None,
            to_year: 2,
            to_division: "A".to_string(),
        }
    }

    #[test]
    fn context_flags_need_a_session() {
        assert!(rule_context(None, Some("BSC".into()), None).is_err());
        assert!(rule_context(None, None, None)
            .expect("global")
            .is_global());
        let context = rule_context(Some("2025-26".into()), None, Some("PHY".into()))
            .expect("scoped");
        assert_eq!(context.department, Some(DepartmentId("PHY".to_string())));
    }

    #[test]
    fn commands_persist_every_mutation() {
        let dir = tempfile::tempdir().expect("temp dir");
        let ctx = context(&dir);
        let config = test_config();

        admit(&ctx, &config, admit_args("s1")).expect("admitted");
        set_rule(
            &ctx,
            &config,
            SetRuleArgs {
                code: "GRACE_MARKS".to_string(),
                value: "6".to_string(),
                session: Some("2025-26".to_string()),
                program: None,
                department: None,
                override_reason: None,
                approved_by: None,
                effective_from: None,
                effective_to: None,
            },
        )
        .expect("rule configured");
        assert_eq!(reload(&ctx).configurations.len(), 1);

        let marks = dir.path().join("marks.csv");
        fs::write(
            &marks,
            "subject_id,subject_name,max_marks,obtained_marks,absent\nPHY,Physics,100,35,\n",
        )
        .expect("marks written");
        evaluate(
            &ctx,
            &config,
            EvaluateArgs {
                student: "s1".to_string(),
                marks,
                examination: "final".to_string(),
                dry_run: false,
            },
        )
        .expect("evaluated");
        let record = &reload(&ctx).academics.records[0];
        assert_eq!(record.result_status, ResultStatus::Pass);

        promote(
            &ctx,
            &config,
            PromoteArgs {
                student: "s1".to_string(),
                target: target(),
                override_reason: None,
            },
        )
        .expect("promoted");
        let dataset = reload(&ctx);
        assert_eq!(dataset.academics.records.len(), 2);
        assert_eq!(dataset.academics.promotion_logs.len(), 1);

        request_transfer(
            &ctx,
            &config,
            TransferRequestArgs {
                student: "s1".to_string(),
                transfer_type: TransferType::Regular,
                reason: "Relocating".to_string(),
                destination: Some("Hill View College".to_string()),
                destination_address: None,
                leaving_date: None,
                remarks: None,
                override_fees: false,
            },
        )
        .expect("requested");
        let transfer_id = reload(&ctx).academics.transfers[0].id.0.clone();
        advance_transfer(&ctx, &config, &transfer_id, TransferStep::Approve).expect("approved");
        advance_transfer(&ctx, &config, &transfer_id, TransferStep::Issue).expect("issued");

        let dataset = reload(&ctx);
        assert_eq!(dataset.academics.transfers[0].status, TransferStatus::Issued);
        assert_eq!(dataset.academics.students[0].status, StudentStatus::Transferred);
    }

    #[test]
    fn failed_commands_leave_the_dataset_untouched() {
        let dir = tempfile::tempdir().expect("temp dir");
        let ctx = context(&dir);
        let config = test_config();
        admit(&ctx, &config, admit_args("s1")).expect("admitted");
        let before = fs::read_to_string(&ctx.dataset).expect("dataset");

        let err = promote(
            &ctx,
            &config,
            PromoteArgs {
                student: "s1".to_string(),
                target: target(),
                override_reason: None,
            },
        )
        .expect_err("record is still active, not passed");
        assert_eq!(err.kind(), academic_lifecycle::ErrorKind::Eligibility);
        assert_eq!(fs::read_to_string(&ctx.dataset).expect("dataset"), before);
    }
}
