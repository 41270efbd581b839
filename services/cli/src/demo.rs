use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use academic_lifecycle::academics::{
    BulkPromotionRequest, MarkSheet, Placement, ProgramId, SessionId, Student, StudentId,
    StudentStatus, SubjectMark, TransferRequest, TransferType,
};
use academic_lifecycle::audit::{ActorId, MemoryAuditSink};
use academic_lifecycle::clock::{Clock, FixedClock};
use academic_lifecycle::config::AppConfig;
use academic_lifecycle::rules::{codes, ConfigurationChange, RuleContext};
use academic_lifecycle::AppError;
use chrono::{Local, NaiveDate};
use clap::Args;

use crate::infra::parse_date;
use crate::workspace::{DatasetFile, Workspace};

const FROM_SESSION: &str = "2025-26";
const TO_SESSION: &str = "2026-27";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the walkthrough runs on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Write the resulting dataset here so the other commands can pick it up
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
    /// Print the audit trail collected during the run
    #[arg(long)]
    pub(crate) show_audit: bool,
}

struct DemoStudent {
    id: &'static str,
    name: &'static str,
    attendance: f64,
    outstanding: f64,
    marks: [(&'static str, f64); 4],
}

fn cohort() -> Vec<DemoStudent> {
    vec![
        DemoStudent {
            id: "aarav",
            name: "Aarav Mehta",
            attendance: 88.0,
            outstanding: 0.0,
            marks: [("ENG", 68.0), ("PHY", 74.0), ("CHE", 59.0), ("MAT", 81.0)],
        },
        DemoStudent {
            id: "bela",
            name: "Bela Fernandes",
            attendance: 79.0,
            outstanding: 0.0,
            marks: [("ENG", 55.0), ("PHY", 37.0), ("CHE", 48.0), ("MAT", 62.0)],
        },
        DemoStudent {
            id: "chitra",
            name: "Chitra Rao",
            attendance: 70.0,
            outstanding: 0.0,
            marks: [("ENG", 61.0), ("PHY", 22.0), ("CHE", 51.0), ("MAT", 44.0)],
        },
        DemoStudent {
            id: "dev",
            name: "Dev Kulkarni",
            attendance: 62.0,
            outstanding: 1500.0,
            marks: [("ENG", 18.0), ("PHY", 41.0), ("CHE", 29.0), ("MAT", 40.0)],
        },
        DemoStudent {
            id: "esha",
            name: "Esha Qureshi",
            attendance: 93.0,
            outstanding: 0.0,
            marks: [("ENG", 77.0), ("PHY", 69.0), ("CHE", 72.0), ("MAT", 90.0)],
        },
    ]
}

fn placement(session: &str, year: u8) -> Placement {
    Placement {
        session: SessionId(session.to_string()),
        program: ProgramId("BSC".to_string()),
        department: None,
        year,
        division: "A".to_string(),
    }
}

pub(crate) fn run_demo(args: DemoArgs, config: &AppConfig) -> Result<(), AppError> {
    let DemoArgs {
        today,
        output,
        show_audit,
    } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());

    let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(today));
    let audit = Arc::new(MemoryAuditSink::default());
    let workspace = Workspace::new(DatasetFile::default(), config, clock, audit.clone());
    let actor = ActorId::new("demo-registrar");

    println!("Academic lifecycle demo ({today})");

    let session_scope = RuleContext::for_session(SessionId(FROM_SESSION.to_string()));
    workspace.rules.set_configuration(
        codes::COMPULSORY_SUBJECTS,
        ConfigurationChange::new(RuleContext::global(), r#"["ENG"]"#),
        &actor,
    )?;
    workspace.rules.set_configuration(
        codes::ATKT_MAX_SUBJECTS,
        ConfigurationChange::new(session_scope, "2")
            .as_override("University circular 14/2025", Some(ActorId::new("principal"))),
        &actor,
    )?;
    let cohort_context = placement(FROM_SESSION, 1).rule_context();
    println!(
        "- Rules for {FROM_SESSION}: pass {}%, grace {} marks, ATKT up to {} subjects, compulsory {:?}",
        workspace
            .rules
            .get_decimal(codes::PASS_PERCENTAGE, &cohort_context, 40.0)?,
        workspace
            .rules
            .get_decimal(codes::GRACE_MARKS, &cohort_context, 0.0)?,
        workspace
            .rules
            .get_integer(codes::ATKT_MAX_SUBJECTS, &cohort_context, 3)?,
        workspace
            .rules
            .get_array(codes::COMPULSORY_SUBJECTS, &cohort_context, &[])?,
    );

    let records = workspace.records();
    let evaluator = workspace.evaluator();
    println!("\nResults");
    for student in cohort() {
        let id = StudentId::new(student.id);
        workspace.store.add_student(Student {
            id: id.clone(),
            name: student.name.to_string(),
            admission_number: format!("BSC/2025/{}", student.id.to_ascii_uppercase()),
            placement: placement(FROM_SESSION, 1),
            status: StudentStatus::Active,
            revision: 0,
        })?;
        records.enroll(&id, &actor)?;
        records.record_attendance(&id, student.attendance, &actor)?;
        records.record_fee_status(&id, student.outstanding, &actor)?;

        let sheet = MarkSheet {
            student_id: id,
            examination_id: "annual-2026".to_string(),
            marks: student
                .marks
                .iter()
                .map(|(subject, obtained)| SubjectMark::new(*subject, *subject, 100.0, *obtained))
                .collect(),
        };
        let (evaluation, _) = evaluator.evaluate_and_record(&sheet, &actor)?;
        let graced: Vec<String> = evaluation
            .grace_subjects()
            .map(|subject| format!("{} +{}", subject.subject_id, subject.grace_applied))
            .collect();
        println!(
            "- {:<15} {:<5} aggregate {:>6.2}% | {}",
            student.name,
            evaluation.status.label(),
            evaluation.aggregate_percentage,
            evaluation.reason
        );
        if !graced.is_empty() {
            println!("  grace applied: {}", graced.join(", "));
        }
    }

    let promotions = workspace.promotions();
    println!("\nPromotion preview");
    for entry in promotions.preview_promotions(&SessionId(FROM_SESSION.to_string()), None)? {
        let verdict = match (entry.eligibility.eligible, entry.eligibility.conditional) {
            (true, false) => "eligible".to_string(),
            (true, true) => "conditionally eligible".to_string(),
            (false, _) => format!(
                "not eligible: {}",
                entry
                    .eligibility
                    .reasons
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        };
        println!("- {}: {verdict}", entry.student_id);
        for warning in &entry.eligibility.warnings {
            println!("  warning: {warning}");
        }
    }

    let report = promotions.bulk_promote(
        BulkPromotionRequest {
            student_ids: cohort()
                .iter()
                .map(|student| StudentId::new(student.id))
                .collect(),
            to: placement(TO_SESSION, 2),
            is_override: false,
            override_reason: None,
        },
        &actor,
    );
    println!(
        "\nBulk promotion to {TO_SESSION}: {} of {} promoted, {} failed",
        report.successful, report.total, report.failed
    );
    for failure in &report.errors {
        println!(
            "- {} [{}] {}",
            failure.student_id,
            failure.kind.label(),
            failure.message
        );
    }

    let esha = StudentId::new("esha");
    if let Some(outcome) = report
        .promoted
        .iter()
        .find(|outcome| outcome.student_id == esha)
    {
        let log = promotions.rollback_promotion(&outcome.log_id, &actor)?;
        println!(
            "\nRolled back promotion {} for {}; the {FROM_SESSION} record is current again",
            log.id, log.student_id
        );
    }

    let transfers = workspace.transfers();
    let request = TransferRequest::new(
        esha,
        TransferType::Migration,
        "Family relocating to Pune",
        today,
    )
    .destination("Fergusson College", Some("Pune".to_string()));
    let transfer = transfers.create_transfer_request(request, &actor)?;
    transfers.approve_transfer(&transfer.id, &actor)?;
    let issued = transfers.issue_transfer_certificate(&transfer.id, &actor)?;
    println!(
        "\nTransfer certificate {} issued to {} ({})",
        issued.tc_number,
        issued.student_id,
        issued.status.label()
    );

    let summary = records.session_summary(&SessionId(FROM_SESSION.to_string()), None)?;
    println!("\n{FROM_SESSION} cohort summary");
    println!("- results: {}", render_counts(&summary.by_result_status));
    println!("- promotion: {}", render_counts(&summary.by_promotion_status));
    println!("- carrying backlogs: {}", summary.with_backlogs);

    let events = audit.events();
    let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &events {
        *tally.entry(event.event_type.as_str()).or_default() += 1;
    }
    println!("\nAudit trail: {} events", events.len());
    for (event_type, count) in &tally {
        println!("- {event_type}: {count}");
    }
    if show_audit {
        for event in &events {
            println!(
                "  {} {} {} by {}",
                event.recorded_at.format("%Y-%m-%d %H:%M"),
                event.event_type,
                event.subject,
                event.actor
            );
        }
    }

    if let Some(path) = output {
        workspace.snapshot()?.write(&path)?;
        println!("\nDataset written to {}", path.display());
    }

    Ok(())
}

fn render_counts(counts: &BTreeMap<&'static str, usize>) -> String {
    counts
        .iter()
        .map(|(status, count)| format!("{status}={count}"))
        .collect::<Vec<_>>()
        .join(", ")
}
