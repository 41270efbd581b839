use std::sync::Arc;

use academic_lifecycle::academics::{
    AcademicDataset, AcademicRecordService, AcademicRepository, EvaluationStatus,
    InMemoryAcademicStore, MarkSheet, Placement, ProgramId, PromotionEngine, PromotionLogStatus,
    PromotionRequest, ResultEvaluator, ResultStatus, SessionId, Student, StudentId,
    StudentStatus, SubjectMark, TransferEngine, TransferRequest, TransferStatus, TransferType,
};
use academic_lifecycle::audit::{ActorId, MemoryAuditSink};
use academic_lifecycle::clock::{Clock, FixedClock};
use academic_lifecycle::config::TransferPolicy;
use academic_lifecycle::rules::{
    codes, default_rules, ConfigurationChange, InMemoryRuleStore, NoRuleCache, RuleContext,
    RuleEngine,
};
use chrono::NaiveDate;

fn placement(session: &str, year: u8) -> Placement {
    Placement {
        session: SessionId(session.to_string()),
        program: ProgramId("BA".to_string()),
        department: None,
        year,
        division: "B".to_string(),
    }
}

fn dataset() -> AcademicDataset {
    let students = ["anika", "bilal", "chen"]
        .into_iter()
        .map(|id| Student {
            id: StudentId::new(id),
            name: id.to_string(),
            admission_number: format!("2025/{id}"),
            placement: placement("2025-26", 1),
            status: StudentStatus::Active,
            revision: 0,
        })
        .collect();
    AcademicDataset {
        students,
        ..AcademicDataset::default()
    }
}

struct Host {
    store: Arc<InMemoryAcademicStore>,
    audit: Arc<MemoryAuditSink>,
    clock: Arc<FixedClock>,
    rules: Arc<RuleEngine>,
}

impl Host {
    fn new(dataset: AcademicDataset) -> Self {
        let clock = Arc::new(FixedClock::on(
            NaiveDate::from_ymd_opt(2026, 4, 30).expect("valid date"),
        ));
        let audit = Arc::new(MemoryAuditSink::default());
        let rules = Arc::new(RuleEngine::new(
            Arc::new(InMemoryRuleStore::with_rules(default_rules())),
            Arc::new(NoRuleCache),
            clock.clone(),
            audit.clone(),
        ));
        Self {
            store: Arc::new(InMemoryAcademicStore::from_dataset(dataset)),
            audit,
            clock,
            rules,
        }
    }
}

fn registrar() -> ActorId {
    ActorId::new("registrar")
}

fn sheet(student: &str, scores: &[(&str, f64)]) -> MarkSheet {
    MarkSheet {
        student_id: StudentId::new(student),
        examination_id: "annual-2026".to_string(),
        marks: scores
            .iter()
            .map(|(subject, obtained)| SubjectMark::new(*subject, *subject, 100.0, *obtained))
            .collect(),
    }
}

#[test]
fn a_year_of_records_results_promotion_and_transfer() {
    let host = Host::new(dataset());
    let (store, audit, rules) = (&host.store, &host.audit, &host.rules);
    let records = AcademicRecordService::new(store.clone(), audit.clone(), rules.clone());
    let evaluator = ResultEvaluator::new(store.clone(), audit.clone(), rules.clone());
    let promotions = PromotionEngine::new(store.clone(), audit.clone(), rules.clone());
    let clock: Arc<dyn Clock> = host.clock.clone();
    let transfers = TransferEngine::with_seed(
        host.store.clone(),
        host.audit.clone(),
        clock,
        TransferPolicy::default(),
        42,
    );

    for id in ["anika", "bilal", "chen"] {
        records
            .enroll(&StudentId::new(id), &registrar())
            .expect("enrolled");
        records
            .record_attendance(&StudentId::new(id), 82.0, &registrar())
            .expect("attendance");
    }

    // A session-level grace override only for this cohort.
    let cohort = RuleContext::for_session(SessionId("2025-26".into()));
    host.rules
        .set_configuration(
            codes::GRACE_MARKS,
            ConfigurationChange::new(cohort, "8")
                .as_override("Board moderation", Some(ActorId::new("principal"))),
            &registrar(),
        )
        .expect("override stored");

    let (anika, _) = evaluator
        .evaluate_and_record(&sheet("anika", &[("HIS", 33.0), ("ECO", 71.0)]), &registrar())
        .expect("anika evaluated");
    assert_eq!(anika.status, EvaluationStatus::Pass);
    assert_eq!(anika.subjects[0].grace_applied, 7.0);

    let (bilal, record) = evaluator
        .evaluate_and_record(&sheet("bilal", &[("HIS", 20.0), ("ECO", 64.0)]), &registrar())
        .expect("bilal evaluated");
    assert_eq!(bilal.status, EvaluationStatus::Atkt);
    assert_eq!(record.backlog_count, 1);

    let (chen, _) = evaluator
        .evaluate_and_record(&sheet("chen", &[("HIS", 58.0), ("ECO", 61.0)]), &registrar())
        .expect("chen evaluated");
    assert_eq!(chen.status, EvaluationStatus::Pass);

    let preview = promotions
        .preview_promotions(&SessionId("2025-26".into()), None)
        .expect("preview");
    assert!(preview.iter().all(|entry| entry.eligibility.eligible));

    let anika_promotion = promotions
        .promote_student(
            PromotionRequest::new(StudentId::new("anika"), placement("2026-27", 2)),
            &registrar(),
        )
        .expect("anika promoted");
    let bilal_promotion = promotions
        .promote_student(
            PromotionRequest::new(StudentId::new("bilal"), placement("2026-27", 2)),
            &registrar(),
        )
        .expect("bilal promoted");
    assert!(bilal_promotion.conditional);

    let rolled_back = promotions
        .rollback_promotion(&anika_promotion.log_id, &registrar())
        .expect("rolled back");
    assert_eq!(rolled_back.status, PromotionLogStatus::RolledBack);

    let transfer = transfers
        .create_transfer_request(
            TransferRequest::new(
                StudentId::new("chen"),
                TransferType::Migration,
                "Moving abroad",
                NaiveDate::from_ymd_opt(2026, 5, 31).expect("valid date"),
            ),
            &registrar(),
        )
        .expect("requested");
    transfers
        .approve_transfer(&transfer.id, &registrar())
        .expect("approved");
    let issued = transfers
        .issue_transfer_certificate(&transfer.id, &registrar())
        .expect("issued");
    assert_eq!(issued.status, TransferStatus::Issued);

    let snapshot = host.store.dataset().expect("dataset exported");
    let json = serde_json::to_string(&snapshot).expect("serialize");
    let restored: AcademicDataset = serde_json::from_str(&json).expect("deserialize");
    let reloaded = InMemoryAcademicStore::from_dataset(restored);

    let anika = reloaded
        .student(&StudentId::new("anika"))
        .expect("fetch")
        .expect("present");
    assert_eq!(anika.placement.session.0, "2025-26");
    let bilal = reloaded
        .student(&StudentId::new("bilal"))
        .expect("fetch")
        .expect("present");
    assert_eq!(bilal.placement.session.0, "2026-27");
    let chen = reloaded
        .student(&StudentId::new("chen"))
        .expect("fetch")
        .expect("present");
    assert_eq!(chen.status, StudentStatus::Transferred);
    let chen_record = reloaded
        .current_record(&chen)
        .expect("fetch")
        .expect("present");
    assert_eq!(chen_record.result_status, ResultStatus::TcIssued);
    assert!(reloaded
        .transfer_by_tc(&issued.tc_number)
        .expect("lookup")
        .is_some());

    let events = host.audit.event_types();
    assert_eq!(events.iter().filter(|e| *e == "record.enrolled").count(), 3);
    assert_eq!(events.iter().filter(|e| *e == "result.recorded").count(), 3);
    assert!(events.contains(&"rule.configured".to_string()));
    assert!(events.contains(&"promotion.rolled_back".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("transfer.issued"));
}
