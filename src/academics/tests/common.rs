use std::sync::Arc;

use chrono::NaiveDate;

use crate::academics::domain::{
    Placement, ProgramId, ResultStatus, SessionId, Student, StudentAcademicRecord, StudentId,
    StudentStatus,
};
use crate::academics::repository::{AcademicRepository, InMemoryAcademicStore, UnitOfWork};
use crate::academics::{AcademicRecordService, PromotionEngine, ResultEvaluator, TransferEngine};
use crate::audit::{ActorId, MemoryAuditSink};
use crate::clock::{Clock, FixedClock};
use crate::config::TransferPolicy;
use crate::rules::{
    default_rules, ConfigurationChange, InMemoryRuleStore, NoRuleCache, RuleContext, RuleEngine,
};

pub(super) const FROM_SESSION: &str = "2025-26";
pub(super) const TO_SESSION: &str = "2026-27";

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 15).expect("valid date")
}

pub(super) fn actor() -> ActorId {
    ActorId::new("registrar@college.test")
}

pub(super) fn placement(session: &str, year: u8) -> Placement {
    Placement {
        session: SessionId(session.to_string()),
        program: ProgramId("BSC".to_string()),
        department: None,
        year,
        division: "A".to_string(),
    }
}

pub(super) fn next_placement() -> Placement {
    placement(TO_SESSION, 2)
}

pub(super) struct Harness {
    pub store: Arc<InMemoryAcademicStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub clock: Arc<FixedClock>,
    pub rules: Arc<RuleEngine>,
}

pub(super) fn harness() -> Harness {
    let clock = Arc::new(FixedClock::on(today()));
    let audit = Arc::new(MemoryAuditSink::default());
    let rules = Arc::new(RuleEngine::new(
        Arc::new(InMemoryRuleStore::with_rules(default_rules())),
        Arc::new(NoRuleCache),
        clock.clone(),
        audit.clone(),
    ));

    Harness {
        store: Arc::new(InMemoryAcademicStore::default()),
        audit,
        clock,
        rules,
    }
}

impl Harness {
    pub fn records(&self) -> AcademicRecordService<InMemoryAcademicStore, MemoryAuditSink> {
        AcademicRecordService::new(self.store.clone(), self.audit.clone(), self.rules.clone())
    }

    pub fn evaluator(&self) -> ResultEvaluator<InMemoryAcademicStore, MemoryAuditSink> {
        ResultEvaluator::new(self.store.clone(), self.audit.clone(), self.rules.clone())
    }

    pub fn promotions(&self) -> PromotionEngine<InMemoryAcademicStore, MemoryAuditSink> {
        PromotionEngine::new(self.store.clone(), self.audit.clone(), self.rules.clone())
    }

    pub fn transfers(&self) -> TransferEngine<InMemoryAcademicStore, MemoryAuditSink> {
        self.transfers_with(TransferPolicy::default())
    }

    pub fn transfers_with(
        &self,
        policy: TransferPolicy,
    ) -> TransferEngine<InMemoryAcademicStore, MemoryAuditSink> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        TransferEngine::with_seed(self.store.clone(), self.audit.clone(), clock, policy, 7)
    }

    pub fn configure(&self, code: &str, value: &str) {
        let change = ConfigurationChange::new(RuleContext::global(), value);
        self.rules
            .set_configuration(code, change, &actor())
            .expect("configuration accepted");
    }

    /// Register a student placed in the first session, without a record.
    pub fn admit(&self, id: &str) -> Student {
        let student = Student {
            id: StudentId::new(id),
            name: format!("Student {id}"),
            admission_number: format!("ADM-{id}"),
            placement: placement(FROM_SESSION, 1),
            status: StudentStatus::Active,
            revision: 0,
        };
        self.store.add_student(student.clone()).expect("seed student");
        student
    }

    /// Admitted student with a record whose result already permits promotion.
    pub fn passed_student(&self, id: &str) -> StudentAcademicRecord {
        self.admit(id);
        self.records()
            .enroll(&StudentId::new(id), &actor())
            .expect("enrolled");
        self.edit_current(id, |record| record.result_status = ResultStatus::Pass)
    }

    pub fn current(&self, id: &str) -> StudentAcademicRecord {
        let student = self
            .store
            .student(&StudentId::new(id))
            .expect("fetch student")
            .expect("student present");
        self.store
            .current_record(&student)
            .expect("fetch record")
            .expect("record present")
    }

    pub fn student(&self, id: &str) -> Student {
        self.store
            .student(&StudentId::new(id))
            .expect("fetch student")
            .expect("student present")
    }

    pub fn edit_current(
        &self,
        id: &str,
        edit: impl FnOnce(&mut StudentAcademicRecord),
    ) -> StudentAcademicRecord {
        let mut record = self.current(id);
        edit(&mut record);
        let mut unit = UnitOfWork::new();
        unit.update_record(record);
        self.store.commit(unit).expect("record updated");
        self.current(id)
    }
}
