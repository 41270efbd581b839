use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::domain::{
    ProgramId, PromotionLog, PromotionLogId, RecordId, SessionId, Student, StudentAcademicRecord,
    StudentId, TransferId, TransferRecord, TransferStatus,
};
pub use crate::error::RepositoryError;

/// A staged write. Updates carry the entity as the caller last read it; the unit of work
/// bumps its revision so the store can reject writes based on stale reads.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    InsertRecord(StudentAcademicRecord),
    UpdateRecord(StudentAcademicRecord),
    InsertLog(PromotionLog),
    UpdateLog(PromotionLog),
    InsertTransfer(TransferRecord),
    UpdateTransfer(TransferRecord),
    UpdateStudent(Student),
}

/// Writes that must become visible together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_record(&mut self, record: StudentAcademicRecord) -> &mut Self {
        self.writes.push(Write::InsertRecord(record));
        self
    }

    pub fn update_record(&mut self, mut record: StudentAcademicRecord) -> &mut Self {
        record.revision += 1;
        self.writes.push(Write::UpdateRecord(record));
        self
    }

    pub fn insert_log(&mut self, log: PromotionLog) -> &mut Self {
        self.writes.push(Write::InsertLog(log));
        self
    }

    pub fn update_log(&mut self, mut log: PromotionLog) -> &mut Self {
        log.revision += 1;
        self.writes.push(Write::UpdateLog(log));
        self
    }

    pub fn insert_transfer(&mut self, transfer: TransferRecord) -> &mut Self {
        self.writes.push(Write::InsertTransfer(transfer));
        self
    }

    pub fn update_transfer(&mut self, mut transfer: TransferRecord) -> &mut Self {
        transfer.revision += 1;
        self.writes.push(Write::UpdateTransfer(transfer));
        self
    }

    pub fn update_student(&mut self, mut student: Student) -> &mut Self {
        student.revision += 1;
        self.writes.push(Write::UpdateStudent(student));
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Persistence abstraction over students, academic records, promotion logs and transfers.
pub trait AcademicRepository: Send + Sync {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    fn record(&self, id: &RecordId) -> Result<Option<StudentAcademicRecord>, RepositoryError>;
    /// The live record for (student, session), ignoring soft-deleted rows.
    fn record_for(
        &self,
        student: &StudentId,
        session: &SessionId,
    ) -> Result<Option<StudentAcademicRecord>, RepositoryError>;
    fn records_in(
        &self,
        session: &SessionId,
        program: Option<&ProgramId>,
    ) -> Result<Vec<StudentAcademicRecord>, RepositoryError>;
    fn promotion_log(&self, id: &PromotionLogId) -> Result<Option<PromotionLog>, RepositoryError>;
    fn promotion_logs_for(&self, student: &StudentId)
        -> Result<Vec<PromotionLog>, RepositoryError>;
    fn transfer(&self, id: &TransferId) -> Result<Option<TransferRecord>, RepositoryError>;
    fn transfers_for(&self, student: &StudentId) -> Result<Vec<TransferRecord>, RepositoryError>;
    fn transfer_by_tc(&self, tc_number: &str) -> Result<Option<TransferRecord>, RepositoryError>;
    /// Apply every write atomically. Fails without applying anything when a uniqueness
    /// constraint or revision check would be violated.
    fn commit(&self, unit: UnitOfWork) -> Result<(), RepositoryError>;

    /// The record for the session the student is currently placed in.
    fn current_record(
        &self,
        student: &Student,
    ) -> Result<Option<StudentAcademicRecord>, RepositoryError> {
        self.record_for(&student.id, &student.placement.session)
    }
}

/// Serializable contents of an [`InMemoryAcademicStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcademicDataset {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub records: Vec<StudentAcademicRecord>,
    #[serde(default)]
    pub promotion_logs: Vec<PromotionLog>,
    #[serde(default)]
    pub transfers: Vec<TransferRecord>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    students: BTreeMap<StudentId, Student>,
    records: BTreeMap<RecordId, StudentAcademicRecord>,
    logs: BTreeMap<PromotionLogId, PromotionLog>,
    transfers: BTreeMap<TransferId, TransferRecord>,
}

impl Tables {
    fn apply(&mut self, write: Write) -> Result<(), RepositoryError> {
        match write {
            Write::InsertRecord(record) => {
                if self.records.contains_key(&record.id) {
                    return Err(RepositoryError::Conflict(format!("record {}", record.id.0)));
                }
                let duplicate = self.records.values().any(|existing| {
                    existing.is_live()
                        && record.is_live()
                        && existing.student_id == record.student_id
                        && existing.placement.session == record.placement.session
                });
                if duplicate {
                    return Err(RepositoryError::Conflict(format!(
                        "academic record for student {} in session {}",
                        record.student_id.0, record.placement.session.0
                    )));
                }
                self.records.insert(record.id.clone(), record);
            }
            Write::UpdateRecord(record) => {
                let stored = self
                    .records
                    .get(&record.id)
                    .ok_or_else(|| RepositoryError::NotFound(format!("record {}", record.id.0)))?;
                check_revision(stored.revision, record.revision, "record", &record.id.0)?;
                self.records.insert(record.id.clone(), record);
            }
            Write::InsertLog(log) => {
                if self.logs.contains_key(&log.id) {
                    return Err(RepositoryError::Conflict(format!("promotion log {}", log.id.0)));
                }
                self.logs.insert(log.id.clone(), log);
            }
            Write::UpdateLog(log) => {
                let stored = self.logs.get(&log.id).ok_or_else(|| {
                    RepositoryError::NotFound(format!("promotion log {}", log.id.0))
                })?;
                check_revision(stored.revision, log.revision, "promotion log", &log.id.0)?;
                self.logs.insert(log.id.clone(), log);
            }
            Write::InsertTransfer(transfer) => {
                if self.transfers.contains_key(&transfer.id)
                    || self
                        .transfers
                        .values()
                        .any(|existing| existing.tc_number == transfer.tc_number)
                {
                    return Err(RepositoryError::Conflict(format!(
                        "transfer {}",
                        transfer.tc_number
                    )));
                }
                let pending = self.transfers.values().any(|existing| {
                    existing.student_id == transfer.student_id
                        && existing.status == TransferStatus::Pending
                });
                if pending && transfer.status == TransferStatus::Pending {
                    return Err(RepositoryError::Conflict(format!(
                        "pending transfer for student {}",
                        transfer.student_id.0
                    )));
                }
                self.transfers.insert(transfer.id.clone(), transfer);
            }
            Write::UpdateTransfer(transfer) => {
                let stored = self.transfers.get(&transfer.id).ok_or_else(|| {
                    RepositoryError::NotFound(format!("transfer {}", transfer.id.0))
                })?;
                check_revision(stored.revision, transfer.revision, "transfer", &transfer.id.0)?;
                self.transfers.insert(transfer.id.clone(), transfer);
            }
            Write::UpdateStudent(student) => {
                let stored = self.students.get(&student.id).ok_or_else(|| {
                    RepositoryError::NotFound(format!("student {}", student.id.0))
                })?;
                check_revision(stored.revision, student.revision, "student", &student.id.0)?;
                self.students.insert(student.id.clone(), student);
            }
        }
        Ok(())
    }
}

fn check_revision(
    stored: u64,
    incoming: u64,
    entity: &str,
    id: &str,
) -> Result<(), RepositoryError> {
    if stored + 1 == incoming {
        Ok(())
    } else {
        Err(RepositoryError::Stale(format!("{entity} {id}")))
    }
}

/// Mutex-guarded store whose commits apply to a copy of the tables and swap it in only when
/// every write succeeded.
#[derive(Debug, Default)]
pub struct InMemoryAcademicStore {
    tables: Mutex<Tables>,
}

impl InMemoryAcademicStore {
    pub fn from_dataset(dataset: AcademicDataset) -> Self {
        let tables = Tables {
            students: dataset
                .students
                .into_iter()
                .map(|student| (student.id.clone(), student))
                .collect(),
            records: dataset
                .records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
            logs: dataset
                .promotion_logs
                .into_iter()
                .map(|log| (log.id.clone(), log))
                .collect(),
            transfers: dataset
                .transfers
                .into_iter()
                .map(|transfer| (transfer.id.clone(), transfer))
                .collect(),
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    pub fn dataset(&self) -> Result<AcademicDataset, RepositoryError> {
        let tables = self.lock()?;
        Ok(AcademicDataset {
            students: tables.students.values().cloned().collect(),
            records: tables.records.values().cloned().collect(),
            promotion_logs: tables.logs.values().cloned().collect(),
            transfers: tables.transfers.values().cloned().collect(),
        })
    }

    /// Register a student directly, bypassing the unit of work. Intended for seeding.
    pub fn add_student(&self, student: Student) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables.students.contains_key(&student.id) {
            return Err(RepositoryError::Conflict(format!("student {}", student.id.0)));
        }
        tables.students.insert(student.id.clone(), student);
        Ok(())
    }

    /// Insert a record directly, subject to the same uniqueness rules as a commit.
    pub fn add_record(&self, record: StudentAcademicRecord) -> Result<(), RepositoryError> {
        self.lock()?.apply(Write::InsertRecord(record))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("academic store mutex poisoned".to_string()))
    }
}

impl AcademicRepository for InMemoryAcademicStore {
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.lock()?.students.get(id).cloned())
    }

    fn record(&self, id: &RecordId) -> Result<Option<StudentAcademicRecord>, RepositoryError> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    fn record_for(
        &self,
        student: &StudentId,
        session: &SessionId,
    ) -> Result<Option<StudentAcademicRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .records
            .values()
            .find(|record| {
                record.is_live() && &record.student_id == student && record.session() == session
            })
            .cloned())
    }

    fn records_in(
        &self,
        session: &SessionId,
        program: Option<&ProgramId>,
    ) -> Result<Vec<StudentAcademicRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|record| {
                record.is_live()
                    && record.session() == session
                    && program.map_or(true, |program| &record.placement.program == program)
            })
            .cloned()
            .collect())
    }

    fn promotion_log(&self, id: &PromotionLogId) -> Result<Option<PromotionLog>, RepositoryError> {
        Ok(self.lock()?.logs.get(id).cloned())
    }

    fn promotion_logs_for(
        &self,
        student: &StudentId,
    ) -> Result<Vec<PromotionLog>, RepositoryError> {
        Ok(self
            .lock()?
            .logs
            .values()
            .filter(|log| &log.student_id == student)
            .cloned()
            .collect())
    }

    fn transfer(&self, id: &TransferId) -> Result<Option<TransferRecord>, RepositoryError> {
        Ok(self.lock()?.transfers.get(id).cloned())
    }

    fn transfers_for(&self, student: &StudentId) -> Result<Vec<TransferRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .transfers
            .values()
            .filter(|transfer| &transfer.student_id == student)
            .cloned()
            .collect())
    }

    fn transfer_by_tc(&self, tc_number: &str) -> Result<Option<TransferRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .transfers
            .values()
            .find(|transfer| transfer.tc_number == tc_number)
            .cloned())
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let mut staged = tables.clone();
        for write in unit.into_writes() {
            staged.apply(write)?;
        }
        *tables = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academics::domain::{Placement, ProgramId, StudentStatus};
    use chrono::Utc;

    fn placement(session: &str) -> Placement {
        Placement {
            session: SessionId(session.to_string()),
            program: ProgramId("BSC".to_string()),
            department: None,
            year: 1,
            division: "A".to_string(),
        }
    }

    fn student() -> Student {
        Student {
            id: StudentId::new("stu-1"),
            name: "Asha Rao".to_string(),
            admission_number: "ADM-001".to_string(),
            placement: placement("2025-26"),
            status: StudentStatus::Active,
            revision: 0,
        }
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let store = InMemoryAcademicStore::default();
        store.add_student(student()).expect("seed student");

        let first = StudentAcademicRecord::new(student().id, placement("2025-26"), Utc::now());
        let clash = StudentAcademicRecord::new(student().id, placement("2025-26"), Utc::now());

        let mut unit = UnitOfWork::new();
        let mut moved = student();
        moved.name = "Asha R.".to_string();
        unit.update_student(moved)
            .insert_record(first)
            .insert_record(clash);

        assert!(matches!(
            store.commit(unit),
            Err(RepositoryError::Conflict(_))
        ));
        let dataset = store.dataset().expect("dataset");
        assert!(dataset.records.is_empty());
        assert_eq!(dataset.students[0].name, "Asha Rao");
    }

    #[test]
    fn stale_updates_are_rejected() {
        let store = InMemoryAcademicStore::default();
        store.add_student(student()).expect("seed student");

        let read_once = store
            .student(&student().id)
            .expect("fetch")
            .expect("present");

        let mut unit = UnitOfWork::new();
        unit.update_student(read_once.clone());
        store.commit(unit).expect("first write wins");

        let mut unit = UnitOfWork::new();
        unit.update_student(read_once);
        assert!(matches!(store.commit(unit), Err(RepositoryError::Stale(_))));
    }

    #[test]
    fn soft_deleted_records_do_not_block_reenrollment() {
        let store = InMemoryAcademicStore::default();
        let mut deleted =
            StudentAcademicRecord::new(student().id, placement("2026-27"), Utc::now());
        deleted.deleted_at = Some(Utc::now());
        store.add_record(deleted).expect("seed deleted");

        let replacement =
            StudentAcademicRecord::new(student().id, placement("2026-27"), Utc::now());
        store.add_record(replacement.clone()).expect("live record");

        let found = store
            .record_for(&student().id, &SessionId("2026-27".to_string()))
            .expect("lookup")
            .expect("live record present");
        assert_eq!(found.id, replacement.id);
    }
}
