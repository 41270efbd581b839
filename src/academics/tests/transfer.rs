use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::common::*;
use crate::academics::domain::{
    PromotionStatus, ResultStatus, StudentId, StudentStatus, TransferId, TransferStatus,
    TransferType,
};
use crate::academics::repository::{AcademicRepository, UnitOfWork};
use crate::academics::{format_tc_number, TransferError, TransferRequest};
use crate::config::TransferPolicy;
use crate::error::ErrorKind;

fn request(id: &str) -> TransferRequest {
    TransferRequest::new(
        StudentId::new(id),
        TransferType::Regular,
        "Family relocating",
        today(),
    )
    .destination("City Science College", None)
}

#[test]
fn request_snapshots_the_current_record() {
    let harness = harness();
    harness.passed_student("s1");
    harness.edit_current("s1", |record| {
        record.attendance_percentage = Some(81.5);
        record.backlog_count = 1;
        record.result_status = ResultStatus::Atkt;
    });

    let transfer = harness
        .transfers()
        .create_transfer_request(request("s1"), &actor())
        .expect("requested");

    assert_eq!(transfer.status, TransferStatus::Pending);
    assert!(transfer.tc_number.starts_with("TC/2026/"));
    assert_eq!(transfer.tc_number.len(), "TC/2026/000000".len());
    assert_eq!(transfer.result_status, ResultStatus::Atkt);
    assert_eq!(transfer.attendance_percentage, Some(81.5));
    assert_eq!(transfer.backlog_count, 1);

    harness.edit_current("s1", |record| record.backlog_count = 0);
    let stored = harness
        .transfers()
        .find_by_tc_number(&transfer.tc_number)
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.backlog_count, 1);
}

#[test]
fn second_pending_request_is_a_duplicate() {
    let harness = harness();
    harness.passed_student("s1");
    let transfers = harness.transfers();

    let first = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("first request");
    let err = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect_err("second request");
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    match err {
        TransferError::PendingTransferExists { existing, .. } => assert_eq!(existing, first.id),
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[test]
fn outstanding_fees_block_requests_unless_allowed() {
    let harness = harness();
    harness.passed_student("s1");
    harness.edit_current("s1", |record| {
        record.fee_cleared = false;
        record.outstanding_amount = 4200.0;
    });

    let err = harness
        .transfers()
        .create_transfer_request(request("s1"), &actor())
        .expect_err("fees outstanding");
    assert_eq!(err.kind(), ErrorKind::Eligibility);

    let relaxed = TransferPolicy {
        allow_pending_fees: true,
        ..TransferPolicy::default()
    };
    let transfer = harness
        .transfers_with(relaxed)
        .create_transfer_request(request("s1"), &actor())
        .expect("pending fees allowed");
    assert!(!transfer.fee_cleared);
    assert_eq!(transfer.outstanding_amount, 4200.0);
}

#[test]
fn fee_override_is_recorded_on_the_transfer() {
    let harness = harness();
    harness.passed_student("s1");
    harness.edit_current("s1", |record| record.fee_cleared = false);

    let mut overridden = request("s1");
    overridden.is_override = true;
    let transfer = harness
        .transfers()
        .create_transfer_request(overridden, &actor())
        .expect("override accepted");
    assert!(transfer.is_override);
}

#[test]
fn request_without_record_or_reason_is_rejected() {
    let harness = harness();
    harness.admit("s1");
    let transfers = harness.transfers();

    let err = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect_err("no record");
    assert!(matches!(err, TransferError::NoCurrentRecord(_)));

    let mut blank = request("s1");
    blank.reason = " ".to_string();
    let err = transfers
        .create_transfer_request(blank, &actor())
        .expect_err("no reason");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn full_workflow_updates_student_and_record_at_approval() {
    let harness = harness();
    harness.passed_student("s1");
    let transfers = harness.transfers();

    let transfer = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("requested");

    let err = transfers
        .issue_transfer_certificate(&transfer.id, &actor())
        .expect_err("not approved yet");
    assert!(matches!(err, TransferError::MustBeApprovedFirst { .. }));
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    let approved = transfers
        .approve_transfer(&transfer.id, &actor())
        .expect("approved");
    assert_eq!(approved.status, TransferStatus::Approved);
    assert_eq!(approved.approved_by, Some(actor()));
    assert_eq!(harness.student("s1").status, StudentStatus::Transferred);
    let record = harness.current("s1");
    assert_eq!(record.result_status, ResultStatus::TcIssued);
    assert_eq!(record.promotion_status, PromotionStatus::Transferred);

    let issued = transfers
        .issue_transfer_certificate(&transfer.id, &actor())
        .expect("issued");
    assert_eq!(issued.status, TransferStatus::Issued);

    let err = transfers
        .cancel_transfer(&transfer.id, "changed mind", &actor())
        .expect_err("issued is terminal");
    assert!(matches!(err, TransferError::AlreadyIssued(_)));

    assert_eq!(
        harness.audit.event_types(),
        vec![
            "record.enrolled",
            "transfer.requested",
            "transfer.approved",
            "transfer.issued"
        ]
    );
}

#[test]
fn approval_closes_out_a_locked_record() {
    let harness = harness();
    harness.passed_student("s1");
    harness.edit_current("s1", |record| record.is_locked = true);
    let transfers = harness.transfers();

    let transfer = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("requested");
    transfers
        .approve_transfer(&transfer.id, &actor())
        .expect("approved");

    let record = harness.current("s1");
    assert!(record.is_locked);
    assert_eq!(record.result_status, ResultStatus::TcIssued);
}

#[test]
fn manual_status_policy_leaves_student_untouched() {
    let harness = harness();
    harness.passed_student("s1");
    let transfers = harness.transfers_with(TransferPolicy {
        auto_update_student_status: false,
        ..TransferPolicy::default()
    });

    let transfer = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("requested");
    transfers
        .approve_transfer(&transfer.id, &actor())
        .expect("approved");

    assert_eq!(harness.student("s1").status, StudentStatus::Active);
    assert_eq!(harness.current("s1").result_status, ResultStatus::Pass);
}

#[test]
fn cancelling_after_approval_reactivates_the_student_only() {
    let harness = harness();
    harness.passed_student("s1");
    let transfers = harness.transfers();

    let transfer = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("requested");
    transfers
        .approve_transfer(&transfer.id, &actor())
        .expect("approved");
    let cancelled = transfers
        .cancel_transfer(&transfer.id, "admission withdrawn", &actor())
        .expect("cancelled");

    assert_eq!(cancelled.status, TransferStatus::Cancelled);
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("admission withdrawn")
    );
    assert_eq!(harness.student("s1").status, StudentStatus::Active);
    assert_eq!(harness.current("s1").result_status, ResultStatus::TcIssued);

    let err = transfers
        .cancel_transfer(&transfer.id, "again", &actor())
        .expect_err("already cancelled");
    assert_eq!(err.kind(), ErrorKind::StateConflict);

    let err = transfers
        .approve_transfer(&transfer.id, &actor())
        .expect_err("cancelled is final");
    assert!(matches!(err, TransferError::InvalidTransition { .. }));
}

#[test]
fn cancelled_request_allows_a_new_one() {
    let harness = harness();
    harness.passed_student("s1");
    let transfers = harness.transfers();

    let first = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("requested");
    transfers
        .cancel_transfer(&first.id, "wrong destination", &actor())
        .expect("cancelled");
    let second = transfers
        .create_transfer_request(request("s1"), &actor())
        .expect("requested again");

    assert_ne!(first.tc_number, second.tc_number);
    let history = transfers
        .transfer_history(&StudentId::new("s1"))
        .expect("history");
    assert_eq!(history.len(), 2);
}

#[test]
fn tc_generation_gives_up_after_sixteen_collisions() {
    let harness = harness();
    harness.passed_student("s1");
    harness.passed_student("s2");

    let template = harness
        .transfers_with(TransferPolicy {
            tc_prefix: "SEED".to_string(),
            ..TransferPolicy::default()
        })
        .create_transfer_request(request("s2"), &actor())
        .expect("template transfer");

    let mut rng = StdRng::seed_from_u64(7);
    let mut unit = UnitOfWork::new();
    for _ in 0..16 {
        let mut taken = template.clone();
        taken.id = TransferId::generate();
        taken.status = TransferStatus::Cancelled;
        taken.tc_number = format_tc_number("TC", 2026, rng.gen_range(0..1_000_000));
        unit.insert_transfer(taken);
    }
    harness.store.commit(unit).expect("numbers reserved");

    let err = harness
        .transfers()
        .create_transfer_request(request("s1"), &actor())
        .expect_err("every candidate taken");
    assert!(matches!(err, TransferError::TcNumberExhausted(16)));
}

#[test]
fn unknown_transfer_is_not_found() {
    let harness = harness();
    let err = harness
        .transfers()
        .approve_transfer(&TransferId("missing".to_string()), &actor())
        .expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
