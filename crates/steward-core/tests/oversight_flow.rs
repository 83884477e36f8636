//! End-to-end flow over the oversight engine.
//!
//! Seeds the attribute store the way the survey front-end writes it,
//! then drives the public facade: committee decisions surface once a
//! quorum agrees, notification state partitions them, details and team
//! addresses assemble for the notifier, and the disclaimer schema
//! reconstructs from its three attribute rows.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use steward_core::disclaimer::Disclaimers;
use steward_core::oversight::{Clock, Decision};
use steward_core::{DecisionRecords, EavStore, MockDirectory, NoticeLog};

const PROJECT: i64 = 123;
const PARTIES: u32 = 3;

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 9, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }
}

fn seeded_store() -> EavStore {
    let store = EavStore::in_memory().unwrap();
    let requests: &[(&str, &[(&str, &str)])] = &[
        (
            "req-approved",
            &[
                ("approve_hospital", "1"),
                ("approve_physicians", "1"),
                ("approve_medcenter", "1"),
                ("user_id", "john.smith"),
                ("full_name", "John Smith"),
                ("project_title", "Cure Warts"),
                ("what_for", "1"),
                ("user_id_1", "bill.student"),
                ("user_id_2", "some.one"),
                ("name_etc_2", "Some One\nResearch Associate\nPathology"),
                ("date_of_expiration", ""),
            ],
        ),
        (
            "req-denied",
            &[
                ("approve_hospital", "2"),
                ("approve_physicians", "2"),
                ("approve_medcenter", "2"),
                ("user_id", "john.smith"),
                ("full_name", "John Smith"),
                ("project_title", "Cart Blanche"),
                ("user_id_1", "bill.student"),
            ],
        ),
        (
            "req-undecided",
            &[
                ("approve_hospital", "1"),
                ("approve_physicians", "1"),
                ("user_id", "john.smith"),
                ("what_for", "1"),
                ("user_id_1", "bill.student"),
            ],
        ),
    ];
    for (record, fields) in requests {
        for (field, value) in *fields {
            store
                .insert_attribute(PROJECT, 1, record, field, value)
                .unwrap();
        }
    }
    store
}

fn facade(store: &EavStore) -> DecisionRecords {
    DecisionRecords::new(
        store.clone(),
        Arc::new(MockDirectory::new()),
        Arc::new(FixedClock),
        PROJECT,
        PARTIES,
    )
}

#[test]
fn test_notification_round_trip() {
    let store = seeded_store();
    let records = facade(&store);

    // Quorum holds for the two settled requests only.
    let pending = records.oversight_decisions(true).unwrap();
    let ids: Vec<&str> = pending
        .iter()
        .map(|decision| decision.record.as_str())
        .collect();
    assert_eq!(ids, vec!["req-approved", "req-denied"]);

    // Assemble everything a notification needs.
    let detail = records.decision_detail("req-approved", true).unwrap();
    assert_eq!(detail.investigator.to_string(), "John Smith <john.smith>");
    let team_ids: Vec<&str> = detail
        .team
        .iter()
        .map(|member| member.cn.as_str())
        .collect();
    assert_eq!(team_ids, vec!["bill.student", "some.one"]);
    let (investigator_mail, team_mail) = records
        .team_email("john.smith", &team_ids)
        .unwrap();
    assert_eq!(investigator_mail, "john.smith@js.example");
    assert_eq!(
        team_mail,
        vec![
            "bill.student@js.example".to_string(),
            "some.one@js.example".to_string(),
        ]
    );

    // Logging the notice removes the decision from the pending set but
    // not from the full view.
    NoticeLog::new(store.clone())
        .log_sent(&[("req-approved".to_string(), FixedClock.now())])
        .unwrap();
    let still_pending = records.oversight_decisions(true).unwrap();
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].record, "req-denied");
    let everything = records.oversight_decisions(false).unwrap();
    assert!(everything
        .iter()
        .any(|decision: &Decision| decision.record == "req-approved"));
}

#[test]
fn test_sponsorship_flow() {
    let store = seeded_store();
    let records = facade(&store);

    let sponsorships = records.sponsorships("bill.student", false).unwrap();
    assert_eq!(sponsorships.len(), 1);
    assert_eq!(sponsorships[0].record, "req-approved");
    assert_eq!(sponsorships[0].sponsor, "john.smith");

    // The denied request never becomes a sponsorship.
    let summaries = records.about_sponsorships("bill.student", false).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].title, "Cure Warts");
}

#[test]
fn test_disclaimer_reconstruction() {
    let store = EavStore::in_memory().unwrap();
    for (field, value) in [
        ("disclaimer_id", "1"),
        ("url", "http://example/blog/item/release-xyz"),
        ("current", "1"),
    ] {
        store.insert_attribute(PROJECT, 1, "1", field, value).unwrap();
    }

    let disclaimers = Disclaimers::new(PROJECT).unwrap();
    let all = disclaimers.all(&store).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("disclaimer_id"), Some("1"));

    let current = disclaimers.current(&store).unwrap().unwrap();
    assert_eq!(
        current.get("url"),
        Some("http://example/blog/item/release-xyz")
    );
    assert_eq!(current.get("current"), Some("1"));
}
