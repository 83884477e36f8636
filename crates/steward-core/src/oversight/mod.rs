//! Oversight decision records.
//!
//! The [`DecisionRecords`] facade combines the attribute store, the
//! derived decision/sponsorship queries, the notice log and the
//! enterprise directory:
//!
//! - enumerate current (un-expired) sponsorships by or for a user,
//! - enumerate committee decisions, pending ones first and foremost,
//! - assemble the detail of one decision (investigator, team, raw fields)
//!   for composing a notification,
//! - resolve the team's current mail addresses.
//!
//! Reads may run concurrently; the only mutation here is the notice-log
//! append, which is transactional per batch.

mod noticelog;
mod queries;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::warn;

use crate::directory::{Directory, DirectoryError};
use crate::eav::{EavStore, StoreError};

pub use noticelog::{NoticeLog, NoticeLogTable};

/// Errors from the decision-records facade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OversightError {
    /// Attribute-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Directory failure on a required resolution.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Wall-clock capability, injected so expiration checks are testable.
pub trait Clock: Send + Sync {
    /// The current local date and time.
    fn now(&self) -> NaiveDateTime;

    /// The current local date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// System wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// One row of the sponsorship view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sponsorship {
    /// Decision record id.
    pub record: String,
    /// Committee decision value.
    pub decision: String,
    /// Purpose code of the request.
    pub what_for: String,
    /// Sponsored user id.
    pub candidate: String,
    /// Sponsoring investigator's user id.
    pub sponsor: String,
    /// Expiration date (ISO); empty or absent means never expires.
    pub dt_exp: Option<String>,
}

/// One committee decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Decision record id.
    pub record: String,
    /// The value every institution agreed on.
    pub decision: String,
    /// Number of institutions that recorded it.
    pub parties: i64,
}

/// A person reference from a decision record: login id plus whatever
/// display name the record or the directory supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// Login id.
    pub cn: String,
    /// Display name, when one is on file.
    pub display_name: Option<String>,
    /// The full name/title/unit block captured at request time.
    pub name_etc: Option<String>,
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self
            .display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("?");
        write!(f, "{shown} <{}>", self.cn)
    }
}

/// The assembled detail of one decision record.
#[derive(Debug, Clone)]
pub struct DecisionDetail {
    /// The requesting investigator.
    pub investigator: Ref,
    /// Sponsored team members, in key order.
    pub team: Vec<Ref>,
    /// Every attribute of the record, by field name.
    pub fields: BTreeMap<String, String>,
}

/// A sponsorship enriched with the project's title and description.
#[derive(Debug, Clone)]
pub struct SponsorshipSummary {
    /// Decision record id.
    pub record: String,
    /// The sponsoring investigator.
    pub investigator: Ref,
    /// Project title from the request.
    pub title: String,
    /// Project description from the request.
    pub description: String,
}

/// Facade over the oversight store, queries, notice log and directory.
pub struct DecisionRecords {
    store: EavStore,
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    project_id: i64,
    parties: u32,
}

impl DecisionRecords {
    /// Approval value meaning "yes".
    pub const YES: &'static str = "1";
    /// Approval value meaning "no".
    pub const NO: &'static str = "2";
    /// Purpose code for a sponsorship request.
    pub const SPONSORSHIP: &'static str = "1";

    /// Creates the facade for one oversight project.
    #[must_use]
    pub fn new(
        store: EavStore,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
        project_id: i64,
        parties: u32,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
            project_id,
            parties,
        }
    }

    /// Enumerates current (un-expired) sponsorships for `user_id`.
    ///
    /// With `investigator` set, enumerates sponsorships *by* the user
    /// instead of *for* the user. A sponsorship with an empty or absent
    /// expiration never expires; otherwise it is kept while the
    /// expiration date is today or later (zero-padded ISO dates compare
    /// correctly as strings).
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn sponsorships(
        &self,
        user_id: &str,
        investigator: bool,
    ) -> Result<Vec<Sponsorship>, OversightError> {
        let select = queries::sponsorships_query(
            self.project_id,
            self.parties,
            user_id,
            investigator,
            Self::YES,
            Self::SPONSORSHIP,
        );
        let rows = self.store.query_rows(&select, |row| {
            Ok(Sponsorship {
                record: row.get(0)?,
                decision: row.get(1)?,
                what_for: row.get(2)?,
                candidate: row.get(3)?,
                sponsor: row.get(4)?,
                dt_exp: row.get(5)?,
            })
        })?;
        let today = self.clock.today().format("%Y-%m-%d").to_string();
        Ok(rows
            .into_iter()
            .filter(|sponsorship| match sponsorship.dt_exp.as_deref() {
                None | Some("") => true,
                Some(expiration) => today.as_str() <= expiration,
            })
            .collect())
    }

    /// Sponsorships of `user_id` enriched with project title and
    /// description for display.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn about_sponsorships(
        &self,
        user_id: &str,
        investigator: bool,
    ) -> Result<Vec<SponsorshipSummary>, OversightError> {
        let mut summaries = Vec::new();
        for sponsorship in self.sponsorships(user_id, investigator)? {
            let detail = self.decision_detail(&sponsorship.record, false)?;
            summaries.push(SponsorshipSummary {
                record: sponsorship.record,
                title: detail
                    .fields
                    .get("project_title")
                    .cloned()
                    .unwrap_or_default(),
                description: project_description(&detail.fields),
                investigator: detail.investigator,
            });
        }
        Ok(summaries)
    }

    /// Enumerates committee decisions.
    ///
    /// With `pending` set, only decisions with no notice-log entry are
    /// returned; otherwise the full decision view (the bulk export path).
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub fn oversight_decisions(&self, pending: bool) -> Result<Vec<Decision>, OversightError> {
        let select = queries::decisions_query(self.project_id, self.parties, pending);
        Ok(self.store.query_rows(&select, |row| {
            Ok(Decision {
                record: row.get(0)?,
                decision: row.get(1)?,
                parties: row.get(2)?,
            })
        })?)
    }

    /// Assembles the full detail of one decision record.
    ///
    /// The record's fields are partitioned into the investigator
    /// reference (`user_id`, `full_name`), the team references
    /// (`user_id_<n>` keys in key order, display names from the first
    /// line of the matching `name_etc_<n>`), and the raw field map.
    /// Fields outside any declared schema stay in the map.
    ///
    /// With `lookup` set, references still lacking a display name are
    /// resolved against the directory; a directory miss leaves the
    /// reference unnamed and never fails the call. With `lookup` unset no
    /// directory call is made, so bulk export tolerates directory
    /// unavailability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] when the record has no
    /// attribute rows or lacks its `user_id` anchor.
    pub fn decision_detail(
        &self,
        record: &str,
        lookup: bool,
    ) -> Result<DecisionDetail, OversightError> {
        let fields = self.store.all_fields(self.project_id, record)?;
        let investigator_cn =
            fields
                .get("user_id")
                .ok_or_else(|| StoreError::RecordNotFound {
                    record: record.to_string(),
                })?;
        let mut investigator = Ref {
            cn: investigator_cn.clone(),
            display_name: fields
                .get("full_name")
                .filter(|name| !name.is_empty())
                .cloned(),
            name_etc: None,
        };

        let mut team = Vec::new();
        for (key, member_cn) in &fields {
            let Some(suffix) = key.strip_prefix("user_id_") else {
                continue;
            };
            let name_etc = fields.get(&format!("name_etc_{suffix}")).cloned();
            let display_name = name_etc
                .as_deref()
                .and_then(|block| block.lines().next())
                .filter(|line| !line.is_empty())
                .map(str::to_string);
            team.push(Ref {
                cn: member_cn.clone(),
                display_name,
                name_etc,
            });
        }

        if lookup {
            self.fill_display_name(&mut investigator);
            for member in &mut team {
                self.fill_display_name(member);
            }
        }

        Ok(DecisionDetail {
            investigator,
            team,
            fields,
        })
    }

    fn fill_display_name(&self, person: &mut Ref) {
        if person.display_name.is_some() {
            return;
        }
        match self.directory.lookup(&person.cn) {
            Ok(principal) => person.display_name = principal.display_name(),
            Err(error) => {
                warn!(user = %person.cn, %error, "cannot resolve display name");
            }
        }
    }

    /// Resolves current mail addresses for an investigator and their
    /// team.
    ///
    /// The investigator's address is required: a directory miss or a
    /// missing mail attribute fails the call. Team members that cannot be
    /// resolved, or have no mail on file, are logged and dropped from the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns a [`DirectoryError`] when the investigator cannot be
    /// resolved to a mail address.
    pub fn team_email(
        &self,
        investigator: &str,
        team: &[&str],
    ) -> Result<(String, Vec<String>), OversightError> {
        let principal = self.directory.lookup(investigator)?;
        let investigator_mail =
            principal
                .mail
                .ok_or_else(|| DirectoryError::MissingAttribute {
                    name: investigator.to_string(),
                    attribute: "mail",
                })?;

        let mut team_mail = Vec::new();
        for member in team {
            match self.directory.lookup(member) {
                Ok(entry) => match entry.mail {
                    Some(mail) if !mail.is_empty() => team_mail.push(mail),
                    _ => warn!(user = %member, "no mail on file; dropping from notice"),
                },
                Err(error) => {
                    warn!(user = %member, %error, "cannot resolve team member; dropping");
                }
            }
        }
        Ok((investigator_mail, team_mail))
    }
}

/// The human-readable project description of a request: the sponsor's
/// description, falling back to the data-use description.
#[must_use]
pub fn project_description(fields: &BTreeMap<String, String>) -> String {
    fields
        .get("description_sponsor")
        .filter(|text| !text.is_empty())
        .or_else(|| {
            fields
                .get("data_use_description")
                .filter(|text| !text.is_empty())
        })
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::directory::MockDirectory;

    use super::*;

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

    /// Four settled requests plus two that never reached quorum.
    fn seeded_store() -> EavStore {
        let store = EavStore::in_memory().unwrap();
        let rows: &[(&str, &[(&str, &str)])] = &[
            (
                // Denied request; never had a purpose recorded.
                "-565402122873664774",
                &[
                    ("approve_hospital", "2"),
                    ("approve_physicians", "2"),
                    ("approve_medcenter", "2"),
                    ("user_id", "john.smith"),
                    ("full_name", "John Smith"),
                    ("project_title", "Cart Blanche"),
                    ("user_id_1", "bill.student"),
                    ("date_of_expiration", ""),
                ],
            ),
            (
                // Approved sponsorship that expired decades ago.
                "23180811818680005",
                &[
                    ("approve_hospital", "1"),
                    ("approve_physicians", "1"),
                    ("approve_medcenter", "1"),
                    ("user_id", "john.smith"),
                    ("full_name", "John Smith"),
                    ("project_title", "Cure Polio"),
                    ("what_for", "1"),
                    ("user_id_1", "bill.student"),
                    ("date_of_expiration", "1950-02-27"),
                ],
            ),
            (
                // Approved sponsorship with no expiration row at all.
                "3180811818667777",
                &[
                    ("approve_hospital", "1"),
                    ("approve_physicians", "1"),
                    ("approve_medcenter", "1"),
                    ("user_id", "john.smith"),
                    ("full_name", "John Smith"),
                    ("project_title", "Cure Hiccups"),
                    ("what_for", "1"),
                    ("user_id_1", "jill.student"),
                ],
            ),
            (
                // Approved sponsorship with an open-ended (empty) expiration.
                "6373469799195807417",
                &[
                    ("approve_hospital", "1"),
                    ("approve_physicians", "1"),
                    ("approve_medcenter", "1"),
                    ("user_id", "john.smith"),
                    ("full_name", "John Smith"),
                    ("project_title", "Cure Warts"),
                    ("description_sponsor", "Rid the world of warts"),
                    ("what_for", "1"),
                    ("user_id_1", "some.one"),
                    ("name_etc_1", "Some One\nResearch Associate\nPathology"),
                    ("user_id_2", "carol.student"),
                    ("user_id_3", "koam.rin"),
                    ("date_of_expiration", ""),
                ],
            ),
            (
                // Only two institutions have weighed in.
                "7000000000000000001",
                &[
                    ("approve_hospital", "1"),
                    ("approve_physicians", "1"),
                    ("user_id", "john.smith"),
                    ("what_for", "1"),
                    ("user_id_1", "bill.student"),
                ],
            ),
            (
                // All three voted but without agreement.
                "7000000000000000002",
                &[
                    ("approve_hospital", "1"),
                    ("approve_physicians", "1"),
                    ("approve_medcenter", "2"),
                    ("user_id", "john.smith"),
                    ("what_for", "1"),
                    ("user_id_1", "bill.student"),
                ],
            ),
        ];
        for (record, fields) in rows {
            for (field, value) in *fields {
                store
                    .insert_attribute(PROJECT, 1, record, field, value)
                    .unwrap();
            }
        }
        store
    }

    fn records(store: &EavStore) -> DecisionRecords {
        DecisionRecords::new(
            store.clone(),
            Arc::new(MockDirectory::new()),
            Arc::new(FixedClock),
            PROJECT,
            PARTIES,
        )
    }

    #[test]
    fn test_sponsorships_for_candidate() {
        let store = seeded_store();
        let sponsorships = records(&store).sponsorships("some.one", false).unwrap();
        assert_eq!(sponsorships.len(), 1);
        let only = &sponsorships[0];
        assert_eq!(only.record, "6373469799195807417");
        assert_eq!(only.decision, DecisionRecords::YES);
        assert_eq!(only.sponsor, "john.smith");
        assert_eq!(only.dt_exp.as_deref(), Some(""));
    }

    #[test]
    fn test_expired_sponsorship_is_filtered_out() {
        let store = seeded_store();
        assert!(records(&store)
            .sponsorships("bill.student", false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_expiration_row_means_unexpired() {
        let store = seeded_store();
        let sponsorships = records(&store).sponsorships("jill.student", false).unwrap();
        assert_eq!(sponsorships.len(), 1);
        assert_eq!(sponsorships[0].dt_exp, None);
    }

    #[test]
    fn test_same_day_expiration_is_kept() {
        let store = seeded_store();
        store
            .insert_attribute(PROJECT, 1, "3180811818667777", "date_of_expiration", "2011-09-02")
            .unwrap();
        let sponsorships = records(&store).sponsorships("jill.student", false).unwrap();
        assert_eq!(sponsorships.len(), 1);
    }

    #[test]
    fn test_sponsorships_by_investigator() {
        let store = seeded_store();
        let sponsorships = records(&store).sponsorships("john.smith", true).unwrap();
        // Expired ones filtered; denied and non-quorum records never appear.
        let ids: Vec<&str> = sponsorships
            .iter()
            .map(|sponsorship| sponsorship.record.as_str())
            .collect();
        assert_eq!(ids, vec!["3180811818667777", "6373469799195807417"]);
        assert!(sponsorships
            .iter()
            .all(|sponsorship| sponsorship.candidate == "john.smith"));
    }

    #[test]
    fn test_about_sponsorships_carries_title_and_description() {
        let store = seeded_store();
        let summaries = records(&store).about_sponsorships("some.one", false).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "Cure Warts");
        assert_eq!(summaries[0].description, "Rid the world of warts");
        assert_eq!(summaries[0].investigator.to_string(), "John Smith <john.smith>");
    }

    #[test]
    fn test_quorum_is_exact() {
        let store = seeded_store();
        let decisions = records(&store).oversight_decisions(false).unwrap();
        let ids: Vec<&str> = decisions
            .iter()
            .map(|decision| decision.record.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "-565402122873664774",
                "23180811818680005",
                "3180811818667777",
                "6373469799195807417",
            ]
        );
        assert!(decisions.iter().all(|decision| decision.parties == 3));
    }

    #[test]
    fn test_pending_excludes_notified_records() {
        let store = seeded_store();
        let facade = records(&store);
        assert_eq!(facade.oversight_decisions(true).unwrap().len(), 4);

        NoticeLog::new(store.clone())
            .log_sent(&[("6373469799195807417".to_string(), FixedClock.now())])
            .unwrap();

        let pending = facade.oversight_decisions(true).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending
            .iter()
            .all(|decision| decision.record != "6373469799195807417"));
        // The full view still includes the notified record.
        assert_eq!(facade.oversight_decisions(false).unwrap().len(), 4);
    }

    #[test]
    fn test_decision_detail_partitions_fields() {
        let store = seeded_store();
        let detail = records(&store)
            .decision_detail("6373469799195807417", false)
            .unwrap();
        assert_eq!(detail.investigator.to_string(), "John Smith <john.smith>");
        let team: Vec<String> = detail.team.iter().map(ToString::to_string).collect();
        assert_eq!(
            team,
            vec![
                "Some One <some.one>",
                "? <carol.student>",
                "? <koam.rin>",
            ]
        );
        // Raw fields stay available for the notification composer.
        assert_eq!(
            detail.fields.get("approve_hospital").map(String::as_str),
            Some("1")
        );
        assert_eq!(
            detail.fields.get("project_title").map(String::as_str),
            Some("Cure Warts")
        );
    }

    #[test]
    fn test_decision_detail_lookup_fills_display_names() {
        let store = seeded_store();
        let detail = records(&store)
            .decision_detail("6373469799195807417", true)
            .unwrap();
        let team: Vec<String> = detail.team.iter().map(ToString::to_string).collect();
        assert_eq!(
            team,
            vec![
                "Some One <some.one>",
                "Carol Student <carol.student>",
                "Koam Rin <koam.rin>",
            ]
        );
    }

    #[test]
    fn test_decision_detail_zero_team_members() {
        let store = seeded_store();
        store.insert_attribute(PROJECT, 1, "solo", "user_id", "john.smith").unwrap();
        store
            .insert_attribute(PROJECT, 1, "solo", "full_name", "John Smith")
            .unwrap();
        let detail = records(&store).decision_detail("solo", false).unwrap();
        assert!(detail.team.is_empty());
    }

    #[test]
    fn test_decision_detail_missing_record() {
        let store = seeded_store();
        let result = records(&store).decision_detail("no-such-record", false);
        assert!(matches!(
            result,
            Err(OversightError::Store(StoreError::RecordNotFound { .. }))
        ));
    }

    #[test]
    fn test_team_email_drops_unresolvable_members() {
        let store = seeded_store();
        let (investigator, team) = records(&store)
            .team_email("john.smith", &["bill.student", "ghost.user"])
            .unwrap();
        assert_eq!(investigator, "john.smith@js.example");
        assert_eq!(team, vec!["bill.student@js.example".to_string()]);
    }

    #[test]
    fn test_team_email_drops_members_without_mail() {
        let store = seeded_store();
        let (_, team) = records(&store)
            .team_email("john.smith", &["some.one", "carol.student", "koam.rin"])
            .unwrap();
        assert_eq!(
            team,
            vec![
                "some.one@js.example".to_string(),
                "carol.student@js.example".to_string(),
            ]
        );
    }

    #[test]
    fn test_team_email_requires_the_investigator() {
        let store = seeded_store();
        let result = records(&store).team_email("ghost.user", &["bill.student"]);
        assert!(matches!(
            result,
            Err(OversightError::Directory(DirectoryError::NotFound { .. }))
        ));
    }
}
