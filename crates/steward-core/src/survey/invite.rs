//! Forgery-resistant survey invitations.
//!
//! A survey link is only as strong as its invitation code: codes must be
//! unguessable, collision-free within their survey/event scope, and
//! stable for a participant while their invitation is open. Issuance is
//! idempotent per participant email; a fresh code is generated from a
//! restricted alphabet with no visually confusable characters, checked
//! for collisions and inserted inside one immediate transaction, with a
//! bounded number of retries.
//!
//! The random source is an explicit parameter so issuance is reproducible
//! under a seeded generator.

use chrono::NaiveDateTime;
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{OptionalExtension, TransactionBehavior};
use sea_query::{
    Alias, Expr, ExprTrait, Iden, JoinType, Query, SelectStatement, SqliteQueryBuilder,
};
use sea_query_rusqlite::RusqliteBinder;
use thiserror::Error;
use tracing::debug;

use crate::eav::{EavStore, StoreError};

/// Candidate alphabet for invitation codes. Visually confusable
/// characters (`l`, `O`, `0`, `1`) are excluded.
const CODE_ALPHABET: &str = "abcdefghijkmnopqrstuvwxyzABCDEFGHIJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated invitation code.
const CODE_LENGTH: usize = 6;

/// Attempts at finding a collision-free code before giving up.
const CODE_TRIES: usize = 5;

/// Errors from invitation issuance.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InviteError {
    /// Database error from the survey tables.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Attribute-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every generated code collided with an existing invitation.
    #[error("could not issue a collision-free invitation code after {attempts} attempts")]
    ExhaustedRetries {
        /// How many codes were tried.
        attempts: usize,
    },

    /// A stored completion timestamp does not parse.
    #[error("invalid completion timestamp {value}")]
    InvalidTimestamp {
        /// The value that failed to parse.
        value: String,
    },
}

/// The surveys table: maps a survey to its project.
#[derive(Debug, Clone, Copy, Iden)]
pub enum Surveys {
    /// Table name.
    Table,
    /// Survey identifier.
    SurveyId,
    /// Owning project.
    ProjectId,
}

/// The survey arms table: one arm per project.
#[derive(Debug, Clone, Copy, Iden)]
pub enum SurveyArms {
    /// Table name.
    Table,
    /// Arm identifier.
    ArmId,
    /// Owning project.
    ProjectId,
}

/// The survey events table: one event per arm.
#[derive(Debug, Clone, Copy, Iden)]
pub enum SurveyEvents {
    /// Table name.
    Table,
    /// Event identifier.
    EventId,
    /// Owning arm.
    ArmId,
}

/// The survey participants table: one row per issued invitation.
#[derive(Debug, Clone, Copy, Iden)]
pub enum SurveyParticipants {
    /// Table name.
    Table,
    /// Participant identifier.
    ParticipantId,
    /// Survey the invitation belongs to.
    SurveyId,
    /// Event the invitation belongs to.
    EventId,
    /// Invited address.
    ParticipantEmail,
    /// External participant identifier, when known.
    ParticipantIdentifier,
    /// The invitation code; the invitation is valid only while non-empty.
    Hash,
}

/// The survey responses table: one row per submitted response.
#[derive(Debug, Clone, Copy, Iden)]
pub enum SurveyResponses {
    /// Table name.
    Table,
    /// Response identifier.
    ResponseId,
    /// Responding participant.
    ParticipantId,
    /// Record the response created.
    Record,
    /// First submission time.
    FirstSubmitTime,
    /// Completion time, when the response was finished.
    CompletionTime,
    /// Return code for partial responses.
    ReturnCode,
}

/// Invitation issuer for one survey.
pub struct SecureSurvey {
    store: EavStore,
    survey_id: i64,
}

impl SecureSurvey {
    /// Creates an issuer for `survey_id` over the given store.
    #[must_use]
    pub fn new(store: EavStore, survey_id: i64) -> Self {
        Self { store, survey_id }
    }

    /// The survey this issuer serves.
    #[must_use]
    pub fn survey_id(&self) -> i64 {
        self.survey_id
    }

    /// Resolves the data-collection event for this survey through the
    /// surveys-arms-events chain.
    fn event_id(&self) -> Result<i64, InviteError> {
        let select = Query::select()
            .column((SurveyEvents::Table, SurveyEvents::EventId))
            .from(Surveys::Table)
            .join(
                JoinType::Join,
                SurveyArms::Table,
                Expr::col((Surveys::Table, Surveys::ProjectId))
                    .equals((SurveyArms::Table, SurveyArms::ProjectId)),
            )
            .join(
                JoinType::Join,
                SurveyEvents::Table,
                Expr::col((SurveyEvents::Table, SurveyEvents::ArmId))
                    .equals((SurveyArms::Table, SurveyArms::ArmId)),
            )
            .and_where(Expr::col((Surveys::Table, Surveys::SurveyId)).eq(self.survey_id))
            .take();
        let events = self.store.query_rows(&select, |row| row.get::<_, i64>(0))?;
        events
            .first()
            .copied()
            .ok_or(InviteError::Store(StoreError::SurveyNotFound {
                survey_id: self.survey_id,
            }))
    }

    /// The base query finding valid invitation codes in this
    /// survey/event scope. With `multi`, only invitations with no
    /// recorded response qualify, so a participant who already responded
    /// can be issued a fresh code.
    fn invitation_query(&self, event_id: i64, multi: bool) -> SelectStatement {
        let p = Alias::new("p");
        let mut select = Query::select();
        select
            .from_as(SurveyParticipants::Table, p.clone())
            .column((p.clone(), SurveyParticipants::Hash));
        if multi {
            let r = Alias::new("r");
            select
                .join_as(
                    JoinType::LeftJoin,
                    SurveyResponses::Table,
                    r.clone(),
                    Expr::col((p.clone(), SurveyParticipants::ParticipantId))
                        .equals((r.clone(), SurveyResponses::ParticipantId)),
                )
                .and_where(Expr::col((r, SurveyResponses::ParticipantId)).is_null())
                .limit(1);
        }
        select
            .and_where(Expr::col((p.clone(), SurveyParticipants::SurveyId)).eq(self.survey_id))
            .and_where(Expr::col((p.clone(), SurveyParticipants::EventId)).eq(event_id))
            .and_where(Expr::col((p, SurveyParticipants::Hash)).gt(""))
            .take()
    }

    /// Returns the invitation code for `email`, issuing one if needed.
    ///
    /// Repeated calls for the same address return the same code while the
    /// invitation is open. When a code must be generated, the collision
    /// check and the insert run inside one immediate transaction, so two
    /// concurrent calls for the same scope cannot both commit conflicting
    /// rows; collisions are retried up to a fixed bound.
    ///
    /// # Errors
    ///
    /// Returns [`InviteError::ExhaustedRetries`] when every candidate
    /// code collided, or a database error on store failure.
    pub fn invite<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        email: &str,
        multi: bool,
    ) -> Result<String, InviteError> {
        let event_id = self.event_id()?;

        let mut find = self.invitation_query(event_id, multi);
        find.and_where(Expr::col(SurveyParticipants::ParticipantEmail).eq(email));
        let existing = self
            .store
            .query_rows(&find, |row| row.get::<_, String>(0))?;
        if let Some(code) = existing.into_iter().next() {
            debug!(email, "returning existing invitation");
            return Ok(code);
        }

        for _ in 0..CODE_TRIES {
            let code = generate_code(rng, CODE_LENGTH);

            let mut clash_query = self.invitation_query(event_id, multi);
            clash_query.and_where(Expr::col(SurveyParticipants::Hash).eq(code.as_str()));
            let (clash_sql, clash_values) = clash_query.build_rusqlite(SqliteQueryBuilder);

            let (insert_sql, insert_values) = Query::insert()
                .into_table(SurveyParticipants::Table)
                .columns([
                    SurveyParticipants::SurveyId,
                    SurveyParticipants::EventId,
                    SurveyParticipants::ParticipantEmail,
                    SurveyParticipants::ParticipantIdentifier,
                    SurveyParticipants::Hash,
                ])
                .values_panic([
                    self.survey_id.into(),
                    event_id.into(),
                    email.into(),
                    // Not known until the participant responds.
                    "".into(),
                    code.as_str().into(),
                ])
                .build_rusqlite(SqliteQueryBuilder);

            // The collision check and the insert must observe the same
            // state: one immediate transaction spans both.
            let mut conn = self.store.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let clash_params = clash_values.as_params();
            let clash: Option<String> = tx
                .query_row(&clash_sql, &*clash_params, |row| row.get(0))
                .optional()?;
            if clash.is_some() {
                debug!(email, "invitation code collided; retrying");
                continue;
            }
            let insert_params = insert_values.as_params();
            tx.execute(&insert_sql, &*insert_params)?;
            tx.commit()?;
            return Ok(code);
        }

        Err(InviteError::ExhaustedRetries {
            attempts: CODE_TRIES,
        })
    }

    /// Lists `(record, completion time)` for every completed response
    /// tied to invitations issued to `email` in this survey.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure or an unparseable completion
    /// timestamp.
    pub fn responses(&self, email: &str) -> Result<Vec<(String, NaiveDateTime)>, InviteError> {
        let event_id = self.event_id()?;
        let r = Alias::new("r");
        let p = Alias::new("p");
        let select = Query::select()
            .from_as(SurveyResponses::Table, r.clone())
            .join_as(
                JoinType::Join,
                SurveyParticipants::Table,
                p.clone(),
                Expr::col((r.clone(), SurveyResponses::ParticipantId))
                    .equals((p.clone(), SurveyParticipants::ParticipantId)),
            )
            .column((r.clone(), SurveyResponses::Record))
            .column((r.clone(), SurveyResponses::CompletionTime))
            .and_where(Expr::col((p.clone(), SurveyParticipants::ParticipantEmail)).eq(email))
            .and_where(Expr::col((p.clone(), SurveyParticipants::SurveyId)).eq(self.survey_id))
            .and_where(Expr::col((p, SurveyParticipants::EventId)).eq(event_id))
            .and_where(Expr::col((r, SurveyResponses::CompletionTime)).is_not_null())
            .take();
        let rows = self.store.query_rows(&select, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.into_iter()
            .map(|(record, stamp)| {
                let completed = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S")
                    .map_err(|_| InviteError::InvalidTimestamp { value: stamp })?;
                Ok((record, completed))
            })
            .collect()
    }
}

/// Generates one invitation code: shuffle the alphabet, take a prefix,
/// shuffle the prefix again, join.
///
/// # Panics
///
/// Panics when `length` exceeds the alphabet size.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    let mut alphabet: Vec<char> = CODE_ALPHABET.chars().collect();
    alphabet.shuffle(rng);
    let mut code: Vec<char> = alphabet[..length].to_vec();
    code.shuffle(rng);
    code.into_iter().collect()
}
