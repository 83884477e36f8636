//! Steward core - oversight decision and sponsorship-tracking engine.
//!
//! This crate is the data-access backbone of a research data-access
//! administration portal. Approval records live in an external
//! entity-attribute-value (EAV) store; this crate reconstructs structured
//! records from scattered attribute rows, derives committee decisions from
//! per-institution approval counts, tracks sponsorship relationships and
//! their expiration, de-duplicates outbound notifications through an
//! append-only log table, and resolves investigators and team members
//! against an enterprise directory.
//!
//! # Components
//!
//! - [`eav`]: store adapter and parametric multi-way self-join over the
//!   attribute table, plus the record mapper that binds a field schema to
//!   a project.
//! - [`directory`]: capability-style lookup of a person's canonical
//!   identity (login, name, mail, affiliation, training expiry).
//! - [`oversight`]: the decision/sponsorship query engine, the notice log,
//!   and the [`oversight::DecisionRecords`] facade that composes them.
//! - [`survey`]: write-side collaborators - the authenticated survey API
//!   connector and the forgery-resistant invitation issuer.
//! - [`disclaimer`]: typed read access to disclaimer and acknowledgement
//!   records.
//! - [`config`]: TOML configuration for the store and survey endpoints.
//!
//! Everything here runs synchronously on the calling thread; suspension
//! happens only at the store and directory boundaries. The store
//! connection is the sole shared resource and every mutation
//! (notice-log append, invitation insert) runs inside a single
//! transaction.

pub mod config;
pub mod directory;
pub mod disclaimer;
pub mod eav;
pub mod oversight;
pub mod survey;

pub use config::{ConfigError, StewardConfig};
pub use directory::{Directory, DirectoryError, MockDirectory, Principal};
pub use eav::record::{MappedRecord, RecordSchema};
pub use eav::{EavStore, StoreError};
pub use oversight::{Clock, DecisionRecords, NoticeLog, OversightError, SystemClock};
pub use survey::connect::{SurveyApiError, SurveyEndpoint, SurveySetup};
pub use survey::invite::{InviteError, SecureSurvey};
