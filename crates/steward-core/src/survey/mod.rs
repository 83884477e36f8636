//! Write-side collaborators around the external survey system.
//!
//! [`connect`] is the authenticated proxy to the survey system's
//! import/setup API; [`invite`] issues forgery-resistant per-user survey
//! invitation codes against the survey tables of the store.

pub mod connect;
pub mod invite;
