//! Disclaimer and acknowledgement records.
//!
//! Disclaimers (the release notices users must read) and their
//! acknowledgements live in the attribute store like everything else;
//! these are the two typed schemas bound over the record mapper. Reads
//! only - acknowledgements are written through
//! [`crate::survey::connect::AcknowledgementsProject`].

use crate::eav::record::{MappedRecord, RecordSchema};
use crate::eav::{EavStore, StoreError};

/// Field schema of a disclaimer record.
pub const DISCLAIMER_FIELDS: &[&str] = &["disclaimer_id", "url", "current"];

/// Field schema of an acknowledgement record.
pub const ACKNOWLEDGEMENT_FIELDS: &[&str] =
    &["ack", "timestamp", "user_id", "disclaimer_address"];

/// Read access to the disclaimers of one project.
pub struct Disclaimers {
    schema: RecordSchema,
}

impl Disclaimers {
    /// Binds the disclaimer schema to `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be bound.
    pub fn new(project_id: i64) -> Result<Self, StoreError> {
        Ok(Self {
            schema: RecordSchema::bind(project_id, DISCLAIMER_FIELDS)?,
        })
    }

    /// Every disclaimer on file.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all(&self, store: &EavStore) -> Result<Vec<MappedRecord>, StoreError> {
        self.schema.fetch_all(store)
    }

    /// The disclaimer currently in force, when one is marked current.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn current(&self, store: &EavStore) -> Result<Option<MappedRecord>, StoreError> {
        Ok(self
            .schema
            .fetch_where(store, "current", "1")?
            .into_iter()
            .next())
    }
}

/// Read access to the acknowledgements of one project.
pub struct Acknowledgements {
    schema: RecordSchema,
}

impl Acknowledgements {
    /// Binds the acknowledgement schema to `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be bound.
    pub fn new(project_id: i64) -> Result<Self, StoreError> {
        Ok(Self {
            schema: RecordSchema::bind(project_id, ACKNOWLEDGEMENT_FIELDS)?,
        })
    }

    /// Every acknowledgement on file.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all(&self, store: &EavStore) -> Result<Vec<MappedRecord>, StoreError> {
        self.schema.fetch_all(store)
    }

    /// The acknowledgements recorded for one user.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn of_user(
        &self,
        store: &EavStore,
        user_id: &str,
    ) -> Result<Vec<MappedRecord>, StoreError> {
        self.schema.fetch_where(store, "user_id", user_id)
    }
}
