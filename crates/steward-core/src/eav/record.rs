//! Record mapper: binds an ordered field schema to a project id and
//! reconstructs read-only typed records through [`eav_join`].
//!
//! A schema is an explicit per-call value; binding the same arguments
//! twice yields equal values and binding a different project id yields an
//! independent value, so there is no process-wide mutable mapping to
//! rebind. Writes never go through the mapper - they belong to the survey
//! connector.

use std::fmt;
use std::sync::Arc;

use sea_query::{Alias, Expr, ExprTrait, Order, SelectStatement};

use super::{eav_join, AttributeData, EavStore, StoreError};

/// An ordered field schema bound to one project id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    project_id: i64,
    fields: Arc<Vec<String>>,
}

impl RecordSchema {
    /// Binds `fields` to `project_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptySchema`] when `fields` is empty.
    pub fn bind(project_id: i64, fields: &[&str]) -> Result<Self, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::EmptySchema);
        }
        Ok(Self {
            project_id,
            fields: Arc::new(fields.iter().map(|field| (*field).to_string()).collect()),
        })
    }

    /// The bound project id.
    #[must_use]
    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    /// The bound field names, in schema order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The reconstruction select for this schema, ordered by record id.
    ///
    /// # Errors
    ///
    /// Returns an error if the join cannot be built.
    pub fn select(&self) -> Result<SelectStatement, StoreError> {
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        let mut select = eav_join(self.project_id, &fields)?;
        select.order_by(Alias::new("record"), Order::Asc);
        Ok(select)
    }

    /// Fetches every record matching the schema.
    ///
    /// Records missing the anchor field do not exist; records missing any
    /// later field are dropped by the join.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn fetch_all(&self, store: &EavStore) -> Result<Vec<MappedRecord>, StoreError> {
        let select = self.select()?;
        self.fetch(store, &select)
    }

    /// Fetches records whose `field` value equals `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownField`] when `field` is not part of
    /// this schema, or an error if the query fails.
    pub fn fetch_where(
        &self,
        store: &EavStore,
        field: &str,
        value: &str,
    ) -> Result<Vec<MappedRecord>, StoreError> {
        if !self.fields.iter().any(|candidate| candidate == field) {
            return Err(StoreError::UnknownField {
                field: field.to_string(),
            });
        }
        let mut select = self.select()?;
        select.and_where(
            Expr::col((Alias::new(format!("j_{field}")), AttributeData::Value)).eq(value),
        );
        self.fetch(store, &select)
    }

    fn fetch(
        &self,
        store: &EavStore,
        select: &SelectStatement,
    ) -> Result<Vec<MappedRecord>, StoreError> {
        let width = self.fields.len();
        store.query_rows(select, |row| {
            let record: String = row.get(0)?;
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(row.get::<_, String>(index + 1)?);
            }
            Ok(MappedRecord {
                record,
                fields: Arc::clone(&self.fields),
                values,
            })
        })
    }
}

/// One record reconstructed through a [`RecordSchema`].
#[derive(Clone, PartialEq, Eq)]
pub struct MappedRecord {
    record: String,
    fields: Arc<Vec<String>>,
    values: Vec<String>,
}

impl MappedRecord {
    /// The record identifier.
    #[must_use]
    pub fn record(&self) -> &str {
        &self.record
    }

    /// The value of `field`, when the field is part of the schema.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .position(|candidate| candidate == field)
            .map(|index| self.values[index].as_str())
    }

    /// The values in schema field order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterates `(field, value)` pairs in schema order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

impl fmt::Debug for MappedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entry = f.debug_struct("MappedRecord");
        entry.field("record", &self.record);
        for (field, value) in self.pairs() {
            entry.field(field, &value);
        }
        entry.finish()
    }
}
