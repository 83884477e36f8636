//! Append-only log of sent decision notices.
//!
//! A decision is "pending" while no row for its record exists here; the
//! query engine anti-joins this table to find decisions still awaiting
//! notification. Rows are only ever appended - never updated or deleted.

use chrono::NaiveDateTime;
use rusqlite::params;
use sea_query::Iden;

use crate::eav::{EavStore, StoreError};

/// The notice log table.
#[derive(Debug, Clone, Copy, Iden)]
pub enum NoticeLogTable {
    /// Table name.
    #[iden = "notice_log"]
    Table,
    /// Surrogate id.
    Id,
    /// Decision record the notice was about.
    Record,
    /// When the notice was sent.
    Timestamp,
}

/// Writer for the notice log.
pub struct NoticeLog {
    store: EavStore,
}

impl NoticeLog {
    /// Creates a writer over the given store.
    #[must_use]
    pub fn new(store: EavStore) -> Self {
        Self { store }
    }

    /// Records that notices went out for the given decision records.
    ///
    /// The whole batch is appended in a single transaction: either every
    /// record is marked notified or none is.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; no rows are kept in
    /// that case.
    pub fn log_sent(&self, entries: &[(String, NaiveDateTime)]) -> Result<(), StoreError> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO notice_log (record, timestamp) VALUES (?1, ?2)")?;
            for (record, sent_at) in entries {
                stmt.execute(params![
                    record,
                    sent_at.format("%Y-%m-%d %H:%M:%S").to_string()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn sent_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 9, 2)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_log_sent_appends_batch() {
        let store = EavStore::in_memory().unwrap();
        let log = NoticeLog::new(store.clone());
        log.log_sent(&[
            ("alpha".to_string(), sent_at()),
            ("beta".to_string(), sent_at()),
        ])
        .unwrap();

        let conn = store.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notice_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let stamp: String = conn
            .query_row(
                "SELECT timestamp FROM notice_log WHERE record = 'alpha'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stamp, "2011-09-02 10:30:00");
    }

    #[test]
    fn test_log_sent_empty_batch_is_a_noop() {
        let store = EavStore::in_memory().unwrap();
        NoticeLog::new(store.clone()).log_sent(&[]).unwrap();
        let conn = store.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notice_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
