use std::fmt;

use auto_impl::auto_impl;

use crate::col::Field;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::protocol::response::ErrPayload;
use crate::value::{Row, SqlType, Value};

/// Result of a [`Handler`] callback
///
/// The error is sent to the client verbatim as an ERR packet.
pub type HandlerResult<T> = std::result::Result<T, ErrPayload>;

/// What a handler may know about the connection it serves
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub capabilities: CapabilityFlags,
    /// Set by a successful COM_INIT_DB
    pub schema: Option<String>,
    pub status_flags: ServerStatusFlags,
    /// Preferred rows per batch for [`Rows::batched`]
    pub fetch_batch_size: usize,
}

impl SessionInfo {
    pub fn multi_statements(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_MULTI_STATEMENTS)
    }
}

/// A query to execute
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub sql: &'a str,
    /// `v1..vN` for a prepared statement, empty for COM_QUERY
    pub bind_vars: &'a [(String, Value)],
    /// The prepared statement being executed, if any
    pub statement_id: Option<u32>,
}

/// Parameter and column metadata of a statement being prepared
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareInfo {
    pub param_types: Vec<SqlType>,
    pub fields: Vec<Field>,
}

/// Rows of a result, produced one batch at a time
///
/// A source behind a cursor is resumed by every COM_STMT_FETCH, so a result never has to be
/// materialized at once.
pub trait RowSource {
    /// The next batch of rows, or `None` once the result is exhausted
    fn next_batch(&mut self) -> HandlerResult<Option<Vec<Row>>>;
}

impl<F> RowSource for F
where
    F: FnMut() -> HandlerResult<Option<Vec<Row>>>,
{
    fn next_batch(&mut self) -> HandlerResult<Option<Vec<Row>>> {
        self()
    }
}

/// A materialized result served in fixed-size batches
#[derive(Debug)]
pub struct Rows {
    rows: std::vec::IntoIter<Row>,
    batch_size: usize,
}

impl Rows {
    pub fn batched(rows: Vec<Row>, batch_size: usize) -> Self {
        Self {
            rows: rows.into_iter(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn empty() -> Self {
        Self::batched(Vec::new(), 1)
    }
}

impl RowSource for Rows {
    fn next_batch(&mut self) -> HandlerResult<Option<Vec<Row>>> {
        let batch: Vec<Row> = self.rows.by_ref().take(self.batch_size).collect();
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// The result of one statement
///
/// A result without fields is answered with an OK packet.
pub struct Outcome {
    pub fields: Vec<Field>,
    pub rows: Box<dyn RowSource>,
    pub rows_affected: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
}

impl Outcome {
    /// A result without a result set
    pub fn ok(rows_affected: u64, last_insert_id: u64) -> Self {
        Self {
            fields: Vec::new(),
            rows: Box::new(Rows::empty()),
            rows_affected,
            last_insert_id,
            warnings: 0,
        }
    }

    pub fn rows(fields: Vec<Field>, rows: Vec<Row>, batch_size: usize) -> Self {
        Self::streaming(fields, Rows::batched(rows, batch_size))
    }

    pub fn streaming(fields: Vec<Field>, rows: impl RowSource + 'static) -> Self {
        Self {
            fields,
            rows: Box::new(rows),
            rows_affected: 0,
            last_insert_id: 0,
            warnings: 0,
        }
    }

    pub fn with_warnings(mut self, warnings: u16) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("fields", &self.fields)
            .field("rows_affected", &self.rows_affected)
            .field("last_insert_id", &self.last_insert_id)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

/// The query engine behind a [`crate::server::Session`]
#[auto_impl(&mut, Box)]
pub trait Handler {
    /// COM_INIT_DB
    fn init_db(&mut self, session: &SessionInfo, schema: &str) -> HandlerResult<()> {
        let _ = (session, schema);
        Ok(())
    }

    /// COM_STMT_PREPARE
    fn prepare(&mut self, session: &SessionInfo, sql: &str) -> HandlerResult<PrepareInfo>;

    /// COM_QUERY and COM_STMT_EXECUTE
    ///
    /// With `want_cursor` the rows are pulled by later COM_STMT_FETCH commands.
    fn handle(
        &mut self,
        session: &SessionInfo,
        query: &Query<'_>,
        want_cursor: bool,
    ) -> HandlerResult<Outcome>;

    /// The next result of a multi-statement COM_QUERY
    ///
    /// Only consulted while `CLIENT_MULTI_STATEMENTS` is on.
    fn more_results(&mut self, session: &SessionInfo) -> HandlerResult<Option<Outcome>> {
        let _ = session;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_batched() {
        let rows: Vec<Row> = (0..5).map(|i| vec![Value::int64(i)]).collect();
        let mut source = Rows::batched(rows, 2);
        assert_eq!(source.next_batch().unwrap().map(|b| b.len()), Some(2));
        assert_eq!(source.next_batch().unwrap().map(|b| b.len()), Some(2));
        assert_eq!(source.next_batch().unwrap().map(|b| b.len()), Some(1));
        assert_eq!(source.next_batch().unwrap(), None);
    }

    #[test]
    fn test_closure_source() {
        let mut calls = 0;
        let mut source = move || -> HandlerResult<Option<Vec<Row>>> {
            calls += 1;
            match calls {
                1 => Ok(Some(vec![vec![Value::int64(1)]])),
                _ => Err(ErrPayload::general(1105, "gone")),
            }
        };
        assert!(source.next_batch().unwrap().is_some());
        assert_eq!(source.next_batch().unwrap_err().message, "gone");
    }

    #[test]
    fn test_ok_outcome_has_no_fields() {
        let outcome = Outcome::ok(3, 9).with_warnings(1);
        assert!(!outcome.has_fields());
        assert_eq!(outcome.rows_affected, 3);
        assert_eq!(outcome.warnings, 1);
    }
}
