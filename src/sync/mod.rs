//! Blocking client side of the protocol

mod conn;
mod stream;

pub use conn::Conn;
pub use stream::ResultStream;

use crate::col::Field;
use crate::value::Row;

/// A result read back by the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// `None` when fields were not asked for, or the result has no result set
    pub fields: Option<Vec<Field>>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub insert_id: u64,
}
