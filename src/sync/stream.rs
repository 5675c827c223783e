use crate::col::Field;
use crate::constant::ServerStatusFlags;
use crate::error::Result;
use crate::protocol::Transport;
use crate::protocol::command::{ResultSet, ResultSetEvent};
use crate::protocol::row::RowFormat;
use crate::sync::Conn;
use crate::value::Row;

/// Rows of a text query, read from the connection one at a time
///
/// Dropping the stream before the end reads and discards the remaining rows, and any further
/// results of a multi-statement query.
pub struct ResultStream<'a, T: Transport> {
    conn: &'a mut Conn<T>,
    result_set: ResultSet,
    fields: Vec<Field>,
    rows_affected: u64,
    done: bool,
    status: ServerStatusFlags,
    warnings: u16,
}

impl<'a, T: Transport> ResultStream<'a, T> {
    /// Read the column definitions of the reply that was just requested
    pub(crate) fn start(conn: &'a mut Conn<T>) -> Result<Self> {
        let mut stream = Self {
            result_set: ResultSet::new(conn.framing()),
            conn,
            fields: Vec::new(),
            rows_affected: 0,
            done: false,
            status: ServerStatusFlags::empty(),
            warnings: 0,
        };

        if let Err(err) = stream.read_header() {
            stream.done = true;
            return Err(err);
        }
        Ok(stream)
    }

    fn read_header(&mut self) -> Result<()> {
        while !self.result_set.is_reading_rows() && !self.done {
            let payload = self.conn.read_packet()?;
            match self.result_set.drive(payload)? {
                ResultSetEvent::NeedPayload
                | ResultSetEvent::ResultSetStart { .. }
                | ResultSetEvent::Row(_) => {}
                ResultSetEvent::NoResultSet(ok) => {
                    self.done = true;
                    self.rows_affected = ok.affected_rows;
                    self.status = ok.status_flags;
                    self.warnings = ok.warnings;
                }
                ResultSetEvent::Column(col) => self.fields.push(Field::try_from(col)?),
                ResultSetEvent::Eof(terminator) => {
                    self.done = true;
                    self.status = terminator.status_flags;
                    self.warnings = terminator.warnings;
                }
            }
        }
        Ok(())
    }

    /// Empty for a statement that returned OK
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Status of the final packet, once the stream is done
    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Returns `Ok(None)` after the last row
    pub fn fetch_next(&mut self) -> Result<Option<Row>> {
        while !self.done {
            let event = match self
                .conn
                .read_packet()
                .and_then(|payload| self.result_set.drive(payload))
            {
                Ok(event) => event,
                Err(err) => {
                    self.done = true;
                    return Err(err);
                }
            };
            match event {
                ResultSetEvent::Row(row) => {
                    return RowFormat::Text.read_row(row, &self.fields).map(Some);
                }
                ResultSetEvent::Eof(terminator) => {
                    self.done = true;
                    self.status = terminator.status_flags;
                    self.warnings = terminator.warnings;
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Read the rest of the reply, discarding it
    pub fn close(mut self) -> Result<()> {
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        while self.fetch_next()?.is_some() {}
        let more = self
            .status
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
        if more {
            self.status.remove(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
            let mut next = ResultStream::start(&mut *self.conn)?;
            next.drain()?;
        }
        Ok(())
    }
}

impl<T: Transport> Drop for ResultStream<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.drain() {
            tracing::warn!(%err, "failed to drain result stream");
        }
    }
}
