use std::collections::HashMap;

use crate::buffer_pool::PooledBufferSet;
use crate::col::Field;
use crate::constant::{
    CAPABILITIES_MUTABLE, CapabilityFlags, CursorType, ServerStatusFlags, SetOption,
};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::Transport;
use crate::protocol::command::prepared::{
    read_prepare_ok, write_close_statement, write_execute, write_fetch, write_prepare,
    write_reset_statement, write_send_long_data,
};
use crate::protocol::command::query::write_query;
use crate::protocol::command::utility::{write_init_db, write_ping, write_quit, write_set_option};
use crate::protocol::command::{ColumnDefinitionBytes, ResultSet, ResultSetEvent};
use crate::protocol::response::{
    ErrPayloadBytes, Framing, OkPayload, OkPayloadBytes, is_terminator, read_terminator,
};
use crate::protocol::row::RowFormat;
use crate::statement::{PreparedStatement, StatementTable};
use crate::sync::{QueryResult, ResultStream};
use crate::value::{Row, Value};

/// One result set as received, before the caller's limits are applied
#[derive(Debug, Default)]
pub(crate) struct Received {
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub insert_id: u64,
    pub status: ServerStatusFlags,
    pub warnings: u16,
    /// More rows arrived than were buffered
    pub truncated: bool,
}

impl Received {
    fn more_results(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    fn into_result(self, want_fields: bool) -> QueryResult {
        let fields = if want_fields && !self.fields.is_empty() {
            Some(self.fields)
        } else {
            None
        };
        QueryResult {
            fields,
            rows: self.rows,
            rows_affected: self.rows_affected,
            insert_id: self.insert_id,
        }
    }
}

/// A client connection over an established transport
///
/// The handshake has already happened; `Opts::capabilities` holds its outcome.
pub struct Conn<T: Transport> {
    transport: T,
    buffer_set: PooledBufferSet,
    /// Statements prepared on this connection, as described by the server
    statements: StatementTable,
    /// Columns of the open cursor of each statement
    cursor_fields: HashMap<u32, Vec<Field>>,
    framing: Framing,
    capabilities: CapabilityFlags,
    status_flags: ServerStatusFlags,
    max_rows: usize,
}

impl<T: Transport> Conn<T> {
    pub fn new(transport: T, opts: &Opts) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            transport,
            buffer_set: opts.buffer_pool.get_buffer_set(),
            statements: StatementTable::new(),
            cursor_fields: HashMap::new(),
            framing: Framing::from_capabilities(opts.capabilities),
            capabilities: opts.capabilities,
            status_flags: opts.status_flags,
            max_rows: opts.max_rows,
        })
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Status flags of the last OK or EOF packet
    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status_flags
    }

    pub fn statements(&self) -> &StatementTable {
        &self.statements
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Row limit used by [`Conn::query`]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    #[tracing::instrument(skip_all)]
    fn send_command(&mut self, encode: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<()> {
        self.transport.reset_sequence();
        let buffer = self.buffer_set.new_write_buffer();
        encode(buffer)?;
        self.transport.write_payload(buffer)?;
        self.transport.flush()
    }

    pub(crate) fn read_packet(&mut self) -> Result<&[u8]> {
        self.transport
            .read_payload(&mut self.buffer_set.read_buffer)?;
        Ok(&self.buffer_set.read_buffer)
    }

    fn read_ok(&mut self) -> Result<OkPayload> {
        let payload = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(ErrPayloadBytes(payload).into());
        }
        let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
        self.status_flags = ok.status_flags;
        Ok(ok)
    }

    /// The EOF after parameter or column definitions, legacy framing only
    fn read_fields_eof(&mut self) -> Result<()> {
        if !self.framing.has_fields_eof() {
            return Ok(());
        }
        let payload = self.read_packet()?;
        if !is_terminator(payload) {
            return Err(Error::InvalidPacket);
        }
        Ok(())
    }

    fn read_definitions(&mut self, count: u16) -> Result<Vec<Field>> {
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let payload = self.read_packet()?;
            fields.push(Field::try_from(ColumnDefinitionBytes(payload))?);
        }
        if count > 0 {
            self.read_fields_eof()?;
        }
        Ok(fields)
    }

    /// Read one result, buffering at most `max_rows` rows
    ///
    /// Rows past the limit are read and dropped so that the connection stays in sync.
    pub(crate) fn read_result(
        &mut self,
        mut result_set: ResultSet,
        mut fields: Vec<Field>,
        format: RowFormat,
        max_rows: usize,
    ) -> Result<Received> {
        let mut rows = Vec::new();
        let mut truncated = false;

        loop {
            let payload = self.read_packet()?;
            match result_set.drive(payload)? {
                ResultSetEvent::NeedPayload | ResultSetEvent::ResultSetStart { .. } => {}
                ResultSetEvent::NoResultSet(ok) => {
                    self.status_flags = ok.status_flags;
                    return Ok(Received {
                        rows_affected: ok.affected_rows,
                        insert_id: ok.last_insert_id,
                        status: ok.status_flags,
                        warnings: ok.warnings,
                        ..Received::default()
                    });
                }
                ResultSetEvent::Column(col) => fields.push(Field::try_from(col)?),
                ResultSetEvent::Row(row) => {
                    if rows.len() < max_rows {
                        rows.push(format.read_row(row, &fields)?);
                    } else {
                        truncated = true;
                    }
                }
                ResultSetEvent::Eof(terminator) => {
                    self.status_flags = terminator.status_flags;
                    return Ok(Received {
                        fields,
                        rows,
                        status: terminator.status_flags,
                        warnings: terminator.warnings,
                        truncated,
                        ..Received::default()
                    });
                }
            }
        }
    }

    /// Send COM_QUERY and read its first result
    fn query_first(&mut self, sql: &str, max_rows: usize) -> Result<Received> {
        self.send_command(|out| {
            write_query(out, sql);
            Ok(())
        })?;
        self.read_result(
            ResultSet::new(self.framing),
            Vec::new(),
            RowFormat::Text,
            max_rows,
        )
    }

    /// Read the results that follow a result flagged with `SERVER_MORE_RESULTS_EXISTS`
    fn drain_more_results(&mut self, mut more: bool) -> Result<bool> {
        let mut drained = false;
        while more {
            let next = self.read_result(
                ResultSet::new(self.framing),
                Vec::new(),
                RowFormat::Text,
                0,
            )?;
            more = next.more_results();
            drained = true;
        }
        Ok(drained)
    }

    /// Run a query and buffer its result along with the warning count
    ///
    /// Fails with `RowLimitExceeded` when more than `max_rows` rows come back and with
    /// `UnexpectedMultiResult` when the query produced several results. Either way the whole
    /// reply has been read.
    pub fn execute_fetch_with_warning_count(
        &mut self,
        sql: &str,
        max_rows: usize,
        want_fields: bool,
    ) -> Result<(QueryResult, u16)> {
        let first = self.query_first(sql, max_rows)?;
        let multi = self.drain_more_results(first.more_results())?;
        if first.truncated {
            return Err(Error::RowLimitExceeded { max_rows });
        }
        if multi {
            return Err(Error::UnexpectedMultiResult);
        }
        let warnings = first.warnings;
        Ok((first.into_result(want_fields), warnings))
    }

    pub fn execute_fetch(
        &mut self,
        sql: &str,
        max_rows: usize,
        want_fields: bool,
    ) -> Result<QueryResult> {
        self.execute_fetch_with_warning_count(sql, max_rows, want_fields)
            .map(|(result, _)| result)
    }

    /// [`Conn::execute_fetch`] with the configured row limit and fields
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.execute_fetch(sql, self.max_rows, true)
    }

    /// Run a query that may produce several results and read the first
    ///
    /// Returns whether more results follow; read them with [`Conn::read_query_result`].
    pub fn execute_fetch_multi(
        &mut self,
        sql: &str,
        max_rows: usize,
        want_fields: bool,
    ) -> Result<(QueryResult, bool)> {
        let first = self.query_first(sql, max_rows)?;
        self.finish_multi(first, max_rows, want_fields)
    }

    /// Read the next result of a multi-statement query
    pub fn read_query_result(
        &mut self,
        max_rows: usize,
        want_fields: bool,
    ) -> Result<(QueryResult, bool)> {
        let next = self.read_result(
            ResultSet::new(self.framing),
            Vec::new(),
            RowFormat::Text,
            max_rows,
        )?;
        self.finish_multi(next, max_rows, want_fields)
    }

    fn finish_multi(
        &mut self,
        received: Received,
        max_rows: usize,
        want_fields: bool,
    ) -> Result<(QueryResult, bool)> {
        let more = received.more_results();
        if received.truncated {
            self.drain_more_results(more)?;
            return Err(Error::RowLimitExceeded { max_rows });
        }
        Ok((received.into_result(want_fields), more))
    }

    /// Run a query and read its rows one at a time
    pub fn execute_stream_fetch(&mut self, sql: &str) -> Result<ResultStream<'_, T>> {
        self.send_command(|out| {
            write_query(out, sql);
            Ok(())
        })?;
        ResultStream::start(self)
    }

    pub fn ping(&mut self) -> Result<()> {
        self.send_command(|out| {
            write_ping(out);
            Ok(())
        })?;
        self.read_ok()?;
        Ok(())
    }

    /// Tell the server the connection is going away; nothing is read back
    pub fn quit(&mut self) -> Result<()> {
        self.send_command(|out| {
            write_quit(out);
            Ok(())
        })
    }

    pub fn init_db(&mut self, schema: &str) -> Result<()> {
        self.send_command(|out| {
            write_init_db(out, schema);
            Ok(())
        })?;
        self.read_ok()?;
        Ok(())
    }

    pub fn set_option(&mut self, option: SetOption) -> Result<()> {
        self.send_command(|out| {
            write_set_option(out, option as u16);
            Ok(())
        })?;
        let payload = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(ErrPayloadBytes(payload).into());
        }
        let terminator = read_terminator(payload)?;
        self.status_flags = terminator.status_flags;
        match option {
            SetOption::MultiStatementsOn => self.capabilities.insert(CAPABILITIES_MUTABLE),
            SetOption::MultiStatementsOff => self.capabilities.remove(CAPABILITIES_MUTABLE),
        }
        Ok(())
    }

    /// Returns `Ok(statement_id)` on success
    pub fn prepare(&mut self, sql: &str) -> Result<u32> {
        self.send_command(|out| {
            write_prepare(out, sql);
            Ok(())
        })?;

        let payload = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(ErrPayloadBytes(payload).into());
        }
        let prepare_ok = read_prepare_ok(payload)?;
        let statement_id = prepare_ok.statement_id();

        let params = self.read_definitions(prepare_ok.num_params())?;
        let fields = self.read_definitions(prepare_ok.num_columns())?;
        tracing::debug!(statement_id, params = params.len(), "prepared");

        let param_types = params.iter().map(|param| param.ty).collect();
        self.statements.store(PreparedStatement::new(
            statement_id,
            sql,
            param_types,
            fields,
        ));
        Ok(statement_id)
    }

    /// Send one chunk of a parameter's value ahead of execute
    ///
    /// The server never replies. The value passed to execute for this parameter only
    /// contributes its type.
    pub fn send_long_data(&mut self, statement_id: u32, param_id: u16, data: &[u8]) -> Result<()> {
        // an empty chunk marks the parameter as sent
        self.statements
            .append_long_data(statement_id, param_id, &[])?;
        self.send_command(|out| {
            write_send_long_data(out, statement_id, param_id, data);
            Ok(())
        })
    }

    /// Deallocate a statement; the server never replies
    pub fn close_statement(&mut self, statement_id: u32) -> Result<()> {
        self.statements
            .remove(statement_id)
            .ok_or(Error::UnknownStatement(statement_id))?;
        self.cursor_fields.remove(&statement_id);
        self.send_command(|out| {
            write_close_statement(out, statement_id);
            Ok(())
        })
    }

    /// Discard long data and the open cursor of a statement
    pub fn reset_statement(&mut self, statement_id: u32) -> Result<()> {
        self.statements.get_mut(statement_id)?.clear_long_data();
        self.cursor_fields.remove(&statement_id);
        self.send_command(|out| {
            write_reset_statement(out, statement_id);
            Ok(())
        })?;
        self.read_ok()?;
        Ok(())
    }

    fn send_execute(
        &mut self,
        statement_id: u32,
        params: &[Value],
        cursor: CursorType,
    ) -> Result<()> {
        let stmt = self.statements.get_mut(statement_id)?;
        if params.len() != stmt.param_types.len() {
            return Err(Error::BadInputError(format!(
                "statement {} takes {} parameters, got {}",
                statement_id,
                stmt.param_types.len(),
                params.len()
            )));
        }
        let long_data = stmt.long_data_mask();
        stmt.clear_long_data();
        self.cursor_fields.remove(&statement_id);

        self.send_command(|out| write_execute(out, statement_id, cursor, params, &long_data))
    }

    /// Execute a prepared statement and buffer its result
    pub fn execute(
        &mut self,
        statement_id: u32,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult> {
        self.send_execute(statement_id, params, CursorType::empty())?;
        let received = self.read_result(
            ResultSet::new(self.framing),
            Vec::new(),
            RowFormat::Binary,
            max_rows,
        )?;
        if received.truncated {
            return Err(Error::RowLimitExceeded { max_rows });
        }
        Ok(received.into_result(true))
    }

    /// Execute a prepared statement with a read-only cursor
    ///
    /// When the server opened a cursor the result carries fields and no rows, and the status
    /// has `SERVER_STATUS_CURSOR_EXISTS`; fetch the rows with [`Conn::fetch`].
    pub fn execute_cursor(
        &mut self,
        statement_id: u32,
        params: &[Value],
    ) -> Result<(QueryResult, ServerStatusFlags)> {
        self.send_execute(statement_id, params, CursorType::READ_ONLY)?;
        let received = self.read_result(
            ResultSet::new(self.framing),
            Vec::new(),
            RowFormat::Binary,
            usize::MAX,
        )?;
        let status = received.status;
        if status.contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS) {
            self.cursor_fields
                .insert(statement_id, received.fields.clone());
        }
        Ok((received.into_result(true), status))
    }

    /// Read up to `num_rows` rows from the open cursor of a statement
    ///
    /// The returned status has `SERVER_STATUS_LAST_ROW_SENT` once the cursor is exhausted.
    pub fn fetch(
        &mut self,
        statement_id: u32,
        num_rows: u32,
    ) -> Result<(QueryResult, ServerStatusFlags)> {
        let stmt = self.statements.get(statement_id)?;
        let fields = match self.cursor_fields.get(&statement_id) {
            Some(fields) => fields.clone(),
            // let the server report the missing cursor
            None => stmt.fields.clone(),
        };

        self.send_command(|out| {
            write_fetch(out, statement_id, num_rows);
            Ok(())
        })?;
        let received = self.read_result(
            ResultSet::rows_only(self.framing),
            fields,
            RowFormat::Binary,
            usize::MAX,
        );
        let received = match received {
            Ok(received) => received,
            Err(err) => {
                self.cursor_fields.remove(&statement_id);
                return Err(err);
            }
        };

        let status = received.status;
        if status.contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT) {
            self.cursor_fields.remove(&statement_id);
        }
        Ok((received.into_result(true), status))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays canned server packets and swallows whatever the client sends
    #[derive(Default)]
    struct Replay {
        packets: VecDeque<Vec<u8>>,
        sent: usize,
    }

    impl Transport for Replay {
        fn read_payload(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
            let packet = self.packets.pop_front().ok_or(Error::UnexpectedEof)?;
            buffer.clear();
            buffer.extend_from_slice(&packet);
            Ok(())
        }

        fn write_payload(&mut self, _: &[u8]) -> Result<()> {
            self.sent += 1;
            Ok(())
        }

        fn reset_sequence(&mut self) {}

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn conn(packets: Vec<Vec<u8>>) -> Conn<Replay> {
        let replay = Replay {
            packets: packets.into(),
            sent: 0,
        };
        Conn::new(replay, &Opts::default()).unwrap()
    }

    fn huge_column_count() -> Vec<u8> {
        let mut header = vec![0xFE];
        header.extend_from_slice(&(1u64 << 62).to_le_bytes());
        header
    }

    #[test]
    fn test_huge_column_count_is_an_error() {
        let mut conn = conn(vec![huge_column_count()]);
        let err = conn.execute_fetch("select 1", 10, true).unwrap_err();
        assert!(matches!(err, Error::InvalidPacket), "{err:?}");
        assert_eq!(conn.get_ref().sent, 1);
    }

    #[test]
    fn test_huge_column_count_in_stream() {
        let mut conn = conn(vec![huge_column_count()]);
        let err = conn.execute_stream_fetch("select 1").err();
        assert!(matches!(err, Some(Error::InvalidPacket)), "{err:?}");
    }
}
