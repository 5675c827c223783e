//! Server side of the protocol: one [`Session`] per client connection

pub mod cursor;
pub mod writer;

use std::collections::HashMap;
use std::io::ErrorKind;

use crate::buffer_pool::PooledBufferSet;
use crate::constant::{
    CAPABILITIES_MUTABLE, CapabilityFlags, CommandByte, STATUS_PER_RESPONSE, ServerStatusFlags,
    SetOption, error_code,
};
use crate::error::{Error, Result};
use crate::handler::{Handler, Query, SessionInfo};
use crate::opts::Opts;
use crate::protocol::Transport;
use crate::protocol::command::{Command, StmtExecute, StmtFetch};
use crate::protocol::row::RowFormat;
use crate::protocol::response::{ErrPayload, Framing, OkPayload};
use crate::statement::{PreparedStatement, StatementTable};
use crate::value::Value;

pub use cursor::Cursor;
pub use writer::{FetchState, ResultWriter};

/// What the connection does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// The client sent COM_QUIT
    Quit,
}

/// Protocol state of one client connection
pub struct Session<T: Transport> {
    transport: T,
    buffer_set: PooledBufferSet,
    statements: StatementTable,
    /// Open cursors by statement id
    cursors: HashMap<u32, Cursor>,
    framing: Framing,
    info: SessionInfo,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, opts: &Opts) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            transport,
            buffer_set: opts.buffer_pool.get_buffer_set(),
            statements: StatementTable::new(),
            cursors: HashMap::new(),
            framing: Framing::from_capabilities(opts.capabilities),
            info: SessionInfo {
                capabilities: opts.capabilities,
                schema: None,
                status_flags: opts.status_flags.difference(STATUS_PER_RESPONSE),
                fetch_batch_size: opts.fetch_batch_size,
            },
        })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.info.capabilities
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn statements(&self) -> &StatementTable {
        &self.statements
    }

    pub fn has_cursor(&self, statement_id: u32) -> bool {
        self.cursors.contains_key(&statement_id)
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    fn writer(&mut self) -> ResultWriter<'_, T> {
        ResultWriter::new(
            &mut self.transport,
            self.buffer_set.write_buffer_mut(),
            self.framing,
        )
    }

    fn ok(&mut self) -> Result<()> {
        let ok = OkPayload {
            status_flags: self.info.status_flags,
            ..OkPayload::default()
        };
        self.writer().write_ok(&ok)
    }

    fn reply_error(&mut self, err: &Error) -> Result<()> {
        self.writer().write_err(&ErrPayload::from(err))
    }

    /// Serve commands until COM_QUIT or until the client goes away
    pub fn serve<H: Handler>(&mut self, mut handler: H) -> Result<()> {
        loop {
            match self.handle_next_command(&mut handler) {
                Ok(Dispatch::Continue) => {}
                Ok(Dispatch::Quit) => return Ok(()),
                Err(Error::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read one command, run it and send the complete reply
    ///
    /// Errors returned here are transport or framing failures and the connection should be
    /// closed. Everything else is answered in-band with an ERR packet.
    #[tracing::instrument(skip_all)]
    pub fn handle_next_command<H: Handler>(&mut self, handler: &mut H) -> Result<Dispatch> {
        self.transport.reset_sequence();

        let mut payload = std::mem::take(&mut self.buffer_set.read_buffer);
        let result = match self.transport.read_payload(&mut payload) {
            Ok(()) => self.dispatch(handler, &payload),
            Err(err) => Err(err),
        };
        self.buffer_set.read_buffer = payload;

        let dispatch = result?;
        self.transport.flush()?;
        Ok(dispatch)
    }

    fn dispatch<H: Handler>(&mut self, handler: &mut H, payload: &[u8]) -> Result<Dispatch> {
        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(%err, command = ?payload.first(), "malformed command payload");
                // long data and close are never answered, not even with an error
                if !is_silent(payload) {
                    self.reply_error(&err)?;
                }
                return Ok(Dispatch::Continue);
            }
        };
        tracing::debug!(command = command.name(), "dispatch");

        match command {
            Command::Quit => return Ok(Dispatch::Quit),
            Command::Ping => self.ok()?,
            Command::InitDb(request) => match handler.init_db(&self.info, request.schema) {
                Ok(()) => {
                    self.info.schema = Some(request.schema.to_string());
                    self.ok()?;
                }
                Err(err) => self.writer().write_err(&err)?,
            },
            Command::Query(request) => self.query(handler, request.sql)?,
            Command::SetOption(request) => self.set_option(request.option)?,
            Command::Prepare(request) => self.prepare(handler, request.sql)?,
            Command::SendLongData(request) => {
                tracing::debug!(statement_id = request.statement_id, param = request.param_id);
                if let Err(err) = self.statements.append_long_data(
                    request.statement_id,
                    request.param_id,
                    request.data,
                ) {
                    tracing::warn!(%err, statement_id = request.statement_id, "long data ignored");
                }
            }
            Command::Execute(request) => self.execute(handler, &request)?,
            Command::Fetch(request) => self.fetch(&request)?,
            Command::Close(request) => {
                tracing::debug!(statement_id = request.statement_id, "close");
                self.cursors.remove(&request.statement_id);
                if self.statements.remove(request.statement_id).is_none() {
                    tracing::warn!(
                        statement_id = request.statement_id,
                        "close of unknown statement"
                    );
                }
            }
            Command::Reset(request) => match self.statements.get_mut(request.statement_id) {
                Ok(stmt) => {
                    stmt.clear_long_data();
                    self.cursors.remove(&request.statement_id);
                    self.ok()?;
                }
                Err(err) => self.reply_error(&err)?,
            },
            Command::Unknown(byte) => {
                tracing::warn!(command = byte, "unknown command");
                self.writer().write_err(&ErrPayload::general(
                    error_code::ER_UNKNOWN_COM_ERROR,
                    format!("command handling not implemented yet: {byte}"),
                ))?;
            }
        }
        Ok(Dispatch::Continue)
    }

    fn set_option(&mut self, option: u16) -> Result<()> {
        match SetOption::from_u16(option) {
            Some(SetOption::MultiStatementsOn) => {
                self.info.capabilities.insert(CAPABILITIES_MUTABLE);
            }
            Some(SetOption::MultiStatementsOff) => {
                self.info.capabilities.remove(CAPABILITIES_MUTABLE);
            }
            None => {
                return self.writer().write_err(&ErrPayload::general(
                    error_code::ER_UNKNOWN_COM_ERROR,
                    format!("unknown set option {option}"),
                ));
            }
        }
        let status = self.info.status_flags;
        self.writer().write_terminator(status, 0)
    }

    /// COM_QUERY, followed by any further results of a multi-statement query
    fn query<H: Handler>(&mut self, handler: &mut H, sql: &str) -> Result<()> {
        let query = Query {
            sql,
            bind_vars: &[],
            statement_id: None,
        };
        let mut current = match handler.handle(&self.info, &query, false) {
            Ok(outcome) => outcome,
            Err(err) => return self.writer().write_err(&err),
        };

        loop {
            // the next result decides whether this one announces more
            let next = if self.info.multi_statements() {
                handler.more_results(&self.info)
            } else {
                Ok(None)
            };
            let mut status = self.info.status_flags;
            if !matches!(next, Ok(None)) {
                status |= ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS;
            }

            let complete = self
                .writer()
                .write_result(current, true, RowFormat::Text, status)?;
            if !complete {
                return Ok(());
            }
            match next {
                Ok(Some(outcome)) => current = outcome,
                Ok(None) => return Ok(()),
                Err(err) => return self.writer().write_err(&err),
            }
        }
    }

    fn prepare<H: Handler>(&mut self, handler: &mut H, sql: &str) -> Result<()> {
        let info = match handler.prepare(&self.info, sql) {
            Ok(info) => info,
            Err(err) => return self.writer().write_err(&err),
        };

        let id = self.statements.next_id();
        tracing::debug!(statement_id = id, "prepare");
        let status = self.info.status_flags;
        self.writer().write_prepare_reply(id, &info, status)?;
        self.statements
            .store(PreparedStatement::new(id, sql, info.param_types, info.fields));
        Ok(())
    }

    fn execute<H: Handler>(&mut self, handler: &mut H, request: &StmtExecute<'_>) -> Result<()> {
        let id = request.statement_id;
        tracing::debug!(statement_id = id, cursor = request.wants_cursor(), "execute");
        // a new execute closes the previous cursor
        self.cursors.remove(&id);

        let bound = self
            .statements
            .get_mut(id)
            .and_then(|stmt| bind_params(stmt, request));
        if let Err(err) = bound {
            return self.reply_error(&err);
        }

        let want_cursor = request.wants_cursor();
        let stmt = self.statements.get(id)?;
        let query = Query {
            sql: &stmt.sql,
            bind_vars: &stmt.bind_vars,
            statement_id: Some(id),
        };
        let outcome = match handler.handle(&self.info, &query, want_cursor) {
            Ok(outcome) => outcome,
            Err(err) => return self.writer().write_err(&err),
        };

        let status = self.info.status_flags;
        if want_cursor && outcome.has_fields() {
            match Cursor::open(outcome) {
                Ok(cursor) => {
                    self.writer().write_cursor_open(&cursor, status)?;
                    self.cursors.insert(id, cursor);
                }
                Err(err) => self.writer().write_err(&err)?,
            }
            return Ok(());
        }

        self.writer()
            .write_result(outcome, true, RowFormat::Binary, status)?;
        Ok(())
    }

    fn fetch(&mut self, request: &StmtFetch) -> Result<()> {
        let id = request.statement_id;
        tracing::debug!(statement_id = id, num_rows = request.num_rows, "fetch");
        if let Err(err) = self.statements.get(id) {
            return self.reply_error(&err);
        }
        let Some(cursor) = self.cursors.get_mut(&id) else {
            return self.reply_error(&Error::NoOpenCursor(id));
        };

        let state = ResultWriter::new(
            &mut self.transport,
            self.buffer_set.write_buffer_mut(),
            self.framing,
        )
        .write_fetch(cursor, request.num_rows, self.info.status_flags)?;
        if state != FetchState::Open {
            self.cursors.remove(&id);
        }
        Ok(())
    }
}

/// Commands that get no reply, whether or not they succeed
fn is_silent(payload: &[u8]) -> bool {
    matches!(
        payload.first().copied().and_then(CommandByte::from_u8),
        Some(CommandByte::StmtSendLongData | CommandByte::StmtClose)
    )
}

/// Decode the parameters of `request` into the bind variables of `stmt`
///
/// Accumulated long data stands in for the parameters it was sent for. The long data
/// buffers are cleared either way.
fn bind_params(stmt: &mut PreparedStatement, request: &StmtExecute<'_>) -> Result<()> {
    let long_data = stmt.long_data_mask();
    let decoded = request.decode_params(&stmt.param_types, &long_data);
    let params = match decoded {
        Ok(params) => params,
        Err(err) => {
            stmt.clear_long_data();
            return Err(err);
        }
    };

    let mut values = Vec::with_capacity(params.values.len());
    for (idx, (&ty, value)) in params.types.iter().zip(params.values).enumerate() {
        let value = match value {
            Some(value) => value,
            None => Value::new(ty, stmt.take_long_data(idx).unwrap_or_default()),
        };
        values.push(value);
    }

    stmt.param_types = params.types;
    stmt.clear_long_data();
    stmt.bind(values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::col::Field;
    use crate::constant::CursorType;
    use crate::handler::{HandlerResult, Outcome, PrepareInfo};
    use crate::protocol::command::prepared::{
        write_close_statement, write_execute, write_fetch, write_prepare, write_send_long_data,
    };
    use crate::protocol::command::utility::{write_init_db, write_set_option};
    use crate::protocol::response::{ErrPayloadBytes, read_terminator};
    use crate::value::SqlType;

    /// Feeds queued command payloads and records every reply packet
    #[derive(Default)]
    struct Script {
        input: VecDeque<Vec<u8>>,
        output: Vec<Vec<u8>>,
    }

    impl Transport for Script {
        fn read_payload(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
            let payload = self
                .input
                .pop_front()
                .ok_or_else(|| std::io::Error::from(ErrorKind::UnexpectedEof))?;
            buffer.clear();
            buffer.extend_from_slice(&payload);
            Ok(())
        }

        fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
            self.output.push(payload.to_vec());
            Ok(())
        }

        fn reset_sequence(&mut self) {}

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Echoes the bind variables back as one row
    struct Echo;

    impl Handler for Echo {
        fn prepare(&mut self, _: &SessionInfo, sql: &str) -> HandlerResult<PrepareInfo> {
            let params = sql.matches('?').count();
            Ok(PrepareInfo {
                param_types: vec![SqlType::Varbinary; params],
                fields: vec![Field::new("v", SqlType::Varbinary)],
            })
        }

        fn handle(
            &mut self,
            _: &SessionInfo,
            query: &Query<'_>,
            _: bool,
        ) -> HandlerResult<Outcome> {
            if query.sql == "fail" {
                return Err(ErrPayload::general(1105, "failed"));
            }
            let rows = query
                .bind_vars
                .iter()
                .map(|(_, v)| vec![Value::varbinary(v.as_bytes().unwrap_or_default())])
                .collect();
            Ok(Outcome::rows(
                vec![Field::new("v", SqlType::Varbinary)],
                rows,
                1,
            ))
        }
    }

    fn session(commands: Vec<Vec<u8>>) -> Session<Script> {
        let script = Script {
            input: commands.into(),
            output: Vec::new(),
        };
        Session::new(script, &Opts::default()).unwrap()
    }

    fn command(write: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut out = Vec::new();
        write(&mut out);
        out
    }

    fn err_code(packet: &[u8]) -> u16 {
        match Error::from(ErrPayloadBytes(packet)) {
            Error::ServerError(err) => err.error_code,
            other => panic!("not an ERR packet: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_and_unknown_commands_keep_session() {
        let mut session = session(vec![vec![0x17, 1], vec![0x42], vec![0x0e]]);
        for _ in 0..3 {
            assert_eq!(session.handle_next_command(&mut Echo).unwrap(), Dispatch::Continue);
        }
        let out = &session.get_ref().output;
        assert_eq!(out.len(), 3);
        assert_eq!(err_code(&out[0]), error_code::ER_MALFORMED_PACKET);
        assert_eq!(err_code(&out[1]), error_code::ER_UNKNOWN_COM_ERROR);
        assert_eq!(out[2][0], 0x00);
    }

    #[test]
    fn test_malformed_long_data_and_close_are_silent() {
        let mut session = session(vec![vec![0x18, 1, 0], vec![0x19, 1], vec![0x0e]]);
        for _ in 0..3 {
            assert_eq!(session.handle_next_command(&mut Echo).unwrap(), Dispatch::Continue);
        }
        // only the ping is answered
        let out = &session.get_ref().output;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], 0x00);
    }

    #[test]
    fn test_execute_after_close_is_unknown_statement() {
        let mut session = session(vec![
            command(|out| write_prepare(out, "select ?")),
            command(|out| write_close_statement(out, 1)),
            command(|out| {
                let params = [Value::varbinary(b"x")];
                write_execute(out, 1, CursorType::empty(), &params, &[false]).unwrap()
            }),
            command(|out| write_fetch(out, 1, 10)),
        ]);
        for _ in 0..4 {
            session.handle_next_command(&mut Echo).unwrap();
        }
        assert!(session.statements().is_empty());

        // prepare: OK + param + column; close: nothing
        let out = &session.get_ref().output;
        assert_eq!(out.len(), 5);
        assert_eq!(err_code(&out[3]), error_code::ER_UNKNOWN_STMT_HANDLER);
        assert_eq!(err_code(&out[4]), error_code::ER_UNKNOWN_STMT_HANDLER);
    }

    #[test]
    fn test_set_option_and_init_db() {
        let mut session = session(vec![
            command(|out| write_set_option(out, 0)),
            command(|out| write_set_option(out, 7)),
            command(|out| write_init_db(out, "shop")),
        ]);
        session.handle_next_command(&mut Echo).unwrap();
        assert!(session.info().multi_statements());
        session.handle_next_command(&mut Echo).unwrap();
        session.handle_next_command(&mut Echo).unwrap();
        assert_eq!(session.info().schema.as_deref(), Some("shop"));

        let out = &session.get_ref().output;
        assert!(read_terminator(&out[0]).is_ok());
        assert_eq!(err_code(&out[1]), error_code::ER_UNKNOWN_COM_ERROR);
        assert_eq!(out[2][0], 0x00);
    }

    #[test]
    fn test_long_data_and_close_are_silent() {
        let mut session = session(vec![
            command(|out| write_prepare(out, "select ?")),
            command(|out| write_send_long_data(out, 1, 0, b"hello ")),
            command(|out| write_send_long_data(out, 1, 0, b"world")),
            command(|out| write_send_long_data(out, 9, 0, b"lost")),
            command(|out| {
                let params = [Value::varbinary(b"")];
                write_execute(out, 1, CursorType::empty(), &params, &[true]).unwrap()
            }),
            command(|out| write_close_statement(out, 1)),
            command(|out| write_close_statement(out, 1)),
        ]);
        for _ in 0..7 {
            session.handle_next_command(&mut Echo).unwrap();
        }
        assert!(session.statements().is_empty());

        // prepare: OK + param + column; execute: count + column + row + OK terminator
        let out = &session.get_ref().output;
        assert_eq!(out.len(), 7);
        let mut row = vec![0x00, 0x00, 11];
        row.extend_from_slice(b"hello world");
        assert_eq!(out[5], row);
    }

    #[test]
    fn test_fetch_without_cursor() {
        let mut session = session(vec![
            command(|out| write_fetch(out, 1, 10)),
            command(|out| write_prepare(out, "select 1")),
            command(|out| write_fetch(out, 1, 10)),
        ]);
        for _ in 0..3 {
            session.handle_next_command(&mut Echo).unwrap();
        }
        let out = &session.get_ref().output;
        assert_eq!(err_code(&out[0]), error_code::ER_UNKNOWN_STMT_HANDLER);
        assert_eq!(err_code(out.last().unwrap()), error_code::ER_STMT_HAS_NO_OPEN_CURSOR);
    }

    #[test]
    fn test_serve_stops_at_quit_or_end_of_stream() {
        let mut quit = session(vec![vec![0x0e], vec![0x01], vec![0x0e]]);
        quit.serve(Echo).unwrap();
        assert_eq!(quit.get_ref().output.len(), 1);
        assert_eq!(quit.get_ref().input.len(), 1);

        let mut eof = session(vec![vec![0x0e]]);
        eof.serve(Echo).unwrap();
        assert_eq!(eof.get_ref().output.len(), 1);
    }
}
