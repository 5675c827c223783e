use crate::col::Field;
use crate::constant::{CHARSET_BINARY, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::handler::{Outcome, PrepareInfo};
use crate::protocol::Transport;
use crate::protocol::command::prepared::{PrepareOk, write_prepare_ok};
use crate::protocol::command::write_column_definition;
use crate::protocol::primitive::write_int_lenenc;
use crate::protocol::response::{ErrPayload, Framing, OkPayload};
use crate::protocol::row::RowFormat;
use crate::server::cursor::Cursor;
use crate::value::{Row, SqlType};

/// How a COM_STMT_FETCH reply ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Rows remain behind the cursor
    Open,
    /// The last row was sent
    Exhausted,
    /// The handler failed and an ERR packet was sent
    Failed,
}

/// Encodes replies into packets
///
/// Every packet is assembled in `buffer` and queued on the transport; the caller flushes.
pub struct ResultWriter<'a, T: Transport> {
    transport: &'a mut T,
    buffer: &'a mut Vec<u8>,
    framing: Framing,
}

impl<'a, T: Transport> ResultWriter<'a, T> {
    pub fn new(transport: &'a mut T, buffer: &'a mut Vec<u8>, framing: Framing) -> Self {
        Self {
            transport,
            buffer,
            framing,
        }
    }

    fn send(&mut self, encode: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        self.buffer.clear();
        encode(&mut *self.buffer);
        self.transport.write_payload(&self.buffer[..])
    }

    pub fn write_ok(&mut self, ok: &OkPayload) -> Result<()> {
        self.send(|out| ok.write(out))
    }

    pub fn write_err(&mut self, err: &ErrPayload) -> Result<()> {
        self.send(|out| err.write(out))
    }

    pub fn write_terminator(&mut self, status: ServerStatusFlags, warnings: u16) -> Result<()> {
        let framing = self.framing;
        self.send(|out| framing.write_terminator(out, status, warnings))
    }

    /// Column count and definitions, without the EOF that may follow them
    fn write_columns(&mut self, fields: &[Field], want_fields: bool) -> Result<()> {
        self.send(|out| write_int_lenenc(out, fields.len() as u64))?;
        for field in fields {
            if want_fields {
                self.send(|out| write_column_definition(out, field))?;
            } else {
                let field = field.type_only();
                self.send(|out| write_column_definition(out, &field))?;
            }
        }
        Ok(())
    }

    /// The EOF after a list of definitions, legacy framing only
    fn write_fields_eof(&mut self, status: ServerStatusFlags) -> Result<()> {
        let framing = self.framing;
        if framing.has_fields_eof() {
            self.send(|out| framing.write_fields_eof(out, status))?;
        }
        Ok(())
    }

    /// Parameter or column definitions of a prepared statement; nothing at all when empty
    fn write_definitions(&mut self, fields: &[Field], status: ServerStatusFlags) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        for field in fields {
            self.send(|out| write_column_definition(out, field))?;
        }
        self.write_fields_eof(status)
    }

    /// Write one row, or an ERR packet in its place when it cannot be encoded
    ///
    /// Returns `false` when the ERR packet was written.
    fn write_row(&mut self, row: &Row, fields: &[Field], format: RowFormat) -> Result<bool> {
        self.buffer.clear();
        if let Err(err) = format.write_row(&mut *self.buffer, row, fields) {
            tracing::warn!(%err, "row cannot be encoded");
            self.write_err(&ErrPayload::from(&err))?;
            return Ok(false);
        }
        self.transport.write_payload(&self.buffer[..])?;
        Ok(true)
    }

    /// Write a complete result
    ///
    /// A result without fields is a single OK packet. When the handler fails after the header
    /// was written, an ERR packet replaces the terminator and `false` is returned.
    pub fn write_result(
        &mut self,
        outcome: Outcome,
        want_fields: bool,
        format: RowFormat,
        status: ServerStatusFlags,
    ) -> Result<bool> {
        if !outcome.has_fields() {
            self.write_ok(&OkPayload {
                affected_rows: outcome.rows_affected,
                last_insert_id: outcome.last_insert_id,
                status_flags: status,
                warnings: outcome.warnings,
            })?;
            return Ok(true);
        }

        let Outcome {
            fields,
            mut rows,
            warnings,
            ..
        } = outcome;

        self.write_columns(&fields, want_fields)?;
        self.write_fields_eof(status)?;

        loop {
            let batch = match rows.next_batch() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    self.write_err(&err)?;
                    return Ok(false);
                }
            };
            for row in &batch {
                if !self.write_row(row, &fields, format)? {
                    return Ok(false);
                }
            }
        }

        self.write_terminator(status, warnings)?;
        Ok(true)
    }

    /// Column definitions of a result whose rows stay behind a cursor
    ///
    /// A single terminator carrying `SERVER_STATUS_CURSOR_EXISTS` follows the definitions. Under
    /// legacy framing it doubles as the EOF after the fields.
    pub fn write_cursor_open(&mut self, cursor: &Cursor, status: ServerStatusFlags) -> Result<()> {
        self.write_columns(cursor.fields(), true)?;
        self.write_terminator(
            status | ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS,
            cursor.warnings(),
        )
    }

    /// Up to `num_rows` rows from `cursor` and the terminator that reports what is left
    pub fn write_fetch(
        &mut self,
        cursor: &mut Cursor,
        num_rows: u32,
        status: ServerStatusFlags,
    ) -> Result<FetchState> {
        for _ in 0..num_rows {
            let row = match cursor.next_row() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(err) => {
                    self.write_err(&err)?;
                    return Ok(FetchState::Failed);
                }
            };
            if !self.write_row(&row, cursor.fields(), RowFormat::Binary)? {
                return Ok(FetchState::Failed);
            }
        }

        let more = match cursor.has_more() {
            Ok(more) => more,
            Err(err) => {
                self.write_err(&err)?;
                return Ok(FetchState::Failed);
            }
        };
        let (flag, state) = if more {
            (ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS, FetchState::Open)
        } else {
            (ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT, FetchState::Exhausted)
        };
        self.write_terminator(status | flag, cursor.warnings())?;
        Ok(state)
    }

    /// COM_STMT_PREPARE reply
    pub fn write_prepare_reply(
        &mut self,
        statement_id: u32,
        info: &PrepareInfo,
        status: ServerStatusFlags,
    ) -> Result<()> {
        let num_columns = u16::try_from(info.fields.len()).map_err(Error::from_debug)?;
        let num_params = u16::try_from(info.param_types.len()).map_err(Error::from_debug)?;
        let prepare_ok = PrepareOk::new(statement_id, num_columns, num_params, 0);
        self.send(|out| write_prepare_ok(out, &prepare_ok))?;

        let params: Vec<Field> = info
            .param_types
            .iter()
            .map(|&ty| param_field(ty))
            .collect();
        self.write_definitions(&params, status)?;
        self.write_definitions(&info.fields, status)
    }
}

/// Definition sent for each `?` of a prepared statement
fn param_field(ty: SqlType) -> Field {
    Field {
        charset: CHARSET_BINARY,
        ..Field::new("?", ty)
    }
}
