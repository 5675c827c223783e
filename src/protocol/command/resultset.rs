use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result};
use crate::protocol::command::ColumnDefinitionBytes;
use crate::protocol::primitive::*;
use crate::protocol::response::{
    ErrPayloadBytes, Framing, OkPayload, OkPayloadBytes, Terminator, is_terminator,
    read_terminator,
};

/// Events produced while reading the reply to COM_QUERY, COM_STMT_EXECUTE or COM_STMT_FETCH
#[derive(Debug)]
pub enum ResultSetEvent<'a> {
    /// Need more payload data
    NeedPayload,
    /// The command returned OK without a result set
    NoResultSet(OkPayload),
    ResultSetStart { num_columns: usize },
    Column(ColumnDefinitionBytes<'a>),
    /// One row, text or binary depending on the command
    Row(&'a [u8]),
    /// The result set is complete
    Eof(Terminator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    ReadingColumns { remaining: usize },
    FieldsEof,
    ReadingRows,
    Finished,
}

/// Pure parsing state machine for a result set
///
/// Each call to `drive()` accepts a payload with its own independent lifetime. An ERR
/// packet at any point ends the result set and surfaces as `Error::ServerError`.
#[derive(Debug)]
pub struct ResultSet {
    framing: Framing,
    state: State,
}

impl ResultSet {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            state: State::Start,
        }
    }

    /// Rows of an open cursor, as sent in reply to COM_STMT_FETCH
    pub fn rows_only(framing: Framing) -> Self {
        Self {
            framing,
            state: State::ReadingRows,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Column definitions are complete and rows, if any, come next
    pub fn is_reading_rows(&self) -> bool {
        self.state == State::ReadingRows
    }

    pub fn drive<'a>(&mut self, payload: &'a [u8]) -> Result<ResultSetEvent<'a>> {
        if payload.first() == Some(&0xFF) && self.state != State::Finished {
            self.state = State::Finished;
            return Err(ErrPayloadBytes(payload).into());
        }

        match self.state {
            State::Start => {
                if payload.first() == Some(&0x00) {
                    self.state = State::Finished;
                    let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
                    return Ok(ResultSetEvent::NoResultSet(ok));
                }
                let (num_columns, _rest) = read_int_lenenc(payload)?;
                // column counts travel as u16 everywhere else in the protocol
                let num_columns = match u16::try_from(num_columns) {
                    Ok(0) | Err(_) => return Err(Error::InvalidPacket),
                    Ok(n) => usize::from(n),
                };
                self.state = State::ReadingColumns {
                    remaining: num_columns,
                };
                Ok(ResultSetEvent::ResultSetStart { num_columns })
            }

            State::ReadingColumns { remaining } => {
                self.state = match remaining - 1 {
                    0 if self.framing.has_fields_eof() => State::FieldsEof,
                    0 => State::ReadingRows,
                    remaining => State::ReadingColumns { remaining },
                };
                Ok(ResultSetEvent::Column(ColumnDefinitionBytes(payload)))
            }

            State::FieldsEof => {
                if !is_terminator(payload) {
                    return Err(Error::InvalidPacket);
                }
                let terminator = read_terminator(payload)?;
                // an opened cursor ends the reply right after the column definitions
                if terminator
                    .status_flags
                    .contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
                {
                    self.state = State::Finished;
                    return Ok(ResultSetEvent::Eof(terminator));
                }
                self.state = State::ReadingRows;
                Ok(ResultSetEvent::NeedPayload)
            }

            State::ReadingRows => {
                if is_terminator(payload) {
                    self.state = State::Finished;
                    return Ok(ResultSetEvent::Eof(read_terminator(payload)?));
                }
                Ok(ResultSetEvent::Row(payload))
            }

            State::Finished => Err(Error::InvalidPacket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::col::Field;
    use crate::protocol::command::write_column_definition;
    use crate::protocol::response::ErrPayload;
    use crate::value::SqlType;

    fn column() -> Vec<u8> {
        let mut out = Vec::new();
        write_column_definition(&mut out, &Field::new("a", SqlType::Int64));
        out
    }

    fn terminator(framing: Framing, status: ServerStatusFlags) -> Vec<u8> {
        let mut out = Vec::new();
        framing.write_terminator(&mut out, status, 0);
        out
    }

    #[test]
    fn test_ok_without_result_set() {
        let mut rs = ResultSet::new(Framing::DeprecateEof);
        let mut ok = Vec::new();
        OkPayload {
            affected_rows: 3,
            ..OkPayload::default()
        }
        .write(&mut ok);
        match rs.drive(&ok).unwrap() {
            ResultSetEvent::NoResultSet(ok) => assert_eq!(ok.affected_rows, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rs.is_finished());
    }

    #[test]
    fn test_legacy_sequence() {
        let mut rs = ResultSet::new(Framing::Legacy);
        assert!(matches!(
            rs.drive(&[1]).unwrap(),
            ResultSetEvent::ResultSetStart { num_columns: 1 }
        ));
        assert!(matches!(rs.drive(&column()).unwrap(), ResultSetEvent::Column(_)));
        let eof = terminator(Framing::Legacy, ServerStatusFlags::empty());
        assert!(matches!(rs.drive(&eof).unwrap(), ResultSetEvent::NeedPayload));
        assert!(matches!(rs.drive(&[1, b'1']).unwrap(), ResultSetEvent::Row(_)));
        assert!(matches!(rs.drive(&eof).unwrap(), ResultSetEvent::Eof(_)));
        assert!(rs.is_finished());
    }

    #[test]
    fn test_deprecate_eof_sequence() {
        let mut rs = ResultSet::new(Framing::DeprecateEof);
        rs.drive(&[1]).unwrap();
        rs.drive(&column()).unwrap();
        assert!(matches!(rs.drive(&[1, b'1']).unwrap(), ResultSetEvent::Row(_)));
        let ok = terminator(Framing::DeprecateEof, ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
        match rs.drive(&ok).unwrap() {
            ResultSetEvent::Eof(t) => {
                assert!(t.status_flags.contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_legacy_cursor_ends_after_fields() {
        let mut rs = ResultSet::new(Framing::Legacy);
        rs.drive(&[1]).unwrap();
        rs.drive(&column()).unwrap();
        let eof = terminator(Framing::Legacy, ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS);
        assert!(matches!(rs.drive(&eof).unwrap(), ResultSetEvent::Eof(_)));
        assert!(rs.is_finished());
    }

    #[test]
    fn test_implausible_column_count() {
        let mut huge = vec![0xFE];
        huge.extend_from_slice(&(1u64 << 62).to_le_bytes());
        for header in [&[0xFC, 0x00, 0x00][..], &[0xFD, 0x00, 0x00, 0x01], &huge] {
            let mut rs = ResultSet::new(Framing::DeprecateEof);
            assert!(matches!(rs.drive(header), Err(Error::InvalidPacket)), "{header:?}");
        }

        let mut rs = ResultSet::new(Framing::DeprecateEof);
        assert!(matches!(
            rs.drive(&[0xFC, 0xFF, 0xFF]).unwrap(),
            ResultSetEvent::ResultSetStart { num_columns: 65535 }
        ));
    }

    #[test]
    fn test_error_mid_rows() {
        let mut rs = ResultSet::rows_only(Framing::DeprecateEof);
        assert!(matches!(rs.drive(&[0x00, 0x00]).unwrap(), ResultSetEvent::Row(_)));
        let mut err = Vec::new();
        ErrPayload::general(1105, "boom").write(&mut err);
        match rs.drive(&err) {
            Err(Error::ServerError(e)) => assert_eq!(e.message, "boom"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rs.is_finished());
    }
}
