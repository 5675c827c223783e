use crate::constant::{CommandByte, CursorType};
use crate::error::{Error, Result};
use crate::protocol::command::expect_end;
use crate::protocol::primitive::*;
use crate::protocol::value::{
    NullBitmap, param_type_bytes, param_type_from_bytes, read_binary_value, write_binary_value,
};
use crate::value::{SqlType, Value};
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Prepared statement OK response (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn new(statement_id: u32, num_columns: u16, num_params: u16, warning_count: u16) -> Self {
        Self {
            statement_id: U32LE::new(statement_id),
            num_columns: U16LE::new(num_columns),
            num_params: U16LE::new(num_params),
            _reserved: 0,
            warning_count: U16LE::new(warning_count),
        }
    }

    /// Get the statement ID
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    /// Get the number of columns in the result set
    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    /// Get the number of parameters in the prepared statement
    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    /// Get the warning count
    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE response header
pub fn write_prepare_ok(out: &mut Vec<u8>, prepare_ok: &PrepareOk) {
    write_int_1(out, 0x00);
    out.extend_from_slice(prepare_ok.as_bytes());
}

/// Read COM_STMT_PREPARE response header
pub fn read_prepare_ok(payload: &[u8]) -> Result<PrepareOk> {
    let (status, data) = read_int_1(payload)?;
    if status != 0x00 {
        return Err(Error::InvalidPacket);
    }
    let (body, _) = read_string_fix(data, size_of::<PrepareOk>())?;
    PrepareOk::read_from_bytes(body).map_err(Error::from_debug)
}

// ============================================================================
// COM_STMT_PREPARE
// ============================================================================

#[derive(Debug)]
pub struct StmtPrepare<'a> {
    pub sql: &'a str,
}

impl<'a> StmtPrepare<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        Ok(Self {
            sql: read_utf8(read_string_eof(body))?,
        })
    }
}

/// Write COM_STMT_PREPARE command
pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

// ============================================================================
// COM_STMT_EXECUTE
// ============================================================================

#[derive(Debug)]
pub struct StmtExecute<'a> {
    pub statement_id: u32,
    pub cursor: CursorType,
    pub iterations: u32,
    /// Null bitmap, types and values; decoding needs the statement's parameter count
    params: &'a [u8],
}

/// Parameters of one COM_STMT_EXECUTE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteParams {
    pub types: Vec<SqlType>,
    /// `None` where the value was sent ahead with COM_STMT_SEND_LONG_DATA
    pub values: Vec<Option<Value>>,
}

impl<'a> StmtExecute<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        let (statement_id, rest) = read_int_4(body)?;
        let (flags, rest) = read_int_1(rest)?;
        let (iterations, rest) = read_int_4(rest)?;
        Ok(Self {
            statement_id,
            cursor: CursorType::from_bits_retain(flags),
            iterations,
            params: rest,
        })
    }

    pub fn wants_cursor(&self) -> bool {
        self.cursor.contains(CursorType::READ_ONLY)
    }

    /// Decode the parameter block against the statement's declared types
    ///
    /// Types sent with the request replace `declared`. Parameters flagged in `long_data`
    /// have no value in the payload.
    pub fn decode_params(&self, declared: &[SqlType], long_data: &[bool]) -> Result<ExecuteParams> {
        let count = declared.len();
        if count == 0 {
            return Ok(ExecuteParams {
                types: Vec::new(),
                values: Vec::new(),
            });
        }

        let bitmap_len = NullBitmap::byte_len(count, NullBitmap::PARAMETER_OFFSET);
        let (bitmap, rest) = read_string_fix(self.params, bitmap_len)?;
        let bitmap = NullBitmap::for_parameters(bitmap);
        let (new_params_bound, mut rest) = read_int_1(rest)?;

        let types = if new_params_bound == 1 {
            let mut types = Vec::with_capacity(count);
            for _ in 0..count {
                let (column_type, r) = read_int_1(rest)?;
                let (flag, r) = read_int_1(r)?;
                types.push(param_type_from_bytes(column_type, flag)?);
                rest = r;
            }
            types
        } else {
            declared.to_vec()
        };

        let mut values = Vec::with_capacity(count);
        for (idx, &ty) in types.iter().enumerate() {
            if long_data.get(idx).copied().unwrap_or(false) {
                values.push(None);
            } else if bitmap.is_null(idx) {
                values.push(Some(Value::NULL));
            } else {
                let (value, r) = read_binary_value(ty, rest)?;
                values.push(Some(value));
                rest = r;
            }
        }

        Ok(ExecuteParams { types, values })
    }
}

/// Write COM_STMT_EXECUTE command
///
/// At indexes flagged in `long_data` only the value's type is sent.
pub fn write_execute(
    out: &mut Vec<u8>,
    statement_id: u32,
    cursor: CursorType,
    params: &[Value],
    long_data: &[bool],
) -> Result<()> {
    write_int_1(out, CommandByte::StmtExecute as u8);
    write_int_4(out, statement_id);
    write_int_1(out, cursor.bits());
    write_int_4(out, 1);

    if params.is_empty() {
        return Ok(());
    }

    NullBitmap::write(out, params, NullBitmap::PARAMETER_OFFSET);
    write_int_1(out, 1);
    for param in params {
        write_bytes_fix(out, &param_type_bytes(param.ty()));
    }
    for (idx, param) in params.iter().enumerate() {
        if !long_data.get(idx).copied().unwrap_or(false) {
            write_binary_value(out, param)?;
        }
    }
    Ok(())
}

// ============================================================================
// COM_STMT_SEND_LONG_DATA
// ============================================================================

#[derive(Debug)]
pub struct StmtSendLongData<'a> {
    pub statement_id: u32,
    pub param_id: u16,
    pub data: &'a [u8],
}

impl<'a> StmtSendLongData<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        let (statement_id, rest) = read_int_4(body)?;
        let (param_id, rest) = read_int_2(rest)?;
        Ok(Self {
            statement_id,
            param_id,
            data: read_string_eof(rest),
        })
    }
}

/// Write COM_STMT_SEND_LONG_DATA command
pub fn write_send_long_data(out: &mut Vec<u8>, statement_id: u32, param_id: u16, data: &[u8]) {
    write_int_1(out, CommandByte::StmtSendLongData as u8);
    write_int_4(out, statement_id);
    write_int_2(out, param_id);
    write_bytes_fix(out, data);
}

// ============================================================================
// COM_STMT_CLOSE / COM_STMT_RESET
// ============================================================================

#[derive(Debug)]
pub struct StmtClose {
    pub statement_id: u32,
}

impl StmtClose {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (statement_id, rest) = read_int_4(body)?;
        expect_end(rest)?;
        Ok(Self { statement_id })
    }
}

/// Write COM_STMT_CLOSE command
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtClose as u8);
    write_int_4(out, statement_id);
}

#[derive(Debug)]
pub struct StmtReset {
    pub statement_id: u32,
}

impl StmtReset {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (statement_id, rest) = read_int_4(body)?;
        expect_end(rest)?;
        Ok(Self { statement_id })
    }
}

/// Write COM_STMT_RESET command
pub fn write_reset_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtReset as u8);
    write_int_4(out, statement_id);
}

// ============================================================================
// COM_STMT_FETCH
// ============================================================================

#[derive(Debug)]
pub struct StmtFetch {
    pub statement_id: u32,
    pub num_rows: u32,
}

impl StmtFetch {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (statement_id, rest) = read_int_4(body)?;
        let (num_rows, rest) = read_int_4(rest)?;
        expect_end(rest)?;
        Ok(Self {
            statement_id,
            num_rows,
        })
    }
}

/// Write COM_STMT_FETCH command
pub fn write_fetch(out: &mut Vec<u8>, statement_id: u32, num_rows: u32) {
    write_int_1(out, CommandByte::StmtFetch as u8);
    write_int_4(out, statement_id);
    write_int_4(out, num_rows);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_ok_layout() {
        let mut out = Vec::new();
        write_prepare_ok(&mut out, &PrepareOk::new(18, 2, 1, 0));
        assert_eq!(out, [0x00, 18, 0, 0, 0, 2, 0, 1, 0, 0x00, 0, 0]);

        let ok = read_prepare_ok(&out).unwrap();
        assert_eq!(ok.statement_id(), 18);
        assert_eq!(ok.num_columns(), 2);
        assert_eq!(ok.num_params(), 1);
        assert_eq!(ok.warning_count(), 0);

        assert!(matches!(read_prepare_ok(&out[..6]), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_write_execute_matches_wire_vector() {
        let mut out = Vec::new();
        write_execute(
            &mut out,
            18,
            CursorType::READ_ONLY,
            &[Value::new(SqlType::Uint8, "1")],
            &[],
        )
        .unwrap();
        assert_eq!(out, [0x17, 18, 0, 0, 0, 1, 1, 0, 0, 0, 0, 1, 0x01, 0x80, 1]);
    }

    #[test]
    fn test_execute_params_with_nulls_and_long_data() {
        let params = [
            Value::NULL,
            Value::new(SqlType::Blob, ""),
            Value::varchar("abc"),
            Value::int64(-5),
        ];
        let mut out = Vec::new();
        write_execute(&mut out, 3, CursorType::empty(), &params, &[false, true, false, false])
            .unwrap();

        let execute = StmtExecute::parse(&out[1..]).unwrap();
        assert!(!execute.wants_cursor());
        let decoded = execute
            .decode_params(&[SqlType::Varbinary; 4], &[false, true, false, false])
            .unwrap();
        // the type byte of a parameter carries no binary flag
        assert_eq!(
            decoded.types,
            vec![SqlType::Null, SqlType::Text, SqlType::Varchar, SqlType::Int64]
        );
        assert_eq!(
            decoded.values,
            vec![
                Some(Value::NULL),
                None,
                Some(Value::varchar("abc")),
                Some(Value::int64(-5)),
            ]
        );
    }

    #[test]
    fn test_execute_without_new_types_uses_declared() {
        // bitmap 0, new-params-bound 0, one int32 value
        let body = [9, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 7, 0, 0, 0];
        let execute = StmtExecute::parse(&body).unwrap();
        let decoded = execute.decode_params(&[SqlType::Int32], &[]).unwrap();
        assert_eq!(decoded.values, vec![Some(Value::int32(7))]);
    }

    #[test]
    fn test_execute_truncated_params() {
        let body = [9, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0x03, 0x00, 7, 0];
        let execute = StmtExecute::parse(&body).unwrap();
        assert!(matches!(
            execute.decode_params(&[SqlType::Int32], &[]),
            Err(Error::UnexpectedEof)
        ));
    }
}
