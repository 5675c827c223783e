use crate::col::Field;
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;
use crate::protocol::value::{NullBitmap, read_binary_value, write_binary_bytes};
use crate::value::{Row, Value};

/// Text protocol NULL marker
const NULL_MARKER: u8 = 0xFB;

/// Binary row packet header
const BINARY_ROW_HEADER: u8 = 0x00;

/// Row encoding of a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// COM_QUERY
    Text,
    /// COM_STMT_EXECUTE and COM_STMT_FETCH
    Binary,
}

impl RowFormat {
    pub fn read_row(self, payload: &[u8], fields: &[Field]) -> Result<Row> {
        match self {
            Self::Text => read_text_row(payload, fields),
            Self::Binary => read_binary_row(payload, fields),
        }
    }

    pub fn write_row(self, out: &mut Vec<u8>, row: &[Value], fields: &[Field]) -> Result<()> {
        match self {
            Self::Text => {
                write_text_row(out, row);
                Ok(())
            }
            Self::Binary => write_binary_row(out, row, fields),
        }
    }
}

fn check_width(row: &[Value], fields: &[Field]) -> Result<()> {
    if row.len() != fields.len() {
        return Err(Error::LibraryBug(eyre!(
            "row has {} values for {} fields",
            row.len(),
            fields.len()
        )));
    }
    Ok(())
}

/// Write a text protocol row: one lenenc string per value, `0xFB` for NULL
pub fn write_text_row(out: &mut Vec<u8>, row: &[Value]) {
    for value in row {
        match value.as_bytes() {
            Some(bytes) => write_bytes_lenenc(out, bytes),
            None => write_int_1(out, NULL_MARKER),
        }
    }
}

/// Read a text protocol row, typing each value after its field
pub fn read_text_row(payload: &[u8], fields: &[Field]) -> Result<Row> {
    let mut row = Vec::with_capacity(fields.len());
    let mut data = payload;
    for field in fields {
        if data.first() == Some(&NULL_MARKER) {
            row.push(Value::NULL);
            data = &data[1..];
            continue;
        }
        let (bytes, rest) = read_string_lenenc(data)?;
        row.push(Value::new(field.ty, bytes));
        data = rest;
    }
    Ok(row)
}

/// Write a binary protocol row
///
/// Values are encoded by their field's type, whatever type the value itself carries.
pub fn write_binary_row(out: &mut Vec<u8>, row: &[Value], fields: &[Field]) -> Result<()> {
    check_width(row, fields)?;
    write_int_1(out, BINARY_ROW_HEADER);
    NullBitmap::write(out, row, NullBitmap::RESULT_SET_OFFSET);
    for (value, field) in row.iter().zip(fields) {
        if let Some(bytes) = value.as_bytes() {
            write_binary_bytes(out, field.ty, bytes)?;
        }
    }
    Ok(())
}

/// Read a binary protocol row
pub fn read_binary_row(payload: &[u8], fields: &[Field]) -> Result<Row> {
    let (header, data) = read_int_1(payload)?;
    if header != BINARY_ROW_HEADER {
        return Err(Error::InvalidPacket);
    }
    let bitmap_len = NullBitmap::byte_len(fields.len(), NullBitmap::RESULT_SET_OFFSET);
    let (bitmap, mut data) = read_string_fix(data, bitmap_len)?;
    let bitmap = NullBitmap::for_result_set(bitmap);

    let mut row = Vec::with_capacity(fields.len());
    for (idx, field) in fields.iter().enumerate() {
        if bitmap.is_null(idx) {
            row.push(Value::NULL);
            continue;
        }
        let (value, rest) = read_binary_value(field.ty, data)?;
        row.push(value);
        data = rest;
    }
    Ok(row)
}
