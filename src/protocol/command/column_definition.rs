use crate::col::Field;
use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::value::SqlType;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Length of the fixed tail, written as a lenenc integer before it
const TAIL_LENGTH: u64 = 0x0c;

/// Represents a payload part of a column definition packet
#[derive(Debug, Clone, Copy)]
pub struct ColumnDefinitionBytes<'a>(pub &'a [u8]);

/// Fixed-size tail of Column Definition packet (12 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

impl ColumnDefinitionTail {
    pub fn new(
        charset: u16,
        column_length: u32,
        column_type: ColumnType,
        flags: ColumnFlags,
        decimals: u8,
    ) -> Self {
        Self {
            charset: U16LE::new(charset),
            column_length: U32LE::new(column_length),
            column_type: column_type as u8,
            flags: U16LE::new(flags.bits()),
            decimals,
            reserved: U16LE::new(0),
        }
    }

    pub fn charset(&self) -> u16 {
        self.charset.get()
    }

    pub fn column_length(&self) -> u32 {
        self.column_length.get()
    }

    pub fn column_type(&self) -> Result<ColumnType> {
        ColumnType::from_u8(self.column_type).ok_or(Error::InvalidPacket)
    }

    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_retain(self.flags.get())
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

/// Write a column definition (Protocol::ColumnDefinition41)
///
/// A field without flags is sent with the flags its type implies, so the peer can tell
/// signed from unsigned and text from binary.
pub fn write_column_definition(out: &mut Vec<u8>, field: &Field) {
    let (column_type, type_flags) = field.ty.to_mysql();
    let flags = if field.flags.is_empty() {
        type_flags
    } else {
        field.flags
    };

    write_string_lenenc(out, "def");
    write_string_lenenc(out, &field.database);
    write_string_lenenc(out, &field.table);
    write_string_lenenc(out, &field.org_table);
    write_string_lenenc(out, &field.name);
    write_string_lenenc(out, &field.org_name);
    write_int_lenenc(out, TAIL_LENGTH);
    out.extend_from_slice(
        ColumnDefinitionTail::new(
            field.charset,
            field.column_length,
            column_type,
            flags,
            field.decimals,
        )
        .as_bytes(),
    );
}

impl TryFrom<ColumnDefinitionBytes<'_>> for Field {
    type Error = Error;

    /// Flags are kept only for fields that carry extended metadata (a length or a charset).
    /// Otherwise they were implied by the type and are dropped.
    fn try_from(bytes: ColumnDefinitionBytes<'_>) -> Result<Self> {
        let data = bytes.0;

        let (_catalog, data) = read_string_lenenc(data)?;
        let (database, data) = read_string_lenenc(data)?;
        let (table, data) = read_string_lenenc(data)?;
        let (org_table, data) = read_string_lenenc(data)?;
        let (name, data) = read_string_lenenc(data)?;
        let (org_name, data) = read_string_lenenc(data)?;

        let (_length, data) = read_int_lenenc(data)?;
        let (tail, _) = read_string_fix(data, size_of::<ColumnDefinitionTail>())?;
        let tail = ColumnDefinitionTail::read_from_bytes(tail).map_err(Error::from_debug)?;

        let wire_flags = tail.flags();
        let ty = SqlType::from_mysql(tail.column_type()?, wire_flags);
        let flags = if tail.column_length() != 0 || tail.charset() != 0 {
            wire_flags
        } else {
            ColumnFlags::empty()
        };

        let text = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
        Ok(Field {
            name: text(name),
            table: text(table),
            org_table: text(org_table),
            database: text(database),
            org_name: text(org_name),
            ty,
            column_length: tail.column_length(),
            charset: tail.charset(),
            decimals: tail.decimals(),
            flags,
        })
    }
}
