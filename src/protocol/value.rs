/// MySQL Binary Protocol Value Codec
use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::value::{SqlType, Value};
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Decode one binary protocol value of type `ty`
///
/// Returns the value in canonical text form and the remaining bytes.
pub fn read_binary_value(ty: SqlType, data: &[u8]) -> Result<(Value, &[u8])> {
    match ty {
        SqlType::Null => Ok((Value::NULL, data)),

        SqlType::Int8 => {
            let (val, rest) = read_int_1(data)?;
            Ok((Value::new(ty, (val as i8).to_string()), rest))
        }
        SqlType::Uint8 => {
            let (val, rest) = read_int_1(data)?;
            Ok((Value::new(ty, val.to_string()), rest))
        }
        SqlType::Int16 => {
            let (val, rest) = read_int_2(data)?;
            Ok((Value::new(ty, (val as i16).to_string()), rest))
        }
        SqlType::Uint16 | SqlType::Year => {
            let (val, rest) = read_int_2(data)?;
            Ok((Value::new(ty, val.to_string()), rest))
        }
        SqlType::Int24 | SqlType::Int32 => {
            let (val, rest) = read_int_4(data)?;
            Ok((Value::new(ty, (val as i32).to_string()), rest))
        }
        SqlType::Uint24 | SqlType::Uint32 => {
            let (val, rest) = read_int_4(data)?;
            Ok((Value::new(ty, val.to_string()), rest))
        }
        SqlType::Int64 => {
            let (val, rest) = read_int_8(data)?;
            Ok((Value::new(ty, (val as i64).to_string()), rest))
        }
        SqlType::Uint64 => {
            let (val, rest) = read_int_8(data)?;
            Ok((Value::new(ty, val.to_string()), rest))
        }

        SqlType::Float32 => {
            let (val, rest) = read_int_4(data)?;
            Ok((Value::new(ty, f32::from_bits(val).to_string()), rest))
        }
        SqlType::Float64 => {
            let (val, rest) = read_int_8(data)?;
            Ok((Value::new(ty, f64::from_bits(val).to_string()), rest))
        }

        SqlType::Date | SqlType::Datetime | SqlType::Timestamp => {
            let (len, rest) = read_int_1(data)?;
            let (body, rest) = read_string_fix(rest, len as usize)?;
            let dt = DateTime::from_wire(body)?;
            let text = if ty == SqlType::Date {
                dt.format_date()
            } else {
                dt.format_datetime(len == 11)
            };
            Ok((Value::new(ty, text), rest))
        }

        SqlType::Time => {
            let (len, rest) = read_int_1(data)?;
            let (body, rest) = read_string_fix(rest, len as usize)?;
            let time = Duration::from_wire(body)?;
            Ok((Value::new(ty, time.format(len == 12)), rest))
        }

        SqlType::Decimal
        | SqlType::Text
        | SqlType::Blob
        | SqlType::Varchar
        | SqlType::Varbinary
        | SqlType::Char
        | SqlType::Binary
        | SqlType::Bit
        | SqlType::Enum
        | SqlType::Set
        | SqlType::Geometry
        | SqlType::Json => {
            let (bytes, rest) = read_string_lenenc(data)?;
            Ok((Value::new(ty, bytes), rest))
        }
    }
}

/// Encode one non-NULL value in binary protocol form
///
/// NULL values are carried by the null bitmap and write nothing here.
pub fn write_binary_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value.as_bytes() {
        Some(bytes) => write_binary_bytes(out, value.ty(), bytes),
        None => Ok(()),
    }
}

/// Encode canonical text `bytes` as a binary protocol value of type `ty`
pub fn write_binary_bytes(out: &mut Vec<u8>, ty: SqlType, bytes: &[u8]) -> Result<()> {
    match ty {
        SqlType::Null => {}
        SqlType::Int8 => write_int_1(out, parse_number::<i8>(ty, bytes)? as u8),
        SqlType::Uint8 => write_int_1(out, parse_number::<u8>(ty, bytes)?),
        SqlType::Int16 => write_int_2(out, parse_number::<i16>(ty, bytes)? as u16),
        SqlType::Uint16 | SqlType::Year => write_int_2(out, parse_number::<u16>(ty, bytes)?),
        SqlType::Int24 => {
            let val = parse_number::<i32>(ty, bytes)?;
            if !(-0x80_0000..0x80_0000).contains(&val) {
                return Err(invalid(ty, "out of range for a 24-bit integer"));
            }
            write_int_4(out, val as u32);
        }
        SqlType::Uint24 => {
            let val = parse_number::<u32>(ty, bytes)?;
            if val > 0xFF_FFFF {
                return Err(invalid(ty, "out of range for a 24-bit integer"));
            }
            write_int_4(out, val);
        }
        SqlType::Int32 => write_int_4(out, parse_number::<i32>(ty, bytes)? as u32),
        SqlType::Uint32 => write_int_4(out, parse_number::<u32>(ty, bytes)?),
        SqlType::Int64 => write_int_8(out, parse_number::<i64>(ty, bytes)? as u64),
        SqlType::Uint64 => write_int_8(out, parse_number::<u64>(ty, bytes)?),
        SqlType::Float32 => write_int_4(out, parse_number::<f32>(ty, bytes)?.to_bits()),
        SqlType::Float64 => write_int_8(out, parse_number::<f64>(ty, bytes)?.to_bits()),

        SqlType::Date | SqlType::Datetime | SqlType::Timestamp => {
            DateTime::parse(ty, bytes)?.write_wire(out);
        }
        SqlType::Time => Duration::parse(ty, bytes)?.write_wire(out),

        SqlType::Decimal
        | SqlType::Text
        | SqlType::Blob
        | SqlType::Varchar
        | SqlType::Varbinary
        | SqlType::Char
        | SqlType::Binary
        | SqlType::Bit
        | SqlType::Enum
        | SqlType::Set
        | SqlType::Geometry
        | SqlType::Json => write_bytes_lenenc(out, bytes),
    }
    Ok(())
}

/// The `(type, flags)` byte pair describing a parameter in COM_STMT_EXECUTE
pub fn param_type_bytes(ty: SqlType) -> [u8; 2] {
    let (column_type, _) = ty.to_mysql();
    let flag = if ty.is_unsigned() { 0x80 } else { 0x00 };
    [column_type as u8, flag]
}

/// Inverse of [`param_type_bytes`]
pub fn param_type_from_bytes(column_type: u8, flag: u8) -> Result<SqlType> {
    let column_type = ColumnType::from_u8(column_type).ok_or(Error::InvalidPacket)?;
    let flags = if flag & 0x80 != 0 {
        ColumnFlags::UNSIGNED_FLAG
    } else {
        ColumnFlags::empty()
    };
    Ok(SqlType::from_mysql(column_type, flags))
}

fn invalid(ty: SqlType, reason: impl Into<String>) -> Error {
    Error::InvalidValue {
        ty,
        reason: reason.into(),
    }
}

fn parse_number<T: std::str::FromStr>(ty: SqlType, bytes: &[u8]) -> Result<T> {
    let text = simdutf8::basic::from_utf8(bytes).map_err(|_| invalid(ty, "not UTF-8"))?;
    text.parse::<T>()
        .map_err(|_| invalid(ty, format!("cannot parse {text:?}")))
}

fn parse_fraction(ty: SqlType, digits: &str) -> Result<u32> {
    if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(ty, format!("bad fractional seconds {digits:?}")));
    }
    let value: u32 = parse_number(ty, digits.as_bytes())?;
    Ok(value * 10u32.pow(6 - digits.len() as u32))
}

// ============================================================================
// Temporal Types
// ============================================================================

/// TIMESTAMP - 4 bytes (DATE/DATETIME/TIMESTAMP with date only)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

/// TIMESTAMP - 7 bytes (DATE/DATETIME/TIMESTAMP without microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct Timestamp7 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// TIMESTAMP - 11 bytes (DATE/DATETIME/TIMESTAMP with microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct Timestamp11 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

/// TIME - 8 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// TIME - 12 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct Time12 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    microsecond: u32,
    /// Written with fractional seconds even when they are zero
    fraction: bool,
}

impl DateTime {
    fn from_wire(body: &[u8]) -> Result<Self> {
        match body.len() {
            0 => Ok(Self::default()),
            4 => {
                let ts = Timestamp4::read_from_bytes(body).map_err(Error::from_debug)?;
                Ok(Self {
                    year: ts.year.get(),
                    month: ts.month,
                    day: ts.day,
                    ..Self::default()
                })
            }
            7 => {
                let ts = Timestamp7::read_from_bytes(body).map_err(Error::from_debug)?;
                Ok(Self {
                    year: ts.year.get(),
                    month: ts.month,
                    day: ts.day,
                    hour: ts.hour,
                    minute: ts.minute,
                    second: ts.second,
                    ..Self::default()
                })
            }
            11 => {
                let ts = Timestamp11::read_from_bytes(body).map_err(Error::from_debug)?;
                Ok(Self {
                    year: ts.year.get(),
                    month: ts.month,
                    day: ts.day,
                    hour: ts.hour,
                    minute: ts.minute,
                    second: ts.second,
                    microsecond: ts.microsecond.get(),
                    fraction: true,
                })
            }
            _ => Err(Error::InvalidPacket),
        }
    }

    /// `YYYY-MM-DD[ HH:MM:SS[.ffffff]]`
    fn parse(ty: SqlType, bytes: &[u8]) -> Result<Self> {
        let text = simdutf8::basic::from_utf8(bytes).map_err(|_| invalid(ty, "not UTF-8"))?;
        let bad = || invalid(ty, format!("cannot parse {text:?}"));

        let (date, time) = match text.split_once(' ') {
            Some((date, time)) => (date, Some(time)),
            None => (text, None),
        };

        let mut parts = date.splitn(3, '-');
        let mut next = || parts.next().ok_or_else(bad);
        let year = parse_number::<u16>(ty, next()?.as_bytes())?;
        let month = parse_number::<u8>(ty, next()?.as_bytes())?;
        let day = parse_number::<u8>(ty, next()?.as_bytes())?;

        let mut dt = Self {
            year,
            month,
            day,
            ..Self::default()
        };

        if let Some(time) = time {
            let (hms, fraction) = match time.split_once('.') {
                Some((hms, fraction)) => (hms, Some(fraction)),
                None => (time, None),
            };
            let mut parts = hms.splitn(3, ':');
            let mut next = || parts.next().ok_or_else(bad);
            dt.hour = parse_number(ty, next()?.as_bytes())?;
            dt.minute = parse_number(ty, next()?.as_bytes())?;
            dt.second = parse_number(ty, next()?.as_bytes())?;
            if let Some(fraction) = fraction {
                dt.microsecond = parse_fraction(ty, fraction)?;
                dt.fraction = true;
            }
        }

        if dt.month > 12 || dt.day > 31 || dt.hour > 23 || dt.minute > 59 || dt.second > 59 {
            return Err(bad());
        }
        Ok(dt)
    }

    fn write_wire(&self, out: &mut Vec<u8>) {
        let has_time = self.hour != 0 || self.minute != 0 || self.second != 0;
        if self.microsecond != 0 || self.fraction {
            write_int_1(out, 11);
            out.extend_from_slice(
                Timestamp11 {
                    year: U16LE::new(self.year),
                    month: self.month,
                    day: self.day,
                    hour: self.hour,
                    minute: self.minute,
                    second: self.second,
                    microsecond: U32LE::new(self.microsecond),
                }
                .as_bytes(),
            );
        } else if has_time {
            write_int_1(out, 7);
            out.extend_from_slice(
                Timestamp7 {
                    year: U16LE::new(self.year),
                    month: self.month,
                    day: self.day,
                    hour: self.hour,
                    minute: self.minute,
                    second: self.second,
                }
                .as_bytes(),
            );
        } else if self.year != 0 || self.month != 0 || self.day != 0 {
            write_int_1(out, 4);
            out.extend_from_slice(
                Timestamp4 {
                    year: U16LE::new(self.year),
                    month: self.month,
                    day: self.day,
                }
                .as_bytes(),
            );
        } else {
            write_int_1(out, 0);
        }
    }

    fn format_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    fn format_datetime(&self, with_fraction: bool) -> String {
        let mut text = format!(
            "{} {:02}:{:02}:{:02}",
            self.format_date(),
            self.hour,
            self.minute,
            self.second
        );
        if with_fraction {
            text.push_str(&format!(".{:06}", self.microsecond));
        }
        text
    }
}

/// TIME values span beyond 24 hours and may be negative
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Duration {
    negative: bool,
    hours: u64,
    minute: u8,
    second: u8,
    microsecond: u32,
    fraction: bool,
}

impl Duration {
    fn from_wire(body: &[u8]) -> Result<Self> {
        match body.len() {
            0 => Ok(Self::default()),
            8 => {
                let t = Time8::read_from_bytes(body).map_err(Error::from_debug)?;
                Ok(Self {
                    negative: t.is_negative != 0,
                    hours: t.days.get() as u64 * 24 + t.hour as u64,
                    minute: t.minute,
                    second: t.second,
                    ..Self::default()
                })
            }
            12 => {
                let t = Time12::read_from_bytes(body).map_err(Error::from_debug)?;
                Ok(Self {
                    negative: t.is_negative != 0,
                    hours: t.days.get() as u64 * 24 + t.hour as u64,
                    minute: t.minute,
                    second: t.second,
                    microsecond: t.microsecond.get(),
                    fraction: true,
                })
            }
            _ => Err(Error::InvalidPacket),
        }
    }

    /// `[-]H+:MM:SS[.ffffff]`
    fn parse(ty: SqlType, bytes: &[u8]) -> Result<Self> {
        let text = simdutf8::basic::from_utf8(bytes).map_err(|_| invalid(ty, "not UTF-8"))?;
        let bad = || invalid(ty, format!("cannot parse {text:?}"));

        let (negative, body) = match text.strip_prefix('-') {
            Some(body) => (true, body),
            None => (false, text),
        };
        let (hms, fraction) = match body.split_once('.') {
            Some((hms, fraction)) => (hms, Some(fraction)),
            None => (body, None),
        };
        let mut parts = hms.splitn(3, ':');
        let mut next = || parts.next().ok_or_else(bad);

        let mut time = Self {
            negative,
            hours: parse_number(ty, next()?.as_bytes())?,
            minute: parse_number(ty, next()?.as_bytes())?,
            second: parse_number(ty, next()?.as_bytes())?,
            ..Self::default()
        };
        if let Some(fraction) = fraction {
            time.microsecond = parse_fraction(ty, fraction)?;
            time.fraction = true;
        }
        if time.minute > 59 || time.second > 59 || time.hours / 24 > u32::MAX as u64 {
            return Err(bad());
        }
        Ok(time)
    }

    fn write_wire(&self, out: &mut Vec<u8>) {
        let is_zero =
            !self.negative && self.hours == 0 && self.minute == 0 && self.second == 0;
        let days = U32LE::new((self.hours / 24) as u32);
        let hour = (self.hours % 24) as u8;
        let is_negative = self.negative as u8;
        if self.microsecond != 0 || self.fraction {
            write_int_1(out, 12);
            out.extend_from_slice(
                Time12 {
                    is_negative,
                    days,
                    hour,
                    minute: self.minute,
                    second: self.second,
                    microsecond: U32LE::new(self.microsecond),
                }
                .as_bytes(),
            );
        } else if !is_zero {
            write_int_1(out, 8);
            out.extend_from_slice(
                Time8 {
                    is_negative,
                    days,
                    hour,
                    minute: self.minute,
                    second: self.second,
                }
                .as_bytes(),
            );
        } else {
            write_int_1(out, 0);
        }
    }

    fn format(&self, with_fraction: bool) -> String {
        let sign = if self.negative { "-" } else { "" };
        let mut text = format!(
            "{sign}{:02}:{:02}:{:02}",
            self.hours, self.minute, self.second
        );
        if with_fraction {
            text.push_str(&format!(".{:06}", self.microsecond));
        }
        text
    }
}

// ============================================================================
// NULL Bitmap
// ============================================================================

/// NULL bitmap for binary protocol
///
/// Each bit marks a NULL column (1 = NULL). Result set rows use an offset of 2 bits,
/// prepared statement parameters an offset of 0.
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    pub const RESULT_SET_OFFSET: usize = 2;
    pub const PARAMETER_OFFSET: usize = 0;

    /// Create a NULL bitmap for result sets (offset = 2)
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self {
            bitmap,
            offset: Self::RESULT_SET_OFFSET,
        }
    }

    /// Create a NULL bitmap for parameters (offset = 0)
    pub fn for_parameters(bitmap: &'a [u8]) -> Self {
        Self {
            bitmap,
            offset: Self::PARAMETER_OFFSET,
        }
    }

    /// Number of bitmap bytes for `count` columns
    pub fn byte_len(count: usize, offset: usize) -> usize {
        (count + 7 + offset) / 8
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + self.offset;
        match self.bitmap.get(bit_pos >> 3) {
            Some(byte) => byte & (1 << (bit_pos & 7)) != 0,
            None => false,
        }
    }

    /// Append the bitmap for `values` to `out`
    pub fn write(out: &mut Vec<u8>, values: &[Value], offset: usize) {
        let start = out.len();
        out.resize(start + Self::byte_len(values.len(), offset), 0);
        for (idx, value) in values.iter().enumerate() {
            if value.is_null() {
                let bit_pos = idx + offset;
                out[start + (bit_pos >> 3)] |= 1 << (bit_pos & 7);
            }
        }
    }
}
