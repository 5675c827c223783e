use std::fmt;

use crate::constant::{ColumnFlags, ColumnType};

/// Logical column type of a value or field
///
/// MySQL encodes signedness, binary-ness and enum/set membership in the column flags
/// rather than in the type byte. `SqlType` folds those into one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SqlType {
    #[default]
    Null,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int24,
    Uint24,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Timestamp,
    Date,
    Time,
    Datetime,
    Year,
    Decimal,
    Text,
    Blob,
    Varchar,
    Varbinary,
    Char,
    Binary,
    Bit,
    Enum,
    Set,
    Geometry,
    Json,
}

impl SqlType {
    pub const ALL: [SqlType; 29] = [
        SqlType::Int8,
        SqlType::Uint8,
        SqlType::Int16,
        SqlType::Uint16,
        SqlType::Int24,
        SqlType::Uint24,
        SqlType::Int32,
        SqlType::Uint32,
        SqlType::Int64,
        SqlType::Uint64,
        SqlType::Float32,
        SqlType::Float64,
        SqlType::Timestamp,
        SqlType::Date,
        SqlType::Time,
        SqlType::Datetime,
        SqlType::Year,
        SqlType::Decimal,
        SqlType::Text,
        SqlType::Blob,
        SqlType::Varchar,
        SqlType::Varbinary,
        SqlType::Char,
        SqlType::Binary,
        SqlType::Bit,
        SqlType::Enum,
        SqlType::Set,
        SqlType::Geometry,
        SqlType::Json,
    ];

    /// The wire type byte and the flags that identify this type
    pub fn to_mysql(self) -> (ColumnType, ColumnFlags) {
        let num = ColumnFlags::NUM_FLAG;
        let unsigned = ColumnFlags::UNSIGNED_FLAG | ColumnFlags::NUM_FLAG;
        let binary = ColumnFlags::BINARY_FLAG;
        match self {
            SqlType::Null => (ColumnType::MYSQL_TYPE_NULL, binary),
            SqlType::Int8 => (ColumnType::MYSQL_TYPE_TINY, num),
            SqlType::Uint8 => (ColumnType::MYSQL_TYPE_TINY, unsigned),
            SqlType::Int16 => (ColumnType::MYSQL_TYPE_SHORT, num),
            SqlType::Uint16 => (ColumnType::MYSQL_TYPE_SHORT, unsigned),
            SqlType::Int24 => (ColumnType::MYSQL_TYPE_INT24, num),
            SqlType::Uint24 => (ColumnType::MYSQL_TYPE_INT24, unsigned),
            SqlType::Int32 => (ColumnType::MYSQL_TYPE_LONG, num),
            SqlType::Uint32 => (ColumnType::MYSQL_TYPE_LONG, unsigned),
            SqlType::Int64 => (ColumnType::MYSQL_TYPE_LONGLONG, num),
            SqlType::Uint64 => (ColumnType::MYSQL_TYPE_LONGLONG, unsigned),
            SqlType::Float32 => (ColumnType::MYSQL_TYPE_FLOAT, num),
            SqlType::Float64 => (ColumnType::MYSQL_TYPE_DOUBLE, num),
            SqlType::Timestamp => (ColumnType::MYSQL_TYPE_TIMESTAMP, ColumnFlags::empty()),
            SqlType::Date => (ColumnType::MYSQL_TYPE_DATE, binary),
            SqlType::Time => (ColumnType::MYSQL_TYPE_TIME, binary),
            SqlType::Datetime => (ColumnType::MYSQL_TYPE_DATETIME, binary),
            SqlType::Year => (ColumnType::MYSQL_TYPE_YEAR, unsigned),
            SqlType::Decimal => (ColumnType::MYSQL_TYPE_NEWDECIMAL, num),
            SqlType::Text => (ColumnType::MYSQL_TYPE_BLOB, ColumnFlags::empty()),
            SqlType::Blob => (ColumnType::MYSQL_TYPE_BLOB, binary),
            SqlType::Varchar => (ColumnType::MYSQL_TYPE_VAR_STRING, ColumnFlags::empty()),
            SqlType::Varbinary => (ColumnType::MYSQL_TYPE_VAR_STRING, binary),
            SqlType::Char => (ColumnType::MYSQL_TYPE_STRING, ColumnFlags::empty()),
            SqlType::Binary => (ColumnType::MYSQL_TYPE_STRING, binary),
            SqlType::Bit => (ColumnType::MYSQL_TYPE_BIT, ColumnFlags::UNSIGNED_FLAG),
            SqlType::Enum => (ColumnType::MYSQL_TYPE_STRING, ColumnFlags::ENUM_FLAG),
            SqlType::Set => (ColumnType::MYSQL_TYPE_STRING, ColumnFlags::SET_FLAG),
            SqlType::Geometry => (ColumnType::MYSQL_TYPE_GEOMETRY, ColumnFlags::empty()),
            SqlType::Json => (ColumnType::MYSQL_TYPE_JSON, ColumnFlags::empty()),
        }
    }

    /// Recover the logical type from a wire type byte and its flags
    pub fn from_mysql(column_type: ColumnType, flags: ColumnFlags) -> Self {
        let unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);
        let binary = flags.contains(ColumnFlags::BINARY_FLAG);
        let pick = |signed: SqlType, other: SqlType| if unsigned { other } else { signed };
        let text_or_binary = |text: SqlType, bin: SqlType| if binary { bin } else { text };

        match column_type {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => SqlType::Decimal,
            ColumnType::MYSQL_TYPE_TINY => pick(SqlType::Int8, SqlType::Uint8),
            ColumnType::MYSQL_TYPE_SHORT => pick(SqlType::Int16, SqlType::Uint16),
            ColumnType::MYSQL_TYPE_INT24 => pick(SqlType::Int24, SqlType::Uint24),
            ColumnType::MYSQL_TYPE_LONG => pick(SqlType::Int32, SqlType::Uint32),
            ColumnType::MYSQL_TYPE_LONGLONG => pick(SqlType::Int64, SqlType::Uint64),
            ColumnType::MYSQL_TYPE_FLOAT => SqlType::Float32,
            ColumnType::MYSQL_TYPE_DOUBLE => SqlType::Float64,
            ColumnType::MYSQL_TYPE_NULL => SqlType::Null,
            ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
                SqlType::Timestamp
            }
            ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => SqlType::Date,
            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => SqlType::Time,
            ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => {
                SqlType::Datetime
            }
            ColumnType::MYSQL_TYPE_YEAR => SqlType::Year,
            ColumnType::MYSQL_TYPE_BIT => SqlType::Bit,
            ColumnType::MYSQL_TYPE_JSON => SqlType::Json,
            ColumnType::MYSQL_TYPE_ENUM => SqlType::Enum,
            ColumnType::MYSQL_TYPE_SET => SqlType::Set,
            ColumnType::MYSQL_TYPE_GEOMETRY => SqlType::Geometry,
            ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_TYPED_ARRAY => {
                text_or_binary(SqlType::Varchar, SqlType::Varbinary)
            }
            ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB => text_or_binary(SqlType::Text, SqlType::Blob),
            ColumnType::MYSQL_TYPE_STRING => {
                if flags.contains(ColumnFlags::ENUM_FLAG) {
                    SqlType::Enum
                } else if flags.contains(ColumnFlags::SET_FLAG) {
                    SqlType::Set
                } else {
                    text_or_binary(SqlType::Char, SqlType::Binary)
                }
            }
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            SqlType::Int8 | SqlType::Int16 | SqlType::Int24 | SqlType::Int32 | SqlType::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            SqlType::Uint8
                | SqlType::Uint16
                | SqlType::Uint24
                | SqlType::Uint32
                | SqlType::Uint64
                | SqlType::Year
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, SqlType::Float32 | SqlType::Float64)
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            SqlType::Timestamp | SqlType::Date | SqlType::Time | SqlType::Datetime
        )
    }
}

/// A typed SQL value
///
/// The payload is kept in its textual form (`b"42"` for an `Int32`), the same form the text
/// protocol carries on the wire. `NULL` is a distinct state, not an empty byte string.
///
/// Temporal values read back from the binary protocol are canonical: a `Datetime` or
/// `Timestamp` always includes its time of day, and fractional seconds have six digits.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Value {
    ty: SqlType,
    data: Option<Vec<u8>>,
}

impl Value {
    pub const NULL: Value = Value {
        ty: SqlType::Null,
        data: None,
    };

    /// Build a value from bytes already in canonical form for `ty`
    pub fn new(ty: SqlType, data: impl Into<Vec<u8>>) -> Self {
        if ty == SqlType::Null {
            return Self::NULL;
        }
        Self {
            ty,
            data: Some(data.into()),
        }
    }

    pub fn int64(v: i64) -> Self {
        Self::new(SqlType::Int64, v.to_string())
    }

    pub fn uint64(v: u64) -> Self {
        Self::new(SqlType::Uint64, v.to_string())
    }

    pub fn int32(v: i32) -> Self {
        Self::new(SqlType::Int32, v.to_string())
    }

    pub fn float64(v: f64) -> Self {
        Self::new(SqlType::Float64, v.to_string())
    }

    pub fn varchar(s: &str) -> Self {
        Self::new(SqlType::Varchar, s.as_bytes())
    }

    pub fn varbinary(b: &[u8]) -> Self {
        Self::new(SqlType::Varbinary, b)
    }

    pub fn ty(&self) -> SqlType {
        self.ty
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Raw bytes, `None` for NULL
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// The payload as UTF-8, `None` for NULL or invalid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes()
            .and_then(|b| simdutf8::basic::from_utf8(b).ok())
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.data
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            None => f.write_str("NULL"),
            Some(bytes) => write!(f, "{:?}({:?})", self.ty, String::from_utf8_lossy(bytes)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            None => f.write_str("NULL"),
            Some(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// An ordered sequence of values, one per field
pub type Row = Vec<Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_type_survives_mysql_mapping() {
        for ty in SqlType::ALL {
            let (column_type, flags) = ty.to_mysql();
            assert_eq!(SqlType::from_mysql(column_type, flags), ty, "{ty:?}");
        }
    }

    #[test]
    fn null_is_not_empty() {
        let empty = Value::new(SqlType::Varchar, "");
        assert!(!empty.is_null());
        assert_eq!(empty.as_bytes(), Some(&b""[..]));
        assert!(Value::NULL.is_null());
        assert_ne!(empty, Value::NULL);
    }

    #[test]
    fn null_type_forces_null() {
        assert_eq!(Value::new(SqlType::Null, "x"), Value::NULL);
    }
}
