use crate::constant::ColumnFlags;
use crate::value::SqlType;

/// Column metadata of a result set or a prepared statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub table: String,
    pub org_table: String,
    pub database: String,
    pub org_name: String,
    pub ty: SqlType,
    pub column_length: u32,
    pub charset: u16,
    pub decimals: u8,
    pub flags: ColumnFlags,
}

impl Field {
    /// A field with a name and a type and nothing else
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            ..Self::default()
        }
    }

    /// The same field without names, as sent when the client did not ask for field metadata
    pub fn type_only(&self) -> Self {
        Self {
            ty: self.ty,
            ..Self::default()
        }
    }
}
