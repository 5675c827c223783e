use crate::constant::CommandByte;
use crate::error::Result;
use crate::protocol::primitive::*;

/// COM_QUERY request
#[derive(Debug)]
pub struct ComQuery<'a> {
    pub sql: &'a str,
}

impl<'a> ComQuery<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        Ok(Self {
            sql: read_utf8(read_string_eof(body))?,
        })
    }
}

/// Write COM_QUERY command
pub fn write_query(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::Query as u8);
    out.extend_from_slice(sql.as_bytes());
}
