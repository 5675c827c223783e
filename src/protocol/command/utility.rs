use crate::constant::CommandByte;
use crate::error::Result;
use crate::protocol::command::expect_end;
use crate::protocol::primitive::*;

/// COM_INIT_DB request
#[derive(Debug)]
pub struct InitDb<'a> {
    pub schema: &'a str,
}

impl<'a> InitDb<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        Ok(Self {
            schema: read_utf8(read_string_eof(body))?,
        })
    }
}

/// COM_SET_OPTION request
///
/// The raw option is kept so that unsupported values can be answered with an error.
#[derive(Debug)]
pub struct SetOptionRequest {
    pub option: u16,
}

impl SetOptionRequest {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (option, rest) = read_int_2(body)?;
        expect_end(rest)?;
        Ok(Self { option })
    }
}

/// Write COM_QUIT command
pub fn write_quit(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::Quit as u8);
}

/// Write COM_PING command
pub fn write_ping(out: &mut Vec<u8>) {
    write_int_1(out, CommandByte::Ping as u8);
}

/// Write COM_INIT_DB command
pub fn write_init_db(out: &mut Vec<u8>, database: &str) {
    write_int_1(out, CommandByte::InitDb as u8);
    out.extend_from_slice(database.as_bytes());
}

/// Write COM_SET_OPTION command
pub fn write_set_option(out: &mut Vec<u8>, option: u16) {
    write_int_1(out, CommandByte::SetOption as u8);
    write_int_2(out, option);
}
