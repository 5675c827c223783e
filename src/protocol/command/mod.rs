pub mod column_definition;
pub mod prepared;
pub mod query;
pub mod resultset;
pub mod utility;


pub use column_definition::{ColumnDefinitionBytes, ColumnDefinitionTail, write_column_definition};
pub use prepared::{StmtClose, StmtExecute, StmtFetch, StmtPrepare, StmtReset, StmtSendLongData};
pub use query::ComQuery;
pub use resultset::{ResultSet, ResultSetEvent};
pub use utility::{InitDb, SetOptionRequest};

use crate::constant::CommandByte;
use crate::error::{Error, Result};
use crate::protocol::primitive::read_int_1;

/// One client request, decoded from a command payload
#[derive(Debug)]
pub enum Command<'a> {
    Quit,
    Ping,
    InitDb(InitDb<'a>),
    Query(ComQuery<'a>),
    SetOption(SetOptionRequest),
    Prepare(StmtPrepare<'a>),
    Execute(StmtExecute<'a>),
    SendLongData(StmtSendLongData<'a>),
    Close(StmtClose),
    Reset(StmtReset),
    Fetch(StmtFetch),
    /// A command byte this crate does not handle
    Unknown(u8),
}

impl<'a> Command<'a> {
    /// Decode a command payload
    ///
    /// Fails with `UnexpectedEof` or `InvalidPacket` when the body does not match the command.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (byte, body) = read_int_1(payload)?;
        let Some(command) = CommandByte::from_u8(byte) else {
            return Ok(Self::Unknown(byte));
        };

        Ok(match command {
            CommandByte::Quit => Self::Quit,
            CommandByte::Ping => Self::Ping,
            CommandByte::InitDb => Self::InitDb(InitDb::parse(body)?),
            CommandByte::Query => Self::Query(ComQuery::parse(body)?),
            CommandByte::SetOption => Self::SetOption(SetOptionRequest::parse(body)?),
            CommandByte::StmtPrepare => Self::Prepare(StmtPrepare::parse(body)?),
            CommandByte::StmtExecute => Self::Execute(StmtExecute::parse(body)?),
            CommandByte::StmtSendLongData => Self::SendLongData(StmtSendLongData::parse(body)?),
            CommandByte::StmtClose => Self::Close(StmtClose::parse(body)?),
            CommandByte::StmtReset => Self::Reset(StmtReset::parse(body)?),
            CommandByte::StmtFetch => Self::Fetch(StmtFetch::parse(body)?),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Quit => "COM_QUIT",
            Self::Ping => "COM_PING",
            Self::InitDb(_) => "COM_INIT_DB",
            Self::Query(_) => "COM_QUERY",
            Self::SetOption(_) => "COM_SET_OPTION",
            Self::Prepare(_) => "COM_STMT_PREPARE",
            Self::Execute(_) => "COM_STMT_EXECUTE",
            Self::SendLongData(_) => "COM_STMT_SEND_LONG_DATA",
            Self::Close(_) => "COM_STMT_CLOSE",
            Self::Reset(_) => "COM_STMT_RESET",
            Self::Fetch(_) => "COM_STMT_FETCH",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Reject trailing bytes after a fixed-size command body
pub(crate) fn expect_end(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidPacket)
    }
}
