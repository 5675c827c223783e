use thiserror::Error;

pub use color_eyre::eyre::eyre;

use crate::constant::error_code;
use crate::protocol::response::{ErrPayload, ErrPayloadBytes};
use crate::value::SqlType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Bad input error: {0}")]
    BadInputError(String),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    #[error("Packet out of order: expected sequence {expected}, got {actual}")]
    PacketOutOfOrder { expected: u8, actual: u8 },

    #[error("Unknown prepared statement handler ({0}) given")]
    UnknownStatement(u32),

    #[error("The statement ({0}) has no open cursor")]
    NoOpenCursor(u32),

    #[error("Row count exceeded {max_rows}")]
    RowLimitExceeded { max_rows: usize },

    #[error("Invalid {ty:?} value: {reason}")]
    InvalidValue { ty: SqlType, reason: String },

    #[error("Unexpected multi-statement result")]
    UnexpectedMultiResult,

    #[error("A bug in zero-mysql-wire: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::LibraryBug(eyre!("{:?}", err))
    }

    /// The MySQL error number this error is reported as
    pub fn code(&self) -> u16 {
        match self {
            Error::ServerError(err) => err.error_code,
            Error::UnknownStatement(_) => error_code::ER_UNKNOWN_STMT_HANDLER,
            Error::NoOpenCursor(_) => error_code::ER_STMT_HAS_NO_OPEN_CURSOR,
            Error::RowLimitExceeded { .. } => error_code::ER_VITESS_MAX_ROWS_EXCEEDED,
            Error::InvalidPacket | Error::UnexpectedEof | Error::PacketOutOfOrder { .. } => {
                error_code::ER_MALFORMED_PACKET
            }
            _ => error_code::ER_UNKNOWN_ERROR,
        }
    }

    /// Whether the byte stream can no longer be trusted after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IoError(_) | Error::PacketOutOfOrder { .. } | Error::LibraryBug(_)
        )
    }
}

impl<'a> From<ErrPayloadBytes<'a>> for Error {
    fn from(value: ErrPayloadBytes) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::ServerError(err_payload),
            Err(err) => err,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
