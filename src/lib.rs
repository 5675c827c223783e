pub mod buffer;
pub mod buffer_pool;
pub mod col;
pub mod constant;
pub mod error;
pub mod handler;
mod opts;
pub mod protocol;
pub mod server;
pub mod statement;
pub mod sync;
pub mod value;

#[cfg(test)]
mod opts_test;

pub use buffer::BufferSet;
pub use buffer_pool::BufferPool;
pub use col::Field;
pub use error::{Error, Result};
pub use handler::{Handler, Outcome, PrepareInfo, Query, SessionInfo};
pub use opts::Opts;
pub use protocol::{Framing, PacketStream, Transport};
pub use server::Session;
pub use sync::{Conn, QueryResult, ResultStream};
pub use value::{Row, SqlType, Value};
