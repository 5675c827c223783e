use std::sync::Arc;

use smart_default::SmartDefault;

use crate::buffer_pool::{BufferPool, GLOBAL_BUFFER_POOL};
use crate::constant::{CAPABILITIES_DEFAULT, CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result};

/// Per-connection settings shared by `Session` and `Conn`
///
/// ```rs
/// let opts = Opts::default().legacy_eof();
/// let session = Session::new(stream, &opts)?;
/// ```
#[derive(Debug, Clone, SmartDefault)]
pub struct Opts {
    /// Capabilities agreed during the handshake. `CLIENT_DEPRECATE_EOF` picks the framing
    /// and `CLIENT_MULTI_STATEMENTS` may later be toggled by COM_SET_OPTION.
    #[default(CAPABILITIES_DEFAULT)]
    pub capabilities: CapabilityFlags,

    /// Status flags the server reports when no per-response flag applies
    #[default(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)]
    pub status_flags: ServerStatusFlags,

    /// Rows per batch when a handler serves a materialized result through `Rows::batched`
    #[default = 256]
    pub fetch_batch_size: usize,

    /// Row limit of the client's `execute_fetch` family when no explicit limit is given
    #[default = 10_000]
    pub max_rows: usize,

    #[default(Arc::clone(&GLOBAL_BUFFER_POOL))]
    pub buffer_pool: Arc<BufferPool>,
}

impl Opts {
    pub fn with_capabilities(mut self, capabilities: CapabilityFlags) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Turn off `CLIENT_DEPRECATE_EOF` so result sets use EOF packets
    pub fn legacy_eof(mut self) -> Self {
        self.capabilities.remove(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        self
    }

    /// Reject settings this crate cannot speak
    ///
    /// Packets are always laid out for the 4.1 protocol.
    pub fn validate(&self) -> Result<()> {
        if !self.capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
            return Err(Error::BadConfigError(
                "CLIENT_PROTOCOL_41 is required".to_string(),
            ));
        }
        if self.fetch_batch_size == 0 {
            return Err(Error::BadConfigError(
                "fetch_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
