use crate::constant::{CapabilityFlags, ServerStatusFlags, sql_state};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Raw OK payload, including the `0xFE` form used as a result set terminator
#[derive(Debug)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

/// Raw ERR payload
#[derive(Debug)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

/// OK packet response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
}

impl OkPayload {
    /// Write as an OK packet with header `0x00`
    pub fn write(&self, out: &mut Vec<u8>) {
        self.write_with_header(out, 0x00);
    }

    fn write_with_header(&self, out: &mut Vec<u8>, header: u8) {
        write_int_1(out, header);
        write_int_lenenc(out, self.affected_rows);
        write_int_lenenc(out, self.last_insert_id);
        write_int_2(out, self.status_flags.bits());
        write_int_2(out, self.warnings);
    }
}

impl TryFrom<OkPayloadBytes<'_>> for OkPayload {
    type Error = Error;

    fn try_from(bytes: OkPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::InvalidPacket);
        }

        let (affected_rows, rest) = read_int_lenenc(data)?;
        let (last_insert_id, rest) = read_int_lenenc(rest)?;
        let (status_flags, rest) = read_int_2(rest)?;
        let (warnings, _info) = read_int_2(rest)?;

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_retain(status_flags),
            warnings,
        })
    }
}

/// ERR packet response
///
/// Also the error type of [`crate::handler::Handler`]: whatever the handler returns is sent
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrPayload {
    pub fn new(error_code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }

    /// An error with the general `HY000` state
    pub fn general(error_code: u16, message: impl Into<String>) -> Self {
        Self::new(error_code, sql_state::GENERAL, message)
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        write_int_1(out, 0xFF);
        write_int_2(out, self.error_code);
        write_int_1(out, b'#');
        let mut state = [b'0'; 5];
        for (dst, src) in state.iter_mut().zip(self.sql_state.bytes()) {
            *dst = src;
        }
        write_bytes_fix(out, &state);
        write_bytes_fix(out, self.message.as_bytes());
    }
}

impl From<&Error> for ErrPayload {
    /// The ERR packet a server reports for a crate error
    fn from(err: &Error) -> Self {
        match err {
            Error::ServerError(payload) => payload.clone(),
            Error::InvalidPacket | Error::UnexpectedEof | Error::PacketOutOfOrder { .. } => {
                Self::new(err.code(), sql_state::NET_ERROR, err.to_string())
            }
            _ => Self::general(err.code(), err.to_string()),
        }
    }
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != 0xFF {
            return Err(Error::InvalidPacket);
        }

        let (error_code, data) = read_int_2(data)?;

        let (sql_state, rest) = match data.split_first() {
            Some((b'#', rest)) => {
                let (state_bytes, rest) = read_string_fix(rest, 5)?;
                (String::from_utf8_lossy(state_bytes).into_owned(), rest)
            }
            _ => (String::new(), data),
        };

        let message = String::from_utf8_lossy(read_string_eof(rest)).into_owned();

        Ok(ErrPayload {
            error_code,
            sql_state,
            message,
        })
    }
}

/// EOF packet body after the `0xFE` header
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct EofPacket {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPacket {
    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_retain(self.status_flags.get())
    }
}

/// Length of a legacy EOF payload including the header byte
pub const EOF_PACKET_LEN: usize = 5;

/// Read EOF packet (header byte 0xFE, 5 bytes)
pub fn read_eof_packet(payload: &[u8]) -> Result<EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let (body, _) = read_string_fix(data, 4)?;
    EofPacket::read_from_bytes(body).map_err(Error::from_debug)
}

/// Whether a packet inside a result set is its terminator rather than a row
///
/// A text row may also start with `0xFE` when its first value is longer than 16M, in which
/// case the payload is at least that long.
pub fn is_terminator(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < crate::constant::MAX_PAYLOAD_LENGTH
}

/// Status and warning count carried by a result set terminator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Terminator {
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
}

/// Read a terminator in either legacy EOF or OK layout
pub fn read_terminator(payload: &[u8]) -> Result<Terminator> {
    if payload.len() == EOF_PACKET_LEN {
        let eof = read_eof_packet(payload)?;
        return Ok(Terminator {
            status_flags: eof.status_flags(),
            warnings: eof.warnings.get(),
        });
    }
    let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
    Ok(Terminator {
        status_flags: ok.status_flags,
        warnings: ok.warnings,
    })
}

/// How result sets are terminated on a connection
///
/// Chosen once from `CLIENT_DEPRECATE_EOF` after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// EOF packets after the column definitions and after the rows
    Legacy,
    /// No EOF after the column definitions; rows end with an OK packet whose header is `0xFE`
    DeprecateEof,
}

impl Framing {
    pub fn from_capabilities(capabilities: CapabilityFlags) -> Self {
        if capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
            Self::DeprecateEof
        } else {
            Self::Legacy
        }
    }

    /// Whether an EOF packet follows a list of column or parameter definitions
    pub fn has_fields_eof(self) -> bool {
        self == Self::Legacy
    }

    /// Write the packet that ends a result set, a fetch, or answers SET_OPTION
    pub fn write_terminator(
        self,
        out: &mut Vec<u8>,
        status_flags: ServerStatusFlags,
        warnings: u16,
    ) {
        match self {
            Self::Legacy => {
                write_int_1(out, 0xFE);
                out.extend_from_slice(
                    EofPacket {
                        warnings: U16LE::new(warnings),
                        status_flags: U16LE::new(status_flags.bits()),
                    }
                    .as_bytes(),
                );
            }
            Self::DeprecateEof => OkPayload {
                affected_rows: 0,
                last_insert_id: 0,
                status_flags,
                warnings,
            }
            .write_with_header(out, 0xFE),
        }
    }

    /// Write the EOF that follows column definitions under legacy framing
    pub fn write_fields_eof(self, out: &mut Vec<u8>, status_flags: ServerStatusFlags) {
        if self.has_fields_eof() {
            Self::Legacy.write_terminator(out, status_flags, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_layouts() {
        let status = ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT;

        let mut legacy = Vec::new();
        Framing::Legacy.write_terminator(&mut legacy, status, 3);
        assert_eq!(legacy, [0xFE, 3, 0, 2, 0]);

        let mut ok = Vec::new();
        Framing::DeprecateEof.write_terminator(&mut ok, status, 3);
        assert_eq!(ok, [0xFE, 0, 0, 2, 0, 3, 0]);

        for payload in [&legacy, &ok] {
            assert!(is_terminator(payload));
            let t = read_terminator(payload).unwrap();
            assert_eq!(t.status_flags, status);
            assert_eq!(t.warnings, 3);
        }
    }

    #[test]
    fn test_framing_from_capabilities() {
        assert_eq!(
            Framing::from_capabilities(CapabilityFlags::CLIENT_DEPRECATE_EOF),
            Framing::DeprecateEof
        );
        assert_eq!(Framing::from_capabilities(CapabilityFlags::empty()), Framing::Legacy);
        assert!(Framing::Legacy.has_fields_eof());
        assert!(!Framing::DeprecateEof.has_fields_eof());
    }

    #[test]
    fn test_err_payload() {
        let err = ErrPayload::new(1243, "HY000", "Unknown prepared statement handler (7) given");
        let mut out = Vec::new();
        err.write(&mut out);
        assert_eq!(&out[..9], b"\xff\xdb\x04#HY000");
        assert_eq!(ErrPayload::try_from(ErrPayloadBytes(&out)).unwrap(), err);
    }

    #[test]
    fn test_ok_payload() {
        let ok = OkPayload {
            affected_rows: 300,
            last_insert_id: 7,
            status_flags: ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT,
            warnings: 1,
        };
        let mut out = Vec::new();
        ok.write(&mut out);
        assert_eq!(out, [0x00, 0xfc, 0x2c, 0x01, 7, 2, 0, 1, 0]);
        assert_eq!(OkPayload::try_from(OkPayloadBytes(&out)).unwrap(), ok);
    }

    #[test]
    fn test_truncated_terminator() {
        assert!(read_terminator(&[0xFE, 0]).is_err());
        assert!(!is_terminator(&[0x00]));
        assert!(!is_terminator(&[]));
    }
}
