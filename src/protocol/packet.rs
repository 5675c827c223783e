use std::io::{BufReader, Read, Write};

use auto_impl::auto_impl;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PAYLOAD_LENGTH;
use crate::error::{Error, Result};

/// Pending output is written to the socket once it grows past this size
const WRITE_THRESHOLD: usize = 64 * 1024;

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }
}

/// A packet-oriented byte stream
///
/// Both peers call `reset_sequence` at the start of each command; every packet after that
/// carries the next sequence id, whichever side sends it.
#[auto_impl(&mut, Box)]
pub trait Transport {
    /// Read one logical payload into `buffer`, joining 16MB continuation frames
    fn read_payload(&mut self, buffer: &mut Vec<u8>) -> Result<()>;

    /// Queue one logical payload, splitting it into frames of at most 0xFFFFFF bytes
    fn write_payload(&mut self, payload: &[u8]) -> Result<()>;

    fn reset_sequence(&mut self);

    /// Send everything queued by `write_payload`
    fn flush(&mut self) -> Result<()>;
}

/// [`Transport`] over any blocking byte stream
pub struct PacketStream<S: Read + Write> {
    stream: BufReader<S>,
    sequence_id: u8,
    /// Framed packets not yet handed to the socket
    pending: Vec<u8>,
}

impl<S: Read + Write> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            sequence_id: 0,
            pending: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    fn read_frame(&mut self, buffer: &mut Vec<u8>) -> Result<usize> {
        let mut header = PacketHeader::new_zeroed();
        self.stream.read_exact(header.as_mut_bytes())?;

        if header.sequence_id != self.sequence_id {
            return Err(Error::PacketOutOfOrder {
                expected: self.sequence_id,
                actual: header.sequence_id,
            });
        }
        self.sequence_id = self.sequence_id.wrapping_add(1);

        let length = header.length();
        let start = buffer.len();
        buffer.resize(start + length, 0);
        self.stream.read_exact(&mut buffer[start..])?;
        Ok(length)
    }

    fn push_frame(&mut self, chunk: &[u8]) {
        let header = PacketHeader::encode(chunk.len(), self.sequence_id);
        self.pending.extend_from_slice(header.as_bytes());
        self.pending.extend_from_slice(chunk);
        self.sequence_id = self.sequence_id.wrapping_add(1);
    }

    fn write_pending(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.stream.get_mut().write_all(&self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }
}

impl<S: Read + Write> Transport for PacketStream<S> {
    #[tracing::instrument(skip_all)]
    fn read_payload(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        // the peer cannot answer what it has not received
        self.flush()?;

        buffer.clear();
        let mut length = self.read_frame(buffer)?;
        while length == MAX_PAYLOAD_LENGTH {
            length = self.read_frame(buffer)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let mut last_len = 0;
        for chunk in payload.chunks(MAX_PAYLOAD_LENGTH) {
            self.push_frame(chunk);
            last_len = chunk.len();
        }
        if payload.is_empty() || last_len == MAX_PAYLOAD_LENGTH {
            self.push_frame(&[]);
        }

        if self.pending.len() >= WRITE_THRESHOLD {
            self.write_pending()?;
        }
        Ok(())
    }

    fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    fn flush(&mut self) -> Result<()> {
        self.write_pending()?;
        self.stream.get_mut().flush()?;
        Ok(())
    }
}
