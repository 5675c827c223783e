/// A set of reusable buffers for one connection
///
/// `Session` and `Conn` each hold one `BufferSet` for all their operations.
#[derive(Debug, Default)]
pub struct BufferSet {
    /// The payload of the last packet read
    /// Bytes are valid until the next read.
    pub read_buffer: Vec<u8>,

    /// The payload being assembled for the next write
    write_buffer: Vec<u8>,
}

impl BufferSet {
    /// Create a new empty buffer set
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the write buffer and return mutable access.
    #[inline]
    pub fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        &mut self.write_buffer
    }

    /// Get mutable access to the write buffer.
    #[inline]
    pub fn write_buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.write_buffer
    }

    /// Get the write buffer for reading.
    #[inline]
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Drop contents but keep capacity
    pub fn clear(&mut self) {
        self.read_buffer.clear();
        self.write_buffer.clear();
    }
}
