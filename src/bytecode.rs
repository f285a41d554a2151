//! Bytecode stream writer and reader.
//!
//! Instructions are encoded as one opcode byte followed by zero or one
//! operand. Scalar operands are packed big-endian with fixed widths:
//! `i32` = 4 bytes, `usize` = 8 bytes (as `u64`), `f64` = 8 bytes (raw
//! IEEE-754 bit pattern). Strings are length-prefixed (`usize` length, then
//! the raw bytes).

use crate::bytes::Bytes;
use crate::errors::VMError;
use crate::isa::Instruction;

/// Growable bytecode buffer with an optional overwrite cursor.
///
/// With the cursor unset, writes append to the stream. With the cursor set,
/// writes overwrite in place; the assembler uses this to back-patch label
/// placeholders during its second pass.
#[derive(Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
    cursor: Option<usize>,
}

impl Writer {
    /// Creates an empty writer in append mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Switches to overwrite mode at `position`.
    pub fn set_cursor(&mut self, position: usize) {
        self.cursor = Some(position);
    }

    /// Switches back to append mode.
    pub fn clear_cursor(&mut self) {
        self.cursor = None;
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        match self.cursor {
            None => self.buffer.extend_from_slice(bytes),
            Some(at) => {
                let end = at + bytes.len();
                if end > self.buffer.len() {
                    self.buffer.resize(end, 0);
                }
                self.buffer[at..end].copy_from_slice(bytes);
                self.cursor = Some(end);
            }
        }
    }

    /// Writes a single opcode byte.
    pub fn write_instruction(&mut self, op: Instruction) {
        self.write_bytes(&[op as u8]);
    }

    /// Writes a 32-bit signed integer, big-endian.
    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Writes an address-sized integer as 8 bytes, big-endian.
    pub fn write_usize(&mut self, value: usize) {
        self.write_bytes(&(value as u64).to_be_bytes());
    }

    /// Writes a float as its raw bit pattern, big-endian.
    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_bits().to_be_bytes());
    }

    /// Writes a length-prefixed byte string.
    pub fn write_string(&mut self, bytes: &[u8]) {
        self.write_usize(bytes.len());
        self.write_bytes(bytes);
    }

    /// Consumes the writer, transferring the buffer to a reader.
    pub fn into_reader(self) -> Reader {
        Reader::new(Bytes::new(self.buffer))
    }
}

/// Cursored reader over an immutable bytecode buffer.
#[derive(Debug, Clone)]
pub struct Reader {
    data: Bytes,
    cursor: usize,
}

impl Reader {
    /// Creates a reader over a shared buffer, cursor at the start.
    pub fn new(data: Bytes) -> Self {
        Self { data, cursor: 0 }
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the read position. Jump instructions write this directly.
    pub fn set_cursor(&mut self, position: usize) {
        self.cursor = position;
    }

    /// Returns true if the cursor is at or past the end of the buffer.
    pub fn end_of_file(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Reads exactly `count` bytes, advancing the cursor.
    fn read_exact(&mut self, count: usize) -> Result<&[u8], VMError> {
        let start = self.cursor;
        let end = start.checked_add(count).ok_or(VMError::OutOfBounds {
            index: start,
            len: self.data.len(),
        })?;
        let slice = self.data.get(start..end).ok_or(VMError::OutOfBounds {
            index: start,
            len: self.data.len(),
        })?;
        self.cursor = end;
        Ok(slice)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, VMError> {
        Ok(self.read_exact(1)?[0])
    }

    /// Reads a 32-bit signed integer, big-endian.
    pub fn read_i32(&mut self) -> Result<i32, VMError> {
        let bytes = self.read_exact(4)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap_or([0; 4])))
    }

    /// Reads an 8-byte big-endian address-sized integer.
    pub fn read_usize(&mut self) -> Result<usize, VMError> {
        let bytes = self.read_exact(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap_or([0; 8])) as usize)
    }

    /// Reads a float from its big-endian bit pattern.
    pub fn read_f64(&mut self) -> Result<f64, VMError> {
        let bytes = self.read_exact(8)?;
        Ok(f64::from_bits(u64::from_be_bytes(
            bytes.try_into().unwrap_or([0; 8]),
        )))
    }

    /// Reads a length-prefixed byte string.
    pub fn read_string(&mut self) -> Result<Vec<u8>, VMError> {
        let len = self.read_usize()?;
        Ok(self.read_exact(len)?.to_vec())
    }
}
