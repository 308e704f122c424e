//! Purpose: Decode (and, host side, encode) the typed argument records handed to a module.
//! Exports: `ArgType`, `Parser`, `ArgPacker`, `empty_sentinel`, `is_sentinel`.
//! Role: Module-facing data API; every extraction degrades to a default instead of failing.
//! Invariants: Records are `{type:u32 LE, length:u32 LE, payload}` with no padding.
//! Invariants: The parser borrows its input; extracted binaries are slices of that input.
//! Invariants: `remaining` never increases and every read is bounds-checked against the input.
//! Notes: A declared-length mismatch on INT records (and an oversize BINARY length) leaves
//! the cursor stepped forward while `remaining` is unchanged; callers observe that as-is.
use crate::core::diag::{self, diag};
use crate::core::error::{Error, ErrorKind};

const WORD: usize = 4;
const HEADER_LEN: usize = 2 * WORD;
const INT32_RECORD_LEN: usize = HEADER_LEN + 4;
const INT16_RECORD_LEN: usize = HEADER_LEN + 2;

// Two bytes so callers treating the result as a wide string still see a terminator.
static EMPTY: [u8; 2] = [0, 0];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ArgType {
    Binary = 0,
    Int32 = 1,
    Int16 = 2,
    Str = 3,
    WideStr = 4,
}

impl ArgType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ArgType::Binary),
            1 => Some(ArgType::Int32),
            2 => Some(ArgType::Int16),
            3 => Some(ArgType::Str),
            4 => Some(ArgType::WideStr),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// The shared value returned by failed binary extractions: a single NUL byte
/// backed by two zero bytes.
pub fn empty_sentinel() -> &'static [u8] {
    &EMPTY[..1]
}

pub fn is_sentinel(bytes: &[u8]) -> bool {
    std::ptr::eq(bytes.as_ptr(), EMPTY.as_ptr()) && bytes.len() == 1
}

/// Read cursor over a caller-owned argument buffer.
#[derive(Clone, Debug)]
pub struct Parser<'a> {
    original: &'a [u8],
    cursor: usize,
    remaining: usize,
}

impl<'a> Parser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        diag!(size = buffer.len(), "initialising data parser");
        diag::hexdump("arguments", buffer);
        Self {
            original: buffer,
            cursor: 0,
            remaining: buffer.len(),
        }
    }

    /// Rebuilds a view from saved cursor state, clamped to the input.
    pub(crate) fn resume(buffer: &'a [u8], cursor: usize, remaining: usize) -> Self {
        Self {
            original: buffer,
            cursor: cursor.min(buffer.len()),
            remaining: remaining.min(buffer.len()),
        }
    }

    /// Bytes not yet consumed.
    pub fn length(&self) -> usize {
        self.remaining
    }

    pub fn size(&self) -> usize {
        self.original.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn consumed(&self) -> usize {
        self.original.len() - self.remaining
    }

    pub fn original(&self) -> &'a [u8] {
        self.original
    }

    pub fn extract_binary(&mut self) -> &'a [u8] {
        diag!(
            read = self.consumed(),
            size = self.size(),
            "extracting binary argument"
        );
        if self.remaining <= HEADER_LEN {
            diag!(remaining = self.remaining, "binary extract: input too short");
            return empty_sentinel();
        }
        let Some(tag) = self.read_u32(self.cursor) else {
            diag!(cursor = self.cursor, "binary extract: read past end of input");
            return empty_sentinel();
        };
        if tag != ArgType::Binary.as_u32() {
            diag!(tag, "binary extract: wrong argument type");
            return empty_sentinel();
        }

        self.cursor = self.cursor.saturating_add(WORD);
        let Some(declared) = self.read_u32(self.cursor) else {
            diag!(cursor = self.cursor, "binary extract: read past end of input");
            return empty_sentinel();
        };
        let len = declared as usize;
        if self.remaining - HEADER_LEN < len {
            diag!(len, remaining = self.remaining, "binary extract: declared length overruns input");
            return empty_sentinel();
        }

        let start = self.cursor + WORD;
        let Some(payload) = start
            .checked_add(len)
            .and_then(|end| self.original.get(start..end))
        else {
            diag!(cursor = self.cursor, "binary extract: read past end of input");
            return empty_sentinel();
        };
        diag::hexdump("binary argument", payload);

        self.cursor = start + len;
        self.remaining -= HEADER_LEN + len;
        self.check_invariants();
        payload
    }

    pub fn extract_int32(&mut self) -> i32 {
        diag!(
            read = self.consumed(),
            size = self.size(),
            "extracting 4-byte integer"
        );
        match self.extract_fixed::<4>(ArgType::Int32, INT32_RECORD_LEN) {
            Some(bytes) => {
                let value = i32::from_le_bytes(bytes);
                diag!(value, "returning 4-byte integer");
                value
            }
            None => 0,
        }
    }

    pub fn extract_int16(&mut self) -> i16 {
        diag!(
            read = self.consumed(),
            size = self.size(),
            "extracting 2-byte integer"
        );
        match self.extract_fixed::<2>(ArgType::Int16, INT16_RECORD_LEN) {
            Some(bytes) => {
                let value = i16::from_le_bytes(bytes);
                diag!(value, "returning 2-byte integer");
                value
            }
            None => 0,
        }
    }

    fn extract_fixed<const N: usize>(&mut self, expected: ArgType, record_len: usize) -> Option<[u8; N]> {
        if self.remaining < record_len {
            diag!(
                remaining = self.remaining,
                needed = record_len,
                "integer extract: not enough input left"
            );
            return None;
        }
        let tag = self.read_u32(self.cursor)?;
        if tag != expected.as_u32() {
            diag!(tag, expected = expected.as_u32(), "integer extract: wrong argument type");
            return None;
        }

        self.cursor = self.cursor.saturating_add(WORD);
        let declared = self.read_u32(self.cursor)?;
        self.cursor = self.cursor.saturating_add(WORD);
        if declared as usize != N {
            // Cursor stays past the header; remaining is left as it was.
            diag!(declared, expected = N, "integer extract: declared length mismatch");
            return None;
        }

        let bytes = self.read_array::<N>(self.cursor)?;
        self.cursor += N;
        self.remaining -= record_len;
        self.check_invariants();
        Some(bytes)
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        self.read_array::<4>(offset).map(u32::from_le_bytes)
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        let slice = self.original.get(offset..end)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Some(out)
    }

    fn check_invariants(&self) {
        debug_assert!(self.remaining <= self.original.len(), "parser remaining exceeds size");
        debug_assert!(self.cursor <= self.original.len(), "parser cursor past end");
    }
}

/// Host-side encoder for argument buffers.
#[derive(Clone, Debug, Default)]
pub struct ArgPacker {
    buf: Vec<u8>,
}

impl ArgPacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary(mut self, payload: &[u8]) -> Result<Self, Error> {
        self.push_record(ArgType::Binary, payload)?;
        Ok(self)
    }

    pub fn int32(mut self, value: i32) -> Self {
        write_u32(&mut self.buf, ArgType::Int32.as_u32());
        write_u32(&mut self.buf, 4);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn int16(mut self, value: i16) -> Self {
        write_u32(&mut self.buf, ArgType::Int16.as_u32());
        write_u32(&mut self.buf, 2);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// NUL-terminated UTF-8, carried as a binary record.
    pub fn string(mut self, value: &str) -> Result<Self, Error> {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.push_record(ArgType::Binary, &payload)?;
        Ok(self)
    }

    /// NUL-terminated UTF-16LE, carried as a binary record.
    pub fn wide_string(mut self, value: &str) -> Result<Self, Error> {
        let payload: Vec<u8> = value
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(u16::to_le_bytes)
            .collect();
        self.push_record(ArgType::Binary, &payload)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn push_record(&mut self, tag: ArgType, payload: &[u8]) -> Result<(), Error> {
        let len = u32::try_from(payload.len()).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("argument payload exceeds u32 length")
                .with_source(err)
        })?;
        write_u32(&mut self.buf, tag.as_u32());
        write_u32(&mut self.buf, len);
        self.buf.extend_from_slice(payload);
        Ok(())
    }
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}
