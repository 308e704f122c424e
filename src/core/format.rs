// Format builder: a growable text buffer modules use to assemble output before emitting it.
// Growth is keyed on `length` rather than free space, and every write lands at the cursor,
// which no write advances. Both behaviours are observable by modules and kept as-is.
use std::fmt::{self, Write as _};

use crate::core::diag::diag;
use crate::core::error::{Error, ErrorKind};
use crate::core::output::{SliceWriter, formatted_len};

pub const FORMAT_SLACK: usize = 1024;

#[derive(Debug)]
pub struct FormatBuilder {
    storage: Vec<u8>,
    cursor: usize,
    length: usize,
}

impl FormatBuilder {
    pub fn allocate(max_size: usize) -> Result<Self, Error> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(max_size).map_err(|err| {
            Error::new(ErrorKind::Alloc)
                .with_message("unable to allocate format buffer")
                .with_source(err)
        })?;
        storage.resize(max_size, 0);
        Ok(Self {
            storage,
            cursor: 0,
            length: 0,
        })
    }

    pub fn reset(&mut self) {
        self.length = 0;
        self.cursor = 0;
    }

    pub fn free(self) {}

    pub fn size(&self) -> usize {
        self.storage.len()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn storage(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn storage_mut_ptr(&mut self) -> *mut u8 {
        self.storage.as_mut_ptr()
    }

    /// Copies `text` at the cursor and terminates it with a NUL.
    pub fn append(&mut self, text: &[u8]) -> Result<(), Error> {
        if text.len() >= self.length {
            let shortfall = text.len() - self.length;
            let increment = if shortfall < FORMAT_SLACK {
                FORMAT_SLACK
            } else {
                text.len().checked_add(FORMAT_SLACK).ok_or_else(|| {
                    Error::new(ErrorKind::Alloc).with_message("format buffer growth overflows")
                })?
            };
            self.grow(increment)?;
        }

        let start = self.cursor;
        let end = start + text.len();
        debug_assert!(end < self.storage.len(), "append exceeds format storage");
        self.storage[start..end].copy_from_slice(text);
        self.storage[end] = 0;
        Ok(())
    }

    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> Result<(), Error> {
        self.grow_for_printf(formatted_len(args))?;
        self.write_at_cursor(args);
        Ok(())
    }

    /// `printf` for text the caller already formatted; bytes are copied unchanged.
    pub fn printf_bytes(&mut self, text: &[u8]) -> Result<(), Error> {
        self.grow_for_printf(text.len())?;
        let available = self.printf_window();
        if available == 0 {
            return Ok(());
        }
        let start = self.cursor;
        let take = text.len().min(available - 1);
        if take < text.len() {
            diag!(available, "format builder truncated text");
        }
        self.storage[start..start + take].copy_from_slice(&text[..take]);
        self.storage[start + take] = 0;
        Ok(())
    }

    pub fn append_int(&mut self, value: i32) -> Result<(), Error> {
        self.printf(format_args!("{value}"))
    }

    /// Text up to the first NUL in the backing store.
    pub fn to_str(&self) -> &[u8] {
        let end = self
            .storage
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(self.storage.len());
        &self.storage[..end]
    }

    // snprintf semantics: truncate to the printf window, always terminate.
    fn write_at_cursor(&mut self, args: fmt::Arguments<'_>) {
        let available = self.printf_window();
        if available == 0 {
            return;
        }
        let start = self.cursor;
        let mut sink = SliceWriter::new(&mut self.storage[start..start + available - 1]);
        let _ = sink.write_fmt(args);
        let written = sink.written;
        if sink.overflowed {
            diag!(available, "format builder truncated formatted text");
        }
        self.storage[start + written] = 0;
    }

    fn grow_for_printf(&mut self, required: usize) -> Result<(), Error> {
        if required < self.length {
            let increment = required.checked_add(FORMAT_SLACK).ok_or_else(|| {
                Error::new(ErrorKind::Alloc).with_message("format buffer growth overflows")
            })?;
            self.grow(increment)?;
        }
        Ok(())
    }

    // Bounded by the storage after the cursor, not by `length`: a length bound would make
    // printf on a fresh builder (length 0) write nothing at all. This departs from the
    // length-bounded C runtime on purpose.
    fn printf_window(&self) -> usize {
        self.storage.len().saturating_sub(self.cursor)
    }

    fn grow(&mut self, increment: usize) -> Result<(), Error> {
        let new_size = self.storage.len().checked_add(increment).ok_or_else(|| {
            Error::new(ErrorKind::Alloc).with_message("format buffer growth overflows")
        })?;
        diag!(new_size, "reallocating format buffer");
        self.storage.try_reserve_exact(increment).map_err(|err| {
            Error::new(ErrorKind::Alloc)
                .with_message("error reallocating format buffer")
                .with_source(err)
        })?;
        self.storage.resize(new_size, 0);
        self.length += increment;
        Ok(())
    }
}

/// UTF-16 copy of `src` with a trailing NUL, limited to `max_units` code units
/// including the terminator.
pub fn to_wide(src: &str, max_units: usize) -> Vec<u16> {
    if max_units == 0 {
        return Vec::new();
    }
    let mut out: Vec<u16> = src.encode_utf16().take(max_units - 1).collect();
    out.push(0);
    out
}
