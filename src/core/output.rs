// Growable output buffer with a write cursor and cached remaining capacity.
use std::fmt::{self, Write as _};

use bstr::BStr;

use crate::core::diag::diag;
use crate::core::error::{Error, ErrorKind};

/// Extra bytes added on top of every requested growth.
pub const OUTPUT_SLACK: usize = 1024;

const PREFIX_OUTPUT: &str = "\n[ ] CALLBACK_OUTPUT:\t";
const PREFIX_OUTPUT_OEM: &str = "\n[ ] CALLBACK_OUTPUT_OEM:\t";
const PREFIX_ERROR: &str = "\n[!] CALLBACK_ERROR:\t";
const PREFIX_OUTPUT_UTF8: &str = "\n[ ] CALLBACK_OUTPUT_UTF8:\t";
const PREFIX_UNKNOWN: &str = "\n[!] UNKNOWN TYPE:\t";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallbackType {
    Output,
    OutputOem,
    Error,
    OutputUtf8,
    Unknown(i32),
}

impl CallbackType {
    pub const OUTPUT: i32 = 0x00;
    pub const OUTPUT_OEM: i32 = 0x1e;
    pub const ERROR: i32 = 0x0d;
    pub const OUTPUT_UTF8: i32 = 0x20;

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            Self::OUTPUT => CallbackType::Output,
            Self::OUTPUT_OEM => CallbackType::OutputOem,
            Self::ERROR => CallbackType::Error,
            Self::OUTPUT_UTF8 => CallbackType::OutputUtf8,
            other => CallbackType::Unknown(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            CallbackType::Output => Self::OUTPUT,
            CallbackType::OutputOem => Self::OUTPUT_OEM,
            CallbackType::Error => Self::ERROR,
            CallbackType::OutputUtf8 => Self::OUTPUT_UTF8,
            CallbackType::Unknown(raw) => raw,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            CallbackType::Output => PREFIX_OUTPUT,
            CallbackType::OutputOem => PREFIX_OUTPUT_OEM,
            CallbackType::Error => PREFIX_ERROR,
            CallbackType::OutputUtf8 => PREFIX_OUTPUT_UTF8,
            CallbackType::Unknown(_) => PREFIX_UNKNOWN,
        }
    }
}

pub struct OutputBuffer {
    data: Vec<u8>,
    cursor: usize,
    remaining: usize,
}

impl OutputBuffer {
    /// Allocates zero-filled storage of `capacity` bytes with the cursor at the start.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|err| {
            Error::new(ErrorKind::Alloc)
                .with_message("unable to allocate output buffer")
                .with_source(err)
        })?;
        data.resize(capacity, 0);
        Ok(Self {
            data,
            cursor: 0,
            remaining: capacity,
        })
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.remaining = self.data.len();
        self.check_invariants();
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn written(&self) -> &[u8] {
        &self.data[..self.cursor]
    }

    pub fn into_written(mut self) -> Vec<u8> {
        self.data.truncate(self.cursor);
        self.data
    }

    pub fn ensure_capacity(&mut self, need: usize) -> Result<(), Error> {
        if need <= self.remaining {
            return Ok(());
        }
        self.grow(need)
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        diag!(len = bytes.len(), "output buffer received raw bytes");
        self.ensure_capacity(bytes.len())?;
        self.put(bytes);
        Ok(())
    }

    pub fn write_formatted(&mut self, kind: CallbackType, args: fmt::Arguments<'_>) -> Result<(), Error> {
        if let CallbackType::Unknown(raw) = kind {
            diag!(raw, "unknown callback type supplied to printf");
        }
        let prefix = kind.prefix().as_bytes();
        let measured = formatted_len(args);
        let need = prefix.len().checked_add(measured).ok_or_else(|| {
            Error::new(ErrorKind::Alloc).with_message("formatted output length overflows")
        })?;
        self.ensure_capacity(need)?;

        self.put(prefix);

        let start = self.cursor;
        let mut sink = SliceWriter::new(&mut self.data[start..start + measured]);
        let _ = sink.write_fmt(args);
        let (written, overflowed) = (sink.written, sink.overflowed);
        self.cursor += written;
        self.remaining -= written;
        self.check_invariants();

        if overflowed || written != measured {
            return Err(Error::new(ErrorKind::Internal)
                .with_message("formatted output changed between measuring and writing")
                .with_offset(self.cursor as u64));
        }
        Ok(())
    }

    /// Prefixed write of text that is already formatted; the payload is copied byte for byte.
    pub fn write_prefixed(&mut self, kind: CallbackType, payload: &[u8]) -> Result<(), Error> {
        if let CallbackType::Unknown(raw) = kind {
            diag!(raw, "unknown callback type supplied to printf");
        }
        let prefix = kind.prefix().as_bytes();
        let need = prefix.len().checked_add(payload.len()).ok_or_else(|| {
            Error::new(ErrorKind::Alloc).with_message("prefixed output length overflows")
        })?;
        self.ensure_capacity(need)?;
        self.put(prefix);
        self.put(payload);
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) {
        let start = self.cursor;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
        self.remaining -= bytes.len();
        self.check_invariants();
    }

    fn grow(&mut self, need: usize) -> Result<(), Error> {
        let increment = need.checked_add(OUTPUT_SLACK).ok_or_else(|| {
            Error::new(ErrorKind::Alloc).with_message("output buffer growth overflows")
        })?;
        let new_len = self.data.len().checked_add(increment).ok_or_else(|| {
            Error::new(ErrorKind::Alloc).with_message("output buffer growth overflows")
        })?;
        diag!(new_len, "reallocating output buffer");

        self.data.try_reserve_exact(increment).map_err(|err| {
            Error::new(ErrorKind::Alloc)
                .with_message("unable to grow output buffer")
                .with_offset(self.cursor as u64)
                .with_source(err)
        })?;
        self.data.resize(new_len, 0);
        self.remaining += increment;
        self.check_invariants();
        Ok(())
    }

    fn check_invariants(&self) {
        debug_assert!(self.cursor <= self.data.len(), "output cursor past end");
        debug_assert_eq!(
            self.remaining,
            self.data.len() - self.cursor,
            "cached remaining drifted from capacity - cursor"
        );
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("capacity", &self.data.len())
            .field("cursor", &self.cursor)
            .field("remaining", &self.remaining)
            .field("written", &BStr::new(self.written()))
            .finish()
    }
}

/// Length of `args` once formatted, without producing the text.
pub(crate) fn formatted_len(args: fmt::Arguments<'_>) -> usize {
    struct Counter(usize);

    impl fmt::Write for Counter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0 += s.len();
            Ok(())
        }
    }

    let mut counter = Counter(0);
    let _ = fmt::write(&mut counter, args);
    counter.0
}

/// Writes formatted text into a fixed slice, truncating on overflow.
pub(crate) struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pub(crate) written: usize,
    pub(crate) overflowed: bool,
}

impl<'a> SliceWriter<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            written: 0,
            overflowed: false,
        }
    }
}

impl fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.written;
        let take = s.len().min(room);
        self.buf[self.written..self.written + take].copy_from_slice(&s.as_bytes()[..take]);
        self.written += take;
        if take < s.len() {
            self.overflowed = true;
            return Err(fmt::Error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CallbackType, OUTPUT_SLACK, OutputBuffer, formatted_len};
    use crate::core::error::ErrorKind;
    use std::fmt;

    #[test]
    fn writes_within_capacity_do_not_grow() {
        let mut out = OutputBuffer::with_capacity(256).expect("alloc");
        out.write_raw(b"abcd").expect("raw");
        assert_eq!(out.remaining(), 252);
        out.write_formatted(CallbackType::Output, format_args!("n={}", 7))
            .expect("formatted");
        let prefix = CallbackType::Output.prefix().len();
        assert_eq!(out.remaining(), 252 - prefix - 3);
        assert_eq!(out.capacity(), 256);
    }

    #[test]
    fn growth_preserves_prior_bytes() {
        let mut out = OutputBuffer::with_capacity(8).expect("alloc");
        out.write_raw(b"head").expect("raw");
        let big = vec![b'x'; 100];
        out.write_raw(&big).expect("raw");

        assert_eq!(out.capacity(), 8 + 100 + OUTPUT_SLACK);
        assert_eq!(&out.written()[..4], b"head");
        assert_eq!(&out.written()[4..], big.as_slice());
        assert_eq!(out.remaining(), out.capacity() - 104);
    }

    #[test]
    fn growth_leaves_enough_room() {
        let mut out = OutputBuffer::with_capacity(0).expect("alloc");
        out.ensure_capacity(10).expect("grow");
        assert!(out.remaining() >= 10);
        assert!(out.written().is_empty());
    }

    #[test]
    fn formatted_output_carries_prefix() {
        let mut out = OutputBuffer::with_capacity(0).expect("alloc");
        out.write_formatted(CallbackType::Error, format_args!("bad {}", "input"))
            .expect("formatted");
        assert_eq!(out.written(), b"\n[!] CALLBACK_ERROR:\tbad input");
    }

    #[test]
    fn unknown_tags_use_unknown_prefix() {
        let kind = CallbackType::from_raw(0x55);
        assert_eq!(kind, CallbackType::Unknown(0x55));
        let mut out = OutputBuffer::with_capacity(64).expect("alloc");
        out.write_formatted(kind, format_args!("x")).expect("formatted");
        assert_eq!(out.written(), b"\n[!] UNKNOWN TYPE:\tx");
    }

    #[test]
    fn known_tags_round_trip_raw_values() {
        for raw in [0x00, 0x1e, 0x0d, 0x20] {
            assert_eq!(CallbackType::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(
            CallbackType::OutputUtf8.prefix(),
            "\n[ ] CALLBACK_OUTPUT_UTF8:\t"
        );
        assert_eq!(
            CallbackType::OutputOem.prefix(),
            "\n[ ] CALLBACK_OUTPUT_OEM:\t"
        );
    }

    #[test]
    fn reset_rewinds_cursor_and_keeps_capacity() {
        let mut out = OutputBuffer::with_capacity(4).expect("alloc");
        out.write_raw(b"0123456789").expect("raw");
        let capacity = out.capacity();
        out.reset();
        assert_eq!(out.cursor(), 0);
        assert_eq!(out.remaining(), capacity);
        assert!(out.written().is_empty());
    }

    #[test]
    fn overflowing_growth_is_an_alloc_error() {
        let mut out = OutputBuffer::with_capacity(16).expect("alloc");
        let err = out.ensure_capacity(usize::MAX - 8).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Alloc);
        assert_eq!(out.capacity(), 16);
        assert_eq!(out.remaining(), 16);
    }

    #[test]
    fn into_written_drops_spare_capacity() {
        let mut out = OutputBuffer::with_capacity(64).expect("alloc");
        out.write_raw(b"done").expect("raw");
        assert_eq!(out.into_written(), b"done".to_vec());
    }

    #[test]
    fn unstable_display_is_reported_not_overrun() {
        struct Flaky(std::cell::Cell<usize>);

        impl fmt::Display for Flaky {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let calls = self.0.get();
                self.0.set(calls + 1);
                let text = if calls == 0 { "ab" } else { "abcdef" };
                f.write_str(text)
            }
        }

        let flaky = Flaky(std::cell::Cell::new(0));
        let mut out = OutputBuffer::with_capacity(0).expect("alloc");
        let err = out
            .write_formatted(CallbackType::Output, format_args!("{flaky}"))
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(out.written().ends_with(b"ab"));
        assert_eq!(out.remaining(), out.capacity() - out.cursor());
    }

    #[test]
    fn prefixed_bytes_are_copied_verbatim() {
        let mut out = OutputBuffer::with_capacity(4).expect("alloc");
        out.write_prefixed(CallbackType::OutputOem, b"caf\xe9\xff")
            .expect("prefixed");
        assert_eq!(out.written(), b"\n[ ] CALLBACK_OUTPUT_OEM:\tcaf\xe9\xff");
        assert_eq!(out.remaining(), out.capacity() - out.cursor());
    }

    #[test]
    fn formatted_len_matches_rendered_text() {
        assert_eq!(formatted_len(format_args!("{}-{:04}", "id", 7)), 7);
    }
}
