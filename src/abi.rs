//! Purpose: C ABI bridge for object modules compiled against the callback API.
//! Exports: `objrun_api` function table, `objrun_datap`/`objrun_formatp` mirrors, `AbiModule`.
//! Role: Stable ABI surface; every entry forwards to the Rust parser, builder and context.
//! Invariants: Null pointers degrade to defaults; nothing here dereferences a null argument.
//! Invariants: `objrun_formatp` pointer/length fields are refreshed after every builder call.
//! Notes: Variadic printf is not part of the ABI; modules pass pre-formatted text.
#![allow(non_camel_case_types)]

use std::borrow::Cow;
use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_int};
use std::{mem, ptr, slice};

use crate::api::{Module, ModuleContext};
use crate::core::diag::diag;
use crate::core::error::Error;
use crate::core::fault;
use crate::core::format::{FormatBuilder, to_wide};
use crate::core::output::CallbackType;
use crate::core::parser::Parser;

pub const OBJRUN_ABI_VERSION: u32 = 1;

/// Opaque per-invocation context handed to the module entry point.
#[repr(C)]
pub struct objrun_ctx {
    _private: [u8; 0],
}

#[repr(C)]
#[derive(Debug)]
pub struct objrun_datap {
    pub original: *const c_char,
    pub buffer: *const c_char,
    pub length: c_int,
    pub size: c_int,
}

#[repr(C)]
#[derive(Debug)]
pub struct objrun_formatp {
    pub original: *mut c_char,
    pub buffer: *mut c_char,
    pub length: c_int,
    pub size: c_int,
    /// Owned builder; only `objrun_format_alloc` and `objrun_format_free` touch it.
    pub handle: *mut c_void,
}

#[repr(C)]
pub struct objrun_api {
    pub version: u32,
    pub size: u32,
    pub printf: extern "C" fn(*mut objrun_ctx, c_int, *const c_char),
    pub output: extern "C" fn(*mut objrun_ctx, c_int, *const c_char, c_int),
    pub data_parse: extern "C" fn(*mut objrun_datap, *const c_char, c_int),
    pub data_length: extern "C" fn(*mut objrun_datap) -> c_int,
    pub data_extract: extern "C" fn(*mut objrun_datap, *mut c_int) -> *const c_char,
    pub data_int: extern "C" fn(*mut objrun_datap) -> i32,
    pub data_short: extern "C" fn(*mut objrun_datap) -> i16,
    pub format_alloc: extern "C" fn(*mut objrun_formatp, c_int),
    pub format_reset: extern "C" fn(*mut objrun_formatp),
    pub format_free: extern "C" fn(*mut objrun_formatp),
    pub format_append: extern "C" fn(*mut objrun_formatp, *const c_char, c_int),
    pub format_printf: extern "C" fn(*mut objrun_formatp, *const c_char),
    pub format_to_string: extern "C" fn(*mut objrun_formatp, *mut c_int) -> *mut c_char,
    pub format_int: extern "C" fn(*mut objrun_formatp, c_int),
    pub to_wide_char: extern "C" fn(*const c_char, *mut u16, c_int) -> c_int,
}

/// The table passed to every module entry point.
pub static OBJRUN_API: objrun_api = objrun_api {
    version: OBJRUN_ABI_VERSION,
    size: mem::size_of::<objrun_api>() as u32,
    printf: objrun_printf,
    output: objrun_output,
    data_parse: objrun_data_parse,
    data_length: objrun_data_length,
    data_extract: objrun_data_extract,
    data_int: objrun_data_int,
    data_short: objrun_data_short,
    format_alloc: objrun_format_alloc,
    format_reset: objrun_format_reset,
    format_free: objrun_format_free,
    format_append: objrun_format_append,
    format_printf: objrun_format_printf,
    format_to_string: objrun_format_to_string,
    format_int: objrun_format_int,
    to_wide_char: objrun_to_wide_char,
};

/// Signature of a module's `go` symbol.
pub type objrun_entry =
    unsafe extern "C" fn(api: *const objrun_api, ctx: *mut objrun_ctx, args: *const c_char, len: c_int);

/// Runs a C-ABI entry point as a `Module`.
#[derive(Clone, Copy, Debug)]
pub struct AbiModule {
    entry: objrun_entry,
}

impl AbiModule {
    /// # Safety
    /// `entry` must follow the `objrun_entry` contract: it may only reach the host
    /// through the table and context it is handed, and must not retain either after return.
    pub unsafe fn new(entry: objrun_entry) -> Self {
        Self { entry }
    }
}

impl Module for AbiModule {
    fn go(&mut self, ctx: &mut ModuleContext, args: &[u8]) {
        let len = match c_int::try_from(args.len()) {
            Ok(len) => len,
            Err(_) => {
                tracing::warn!(len = args.len(), "argument buffer exceeds c_int; truncating");
                c_int::MAX
            }
        };
        let ctx = ptr::from_mut(ctx).cast::<objrun_ctx>();
        unsafe { (self.entry)(&OBJRUN_API, ctx, args.as_ptr().cast(), len) }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_abi_version() -> u32 {
    OBJRUN_ABI_VERSION
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_printf(ctx: *mut objrun_ctx, kind: c_int, text: *const c_char) {
    let Some(ctx) = borrow_ctx(ctx) else {
        return;
    };
    let Some(text) = borrow_cstr(text) else {
        return;
    };
    ctx.printf_bytes(CallbackType::from_raw(kind), text);
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_output(ctx: *mut objrun_ctx, kind: c_int, data: *const c_char, len: c_int) {
    let Some(ctx) = borrow_ctx(ctx) else {
        return;
    };
    let Some(data) = borrow_bytes(data, len) else {
        return;
    };
    ctx.output(CallbackType::from_raw(kind), data);
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_data_parse(parser: *mut objrun_datap, buffer: *const c_char, size: c_int) {
    let Some(datap) = (unsafe { parser.as_mut() }) else {
        return;
    };
    let size = size.max(0);
    datap.original = buffer;
    datap.buffer = buffer;
    datap.length = size;
    datap.size = size;
    diag!(size, "argument parser initialised");
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_data_length(parser: *mut objrun_datap) -> c_int {
    with_parser(parser, 0, |view| clamp_int(view.length()))
}

/// Returns the payload pointer, or the shared one-byte sentinel when the record is unusable.
#[unsafe(no_mangle)]
pub extern "C" fn objrun_data_extract(parser: *mut objrun_datap, size: *mut c_int) -> *const c_char {
    let sentinel = crate::core::parser::empty_sentinel();
    let (data, len) = with_parser(parser, (sentinel.as_ptr(), sentinel.len()), |view| {
        let bytes = view.extract_binary();
        (bytes.as_ptr(), bytes.len())
    });
    if let Some(size) = unsafe { size.as_mut() } {
        *size = clamp_int(len);
    }
    data.cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_data_int(parser: *mut objrun_datap) -> i32 {
    with_parser(parser, 0, |view| view.extract_int32())
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_data_short(parser: *mut objrun_datap) -> i16 {
    with_parser(parser, 0, |view| view.extract_int16())
}

/// Overwrites every field of `format`; an earlier builder in the same struct is not freed.
#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_alloc(format: *mut objrun_formatp, maxsz: c_int) {
    let Some(formatp) = (unsafe { format.as_mut() }) else {
        return;
    };
    let max_size = usize::try_from(maxsz).unwrap_or(0);
    let mut builder = match FormatBuilder::allocate(max_size) {
        Ok(builder) => Box::new(builder),
        Err(err) => fault::raise_fatal(err),
    };
    sync_format(formatp, &mut builder);
    formatp.handle = Box::into_raw(builder).cast();
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_reset(format: *mut objrun_formatp) {
    with_format(format, (), FormatBuilder::reset)
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_free(format: *mut objrun_formatp) {
    let Some(formatp) = (unsafe { format.as_mut() }) else {
        return;
    };
    if !formatp.handle.is_null() {
        let builder = unsafe { Box::from_raw(formatp.handle.cast::<FormatBuilder>()) };
        builder.free();
    }
    formatp.original = ptr::null_mut();
    formatp.buffer = ptr::null_mut();
    formatp.length = 0;
    formatp.size = 0;
    formatp.handle = ptr::null_mut();
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_append(format: *mut objrun_formatp, text: *const c_char, len: c_int) {
    let Some(text) = borrow_bytes(text, len) else {
        return;
    };
    with_format(format, (), |builder| {
        let text = detach(builder, text);
        require(builder.append(&text))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_printf(format: *mut objrun_formatp, text: *const c_char) {
    let Some(text) = borrow_cstr(text) else {
        return;
    };
    with_format(format, (), |builder| {
        let text = detach(builder, text);
        require(builder.printf_bytes(&text))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_to_string(format: *mut objrun_formatp, size: *mut c_int) -> *mut c_char {
    let (text, len) = with_format(format, (ptr::null_mut(), 0), |builder| {
        let len = builder.to_str().len();
        (builder.storage_mut_ptr(), len)
    });
    if let Some(size) = unsafe { size.as_mut() } {
        *size = clamp_int(len);
    }
    text.cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn objrun_format_int(format: *mut objrun_formatp, value: c_int) {
    with_format(format, (), |builder| require(builder.append_int(value)))
}

/// Converts NUL-terminated UTF-8 to UTF-16 with a terminator, within `max_bytes`.
#[unsafe(no_mangle)]
pub extern "C" fn objrun_to_wide_char(src: *const c_char, dst: *mut u16, max_bytes: c_int) -> c_int {
    if dst.is_null() {
        return 0;
    }
    let Some(src) = borrow_cstr(src) else {
        return 0;
    };
    let max_units = usize::try_from(max_bytes).unwrap_or(0) / 2;
    let wide = to_wide(&String::from_utf8_lossy(src), max_units);
    unsafe { ptr::copy_nonoverlapping(wide.as_ptr(), dst, wide.len()) };
    1
}

fn borrow_ctx<'a>(ctx: *mut objrun_ctx) -> Option<&'a mut ModuleContext> {
    unsafe { ctx.cast::<ModuleContext>().as_mut() }
}

fn borrow_cstr<'a>(text: *const c_char) -> Option<&'a [u8]> {
    if text.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(text) }.to_bytes())
}

fn borrow_bytes<'a>(data: *const c_char, len: c_int) -> Option<&'a [u8]> {
    if data.is_null() {
        return None;
    }
    let len = usize::try_from(len).unwrap_or(0);
    Some(unsafe { slice::from_raw_parts(data.cast::<u8>(), len) })
}

fn clamp_int(value: usize) -> c_int {
    c_int::try_from(value).unwrap_or(c_int::MAX)
}

fn require(result: Result<(), Error>) {
    if let Err(err) = result {
        fault::raise_fatal(err);
    }
}

// Rebuilds a parser view from the C struct, runs `op`, then writes the cursor state back.
fn with_parser<R>(parser: *mut objrun_datap, default: R, op: impl FnOnce(&mut Parser<'_>) -> R) -> R {
    let Some(datap) = (unsafe { parser.as_mut() }) else {
        return default;
    };
    if datap.original.is_null() || datap.buffer.is_null() {
        return default;
    }
    let size = usize::try_from(datap.size).unwrap_or(0);
    let input = unsafe { slice::from_raw_parts(datap.original.cast::<u8>(), size) };
    let offset = unsafe { datap.buffer.offset_from(datap.original) };
    let cursor = usize::try_from(offset).unwrap_or(0);
    let remaining = usize::try_from(datap.length).unwrap_or(0);

    let mut view = Parser::resume(input, cursor, remaining);
    let result = op(&mut view);
    datap.buffer = unsafe { datap.original.add(view.cursor()) };
    datap.length = clamp_int(view.length());
    result
}

fn with_format<R>(
    format: *mut objrun_formatp,
    default: R,
    op: impl FnOnce(&mut FormatBuilder) -> R,
) -> R {
    let Some(formatp) = (unsafe { format.as_mut() }) else {
        return default;
    };
    let Some(builder) = (unsafe { formatp.handle.cast::<FormatBuilder>().as_mut() }) else {
        return default;
    };
    let result = op(builder);
    sync_format(formatp, builder);
    result
}

// Text taken from the builder's own storage would dangle once the builder grows.
fn detach<'t>(builder: &FormatBuilder, text: &'t [u8]) -> Cow<'t, [u8]> {
    let storage = builder.storage().as_ptr_range();
    let src = text.as_ptr_range();
    if src.start < storage.end && storage.start < src.end {
        Cow::Owned(text.to_vec())
    } else {
        Cow::Borrowed(text)
    }
}

fn sync_format(formatp: &mut objrun_formatp, builder: &mut FormatBuilder) {
    let base = builder.storage_mut_ptr();
    formatp.original = base.cast();
    formatp.buffer = unsafe { base.add(builder.cursor()) }.cast();
    formatp.length = clamp_int(builder.length());
    formatp.size = clamp_int(builder.size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::{ArgPacker, empty_sentinel};

    fn empty_datap() -> objrun_datap {
        objrun_datap {
            original: ptr::null(),
            buffer: ptr::null(),
            length: 0,
            size: 0,
        }
    }

    fn empty_formatp() -> objrun_formatp {
        objrun_formatp {
            original: ptr::null_mut(),
            buffer: ptr::null_mut(),
            length: 0,
            size: 0,
            handle: ptr::null_mut(),
        }
    }

    #[test]
    fn table_reports_version_and_size() {
        assert_eq!(OBJRUN_API.version, OBJRUN_ABI_VERSION);
        assert_eq!(OBJRUN_API.size as usize, mem::size_of::<objrun_api>());
        assert_eq!(objrun_abi_version(), 1);
    }

    #[test]
    fn datap_walks_packed_records() {
        let args = ArgPacker::new()
            .string("host")
            .expect("string")
            .int32(443)
            .int16(-2)
            .finish();
        let mut datap = empty_datap();
        objrun_data_parse(&mut datap, args.as_ptr().cast(), args.len() as c_int);
        assert_eq!(objrun_data_length(&mut datap), args.len() as c_int);

        let mut size = 0;
        let text = objrun_data_extract(&mut datap, &mut size);
        assert_eq!(size, 5);
        let text = unsafe { slice::from_raw_parts(text.cast::<u8>(), size as usize) };
        assert_eq!(text, b"host\0");

        assert_eq!(objrun_data_int(&mut datap), 443);
        assert_eq!(objrun_data_short(&mut datap), -2);
        assert_eq!(objrun_data_length(&mut datap), 0);
        assert_eq!(datap.buffer, unsafe { datap.original.add(args.len()) });
    }

    #[test]
    fn short_input_yields_sentinel() {
        let args = [1u8, 2, 3];
        let mut datap = empty_datap();
        objrun_data_parse(&mut datap, args.as_ptr().cast(), args.len() as c_int);
        let mut size = 0;
        let data = objrun_data_extract(&mut datap, &mut size);
        assert_eq!(size, 1);
        assert_eq!(data.cast::<u8>(), empty_sentinel().as_ptr());
        assert_eq!(objrun_data_length(&mut datap), 3);
    }

    #[test]
    fn null_pointers_degrade_to_defaults() {
        assert_eq!(objrun_data_length(ptr::null_mut()), 0);
        assert_eq!(objrun_data_int(ptr::null_mut()), 0);
        assert_eq!(objrun_data_short(ptr::null_mut()), 0);
        let mut size = -1;
        let data = objrun_data_extract(ptr::null_mut(), &mut size);
        assert_eq!(size, 1);
        assert_eq!(data.cast::<u8>(), empty_sentinel().as_ptr());

        let mut datap = empty_datap();
        assert_eq!(objrun_data_int(&mut datap), 0);

        objrun_printf(ptr::null_mut(), 0, c"ignored".as_ptr());
        objrun_output(ptr::null_mut(), 0, ptr::null(), 4);
        objrun_format_reset(ptr::null_mut());
        objrun_format_free(ptr::null_mut());
        let mut formatp = empty_formatp();
        objrun_format_int(&mut formatp, 7);
        assert!(objrun_format_to_string(&mut formatp, ptr::null_mut()).is_null());
        assert_eq!(objrun_to_wide_char(ptr::null(), ptr::null_mut(), 8), 0);
    }

    #[test]
    fn formatp_tracks_builder_state() {
        let mut formatp = empty_formatp();
        objrun_format_alloc(&mut formatp, 16);
        assert!(!formatp.handle.is_null());
        assert_eq!(formatp.size, 16);
        assert_eq!(formatp.length, 0);
        assert_eq!(formatp.buffer, formatp.original);

        let text = b"abc";
        objrun_format_append(&mut formatp, text.as_ptr().cast(), text.len() as c_int);
        assert_eq!(formatp.size, 16 + 1024);
        assert_eq!(formatp.length, 1024);

        let mut size = 0;
        let out = objrun_format_to_string(&mut formatp, &mut size);
        assert_eq!(out, formatp.original);
        let out = unsafe { slice::from_raw_parts(out.cast::<u8>(), size as usize) };
        assert_eq!(out, b"abc");

        objrun_format_int(&mut formatp, 42);
        objrun_format_to_string(&mut formatp, &mut size);
        assert_eq!(size, 2);

        objrun_format_printf(&mut formatp, c"x=9".as_ptr());
        objrun_format_to_string(&mut formatp, &mut size);
        assert_eq!(size, 3);

        objrun_format_reset(&mut formatp);
        assert_eq!(formatp.length, 0);

        objrun_format_free(&mut formatp);
        assert!(formatp.handle.is_null());
        assert!(formatp.original.is_null());
        assert_eq!(formatp.size, 0);
    }

    #[test]
    fn appending_builder_text_to_itself_survives_growth() {
        let mut formatp = empty_formatp();
        objrun_format_alloc(&mut formatp, 8);
        let long = vec![b'q'; 3000];
        objrun_format_append(&mut formatp, long.as_ptr().cast(), long.len() as c_int);
        objrun_format_reset(&mut formatp);

        let mut size = 0;
        let own = objrun_format_to_string(&mut formatp, &mut size);
        assert_eq!(size, 3000);
        let before = formatp.size;
        objrun_format_append(&mut formatp, own, size);
        assert!(formatp.size > before, "append must have reallocated");

        let mut after = 0;
        let text = objrun_format_to_string(&mut formatp, &mut after);
        let text = unsafe { slice::from_raw_parts(text.cast::<u8>(), after as usize) };
        assert_eq!(text, long.as_slice());

        // Same aliasing through printf, which also grows before copying.
        let own = objrun_format_to_string(&mut formatp, ptr::null_mut());
        objrun_format_printf(&mut formatp, own);
        objrun_format_to_string(&mut formatp, &mut after);
        assert_eq!(after, 3000);

        objrun_format_free(&mut formatp);
    }

    #[test]
    fn format_printf_copies_non_utf8_text() {
        let mut formatp = empty_formatp();
        objrun_format_alloc(&mut formatp, 16);
        objrun_format_printf(&mut formatp, c"caf\xe9".as_ptr());
        let mut size = 0;
        let text = objrun_format_to_string(&mut formatp, &mut size);
        let text = unsafe { slice::from_raw_parts(text.cast::<u8>(), size as usize) };
        assert_eq!(text, b"caf\xe9");
        objrun_format_free(&mut formatp);
    }

    #[test]
    fn wide_conversion_respects_byte_budget() {
        let mut dst = [0xffffu16; 8];
        assert_eq!(objrun_to_wide_char(c"hello".as_ptr(), dst.as_mut_ptr(), 8), 1);
        assert_eq!(&dst[..4], &[u16::from(b'h'), u16::from(b'e'), u16::from(b'l'), 0]);
        assert_eq!(dst[4], 0xffff);
    }
}
