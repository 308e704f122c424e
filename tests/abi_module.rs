// Modules written against the C function table, driven through the host runtime.
use std::os::raw::{c_char, c_int};
use std::ptr;

use objrun::abi::{
    AbiModule, OBJRUN_ABI_VERSION, objrun_api, objrun_ctx, objrun_datap, objrun_formatp,
};
use objrun::api::{ArgPacker, FaultKind, Runtime, RuntimeConfig};

const OUTPUT: c_int = 0x00;
const ERROR: c_int = 0x0d;
const OUTPUT_OEM: c_int = 0x1e;

unsafe extern "C" fn greet(
    api: *const objrun_api,
    ctx: *mut objrun_ctx,
    args: *const c_char,
    len: c_int,
) {
    let api = unsafe { &*api };
    if api.version != OBJRUN_ABI_VERSION {
        return;
    }

    let mut parser = objrun_datap {
        original: ptr::null(),
        buffer: ptr::null(),
        length: 0,
        size: 0,
    };
    (api.data_parse)(&mut parser, args, len);
    let mut name_len = 0;
    let name = (api.data_extract)(&mut parser, &mut name_len);
    let count = (api.data_int)(&mut parser);
    let flags = (api.data_short)(&mut parser);

    let mut format = objrun_formatp {
        original: ptr::null_mut(),
        buffer: ptr::null_mut(),
        length: 0,
        size: 0,
        handle: ptr::null_mut(),
    };
    (api.format_alloc)(&mut format, 64);
    (api.format_append)(&mut format, name, name_len - 1);
    let mut text_len = 0;
    let text = (api.format_to_string)(&mut format, &mut text_len);
    (api.output)(ctx, OUTPUT, text, text_len);
    (api.format_int)(&mut format, count + c_int::from(flags));
    let text = (api.format_to_string)(&mut format, &mut text_len);
    (api.output)(ctx, OUTPUT, text, text_len);
    (api.format_free)(&mut format);

    (api.printf)(ctx, ERROR, c"left=%d is not expanded".as_ptr());
    let left = (api.data_length)(&mut parser);
    if left == 0 {
        (api.output)(ctx, OUTPUT, c"|drained".as_ptr(), 8);
    }
}

unsafe extern "C" fn crash(
    api: *const objrun_api,
    ctx: *mut objrun_ctx,
    _args: *const c_char,
    _len: c_int,
) {
    let api = unsafe { &*api };
    (api.output)(ctx, OUTPUT, c"pre-crash".as_ptr(), 9);
    unsafe {
        // Aligned and non-null, but never mapped.
        let bad = 0x8 as *mut u32;
        ptr::write_volatile(bad, 0xdead);
    }
    (api.output)(ctx, OUTPUT, c"post-crash".as_ptr(), 10);
}

unsafe extern "C" fn oem_text(
    api: *const objrun_api,
    ctx: *mut objrun_ctx,
    _args: *const c_char,
    _len: c_int,
) {
    let api = unsafe { &*api };
    (api.printf)(ctx, OUTPUT_OEM, c"caf\xe9".as_ptr());
}

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig {
        output_capacity: 4,
        ..RuntimeConfig::default()
    })
    .expect("runtime")
}

#[test]
fn table_calls_round_trip_through_host() {
    let args = ArgPacker::new()
        .string("agent")
        .expect("string")
        .int32(40)
        .int16(2)
        .finish();
    let mut module = unsafe { AbiModule::new(greet) };
    let report = runtime().invoke(&mut module, &args).expect("invoke");

    assert!(report.completed(), "{report}");
    assert_eq!(
        report.output_bytes(),
        b"agent42\n[!] CALLBACK_ERROR:\tleft=%d is not expanded|drained".as_slice()
    );
}

#[test]
fn empty_arguments_fall_back_to_defaults() {
    let mut module = unsafe { AbiModule::new(greet) };
    let report = runtime().invoke(&mut module, &[]).expect("invoke");
    assert!(report.completed(), "{report}");
    // Sentinel name (length 1, so nothing appended) and zero-valued integers.
    assert!(report.output_bytes().starts_with(b"0\n[!] CALLBACK_ERROR:\t"));
    assert!(report.output_bytes().ends_with(b"|drained"));
}

#[test]
fn code_page_text_passes_through_unchanged() {
    let mut module = unsafe { AbiModule::new(oem_text) };
    let report = runtime().invoke(&mut module, &[]).expect("invoke");
    assert!(report.completed(), "{report}");
    assert_eq!(report.output_bytes(), b"\n[ ] CALLBACK_OUTPUT_OEM:\tcaf\xe9");
}

#[cfg(unix)]
#[test]
fn null_write_in_module_is_contained() {
    let mut module = unsafe { AbiModule::new(crash) };
    let report = runtime().invoke(&mut module, &[]).expect("invoke");

    let fault = report.fault().expect("fault");
    assert_eq!(fault.kind, FaultKind::Signal);
    assert!(fault.code == libc::SIGSEGV as u32 || fault.code == libc::SIGBUS as u32);
    assert_eq!(report.output_bytes(), b"pre-crash");
}
