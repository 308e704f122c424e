// Raw FFI bindings to the fault-guard C trampoline plus the process-wide signal handler.
#![allow(non_camel_case_types)]
use std::os::raw::{c_int, c_void};
use std::sync::OnceLock;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct objrun_fault_slot {
    pub signo: i32,
    pub code: i32,
    pub addr: usize,
}

pub type objrun_guard_body = unsafe extern "C" fn(data: *mut c_void);

unsafe extern "C" {
    pub fn objrun_guarded_call(
        body: objrun_guard_body,
        data: *mut c_void,
        slot: *mut objrun_fault_slot,
    ) -> c_int;

    pub fn objrun_guard_armed() -> c_int;

    pub fn objrun_guard_raise(signo: i32, code: i32, addr: usize);
}

pub const FAULT_SIGNALS: [c_int; 4] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE];

static PREVIOUS: OnceLock<Vec<(c_int, libc::sigaction)>> = OnceLock::new();

pub fn armed() -> bool {
    unsafe { objrun_guard_armed() != 0 }
}

/// Installs the fault handler once per process; later calls are no-ops.
pub fn install_handlers() {
    PREVIOUS.get_or_init(|| {
        let mut previous = Vec::with_capacity(FAULT_SIGNALS.len());
        for signo in FAULT_SIGNALS {
            unsafe {
                let mut sa: libc::sigaction = std::mem::zeroed();
                sa.sa_sigaction = on_fault as *const () as usize;
                sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
                libc::sigemptyset(&mut sa.sa_mask);
                let mut old: libc::sigaction = std::mem::zeroed();
                if libc::sigaction(signo, &sa, &mut old) != 0 {
                    tracing::warn!(
                        signo,
                        error = %std::io::Error::last_os_error(),
                        "failed to install module fault handler"
                    );
                    continue;
                }
                previous.push((signo, old));
            }
        }
        previous
    });
}

/// Text for a signal number as reported by the C library.
pub fn describe_signal(signo: i32) -> String {
    let ptr = unsafe { libc::strsignal(signo) };
    if ptr.is_null() {
        return format!("signal {signo}");
    }
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

extern "C" fn on_fault(signo: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    unsafe {
        if objrun_guard_armed() != 0 {
            let (code, addr) = if info.is_null() {
                (0, 0)
            } else {
                ((*info).si_code, fault_addr(info))
            };
            objrun_guard_raise(signo, code, addr);
        }
        chain(signo, info, context);
    }
}

// Faults on threads without a recovery point go to whoever was installed before us.
unsafe fn chain(signo: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    let previous = PREVIOUS
        .get()
        .and_then(|list| list.iter().find(|(s, _)| *s == signo))
        .map(|(_, action)| *action);
    let Some(previous) = previous else {
        unsafe { reset_default(signo) };
        return;
    };

    let handler = previous.sa_sigaction;
    if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
        unsafe { reset_default(signo) };
        return;
    }
    unsafe {
        if previous.sa_flags & libc::SA_SIGINFO != 0 {
            let f: extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) =
                std::mem::transmute(handler);
            f(signo, info, context);
        } else {
            let f: extern "C" fn(c_int) = std::mem::transmute(handler);
            f(signo);
        }
    }
}

// Returning from the handler re-executes the faulting instruction under SIG_DFL.
unsafe fn reset_default(signo: c_int) {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(signo, &sa, std::ptr::null_mut());
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_addr(info: *mut libc::siginfo_t) -> usize {
    unsafe { (*info).si_addr() as usize }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_addr(info: *mut libc::siginfo_t) -> usize {
    unsafe { (*info).si_addr as usize }
}
