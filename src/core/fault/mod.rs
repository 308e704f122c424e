//! Purpose: Isolate a module's execution so machine faults, fatal runtime errors and panics
//! end only the module's own thread.
//! Exports: `Barrier`, `BarrierState`, `FaultKind`, `FaultReport`, `Termination`, `raise_fatal`.
//! Role: Runs each invocation on a dedicated scoped thread with a recovery point armed.
//! Invariants: A fault is never resumed or retried; the invocation is over.
//! Invariants: Other host threads are untouched; unarmed threads keep the previous handlers.
//! Invariants: Frames skipped by a recovery jump are not unwound (their locals leak).
//! Notes: Machine faults are only intercepted on unix targets.
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crate::core::diag::diag;
use crate::core::error::{Error, ErrorKind, to_status_code};

#[cfg(unix)]
pub mod sys;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BarrierState {
    Armed,
    Handling,
    Terminated,
    Disarmed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// A machine fault delivered as a signal.
    Signal,
    /// A fatal runtime error such as a failed buffer reallocation.
    Fatal,
    Panic,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub code: u32,
    pub address: usize,
    pub description: String,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Exception while running object file: {} @ {:#x} [0x{:X}]",
            self.description, self.address, self.code
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Termination {
    Completed,
    Faulted(FaultReport),
}

impl Termination {
    pub fn final_state(&self) -> BarrierState {
        match self {
            Termination::Completed => BarrierState::Disarmed,
            Termination::Faulted(_) => BarrierState::Terminated,
        }
    }

    /// States the barrier passed through, in order.
    pub fn transitions(&self) -> &'static [BarrierState] {
        match self {
            Termination::Completed => &[BarrierState::Armed, BarrierState::Disarmed],
            Termination::Faulted(_) => &[
                BarrierState::Armed,
                BarrierState::Handling,
                BarrierState::Terminated,
            ],
        }
    }

    pub fn fault(&self) -> Option<&FaultReport> {
        match self {
            Termination::Completed => None,
            Termination::Faulted(report) => Some(report),
        }
    }
}

// Payload used to leave a module when no recovery point can be jumped to.
struct FatalAbort(FaultReport);

thread_local! {
    static PENDING_FATAL: RefCell<Option<FaultReport>> = const { RefCell::new(None) };
}

#[derive(Clone, Debug)]
pub struct Barrier {
    thread_name: String,
    stack_size: Option<usize>,
}

impl Barrier {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            stack_size: None,
        }
    }

    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Runs `body` on a fresh thread with the barrier armed and waits for it.
    pub fn run<T, F>(&self, state: &mut T, body: F) -> Result<Termination, Error>
    where
        T: Send,
        F: FnOnce(&mut T) + Send,
    {
        #[cfg(unix)]
        sys::install_handlers();

        thread::scope(|scope| {
            let mut builder = thread::Builder::new().name(self.thread_name.clone());
            if let Some(stack_size) = self.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let handle = builder
                .spawn_scoped(scope, move || run_armed(state, body))
                .map_err(|err| {
                    Error::new(ErrorKind::Spawn)
                        .with_message("failed to spawn module thread")
                        .with_source(err)
                })?;
            handle.join().map_err(|_| {
                Error::new(ErrorKind::Internal).with_message("module thread panicked outside the barrier")
            })
        })
    }
}

fn run_armed<T, F>(state: &mut T, body: F) -> Termination
where
    F: FnOnce(&mut T),
{
    diag!(state = ?BarrierState::Armed, "fault barrier armed");
    match guarded_call(move || body(state)) {
        Ok(()) => {
            diag!(state = ?BarrierState::Disarmed, "fault barrier disarmed");
            Termination::Completed
        }
        Err(report) => {
            tracing::error!(
                state = ?BarrierState::Handling,
                kind = ?report.kind,
                code = report.code,
                address = report.address,
                "{report}"
            );
            tracing::warn!(state = ?BarrierState::Terminated, "module thread terminated");
            Termination::Faulted(report)
        }
    }
}

/// Ends the current module invocation because of an unrecoverable runtime error.
///
/// Inside an armed barrier on unix this jumps straight back to the barrier; otherwise
/// it unwinds with a private payload the barrier recognises.
pub fn raise_fatal(err: Error) -> ! {
    tracing::error!(error = %err, "fatal error in module, exiting module thread");
    let report = FaultReport {
        kind: FaultKind::Fatal,
        code: to_status_code(err.kind()) as u32,
        address: 0,
        description: err.to_string(),
    };

    #[cfg(unix)]
    if sys::armed() {
        PENDING_FATAL.with(|pending| pending.replace(Some(report)));
        unsafe { sys::objrun_guard_raise(0, 0, 0) };
        unreachable!("armed fault guard did not jump");
    }

    panic::panic_any(FatalAbort(report))
}

#[cfg(unix)]
fn guarded_call<F: FnOnce()>(body: F) -> Result<(), FaultReport> {
    use std::os::raw::c_void;

    struct Job<F> {
        body: Option<F>,
        panic: Option<Box<dyn Any + Send>>,
    }

    unsafe extern "C" fn trampoline<F: FnOnce()>(data: *mut c_void) {
        let job = unsafe { &mut *(data as *mut Job<F>) };
        if let Some(body) = job.body.take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                job.panic = Some(payload);
            }
        }
    }

    let mut job = Job {
        body: Some(body),
        panic: None,
    };
    let mut slot = sys::objrun_fault_slot::default();
    let jumped = unsafe {
        sys::objrun_guarded_call(
            trampoline::<F>,
            &mut job as *mut Job<F> as *mut c_void,
            &mut slot,
        )
    };

    if jumped != 0 {
        if let Some(report) = PENDING_FATAL.with(|pending| pending.take()) {
            return Err(report);
        }
        return Err(FaultReport {
            kind: FaultKind::Signal,
            code: slot.signo as u32,
            address: slot.addr,
            description: sys::describe_signal(slot.signo),
        });
    }
    match job.panic {
        Some(payload) => Err(panic_report(payload)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn guarded_call<F: FnOnce()>(body: F) -> Result<(), FaultReport> {
    panic::catch_unwind(AssertUnwindSafe(body)).map_err(panic_report)
}

fn panic_report(payload: Box<dyn Any + Send>) -> FaultReport {
    let payload = match payload.downcast::<FatalAbort>() {
        Ok(fatal) => return fatal.0,
        Err(payload) => payload,
    };
    let description = if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "module panicked".to_string()
    };
    FaultReport {
        kind: FaultKind::Panic,
        code: 0,
        address: 0,
        description,
    }
}
