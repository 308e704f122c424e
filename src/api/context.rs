// Per-invocation module context: the only path from module code to the output buffer.
use std::fmt;

use crate::core::diag::diag;
use crate::core::error::{Error, ErrorKind};
use crate::core::fault;
use crate::core::output::{CallbackType, OutputBuffer};

/// Code run inside an invocation. Closures taking `(&mut ModuleContext, &[u8])` qualify.
pub trait Module: Send {
    fn go(&mut self, ctx: &mut ModuleContext, args: &[u8]);
}

impl<F> Module for F
where
    F: FnMut(&mut ModuleContext, &[u8]) + Send,
{
    fn go(&mut self, ctx: &mut ModuleContext, args: &[u8]) {
        self(ctx, args)
    }
}

/// State owned by one invocation and lent to the module while it runs.
#[derive(Debug)]
pub struct ModuleContext {
    output: OutputBuffer,
}

impl ModuleContext {
    pub(crate) fn new(mut output: OutputBuffer) -> Self {
        output.reset();
        Self { output }
    }

    pub(crate) fn into_output(self) -> OutputBuffer {
        self.output
    }

    pub fn output_buffer(&self) -> &OutputBuffer {
        &self.output
    }

    /// Appends raw bytes. `kind` is accepted for ABI parity; raw output carries no prefix.
    pub fn output(&mut self, kind: CallbackType, data: &[u8]) {
        diag!(kind = ?kind, len = data.len(), "module output");
        let result = self.output.write_raw(data);
        self.require(result)
    }

    pub fn printf(&mut self, kind: CallbackType, args: fmt::Arguments<'_>) {
        match self.output.write_formatted(kind, args) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Alloc => fault::raise_fatal(err),
            Err(err) => tracing::warn!(error = %err, "module printf output was cut short"),
        }
    }

    /// Like `printf` for text formatted by the module itself; bytes need not be UTF-8.
    pub fn printf_bytes(&mut self, kind: CallbackType, text: &[u8]) {
        let result = self.output.write_prefixed(kind, text);
        self.require(result)
    }

    /// Unwraps `result`, ending the invocation if it holds an error.
    pub fn require<T>(&self, result: Result<T, Error>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => fault::raise_fatal(err),
        }
    }
}

/// `printf`-style output from module code: `module_printf!(ctx, kind, "{}", x)`.
#[macro_export]
macro_rules! module_printf {
    ($ctx:expr, $kind:expr, $($arg:tt)*) => {
        $ctx.printf($kind, ::std::format_args!($($arg)*))
    };
}
