// Runs one module invocation behind the fault barrier and hands the output back to the host.
use std::fmt;
use std::time::{Duration, Instant};

use bstr::BStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::api::context::{Module, ModuleContext};
use crate::config::RuntimeConfig;
use crate::core::diag::diag;
use crate::core::error::{Error, ErrorKind};
use crate::core::fault::{Barrier, BarrierState, FaultReport, Termination};
use crate::core::output::OutputBuffer;

/// A single execution of a module entry point with its own buffers.
#[derive(Debug)]
pub struct Invocation<'a> {
    barrier: Barrier,
    output: OutputBuffer,
    args: &'a [u8],
}

impl<'a> Invocation<'a> {
    pub fn new(config: &RuntimeConfig, args: &'a [u8]) -> Result<Self, Error> {
        let output = OutputBuffer::with_capacity(config.output_capacity)?;
        Self::with_output(config, output, args)
    }

    /// Uses an output buffer the loader already allocated.
    pub fn with_output(
        config: &RuntimeConfig,
        output: OutputBuffer,
        args: &'a [u8],
    ) -> Result<Self, Error> {
        config.validate()?;
        let barrier = Barrier::new(config.thread_name.clone()).with_stack_size(config.stack_size);
        Ok(Self {
            barrier,
            output,
            args,
        })
    }

    pub fn run(self, module: &mut dyn Module) -> Result<InvocationReport, Error> {
        let started_at = OffsetDateTime::now_utc();
        let started = Instant::now();
        let args = self.args;
        let mut ctx = ModuleContext::new(self.output);

        diag!(args = args.len(), "calling module entry point");
        let termination = self
            .barrier
            .run(&mut ctx, |ctx| module.go(ctx, args))?;
        diag!(state = ?termination.final_state(), "module entry point returned");

        let report = InvocationReport {
            output: ctx.into_output(),
            termination,
            started_at,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            thread = self.barrier.thread_name(),
            bytes = report.output.cursor(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            state = ?report.state(),
            "module invocation finished"
        );
        Ok(report)
    }
}

#[derive(Debug)]
pub struct InvocationReport {
    pub output: OutputBuffer,
    pub termination: Termination,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
}

impl InvocationReport {
    pub fn output_bytes(&self) -> &[u8] {
        self.output.written()
    }

    pub fn into_output(self) -> Vec<u8> {
        self.output.into_written()
    }

    pub fn completed(&self) -> bool {
        matches!(self.termination, Termination::Completed)
    }

    pub fn fault(&self) -> Option<&FaultReport> {
        self.termination.fault()
    }

    pub fn state(&self) -> BarrierState {
        self.termination.final_state()
    }

    /// For hosts that treat a faulted module as an error; output stays on the report.
    pub fn ensure_completed(&self) -> Result<(), Error> {
        match self.fault() {
            None => Ok(()),
            Some(fault) => Err(Error::new(ErrorKind::Fault)
                .with_message(fault.to_string())
                .with_hint("Partial module output is still available on the report.")),
        }
    }

    pub fn started_at_rfc3339(&self) -> Result<String, Error> {
        self.started_at.format(&Rfc3339).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("timestamp format failed")
                .with_source(err)
        })
    }
}

impl fmt::Display for InvocationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BStr::new(self.output_bytes()))?;
        if let Some(fault) = self.fault() {
            write!(f, "\n{fault}")?;
        }
        Ok(())
    }
}

/// Host-side entry point: validated config plus a way to run modules with it.
#[derive(Clone, Debug)]
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, Error> {
        config.validate()?;
        config.apply_debug();
        Ok(Self { config })
    }

    /// Defaults with `OBJRUN_*` environment overrides applied.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(RuntimeConfig::default().with_env_overrides()?)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn invoke(&self, module: &mut dyn Module, args: &[u8]) -> Result<InvocationReport, Error> {
        Invocation::new(&self.config, args)?.run(module)
    }
}
