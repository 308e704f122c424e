//! Purpose: Process-wide debug gate and tracing setup for module diagnostics.
//! Exports: `set_enabled`, `enabled`, `hexdump`, `init_tracing`, `diag!`.
//! Role: Debug sink for the runtime; replaces ad-hoc printf-style debugging.
//! Invariants: The gate is off by default; gated text is never formatted while off.
//! Invariants: Fault reports bypass the gate and are always logged at `error`.
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn set_enabled(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Emits a `debug` event only while the gate is on.
macro_rules! diag {
    ($($arg:tt)*) => {
        if $crate::core::diag::enabled() {
            tracing::debug!($($arg)*);
        }
    };
}
pub(crate) use diag;

/// Space-separated lowercase hex, as produced for gated byte dumps.
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn hexdump(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }
    tracing::debug!(label, len = bytes.len(), hex = %hex_string(bytes), "hexdump");
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
