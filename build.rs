//! Purpose: Compile the fault-guard C trampoline used by the module fault barrier.
//! Role: Cargo build-script; configures `cc` inputs and rebuild triggers.
//! Invariants: The trampoline is only built for unix targets (`sigsetjmp`/`siglongjmp`).
//! Invariants: Produces an `objrun_fault_guard` object library linked into the Rust crate.
//! Invariants: Uses only Cargo-provided env vars (e.g. `CARGO_MANIFEST_DIR`).
use std::env;
use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let csrc_dir = manifest_dir.join("csrc");

    println!("cargo:rerun-if-changed=csrc/fault_guard.c");
    println!("cargo:rerun-if-changed=csrc/fault_guard.h");

    if env::var_os("CARGO_CFG_UNIX").is_none() {
        return;
    }

    let mut build = cc::Build::new();
    build
        .include(&csrc_dir)
        .file(csrc_dir.join("fault_guard.c"))
        .warnings(true);

    configure_guard_compiler(&mut build);

    build.compile("objrun_fault_guard");
}

fn configure_guard_compiler(build: &mut cc::Build) {
    build.flag_if_supported("-std=gnu11");
}
