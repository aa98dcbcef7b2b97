//! Thin front-end that sets or removes variables in a bootloader
//! environment.
//!
//! Grounded in `fw_setenv.c` from the reference implementation: the
//! "print" and "set" personalities are the same program dispatched by
//! `argv[0]` via a symlink upstream; here they are simply two `[[bin]]`
//! targets sharing [`ubootenv::cli`].

use clap::Parser;
use ubootenv::cli::SetArgs;

fn main() {
    env_logger::init();
    let args = SetArgs::parse();
    std::process::exit(ubootenv::cli::run_set(args));
}
