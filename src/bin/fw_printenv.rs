//! Thin front-end that prints variables from a bootloader environment.
//!
//! Grounded in `fw_printenv.c` from the reference implementation: argument
//! parsing, exit-code mapping, and I/O only, over [`ubootenv::cli`].

use clap::Parser;
use ubootenv::cli::PrintArgs;

fn main() {
    env_logger::init();
    let args = PrintArgs::parse();
    std::process::exit(ubootenv::cli::run_print(args));
}
