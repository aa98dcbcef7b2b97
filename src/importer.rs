//! File/flags importer: parses a text file (or standard input) of
//! `name=value` lines into the variable store, used both for seeding a
//! fresh environment from a default-environment file and for `fw_setenv
//! -s`'s script argument.
//!
//! Grounded in U-Boot's `libuboot_load_file`: comment lines (`#`), empty
//! lines, and lines without `=` are skipped; trailing `\n`/`\r` are
//! stripped before the `=` split.

use std::fs::File;
use std::io::{self, BufRead, BufReader};

use crate::context::Context;
use crate::error::Result;

/// Read `name=value` lines from `path` (or standard input, when `path`
/// is `"-"`) and apply each as a `set` on `ctx`. Lines beginning with
/// `#`, blank lines, and lines without an `=` are skipped; a line whose
/// value is empty drops the variable, matching `set(ctx, name, None)`.
///
/// Per-line `set` failures (e.g. a read-only target) are not
/// propagated as a whole-file failure — matching U-Boot's own
/// `libuboot_set_env`, whose return value the import loop ignores
/// while it keeps going.
pub fn load_file(ctx: &mut Context, path: &str) -> Result<()> {
    if path == "-" {
        let stdin = io::stdin();
        apply_lines(ctx, stdin.lock())
    } else {
        let file = File::open(path)?;
        apply_lines(ctx, BufReader::new(file))
    }
}

fn apply_lines<R: BufRead>(ctx: &mut Context, reader: R) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, value) = match line.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        let to_set = if value.is_empty() { None } else { Some(value) };
        let _ = ctx.set(name, to_set);
    }
    Ok(())
}
