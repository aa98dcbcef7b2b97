//! Shared argument parsing and execution for the `fw_printenv`/`fw_setenv`
//! front-ends.
//!
//! Grounded in `fw_printenv.c`: the two programs share everything but the
//! final branch on `is_setenv`, which there is decided by `argv[0]` and
//! here is decided by which `[[bin]]` target was built (§6 ADDED note).

use clap::Parser;

use crate::config;
use crate::context::Context;
use crate::device_tree;
use crate::error::EnvError;
use crate::importer;
use crate::version;

const DEFAULT_CFG_FILE: &str = "/etc/fw_env.config";
const DEFAULT_ENV_FILE: &str = "/etc/u-boot-initial-env";

/// Options common to both personalities.
#[derive(Parser, Debug)]
pub struct CommonArgs {
    /// Configuration file (old fw_env.config)
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CFG_FILE)]
    pub config: String,

    /// Default environment if no valid copy is found
    #[arg(short = 'f', long = "defenv", default_value = DEFAULT_ENV_FILE)]
    pub defenv: String,

    /// Namespace to operate on, when the configuration defines more than one
    #[arg(short = 'm', long = "namespace")]
    pub namespace: Option<String>,

    /// Print version and exit
    #[arg(short = 'V', long = "version", action = clap::ArgAction::SetTrue)]
    pub version: bool,
}

#[derive(Parser, Debug)]
#[command(name = "fw_printenv", disable_version_flag = true)]
pub struct PrintArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not print variable names, only values
    #[arg(short = 'n', long = "no-header")]
    pub no_header: bool,

    /// Variables to print; prints all when empty
    pub names: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(name = "fw_setenv", disable_version_flag = true)]
pub struct SetArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Read variables to set from a script file (or "-" for stdin)
    #[arg(short = 's', long = "script")]
    pub script: Option<String>,

    /// key [value] pairs; an odd trailing key removes that variable
    pub pairs: Vec<String>,
}

/// Resolve the configured namespace set and open the one a caller asked
/// for (explicitly via `-m`, or via the device-tree hint, or the first
/// configured namespace). On [`EnvError::NoData`] the defaults file is
/// imported instead and `default_used` is reported, matching
/// `fw_printenv.c`'s fallback around `libuboot_open`.
fn open_namespace(common: &CommonArgs) -> Result<(Context, bool), i32> {
    let mut namespaces = config::read_config(&common.config).map_err(|e| {
        eprintln!("Configuration file wrong or corrupted");
        e.exit_code()
    })?;

    let chosen_name = common
        .namespace
        .clone()
        .or_else(device_tree::namespace_from_device_tree);

    let ctx = match chosen_name {
        Some(name) => namespaces.get_namespace_mut(&name).ok_or_else(|| {
            eprintln!("Unknown namespace '{}'", name);
            EnvError::InvalidArgument(name.clone()).exit_code()
        })?,
        None => namespaces
            .default_namespace_mut()
            .ok_or_else(|| {
                eprintln!("No namespace configured");
                EnvError::InvalidArgument("empty configuration".into()).exit_code()
            })?,
    };

    // Context has to outlive `namespaces`; move it out by swapping in a
    // throwaway via mem::take-like extraction is not possible across the
    // borrow, so namespaces is consumed into the single context we use.
    let mut ctx = std::mem::replace(ctx, Context::new("", 0, Vec::new()));

    let default_used = match ctx.open() {
        Ok(()) => false,
        Err(EnvError::NoData) => {
            eprintln!("Cannot read environment, using default");
            if let Err(e) = importer::load_file(&mut ctx, &common.defenv) {
                eprintln!("Cannot read default environment from file");
                return Err(e.exit_code());
            }
            true
        }
        Err(e) => {
            eprintln!("Cannot read environment, using default");
            return Err(e.exit_code());
        }
    };

    Ok((ctx, default_used))
}

/// Run the "print" personality: list all variables, or the ones named on
/// the command line, honoring `-n`. Returns the process exit code.
pub fn run_print(args: PrintArgs) -> i32 {
    if args.common.version {
        println!("{}", version::version_info().version);
        return 0;
    }

    let (ctx, _default_used) = match open_namespace(&args.common) {
        Ok(pair) => pair,
        Err(code) => return code,
    };

    if args.names.is_empty() {
        for entry in ctx.iter() {
            println!("{}={}", entry.name, entry.value);
        }
    } else {
        for name in &args.names {
            let value = ctx.get(name).unwrap_or_default();
            if args.no_header {
                println!("{}", value);
            } else {
                println!("{}={}", name, value);
            }
        }
    }

    0
}

/// Run the "set" personality: apply a script file and/or `key [value]`
/// argument pairs, then store if anything changed. Returns the process
/// exit code.
pub fn run_set(args: SetArgs) -> i32 {
    if args.common.version {
        println!("{}", version::version_info().version);
        return 0;
    }

    let (mut ctx, default_used) = match open_namespace(&args.common) {
        Ok(pair) => pair,
        Err(code) => return code,
    };

    let mut need_store = false;

    if let Some(script) = &args.script {
        if let Err(e) = importer::load_file(&mut ctx, script) {
            eprintln!("Cannot read script file: {}", e);
            return e.exit_code();
        }
        need_store = true;
    } else {
        let mut pairs = args.pairs.iter();
        while let Some(key) = pairs.next() {
            let value = pairs.next();
            let current = ctx.get(key);
            match value {
                None => {
                    if current.is_some() {
                        if let Err(e) = ctx.set(key, None) {
                            eprintln!("fw_setenv failed: {}", e);
                            return e.exit_code();
                        }
                        need_store = true;
                    }
                }
                Some(new_value) => {
                    if current.as_deref() != Some(new_value.as_str()) {
                        if let Err(e) = ctx.set(key, Some(new_value)) {
                            eprintln!("fw_setenv failed: {}", e);
                            return e.exit_code();
                        }
                        need_store = true;
                    }
                }
            }
        }
    }

    if need_store || default_used {
        if let Err(e) = ctx.store_env() {
            eprintln!("Error storing the env: {}", e);
            return e.exit_code();
        }
    }

    ctx.close();
    0
}
