//! # ubootenv
//!
//! Read, mutate, and atomically persist a bootloader's key/value
//! *environment*: a single CRC-32-protected blob living at a fixed
//! offset of a regular file, a raw NOR/NAND MTD character device, or a
//! UBI volume. Optionally keeps two redundant copies on separate
//! devices and flips an on-media generation marker so a reader always
//! sees a coherent environment even if power is lost mid-write.
//!
//! ## Quick start
//!
//! ```no_run
//! use ubootenv::config;
//!
//! let mut namespaces = config::read_config("/etc/fw_env.config")?;
//! let ctx = namespaces.get_namespace_mut("default").unwrap();
//! ctx.open().ok();
//! ctx.set("bootdelay", Some("3"))?;
//! ctx.store_env()?;
//! ctx.close();
//! # Ok::<(), ubootenv::error::EnvError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] — the on-media block layout: CRC header, optional
//!   generation flag, and the packed `name=value\0` record stream.
//! - [`store`] — the in-memory, lexicographically ordered variable
//!   database with typed access-control attributes.
//! - [`redundancy`] — pure selection logic deciding which of two
//!   copies is current.
//! - [`device`] — the file/MTD/UBI backend abstraction.
//! - [`context`] — namespace lifecycle: lock, load, get/set, store,
//!   close.
//! - [`config`] — legacy line-format and structured YAML configuration
//!   intake, both converging on [`context::Context`] construction.
//! - [`flags`] — the `.flags` pseudo-variable and write-allowlist
//!   token grammar shared by the codec and the config adapters.
//! - [`importer`] — `name=value` file/script/stdin import.
//! - [`device_tree`] — namespace hint from the device tree chosen node.
//! - [`cli`] — shared argument parsing and execution for the
//!   `fw_printenv`/`fw_setenv` front-ends.

pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod device;
pub mod device_tree;
pub mod error;
pub mod flags;
pub mod importer;
pub mod redundancy;
pub mod store;
pub mod version;

pub use error::{EnvError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_nonempty() {
        assert!(!version::version_info().version.is_empty());
    }
}
