//! Namespace context: owns one or two device descriptors, the variable
//! store, and the process-level lock, and drives the open/load/store/
//! close lifecycle.
//!
//! Grounded in U-Boot's `libuboot_open`/`libuboot_load`/
//! `libuboot_env_store`/`libuboot_close`; the advisory lock uses
//! `nix::fcntl::Flock`, the same API `libipam`'s own disk-backed lock
//! file uses.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use log::{debug, trace, warn};
use nix::fcntl::{Flock, FlockArg};

use crate::codec;
use crate::device::{self, DeviceDescriptor};
use crate::error::{EnvError, Result};
use crate::flags;
use crate::redundancy::{self, FlagPolicy, Selection};
use crate::store::{VarEntry, VarStore};

pub const DEFAULT_LOCKFILE: &str = "/var/lock/fw_printenv.lock";

/// Current lifecycle state of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Configured,
    Open,
    Closed,
}

/// A named environment namespace: configuration plus, once open, the
/// loaded store and the held lock.
pub struct Context {
    pub name: String,
    pub size: u64,
    pub lockfile: PathBuf,
    pub devices: Vec<DeviceDescriptor>,
    pub write_allowlist: Option<Vec<VarEntry>>,

    state: State,
    valid: bool,
    current: usize,
    /// Generation flag byte of the currently selected copy, tracked so the
    /// next `store_env` can derive a correctly incremented (and
    /// 0xFF/0x00-wrapping) value rather than a fixed constant.
    current_flag: u8,
    store: VarStore,
    lock: Option<Flock<std::fs::File>>,
}

impl Context {
    pub fn new(name: impl Into<String>, size: u64, devices: Vec<DeviceDescriptor>) -> Self {
        Context {
            name: name.into(),
            size,
            lockfile: PathBuf::from(DEFAULT_LOCKFILE),
            devices,
            write_allowlist: None,
            state: State::Configured,
            valid: false,
            current: 0,
            current_flag: 0,
            store: VarStore::new(),
            lock: None,
        }
    }

    pub fn is_redundant(&self) -> bool {
        self.devices.len() == 2
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn flag_policy(&self) -> FlagPolicy {
        self.devices[0].flag_policy.unwrap_or(FlagPolicy::Incremental)
    }

    /// Acquire the namespace lock and load both copies, selecting the
    /// current one. Re-opening a previously closed context is legal.
    ///
    /// Returns [`EnvError::NoData`] when no copy passed CRC verification;
    /// the lock is still held and the context is still `Open` in that
    /// case, so a caller can seed defaults via [`crate::importer::load_file`]
    /// and call [`Context::store_env`] in response.
    pub fn open(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o666)
            .open(&self.lockfile)
            .map_err(|e| EnvError::Busy(format!("cannot create lock file: {}", e)))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| EnvError::Io(std::io::Error::from(e)))?;
        self.lock = Some(lock);

        self.load()?;
        self.state = State::Open;

        // Matching `libuboot_open`'s `-ENODATA` return: the context is
        // still open (lock held, ready for `load_file` + `store`) even
        // though the load itself is reported as a failure to the caller.
        if !self.valid {
            return Err(EnvError::NoData);
        }
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        self.valid = false;
        self.store = VarStore::new();

        let redundant = self.is_redundant();
        let decoded: Vec<_> = self
            .devices
            .iter()
            .map(|dev| device::read_copy(dev).and_then(|raw| codec::decode(&raw, redundant)))
            .collect::<Result<Vec<_>>>()?;

        let selection = if redundant {
            let crc_ok = [decoded[0].crc_ok, decoded[1].crc_ok];
            let flag = [decoded[0].flag.unwrap_or(0), decoded[1].flag.unwrap_or(0)];
            redundancy::select_redundant(crc_ok, flag, self.flag_policy())
        } else {
            redundancy::select_single(decoded[0].crc_ok)
        };

        debug!(
            "namespace '{}': selected copy {} (valid={})",
            self.name, selection.current, selection.valid
        );

        self.apply_selection(selection, &decoded)?;
        Ok(())
    }

    fn apply_selection(&mut self, selection: Selection, decoded: &[codec::DecodedBlock]) -> Result<()> {
        self.current = selection.current;
        self.valid = selection.valid;
        if !selection.valid {
            warn!("namespace '{}': no copy passed CRC verification", self.name);
            return Ok(());
        }

        let block = &decoded[selection.current];
        self.current_flag = block.flag.unwrap_or(0);
        let mut flags_value: Option<String> = None;
        for (name, value) in &block.records {
            if name == ".flags" {
                flags_value = Some(value.clone());
                continue;
            }
            self.store.insert_raw(VarEntry {
                name: name.clone(),
                value: value.clone(),
                data_type: Default::default(),
                access: Default::default(),
                range: Default::default(),
            });
        }
        if let Some(value) = &flags_value {
            trace!("namespace '{}': .flags = {}", self.name, value);
            flags::apply_flags_record(&mut self.store, value);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.store.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VarEntry> {
        self.store.iter()
    }

    /// Set (or, with `value = None`, remove) a variable, honoring the
    /// write-allowlist when one is configured.
    pub fn set(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        let validator = self.resolve_validator(name)?;
        self.store.set(name, value, validator.as_ref())
    }

    fn resolve_validator(&self, name: &str) -> Result<Option<VarEntry>> {
        match &self.write_allowlist {
            None => Ok(None),
            Some(list) => list
                .iter()
                .find(|entry| entry.name == name)
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    EnvError::PermissionDenied(format!(
                        "'{}' is not present in the write-allowlist",
                        name
                    ))
                }),
        }
    }

    /// Serialize the store, write it to the inactive copy, obsolete the
    /// old copy (boolean policy only), and flip `current`.
    pub fn store_env(&mut self) -> Result<()> {
        let target = if self.is_redundant() {
            redundancy::write_target(self.current)
        } else {
            0
        };

        let flag_byte = if self.is_redundant() {
            Some(next_generation_byte(self.flag_policy(), self.current_flag))
        } else {
            None
        };

        let encoded = codec::encode(&self.store, self.size as usize, flag_byte)?;
        device::write_copy(&self.devices[target], &encoded)?;

        if self.is_redundant() && self.flag_policy() == FlagPolicy::Boolean {
            device::write_obsolete_flag(&self.devices[self.current], 4)?;
        }

        self.current = target;
        self.valid = true;
        if let Some(flag) = flag_byte {
            self.current_flag = flag;
        }
        debug!("namespace '{}': stored to copy {}", self.name, target);
        Ok(())
    }

    /// Release the lock, empty the store, and clear validity. The
    /// configuration (devices, size, allowlist) is preserved, so the
    /// context can legally be reopened.
    pub fn close(&mut self) {
        self.valid = false;
        self.store = VarStore::new();
        self.lock = None; // Flock::unlock on drop
        self.state = State::Closed;
    }
}

/// The flag byte to stamp on the copy about to be written. Boolean policy
/// (NOR) only distinguishes "obsolete" (0xFF) from "active" and is happy
/// with any fixed active value; incremental policy must move strictly
/// forward, wrapping 0xFF back to 0x00, for the selector's `flag[0] >=
/// flag[1]` comparison to keep picking the copy just written.
fn next_generation_byte(policy: FlagPolicy, current_flag: u8) -> u8 {
    match policy {
        FlagPolicy::Boolean => 0x01,
        FlagPolicy::Incremental => current_flag.wrapping_add(1),
    }
}

/// The collection of namespaces produced by [`crate::config::read_config`],
/// standing in for U-Boot's `ctxlist` array that every `uboot_ctx` keeps a
/// pointer back to. `get_namespace` is the only operation the C API
/// exposes over it.
#[derive(Default)]
pub struct NamespaceSet {
    contexts: Vec<Context>,
}

impl NamespaceSet {
    pub fn new(contexts: Vec<Context>) -> Self {
        NamespaceSet { contexts }
    }

    /// Look up a namespace by name.
    pub fn get_namespace(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|ctx| ctx.name == name)
    }

    /// Mutable lookup, for `open`/`set`/`store` against a chosen namespace.
    pub fn get_namespace_mut(&mut self, name: &str) -> Option<&mut Context> {
        self.contexts.iter_mut().find(|ctx| ctx.name == name)
    }

    /// The first configured namespace, used when a caller has no explicit
    /// `-m` option and no device-tree hint resolved to a name.
    pub fn default_namespace_mut(&mut self) -> Option<&mut Context> {
        self.contexts.first_mut()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.iter()
    }

    /// Release a namespace's name and lock-file path from this collection
    /// entirely, matching `libuboot_exit`'s walk over `ctxlist`. The
    /// context must already be closed; its lock, if still held, is
    /// released as this `Context` is dropped. Returns `true` if a
    /// namespace with this name was found and removed.
    pub fn dispose(&mut self, name: &str) -> bool {
        let before = self.contexts.len();
        self.contexts.retain(|ctx| ctx.name != name);
        self.contexts.len() != before
    }
}
