//! Configuration intake: two equivalent producers of namespace
//! configuration that converge on the same [`Context`] construction path.
//!
//! The legacy line format is grounded in `libuboot_read_config` in
//! `uboot_env.c`; the structured document format is grounded in the YAML
//! event-state-machine in `extended_config.c`, reimplemented here with
//! `serde` + `serde_yaml` in place of the original's hand-rolled
//! `libyaml` walk.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::context::{Context, NamespaceSet};
use crate::device::{self, DeviceDescriptor, Offset};
use crate::error::{EnvError, Result};
use crate::flags;
use crate::store::VarEntry;

/// Single device entry shared by both adapters once parsed, before
/// [`device::check_env_device`] enriches it into a [`DeviceDescriptor`].
struct RawDevice {
    path: String,
    offset: i64,
    envsize: u64,
    sectorsize: u64,
    envsectors: u64,
    disable_lock: bool,
}

struct RawNamespace {
    name: String,
    size: u64,
    lockfile: Option<String>,
    devices: Vec<RawDevice>,
    writelist: Option<Vec<String>>,
}

/// Populate one or more namespaces from `path`, auto-detecting between
/// the structured document format and the legacy line format.
///
/// Per §4.6, after parsing, every device must pass
/// [`device::check_env_device`], and a two-device namespace must satisfy
/// the redundancy compatibility invariant of §3 — either failure fails
/// the whole load, matching the reference implementation returning a
/// single negative `errno` for the entire configuration file.
pub fn read_config(path: &str) -> Result<NamespaceSet> {
    let text = fs::read_to_string(path)?;
    let raw_namespaces = match parse_yaml(&text) {
        Ok(namespaces) => namespaces,
        Err(_) => parse_legacy(&text)?,
    };
    build_namespaces(raw_namespaces)
}

fn build_namespaces(raw: Vec<RawNamespace>) -> Result<NamespaceSet> {
    let mut contexts = Vec::with_capacity(raw.len());
    for ns in raw {
        let mut devices = Vec::with_capacity(ns.devices.len());
        for raw_dev in &ns.devices {
            let mut dev = DeviceDescriptor::new(
                device::normalize_device_path(&raw_dev.path),
                Offset::resolve_raw(raw_dev.offset),
                raw_dev.envsize,
            );
            dev.sectorsize = raw_dev.sectorsize;
            dev.envsectors = raw_dev.envsectors.max(1);
            dev.disable_mtd_lock = raw_dev.disable_lock;
            device::check_env_device(&mut dev)?;
            devices.push(dev);
        }

        if devices.len() == 2 && !device::check_compatible_devices(&devices[0], &devices[1]) {
            return Err(EnvError::InvalidArgument(format!(
                "namespace '{}': redundant devices are not compatible",
                ns.name
            )));
        }

        let mut ctx = Context::new(ns.name, ns.size, devices);
        if let Some(lockfile) = ns.lockfile {
            ctx.lockfile = PathBuf::from(lockfile);
        }
        if let Some(tokens) = ns.writelist {
            ctx.write_allowlist = Some(build_writelist(&tokens)?);
        }
        contexts.push(ctx);
    }
    Ok(NamespaceSet::new(contexts))
}

fn build_writelist(tokens: &[String]) -> Result<Vec<VarEntry>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(tokens.len());
    for token in tokens {
        let parsed = flags::parse_token(token).ok_or_else(|| {
            EnvError::InvalidArgument(format!("malformed writelist entry '{}'", token))
        })?;
        if !seen.insert(parsed.name.clone()) {
            return Err(EnvError::InvalidArgument(format!(
                "duplicate writelist entry for '{}'",
                parsed.name
            )));
        }
        entries.push(VarEntry {
            name: parsed.name,
            value: String::new(),
            data_type: parsed.data_type,
            access: parsed.access,
            range: parsed.range,
        });
    }
    Ok(entries)
}

impl Offset {
    /// Build an [`Offset`] from a raw signed value parsed out of either
    /// config format: negative means "relative to end of device" (§3),
    /// non-negative is an absolute byte offset.
    fn resolve_raw(value: i64) -> Offset {
        if value < 0 {
            Offset::FromEnd(value)
        } else {
            Offset::FromStart(value as u64)
        }
    }
}

// ---------------------------------------------------------------------
// Legacy line format
// ---------------------------------------------------------------------

/// Parse an integer the way `%lli` scanf-style base-prefix detection
/// does: an optional sign, then `0x`/`0X` selects hex, otherwise decimal.
fn parse_signed_autobase(token: &str) -> Option<i64> {
    let (sign, rest) = match token.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, token.strip_prefix('+').unwrap_or(token)),
    };
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        rest.parse::<i64>().ok()?
    };
    Some(sign * value)
}

/// Parse an integer the way `%lx` scanf does: plain hex digits, with an
/// optional `0x`/`0X` prefix tolerated.
fn parse_hex(token: &str) -> Option<u64> {
    let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")).unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

fn parse_legacy(text: &str) -> Result<Vec<RawNamespace>> {
    let mut devices = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            continue;
        }

        let offset = parse_signed_autobase(tokens[1]).ok_or_else(|| {
            EnvError::InvalidArgument(format!("bad offset in config line '{}'", line))
        })?;
        let envsize = parse_hex(tokens[2]).ok_or_else(|| {
            EnvError::InvalidArgument(format!("bad envsize in config line '{}'", line))
        })?;
        let sectorsize = tokens.get(3).and_then(|t| parse_hex(t)).unwrap_or(0);
        let envsectors = tokens.get(4).and_then(|t| parse_hex(t)).unwrap_or(1);
        // A sixth "disable-lock" column is not part of the upstream
        // legacy grammar but is honored here when present (§9 Open
        // Questions: treated as authoritative, non-breaking).
        let disable_lock = tokens.get(5).and_then(|t| t.parse::<u32>().ok()).unwrap_or(0) != 0;

        devices.push(RawDevice {
            path: tokens[0].to_string(),
            offset,
            envsize,
            sectorsize,
            envsectors,
            disable_lock,
        });

        if devices.len() >= 2 {
            break;
        }
    }

    if devices.is_empty() {
        return Err(EnvError::InvalidArgument(
            "configuration file has no usable device lines".into(),
        ));
    }

    let size = devices[0].envsize;
    Ok(vec![RawNamespace {
        name: "default".to_string(),
        size,
        lockfile: None,
        devices,
        writelist: None,
    }])
}

// ---------------------------------------------------------------------
// Structured (YAML) document format
// ---------------------------------------------------------------------

/// A YAML scalar that may be written as a native integer or as a
/// hex/decimal string; both forms are accepted the same way the
/// original's `libyaml` walk only ever sees scalars as text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FlexInt {
    Num(i64),
    Text(String),
}

impl FlexInt {
    fn resolve(&self) -> Option<i64> {
        match self {
            FlexInt::Num(n) => Some(*n),
            FlexInt::Text(s) => parse_signed_autobase(s.trim()),
        }
    }
}

/// `disablelock: yes|no` as the user actually writes it. YAML 1.1's core
/// schema reads an unquoted `yes`/`no` as a boolean rather than a string,
/// so both spellings have to be accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum YesNo {
    Bool(bool),
    Text(String),
}

impl YesNo {
    fn is_yes(&self) -> bool {
        match self {
            YesNo::Bool(b) => *b,
            YesNo::Text(s) => s.eq_ignore_ascii_case("yes"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct YamlDevice {
    path: String,
    #[serde(default)]
    offset: Option<FlexInt>,
    #[serde(default)]
    sectorsize: Option<FlexInt>,
    #[serde(default)]
    disablelock: Option<YesNo>,
}

#[derive(Debug, Deserialize)]
struct YamlNamespace {
    size: FlexInt,
    #[serde(default)]
    lockfile: Option<String>,
    devices: Vec<YamlDevice>,
    #[serde(default)]
    writelist: Option<Vec<String>>,
}

fn parse_yaml(text: &str) -> std::result::Result<Vec<RawNamespace>, serde_yaml::Error> {
    let mapping: serde_yaml::Mapping = serde_yaml::from_str(text)?;

    let mut namespaces = Vec::with_capacity(mapping.len());
    for (key, value) in mapping.into_iter() {
        let name = key
            .as_str()
            .ok_or_else(|| serde::de::Error::custom("namespace key is not a string"))?
            .to_string();
        let parsed: YamlNamespace = serde_yaml::from_value(value)?;

        let size = parsed
            .size
            .resolve()
            .filter(|v| *v >= 0)
            .ok_or_else(|| serde::de::Error::custom("namespace 'size' is not a valid integer"))?
            as u64;

        let mut devices = Vec::with_capacity(parsed.devices.len());
        for dev in parsed.devices {
            let offset = dev.offset.as_ref().and_then(FlexInt::resolve).unwrap_or(0);
            let sectorsize = dev
                .sectorsize
                .as_ref()
                .and_then(FlexInt::resolve)
                .unwrap_or(0)
                .max(0) as u64;
            let disable_lock = dev.disablelock.as_ref().map(YesNo::is_yes).unwrap_or(false);
            devices.push(RawDevice {
                path: dev.path,
                offset,
                envsize: size,
                sectorsize,
                envsectors: 1,
                disable_lock,
            });
        }

        namespaces.push(RawNamespace {
            name,
            size,
            lockfile: parsed.lockfile,
            devices,
            writelist: parsed.writelist,
        });
    }

    if namespaces.is_empty() {
        return Err(serde::de::Error::custom("document has no namespaces"));
    }
    Ok(namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_device_file(dir: &tempfile::TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn test_parse_signed_autobase() {
        assert_eq!(parse_signed_autobase("0x1000"), Some(0x1000));
        assert_eq!(parse_signed_autobase("-0x1000"), Some(-0x1000));
        assert_eq!(parse_signed_autobase("4096"), Some(4096));
        assert_eq!(parse_signed_autobase("-4096"), Some(-4096));
    }

    #[test]
    fn test_parse_hex_tolerates_prefix() {
        assert_eq!(parse_hex("20000"), Some(0x20000));
        assert_eq!(parse_hex("0x20000"), Some(0x20000));
    }

    #[test]
    fn test_legacy_single_device() {
        let dir = tempfile::tempdir().unwrap();
        let devpath = make_device_file(&dir, "env.bin", 0x2000);
        let text = format!("{} 0x0 0x2000 0x1000 0x1\n", devpath.display());
        let raw = parse_legacy(&text).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].devices.len(), 1);
        assert_eq!(raw[0].size, 0x2000);
    }

    #[test]
    fn test_legacy_two_devices_implies_redundant() {
        let dir = tempfile::tempdir().unwrap();
        let dev0 = make_device_file(&dir, "env0.bin", 0x1000);
        let dev1 = make_device_file(&dir, "env1.bin", 0x1000);
        let text = format!(
            "{} 0x0 0x1000 0x1000 0x1\n{} 0x0 0x1000 0x1000 0x1\n",
            dev0.display(),
            dev1.display()
        );
        let raw = parse_legacy(&text).unwrap();
        assert_eq!(raw[0].devices.len(), 2);
    }

    #[test]
    fn test_legacy_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let devpath = make_device_file(&dir, "env.bin", 0x2000);
        let text = format!("# a comment\n{} 0x0 0x2000 0x1000 0x1\n", devpath.display());
        let raw = parse_legacy(&text).unwrap();
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn test_yaml_single_namespace_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let devpath = make_device_file(&dir, "env.bin", 0x2000);
        let cfg_path = dir.path().join("fw_env.config");
        let mut f = std::fs::File::create(&cfg_path).unwrap();
        write!(
            f,
            "default:\n  size: 0x2000\n  devices:\n    - path: {}\n      offset: 0x0\n      sectorsize: 0x1000\n",
            devpath.display()
        )
        .unwrap();

        let namespaces = read_config(cfg_path.to_str().unwrap()).unwrap();
        assert_eq!(namespaces.len(), 1);
        let ctx = namespaces.get_namespace("default").unwrap();
        assert_eq!(ctx.size, 0x2000);
    }

    #[test]
    fn test_yaml_writelist_duplicate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let devpath = make_device_file(&dir, "env.bin", 0x2000);
        let cfg_path = dir.path().join("fw_env.config");
        let mut f = std::fs::File::create(&cfg_path).unwrap();
        write!(
            f,
            "default:\n  size: 0x2000\n  devices:\n    - path: {}\n  writelist:\n    - foo:ro\n    - foo:da\n",
            devpath.display()
        )
        .unwrap();

        let result = read_config(cfg_path.to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_writelist_builds_validator_entries() {
        let dir = tempfile::tempdir().unwrap();
        let devpath = make_device_file(&dir, "env.bin", 0x2000);
        let cfg_path = dir.path().join("fw_env.config");
        let mut f = std::fs::File::create(&cfg_path).unwrap();
        write!(
            f,
            "default:\n  size: 0x2000\n  devices:\n    - path: {}\n  writelist:\n    - bootdelay:da@0-10\n",
            devpath.display()
        )
        .unwrap();

        let namespaces = read_config(cfg_path.to_str().unwrap()).unwrap();
        let ctx = namespaces.get_namespace("default").unwrap();
        let list = ctx.write_allowlist.as_ref().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "bootdelay");
    }

    #[test]
    fn test_legacy_fallback_when_not_yaml_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let devpath = make_device_file(&dir, "env.bin", 0x2000);
        let cfg_path = dir.path().join("fw_env.config");
        let text = format!("{} 0x0 0x2000 0x1000 0x1\n", devpath.display());
        std::fs::write(&cfg_path, &text).unwrap();

        let namespaces = read_config(cfg_path.to_str().unwrap()).unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces.get_namespace("default").unwrap().size, 0x2000);
    }
}
