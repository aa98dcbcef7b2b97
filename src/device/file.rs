//! Regular-file backend: read/write the environment at a byte offset
//! using ordinary seek+read/write, with the MMC boot-partition
//! read-only toggle worked around via sysfs.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DeviceDescriptor, Offset};
use crate::error::{EnvError, Result};

static MMC_BOOT_PARTITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/dev(?:/block)?/mmcblk(\d+)boot(\d+)$").unwrap());

fn byte_offset(dev: &DeviceDescriptor) -> Result<u64> {
    match dev.offset {
        Offset::FromStart(value) => Ok(value),
        Offset::FromEnd(_) => Err(EnvError::InvalidArgument(
            "device offset was never resolved against block size".into(),
        )),
    }
}

fn force_ro_path(path: &Path) -> Option<std::path::PathBuf> {
    let text = path.to_str()?;
    let caps = MMC_BOOT_PARTITION.captures(text)?;
    Some(std::path::PathBuf::from(format!(
        "/sys/block/mmcblk{}boot{}/force_ro",
        &caps[1], &caps[2]
    )))
}

fn set_force_ro(path: &Path, value: bool) {
    if let Some(sysfs_path) = force_ro_path(path) {
        let _ = fs::write(&sysfs_path, if value { b"1" } else { b"0" });
    }
}

pub fn read(dev: &DeviceDescriptor) -> Result<Vec<u8>> {
    let offset = byte_offset(dev)?;
    let mut file = OpenOptions::new()
        .read(true)
        .open(&dev.path)
        .map_err(EnvError::Io)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; dev.envsize as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write(dev: &DeviceDescriptor, data: &[u8]) -> Result<()> {
    let offset = byte_offset(dev)?;
    set_force_ro(&dev.path, false);

    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&dev.path)
            .map_err(EnvError::Io)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();

    set_force_ro(&dev.path, true);
    result
}

/// Stamp a single obsolete-marker byte on this copy's flag offset.
/// Files have no erase semantics; this is a plain single-byte rewrite
/// used only when the file backend stands in for NOR-like behavior in
/// tests or simulation.
pub fn write_obsolete_flag(dev: &DeviceDescriptor, flag_offset: u64) -> Result<()> {
    let base = byte_offset(dev)?;
    set_force_ro(&dev.path, false);
    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&dev.path)
            .map_err(EnvError::Io)?;
        file.seek(SeekFrom::Start(base + flag_offset))?;
        file.write_all(&[0x00])?;
        file.sync_all()?;
        Ok(())
    })();
    set_force_ro(&dev.path, true);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_read_write_roundtrip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut f = tmp.reopen().unwrap();
        f.write_all(&[0u8; 4096]).unwrap();

        let dev = DeviceDescriptor::new(tmp.path(), Offset::FromStart(0), 4096);
        write(&dev, &[0xAB; 4096]).unwrap();
        let data = read(&dev).unwrap();
        assert_eq!(data, vec![0xABu8; 4096]);
    }

    #[test]
    fn test_unresolved_offset_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let dev = DeviceDescriptor::new(tmp.path(), Offset::FromEnd(-4096), 4096);
        assert!(read(&dev).is_err());
    }

    #[test]
    fn test_mmc_boot_partition_regex() {
        assert!(force_ro_path(Path::new("/dev/mmcblk0boot1")).is_some());
        assert!(force_ro_path(Path::new("/dev/block/mmcblk2boot0")).is_some());
        assert!(force_ro_path(Path::new("/dev/sda1")).is_none());
    }
}
