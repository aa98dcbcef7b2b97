//! MTD character-device backend: reads and writes a logical environment
//! region made up of one or more consecutive erase blocks, skipping bad
//! blocks on NAND and driving the unlock/erase/write/lock cycle manually
//! (NOR/NAND flash cannot be overwritten in place without erasing first).
//!
//! Grounded in `uboot_mtd.c`'s `flash_io`/`flash_write_buffer` paths from
//! the reference implementation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;

use super::ioctl::{self, EraseInfoUser, MtdInfoUser};
use super::{BackendKind, DeviceDescriptor, Offset};
use crate::error::{EnvError, Result};

fn byte_offset(dev: &DeviceDescriptor) -> Result<u64> {
    match dev.offset {
        Offset::FromStart(value) => Ok(value),
        Offset::FromEnd(_) => Err(EnvError::InvalidArgument(
            "device offset was never resolved against block size".into(),
        )),
    }
}

pub fn get_info(file: &File) -> Result<MtdInfoUser> {
    let mut info = MtdInfoUser::default();
    unsafe {
        ioctl::mtd_get_info(file.as_raw_fd(), &mut info)
            .map_err(|e| EnvError::BadDevice(format!("MEMGETINFO failed: {}", e)))?;
    }
    Ok(info)
}

fn is_bad_block(file: &File, is_nand: bool, offset: u64) -> Result<bool> {
    if !is_nand {
        return Ok(false);
    }
    let mut loc = offset as i64;
    let bad = unsafe {
        ioctl::mtd_get_bad_block(file.as_raw_fd(), &mut loc)
            .map_err(|e| EnvError::BadDevice(format!("MEMGETBADBLOCK failed: {}", e)))?
    };
    Ok(bad != 0)
}

/// Slot offsets, in budget order, to attempt for this device's copy.
/// Not all slots are necessarily good blocks; callers consult
/// `is_bad_block` per slot and skip bad ones without spending transfer
/// progress on them.
fn block_slots(dev: &DeviceDescriptor, base: u64) -> Vec<u64> {
    (0..dev.envsectors.max(1))
        .map(|i| base + i * dev.sectorsize)
        .collect()
}

pub fn read(dev: &DeviceDescriptor) -> Result<Vec<u8>> {
    let base = byte_offset(dev)?;
    let is_nand = dev.backend == Some(BackendKind::MtdNand);
    let file = OpenOptions::new().read(true).open(&dev.path)?;

    let mut out = Vec::with_capacity(dev.envsize as usize);
    for slot in block_slots(dev, base) {
        if out.len() as u64 >= dev.envsize {
            break;
        }
        if is_bad_block(&file, is_nand, slot)? {
            continue;
        }
        let want = (dev.envsize - out.len() as u64).min(dev.sectorsize) as usize;
        let mut chunk = vec![0u8; want];
        let mut f = &file;
        f.seek(SeekFrom::Start(slot))?;
        f.read_exact(&mut chunk)?;
        out.extend_from_slice(&chunk);
    }

    if (out.len() as u64) < dev.envsize {
        return Err(EnvError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "exhausted the allotted erase blocks before reading the full environment",
        )));
    }
    Ok(out)
}

pub fn write(dev: &DeviceDescriptor, data: &[u8]) -> Result<()> {
    let base = byte_offset(dev)?;
    let is_nand = dev.backend == Some(BackendKind::MtdNand);
    let file = OpenOptions::new().read(true).write(true).open(&dev.path)?;

    let mut written = 0usize;
    for slot in block_slots(dev, base) {
        if written >= data.len() {
            break;
        }
        if is_bad_block(&file, is_nand, slot)? {
            continue;
        }
        let want = (data.len() - written).min(dev.sectorsize as usize);
        write_block(&file, slot, dev.sectorsize, &data[written..written + want], dev.disable_mtd_lock)?;
        written += want;
    }

    if written < data.len() {
        return Err(EnvError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "exhausted the allotted erase blocks before writing the full environment",
        )));
    }
    Ok(())
}

fn write_block(file: &File, offset: u64, sectorsize: u64, chunk: &[u8], disable_lock: bool) -> Result<()> {
    let erase_info = EraseInfoUser {
        start: offset as u32,
        length: sectorsize as u32,
    };

    if !disable_lock {
        unsafe {
            ioctl::mtd_unlock(file.as_raw_fd(), &erase_info)
                .map_err(|e| EnvError::BadDevice(format!("MEMUNLOCK failed: {}", e)))?;
        }
    }

    unsafe {
        ioctl::mtd_erase(file.as_raw_fd(), &erase_info)
            .map_err(|e| EnvError::BadDevice(format!("MEMERASE failed: {}", e)))?;
    }

    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(chunk)?;

    if !disable_lock {
        unsafe {
            ioctl::mtd_lock(file.as_raw_fd(), &erase_info)
                .map_err(|e| EnvError::BadDevice(format!("MEMLOCK failed: {}", e)))?;
        }
    }
    Ok(())
}

/// NOR-only: flip a single byte from 0xFF to 0x00 without erasing. The
/// erase block must still be unlocked first and relocked afterward.
pub fn write_obsolete_flag(dev: &DeviceDescriptor, flag_offset: u64) -> Result<()> {
    let base = byte_offset(dev)?;
    let target = base + flag_offset;
    let block_start = target - (target - base) % dev.sectorsize.max(1);
    let erase_info = EraseInfoUser {
        start: block_start as u32,
        length: dev.sectorsize as u32,
    };

    let file = OpenOptions::new().read(true).write(true).open(&dev.path)?;
    if !dev.disable_mtd_lock {
        unsafe {
            ioctl::mtd_unlock(file.as_raw_fd(), &erase_info)
                .map_err(|e| EnvError::BadDevice(format!("MEMUNLOCK failed: {}", e)))?;
        }
    }

    let mut f = &file;
    f.seek(SeekFrom::Start(target))?;
    f.write_all(&[0x00])?;

    if !dev.disable_mtd_lock {
        unsafe {
            ioctl::mtd_lock(file.as_raw_fd(), &erase_info)
                .map_err(|e| EnvError::BadDevice(format!("MEMLOCK failed: {}", e)))?;
        }
    }
    Ok(())
}
