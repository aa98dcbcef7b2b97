//! UBI volume backend: resolves an `mtd:volname` or `ubi:volname` path to
//! a concrete `/dev/ubiD_V` device, auto-attaching the MTD partition if
//! no UBI device is already bound to it, then reads/writes the volume in
//! a single syscall primed by the volume-update ioctl.
//!
//! Grounded in `libubootenv_ubi_update_name`/`libubootenv_ubiread`/
//! `libubootenv_ubiwrite` in `uboot_mtd.c` of the reference implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use super::ioctl::{self, UbiAttachReq, UBI_DEV_NUM_AUTO};
use super::DeviceDescriptor;
use crate::error::{EnvError, Result};

const SYS_CLASS_UBI: &str = "/sys/class/ubi";
const DEVICE_UBI_CTRL: &str = "/dev/ubi_ctrl";

fn mtd_dev_id(mtd_path: &str) -> Option<i32> {
    let digits: String = mtd_path.rsplit('d').next()?.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn ubi_dev_id_from_mtd(mtd_num: i32) -> Option<i32> {
    let entries = fs::read_dir(SYS_CLASS_UBI).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_str()?;
        let ubi_num: i32 = name.strip_prefix("ubi")?.parse().ok()?;
        let mtd_num_path = format!("{}/{}/mtd_num", SYS_CLASS_UBI, name);
        if let Ok(text) = fs::read_to_string(&mtd_num_path) {
            if text.trim().parse::<i32>().ok() == Some(mtd_num) {
                return Some(ubi_num);
            }
        }
    }
    None
}

fn attach_mtd(mtd_num: i32) -> Result<i32> {
    let ctrl = OpenOptions::new()
        .read(true)
        .open(DEVICE_UBI_CTRL)
        .map_err(|_| EnvError::BadDevice("cannot open /dev/ubi_ctrl".into()))?;

    let mut req = UbiAttachReq {
        ubi_num: UBI_DEV_NUM_AUTO,
        mtd_num,
        vid_hdr_offset: 0,
        max_beb_per1024: 0,
        padding: [0; 10],
    };

    let attach_result = unsafe { ioctl::ubi_attach(ctrl.as_raw_fd(), &mut req) };
    match attach_result {
        Ok(_) => Ok(req.ubi_num),
        Err(nix::Error::EEXIST) => ubi_dev_id_from_mtd(mtd_num)
            .ok_or_else(|| EnvError::BadDevice("UBI attach race left no resolvable device".into())),
        Err(e) => Err(EnvError::BadDevice(format!("UBI_IOCATT failed: {}", e))),
    }
}

fn volume_count(ubi_num: i32) -> Option<u32> {
    let path = format!("{}/ubi{}/volumes_count", SYS_CLASS_UBI, ubi_num);
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn volume_name(ubi_num: i32, vol_id: u32) -> Option<String> {
    let path = format!("{}/ubi{}/ubi{}_{}/name", SYS_CLASS_UBI, ubi_num, ubi_num, vol_id);
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn volume_id_by_name(ubi_num: i32, volname: &str) -> Option<u32> {
    let count = volume_count(ubi_num)?;
    (0..count).find(|&id| volume_name(ubi_num, id).as_deref() == Some(volname))
}

/// Rewrite an `mtd:volname` or `ubiN:volname` path into the resolved
/// `/dev/ubiD_V` numeric form, auto-attaching the backing MTD partition
/// when no UBI device is bound to it yet.
pub fn resolve_volume_path(path: &Path) -> Result<PathBuf> {
    let text = path.to_string_lossy().to_string();
    let (device_part, volume) = text
        .split_once(':')
        .ok_or_else(|| EnvError::BadDevice(format!("'{}' has no volume name", text)))?;

    let ubi_num = if device_part.starts_with("/dev/mtd") {
        let mtd_num = mtd_dev_id(device_part)
            .ok_or_else(|| EnvError::BadDevice(format!("cannot parse MTD id from '{}'", device_part)))?;
        match ubi_dev_id_from_mtd(mtd_num) {
            Some(num) => num,
            None => attach_mtd(mtd_num)?,
        }
    } else {
        device_part
            .rsplit("ubi")
            .next()
            .and_then(|s| s.trim_start_matches('/').parse().ok())
            .ok_or_else(|| EnvError::BadDevice(format!("cannot parse UBI id from '{}'", device_part)))?
    };

    let vol_id = volume_id_by_name(ubi_num, volume)
        .ok_or_else(|| EnvError::BadDevice(format!("no UBI volume named '{}' on ubi{}", volume, ubi_num)))?;

    Ok(PathBuf::from(format!("/dev/ubi{}_{}", ubi_num, vol_id)))
}

pub fn read(dev: &DeviceDescriptor) -> Result<Vec<u8>> {
    let mut file = File::open(&dev.path)?;
    let mut buf = vec![0u8; dev.envsize as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write(dev: &DeviceDescriptor, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(&dev.path)?;
    let size = data.len() as i64;
    unsafe {
        ioctl::ubi_volume_update(file.as_raw_fd(), &size)
            .map_err(|e| EnvError::BadDevice(format!("UBI_IOCVOLUP failed: {}", e)))?;
    }
    file.write_all(data)?;
    Ok(())
}
