//! Raw ioctl definitions for the MTD and UBI subsystems, wrapped with
//! `nix`'s `ioctl_*!` macros. Struct layouts and request numbers mirror
//! `<mtd/mtd-user.h>` and `<mtd/ubi-user.h>`, as used directly by the
//! reference implementation's `uboot_mtd.c`.

#![allow(missing_docs)]

use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

/// Mirrors `struct mtd_info_user`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MtdInfoUser {
    pub type_: u8,
    pub flags: u32,
    pub size: u32,
    pub erasesize: u32,
    pub writesize: u32,
    pub oobsize: u32,
    pub padding: u64,
}

/// `type` field values from `<mtd/mtd-abi.h>`.
pub const MTD_NANDFLASH: u8 = 4;
pub const MTD_NORFLASH: u8 = 3;

/// Mirrors `struct erase_info_user`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct EraseInfoUser {
    pub start: u32,
    pub length: u32,
}

const MTD_IOC_MAGIC: u8 = b'M';

ioctl_read!(mtd_get_info, MTD_IOC_MAGIC, 1, MtdInfoUser);
ioctl_write_ptr!(mtd_erase, MTD_IOC_MAGIC, 2, EraseInfoUser);
ioctl_write_ptr!(mtd_lock, MTD_IOC_MAGIC, 5, EraseInfoUser);
ioctl_write_ptr!(mtd_unlock, MTD_IOC_MAGIC, 6, EraseInfoUser);
/// `MEMGETBADBLOCK`: in/out `loff_t` offset, ioctl return value itself is
/// 1 (bad), 0 (good), or negative errno.
ioctl_readwrite!(mtd_get_bad_block, MTD_IOC_MAGIC, 11, i64);

/// `BLKGETSIZE64` lives in the generic block-device ioctl namespace.
ioctl_read!(blk_get_size64, 0x12, 114, u64);

/// Mirrors `struct ubi_attach_req`, truncated to the fields this crate
/// sets; the kernel ignores trailing reserved padding either way.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UbiAttachReq {
    pub ubi_num: i32,
    pub mtd_num: i32,
    pub vid_hdr_offset: i32,
    pub max_beb_per1024: i16,
    pub padding: [i8; 10],
}

const UBI_IOC_MAGIC: u8 = b'o';
const UBI_VOL_IOC_MAGIC: u8 = b'O';

/// Issued on `/dev/ubi_ctrl`; `ubi_num = UBI_DEV_NUM_AUTO` (-1) requests
/// auto-assignment.
ioctl_readwrite!(ubi_attach, UBI_IOC_MAGIC, 64, UbiAttachReq);
pub const UBI_DEV_NUM_AUTO: i32 = -1;

/// Issued on the volume character device before writing a new payload;
/// the argument is the exact byte length about to be written.
ioctl_write_ptr!(ubi_volume_update, UBI_VOL_IOC_MAGIC, 0, i64);
