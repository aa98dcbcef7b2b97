//! Binary codec for the on-media environment block.
//!
//! Mirrors the layout of U-Boot's `uboot_env`/`uboot_env_noredund` structs:
//! a little-endian CRC-32, an optional one-byte generation flag (redundant
//! layout only), and a packed `name=value\0` record stream terminated by an
//! empty record.
//!
//! The CRC is the standard zlib/ITU-T CRC-32 (polynomial 0xEDB88320,
//! reflected) computed over the data region only — the generation flag
//! byte, where present, is not covered by the checksum.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EnvError, Result};
use crate::store::VarStore;

/// Offset of the data region in a non-redundant block: 4-byte CRC only.
pub const NON_REDUNDANT_DATA_OFFSET: usize = 4;
/// Offset of the data region in a redundant block: 4-byte CRC + 1-byte flag.
pub const REDUNDANT_DATA_OFFSET: usize = 5;

/// CRC-32 lookup table (256 × u32, polynomial 0xEDB88320).
pub static CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the standard zlib CRC-32 of a byte slice, continuing from `seed`.
///
/// Passing `seed = 0` computes the CRC of `data` alone, matching the
/// `crc32(0, data, len)` convention used when sealing an environment block.
pub fn crc32(seed: u32, data: &[u8]) -> u32 {
    let mut crc = !seed;
    for &byte in data {
        let index = ((crc as u8) ^ byte) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Result of decoding one on-media copy.
pub struct DecodedBlock {
    /// Whether the stored CRC matched the computed CRC over the data region.
    pub crc_ok: bool,
    /// The generation flag byte, present only for the redundant layout.
    pub flag: Option<u8>,
    /// `name=value` pairs in on-media order, including a literal `.flags`
    /// entry if one was present. Empty (and meaningless) when `crc_ok` is
    /// false — the caller must not trust the contents of an invalid copy.
    pub records: Vec<(String, String)>,
}

/// Decode one on-media copy of size `buf.len()`.
///
/// `redundant` selects whether a generation flag byte follows the CRC.
pub fn decode(buf: &[u8], redundant: bool) -> Result<DecodedBlock> {
    let data_offset = if redundant {
        REDUNDANT_DATA_OFFSET
    } else {
        NON_REDUNDANT_DATA_OFFSET
    };
    if buf.len() < data_offset {
        return Err(EnvError::InvalidArgument(
            "environment buffer shorter than header".into(),
        ));
    }

    let mut cursor = Cursor::new(buf);
    let stored_crc = cursor.read_u32::<LittleEndian>()?;
    let flag = if redundant {
        Some(cursor.read_u8()?)
    } else {
        None
    };

    let data = &buf[data_offset..];
    let computed_crc = crc32(0, data);
    let crc_ok = stored_crc == computed_crc;

    let records = if crc_ok {
        split_records(data)?
    } else {
        Vec::new()
    };

    Ok(DecodedBlock {
        crc_ok,
        flag,
        records,
    })
}

/// Split a data region into `name=value` records, scanning and yielding
/// sub-slices rather than mutating the source buffer. Stops at the first
/// empty record (a lone `\0`) or at the end of the region, whichever comes
/// first. Records whose terminator is never found (corrupt/truncated data
/// that nonetheless passed CRC) are rejected.
fn split_records(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let rec_end = match data[pos..].iter().position(|&b| b == 0) {
            Some(rel) => pos + rel,
            None => {
                return Err(EnvError::BadDevice(
                    "environment record extends past usable region".into(),
                ))
            }
        };
        let record = &data[pos..rec_end];
        if record.is_empty() {
            // Empty record terminates the stream.
            break;
        }
        let text = String::from_utf8_lossy(record);
        match text.split_once('=') {
            Some((name, value)) => records.push((name.to_string(), value.to_string())),
            None => { /* malformed record with no '=': ignored, matches strchr()==NULL skip */ }
        }
        pos = rec_end + 1;
    }

    Ok(records)
}

/// Encode the store's variables (plus a synthetic `.flags` record, when
/// needed) into the data region of a block of `total_size` bytes, sealing
/// it with the CRC (and, for the redundant layout, the given generation
/// flag byte).
///
/// Fails with [`EnvError::NoMemory`] if the records do not fit in the
/// available space.
pub fn encode(store: &VarStore, total_size: usize, flag: Option<u8>) -> Result<Vec<u8>> {
    let redundant = flag.is_some();
    let data_offset = if redundant {
        REDUNDANT_DATA_OFFSET
    } else {
        NON_REDUNDANT_DATA_OFFSET
    };
    if total_size < data_offset {
        return Err(EnvError::NoMemory(
            "environment size too small for header".into(),
        ));
    }

    let capacity = total_size - data_offset;
    let body = encode_body(store, capacity)?;

    let mut buf = vec![0u8; total_size];
    {
        let mut cursor = Cursor::new(&mut buf[..]);
        cursor.write_u32::<LittleEndian>(0)?; // placeholder, patched below
        if let Some(f) = flag {
            cursor.write_u8(f)?;
        }
    }
    buf[data_offset..data_offset + body.len()].copy_from_slice(&body);

    let crc = crc32(0, &buf[data_offset..]);
    (&mut buf[0..4]).write_u32::<LittleEndian>(crc)?;

    Ok(buf)
}

/// Build the record stream (without CRC/flag header) for `store`, failing
/// if it would not fit in `capacity` bytes.
fn encode_body(store: &VarStore, capacity: usize) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();
    let mut flags_value = String::new();

    for entry in store.iter() {
        let record_len = entry.name.len() + 1 + entry.value.len() + 1;
        if out.len() + record_len > capacity {
            return Err(EnvError::NoMemory(format!(
                "environment does not fit: variable '{}' would overflow",
                entry.name
            )));
        }
        write_record(&mut out, &entry.name, &entry.value)?;

        if let Some(token) = entry.flags_token() {
            if !flags_value.is_empty() {
                flags_value.push(',');
            }
            flags_value.push_str(&token);
        }
    }

    if !flags_value.is_empty() {
        let record_len = ".flags".len() + 1 + flags_value.len() + 1;
        if out.len() + record_len > capacity {
            return Err(EnvError::NoMemory(
                "environment does not fit: .flags record would overflow".into(),
            ));
        }
        write_record(&mut out, ".flags", &flags_value)?;
    }

    // Terminating empty record.
    if out.len() + 1 > capacity {
        return Err(EnvError::NoMemory(
            "environment does not fit: no room for terminator".into(),
        ));
    }
    out.write_u8(0)?;

    Ok(out)
}

fn write_record(out: &mut Vec<u8>, name: &str, value: &str) -> io::Result<()> {
    out.write_all(name.as_bytes())?;
    out.write_all(b"=")?;
    out.write_all(value.as_bytes())?;
    out.write_all(b"\0")?;
    Ok(())
}

/// Read a full device-sized buffer from any `Read`, used by the device
/// backends to size their scratch buffers uniformly.
pub fn read_exact_sized<R: Read>(mut r: R, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VarStore;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(0, &[]), 0);
    }

    #[test]
    fn test_crc32_known_value() {
        // "123456789" is the standard CRC-32 check value 0xCBF43926.
        assert_eq!(crc32(0, b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_roundtrip_non_redundant() {
        let mut store = VarStore::new();
        store.set("netdev", Some("eth0"), None).unwrap();
        store.set("kernel_addr", Some("400000"), None).unwrap();

        let encoded = encode(&store, 8192, None).unwrap();
        let decoded = decode(&encoded, false).unwrap();
        assert!(decoded.crc_ok);
        assert!(decoded.flag.is_none());

        let mut roundtrip = VarStore::new();
        for (name, value) in decoded.records {
            if name != ".flags" {
                roundtrip.set(&name, Some(&value), None).unwrap();
            }
        }
        assert_eq!(roundtrip.get("netdev"), Some("eth0".to_string()));
        assert_eq!(roundtrip.get("kernel_addr"), Some("400000".to_string()));
    }

    #[test]
    fn test_s1_exact_layout() {
        let mut store = VarStore::new();
        store.set("netdev", Some("eth0"), None).unwrap();
        store.set("kernel_addr", Some("400000"), None).unwrap();

        let encoded = encode(&store, 8192, None).unwrap();
        assert_eq!(encoded.len(), 8192);

        let crc = u32::from_le_bytes(encoded[0..4].try_into().unwrap());
        let expected_crc = crc32(0, &encoded[4..]);
        assert_eq!(crc, expected_crc);

        assert!(encoded[4..].starts_with(b"kernel_addr=400000\0netdev=eth0\0\0"));
    }

    #[test]
    fn test_redundant_header_layout() {
        let mut store = VarStore::new();
        store.set("a", Some("1"), None).unwrap();
        let encoded = encode(&store, 4096, Some(0x01)).unwrap();
        assert_eq!(encoded[4], 0x01);
        let decoded = decode(&encoded, true).unwrap();
        assert!(decoded.crc_ok);
        assert_eq!(decoded.flag, Some(0x01));
    }

    #[test]
    fn test_oversize_fails() {
        let mut store = VarStore::new();
        store.set("a", Some(&"x".repeat(100)), None).unwrap();
        let result = encode(&store, 16, None);
        assert!(matches!(result, Err(EnvError::NoMemory(_))));
    }

    #[test]
    fn test_crc_mismatch_invalidates_copy() {
        let mut store = VarStore::new();
        store.set("a", Some("1"), None).unwrap();
        let mut encoded = encode(&store, 256, None).unwrap();
        encoded[0] ^= 0xFF;
        let decoded = decode(&encoded, false).unwrap();
        assert!(!decoded.crc_ok);
        assert!(decoded.records.is_empty());
    }
}
