//! Device-tree namespace hint: reads the bootloader's chosen node to learn
//! which configured namespace a caller should default to when none is
//! given explicitly on the command line.
//!
//! Reads, NUL-trims, and caps the property at 63 bytes; a missing file
//! is tolerated the same way a missing config default is tolerated
//! elsewhere in this crate (return `None`, not an error).

use std::fs;

const CHOSEN_NODE: &str = "/proc/device-tree/chosen/u-boot,env-config";
const MAX_LEN: usize = 63;

/// Read the `u-boot,env-config` property of the device tree's chosen
/// node, if present. Returns `None` when the property does not exist,
/// matching the tolerant behavior callers expect when there is no
/// device-tree hint to fall back on.
pub fn namespace_from_device_tree() -> Option<String> {
    let bytes = fs::read(CHOSEN_NODE).ok()?;
    let trimmed = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => &bytes[..nul],
        None => &bytes[..],
    };
    let truncated = &trimmed[..trimmed.len().min(MAX_LEN)];
    let text = String::from_utf8_lossy(truncated).into_owned();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_chosen_node_returns_none() {
        // /proc/device-tree is virtually never present in a test sandbox;
        // this asserts the tolerant path rather than depending on it.
        if !std::path::Path::new(CHOSEN_NODE).exists() {
            assert_eq!(namespace_from_device_tree(), None);
        }
    }

    #[test]
    fn test_nul_trim_and_cap_logic() {
        let raw = b"board-a\0garbage-after-nul";
        let trimmed = match raw.iter().position(|&b| b == 0) {
            Some(nul) => &raw[..nul],
            None => &raw[..],
        };
        assert_eq!(trimmed, b"board-a");

        let long = vec![b'x'; 100];
        let capped = &long[..long.len().min(MAX_LEN)];
        assert_eq!(capped.len(), MAX_LEN);
    }
}
