//! Redundancy selector: given two candidate copies' CRC validity and
//! generation bytes, decides which one is current and, implicitly, which
//! one the next `store` should target (always the other one).
//!
//! Grounded in the copy-selection logic of U-Boot's `libuboot_load`,
//! split out as a pure function so it can be exercised without any
//! device I/O.

/// How the one-byte generation marker is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagPolicy {
    /// NOR flash: 0xFF means obsolete, any other value means active.
    Boolean,
    /// Files, NAND, UBI: the higher value wins, with 0xFF/0x00 wrap-around.
    Incremental,
}

/// Outcome of selecting between two redundant copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Whether at least one copy is usable.
    pub valid: bool,
    /// Index (0 or 1) of the copy to treat as current. Meaningless when
    /// `valid` is false.
    pub current: usize,
}

/// Select the current copy out of two redundant candidates.
///
/// `crc_ok` and `flag` are indexed the same way the two on-media copies
/// are: index 0 is conventionally "first configured device".
pub fn select_redundant(crc_ok: [bool; 2], flag: [u8; 2], policy: FlagPolicy) -> Selection {
    match (crc_ok[0], crc_ok[1]) {
        (true, false) => Selection {
            valid: true,
            current: 0,
        },
        (false, true) => Selection {
            valid: true,
            current: 1,
        },
        (false, false) => Selection {
            valid: false,
            current: 0,
        },
        (true, true) => {
            let mut current = if flag[0] >= flag[1] { 0 } else { 1 };
            match policy {
                FlagPolicy::Boolean => {
                    if flag[0] == 0xFF {
                        current = 1;
                    } else if flag[1] == 0xFF {
                        current = 0;
                    }
                }
                FlagPolicy::Incremental => {
                    if flag[0] == 0xFF && flag[1] == 0x00 {
                        current = 1;
                    } else if flag[1] == 0xFF && flag[0] == 0x00 {
                        current = 0;
                    }
                }
            }
            Selection {
                valid: true,
                current,
            }
        }
    }
}

/// Select the current copy for a non-redundant (single-device) layout:
/// trivially copy 0, valid iff its CRC matched.
pub fn select_single(crc_ok: bool) -> Selection {
    Selection {
        valid: crc_ok,
        current: 0,
    }
}

/// Index of the copy the next `store` should write to.
pub fn write_target(current: usize) -> usize {
    1 - current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_copy_zero_valid() {
        let sel = select_redundant([true, false], [0, 0], FlagPolicy::Incremental);
        assert_eq!(sel, Selection { valid: true, current: 0 });
    }

    #[test]
    fn test_only_copy_one_valid() {
        let sel = select_redundant([false, true], [0, 0], FlagPolicy::Incremental);
        assert_eq!(sel, Selection { valid: true, current: 1 });
    }

    #[test]
    fn test_both_invalid() {
        let sel = select_redundant([false, false], [0, 0], FlagPolicy::Incremental);
        assert!(!sel.valid);
    }

    #[test]
    fn test_incremental_higher_wins() {
        let sel = select_redundant([true, true], [3, 5], FlagPolicy::Incremental);
        assert_eq!(sel.current, 1);
    }

    #[test]
    fn test_incremental_wraparound() {
        let sel = select_redundant([true, true], [0xFF, 0x00], FlagPolicy::Incremental);
        assert_eq!(sel.current, 1);
        let sel = select_redundant([true, true], [0x00, 0xFF], FlagPolicy::Incremental);
        assert_eq!(sel.current, 0);
    }

    #[test]
    fn test_boolean_obsolete_marker() {
        let sel = select_redundant([true, true], [0xFF, 0x05], FlagPolicy::Boolean);
        assert_eq!(sel.current, 1);
        let sel = select_redundant([true, true], [0x05, 0xFF], FlagPolicy::Boolean);
        assert_eq!(sel.current, 0);
    }

    #[test]
    fn test_write_target_flips() {
        assert_eq!(write_target(0), 1);
        assert_eq!(write_target(1), 0);
    }

    #[test]
    fn test_single_device_selection() {
        assert_eq!(select_single(true), Selection { valid: true, current: 0 });
        assert_eq!(select_single(false), Selection { valid: false, current: 0 });
    }
}
