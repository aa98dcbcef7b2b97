//! The in-memory variable store: an ordered name → value map with typed
//! access-control attributes, mirroring the sorted `struct var_entry` list
//! in the reference implementation but backed by a `BTreeMap` rather than
//! a hand-rolled intrusive linked list.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{EnvError, Result};

/// The type tag attached to a variable, validated on every `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    String,
    Decimal,
    Hex,
    Bool,
    Ipv4,
    Mac,
}

impl DataType {
    /// Single-character encoding used in the `.flags` pseudo-variable.
    pub fn to_char(self) -> char {
        match self {
            DataType::String => 's',
            DataType::Decimal => 'd',
            DataType::Hex => 'x',
            DataType::Bool => 'b',
            DataType::Ipv4 => 'i',
            DataType::Mac => 'm',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(DataType::String),
            'd' => Some(DataType::Decimal),
            'x' => Some(DataType::Hex),
            'b' => Some(DataType::Bool),
            'i' => Some(DataType::Ipv4),
            'm' => Some(DataType::Mac),
            _ => None,
        }
    }

    fn validate(self, value: &str) -> bool {
        match self {
            DataType::String | DataType::Ipv4 | DataType::Mac => true,
            DataType::Decimal => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
            DataType::Hex => {
                let rest = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"));
                match rest {
                    Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()),
                    None => false,
                }
            }
            DataType::Bool => {
                value.len() > 1
                    && matches!(
                        value.as_bytes()[0],
                        b'1' | b'y' | b't' | b'Y' | b'T' | b'0' | b'n' | b'f' | b'N' | b'F'
                    )
            }
        }
    }
}

/// The access-control tag attached to a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Any,
    ReadOnly,
    WriteOnce,
    ChangeDefault,
}

impl AccessMode {
    pub fn to_char(self) -> char {
        match self {
            AccessMode::Any => 'a',
            AccessMode::ReadOnly => 'r',
            AccessMode::WriteOnce => 'o',
            AccessMode::ChangeDefault => 'c',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a' => Some(AccessMode::Any),
            'r' => Some(AccessMode::ReadOnly),
            'o' => Some(AccessMode::WriteOnce),
            'c' => Some(AccessMode::ChangeDefault),
            _ => None,
        }
    }
}

/// An optional range constraint narrowing the set of acceptable values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Range {
    #[default]
    None,
    /// Inclusive decimal integer range.
    Integer { min: i64, max: i64 },
    /// A bitmask; the value is accepted if `value & mask != 0`.
    Bitmask(u64),
    /// A POSIX extended regular expression the value must match.
    Regex(String),
}

impl Range {
    pub fn available(&self) -> bool {
        !matches!(self, Range::None)
    }
}

/// One entry in the store: a name, its current value, and its attributes.
#[derive(Debug, Clone)]
pub struct VarEntry {
    pub name: String,
    pub value: String,
    pub data_type: DataType,
    pub access: AccessMode,
    pub range: Range,
}

impl VarEntry {
    fn new(name: &str, value: &str) -> Self {
        VarEntry {
            name: name.to_string(),
            value: value.to_string(),
            data_type: DataType::default(),
            access: AccessMode::default(),
            range: Range::default(),
        }
    }

    fn is_default_attrs(&self) -> bool {
        self.data_type == DataType::String
            && self.access == AccessMode::Any
            && !self.range.available()
    }

    /// The `name:<type><access>@<range>` token for this entry, or `None`
    /// when every attribute is at its default and no `.flags` record is
    /// needed for it.
    pub fn flags_token(&self) -> Option<String> {
        if self.is_default_attrs() {
            return None;
        }
        let mut token = format!(
            "{}:{}{}",
            self.name,
            self.data_type.to_char(),
            self.access.to_char()
        );
        match &self.range {
            Range::None => {}
            Range::Regex(pattern) => token.push_str(&format!("@r\"{}\"", pattern)),
            Range::Bitmask(mask) => token.push_str(&format!("@0x{:X}", mask)),
            Range::Integer { min, max } => token.push_str(&format!("@{}-{}", min, max)),
        }
        Some(token)
    }

    fn validate_value(&self, value: &str) -> Result<()> {
        if !self.data_type.validate(value) {
            return Err(EnvError::PermissionDenied(format!(
                "value for '{}' does not match declared type",
                self.name
            )));
        }
        if self.range.available() && !self.matches_range(value) {
            return Err(EnvError::PermissionDenied(format!(
                "value for '{}' is outside the allowed range",
                self.name
            )));
        }
        Ok(())
    }

    fn matches_range(&self, value: &str) -> bool {
        match &self.range {
            Range::None => true,
            Range::Regex(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(value))
                .unwrap_or(false),
            Range::Bitmask(mask) => parse_numeric(value)
                .map(|v| v & mask != 0)
                .unwrap_or(false),
            Range::Integer { min, max } => parse_signed(value)
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
        }
    }
}

fn parse_numeric(value: &str) -> Option<u64> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse::<u64>().ok()
    }
}

fn parse_signed(value: &str) -> Option<i64> {
    value.parse::<i64>().ok()
}

/// Ordered variable store, sorted lexicographically by name.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    entries: BTreeMap<String, VarEntry>,
}

impl VarStore {
    pub fn new() -> Self {
        VarStore {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|e| e.value.clone())
    }

    pub fn get_entry(&self, name: &str) -> Option<&VarEntry> {
        self.entries.get(name)
    }

    /// In-order iteration over all entries, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &VarEntry> {
        self.entries.values()
    }

    /// Insert or overwrite an entry without running access/type checks.
    /// Used by the block decoder and `.flags` parser while populating a
    /// freshly loaded store, where the on-media data is authoritative.
    pub fn insert_raw(&mut self, entry: VarEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Apply a `.flags` token's attributes to an already-loaded entry.
    /// References to names absent from the store are silently ignored.
    pub fn apply_attrs(&mut self, name: &str, data_type: DataType, access: AccessMode, range: Range) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.data_type = data_type;
            entry.access = access;
            entry.range = range;
        }
    }

    /// Set (or remove, when `value` is `None`) a variable, applying the
    /// access/type/range policy of §4.3.
    ///
    /// `validator` supplies type/access/range attributes to stamp onto the
    /// target entry before validation — used when a write-allowlist entry
    /// governs this name.
    pub fn set(
        &mut self,
        name: &str,
        value: Option<&str>,
        validator: Option<&VarEntry>,
    ) -> Result<()> {
        if name.is_empty() || name.contains('=') {
            return Err(EnvError::InvalidArgument(format!(
                "invalid variable name '{}'",
                name
            )));
        }

        let existing = self.entries.get(name);
        if let Some(current) = existing {
            match current.access {
                AccessMode::ReadOnly => {
                    return Err(EnvError::PermissionDenied(format!(
                        "'{}' is read-only",
                        name
                    )))
                }
                // No first-write latch: write-once is enforced identically to
                // read-only, rejecting every set() once the entry exists.
                AccessMode::WriteOnce => {
                    return Err(EnvError::PermissionDenied(format!(
                        "'{}' is write-once and cannot be changed",
                        name
                    )))
                }
                _ => {}
            }
        }

        let mut candidate = existing.cloned().unwrap_or_else(|| VarEntry::new(name, ""));
        if let Some(template) = validator {
            candidate.data_type = template.data_type;
            candidate.access = template.access;
            candidate.range = template.range.clone();
        }

        match value {
            None => {
                self.entries.remove(name);
                Ok(())
            }
            Some(new_value) => {
                candidate.validate_value(new_value)?;
                candidate.value = new_value.to_string();
                self.entries.insert(name.to_string(), candidate);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.set(name, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut store = VarStore::new();
        store.set("bootdelay", Some("3"), None).unwrap();
        assert_eq!(store.get("bootdelay"), Some("3".to_string()));
    }

    #[test]
    fn test_rejects_equals_in_name() {
        let mut store = VarStore::new();
        let result = store.set("bad=name", Some("1"), None);
        assert!(matches!(result, Err(EnvError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_empty_name() {
        let mut store = VarStore::new();
        assert!(store.set("", Some("1"), None).is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut store = VarStore::new();
        store.set("zeta", Some("1"), None).unwrap();
        store.set("alpha", Some("2"), None).unwrap();
        store.set("mid", Some("3"), None).unwrap();
        let names: Vec<_> = store.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_remove_via_set_none() {
        let mut store = VarStore::new();
        store.set("x", Some("1"), None).unwrap();
        store.set("x", None, None).unwrap();
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn test_read_only_rejects_rewrite() {
        let mut store = VarStore::new();
        let mut entry = VarEntry::new("locked", "v1");
        entry.access = AccessMode::ReadOnly;
        store.insert_raw(entry);
        let result = store.set("locked", Some("v2"), None);
        assert!(matches!(result, Err(EnvError::PermissionDenied(_))));
    }

    #[test]
    fn test_write_once_rejects_even_first_set() {
        // No first-write latch: write-once behaves exactly like read-only
        // once the entry exists, per the spec's documented open-question
        // decision -- there is no "first write succeeds" grace period.
        let mut store = VarStore::new();
        let mut entry = VarEntry::new("serial", "");
        entry.access = AccessMode::WriteOnce;
        store.insert_raw(entry);
        let result = store.set("serial", Some("ABC123"), None);
        assert!(matches!(result, Err(EnvError::PermissionDenied(_))));
        assert_eq!(store.get("serial"), Some("".to_string()));
    }

    #[test]
    fn test_decimal_type_validation() {
        let mut store = VarStore::new();
        let mut entry = VarEntry::new("count", "");
        entry.data_type = DataType::Decimal;
        store.insert_raw(entry);
        assert!(store.set("count", Some("42"), None).is_ok());
        assert!(store.set("count", Some("4x2"), None).is_err());
    }

    #[test]
    fn test_hex_type_validation() {
        let mut store = VarStore::new();
        let mut entry = VarEntry::new("addr", "");
        entry.data_type = DataType::Hex;
        store.insert_raw(entry);
        assert!(store.set("addr", Some("0x1000"), None).is_ok());
        assert!(store.set("addr", Some("1000"), None).is_err());
    }

    #[test]
    fn test_integer_range_validation() {
        let mut store = VarStore::new();
        let mut entry = VarEntry::new("bootdelay", "");
        entry.data_type = DataType::Decimal;
        entry.range = Range::Integer { min: 0, max: 10 };
        store.insert_raw(entry);
        assert!(store.set("bootdelay", Some("5"), None).is_ok());
        assert!(store.set("bootdelay", Some("99"), None).is_err());
    }

    #[test]
    fn test_regex_range_validation() {
        let mut store = VarStore::new();
        let mut entry = VarEntry::new("ver", "");
        entry.range = Range::Regex(r"^[0-9.]+$".to_string());
        store.insert_raw(entry);
        assert!(store.set("ver", Some("1.2.3"), None).is_ok());
        assert!(store.set("ver", Some("v1.2.3"), None).is_err());
    }

    #[test]
    fn test_flags_token_default_is_none() {
        let entry = VarEntry::new("plain", "value");
        assert_eq!(entry.flags_token(), None);
    }

    #[test]
    fn test_flags_token_with_range() {
        let mut entry = VarEntry::new("ver", "1.0");
        entry.range = Range::Regex(r"^[0-9.]+$".to_string());
        entry.access = AccessMode::ChangeDefault;
        assert_eq!(entry.flags_token().as_deref(), Some(r#"ver:sc@r"^[0-9.]+$""#));
    }

    #[test]
    fn test_apply_attrs_ignores_missing_name() {
        let mut store = VarStore::new();
        store.apply_attrs("ghost", DataType::Hex, AccessMode::ReadOnly, Range::None);
        assert!(store.get_entry("ghost").is_none());
    }
}
