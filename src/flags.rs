//! Parsing and rendering of the `.flags` pseudo-variable and of
//! write-allowlist `name:flags` tokens, which share the same
//! single-character type/access alphabet (`s,d,x,b,i,m` / `a,r,o,c`) and
//! the same `@<range>` suffix grammar.
//!
//! Grounded in U-Boot's `set_var_access_type`: characters are applied in
//! order so that a later character overrides an earlier one of the same
//! class, and unrecognized characters are ignored rather than rejected.

use crate::store::{AccessMode, DataType, Range, VarStore};

/// One parsed `name:<type><access>@<range>` token.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagToken {
    pub name: String,
    pub data_type: DataType,
    pub access: AccessMode,
    pub range: Range,
}

/// Parse the character run before an optional `@range` suffix. Each
/// character is classified as a type or access char and overwrites any
/// earlier char of the same class; characters matching neither alphabet
/// are silently skipped.
fn parse_attr_chars(chars: &str) -> (DataType, AccessMode) {
    let mut data_type = DataType::default();
    let mut access = AccessMode::default();
    for c in chars.chars() {
        if let Some(dt) = DataType::from_char(c) {
            data_type = dt;
        } else if let Some(am) = AccessMode::from_char(c) {
            access = am;
        }
    }
    (data_type, access)
}

fn parse_range(spec: &str) -> Range {
    if let Some(rest) = spec.strip_prefix("r\"") {
        let pattern = rest.strip_suffix('"').unwrap_or(rest);
        return Range::Regex(pattern.to_string());
    }
    if let Some(hex) = spec.strip_prefix("0x").or_else(|| spec.strip_prefix("0X")) {
        if let Ok(mask) = u64::from_str_radix(hex, 16) {
            return Range::Bitmask(mask);
        }
    }
    if let Some((min_s, max_s)) = spec.rsplit_once('-') {
        if let (Ok(min), Ok(max)) = (min_s.parse::<i64>(), max_s.parse::<i64>()) {
            return Range::Integer { min, max };
        }
    }
    Range::None
}

/// Parse a single `name:<chars>[@<range>]` token.
pub fn parse_token(token: &str) -> Option<FlagToken> {
    let (name, rest) = token.split_once(':')?;
    if name.is_empty() {
        return None;
    }
    let (chars_part, range_part) = match rest.split_once('@') {
        Some((chars, range)) => (chars, Some(range)),
        None => (rest, None),
    };
    let (data_type, access) = parse_attr_chars(chars_part);
    let range = range_part.map(parse_range).unwrap_or_default();
    Some(FlagToken {
        name: name.to_string(),
        data_type,
        access,
        range,
    })
}

/// Parse the full comma-separated `.flags` value into its tokens.
pub fn parse_flags_value(value: &str) -> Vec<FlagToken> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(parse_token)
        .collect()
}

/// Apply every token in a decoded `.flags` record to the matching entries
/// already present in `store`. References to names absent from the store
/// are ignored, matching the tolerant decode contract of the on-media
/// block codec.
pub fn apply_flags_record(store: &mut VarStore, value: &str) {
    for token in parse_flags_value(value) {
        store.apply_attrs(token.name.as_str(), token.data_type, token.access, token.range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_token() {
        let token = parse_token("ethaddr:mo").unwrap();
        assert_eq!(token.name, "ethaddr");
        assert_eq!(token.data_type, DataType::Mac);
        assert_eq!(token.access, AccessMode::WriteOnce);
        assert_eq!(token.range, Range::None);
    }

    #[test]
    fn test_parse_regex_range() {
        let token = parse_token(r#"ver:sc@r"^[0-9.]+$""#).unwrap();
        assert_eq!(token.data_type, DataType::String);
        assert_eq!(token.access, AccessMode::ChangeDefault);
        assert_eq!(token.range, Range::Regex("^[0-9.]+$".to_string()));
    }

    #[test]
    fn test_parse_integer_range() {
        let token = parse_token("bootdelay:da@0-10").unwrap();
        assert_eq!(token.range, Range::Integer { min: 0, max: 10 });
    }

    #[test]
    fn test_parse_bitmask_range() {
        let token = parse_token("flags:xa@0xFF").unwrap();
        assert_eq!(token.range, Range::Bitmask(0xFF));
    }

    #[test]
    fn test_later_char_overrides_earlier_of_same_class() {
        // Two access chars: 'o' (write-once) then 'r' (read-only) -- the
        // last one wins, matching set_var_access_type's iteration.
        let (data_type, access) = parse_attr_chars("sor");
        assert_eq!(data_type, DataType::String);
        assert_eq!(access, AccessMode::ReadOnly);
    }

    #[test]
    fn test_unrecognized_chars_ignored() {
        let (data_type, access) = parse_attr_chars("dz a");
        assert_eq!(data_type, DataType::Decimal);
        assert_eq!(access, AccessMode::Any);
    }

    #[test]
    fn test_parse_multiple_tokens() {
        let tokens = parse_flags_value("ethaddr:mo,bootdelay:da@0-10");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].name, "ethaddr");
        assert_eq!(tokens[1].name, "bootdelay");
    }

    #[test]
    fn test_apply_ignores_missing_entry() {
        let mut store = VarStore::new();
        apply_flags_record(&mut store, "ghost:ro");
        assert!(store.get_entry("ghost").is_none());
    }

    #[test]
    fn test_apply_updates_existing_entry() {
        let mut store = VarStore::new();
        store.set("ethaddr", Some("00:11:22:33:44:55"), None).unwrap();
        apply_flags_record(&mut store, "ethaddr:mo");
        let entry = store.get_entry("ethaddr").unwrap();
        assert_eq!(entry.data_type, DataType::Mac);
        assert_eq!(entry.access, AccessMode::WriteOnce);
    }
}
