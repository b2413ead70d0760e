use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Canonical string form of an identifier.
///
/// Source systems write the same offer as `42`, `42.0` or ` 42 `. All of them
/// collapse to `"42"`. Only an integer followed by a zero fraction is rewritten;
/// leading zeros, exponents and other text are kept as trimmed input.
pub fn canonical_key(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once('.') {
        Some((whole, fraction)) if is_plain_integer(whole) && is_zero_fraction(fraction) => {
            whole.to_string()
        }
        _ => trimmed.to_string(),
    }
}

// Optional sign, then digits with no leading zero unless the value is zero.
fn is_plain_integer(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
}

fn is_zero_fraction(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b == b'0')
}

/// A canonicalized identifier used for joins and grouping.
///
/// Ordering is numeric when both keys are integers and lexicographic otherwise;
/// integer keys sort before textual ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct IdKey(String);

impl IdKey {
    pub fn new(raw: &str) -> Self {
        Self(canonical_key(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_integer(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl Ord for IdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_integer(), other.as_integer()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for IdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for IdKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for IdKey {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<IdKey> for String {
    fn from(key: IdKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_collapse() {
        assert_eq!(canonical_key("42"), "42");
        assert_eq!(canonical_key("42.0"), "42");
        assert_eq!(canonical_key(" 42 "), "42");
        assert_eq!(canonical_key("-3.00"), "-3");
        assert_eq!(IdKey::new("7.0"), IdKey::new("7"));
    }

    #[test]
    fn test_leading_zero_and_exponent_keys_stay_distinct() {
        assert_eq!(canonical_key("007"), "007");
        assert_eq!(canonical_key("007.0"), "007.0");
        assert_eq!(canonical_key("1e3"), "1e3");
        assert_eq!(canonical_key("42."), "42.");
        assert_ne!(IdKey::new("007"), IdKey::new("7"));
        assert_ne!(IdKey::new("07"), IdKey::new("7"));
    }

    #[test]
    fn test_textual_keys_pass_through() {
        assert_eq!(canonical_key("A"), "A");
        assert_eq!(canonical_key("2024-01-01"), "2024-01-01");
        assert_eq!(canonical_key("42.5"), "42.5");
        assert_eq!(canonical_key("NaN"), "NaN");
        assert_eq!(canonical_key("12345678901234567890"), "12345678901234567890");
    }

    #[test]
    fn test_key_ordering() {
        let mut keys: Vec<IdKey> = ["10", "9", "B", "A", "100", "09"]
            .into_iter()
            .map(IdKey::from)
            .collect();
        keys.sort();
        let ordered: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(ordered, vec!["09", "9", "10", "100", "A", "B"]);
    }

    #[test]
    fn test_key_deserialization_canonicalizes() {
        let key: IdKey = serde_json::from_str(r#""  15.0 ""#).expect("Failed to deserialize");
        assert_eq!(key.as_str(), "15");
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""15""#);
    }
}
