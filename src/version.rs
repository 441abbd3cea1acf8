//! Dotted version numbers with compatibility-range matching.
//!
//! A version is a variable-length tuple of non-negative integers in which any
//! component may be the wildcard `x` (or `*`). Two relations are defined:
//!
//! - **Ordering** (`Ord`): component-by-component; a missing trailing component
//!   sorts below any present one (`1.2 < 1.2.0`) and a wildcard sorts above any
//!   number.
//! - **Compatibility** ([`VersionNumber::is_compatible_with`]): the receiver is
//!   treated as a constraint pattern. `2` accepts `2.3.1`, `2.x.1` accepts
//!   `2.7.1`, but `2.3.1` does not accept `2`.
//!
//! # Examples
//!
//! ```
//! use morlock::version::VersionNumber;
//!
//! let constraint: VersionNumber = "2".parse().unwrap();
//! let release: VersionNumber = "2.3.1".parse().unwrap();
//! assert!(constraint.is_compatible_with(&release));
//! assert!(!release.is_compatible_with(&constraint));
//! ```

use crate::error::{MorlockError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One dotted component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Number(u64),
    Wildcard,
}

impl Component {
    fn matches(self, other: Component) -> bool {
        match (self, other) {
            (Component::Wildcard, _) | (_, Component::Wildcard) => true,
            (Component::Number(a), Component::Number(b)) => a == b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber {
    components: Vec<Component>,
}

impl VersionNumber {
    /// Parse a dotted version string.
    ///
    /// # Errors
    ///
    /// Returns [`MorlockError::InvalidVersion`] for empty input, empty
    /// components, signs, or any component that is neither decimal digits nor
    /// `x`/`X`/`*`.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(MorlockError::InvalidVersion(text.to_string()));
        }

        let mut components = Vec::new();
        for part in trimmed.split('.') {
            let component = match part {
                "x" | "X" | "*" => Component::Wildcard,
                digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                    // Leading zeros are plain decimal: "007" == 7
                    let value = digits
                        .parse::<u64>()
                        .map_err(|_| MorlockError::InvalidVersion(text.to_string()))?;
                    Component::Number(value)
                }
                _ => return Err(MorlockError::InvalidVersion(text.to_string())),
            };
            components.push(component);
        }

        Ok(Self { components })
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// True if any component is a wildcard. Such versions are constraints only
    /// and never name an installed folder.
    pub fn has_wildcard(&self) -> bool {
        self.components.contains(&Component::Wildcard)
    }

    /// Whether `other` satisfies `self` used as a constraint.
    ///
    /// Every component present in `self` must match the component at the same
    /// position in `other`, exactly or through a wildcard on either side. A
    /// constraint longer than the candidate never matches, which makes the
    /// relation asymmetric unless both sides have equal length.
    pub fn is_compatible_with(&self, other: &VersionNumber) -> bool {
        if self.components.len() > other.components.len() {
            return false;
        }
        self.components
            .iter()
            .zip(&other.components)
            .all(|(a, b)| a.matches(*b))
    }
}

impl FromStr for VersionNumber {
    type Err = MorlockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match component {
                Component::Number(n) => write!(f, "{n}")?,
                Component::Wildcard => f.write_str("x")?,
            }
        }
        Ok(())
    }
}

impl Serialize for VersionNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        VersionNumber::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Strip common tag decorations (`v1.0.0`, `tool-1.0.0`, `tool_v1.0`) and parse.
///
/// Returns `None` for tags that do not reduce to a concrete version.
pub fn version_from_tag(tag: &str, app_name: &str) -> Option<VersionNumber> {
    let mut rest = tag.trim();
    let prefixes = [format!("{app_name}-"), format!("{app_name}_")];

    let mut changed = true;
    while changed {
        changed = false;
        for prefix in &prefixes {
            if let Some(stripped) = rest.strip_prefix(prefix.as_str()) {
                rest = stripped;
                changed = true;
            }
        }
        if let Some(stripped) = rest.strip_prefix(['v', 'V']) {
            if stripped.starts_with(|c: char| c.is_ascii_digit()) {
                rest = stripped;
                changed = true;
            }
        }
    }

    VersionNumber::parse(rest)
        .ok()
        .filter(|v| !v.has_wildcard())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> VersionNumber {
        VersionNumber::parse(text).unwrap()
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(
            v("1.2.3").components(),
            &[
                Component::Number(1),
                Component::Number(2),
                Component::Number(3)
            ]
        );
        assert_eq!(v("7").len(), 1);
    }

    #[test]
    fn test_parse_wildcards() {
        let version = v("2.x.*");
        assert_eq!(
            version.components(),
            &[Component::Number(2), Component::Wildcard, Component::Wildcard]
        );
        assert!(version.has_wildcard());
        assert_eq!(version.to_string(), "2.x.x");
    }

    #[test]
    fn test_parse_leading_zeros_are_decimal() {
        assert_eq!(v("01.007"), v("1.7"));
        assert_eq!(v("2020.01.05").to_string(), "2020.1.5");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["", "   ", "1..2", ".1", "1.", "-1", "1.-2", "1.2a", "v1.0", "+3"] {
            assert!(
                matches!(VersionNumber::parse(bad), Err(MorlockError::InvalidVersion(_))),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_ordering_component_wise() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99.99"));
    }

    #[test]
    fn test_ordering_missing_component_sorts_lower() {
        assert!(v("1.2") < v("1.2.0"));
        assert!(v("1") < v("1.0"));
        assert_ne!(v("1.0"), v("1.0.0"));
    }

    #[test]
    fn test_compatibility_is_asymmetric() {
        assert!(v("2").is_compatible_with(&v("2.3.1")));
        assert!(!v("2.3.1").is_compatible_with(&v("2")));
    }

    #[test]
    fn test_compatibility_symmetric_for_equal_length() {
        assert!(v("2.3.1").is_compatible_with(&v("2.3.1")));
        assert!(v("2.x.1").is_compatible_with(&v("2.7.1")));
        assert!(v("2.7.1").is_compatible_with(&v("2.x.1")));
        assert!(!v("2.3.1").is_compatible_with(&v("2.3.2")));
        assert!(!v("2.3.2").is_compatible_with(&v("2.3.1")));
    }

    #[test]
    fn test_compatibility_wildcards() {
        assert!(v("x").is_compatible_with(&v("9.1")));
        assert!(v("1.x").is_compatible_with(&v("1.4.2")));
        assert!(!v("1.x").is_compatible_with(&v("2.4.2")));
        assert!(!v("1.2").is_compatible_with(&v("1.20")));
    }

    #[test]
    fn test_version_from_tag() {
        assert_eq!(version_from_tag("v1.2.3", "tool"), Some(v("1.2.3")));
        assert_eq!(version_from_tag("tool-1.8.1", "tool"), Some(v("1.8.1")));
        assert_eq!(version_from_tag("tool_v2.0", "tool"), Some(v("2.0")));
        assert_eq!(version_from_tag("2024.10.01", "tool"), Some(v("2024.10.1")));
        assert_eq!(version_from_tag("nightly", "tool"), None);
        assert_eq!(version_from_tag("v1.x", "tool"), None);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3")).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let back: VersionNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.3"));
        assert!(serde_json::from_str::<VersionNumber>("\"1.two\"").is_err());
    }
}
