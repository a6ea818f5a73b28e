//! Capability tags declared by backends and required by requests.
//!
//! A backend is a routing candidate only when its [`CapabilitySet`] is a
//! superset of the capabilities a request requires.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single capability a backend may declare.
///
/// Serializes as snake_case (`"long_context"`); the hyphenated spelling
/// (`"long-context"`) is accepted when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Plain text generation. Every request requires it.
    Text,
    /// Source-code generation and editing.
    Code,
    /// Image (or other non-text) inputs.
    Multimodal,
    /// Incremental chunked responses.
    Streaming,
    /// Function / tool calling.
    Functions,
    /// Multi-step reasoning.
    Reasoning,
    /// Very large context windows.
    #[serde(alias = "long-context")]
    LongContext,
}

impl Capability {
    /// Every capability, in canonical order.
    pub const ALL: [Capability; 7] = [
        Capability::Text,
        Capability::Code,
        Capability::Multimodal,
        Capability::Streaming,
        Capability::Functions,
        Capability::Reasoning,
        Capability::LongContext,
    ];

    /// Stable string form used in cache keys, logs and reasoning strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Code => "code",
            Capability::Multimodal => "multimodal",
            Capability::Streaming => "streaming",
            Capability::Functions => "functions",
            Capability::Reasoning => "reasoning",
            Capability::LongContext => "long_context",
        }
    }

    /// Parse a capability tag, accepting either `_` or `-` separators.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of capabilities.
///
/// Ordering is the declaration order of [`Capability`], so iteration (and
/// therefore cache-key construction) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// An empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a capability. Returns `true` if it was not already present.
    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    /// Whether the set contains `capability`.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Whether every capability in `required` is also in this set.
    pub fn is_superset(&self, required: &CapabilitySet) -> bool {
        self.0.is_superset(&required.0)
    }

    /// Number of capabilities in `required` that this set also declares.
    pub fn matched(&self, required: &CapabilitySet) -> usize {
        required.0.intersection(&self.0).count()
    }

    /// Iterate in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(caps: [Capability; N]) -> Self {
        caps.into_iter().collect()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Capability::as_str).collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_both_separators() {
        assert_eq!(Capability::parse("long-context"), Some(Capability::LongContext));
        assert_eq!(Capability::parse("LONG_CONTEXT"), Some(Capability::LongContext));
        assert_eq!(Capability::parse("code"), Some(Capability::Code));
        assert_eq!(Capability::parse("telepathy"), None);
    }

    #[test]
    fn superset_check() {
        let declared = CapabilitySet::from([Capability::Text, Capability::Code, Capability::Streaming]);
        let required = CapabilitySet::from([Capability::Text, Capability::Code]);
        assert!(declared.is_superset(&required));
        assert!(!required.is_superset(&declared));
        assert_eq!(declared.matched(&required), 2);
    }

    #[test]
    fn display_is_canonical_order() {
        let set = CapabilitySet::from([Capability::Reasoning, Capability::Text, Capability::Code]);
        assert_eq!(set.to_string(), "text,code,reasoning");
    }

    #[test]
    fn serde_uses_snake_case_and_accepts_hyphen_alias() {
        let set = CapabilitySet::from([Capability::Text, Capability::LongContext]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["text","long_context"]"#);

        let parsed: CapabilitySet = serde_json::from_str(r#"["long-context","text"]"#).unwrap();
        assert_eq!(parsed, set);
    }
}
