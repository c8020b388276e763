//! Structural fingerprints for page layouts
//!
//! A fingerprint identifies the *shape* of a page: which elements it uses,
//! how deeply they nest and which top-level regions it is built from. Text,
//! images and attribute values never reach the digest, so content edits keep
//! the same fingerprint while layout changes produce a new one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Number of root children used when a page has no landmark regions
pub const FALLBACK_CONTAINER_COUNT: usize = 5;

/// Bumped whenever the canonical form changes, so old and new digests never collide
const CANONICAL_VERSION: u8 = 2;

const FINGERPRINT_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("fingerprint must be 64 hex characters, got {0:?}")]
    Malformed(String),

    #[error("failed to encode page structure: {0}")]
    Encode(String),
}

/// Lower-case hex SHA-256 digest of a canonicalized [`PageStructure`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accept a digest from an external caller, normalizing case
    pub fn parse(raw: &str) -> Result<Self, FingerprintError> {
        let trimmed = raw.trim();
        if trimmed.len() != FINGERPRINT_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FingerprintError::Malformed(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the digest, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fingerprint::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// A direct child of the document root, sized by its descendant count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootChild {
    pub ident: String,
    pub size: u32,
}

/// Structural summary of a page as produced by the DOM collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStructure {
    /// Element counts keyed by tag name
    #[serde(default)]
    pub element_counts: HashMap<String, u32>,
    /// Number of elements found at each nesting depth, root first
    #[serde(default)]
    pub depth_profile: Vec<u32>,
    /// Identifiers of landmark regions (nav, header, main, footer...)
    #[serde(default)]
    pub landmarks: Vec<String>,
    /// Direct children of the root, used when no landmarks exist
    #[serde(default)]
    pub root_children: Vec<RootChild>,
}

#[derive(Serialize)]
struct CanonicalStructure<'a> {
    version: u8,
    element_counts: Vec<(String, u32)>,
    depth_profile: &'a [u32],
    containers: Vec<String>,
}

impl PageStructure {
    pub fn total_elements(&self) -> u64 {
        self.element_counts.values().map(|&c| u64::from(c)).sum()
    }

    fn canonical_counts(&self) -> Vec<(String, u32)> {
        let mut merged: BTreeMap<String, u32> = BTreeMap::new();
        for (tag, &count) in &self.element_counts {
            let tag = tag.trim().to_ascii_lowercase();
            if tag.is_empty() || count == 0 {
                continue;
            }
            let slot = merged.entry(tag).or_insert(0);
            *slot = slot.saturating_add(count);
        }
        merged.into_iter().collect()
    }

    fn canonical_depths(&self) -> &[u32] {
        let end = self
            .depth_profile
            .iter()
            .rposition(|&count| count > 0)
            .map_or(0, |idx| idx + 1);
        &self.depth_profile[..end]
    }

    /// Container identifiers the digest is keyed on, sorted
    pub fn containers(&self) -> Vec<String> {
        let mut containers: Vec<String> = self
            .landmarks
            .iter()
            .map(|ident| ident.trim().to_ascii_lowercase())
            .filter(|ident| !ident.is_empty())
            .collect();

        if containers.is_empty() {
            let mut children: Vec<(u32, String)> = self
                .root_children
                .iter()
                .map(|child| (child.size, child.ident.trim().to_ascii_lowercase()))
                .filter(|(_, ident)| !ident.is_empty())
                .collect();
            children.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
            containers = children
                .into_iter()
                .take(FALLBACK_CONTAINER_COUNT)
                .map(|(_, ident)| ident)
                .collect();
        }

        containers.sort();
        containers
    }

    /// Compute the layout fingerprint
    ///
    /// Input order never matters: counts and containers are sorted before
    /// encoding, so the digest is stable across processes.
    pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        let canonical = CanonicalStructure {
            version: CANONICAL_VERSION,
            element_counts: self.canonical_counts(),
            depth_profile: self.canonical_depths(),
            containers: self.containers(),
        };

        let encoded =
            bincode::serialize(&canonical).map_err(|e| FingerprintError::Encode(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(Fingerprint(format!("{:x}", hasher.finalize())))
    }

    /// Short human-readable digest handed to the style generator
    pub fn describe(&self) -> String {
        let containers = self.containers();
        let structure = if containers.is_empty() {
            "basic HTML".to_string()
        } else {
            containers.join(", ")
        };

        let mut counts = self.canonical_counts();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let top_tags = counts
            .iter()
            .take(8)
            .map(|(tag, count)| format!("{} {}", tag, count))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Structure: {}\nElements: {} total, nesting depth {}\nTop tags: {}",
            structure,
            self.total_elements(),
            self.canonical_depths().len(),
            if top_tags.is_empty() { "none" } else { top_tags.as_str() }
        )
    }
}
