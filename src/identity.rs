// src/identity.rs
//! Display name → canonical localized-name pair.
//!
//! Lookup order: exact display name, then the normalized alias index
//! (aliases plus the student's own localized names), then the
//! "preferred first name + surname" composite key, then the override table.
//! Anything left over resolves to an empty identity. Unknown is a valid,
//! displayable state; it is never an error.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::sanitize::{first_token, last_token, name_key};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalIdentity {
    pub localized_name_a: String,
    pub localized_name_b: String,
}

impl CanonicalIdentity {
    pub fn new(a: &str, b: &str) -> Self {
        Self { localized_name_a: s!(a), localized_name_b: s!(b) }
    }

    pub fn is_unknown(&self) -> bool {
        self.localized_name_a.is_empty() && self.localized_name_b.is_empty()
    }
}

/// One row of the identity table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub display_name: String,
    #[serde(default)]
    pub localized_name_a: String,
    #[serde(default)]
    pub localized_name_b: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl IdentityEntry {
    fn identity(&self) -> CanonicalIdentity {
        CanonicalIdentity::new(self.localized_name_a.trim(), self.localized_name_b.trim())
    }

    /// "Peter" from localized_name_b + "Deng" from the display name.
    fn composite_key(&self) -> Option<String> {
        let first = first_token(&self.localized_name_b)?;
        let last = last_token(&self.display_name)?;
        Some(name_key(&format!("{first} {last}")))
    }
}

/// Hand-maintained disambiguation row, consulted last.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOverride {
    pub display_name: String,
    #[serde(default)]
    pub localized_name_a: String,
    #[serde(default)]
    pub localized_name_b: String,
}

#[derive(Debug, Default, Deserialize)]
struct IdentityFile {
    #[serde(default, rename = "student")]
    students: Vec<IdentityEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct OverrideFile {
    #[serde(default, rename = "override")]
    overrides: Vec<IdentityOverride>,
}

/// Which step of the chain produced a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Alias,
    Composite,
    Override,
    Unresolved,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Alias => "alias",
            MatchKind::Composite => "composite",
            MatchKind::Override => "override",
            MatchKind::Unresolved => "unresolved",
        }
    }
}

/// Immutable after construction.
#[derive(Clone, Debug, Default)]
pub struct IdentityResolver {
    exact: HashMap<String, CanonicalIdentity>,
    by_alias: HashMap<String, CanonicalIdentity>,
    by_composite: HashMap<String, CanonicalIdentity>,
    overrides: HashMap<String, CanonicalIdentity>,
}

/// Build a key index, dropping keys that point at two different identities.
fn unambiguous<I>(pairs: I) -> HashMap<String, CanonicalIdentity>
where
    I: IntoIterator<Item = (String, CanonicalIdentity)>,
{
    let mut seen: HashMap<String, Option<CanonicalIdentity>> = HashMap::new();
    for (key, id) in pairs {
        if key.is_empty() || id.is_unknown() { continue; }
        match seen.get_mut(&key) {
            None => { seen.insert(key, Some(id)); }
            Some(slot) => {
                if slot.as_ref().is_some_and(|prev| *prev != id) {
                    debug!(key = %key, "ambiguous identity key dropped");
                    *slot = None;
                }
            }
        }
    }
    seen.into_iter().filter_map(|(k, v)| v.map(|id| (k, id))).collect()
}

impl IdentityResolver {
    pub fn new(entries: &[IdentityEntry], overrides: &[IdentityOverride]) -> Self {
        let exact = unambiguous(entries.iter().map(|e| (e.display_name.trim().to_string(), e.identity())));

        let by_alias = unambiguous(entries.iter().flat_map(|e| {
            let id = e.identity();
            let mut keys = vec![name_key(&e.display_name), name_key(&e.localized_name_a), name_key(&e.localized_name_b)];
            keys.extend(e.aliases.iter().map(|a| name_key(a)));
            keys.into_iter().map(move |k| (k, id.clone()))
        }));

        let by_composite = unambiguous(entries.iter().filter_map(|e| e.composite_key().map(|k| (k, e.identity()))));

        let overrides = unambiguous(overrides.iter().map(|o| {
            (name_key(&o.display_name), CanonicalIdentity::new(o.localized_name_a.trim(), o.localized_name_b.trim()))
        }));

        Self { exact, by_alias, by_composite, overrides }
    }

    /// Load both tables. A missing file is an empty table, not an error.
    pub fn load(identities: &Path, overrides: &Path) -> Result<Self> {
        let students: IdentityFile = read_toml_or_default(identities)?;
        let extra: OverrideFile = read_toml_or_default(overrides)?;
        debug!(students = students.students.len(), overrides = extra.overrides.len(), "identity tables loaded");
        Ok(Self::new(&students.students, &extra.overrides))
    }

    pub fn resolve(&self, display_name: &str) -> CanonicalIdentity {
        self.resolve_traced(display_name).0
    }

    pub fn resolve_pair(&self, display_name: &str) -> (String, String) {
        let id = self.resolve(display_name);
        (id.localized_name_a, id.localized_name_b)
    }

    pub fn resolve_traced(&self, display_name: &str) -> (CanonicalIdentity, MatchKind) {
        if let Some(id) = self.exact.get(display_name.trim()) {
            return (id.clone(), MatchKind::Exact);
        }
        let key = name_key(display_name);
        if key.is_empty() {
            return (CanonicalIdentity::default(), MatchKind::Unresolved);
        }
        if let Some(id) = self.by_alias.get(&key) {
            return (id.clone(), MatchKind::Alias);
        }
        if let Some(id) = self.by_composite.get(&key) {
            return (id.clone(), MatchKind::Composite);
        }
        if let Some(id) = self.overrides.get(&key) {
            return (id.clone(), MatchKind::Override);
        }
        debug!(display_name, "identity unresolved");
        (CanonicalIdentity::default(), MatchKind::Unresolved)
    }
}

fn read_toml_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    if !path.exists() {
        warn!(path = %path.display(), "identity table not found; using an empty table");
        return Ok(T::default());
    }
    let text = fs::read_to_string(path).map_err(|e| Error::file(path, "read", e))?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(display: &str, a: &str, b: &str, aliases: &[&str]) -> IdentityEntry {
        IdentityEntry {
            display_name: s!(display),
            localized_name_a: s!(a),
            localized_name_b: s!(b),
            aliases: aliases.iter().map(|s| s!(*s)).collect(),
        }
    }

    #[test]
    fn ambiguous_keys_are_not_indexed() {
        let idx = unambiguous(vec![
            (s!("k"), CanonicalIdentity::new("a", "b")),
            (s!("k"), CanonicalIdentity::new("c", "d")),
            (s!("k"), CanonicalIdentity::new("a", "b")),
            (s!("j"), CanonicalIdentity::new("a", "b")),
            (s!("j"), CanonicalIdentity::new("a", "b")),
        ]);
        assert!(!idx.contains_key("k"));
        assert_eq!(idx.get("j"), Some(&CanonicalIdentity::new("a", "b")));
    }

    #[test]
    fn composite_key_uses_preferred_first_and_surname() {
        let e = entry("Caihaoxuan Deng", "邓彩浩轩", "Peter Deng", &[]);
        assert_eq!(e.composite_key().as_deref(), Some("peter deng"));
        assert_eq!(entry("Solo", "", "", &[]).composite_key(), None);
    }

    #[test]
    fn exact_beats_alias() {
        let r = IdentityResolver::new(
            &[
                entry("Amy Li", "李艾米", "Amy Li", &[]),
                entry("Amelia Li", "李美", "Amelia Li", &["Amy Li"]),
            ],
            &[],
        );
        let (id, kind) = r.resolve_traced("Amy Li");
        assert_eq!(kind, MatchKind::Exact);
        assert_eq!(id.localized_name_a, "李艾米");
    }
}
