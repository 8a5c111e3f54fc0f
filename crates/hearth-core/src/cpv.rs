//! Concrete package identities (`category/name-version`).

use std::cmp::Ordering;
use std::fmt;

use crate::error::{HearthError, HearthResult};
use crate::version::Version;

/// Immutable identity of one concrete package version, as read from a
/// package database: category, name, version, slot/sub-slot, origin
/// repository, and optional build metadata. The derived `cp` key is
/// computed at construction and never changes.
#[derive(Debug, Clone)]
pub struct Cpv {
    category: String,
    name: String,
    version: Version,
    slot: String,
    sub_slot: String,
    repo: Option<String>,
    build_time: Option<u64>,
    build_id: Option<u64>,
    cp: String,
}

impl Cpv {
    /// Parse `category/name-version[-rN]`.
    ///
    /// The split point between name and version is the first hyphen whose
    /// remainder parses as a full version; a name that still ends in a
    /// version-like token after the split is rejected.
    pub fn parse(input: &str) -> HearthResult<Self> {
        let err = |reason: &str| HearthError::malformed_atom(input, reason);
        let (category, rest) = input
            .split_once('/')
            .ok_or_else(|| err("missing category separator"))?;
        validate_category(category).map_err(|r| err(r))?;

        let (name, version) = split_name_version(rest)
            .ok_or_else(|| err("missing or unparsable version"))?;
        validate_name(name).map_err(|r| err(r))?;

        Ok(Cpv {
            category: category.to_string(),
            name: name.to_string(),
            version,
            slot: "0".to_string(),
            sub_slot: "0".to_string(),
            repo: None,
            build_time: None,
            build_id: None,
            cp: format!("{category}/{name}"),
        })
    }

    /// Attach a slot spec of the form `slot` or `slot/sub_slot`.
    pub fn with_slot(mut self, slot: &str) -> HearthResult<Self> {
        let (slot, sub_slot) = match slot.split_once('/') {
            Some((s, sub)) => (s, Some(sub)),
            None => (slot, None),
        };
        if !valid_slot_name(slot) || !sub_slot.map_or(true, valid_slot_name) {
            return Err(HearthError::malformed_atom(
                format!("{}:{}", self.cp, slot),
                "invalid slot name",
            ));
        }
        self.sub_slot = sub_slot.unwrap_or(slot).to_string();
        self.slot = slot.to_string();
        Ok(self)
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_build_time(mut self, t: u64) -> Self {
        self.build_time = Some(t);
        self
    }

    pub fn with_build_id(mut self, id: u64) -> Self {
        self.build_id = Some(id);
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `category/name` key.
    pub fn cp(&self) -> &str {
        &self.cp
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn sub_slot(&self) -> &str {
        &self.sub_slot
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    pub fn build_time(&self) -> Option<u64> {
        self.build_time
    }

    pub fn build_id(&self) -> Option<u64> {
        self.build_id
    }

    /// `category/name:slot` — the axis on which slot conflicts arise.
    pub fn slot_key(&self) -> String {
        format!("{}:{}", self.cp, self.slot)
    }

    /// A unique identity string, including the origin repository when known.
    pub fn key(&self) -> String {
        match &self.repo {
            Some(repo) => format!("{self}::{repo}"),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Cpv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cp, self.version)
    }
}

impl serde::Serialize for Cpv {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl PartialEq for Cpv {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Cpv {}

impl std::hash::Hash for Cpv {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Ord for Cpv {
    fn cmp(&self, other: &Self) -> Ordering {
        // Different packages fall back to plain string order; versions of
        // one package order by the version grammar.
        self.cp
            .cmp(&other.cp)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for Cpv {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Find the name/version split: the first hyphen whose remainder is a
/// complete version string.
pub(crate) fn split_name_version(rest: &str) -> Option<(&str, Version)> {
    let mut search_from = 0;
    while let Some(pos) = rest[search_from..].find('-') {
        let at = search_from + pos;
        let candidate = &rest[at + 1..];
        if let Ok(version) = Version::parse(candidate) {
            let name = &rest[..at];
            if name.is_empty() || name_has_version_tail(name) {
                return None;
            }
            return Some((name, version));
        }
        search_from = at + 1;
    }
    None
}

/// True if the name itself ends in `-<version>`, which the grammar forbids.
pub(crate) fn name_has_version_tail(name: &str) -> bool {
    match name.rfind('-') {
        Some(pos) => Version::parse(&name[pos + 1..]).is_ok(),
        None => false,
    }
}

pub(crate) fn validate_category(category: &str) -> Result<(), &'static str> {
    let mut chars = category.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '+' => {}
        _ => return Err("category must start with an alphanumeric, '_' or '+'"),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-')) {
        Ok(())
    } else {
        Err("invalid character in category")
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), &'static str> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '+' => {}
        _ => return Err("package name must start with an alphanumeric, '_' or '+'"),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-')) {
        Ok(())
    } else {
        Err("invalid character in package name")
    }
}

pub(crate) fn valid_slot_name(slot: &str) -> bool {
    let mut chars = slot.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '+' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-'))
}
