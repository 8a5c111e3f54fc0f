//! The package-database interface consumed by the resolution core.
//!
//! The core treats a database as read-only and referentially transparent
//! for the duration of one resolution pass; visibility policy (masking,
//! keyword and license acceptance) is applied by the implementation, not
//! by the core.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::atom::Atom;
use crate::candidate::Candidate;
use crate::cpv::Cpv;
use crate::error::{HearthError, HearthResult};
use crate::matching::match_from_list;

/// Metadata keys understood by [`PackageDb::aux_get`].
pub mod keys {
    /// Package-format version the metadata was written against.
    pub const SPEC_VERSION: &str = "SPEC_VERSION";
    pub const SLOT: &str = "SLOT";
    pub const KEYWORDS: &str = "KEYWORDS";
    /// Declared USE flags.
    pub const IUSE: &str = "IUSE";
    /// Enabled USE flags.
    pub const USE: &str = "USE";
    /// Runtime dependency expression.
    pub const RDEPEND: &str = "RDEPEND";
    /// Build-time dependency expression.
    pub const DEPEND: &str = "DEPEND";
    pub const LICENSE: &str = "LICENSE";
    pub const REPOSITORY: &str = "REPOSITORY";
}

/// How much visibility filtering a match query applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLevel {
    /// Every candidate, masked or not.
    MatchAll,
    /// Only candidates the visibility policy accepts.
    MatchVisible,
    /// The single best visible candidate.
    BestVisible,
}

/// Optional database capabilities, declared rather than probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The implementation answers many atoms in one round trip.
    BulkMatch,
}

/// Read-only package database.
///
/// All match results are ordered ascending by version.
pub trait PackageDb {
    /// Visible candidates matching `atom`.
    fn match_atom(&self, atom: &Atom) -> HearthResult<Vec<Arc<Candidate>>>;

    /// Match with explicit visibility control.
    fn xmatch(&self, level: MatchLevel, atom: &Atom) -> HearthResult<Vec<Arc<Candidate>>>;

    /// Fetch metadata strings for `keys`, in order. Fails with
    /// [`HearthError::UnknownPackage`] when the cpv is not present.
    fn aux_get(&self, cpv: &Cpv, keys: &[&str]) -> HearthResult<Vec<String>>;

    /// All candidates for a `category/name` key, masked or not.
    fn list_candidates(&self, cp: &str) -> Vec<Arc<Candidate>>;

    /// Whether an optional capability is supported.
    fn supports(&self, _capability: Capability) -> bool {
        false
    }
}

/// A simple in-memory database, used by the test suites and by embedders
/// that assemble their package set programmatically.
#[derive(Default)]
pub struct MemoryDb {
    by_cp: HashMap<String, Vec<Arc<Candidate>>>,
    metadata: HashMap<String, BTreeMap<String, String>>,
    masked: HashSet<String>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate, keeping each cp list sorted ascending.
    pub fn add(&mut self, candidate: Candidate) -> Arc<Candidate> {
        let candidate = Arc::new(candidate);
        let list = self.by_cp.entry(candidate.cpv.cp().to_string()).or_default();
        list.push(candidate.clone());
        list.sort_by(|a, b| a.cpv.cmp(&b.cpv));
        candidate
    }

    /// Attach extra metadata to a cpv already inserted.
    pub fn set_metadata(&mut self, cpv: &Cpv, key: &str, value: impl Into<String>) {
        self.metadata
            .entry(cpv.key())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Mark a cpv invisible to `MatchVisible` queries.
    pub fn mask(&mut self, cpv: &Cpv) {
        self.masked.insert(cpv.key());
    }

    pub fn is_masked(&self, cpv: &Cpv) -> bool {
        self.masked.contains(&cpv.key())
    }

    fn find(&self, cpv: &Cpv) -> Option<&Arc<Candidate>> {
        self.by_cp
            .get(cpv.cp())?
            .iter()
            .find(|c| c.cpv.key() == cpv.key())
    }

    fn all_for_atom(&self, atom: &Atom) -> Vec<Arc<Candidate>> {
        if atom.is_wildcard() {
            let mut out: Vec<Arc<Candidate>> = Vec::new();
            let mut cps: Vec<&String> = self.by_cp.keys().collect();
            cps.sort();
            for cp in cps {
                out.extend(match_from_list(atom, &self.by_cp[cp]));
            }
            out
        } else {
            match self.by_cp.get(atom.cp()) {
                Some(list) => match_from_list(atom, list),
                None => Vec::new(),
            }
        }
    }
}

impl PackageDb for MemoryDb {
    fn match_atom(&self, atom: &Atom) -> HearthResult<Vec<Arc<Candidate>>> {
        self.xmatch(MatchLevel::MatchVisible, atom)
    }

    fn xmatch(&self, level: MatchLevel, atom: &Atom) -> HearthResult<Vec<Arc<Candidate>>> {
        let all = self.all_for_atom(atom);
        Ok(match level {
            MatchLevel::MatchAll => all,
            MatchLevel::MatchVisible => all
                .into_iter()
                .filter(|c| !self.masked.contains(&c.cpv.key()))
                .collect(),
            MatchLevel::BestVisible => all
                .into_iter()
                .filter(|c| !self.masked.contains(&c.cpv.key()))
                .next_back()
                .into_iter()
                .collect(),
        })
    }

    fn aux_get(&self, cpv: &Cpv, keys: &[&str]) -> HearthResult<Vec<String>> {
        let candidate = self.find(cpv).ok_or_else(|| HearthError::UnknownPackage {
            cpv: cpv.to_string(),
        })?;
        let extra = self.metadata.get(&cpv.key());
        let join = |set: &std::collections::BTreeSet<String>| {
            set.iter().cloned().collect::<Vec<_>>().join(" ")
        };
        Ok(keys
            .iter()
            .map(|key| match *key {
                keys::SLOT => format!("{}/{}", candidate.cpv.slot(), candidate.cpv.sub_slot()),
                keys::IUSE => join(&candidate.iuse),
                keys::USE => join(&candidate.use_enabled),
                keys::RDEPEND => candidate.runtime_deps.clone(),
                keys::REPOSITORY => candidate.cpv.repo().unwrap_or_default().to_string(),
                other => extra
                    .and_then(|m| m.get(other))
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn list_candidates(&self, cp: &str) -> Vec<Arc<Candidate>> {
        self.by_cp.get(cp).cloned().unwrap_or_default()
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::BulkMatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with(cpvs: &[&str]) -> MemoryDb {
        let mut db = MemoryDb::new();
        for cpv in cpvs {
            db.add(Candidate::new(Cpv::parse(cpv).unwrap()));
        }
        db
    }

    #[test]
    fn match_is_ascending() {
        let db = db_with(&["cat/pkg-2.0", "cat/pkg-1.0", "cat/pkg-1.5"]);
        let atom = Atom::new("cat/pkg").unwrap();
        let versions: Vec<String> = db
            .match_atom(&atom)
            .unwrap()
            .iter()
            .map(|c| c.cpv.version().to_string())
            .collect();
        assert_eq!(versions, ["1.0", "1.5", "2.0"]);
    }

    #[test]
    fn masking_and_levels() {
        let mut db = db_with(&["cat/pkg-1.0", "cat/pkg-2.0"]);
        db.mask(&Cpv::parse("cat/pkg-2.0").unwrap());
        let atom = Atom::new("cat/pkg").unwrap();

        assert_eq!(db.xmatch(MatchLevel::MatchAll, &atom).unwrap().len(), 2);
        assert_eq!(db.xmatch(MatchLevel::MatchVisible, &atom).unwrap().len(), 1);
        let best = db.xmatch(MatchLevel::BestVisible, &atom).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].cpv.version().as_str(), "1.0");
    }

    #[test]
    fn aux_get_unknown_package() {
        let db = db_with(&["cat/pkg-1.0"]);
        let missing = Cpv::parse("cat/other-1.0").unwrap();
        assert!(matches!(
            db.aux_get(&missing, &[keys::SLOT]),
            Err(HearthError::UnknownPackage { .. })
        ));
    }

    #[test]
    fn aux_get_fields() {
        let mut db = MemoryDb::new();
        let cpv = Cpv::parse("cat/pkg-1.0").unwrap().with_slot("2").unwrap();
        db.add(
            Candidate::new(cpv.clone())
                .with_iuse(["ssl"])
                .with_use(["ssl"])
                .with_runtime_deps("dev-libs/openssl"),
        );
        db.set_metadata(&cpv, keys::SPEC_VERSION, "3");

        let values = db
            .aux_get(
                &cpv,
                &[keys::SLOT, keys::IUSE, keys::RDEPEND, keys::SPEC_VERSION],
            )
            .unwrap();
        assert_eq!(values, ["2/2", "ssl", "dev-libs/openssl", "3"]);
    }

    #[test]
    fn declares_bulk_match() {
        let db = MemoryDb::new();
        assert!(db.supports(Capability::BulkMatch));
    }
}
