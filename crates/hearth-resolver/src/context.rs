//! Per-resolution context.
//!
//! Everything one resolution pass needs travels in a [`ResolveContext`]
//! passed explicitly through the call chain: the injected databases, a
//! snapshot of the policy flag state, the in-progress selection graph, and
//! the requesting package. There is no ambient global state, so a pass is
//! deterministic and replayable against the same database snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use hearth_core::atom::Atom;
use hearth_core::candidate::Candidate;
use hearth_core::db::PackageDb;
use hearth_core::format::SpecVersion;
use hearth_core::META_CATEGORY;

use crate::graph::SelectionGraph;
use crate::reduce::{FlagState, ReduceOptions};

/// State for one resolution pass.
pub struct ResolveContext<'a> {
    /// Available packages (the build database).
    pub db: &'a dyn PackageDb,
    /// Installed packages.
    pub installed: &'a dyn PackageDb,
    /// Candidates already selected during this pass.
    pub graph: SelectionGraph,
    /// Profile-enabled flags, used when no requesting package provides a
    /// flag state of its own.
    pub use_enabled: BTreeSet<String>,
    /// Flags the profile forbids enabling.
    pub use_mask: BTreeSet<String>,
    /// Flags the profile forces on.
    pub use_force: BTreeSet<String>,
    pub spec_version: SpecVersion,
    /// Category treated as meta-packages.
    pub meta_category: String,
    /// The package whose dependencies are being resolved, when known.
    pub parent: Option<Arc<Candidate>>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(db: &'a dyn PackageDb, installed: &'a dyn PackageDb) -> Self {
        ResolveContext {
            db,
            installed,
            graph: SelectionGraph::new(),
            use_enabled: BTreeSet::new(),
            use_mask: BTreeSet::new(),
            use_force: BTreeSet::new(),
            spec_version: SpecVersion::CURRENT,
            meta_category: META_CATEGORY.to_string(),
            parent: None,
        }
    }

    pub fn with_use<I: IntoIterator<Item = S>, S: Into<String>>(mut self, flags: I) -> Self {
        self.use_enabled = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent: Arc<Candidate>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Whether an atom names a meta-package.
    pub fn is_meta(&self, atom: &Atom) -> bool {
        atom.category() == self.meta_category
    }

    pub fn is_meta_cp(&self, cp: &str) -> bool {
        cp.split('/').next() == Some(self.meta_category.as_str())
    }

    /// The flag state dependency expressions of the current parent are
    /// evaluated under.
    pub fn parent_use(&self) -> &BTreeSet<String> {
        match &self.parent {
            Some(parent) => &parent.use_enabled,
            None => &self.use_enabled,
        }
    }

    /// Reduce options carrying this context's policy snapshot.
    pub fn reduce_options<'s>(&'s self, flags: FlagState<'s>) -> ReduceOptions<'s> {
        ReduceOptions {
            flags,
            masked: Some(&self.use_mask),
            forced: Some(&self.use_force),
            spec_version: self.spec_version,
            allow_wildcard: false,
            allow_repo: true,
        }
    }
}
