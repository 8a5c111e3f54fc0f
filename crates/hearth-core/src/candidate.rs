//! Resolution-time package views.

use std::collections::BTreeSet;
use std::fmt;

use crate::cpv::Cpv;

/// A package as the resolver sees it: identity plus the flag state and
/// installation status that matching and conflict solving consult.
///
/// Candidates are cheap snapshots produced by database queries; the
/// resolver never mutates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub cpv: Cpv,
    /// Flags this package declares.
    pub iuse: BTreeSet<String>,
    /// Flags currently enabled.
    pub use_enabled: BTreeSet<String>,
    /// Flags the profile forbids enabling.
    pub use_mask: BTreeSet<String>,
    /// Flags the profile forces on.
    pub use_force: BTreeSet<String>,
    pub installed: bool,
    /// Raw runtime-dependency expression, consulted when this candidate
    /// acts as a virtual provider.
    pub runtime_deps: String,
}

impl Candidate {
    pub fn new(cpv: Cpv) -> Self {
        Candidate {
            cpv,
            iuse: BTreeSet::new(),
            use_enabled: BTreeSet::new(),
            use_mask: BTreeSet::new(),
            use_force: BTreeSet::new(),
            installed: false,
            runtime_deps: String::new(),
        }
    }

    pub fn with_iuse<I: IntoIterator<Item = S>, S: Into<String>>(mut self, flags: I) -> Self {
        self.iuse = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_use<I: IntoIterator<Item = S>, S: Into<String>>(mut self, flags: I) -> Self {
        self.use_enabled = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_use_mask<I: IntoIterator<Item = S>, S: Into<String>>(mut self, flags: I) -> Self {
        self.use_mask = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_use_force<I: IntoIterator<Item = S>, S: Into<String>>(mut self, flags: I) -> Self {
        self.use_force = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_runtime_deps(mut self, deps: impl Into<String>) -> Self {
        self.runtime_deps = deps.into();
        self
    }

    pub fn installed(mut self) -> Self {
        self.installed = true;
        self
    }

    /// Whether the package declares `flag`.
    pub fn is_valid_flag(&self, flag: &str) -> bool {
        self.iuse.contains(flag)
    }

    /// Whether every flag in `flags` is declared.
    pub fn declares_all<'a, I: IntoIterator<Item = &'a String>>(&self, flags: I) -> bool {
        flags.into_iter().all(|f| self.iuse.contains(f))
    }

    /// Unique identity for use as a map key, distinguishing an installed
    /// instance from an available one of the same cpv.
    pub fn key(&self) -> String {
        if self.installed {
            format!("{}#installed", self.cpv.key())
        } else {
            self.cpv.key()
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cpv)
    }
}
