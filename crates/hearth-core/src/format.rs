//! Package-format versioning.
//!
//! Each package declares the format version its metadata was written
//! against; the version decides which dependency syntax is legal. The
//! capabilities are declared here rather than probed structurally.

use std::fmt;

use serde::Serialize;

/// A package-format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SpecVersion(pub u8);

impl SpecVersion {
    /// The newest format this core understands.
    pub const CURRENT: SpecVersion = SpecVersion(3);

    /// `:slot` restrictions in atoms.
    pub fn supports_slot_deps(self) -> bool {
        self.0 >= 1
    }

    /// `:=` / `:*` slot operators and `slot/sub_slot` specs.
    pub fn supports_slot_operators(self) -> bool {
        self.0 >= 2
    }

    /// `(+)` / `(-)` defaults on USE constraints.
    pub fn supports_use_defaults(self) -> bool {
        self.0 >= 2
    }

    /// `!!` hard blockers.
    pub fn supports_strong_blocks(self) -> bool {
        self.0 >= 1
    }

    /// The `->` rename operator in source-URI expressions.
    pub fn supports_uri_renames(self) -> bool {
        self.0 >= 2
    }
}

impl Default for SpecVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SpecVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(SpecVersion)
    }
}
