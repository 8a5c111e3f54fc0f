use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for the resolution core.
///
/// Only structurally invalid input produces an error. "Nothing matched" and
/// "no solution found" are ordinary negative results returned as data.
#[derive(Debug, Error, Diagnostic)]
pub enum HearthError {
    /// Version string does not match the version grammar.
    #[error("malformed version: '{input}'")]
    #[diagnostic(help("versions look like 2.1.3b_alpha4-r2"))]
    MalformedVersion { input: String },

    /// Dependency atom could not be parsed.
    #[error("malformed atom '{atom}': {reason}")]
    MalformedAtom { atom: String, reason: String },

    /// Dependency expression is structurally invalid.
    #[error("malformed dependency expression: {message}")]
    #[diagnostic(help("check for unbalanced parentheses and misplaced operators"))]
    MalformedDependency { message: String },

    /// The database has no entry for the given package.
    #[error("unknown package: {cpv}")]
    UnknownPackage { cpv: String },

    /// A failure inside a virtual provider's own dependency expression,
    /// tagged with the provider that carried it.
    #[error("virtual provider {provider}: {source}")]
    VirtualProvider {
        provider: String,
        #[source]
        source: Box<HearthError>,
    },
}

impl HearthError {
    pub fn malformed_atom(atom: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAtom {
            atom: atom.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_dep(message: impl Into<String>) -> Self {
        Self::MalformedDependency {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the resolution core.
pub type HearthResult<T> = Result<T, HearthError>;
