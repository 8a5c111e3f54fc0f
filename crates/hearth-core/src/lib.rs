//! Core data model for the hearth package manager.
//!
//! This crate defines the types the resolution engine is built on: the
//! version grammar and its total ordering, concrete package identities,
//! dependency atoms with USE/slot/repository constraints, structural
//! matching, resolution-time candidate views, package-format capability
//! switches, and the package-database interface.
//!
//! This crate is intentionally free of resolution policy and of any I/O.

/// Category whose packages are meta-packages resolved through providers.
pub const META_CATEGORY: &str = "virtual";

pub mod atom;
pub mod candidate;
pub mod cpv;
pub mod db;
pub mod error;
pub mod format;
pub mod matching;
pub mod version;
