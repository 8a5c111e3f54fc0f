//! Dependency resolution engine for the hearth package manager:
//! dependency-expression reduction, virtual expansion, disjunction choice,
//! and slot-conflict solving.
//!
//! The engine is single-threaded and CPU-bound. It performs no I/O beyond
//! the injected read-only package database, holds no locks, and keeps all
//! per-pass state in an explicit [`context::ResolveContext`].

pub mod check;
pub mod choose;
pub mod conflict;
pub mod context;
pub mod graph;
pub mod reduce;
pub mod virtuals;
