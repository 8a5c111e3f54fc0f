use hearth_core::atom::{Atom, ParseOptions};
use hearth_core::candidate::Candidate;
use hearth_core::cpv::Cpv;
use hearth_core::db::{MemoryDb, PackageDb};
use hearth_core::format::SpecVersion;
use hearth_core::version::compare;
use std::cmp::Ordering;

const SAMPLE_CPVS: &[&str] = &[
    "dev-lang/python-3.11.7",
    "dev-lang/python-3.12.1",
    "dev-libs/openssl-3.0.12",
    "dev-libs/openssl-3.1.4-r1",
];

fn sample_db() -> MemoryDb {
    let mut db = MemoryDb::new();
    for (cpv, slot) in SAMPLE_CPVS.iter().zip(["3.11", "3.12", "0/3", "0/3.1"]) {
        db.add(Candidate::new(
            Cpv::parse(cpv).unwrap().with_slot(slot).unwrap(),
        ));
    }
    db
}

#[test]
fn version_ordering_agrees_with_atom_ranges() {
    assert_eq!(compare("3.0.12", "3.1.4-r1").unwrap(), Ordering::Less);

    let db = sample_db();
    let atom = Atom::new(">=dev-libs/openssl-3.1").unwrap();
    let matches = db.match_atom(&atom).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].cpv.to_string(), "dev-libs/openssl-3.1.4-r1");
}

#[test]
fn slot_restrictions_select_parallel_installs() {
    let db = sample_db();
    let atom = Atom::new("dev-lang/python:3.11").unwrap();
    let matches = db.match_atom(&atom).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].cpv.version().as_str(), "3.11.7");

    let atom = Atom::new("dev-lang/python:9.9").unwrap();
    assert!(db.match_atom(&atom).unwrap().is_empty());
}

#[test]
fn sub_slot_is_part_of_the_constraint() {
    let db = sample_db();
    let atom = Atom::new("dev-libs/openssl:0/3.1").unwrap();
    let matches = db.match_atom(&atom).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].cpv.version().as_str(), "3.1.4-r1");
}

#[test]
fn wildcard_atoms_span_categories() {
    let db = sample_db();
    let opts = ParseOptions {
        allow_wildcard: true,
        ..ParseOptions::default()
    };
    let atom = Atom::parse("dev-*/openssl", &opts).unwrap();
    assert_eq!(db.match_atom(&atom).unwrap().len(), 2);
}

#[test]
fn format_version_gates_new_syntax() {
    let old = ParseOptions {
        spec_version: SpecVersion(1),
        ..ParseOptions::default()
    };
    assert!(Atom::parse("dev-libs/openssl:0/3.1", &old).is_err());
    assert!(Atom::parse("dev-libs/openssl:0", &old).is_ok());

    let oldest = ParseOptions {
        spec_version: SpecVersion(0),
        ..ParseOptions::default()
    };
    assert!(Atom::parse("dev-libs/openssl:0", &oldest).is_err());
}

#[test]
fn evaluated_atoms_remember_their_source() {
    let parent_use = ["qt"].iter().map(|s| s.to_string()).collect();
    let atom = Atom::new("dev-libs/dep[qt=,ssl]").unwrap();
    let evaluated = atom.evaluate_conditionals(&parent_use);
    assert_eq!(evaluated.to_string(), "dev-libs/dep[qt,ssl]");
    assert_eq!(evaluated.unevaluated().to_string(), "dev-libs/dep[qt=,ssl]");
}
