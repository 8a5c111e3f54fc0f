use std::collections::HashMap;
use std::sync::Arc;

use hearth_core::atom::Atom;
use hearth_core::candidate::Candidate;
use hearth_core::cpv::Cpv;
use hearth_resolver::conflict::{ConflictGroup, ParentEdge, SlotConflictSolver};

fn cand(cpv: &str) -> Candidate {
    Candidate::new(Cpv::parse(cpv).unwrap())
}

fn edge(parent: &Arc<Candidate>, atom: &str) -> ParentEdge {
    ParentEdge {
        parent: Some(parent.clone()),
        atom: Atom::new(atom)
            .unwrap()
            .evaluate_conditionals(&parent.use_enabled),
    }
}

/// Two packages pull different flag states of one dependency; flipping a
/// flag on the not-yet-built candidate resolves the conflict.
#[test]
fn flag_change_resolves_a_two_group_conflict() {
    let dep_new = Arc::new(cand("dev-libs/dep-2.0").with_iuse(["ssl"]));
    let dep_old = Arc::new(cand("dev-libs/dep-1.0").with_iuse(["ssl"]).installed());
    let wants_ssl = Arc::new(cand("app-misc/one-1.0"));

    let groups = vec![ConflictGroup {
        slot_key: "dev-libs/dep:0".to_string(),
        candidates: vec![dep_new.clone(), dep_old.clone()],
    }];
    let mut parents: HashMap<String, Vec<ParentEdge>> = HashMap::new();
    parents.insert(dep_new.key(), vec![edge(&wants_ssl, "dev-libs/dep[ssl]")]);
    parents.insert(dep_old.key(), vec![edge(&wants_ssl, "dev-libs/dep[ssl]")]);

    let solver = SlotConflictSolver::new(groups, parents);
    let solutions = solver.solve();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0][&dep_new.key()].get("ssl"), Some(&true));

    // The installed candidate never appears in a solution: the first
    // (all-not-yet-built) configuration already succeeded.
    assert!(!solutions[0].contains_key(&dep_old.key()));
}

#[test]
fn equals_constraint_can_change_the_parent_too() {
    // parent[qt] requires dep[qt=]; the chosen candidate has qt disabled,
    // so either the candidate gains qt or the parent loses it.
    let dep_a = Arc::new(cand("dev-libs/dep-2.0").with_iuse(["qt"]));
    let dep_b = Arc::new(cand("dev-libs/dep-1.0").with_iuse(["qt"]));
    let parent = Arc::new(cand("app-misc/gui-1.0").with_iuse(["qt"]).with_use(["qt"]));

    let groups = vec![ConflictGroup {
        slot_key: "dev-libs/dep:0".to_string(),
        candidates: vec![dep_a.clone(), dep_b.clone()],
    }];
    let mut parents: HashMap<String, Vec<ParentEdge>> = HashMap::new();
    parents.insert(dep_a.key(), vec![edge(&parent, "dev-libs/dep[qt=]")]);
    parents.insert(dep_b.key(), vec![edge(&parent, "dev-libs/dep[qt=]")]);

    let solver = SlotConflictSolver::new(groups, parents);
    let solutions = solver.solve();
    assert!(!solutions.is_empty());
    // The enabling fix must be among the solutions.
    assert!(solutions
        .iter()
        .any(|s| s.get(&dep_a.key()).and_then(|f| f.get("qt")) == Some(&true)));
}

#[test]
fn no_solution_reports_empty_not_error() {
    let dep_a = Arc::new(cand("dev-libs/dep-2.0"));
    let dep_b = Arc::new(cand("dev-libs/dep-1.0"));
    let p1 = Arc::new(cand("app-misc/one-1.0"));
    let p2 = Arc::new(cand("app-misc/two-1.0"));

    let groups = vec![ConflictGroup {
        slot_key: "dev-libs/dep:0".to_string(),
        candidates: vec![dep_a.clone(), dep_b.clone()],
    }];
    let mut parents: HashMap<String, Vec<ParentEdge>> = HashMap::new();
    parents.insert(dep_a.key(), vec![edge(&p1, ">=dev-libs/dep-2.0")]);
    parents.insert(dep_b.key(), vec![edge(&p2, "<dev-libs/dep-2.0")]);

    let solver = SlotConflictSolver::new(groups, parents);
    assert!(solver.solve().is_empty());
    assert!(solver.changes().is_empty());
}

#[test]
fn solutions_serialize_for_the_reporter() {
    let dep_new = Arc::new(cand("dev-libs/dep-2.0").with_iuse(["ssl"]));
    let dep_old = Arc::new(cand("dev-libs/dep-1.0").with_iuse(["ssl"]));
    let wants_ssl = Arc::new(cand("app-misc/one-1.0"));

    let groups = vec![ConflictGroup {
        slot_key: "dev-libs/dep:0".to_string(),
        candidates: vec![dep_new.clone(), dep_old.clone()],
    }];
    let mut parents: HashMap<String, Vec<ParentEdge>> = HashMap::new();
    parents.insert(dep_new.key(), vec![edge(&wants_ssl, "dev-libs/dep[ssl]")]);
    parents.insert(dep_old.key(), vec![edge(&wants_ssl, "dev-libs/dep[ssl]")]);

    let solver = SlotConflictSolver::new(groups, parents);
    let json = serde_json::to_string(&solver.changes()).unwrap();
    assert_eq!(json, r#"[{"dev-libs/dep-2.0":{"ssl":true}}]"#);
}
