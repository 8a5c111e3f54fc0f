use hearth_core::candidate::Candidate;
use hearth_core::cpv::Cpv;
use hearth_core::db::MemoryDb;
use hearth_resolver::check::dep_check;
use hearth_resolver::context::ResolveContext;

fn cand(cpv: &str) -> Candidate {
    Candidate::new(Cpv::parse(cpv).unwrap())
}

fn names(atoms: &[hearth_core::atom::Atom]) -> Vec<String> {
    atoms.iter().map(|a| a.to_string()).collect()
}

#[test]
fn satisfied_expression_needs_nothing() {
    let mut db = MemoryDb::new();
    db.add(cand("dev-libs/libfoo-1.0"));
    let mut installed = MemoryDb::new();
    installed.add(cand("dev-libs/libfoo-1.0").installed());
    let ctx = ResolveContext::new(&db, &installed);

    let selected = dep_check("dev-libs/libfoo", &ctx).unwrap();
    assert_eq!(selected, Some(vec![]));
}

#[test]
fn unsatisfied_atoms_are_selected_in_order() {
    let mut db = MemoryDb::new();
    db.add(cand("dev-libs/liba-1.0"));
    db.add(cand("dev-libs/libb-1.0"));
    let installed = MemoryDb::new();
    let ctx = ResolveContext::new(&db, &installed);

    let selected = dep_check("dev-libs/libb dev-libs/liba", &ctx).unwrap().unwrap();
    assert_eq!(names(&selected), ["dev-libs/libb", "dev-libs/liba"]);
}

#[test]
fn conditionals_follow_the_parent_flags() {
    let mut db = MemoryDb::new();
    db.add(cand("dev-libs/ssl-impl-1.0"));
    db.add(cand("dev-libs/plain-impl-1.0"));
    let installed = MemoryDb::new();
    let ctx = ResolveContext::new(&db, &installed).with_use(["ssl"]);

    let selected = dep_check(
        "ssl? ( dev-libs/ssl-impl ) !ssl? ( dev-libs/plain-impl )",
        &ctx,
    )
    .unwrap()
    .unwrap();
    assert_eq!(names(&selected), ["dev-libs/ssl-impl"]);
}

#[test]
fn disjunction_prefers_installed_members() {
    let mut db = MemoryDb::new();
    db.add(cand("app-editors/vim-9.0"));
    db.add(cand("app-editors/emacs-29.1"));
    db.add(cand("app-misc/tool-1.0"));
    let mut installed = MemoryDb::new();
    installed.add(cand("app-editors/emacs-29.1").installed());
    let ctx = ResolveContext::new(&db, &installed);

    // The installed alternative satisfies the group outright.
    let selected = dep_check("|| ( app-editors/vim app-editors/emacs )", &ctx).unwrap();
    assert_eq!(selected, Some(vec![]));

    // A version the database cannot provide loses to an available
    // alternative, despite the installed older copy.
    let selected = dep_check(
        "|| ( >=app-editors/emacs-30 app-misc/tool )",
        &ctx,
    )
    .unwrap()
    .unwrap();
    assert_eq!(names(&selected), ["app-misc/tool"]);
}

#[test]
fn virtuals_expand_through_providers() {
    let mut db = MemoryDb::new();
    db.add(cand("virtual/editor-1").with_runtime_deps("app-editors/vim"));
    db.add(cand("virtual/editor-2").with_runtime_deps("app-editors/emacs"));
    db.add(cand("app-editors/vim-9.0"));
    db.add(cand("app-editors/emacs-29.1"));
    let installed = MemoryDb::new();
    let ctx = ResolveContext::new(&db, &installed);

    // Nothing installed: the highest provider wins.
    let selected = dep_check("virtual/editor", &ctx).unwrap().unwrap();
    assert_eq!(names(&selected), ["app-editors/emacs", "=virtual/editor-2"]);

    // With the lower provider's package installed, its branch wins
    // instead.
    let mut installed = MemoryDb::new();
    installed.add(cand("app-editors/vim-9.0").installed());
    installed.add(cand("virtual/editor-1").installed());
    let ctx = ResolveContext::new(&db, &installed);
    let selected = dep_check("virtual/editor", &ctx).unwrap();
    assert_eq!(selected, Some(vec![]));
}

#[test]
fn blockers_surface_for_the_caller() {
    let mut db = MemoryDb::new();
    db.add(cand("dev-libs/new-2.0"));
    let installed = MemoryDb::new();
    let ctx = ResolveContext::new(&db, &installed);

    let selected = dep_check("dev-libs/new !dev-libs/old", &ctx).unwrap().unwrap();
    assert_eq!(names(&selected), ["dev-libs/new", "!dev-libs/old"]);
}

#[test]
fn selected_atoms_serialize_as_strings() {
    let mut db = MemoryDb::new();
    db.add(cand("dev-libs/liba-1.0"));
    let installed = MemoryDb::new();
    let ctx = ResolveContext::new(&db, &installed);

    let selected = dep_check(">=dev-libs/liba-1.0", &ctx).unwrap().unwrap();
    let json = serde_json::to_string(&selected).unwrap();
    assert_eq!(json, r#"[">=dev-libs/liba-1.0"]"#);
}

#[test]
fn malformed_expressions_are_refused() {
    let db = MemoryDb::new();
    let installed = MemoryDb::new();
    let ctx = ResolveContext::new(&db, &installed);

    assert!(dep_check("|| ( dev-libs/liba", &ctx).is_err());
    assert!(dep_check("x? dev-libs/liba", &ctx).is_err());
}
