//! Structural matching of atoms against candidates.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::atom::{Atom, Op, SlotDep, UseDefault, UseState};
use crate::candidate::Candidate;

/// Filter `candidates` down to those the atom matches. Blocker markers are
/// ignored; matching is always against the underlying requirement. Input
/// order is preserved.
pub fn match_from_list(atom: &Atom, candidates: &[Arc<Candidate>]) -> Vec<Arc<Candidate>> {
    candidates
        .iter()
        .filter(|c| match_one(atom, c))
        .cloned()
        .collect()
}

impl Atom {
    /// Check a single candidate against this atom.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        match_one(self, candidate)
    }
}

fn match_one(atom: &Atom, candidate: &Candidate) -> bool {
    if !cp_matches(atom, candidate) {
        return false;
    }

    if let Some(op) = atom.op() {
        let wanted = match atom.version() {
            Some(v) => v,
            None => return false,
        };
        let have = candidate.cpv.version();
        let ok = match op {
            Op::Eq => have.cmp(wanted) == Ordering::Equal,
            Op::EqGlob => glob_version_match(wanted.as_str(), have.as_str()),
            Op::Approx => have.cmp_without_revision(wanted) == Ordering::Equal,
            Op::Less => have.cmp(wanted) == Ordering::Less,
            Op::LessEq => have.cmp(wanted) != Ordering::Greater,
            Op::Greater => have.cmp(wanted) == Ordering::Greater,
            Op::GreaterEq => have.cmp(wanted) != Ordering::Less,
        };
        if !ok {
            return false;
        }
    }

    if let Some(slot) = atom.slot_dep() {
        if !slot_matches(slot, candidate) {
            return false;
        }
    }

    if !use_matches(atom, candidate) {
        return false;
    }

    if let Some(repo) = atom.repo() {
        if let Some(have) = candidate.cpv.repo() {
            if have != repo {
                return false;
            }
        }
    }

    true
}

fn cp_matches(atom: &Atom, candidate: &Candidate) -> bool {
    if atom.is_wildcard() {
        segment_matches(atom.category(), candidate.cpv.category())
            && segment_matches(atom.name(), candidate.cpv.name())
    } else {
        atom.cp() == candidate.cpv.cp()
    }
}

/// Match one `*`-wildcard segment against a concrete name.
fn segment_matches(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return part.is_empty() || rest.ends_with(part);
        } else if part.is_empty() {
            continue;
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// `=*` prefix match. The prefix applies to the version string with the
/// leading integer's zeros normalized away, and only matches on a boundary
/// between version parts, so `1*` matches `1.0` but not `10`.
fn glob_version_match(wanted: &str, have: &str) -> bool {
    let wanted = normalize_leading(wanted);
    let have = normalize_leading(have);
    if !have.starts_with(&wanted) {
        return false;
    }
    match have[wanted.len()..].chars().next() {
        None => true,
        Some(next) => {
            if matches!(next, '.' | '_' | '-') {
                return true;
            }
            let last = match wanted.chars().last() {
                Some(c) => c,
                None => return false,
            };
            last.is_ascii_digit() != next.is_ascii_digit()
        }
    }
}

/// Strip leading zeros off the first numeric component.
fn normalize_leading(version: &str) -> String {
    let head_len = version
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(version.len());
    let (head, tail) = version.split_at(head_len);
    let stripped = head.trim_start_matches('0');
    let head = if stripped.is_empty() { "0" } else { stripped };
    format!("{head}{tail}")
}

fn slot_matches(slot: &SlotDep, candidate: &Candidate) -> bool {
    let wanted = match &slot.slot {
        Some(s) => s,
        // Bare `:=` / `:*` accept any slot.
        None => return true,
    };
    if wanted != candidate.cpv.slot() {
        return false;
    }
    match &slot.sub_slot {
        Some(sub) => sub == candidate.cpv.sub_slot(),
        None => true,
    }
}

/// Check USE constraints against the candidate's declared and enabled
/// flags. Required flags the candidate does not declare fail the match,
/// except for installed candidates whose declaration sets may predate the
/// flags in question.
fn use_matches(atom: &Atom, candidate: &Candidate) -> bool {
    let unevaluated = atom.unevaluated();
    if let Some(use_dep) = unevaluated.use_dep() {
        if !candidate.installed && !candidate.declares_all(use_dep.required()) {
            return false;
        }
    }

    let use_dep = match atom.use_dep() {
        Some(u) => u,
        None => return true,
    };

    for c in use_dep.constraints() {
        let declared = candidate.is_valid_flag(&c.flag);
        let enabled = candidate.use_enabled.contains(&c.flag);
        // An undeclared flag falls back to its default marker; without one
        // only an installed candidate (whose enabled set is authoritative
        // even when its declaration set is incomplete) can still match.
        let effective = if declared {
            enabled
        } else {
            match c.default {
                Some(UseDefault::Enabled) => true,
                Some(UseDefault::Disabled) => false,
                None => enabled,
            }
        };
        match c.state {
            UseState::Enabled => {
                if !effective {
                    return false;
                }
            }
            UseState::Disabled => {
                if effective {
                    return false;
                }
            }
            // Unevaluated conditionals constrain nothing by themselves.
            UseState::EnabledIf
            | UseState::DisabledIf
            | UseState::Equal
            | UseState::NotEqual => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpv::Cpv;

    fn cand(cpv: &str) -> Arc<Candidate> {
        Arc::new(Candidate::new(Cpv::parse(cpv).unwrap()))
    }

    fn cands(cpvs: &[&str]) -> Vec<Arc<Candidate>> {
        cpvs.iter().map(|s| cand(s)).collect()
    }

    fn matched(atom: &str, cpvs: &[&str]) -> Vec<String> {
        let atom = Atom::new(atom).unwrap();
        match_from_list(&atom, &cands(cpvs))
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn range_operators() {
        let list = ["cat/pkg-1.0", "cat/pkg-1.5", "cat/pkg-2.0"];
        assert_eq!(matched(">=cat/pkg-1.5", &list), ["cat/pkg-1.5", "cat/pkg-2.0"]);
        assert_eq!(matched("<cat/pkg-1.5", &list), ["cat/pkg-1.0"]);
        assert_eq!(matched("=cat/pkg-1.5", &list), ["cat/pkg-1.5"]);
        assert_eq!(matched(">cat/pkg-2.0", &list), Vec::<String>::new());
    }

    #[test]
    fn approx_ignores_revision() {
        let list = ["cat/pkg-1.0-r1", "cat/pkg-1.0-r5", "cat/pkg-1.1"];
        assert_eq!(
            matched("~cat/pkg-1.0", &list),
            ["cat/pkg-1.0-r1", "cat/pkg-1.0-r5"]
        );
    }

    #[test]
    fn exact_matches_revision() {
        let list = ["cat/pkg-1.0", "cat/pkg-1.0-r1"];
        assert_eq!(matched("=cat/pkg-1.0-r1", &list), ["cat/pkg-1.0-r1"]);
        // -r0 and no revision are the same version.
        assert_eq!(matched("=cat/pkg-1.0-r0", &list), ["cat/pkg-1.0"]);
    }

    #[test]
    fn glob_respects_boundaries() {
        let list = ["cat/pkg-1.0", "cat/pkg-1.5", "cat/pkg-10.0", "cat/pkg-1_alpha"];
        assert_eq!(
            matched("=cat/pkg-1*", &list),
            ["cat/pkg-1.0", "cat/pkg-1.5", "cat/pkg-1_alpha"]
        );
        assert_eq!(matched("=cat/pkg-1.0*", &list), ["cat/pkg-1.0"]);
        // Leading zeros are normalized on both sides.
        assert_eq!(matched("=cat/pkg-01*", &list).len(), 3);
    }

    #[test]
    fn different_package_never_matches() {
        assert!(matched("cat/other", &["cat/pkg-1.0"]).is_empty());
        assert_eq!(matched("cat/pkg", &["cat/pkg-1.0"]), ["cat/pkg-1.0"]);
    }

    #[test]
    fn slot_matching() {
        let one = Arc::new(Candidate::new(
            Cpv::parse("cat/pkg-1.0").unwrap().with_slot("1/a").unwrap(),
        ));
        let two = Arc::new(Candidate::new(
            Cpv::parse("cat/pkg-2.0").unwrap().with_slot("2/b").unwrap(),
        ));
        let list = vec![one, two];

        let atom = Atom::new("cat/pkg:1").unwrap();
        assert_eq!(match_from_list(&atom, &list).len(), 1);
        let atom = Atom::new("cat/pkg:2/b").unwrap();
        assert_eq!(match_from_list(&atom, &list)[0].to_string(), "cat/pkg-2.0");
        let atom = Atom::new("cat/pkg:2/c").unwrap();
        assert!(match_from_list(&atom, &list).is_empty());
        let atom = Atom::new("cat/pkg:*").unwrap();
        assert_eq!(match_from_list(&atom, &list).len(), 2);
    }

    #[test]
    fn use_constraints() {
        let c = Arc::new(
            Candidate::new(Cpv::parse("cat/pkg-1.0").unwrap())
                .with_iuse(["ssl", "static"])
                .with_use(["ssl"]),
        );
        let list = vec![c];

        assert!(!match_from_list(&Atom::new("cat/pkg[ssl]").unwrap(), &list).is_empty());
        assert!(match_from_list(&Atom::new("cat/pkg[-ssl]").unwrap(), &list).is_empty());
        assert!(!match_from_list(&Atom::new("cat/pkg[-static]").unwrap(), &list).is_empty());
        // Undeclared flag without a default: no match.
        assert!(match_from_list(&Atom::new("cat/pkg[caps]").unwrap(), &list).is_empty());
        // Undeclared flag with (+): assumed enabled.
        assert!(!match_from_list(&Atom::new("cat/pkg[caps(+)]").unwrap(), &list).is_empty());
        assert!(match_from_list(&Atom::new("cat/pkg[caps(-)]").unwrap(), &list).is_empty());
    }

    #[test]
    fn installed_candidates_skip_declaration_check() {
        let c = Arc::new(
            Candidate::new(Cpv::parse("cat/pkg-1.0").unwrap())
                .with_use(["ssl"])
                .installed(),
        );
        let list = vec![c];
        assert!(!match_from_list(&Atom::new("cat/pkg[ssl]").unwrap(), &list).is_empty());
    }

    #[test]
    fn wildcard_keys() {
        let opts = crate::atom::ParseOptions {
            allow_wildcard: true,
            ..Default::default()
        };
        let atom = Atom::parse("*/pkg", &opts).unwrap();
        assert!(!match_from_list(&atom, &cands(&["cat/pkg-1.0"])).is_empty());
        let atom = Atom::parse("dev-*/pkg", &opts).unwrap();
        assert!(match_from_list(&atom, &cands(&["cat/pkg-1.0"])).is_empty());
        assert!(!match_from_list(&atom, &cands(&["dev-libs/pkg-1.0"])).is_empty());
    }

    #[test]
    fn repo_restriction() {
        let c = Arc::new(Candidate::new(
            Cpv::parse("cat/pkg-1.0").unwrap().with_repo("core"),
        ));
        let list = vec![c];
        assert!(!match_from_list(&Atom::new("cat/pkg::core").unwrap(), &list).is_empty());
        assert!(match_from_list(&Atom::new("cat/pkg::extra").unwrap(), &list).is_empty());
    }
}
