//! Disjunction resolution.
//!
//! Given a reduced requirement tree and a parallel tree marking which
//! leaves are already satisfied, strip everything satisfied and pick one
//! branch from every remaining disjunction. Branches are classified into
//! ordered preference bins; the first viable branch of the first
//! non-empty bin wins. Running out of permissible branches is a normal
//! negative outcome, not an error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hearth_core::atom::Atom;
use hearth_core::candidate::Candidate;
use hearth_core::error::HearthResult;

use crate::context::ResolveContext;
use crate::reduce::Dep;

/// Preference bins, most preferred first.
const BIN_IN_GRAPH: usize = 0;
const BIN_INSTALLED_SLOT: usize = 1;
const BIN_INSTALLED_ANY_SLOT: usize = 2;
const BIN_AVAILABLE: usize = 3;
const BIN_UNSAT_IN_GRAPH: usize = 4;
const BIN_UNSAT_INSTALLED: usize = 5;
const BIN_UNSAT_NON_INSTALLED: usize = 6;
const BIN_OTHER_INSTALLED: usize = 7;
const BIN_OTHER_INSTALLED_SOME: usize = 8;
const BIN_OTHER_INSTALLED_ANY_SLOT: usize = 9;
const BIN_OTHER: usize = 10;
const BIN_COUNT: usize = 11;

/// One classified disjunction branch.
struct Choice {
    atoms: Vec<Atom>,
    /// Highest matching candidate per cp, for upgrade-bias reordering.
    cp_map: BTreeMap<String, Arc<Candidate>>,
    all_available: bool,
    all_in_graph: bool,
}

/// Mark which leaves of a requirement tree are already satisfied, either
/// by a selection this pass has made or by an installed package. Blockers
/// are never satisfied here; they are surfaced for the caller to enforce.
pub fn mark_satisfied(
    deps: &[Dep<Atom>],
    ctx: &ResolveContext<'_>,
) -> HearthResult<Vec<Dep<bool>>> {
    deps.iter().map(|dep| mark_node(dep, ctx)).collect()
}

fn mark_node(dep: &Dep<Atom>, ctx: &ResolveContext<'_>) -> HearthResult<Dep<bool>> {
    Ok(match dep {
        Dep::Item(atom) => {
            let satisfied = !atom.is_blocker()
                && (!ctx.graph.match_atom(atom).is_empty()
                    || !ctx.installed.match_atom(atom)?.is_empty());
            Dep::Item(satisfied)
        }
        Dep::AllOf(children) => Dep::AllOf(mark_satisfied(children, ctx)?),
        Dep::AnyOf(children) => Dep::AnyOf(mark_satisfied(children, ctx)?),
    })
}

/// A satisfied tree marking every leaf unsatisfied, for callers that want
/// preference-based selection over the whole tree.
pub fn unsatisfied(deps: &[Dep<Atom>]) -> Vec<Dep<bool>> {
    deps.iter().map(unsatisfied_node).collect()
}

fn unsatisfied_node(dep: &Dep<Atom>) -> Dep<bool> {
    match dep {
        Dep::Item(_) => Dep::Item(false),
        Dep::AllOf(children) => Dep::AllOf(unsatisfied(children)),
        Dep::AnyOf(children) => Dep::AnyOf(unsatisfied(children)),
    }
}

fn eval_satisfied(dep: &Dep<bool>) -> bool {
    match dep {
        Dep::Item(satisfied) => *satisfied,
        Dep::AllOf(children) => children.iter().all(eval_satisfied),
        Dep::AnyOf(children) => children.iter().any(eval_satisfied),
    }
}

/// Walk the requirement tree, keep unsatisfied leaves, and resolve each
/// disjunction to its preferred branch. `Ok(None)` means some disjunction
/// had no permissible branch.
pub fn choose(
    unreduced: &[Dep<Atom>],
    satisfied: &[Dep<bool>],
    ctx: &ResolveContext<'_>,
) -> HearthResult<Option<Vec<Atom>>> {
    debug_assert_eq!(unreduced.len(), satisfied.len());
    let mut out = Vec::new();
    for (node, sat) in unreduced.iter().zip(satisfied) {
        match (node, sat) {
            (Dep::Item(atom), Dep::Item(is_satisfied)) => {
                if !is_satisfied {
                    out.push(atom.clone());
                }
            }
            (Dep::AllOf(children), Dep::AllOf(sat_children)) => {
                match choose(children, sat_children, ctx)? {
                    Some(atoms) => out.extend(atoms),
                    None => return Ok(None),
                }
            }
            (Dep::AnyOf(branches), Dep::AnyOf(sat_branches)) => {
                match choose_any_of(branches, sat_branches, ctx)? {
                    Some(atoms) => out.extend(atoms),
                    None => return Ok(None),
                }
            }
            _ => unreachable!("satisfied tree mirrors the requirement tree"),
        }
    }
    Ok(Some(out))
}

fn choose_any_of(
    branches: &[Dep<Atom>],
    sat_branches: &[Dep<bool>],
    ctx: &ResolveContext<'_>,
) -> HearthResult<Option<Vec<Atom>>> {
    // One satisfied branch satisfies the whole disjunction.
    if sat_branches.iter().any(eval_satisfied) {
        return Ok(Some(Vec::new()));
    }

    let mut bins: [Vec<Choice>; BIN_COUNT] = std::array::from_fn(|_| Vec::new());

    'branches: for (branch, sat) in branches.iter().zip(sat_branches) {
        let atoms = match branch {
            Dep::Item(atom) => vec![atom.clone()],
            nested => {
                let nested_sat = std::slice::from_ref(sat);
                match choose(std::slice::from_ref(nested), nested_sat, ctx)? {
                    Some(atoms) => atoms,
                    // The branch cannot be satisfied at all.
                    None => continue,
                }
            }
        };

        let mut all_available = true;
        let mut all_use_satisfied = true;
        let mut all_use_unmasked = true;
        let mut slot_map: BTreeMap<String, Arc<Candidate>> = BTreeMap::new();
        let mut slot_atoms: BTreeMap<String, Vec<Atom>> = BTreeMap::new();
        let mut cp_map: BTreeMap<String, Arc<Candidate>> = BTreeMap::new();

        for atom in &atoms {
            if atom.is_blocker() {
                continue;
            }
            // USE constraints are ignored while probing availability so
            // they cannot distort preference evaluation.
            let avail = ctx.db.match_atom(&atom.without_use())?;
            let mut avail_pkg = match avail.last() {
                Some(pkg) => pkg.clone(),
                None => {
                    all_available = false;
                    all_use_satisfied = false;
                    break;
                }
            };

            if atom.use_dep().is_some() {
                let with_use = ctx.db.match_atom(atom)?;
                match with_use.last() {
                    Some(pkg) => avail_pkg = pkg.clone(),
                    None => {
                        all_use_satisfied = false;
                        // Work out whether satisfying the constraints
                        // would need masked or forced flags to change.
                        let violated = atom.violated_conditionals(
                            &avail_pkg.use_enabled,
                            &|f| avail_pkg.is_valid_flag(f),
                            Some(ctx.parent_use()),
                        );
                        if let Some(use_dep) = violated.use_dep() {
                            let masked = use_dep
                                .enabled_flags()
                                .any(|f| avail_pkg.use_mask.contains(f));
                            let forced = use_dep.disabled_flags().any(|f| {
                                avail_pkg.use_force.contains(f)
                                    && !avail_pkg.use_mask.contains(f)
                            });
                            if masked || forced {
                                all_use_unmasked = false;
                            }
                        }
                    }
                }
            }

            let slot_key = avail_pkg.cpv.slot_key();
            slot_map.insert(slot_key.clone(), avail_pkg.clone());
            slot_atoms.entry(slot_key.clone()).or_default().push(atom.clone());

            // Keep the per-cp choice internally consistent: prefer a
            // version satisfying every atom that landed in this slot, and
            // otherwise the highest version seen.
            let cp = avail_pkg.cpv.cp().to_string();
            let highest = cp_map.get(&cp);
            let mut all_match_current = false;
            let mut all_match_previous = false;
            if let Some(highest) = highest {
                if highest.cpv.slot() == avail_pkg.cpv.slot() {
                    let atoms_here = &slot_atoms[&slot_key];
                    all_match_current = atoms_here.iter().all(|a| a.matches(&avail_pkg));
                    all_match_previous = atoms_here.iter().all(|a| a.matches(highest));
                    if all_match_previous && !all_match_current {
                        continue;
                    }
                }
            }
            let current_higher = match cp_map.get(&cp) {
                Some(highest) => avail_pkg.cpv.version() > highest.cpv.version(),
                None => true,
            };
            if current_higher || (all_match_current && !all_match_previous) {
                cp_map.insert(cp, avail_pkg.clone());
            }
        }

        if all_available {
            // A branch that would loop straight back into the package
            // being resolved is rejected, unless an installed version
            // already covers that dependency.
            if let Some(parent) = &ctx.parent {
                for atom in &atoms {
                    if atom.is_blocker() || atom.cp() != parent.cpv.cp() {
                        continue;
                    }
                    if !ctx.installed.match_atom(atom)?.is_empty() {
                        continue;
                    }
                    if atom.matches(parent) {
                        tracing::debug!(atom = %atom, "rejecting branch: direct cycle");
                        continue 'branches;
                    }
                }
            }

            let mut all_installed = true;
            let mut cps: BTreeSet<&str> = BTreeSet::new();
            for atom in &atoms {
                if !atom.is_blocker() {
                    cps.insert(atom.cp());
                }
            }
            for cp in cps {
                // Meta-packages have zero installation cost.
                if ctx.is_meta_cp(cp) {
                    continue;
                }
                let cp_atom = Atom::new(cp)?;
                if ctx.installed.match_atom(&cp_atom)?.is_empty() {
                    all_installed = false;
                    break;
                }
            }

            let mut all_installed_slots = false;
            if all_installed {
                all_installed_slots = true;
                for slot_key in slot_map.keys() {
                    if ctx.is_meta_cp(slot_key) {
                        continue;
                    }
                    let slot_atom = Atom::new(slot_key)?;
                    if ctx.installed.match_atom(&slot_atom)?.is_empty() {
                        all_installed_slots = false;
                        break;
                    }
                }
            }

            let mut all_in_graph = !ctx.graph.is_empty();
            if all_in_graph {
                for atom in &atoms {
                    if atom.is_blocker() || ctx.is_meta(atom) {
                        continue;
                    }
                    if ctx.graph.match_atom(atom).is_empty() {
                        all_in_graph = false;
                        break;
                    }
                }
            }

            let bin = if all_use_satisfied {
                if all_in_graph {
                    BIN_IN_GRAPH
                } else if all_installed {
                    if all_installed_slots {
                        BIN_INSTALLED_SLOT
                    } else {
                        BIN_INSTALLED_ANY_SLOT
                    }
                } else {
                    BIN_AVAILABLE
                }
            } else if !all_use_unmasked {
                BIN_OTHER
            } else if all_in_graph {
                BIN_UNSAT_IN_GRAPH
            } else if all_installed_slots {
                BIN_UNSAT_INSTALLED
            } else {
                BIN_UNSAT_NON_INSTALLED
            };
            tracing::debug!(bin, atoms = ?atoms.iter().map(|a| a.to_string()).collect::<Vec<_>>(), "classified branch");
            bins[bin].push(Choice {
                atoms,
                cp_map,
                all_available,
                all_in_graph,
            });
        } else {
            let mut all_installed = true;
            let mut some_installed = false;
            for atom in &atoms {
                if atom.is_blocker() {
                    continue;
                }
                if ctx.installed.match_atom(atom)?.is_empty() {
                    all_installed = false;
                } else {
                    some_installed = true;
                }
            }
            let bin = if all_installed && some_installed {
                BIN_OTHER_INSTALLED
            } else if some_installed {
                BIN_OTHER_INSTALLED_SOME
            } else {
                // A cp-level match is a fuzzier signal than the full atom,
                // but still better than nothing.
                let mut any_slot = false;
                for atom in &atoms {
                    if atom.is_blocker() {
                        continue;
                    }
                    let cp_atom = Atom::new(atom.cp())?;
                    if !ctx.installed.match_atom(&cp_atom)?.is_empty() {
                        any_slot = true;
                        break;
                    }
                }
                if any_slot {
                    BIN_OTHER_INSTALLED_ANY_SLOT
                } else {
                    BIN_OTHER
                }
            };
            bins[bin].push(Choice {
                atoms,
                cp_map,
                all_available,
                all_in_graph: false,
            });
        }
    }

    // Upgrade bias: within one bin, a branch whose packages resolve to
    // strictly higher versions moves ahead. Never crosses bin boundaries.
    for bin in bins.iter_mut() {
        promote_upgrades(bin);
    }

    for allow_masked in [false, true] {
        for bin in &bins {
            for choice in bin {
                if choice.all_available || allow_masked {
                    return Ok(Some(choice.atoms.clone()));
                }
            }
        }
    }
    Ok(None)
}

fn promote_upgrades(choices: &mut Vec<Choice>) {
    if choices.len() < 2 {
        return;
    }
    let mut i = 1;
    while i < choices.len() {
        let mut target = None;
        for j in 0..i {
            let (c1, c2) = (&choices[i], &choices[j]);
            let mut has_upgrade = false;
            let mut has_downgrade = false;
            for (cp, v1) in &c1.cp_map {
                if let Some(v2) = c2.cp_map.get(cp) {
                    match v1.cpv.version().cmp(v2.cpv.version()) {
                        std::cmp::Ordering::Greater => has_upgrade = true,
                        std::cmp::Ordering::Less => has_downgrade = true,
                        std::cmp::Ordering::Equal => {}
                    }
                }
            }
            let promotes = (has_upgrade && !has_downgrade)
                || (c1.all_in_graph && !c2.all_in_graph && !(has_downgrade && !has_upgrade));
            if promotes {
                target = Some(j);
                break;
            }
        }
        if let Some(j) = target {
            let choice = choices.remove(i);
            choices.insert(j, choice);
        }
        i += 1;
    }
}
