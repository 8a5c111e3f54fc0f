//! Slot-conflict solving.
//!
//! When resolution pulls two candidates into the same slot, one of them
//! has to go, and sometimes a USE-flag change on a not-yet-built package
//! makes that happen. The solver enumerates "configurations" (one
//! candidate per conflicting group, not-yet-built candidates first),
//! derives the flag changes every parent atom would need, and
//! exhaustively tries the remaining free flags, re-validating each
//! assignment against all participating atoms. All accepted assignments
//! are returned; an empty result means no USE change fixes the conflict.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use hearth_core::atom::{Atom, UseState};
use hearth_core::candidate::Candidate;

/// Candidates competing for one slot key under one installation root.
#[derive(Debug, Clone)]
pub struct ConflictGroup {
    pub slot_key: String,
    pub candidates: Vec<Arc<Candidate>>,
}

/// A dependency edge into a conflicting candidate. `parent` is `None`
/// when the atom was requested directly rather than by a package.
#[derive(Debug, Clone)]
pub struct ParentEdge {
    pub parent: Option<Arc<Candidate>>,
    pub atom: Atom,
}

/// Flag states one solution assigns: `flag -> enabled?`.
pub type FlagChanges = BTreeMap<String, bool>;
/// Per-candidate flag assignments, keyed by candidate key.
pub type SolutionMap = BTreeMap<String, FlagChanges>;

/// Cap on assignments checked per configuration.
const CHECK_LIMIT: usize = 1024;
/// Above this many groups, only the all-not-yet-built configuration is
/// tried; the configuration space grows exponentially.
const MAX_FULL_GROUPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagState {
    Enabled,
    Disabled,
    /// Free to take either value.
    Cond,
    Contradiction,
}

/// Accumulated change requirement for one (package, flag) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    /// Mentioned, but no actual change derived.
    Undecided,
    Enabled,
    Disabled,
    Contradiction,
}

pub struct SlotConflictSolver {
    groups: Vec<ConflictGroup>,
    /// Parent edges per group, unioned over the group's members.
    group_edges: Vec<Vec<ParentEdge>>,
    /// Every conflicting candidate by key.
    conflict_members: HashMap<String, Arc<Candidate>>,
    /// Every package a solution can mention: members and their parents.
    packages: HashMap<String, Arc<Candidate>>,
}

impl SlotConflictSolver {
    /// `parents` maps a candidate key to the edges that pulled it in.
    pub fn new(groups: Vec<ConflictGroup>, parents: HashMap<String, Vec<ParentEdge>>) -> Self {
        let mut group_edges = Vec::with_capacity(groups.len());
        let mut conflict_members = HashMap::new();
        let mut packages = HashMap::new();
        for group in &groups {
            let mut edges = Vec::new();
            for candidate in &group.candidates {
                conflict_members.insert(candidate.key(), candidate.clone());
                packages.insert(candidate.key(), candidate.clone());
                if let Some(list) = parents.get(&candidate.key()) {
                    edges.extend(list.iter().cloned());
                }
            }
            for edge in &edges {
                if let Some(parent) = &edge.parent {
                    packages.insert(parent.key(), parent.clone());
                }
            }
            group_edges.push(edges);
        }
        SlotConflictSolver {
            groups,
            group_edges,
            conflict_members,
            packages,
        }
    }

    /// All accepted flag assignments across all explored configurations.
    /// Enumeration stops early once the configuration consisting entirely
    /// of not-yet-built candidates yields a solution.
    pub fn solve(&self) -> Vec<SolutionMap> {
        let mut solutions = Vec::new();
        let mut generator = ConfigGenerator::new(&self.groups);
        let mut first_config = true;

        while let Some(config) = generator.next_config() {
            tracing::debug!(
                config = ?config.iter().map(|c| c.key()).collect::<Vec<_>>(),
                "checking configuration"
            );
            let found = self.check_configuration(&config);
            if !found.is_empty() {
                solutions.extend(found);
                if first_config {
                    // The cheapest fix needs no reinstall of anything
                    // already built; stop here.
                    break;
                }
            }
            first_config = false;

            if self.groups.len() > MAX_FULL_GROUPS {
                tracing::debug!("too many conflict groups, stopping after one configuration");
                break;
            }
        }
        solutions
    }

    /// Minimal USE changes derived from [`solve`](Self::solve): only
    /// actual deltas against current flag state, with any solution that is
    /// a superset of another dropped.
    pub fn changes(&self) -> Vec<SolutionMap> {
        let mut changes: Vec<SolutionMap> = Vec::new();
        for solution in self.solve() {
            let mut delta: SolutionMap = BTreeMap::new();
            for (key, flags) in &solution {
                let candidate = match self.packages.get(key) {
                    Some(c) => c.clone(),
                    None => continue,
                };
                for (flag, enabled) in flags {
                    if !candidate.is_valid_flag(flag) {
                        continue;
                    }
                    let currently = candidate.use_enabled.contains(flag);
                    if *enabled != currently {
                        delta.entry(key.clone()).or_default().insert(flag.clone(), *enabled);
                    }
                }
            }
            if !delta.is_empty() {
                add_minimal_change(&mut changes, delta);
            }
        }
        changes
    }

    fn check_configuration(&self, config: &[Arc<Candidate>]) -> Vec<SolutionMap> {
        // An installed candidate only belongs in a valid configuration if
        // its flags agree with its conflict siblings; differing flags mean
        // a rebuild is coming anyway.
        for (idx, pkg) in config.iter().enumerate() {
            if !pkg.installed {
                continue;
            }
            for other in &self.groups[idx].candidates {
                if other.key() == pkg.key() {
                    continue;
                }
                if pkg.iuse != other.iuse || pkg.use_enabled != other.use_enabled {
                    tracing::debug!(pkg = %pkg, "installed candidate has pending USE changes");
                    return Vec::new();
                }
            }
        }

        let mut all_involved: Vec<BTreeMap<String, FlagState>> = Vec::new();
        for (idx, pkg) in config.iter().enumerate() {
            let mut involved: BTreeMap<String, FlagState> = BTreeMap::new();
            for edge in &self.group_edges[idx] {
                // A parent that is itself conflicting only constrains the
                // configurations it appears in.
                if let Some(parent) = &edge.parent {
                    if self.conflict_members.contains_key(&parent.key())
                        && !config.iter().any(|c| c.key() == parent.key())
                    {
                        continue;
                    }
                }

                if edge.atom.matches(pkg) {
                    continue;
                }
                if !edge.atom.without_use().matches(pkg) {
                    tracing::debug!(pkg = %pkg, atom = %edge.atom, "version requirements differ");
                    return Vec::new();
                }
                if let Some(use_dep) = edge.atom.unevaluated().use_dep() {
                    if !pkg.declares_all(use_dep.required()) {
                        tracing::debug!(pkg = %pkg, "candidate misses needed flag declarations");
                        return Vec::new();
                    }
                }

                let violated = match &edge.parent {
                    Some(parent) if !parent.installed => {
                        edge.atom.unevaluated().violated_conditionals(
                            &pkg.use_enabled,
                            &|f| pkg.is_valid_flag(f),
                            Some(&parent.use_enabled),
                        )
                    }
                    // Installed parents cannot be reconfigured, so their
                    // conditionals stay as evaluated.
                    _ => edge.atom.violated_conditionals(
                        &pkg.use_enabled,
                        &|f| pkg.is_valid_flag(f),
                        None,
                    ),
                };
                let violated_use = match violated.use_dep() {
                    Some(u) if !u.is_empty() => u.clone(),
                    _ => continue,
                };

                if pkg.installed
                    && (violated_use.enabled_flags().next().is_some()
                        || violated_use.disabled_flags().next().is_some())
                {
                    tracing::debug!(pkg = %pkg, "installed candidate would need USE changes");
                    return Vec::new();
                }

                let enabled: BTreeSet<&str> = violated_use.enabled_flags().collect();
                let disabled: BTreeSet<&str> = violated_use.disabled_flags().collect();
                for flag in violated_use.required() {
                    let current = involved.get(flag.as_str()).copied();
                    let next = if enabled.contains(flag.as_str()) {
                        match current {
                            None | Some(FlagState::Cond) | Some(FlagState::Enabled) => {
                                FlagState::Enabled
                            }
                            _ => FlagState::Contradiction,
                        }
                    } else if disabled.contains(flag.as_str()) {
                        match current {
                            None | Some(FlagState::Cond) | Some(FlagState::Disabled) => {
                                FlagState::Disabled
                            }
                            _ => FlagState::Contradiction,
                        }
                    } else {
                        current.unwrap_or(FlagState::Cond)
                    };
                    involved.insert(flag.clone(), next);
                }
            }

            if pkg.installed {
                // Installed flags are immutable; pin every involved flag
                // to its current value.
                for (flag, state) in involved.iter_mut() {
                    let has = pkg.use_enabled.contains(flag);
                    *state = match (*state, has) {
                        (FlagState::Enabled, false) => FlagState::Contradiction,
                        (FlagState::Disabled, true) => FlagState::Contradiction,
                        (FlagState::Cond, true) => FlagState::Enabled,
                        (FlagState::Cond, false) => FlagState::Disabled,
                        (state, _) => state,
                    };
                }
            }

            if involved.values().any(|s| *s == FlagState::Contradiction) {
                tracing::debug!(pkg = %pkg, "contradicting flag requirements");
                return Vec::new();
            }
            all_involved.push(involved);
        }

        let mut solutions = Vec::new();
        let mut generator = AssignmentGenerator::new(&all_involved);
        let mut checked = 0;
        while let Some(assignment) = generator.next_assignment() {
            if let Some(solution) = self.check_solution(config, &assignment) {
                solutions.push(solution);
            }
            checked += 1;
            if checked >= CHECK_LIMIT {
                tracing::debug!("assignment limit reached, stopping this configuration");
                break;
            }
        }
        solutions
    }

    /// Validate one complete flag assignment: derive the changes it forces
    /// on candidates and their parents, then re-check every parent atom
    /// under the hypothetical flag states.
    fn check_solution(
        &self,
        config: &[Arc<Candidate>],
        assignment: &[BTreeMap<String, bool>],
    ) -> Option<SolutionMap> {
        let mut required: BTreeMap<String, BTreeMap<String, Change>> = BTreeMap::new();

        for (idx, pkg) in config.iter().enumerate() {
            if !pkg.installed {
                for (flag, enabled) in &assignment[idx] {
                    if !pkg.is_valid_flag(flag) {
                        continue;
                    }
                    force_flag(&mut required, pkg, flag, *enabled);
                }
            }

            for edge in &self.group_edges[idx] {
                let parent = match &edge.parent {
                    Some(parent) => parent,
                    None => continue,
                };
                let use_dep = match edge.atom.unevaluated().use_dep() {
                    Some(u) if u.has_conditionals() => u,
                    _ => continue,
                };
                for (flag, enabled) in &assignment[idx] {
                    if !use_dep.required().contains(flag) {
                        continue;
                    }
                    let state = match use_dep.state_of(flag) {
                        Some(state) => state,
                        None => continue,
                    };
                    match (state, *enabled) {
                        (UseState::EnabledIf, false) => {
                            force_flag(&mut required, parent, flag, false);
                        }
                        (UseState::DisabledIf, true) => {
                            force_flag(&mut required, parent, flag, false);
                        }
                        (UseState::Equal, true) => {
                            force_flag(&mut required, parent, flag, true);
                        }
                        (UseState::Equal, false) => {
                            force_flag(&mut required, parent, flag, false);
                        }
                        (UseState::NotEqual, true) => {
                            force_flag(&mut required, parent, flag, false);
                        }
                        (UseState::NotEqual, false) => {
                            force_flag(&mut required, parent, flag, true);
                        }
                        _ => {}
                    }
                }
            }
        }

        // Every accumulated entry must be a definite change.
        for changes in required.values() {
            for change in changes.values() {
                if !matches!(change, Change::Enabled | Change::Disabled) {
                    return None;
                }
            }
        }

        // Re-check all participating atoms under the hypothetical states.
        for (idx, pkg) in config.iter().enumerate() {
            let new_use = apply_changes(&pkg.use_enabled, required.get(&pkg.key()));
            let hypothetical = Candidate {
                use_enabled: new_use,
                ..(**pkg).clone()
            };
            for edge in &self.group_edges[idx] {
                let parent = match &edge.parent {
                    Some(parent) => parent,
                    None => continue,
                };
                let parent_use = apply_changes(&parent.use_enabled, required.get(&parent.key()));
                let new_atom = edge.atom.unevaluated().evaluate_conditionals(&parent_use);
                if !new_atom.matches(&hypothetical) {
                    tracing::debug!(
                        atom = %new_atom,
                        pkg = %pkg,
                        "assignment introduces a new violation"
                    );
                    return None;
                }
            }
        }

        if required.is_empty() {
            return None;
        }
        Some(
            required
                .into_iter()
                .map(|(key, changes)| {
                    let flags = changes
                        .into_iter()
                        .map(|(flag, change)| (flag, change == Change::Enabled))
                        .collect();
                    (key, flags)
                })
                .collect(),
        )
    }
}

fn apply_changes(
    current: &BTreeSet<String>,
    changes: Option<&BTreeMap<String, Change>>,
) -> BTreeSet<String> {
    let mut out = current.clone();
    if let Some(changes) = changes {
        for (flag, change) in changes {
            match change {
                Change::Enabled => {
                    out.insert(flag.clone());
                }
                Change::Disabled => {
                    out.remove(flag);
                }
                _ => {}
            }
        }
    }
    out
}

/// Record a forced flag state, escalating to a contradiction when earlier
/// requirements disagree. Forcing "disabled" on a flag that is already
/// disabled leaves the entry undecided, which later invalidates the
/// solution; only definite changes survive.
fn force_flag(
    required: &mut BTreeMap<String, BTreeMap<String, Change>>,
    pkg: &Arc<Candidate>,
    flag: &str,
    enabled: bool,
) {
    let changes = required.entry(pkg.key()).or_default();
    let previous = changes.get(flag).copied().unwrap_or(Change::Undecided);
    let next = if enabled {
        match previous {
            Change::Disabled => Change::Contradiction,
            _ => Change::Enabled,
        }
    } else {
        match previous {
            Change::Enabled => Change::Contradiction,
            _ if pkg.use_enabled.contains(flag) => Change::Disabled,
            _ => previous,
        }
    };
    changes.insert(flag.to_string(), next);
}

/// Keep `changes` minimal: drop the new change if an existing one is a
/// subset of it, and drop existing changes the new one is a subset of.
fn add_minimal_change(changes: &mut Vec<SolutionMap>, new_change: SolutionMap) {
    if changes.iter().any(|c| is_subset(c, &new_change)) {
        return;
    }
    changes.retain(|c| !is_subset(&new_change, c));
    changes.push(new_change);
}

fn is_subset(a: &SolutionMap, b: &SolutionMap) -> bool {
    a.iter().all(|(pkg, flags)| {
        b.get(pkg).is_some_and(|other| {
            flags
                .iter()
                .all(|(flag, value)| other.get(flag) == Some(value))
        })
    })
}

/// Odometer over configurations: one candidate per group, not-yet-built
/// candidates ordered first so the cheapest configuration comes up first.
struct ConfigGenerator {
    pkgs: Vec<Vec<Arc<Candidate>>>,
    ids: Vec<usize>,
    first: bool,
    exhausted: bool,
}

impl ConfigGenerator {
    fn new(groups: &[ConflictGroup]) -> Self {
        let mut pkgs = Vec::with_capacity(groups.len());
        for group in groups {
            let mut ordered: Vec<Arc<Candidate>> = group
                .candidates
                .iter()
                .filter(|c| !c.installed)
                .cloned()
                .collect();
            ordered.extend(group.candidates.iter().filter(|c| c.installed).cloned());
            pkgs.push(ordered);
        }
        let exhausted = pkgs.is_empty() || pkgs.iter().any(Vec::is_empty);
        ConfigGenerator {
            ids: vec![0; pkgs.len()],
            pkgs,
            first: true,
            exhausted,
        }
    }

    fn next_config(&mut self) -> Option<Vec<Arc<Candidate>>> {
        if self.exhausted {
            return None;
        }
        if self.first {
            self.first = false;
        } else if !self.advance() {
            return None;
        }
        Some(
            self.ids
                .iter()
                .zip(&self.pkgs)
                .map(|(&id, group)| group[id].clone())
                .collect(),
        )
    }

    /// Iterative carry propagation from the rightmost position.
    fn advance(&mut self) -> bool {
        let mut i = self.ids.len();
        loop {
            if i == 0 {
                return false;
            }
            i -= 1;
            if self.ids[i] + 1 < self.pkgs[i].len() {
                self.ids[i] += 1;
                for id in self.ids[i + 1..].iter_mut() {
                    *id = 0;
                }
                return true;
            }
        }
    }
}

/// Odometer over flag assignments: fixed flags keep their value,
/// conditionally-free flags count through all 2^n combinations via an
/// index-based bit vector.
struct AssignmentGenerator {
    fixed: Vec<BTreeMap<String, Option<bool>>>,
    /// (group index, flag) per free bit.
    free: Vec<(usize, String)>,
    bits: Vec<bool>,
    first: bool,
}

impl AssignmentGenerator {
    fn new(all_involved: &[BTreeMap<String, FlagState>]) -> Self {
        let mut fixed = Vec::with_capacity(all_involved.len());
        let mut free = Vec::new();
        for (idx, involved) in all_involved.iter().enumerate() {
            let mut map = BTreeMap::new();
            for (flag, state) in involved {
                match state {
                    FlagState::Enabled => {
                        map.insert(flag.clone(), Some(true));
                    }
                    FlagState::Disabled => {
                        map.insert(flag.clone(), Some(false));
                    }
                    FlagState::Cond => {
                        map.insert(flag.clone(), None);
                        free.push((idx, flag.clone()));
                    }
                    FlagState::Contradiction => unreachable!("rejected earlier"),
                }
            }
            fixed.push(map);
        }
        AssignmentGenerator {
            bits: vec![false; free.len()],
            fixed,
            free,
            first: true,
        }
    }

    fn next_assignment(&mut self) -> Option<Vec<BTreeMap<String, bool>>> {
        if self.first {
            self.first = false;
        } else if !self.advance() {
            return None;
        }
        let mut out: Vec<BTreeMap<String, bool>> = self
            .fixed
            .iter()
            .map(|map| {
                map.iter()
                    .filter_map(|(flag, value)| value.map(|v| (flag.clone(), v)))
                    .collect()
            })
            .collect();
        for (bit, (idx, flag)) in self.bits.iter().zip(&self.free) {
            out[*idx].insert(flag.clone(), *bit);
        }
        Some(out)
    }

    /// Iterative binary increment with the last bit as least significant.
    fn advance(&mut self) -> bool {
        let mut i = self.bits.len();
        loop {
            if i == 0 {
                return false;
            }
            i -= 1;
            if !self.bits[i] {
                self.bits[i] = true;
                for bit in self.bits[i + 1..].iter_mut() {
                    *bit = false;
                }
                return true;
            }
        }
    }
}
