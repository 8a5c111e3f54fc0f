//! Meta-package (virtual) expansion.
//!
//! Atoms in the meta category do not name installable packages; each one
//! resolves to a disjunction of concrete providers. Expansion replaces
//! such an atom with `|| ( <provider-1 deps + =provider-1> ... )`, where
//! each provider contributes its own runtime dependencies reduced under
//! its own flag state. The providers' alternatives are searched highest
//! version first.

use std::sync::Arc;

use hearth_core::atom::Atom;
use hearth_core::candidate::Candidate;
use hearth_core::db::keys;
use hearth_core::error::{HearthError, HearthResult};

use crate::context::ResolveContext;
use crate::reduce::{reduce, Dep, FlagState};

/// Explicit recursion context: the chain of provider keys above the
/// current expansion, used for cycle detection and error tagging. Each
/// recursive call receives its own copy; sibling expansions share nothing.
#[derive(Debug, Clone, Default)]
pub struct VirtContext {
    chain: Vec<String>,
}

impl VirtContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    fn contains(&self, cp: &str) -> bool {
        self.chain.iter().any(|c| c == cp)
    }

    fn child(&self, cp: &str) -> Self {
        let mut chain = self.chain.clone();
        chain.push(cp.to_string());
        VirtContext { chain }
    }
}

/// Recursively expand every meta-package atom in `deps`.
pub fn expand_virtuals(
    deps: Vec<Dep<Atom>>,
    ctx: &ResolveContext<'_>,
    vctx: &VirtContext,
) -> HearthResult<Vec<Dep<Atom>>> {
    let mut out = Vec::new();
    for node in deps {
        match node {
            Dep::Item(atom) => expand_atom(atom, ctx, vctx, &mut out)?,
            Dep::AllOf(children) => {
                // A conjunction in a conjunctive position dissolves.
                out.extend(expand_virtuals(children, ctx, vctx)?);
            }
            Dep::AnyOf(branch_nodes) => {
                let mut branches = Vec::new();
                for branch in branch_nodes {
                    let expanded = expand_virtuals(vec![branch], ctx, vctx)?;
                    match expanded.len() {
                        0 => {}
                        1 => match expanded.into_iter().next().expect("len checked") {
                            // An expansion that became a disjunction of its
                            // own contributes its branches directly.
                            Dep::AnyOf(inner) => branches.extend(inner),
                            node => branches.push(node),
                        },
                        _ => branches.push(Dep::AllOf(expanded)),
                    }
                }
                match branches.len() {
                    0 => {}
                    1 => out.push(branches.into_iter().next().expect("len checked")),
                    _ => out.push(Dep::AnyOf(branches)),
                }
            }
        }
    }
    Ok(out)
}

fn expand_atom(
    atom: Atom,
    ctx: &ResolveContext<'_>,
    vctx: &VirtContext,
    out: &mut Vec<Dep<Atom>>,
) -> HearthResult<()> {
    // Blockers are never expanded: negating a disjunction of providers
    // would block every alternative, which is not what the blocker means.
    if atom.is_blocker() || !ctx.is_meta(&atom) {
        out.push(Dep::Item(atom));
        return Ok(());
    }

    // USE constraints are ignored while finding providers; the disjunction
    // resolver prefers properly-configured choices later.
    let mut providers = ctx.db.match_atom(&atom.without_use())?;
    providers.retain(|p| p.cpv.category() == ctx.meta_category);
    if providers.is_empty() {
        // Unsatisfiable as a virtual, but the requirement stands; the
        // caller reports it unresolved.
        out.push(Dep::Item(atom));
        return Ok(());
    }

    let mut branches = Vec::new();
    for pkg in providers.iter().rev() {
        if vctx.contains(pkg.cpv.cp()) {
            tracing::debug!(provider = %pkg.cpv, "provider cycle, leaving unexpanded");
            continue;
        }
        let rdep = ctx.db.aux_get(&pkg.cpv, &[keys::RDEPEND])?;
        let opts = ctx.reduce_options(FlagState::Use(&pkg.use_enabled));
        let reduced = reduce(&rdep[0], &opts).map_err(|e| tag_provider(pkg, e))?;
        let child_vctx = vctx.child(pkg.cpv.cp());
        let mut nodes =
            expand_virtuals(reduced, ctx, &child_vctx).map_err(|e| tag_provider(pkg, e))?;

        nodes.push(Dep::Item(provider_atom(&atom, pkg, ctx)?));
        branches.push(match nodes.len() {
            1 => nodes.pop().expect("len checked"),
            _ => Dep::AllOf(nodes),
        });
    }

    match branches.len() {
        0 => out.push(Dep::Item(atom)),
        1 => match branches.pop().expect("len checked") {
            Dep::AllOf(children) => out.extend(children),
            node => out.push(node),
        },
        _ => out.push(Dep::AnyOf(branches)),
    }
    Ok(())
}

fn tag_provider(pkg: &Arc<Candidate>, source: HearthError) -> HearthError {
    HearthError::VirtualProvider {
        provider: pkg.cpv.to_string(),
        source: Box::new(source),
    }
}

/// The concrete `=cpv` atom standing in for the original virtual atom,
/// carrying its USE constraints evaluated against the requesting package.
fn provider_atom(
    original: &Atom,
    pkg: &Arc<Candidate>,
    ctx: &ResolveContext<'_>,
) -> HearthResult<Atom> {
    let mut text = format!("={}", pkg.cpv);
    if let Some(use_dep) = original.unevaluated().use_dep() {
        text.push_str(&use_dep.to_string());
    }
    let atom = Atom::new(&text)?;
    Ok(atom.evaluate_conditionals(ctx.parent_use()))
}
