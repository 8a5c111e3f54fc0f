//! Top-level dependency checking: the composition of the reducer, the
//! virtual expander, satisfaction marking, and the disjunction resolver.

use hearth_core::atom::Atom;
use hearth_core::error::HearthResult;

use crate::choose::{choose, mark_satisfied};
use crate::context::ResolveContext;
use crate::reduce::{reduce, FlagState};
use crate::virtuals::{expand_virtuals, VirtContext};

/// Resolve one dependency expression against the context's databases.
///
/// Returns the ordered atoms still requiring action, `Some(vec![])` when
/// everything is already satisfied, or `None` when some disjunction has no
/// permissible branch — a negative result the caller turns into a
/// diagnostic, not an error.
pub fn dep_check(depstr: &str, ctx: &ResolveContext<'_>) -> HearthResult<Option<Vec<Atom>>> {
    let opts = ctx.reduce_options(FlagState::Use(ctx.parent_use()));
    let deps = reduce(depstr, &opts)?;
    if deps.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let deps = expand_virtuals(deps, ctx, &VirtContext::new())?;
    let satisfied = mark_satisfied(&deps, ctx)?;
    let selected = choose(&deps, &satisfied, ctx)?;
    if let Some(atoms) = &selected {
        tracing::debug!(
            atoms = ?atoms.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            "dependency check selected"
        );
    } else {
        tracing::debug!(depstr, "dependency check found no permissible choice");
    }
    Ok(selected)
}
