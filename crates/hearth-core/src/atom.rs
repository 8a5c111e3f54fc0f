//! Dependency atoms: parsed package requirements.
//!
//! An atom names a `category/name` key plus optional constraints: a version
//! with a comparison operator, a slot spec, USE-flag requirements, an
//! origin-repository restriction, and a blocker marker. Example:
//! `>=dev-libs/libfoo-1.2:0/3=::core[ssl,-static,tls?]`.

use std::collections::BTreeSet;
use std::fmt;

use crate::cpv::{
    name_has_version_tail, split_name_version, valid_slot_name, validate_category,
    validate_name,
};
use crate::error::{HearthError, HearthResult};
use crate::format::SpecVersion;
use crate::version::Version;

/// Version comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `=` — exact version and revision.
    Eq,
    /// `=` with a trailing `*` — version-prefix match on component
    /// boundaries.
    EqGlob,
    /// `~` — same version, any revision.
    Approx,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

/// Blocker strength. A weak blocker tolerates a temporary overlap during
/// replacement; a hard blocker does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocker {
    Weak,
    Strong,
}

/// Slot operator attached to a slot spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOp {
    /// `=` — bind to the sub-slot the dependency was built against.
    Rebuild,
    /// `*` — any slot is acceptable.
    Any,
}

/// A parsed `:slot[/sub_slot][op]` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDep {
    pub slot: Option<String>,
    pub sub_slot: Option<String>,
    pub op: Option<SlotOp>,
}

/// State required of a USE flag by an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseState {
    /// `flag` — must be enabled on the candidate.
    Enabled,
    /// `-flag` — must be disabled on the candidate.
    Disabled,
    /// `flag?` — must be enabled if the requesting package has it enabled.
    EnabledIf,
    /// `!flag?` — must be disabled if the requesting package has it
    /// disabled.
    DisabledIf,
    /// `flag=` — must mirror the requesting package's state.
    Equal,
    /// `!flag=` — must oppose the requesting package's state.
    NotEqual,
}

/// Assumed state for a flag the candidate does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseDefault {
    /// `(+)`
    Enabled,
    /// `(-)`
    Disabled,
}

/// One `[...]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseConstraint {
    pub flag: String,
    pub state: UseState,
    pub default: Option<UseDefault>,
}

/// The ordered USE-constraint list of an atom.
///
/// `required` records which flags had no default marker in the original
/// source text; those must be declared by any candidate the atom is to
/// match. The set survives conditional evaluation unchanged so the
/// conflict solver can reason about flags whose constraints were satisfied
/// away.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UseDep {
    constraints: Vec<UseConstraint>,
    required: BTreeSet<String>,
}

impl UseDep {
    fn from_constraints(constraints: Vec<UseConstraint>, required: BTreeSet<String>) -> Self {
        UseDep {
            constraints,
            required,
        }
    }

    /// Parse the comma-separated interior of a `[...]` group.
    fn parse(inner: &str, atom: &str, spec: SpecVersion) -> HearthResult<Self> {
        let mut constraints = Vec::new();
        let mut required = BTreeSet::new();
        let mut defaults: std::collections::BTreeMap<String, Option<UseDefault>> =
            std::collections::BTreeMap::new();

        for token in inner.split(',') {
            if token.is_empty() {
                return Err(HearthError::malformed_atom(atom, "empty USE constraint"));
            }
            let mut rest = token;
            let negated = if let Some(r) = rest.strip_prefix('!') {
                rest = r;
                true
            } else {
                false
            };
            let minus = if let Some(r) = rest.strip_prefix('-') {
                rest = r;
                true
            } else {
                false
            };
            let (suffix, r) = if let Some(r) = rest.strip_suffix('?') {
                (Some('?'), r)
            } else if let Some(r) = rest.strip_suffix('=') {
                (Some('='), r)
            } else {
                (None, rest)
            };
            rest = r;
            let (default, r) = if let Some(r) = rest.strip_suffix("(+)") {
                (Some(UseDefault::Enabled), r)
            } else if let Some(r) = rest.strip_suffix("(-)") {
                (Some(UseDefault::Disabled), r)
            } else {
                (None, rest)
            };
            rest = r;

            if default.is_some() && !spec.supports_use_defaults() {
                return Err(HearthError::malformed_atom(
                    atom,
                    format!("USE defaults are not allowed in format {spec}"),
                ));
            }
            if !valid_use_flag(rest) {
                return Err(HearthError::malformed_atom(
                    atom,
                    format!("invalid USE flag '{token}'"),
                ));
            }

            let state = match (negated, minus, suffix) {
                (false, false, None) => UseState::Enabled,
                (false, true, None) => UseState::Disabled,
                (false, false, Some('?')) => UseState::EnabledIf,
                (true, false, Some('?')) => UseState::DisabledIf,
                (false, false, Some('=')) => UseState::Equal,
                (true, false, Some('=')) => UseState::NotEqual,
                _ => {
                    return Err(HearthError::malformed_atom(
                        atom,
                        format!("invalid USE constraint '{token}'"),
                    ))
                }
            };

            match defaults.get(rest) {
                Some(prev) if *prev != default => {
                    return Err(HearthError::malformed_atom(
                        atom,
                        format!("conflicting defaults for USE flag '{rest}'"),
                    ));
                }
                _ => {
                    defaults.insert(rest.to_string(), default);
                }
            }
            if default.is_none() {
                required.insert(rest.to_string());
            }
            constraints.push(UseConstraint {
                flag: rest.to_string(),
                state,
                default,
            });
        }

        Ok(UseDep {
            constraints,
            required,
        })
    }

    pub fn constraints(&self) -> &[UseConstraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Flags that must be declared by a matching candidate.
    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    pub fn has_conditionals(&self) -> bool {
        self.constraints.iter().any(|c| {
            matches!(
                c.state,
                UseState::EnabledIf | UseState::DisabledIf | UseState::Equal | UseState::NotEqual
            )
        })
    }

    pub fn enabled_flags(&self) -> impl Iterator<Item = &str> {
        self.constraints
            .iter()
            .filter(|c| c.state == UseState::Enabled)
            .map(|c| c.flag.as_str())
    }

    pub fn disabled_flags(&self) -> impl Iterator<Item = &str> {
        self.constraints
            .iter()
            .filter(|c| c.state == UseState::Disabled)
            .map(|c| c.flag.as_str())
    }

    fn find(&self, flag: &str) -> Option<&UseConstraint> {
        self.constraints.iter().find(|c| c.flag == flag)
    }

    pub fn state_of(&self, flag: &str) -> Option<UseState> {
        self.find(flag).map(|c| c.state)
    }

    /// Resolve conditional constraints against the requesting package's
    /// enabled flags:
    ///
    /// ```text
    /// parent state   constraint   result
    ///  x              x?           x
    /// -x              x?
    ///  x             !x?
    /// -x             !x?          -x
    ///  x              x=           x
    /// -x              x=          -x
    ///  x             !x=          -x
    /// -x             !x=           x
    /// ```
    pub fn evaluate(&self, parent_use: &BTreeSet<String>) -> UseDep {
        let mut out = Vec::new();
        for c in &self.constraints {
            let parent_has = parent_use.contains(&c.flag);
            let state = match c.state {
                UseState::Enabled | UseState::Disabled => Some(c.state),
                UseState::EnabledIf => parent_has.then_some(UseState::Enabled),
                UseState::DisabledIf => (!parent_has).then_some(UseState::Disabled),
                UseState::Equal => Some(if parent_has {
                    UseState::Enabled
                } else {
                    UseState::Disabled
                }),
                UseState::NotEqual => Some(if parent_has {
                    UseState::Disabled
                } else {
                    UseState::Enabled
                }),
            };
            if let Some(state) = state {
                out.push(UseConstraint {
                    flag: c.flag.clone(),
                    state,
                    default: c.default,
                });
            }
        }
        UseDep::from_constraints(out, self.required.clone())
    }

    /// Keep only the constraints `other_use` does not already satisfy.
    ///
    /// `valid` reports whether the candidate declares a flag; `parent_use`
    /// is needed whenever conditional constraints remain unevaluated.
    pub fn violated(
        &self,
        other_use: &BTreeSet<String>,
        valid: &dyn Fn(&str) -> bool,
        parent_use: Option<&BTreeSet<String>>,
    ) -> UseDep {
        let mut out = Vec::new();
        for c in &self.constraints {
            let flag = c.flag.as_str();
            let has = other_use.contains(flag);
            let is_valid = valid(flag);

            // A flag that is neither declared nor defaulted can never be
            // satisfied; the constraint stays violated as written.
            if !is_valid && c.default.is_none() {
                out.push(c.clone());
                continue;
            }

            let parent_has = |pu: Option<&BTreeSet<String>>| {
                debug_assert!(
                    pu.is_some(),
                    "conditional USE constraints need parent_use"
                );
                pu.map(|p| p.contains(flag)).unwrap_or(false)
            };

            let keep = match c.state {
                UseState::Enabled => {
                    !has && (is_valid || c.default == Some(UseDefault::Disabled))
                }
                UseState::Disabled => {
                    if has {
                        true
                    } else {
                        !is_valid && c.default == Some(UseDefault::Enabled)
                    }
                }
                UseState::EnabledIf => {
                    parent_has(parent_use)
                        && !has
                        && (is_valid || c.default == Some(UseDefault::Disabled))
                }
                UseState::Equal => {
                    if parent_has(parent_use) {
                        !has && (is_valid || c.default == Some(UseDefault::Disabled))
                    } else if has {
                        true
                    } else {
                        !is_valid && c.default == Some(UseDefault::Enabled)
                    }
                }
                UseState::NotEqual => {
                    if !parent_has(parent_use) {
                        !has && (is_valid || c.default == Some(UseDefault::Disabled))
                    } else if has {
                        true
                    } else {
                        !is_valid && c.default == Some(UseDefault::Enabled)
                    }
                }
                UseState::DisabledIf => {
                    if parent_has(parent_use) {
                        false
                    } else if has {
                        true
                    } else {
                        !is_valid && c.default == Some(UseDefault::Enabled)
                    }
                }
            };
            if keep {
                out.push(c.clone());
            }
        }
        UseDep::from_constraints(out, self.required.clone())
    }
}

impl fmt::Display for UseDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, c) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let (prefix, suffix) = match c.state {
                UseState::Enabled => ("", ""),
                UseState::Disabled => ("-", ""),
                UseState::EnabledIf => ("", "?"),
                UseState::DisabledIf => ("!", "?"),
                UseState::Equal => ("", "="),
                UseState::NotEqual => ("!", "="),
            };
            let default = match c.default {
                Some(UseDefault::Enabled) => "(+)",
                Some(UseDefault::Disabled) => "(-)",
                None => "",
            };
            write!(f, "{prefix}{}{default}{suffix}", c.flag)?;
        }
        f.write_str("]")
    }
}

fn valid_use_flag(flag: &str) -> bool {
    let mut chars = flag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '@' | '-'))
}

/// Options governing which atom syntax is accepted.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Accept `*` wildcards in the category/name key.
    pub allow_wildcard: bool,
    /// Accept `::repository` restrictions.
    pub allow_repo: bool,
    /// The package-format version the atom must comply with.
    pub spec_version: SpecVersion,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            allow_wildcard: false,
            allow_repo: true,
            spec_version: SpecVersion::CURRENT,
        }
    }
}

/// A parsed dependency atom.
///
/// Immutable. After conditional evaluation the atom remembers its original
/// form, reachable through [`Atom::unevaluated`]; candidate IUSE validation
/// always consults the unevaluated form.
#[derive(Debug, Clone)]
pub struct Atom {
    blocker: Option<Blocker>,
    op: Option<Op>,
    category: String,
    name: String,
    version: Option<Version>,
    slot: Option<SlotDep>,
    use_dep: Option<UseDep>,
    repo: Option<String>,
    cp: String,
    unevaluated: Option<Box<Atom>>,
}

impl Atom {
    /// Parse an atom with default options.
    pub fn new(text: &str) -> HearthResult<Self> {
        Self::parse(text, &ParseOptions::default())
    }

    pub fn parse(text: &str, opts: &ParseOptions) -> HearthResult<Self> {
        let err = |reason: &str| HearthError::malformed_atom(text, reason);
        let mut rest = text;

        let blocker = if let Some(r) = rest.strip_prefix("!!") {
            if !opts.spec_version.supports_strong_blocks() {
                return Err(err("hard blockers are not allowed in this format"));
            }
            rest = r;
            Some(Blocker::Strong)
        } else if let Some(r) = rest.strip_prefix('!') {
            rest = r;
            Some(Blocker::Weak)
        } else {
            None
        };

        let op = if let Some(r) = rest.strip_prefix(">=") {
            rest = r;
            Some(Op::GreaterEq)
        } else if let Some(r) = rest.strip_prefix("<=") {
            rest = r;
            Some(Op::LessEq)
        } else if let Some(r) = rest.strip_prefix('>') {
            rest = r;
            Some(Op::Greater)
        } else if let Some(r) = rest.strip_prefix('<') {
            rest = r;
            Some(Op::Less)
        } else if let Some(r) = rest.strip_prefix('~') {
            rest = r;
            Some(Op::Approx)
        } else if let Some(r) = rest.strip_prefix('=') {
            rest = r;
            Some(Op::Eq)
        } else {
            None
        };

        let use_dep = if rest.ends_with(']') {
            let open = rest
                .rfind('[')
                .ok_or_else(|| err("unbalanced USE constraint brackets"))?;
            let inner = &rest[open + 1..rest.len() - 1];
            let dep = UseDep::parse(inner, text, opts.spec_version)?;
            rest = &rest[..open];
            Some(dep)
        } else {
            None
        };

        let repo = if let Some(pos) = rest.rfind("::") {
            let repo = &rest[pos + 2..];
            if !opts.allow_repo {
                return Err(err("repository restrictions are not allowed here"));
            }
            if repo.is_empty() || !valid_repo_name(repo) {
                return Err(err("invalid repository name"));
            }
            rest = &rest[..pos];
            Some(repo.to_string())
        } else {
            None
        };

        let slot = if let Some(pos) = rest.find(':') {
            let spec = &rest[pos + 1..];
            rest = &rest[..pos];
            if !opts.spec_version.supports_slot_deps() {
                return Err(err("slot restrictions are not allowed in this format"));
            }
            Some(parse_slot_dep(spec, text, opts.spec_version)?)
        } else {
            None
        };

        let (category, name, version, op) = if let Some(mut op) = op {
            let (category, pkg) = rest
                .split_once('/')
                .ok_or_else(|| err("missing category separator"))?;
            validate_category(category).map_err(|r| err(r))?;
            let pkg = if let Some(stripped) = pkg.strip_suffix('*') {
                if op != Op::Eq {
                    return Err(err("'*' is only valid with the '=' operator"));
                }
                op = Op::EqGlob;
                stripped
            } else {
                pkg
            };
            let (name, version) = split_name_version(pkg)
                .ok_or_else(|| err("this operator requires a version"))?;
            validate_name(name).map_err(|r| err(r))?;
            (category.to_string(), name.to_string(), Some(version), Some(op))
        } else {
            let (category, name) = rest
                .split_once('/')
                .ok_or_else(|| err("missing category separator"))?;
            if category.contains('*') || name.contains('*') {
                if !opts.allow_wildcard {
                    return Err(err("wildcards are not allowed here"));
                }
                if category.contains("**") || name.contains("**") {
                    return Err(err("'**' is not a valid wildcard"));
                }
                validate_wildcard_segment(category).map_err(|r| err(r))?;
                validate_wildcard_segment(name).map_err(|r| err(r))?;
            } else {
                validate_category(category).map_err(|r| err(r))?;
                validate_name(name).map_err(|r| err(r))?;
                if name_has_version_tail(name) {
                    return Err(err("a version requires an operator (try '=')"));
                }
            }
            (category.to_string(), name.to_string(), None, None)
        };

        let cp = format!("{category}/{name}");
        Ok(Atom {
            blocker,
            op,
            category,
            name,
            version,
            slot,
            use_dep,
            repo,
            cp,
            unevaluated: None,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `category/name` key.
    pub fn cp(&self) -> &str {
        &self.cp
    }

    pub fn op(&self) -> Option<Op> {
        self.op
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn blocker(&self) -> Option<Blocker> {
        self.blocker
    }

    pub fn is_blocker(&self) -> bool {
        self.blocker.is_some()
    }

    pub fn slot_dep(&self) -> Option<&SlotDep> {
        self.slot.as_ref()
    }

    pub fn use_dep(&self) -> Option<&UseDep> {
        self.use_dep.as_ref()
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    /// True when the cp key contains wildcard segments.
    pub fn is_wildcard(&self) -> bool {
        self.category.contains('*') || self.name.contains('*')
    }

    /// The atom as written before any conditional evaluation.
    pub fn unevaluated(&self) -> &Atom {
        self.unevaluated.as_deref().unwrap_or(self)
    }

    /// The same atom without USE constraints.
    pub fn without_use(&self) -> Atom {
        let mut atom = self.clone();
        atom.use_dep = None;
        atom.unevaluated = None;
        atom
    }

    /// Resolve conditional USE constraints against the requesting
    /// package's enabled flags, remembering the unevaluated form.
    pub fn evaluate_conditionals(&self, parent_use: &BTreeSet<String>) -> Atom {
        let use_dep = match &self.use_dep {
            Some(u) if u.has_conditionals() => u,
            _ => return self.clone(),
        };
        let mut atom = self.clone();
        atom.use_dep = Some(use_dep.evaluate(parent_use));
        atom.unevaluated = Some(Box::new(self.unevaluated().clone()));
        atom
    }

    /// Strip constraints `other_use` already satisfies; what remains is the
    /// change the candidate (or the requesting package) would need.
    pub fn violated_conditionals(
        &self,
        other_use: &BTreeSet<String>,
        valid: &dyn Fn(&str) -> bool,
        parent_use: Option<&BTreeSet<String>>,
    ) -> Atom {
        let use_dep = match &self.use_dep {
            Some(u) => u,
            None => return self.clone(),
        };
        let mut atom = self.clone();
        atom.use_dep = Some(use_dep.violated(other_use, valid, parent_use));
        atom.unevaluated = Some(Box::new(self.unevaluated().clone()));
        atom
    }

    /// Conservative intersection test: atoms that differ in cp, operator,
    /// version, or USE constraints are reported as disjoint even though a
    /// real intersection may exist.
    pub fn intersects(&self, other: &Atom) -> bool {
        if self == other {
            return true;
        }
        if self.cp != other.cp
            || self.use_dep != other.use_dep
            || self.op != other.op
            || self.version != other.version
        {
            return false;
        }
        match (&self.slot, &other.slot) {
            (Some(a), Some(b)) => a.slot.is_none() || b.slot.is_none() || a.slot == b.slot,
            _ => true,
        }
    }
}

impl serde::Serialize for Atom {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.blocker == other.blocker
            && self.op == other.op
            && self.cp == other.cp
            && self.version == other.version
            && self.slot == other.slot
            && self.use_dep == other.use_dep
            && self.repo == other.repo
    }
}

impl Eq for Atom {}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.blocker {
            Some(Blocker::Weak) => f.write_str("!")?,
            Some(Blocker::Strong) => f.write_str("!!")?,
            None => {}
        }
        let op = match self.op {
            Some(Op::Eq) | Some(Op::EqGlob) => "=",
            Some(Op::Approx) => "~",
            Some(Op::Less) => "<",
            Some(Op::LessEq) => "<=",
            Some(Op::Greater) => ">",
            Some(Op::GreaterEq) => ">=",
            None => "",
        };
        f.write_str(op)?;
        f.write_str(&self.cp)?;
        if let Some(version) = &self.version {
            write!(f, "-{version}")?;
            if self.op == Some(Op::EqGlob) {
                f.write_str("*")?;
            }
        }
        if let Some(slot) = &self.slot {
            f.write_str(":")?;
            if let Some(s) = &slot.slot {
                f.write_str(s)?;
                if let Some(sub) = &slot.sub_slot {
                    write!(f, "/{sub}")?;
                }
            }
            match slot.op {
                Some(SlotOp::Rebuild) => f.write_str("=")?,
                Some(SlotOp::Any) => f.write_str("*")?,
                None => {}
            }
        }
        if let Some(repo) = &self.repo {
            write!(f, "::{repo}")?;
        }
        if let Some(use_dep) = &self.use_dep {
            write!(f, "{use_dep}")?;
        }
        Ok(())
    }
}

fn parse_slot_dep(spec: &str, atom: &str, format: SpecVersion) -> HearthResult<SlotDep> {
    let err = |reason: &str| HearthError::malformed_atom(atom, reason);
    let operators = format.supports_slot_operators();
    match spec {
        "" => Err(err("empty slot restriction")),
        "=" if operators => Ok(SlotDep {
            slot: None,
            sub_slot: None,
            op: Some(SlotOp::Rebuild),
        }),
        "*" if operators => Ok(SlotDep {
            slot: None,
            sub_slot: None,
            op: Some(SlotOp::Any),
        }),
        "=" | "*" => Err(err("slot operators are not allowed in this format")),
        _ => {
            let (spec, op) = match spec.strip_suffix('=') {
                Some(s) => {
                    if !operators {
                        return Err(err("slot operators are not allowed in this format"));
                    }
                    (s, Some(SlotOp::Rebuild))
                }
                None => (spec, None),
            };
            let (slot, sub_slot) = match spec.split_once('/') {
                Some((s, sub)) => {
                    if !operators {
                        return Err(err("sub-slots are not allowed in this format"));
                    }
                    (s, Some(sub))
                }
                None => (spec, None),
            };
            if !valid_slot_name(slot) || !sub_slot.map_or(true, valid_slot_name) {
                return Err(err("invalid slot name"));
            }
            Ok(SlotDep {
                slot: Some(slot.to_string()),
                sub_slot: sub_slot.map(str::to_string),
                op,
            })
        }
    }
}

fn valid_repo_name(repo: &str) -> bool {
    let mut chars = repo.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

fn validate_wildcard_segment(segment: &str) -> Result<(), &'static str> {
    if segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-' | '*'))
    {
        Ok(())
    } else {
        Err("invalid character in wildcard key")
    }
}
