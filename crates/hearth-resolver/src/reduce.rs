//! Dependency-expression reduction.
//!
//! Raw dependency strings use whitespace-separated tokens with three
//! structural forms: parenthesized groups, `|| ( ... )` disjunctions, and
//! `flag? ( ... )` conditionals. Reduction tokenizes the expression,
//! evaluates every conditional eagerly against a flag state (or treats all
//! of them as active in match-all mode), collapses redundant grouping, and
//! yields a typed requirement tree.
//!
//! Reduction is a pure function of its arguments: the same expression,
//! flag state, and options always produce the same tree.

use std::collections::BTreeSet;

use serde::Serialize;

use hearth_core::atom::{Atom, ParseOptions};
use hearth_core::error::{HearthError, HearthResult};
use hearth_core::format::SpecVersion;

/// A reduced requirement tree.
///
/// Disjunctions carry their branches as their own children, so the tree
/// has exactly one representation; flattening is a separate, explicit
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Dep<T> {
    Item(T),
    /// All children must be satisfied.
    AllOf(Vec<Dep<T>>),
    /// At least one child must be satisfied.
    AnyOf(Vec<Dep<T>>),
}

impl<T> Dep<T> {
    /// Collect every leaf in source order.
    pub fn items<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Dep::Item(item) => out.push(item),
            Dep::AllOf(children) | Dep::AnyOf(children) => {
                for child in children {
                    child.items(out);
                }
            }
        }
    }
}

/// Every leaf of a reduced tree, in source order.
pub fn flatten<T>(deps: &[Dep<T>]) -> Vec<&T> {
    let mut out = Vec::new();
    for dep in deps {
        dep.items(&mut out);
    }
    out
}

/// The flag state conditionals are evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum FlagState<'a> {
    /// Treat every conditional as active; used when the full token set of
    /// an expression is wanted regardless of configuration.
    MatchAll,
    /// Evaluate against a concrete enabled-flag set.
    Use(&'a BTreeSet<String>),
}

/// Options for one reduction.
#[derive(Debug, Clone, Copy)]
pub struct ReduceOptions<'a> {
    pub flags: FlagState<'a>,
    /// Flags that are always treated as disabled.
    pub masked: Option<&'a BTreeSet<String>>,
    /// Flags whose negated conditionals are always inactive.
    pub forced: Option<&'a BTreeSet<String>>,
    pub spec_version: SpecVersion,
    pub allow_wildcard: bool,
    pub allow_repo: bool,
}

impl<'a> ReduceOptions<'a> {
    pub fn match_all() -> Self {
        ReduceOptions {
            flags: FlagState::MatchAll,
            masked: None,
            forced: None,
            spec_version: SpecVersion::CURRENT,
            allow_wildcard: false,
            allow_repo: true,
        }
    }

    pub fn with_use(flags: &'a BTreeSet<String>) -> Self {
        ReduceOptions {
            flags: FlagState::Use(flags),
            ..Self::match_all()
        }
    }

    pub fn masked(mut self, masked: &'a BTreeSet<String>) -> Self {
        self.masked = Some(masked);
        self
    }

    pub fn forced(mut self, forced: &'a BTreeSet<String>) -> Self {
        self.forced = Some(forced);
        self
    }

    pub fn spec_version(mut self, spec: SpecVersion) -> Self {
        self.spec_version = spec;
        self
    }

    fn atom_options(&self) -> ParseOptions {
        ParseOptions {
            allow_wildcard: self.allow_wildcard,
            allow_repo: self.allow_repo,
            spec_version: self.spec_version,
        }
    }

    /// Decide whether a `flag?` / `!flag?` conditional is active. Forced
    /// and masked overrides are applied before the flag state itself.
    fn is_active(&self, conditional: &str) -> HearthResult<bool> {
        let (flag, negated) = match conditional.strip_prefix('!') {
            Some(rest) => (&rest[..rest.len() - 1], true),
            None => (&conditional[..conditional.len() - 1], false),
        };
        if flag.is_empty()
            || !flag.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
            || !flag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '@' | '-'))
        {
            return Err(HearthError::malformed_dep(format!(
                "invalid USE flag in conditional '{conditional}'"
            )));
        }
        if negated && self.forced.is_some_and(|s| s.contains(flag)) {
            return Ok(false);
        }
        if self.masked.is_some_and(|s| s.contains(flag)) {
            return Ok(negated);
        }
        match self.flags {
            FlagState::MatchAll => Ok(true),
            FlagState::Use(set) => Ok(set.contains(flag) != negated),
        }
    }
}

/// Reduce a dependency expression to a requirement tree.
pub fn reduce(expr: &str, opts: &ReduceOptions<'_>) -> HearthResult<Vec<Dep<Atom>>> {
    let mut parser = Parser {
        tokens: expr.split_whitespace().collect(),
        pos: 0,
        opts,
    };
    parser.parse_sequence(0)
}

/// Reduce and flatten to the leaf atoms, in source order.
pub fn reduce_flat(expr: &str, opts: &ReduceOptions<'_>) -> HearthResult<Vec<Atom>> {
    let deps = reduce(expr, opts)?;
    Ok(flatten(&deps).into_iter().cloned().collect())
}

struct Parser<'a, 'o> {
    tokens: Vec<&'a str>,
    pos: usize,
    opts: &'o ReduceOptions<'o>,
}

impl<'a> Parser<'a, '_> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<&'a str> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_open(&mut self, after: &str) -> HearthResult<()> {
        match self.bump() {
            Some("(") => Ok(()),
            Some(other) => Err(HearthError::malformed_dep(format!(
                "expected '(' after '{after}', got '{other}'"
            ))),
            None => Err(HearthError::malformed_dep(format!(
                "expected '(' after '{after}' at end of string"
            ))),
        }
    }

    fn check_token(&self, token: &str) -> HearthResult<()> {
        for glued in ["(", ")", "||"] {
            if token != glued && (token.starts_with(glued) || token.ends_with(glued)) {
                return Err(HearthError::malformed_dep(format!(
                    "missing whitespace around '{glued}' in '{token}'"
                )));
            }
        }
        Ok(())
    }

    fn parse_leaf(&self, token: &str) -> HearthResult<Atom> {
        self.check_token(token)?;
        let atom = Atom::parse(token, &self.opts.atom_options())?;
        Ok(match self.opts.flags {
            FlagState::MatchAll => atom,
            FlagState::Use(set) => atom.evaluate_conditionals(set),
        })
    }

    /// Parse a conjunctive sequence until `)` (at depth > 0) or the end of
    /// input. The closing `)` is left for the caller.
    fn parse_sequence(&mut self, depth: usize) -> HearthResult<Vec<Dep<Atom>>> {
        let mut out: Vec<Dep<Atom>> = Vec::new();
        while let Some(token) = self.peek() {
            match token {
                ")" => {
                    if depth == 0 {
                        return Err(HearthError::malformed_dep(format!(
                            "no matching '(' for ')' at token {}",
                            self.pos + 1
                        )));
                    }
                    return Ok(out);
                }
                "(" => {
                    self.bump();
                    // A plain nested group is the same conjunction.
                    out.extend(self.parse_group_body(depth + 1)?);
                }
                "||" => {
                    self.bump();
                    self.expect_open("||")?;
                    match self.parse_any_of(depth + 1)? {
                        // A single surviving conjunction branch dissolves
                        // into the parent sequence.
                        Some(Dep::AllOf(children)) => out.extend(children),
                        Some(node) => out.push(node),
                        None => {}
                    }
                }
                t if t.ends_with('?') => {
                    self.check_token(t)?;
                    self.bump();
                    let active = self.opts.is_active(t)?;
                    self.expect_open(t)?;
                    let children = self.parse_group_body(depth + 1)?;
                    if active {
                        out.extend(children);
                    }
                }
                _ => {
                    self.bump();
                    out.push(Dep::Item(self.parse_leaf(token)?));
                }
            }
        }
        if depth > 0 {
            return Err(HearthError::malformed_dep("missing ')' at end of string"));
        }
        Ok(out)
    }

    /// Parse a group body after its `(` and consume the closing `)`.
    /// A literally empty group is malformed; a group emptied by inactive
    /// conditionals yields an empty sequence.
    fn parse_group_body(&mut self, depth: usize) -> HearthResult<Vec<Dep<Atom>>> {
        if self.peek() == Some(")") {
            return Err(HearthError::malformed_dep(
                "expected dependency string, got ')'",
            ));
        }
        let children = self.parse_sequence(depth)?;
        match self.bump() {
            Some(")") => Ok(children),
            _ => Err(HearthError::malformed_dep("missing ')' at end of string")),
        }
    }

    /// Parse the branches of a disjunction after `|| (`, consuming the
    /// closing `)`. Returns `None` when every branch was dropped by an
    /// inactive conditional.
    fn parse_any_of(&mut self, depth: usize) -> HearthResult<Option<Dep<Atom>>> {
        if self.peek() == Some(")") {
            return Err(HearthError::malformed_dep("empty disjunction group"));
        }
        let mut branches: Vec<Dep<Atom>> = Vec::new();
        while let Some(token) = self.peek() {
            match token {
                ")" => {
                    self.bump();
                    return Ok(match branches.len() {
                        0 => None,
                        // || ( A ) is just A.
                        1 => Some(branches.pop().expect("len checked")),
                        _ => Some(Dep::AnyOf(branches)),
                    });
                }
                "(" => {
                    self.bump();
                    let children = self.parse_group_body(depth + 1)?;
                    push_branch(&mut branches, children);
                }
                "||" => {
                    // || ( A || ( B C ) ) is || ( A B C ).
                    self.bump();
                    self.expect_open("||")?;
                    match self.parse_any_of(depth + 1)? {
                        Some(Dep::AnyOf(inner)) => branches.extend(inner),
                        Some(node) => branches.push(node),
                        None => {}
                    }
                }
                t if t.ends_with('?') => {
                    self.check_token(t)?;
                    self.bump();
                    let active = self.opts.is_active(t)?;
                    self.expect_open(t)?;
                    let children = self.parse_group_body(depth + 1)?;
                    if active {
                        push_branch(&mut branches, children);
                    }
                }
                _ => {
                    self.bump();
                    branches.push(Dep::Item(self.parse_leaf(token)?));
                }
            }
        }
        Err(HearthError::malformed_dep("missing ')' at end of string"))
    }
}

/// Add a parsed group as one disjunction branch. A group that reduced to
/// a single disjunction contributes its alternatives directly.
fn push_branch(branches: &mut Vec<Dep<Atom>>, mut children: Vec<Dep<Atom>>) {
    match children.len() {
        0 => {}
        1 => match children.pop().expect("len checked") {
            Dep::AnyOf(inner) => branches.extend(inner),
            node => branches.push(node),
        },
        _ => branches.push(Dep::AllOf(children)),
    }
}

/// One entry of a reduced source-URI expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SrcUri {
    pub uri: String,
    /// Target file name given with the `->` rename operator.
    pub rename: Option<String>,
}

/// Reduce a source-URI expression. Disjunctions are not allowed here, and
/// the `->` operator must sit between a URI and a simple file name.
pub fn reduce_src_uri(expr: &str, opts: &ReduceOptions<'_>) -> HearthResult<Vec<SrcUri>> {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    let mut out = Vec::new();
    // Stack of conditional-activity states for enclosing groups.
    let mut active_stack: Vec<bool> = Vec::new();
    let mut pending: Option<&str> = None;
    let mut pos = 0;

    while pos < tokens.len() {
        let token = tokens[pos];
        pos += 1;
        match token {
            "||" => {
                return Err(HearthError::malformed_dep(
                    "disjunctions are not allowed in source-URI expressions",
                ));
            }
            "(" => {
                if let Some(uri) = pending.take() {
                    flush_uri(&mut out, uri, &active_stack);
                }
                active_stack.push(true);
            }
            ")" => {
                if let Some(uri) = pending.take() {
                    flush_uri(&mut out, uri, &active_stack);
                }
                if active_stack.pop().is_none() {
                    return Err(HearthError::malformed_dep("no matching '(' for ')'"));
                }
            }
            "->" => {
                let uri = pending.take().ok_or_else(|| {
                    HearthError::malformed_dep("'->' must follow a source URI")
                })?;
                if !opts.spec_version.supports_uri_renames() {
                    return Err(HearthError::malformed_dep(format!(
                        "'->' is not allowed in format {}",
                        opts.spec_version
                    )));
                }
                let name = match tokens.get(pos) {
                    Some(&name) if !matches!(name, "(" | ")" | "||" | "->") && !name.contains('/') => {
                        pos += 1;
                        name
                    }
                    _ => {
                        return Err(HearthError::malformed_dep(
                            "expected a file name after '->'",
                        ))
                    }
                };
                if active_stack.iter().all(|a| *a) {
                    out.push(SrcUri {
                        uri: uri.to_string(),
                        rename: Some(name.to_string()),
                    });
                }
            }
            t if t.ends_with('?') => {
                if let Some(uri) = pending.take() {
                    flush_uri(&mut out, uri, &active_stack);
                }
                let active = opts.is_active(t)?;
                match tokens.get(pos) {
                    Some(&"(") => pos += 1,
                    _ => {
                        return Err(HearthError::malformed_dep(format!(
                            "expected '(' after '{t}'"
                        )))
                    }
                }
                active_stack.push(active);
            }
            t => {
                if let Some(uri) = pending.take() {
                    flush_uri(&mut out, uri, &active_stack);
                }
                pending = Some(t);
            }
        }
    }
    if let Some(uri) = pending.take() {
        flush_uri(&mut out, uri, &active_stack);
    }
    if !active_stack.is_empty() {
        return Err(HearthError::malformed_dep("missing ')' at end of string"));
    }
    Ok(out)
}

fn flush_uri(out: &mut Vec<SrcUri>, uri: &str, active_stack: &[bool]) {
    if active_stack.iter().all(|a| *a) {
        out.push(SrcUri {
            uri: uri.to_string(),
            rename: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn atom(s: &str) -> Atom {
        Atom::new(s).unwrap()
    }

    fn names(deps: &[Dep<Atom>]) -> Vec<String> {
        flatten(deps).iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn conditional_selection() {
        let expr = "a? ( cat/one ) !a? ( cat/two )";
        let on = flags(&["a"]);
        let deps = reduce(expr, &ReduceOptions::with_use(&on)).unwrap();
        assert_eq!(deps, vec![Dep::Item(atom("cat/one"))]);

        let off = flags(&[]);
        let deps = reduce(expr, &ReduceOptions::with_use(&off)).unwrap();
        assert_eq!(deps, vec![Dep::Item(atom("cat/two"))]);
    }

    #[test]
    fn disjunction_node() {
        let off = flags(&[]);
        let deps = reduce("|| ( cat/a cat/b )", &ReduceOptions::with_use(&off)).unwrap();
        assert_eq!(
            deps,
            vec![Dep::AnyOf(vec![
                Dep::Item(atom("cat/a")),
                Dep::Item(atom("cat/b")),
            ])]
        );
    }

    #[test]
    fn structural_collapses() {
        let opts = ReduceOptions::match_all();
        // || ( A ) -> A
        assert_eq!(
            reduce("|| ( cat/a )", &opts).unwrap(),
            vec![Dep::Item(atom("cat/a"))]
        );
        // ( ( A B ) ) -> A B
        assert_eq!(
            reduce("( ( cat/a cat/b ) )", &opts).unwrap(),
            vec![Dep::Item(atom("cat/a")), Dep::Item(atom("cat/b"))]
        );
        // || ( A || ( B C ) ) -> || ( A B C )
        assert_eq!(
            reduce("|| ( cat/a || ( cat/b cat/c ) )", &opts).unwrap(),
            vec![Dep::AnyOf(vec![
                Dep::Item(atom("cat/a")),
                Dep::Item(atom("cat/b")),
                Dep::Item(atom("cat/c")),
            ])]
        );
        // || ( ( A B ) ) -> A B
        assert_eq!(
            reduce("|| ( ( cat/a cat/b ) )", &opts).unwrap(),
            vec![Dep::Item(atom("cat/a")), Dep::Item(atom("cat/b"))]
        );
    }

    #[test]
    fn disjunction_with_dropped_branches() {
        let off = flags(&[]);
        let opts = ReduceOptions::with_use(&off);
        // The conditional branch drops; a single branch remains.
        assert_eq!(
            reduce("|| ( a? ( cat/a ) cat/b )", &opts).unwrap(),
            vec![Dep::Item(atom("cat/b"))]
        );
        // Every branch drops; the disjunction collapses to nothing.
        assert_eq!(
            reduce("|| ( a? ( cat/a ) b? ( cat/b ) )", &opts).unwrap(),
            Vec::<Dep<Atom>>::new()
        );
    }

    #[test]
    fn conjunction_branch_keeps_grouping() {
        let opts = ReduceOptions::match_all();
        let deps = reduce("|| ( ( cat/a cat/b ) cat/c )", &opts).unwrap();
        assert_eq!(
            deps,
            vec![Dep::AnyOf(vec![
                Dep::AllOf(vec![Dep::Item(atom("cat/a")), Dep::Item(atom("cat/b"))]),
                Dep::Item(atom("cat/c")),
            ])]
        );
    }

    #[test]
    fn masked_and_forced_overrides() {
        let on = flags(&["a", "b"]);
        let masked = flags(&["a"]);
        let forced = flags(&["b"]);
        let opts = ReduceOptions::with_use(&on).masked(&masked).forced(&forced);

        // Masked flags count as disabled even when enabled.
        assert_eq!(
            names(&reduce("a? ( cat/one ) !a? ( cat/two )", &opts).unwrap()),
            ["cat/two"]
        );
        // Negated conditionals on forced flags are always inactive.
        assert_eq!(
            names(&reduce("!b? ( cat/three )", &opts).unwrap()),
            Vec::<String>::new()
        );
        // Forced overrides apply before masking under match-all too.
        let ma = ReduceOptions::match_all().masked(&masked).forced(&forced);
        assert_eq!(
            names(&reduce("a? ( cat/one ) !a? ( cat/two )", &ma).unwrap()),
            ["cat/two"]
        );
    }

    #[test]
    fn match_all_keeps_every_token() {
        let expr = "cat/a x? ( cat/b || ( cat/c cat/d ) ) !y? ( cat/e )";
        let deps = reduce(expr, &ReduceOptions::match_all()).unwrap();
        assert_eq!(names(&deps), ["cat/a", "cat/b", "cat/c", "cat/d", "cat/e"]);
        // Purity: a second run yields an identical tree.
        assert_eq!(deps, reduce(expr, &ReduceOptions::match_all()).unwrap());

        let flat = reduce_flat(expr, &ReduceOptions::match_all()).unwrap();
        assert_eq!(flat.len(), 5);
        assert_eq!(flat[0], atom("cat/a"));
    }

    #[test]
    fn conditional_evaluation_on_atom_use() {
        let on = flags(&["ssl"]);
        let deps = reduce("cat/a[ssl?]", &ReduceOptions::with_use(&on)).unwrap();
        assert_eq!(names(&deps), ["cat/a[ssl]"]);
        // Match-all leaves the conditional unevaluated.
        let deps = reduce("cat/a[ssl?]", &ReduceOptions::match_all()).unwrap();
        assert_eq!(names(&deps), ["cat/a[ssl?]"]);
    }

    #[test]
    fn malformed_expressions() {
        let opts = ReduceOptions::match_all();
        for expr in [
            "cat/a )",
            "( cat/a",
            "|| cat/a",
            "a? cat/b",
            "|| ( )",
            "( )",
            "a? ( )",
            "a? ( cat/b",
            "||",
            "a?",
            "x? ( cat/a )(",
        ] {
            assert!(reduce(expr, &opts).is_err(), "{expr:?} should fail");
        }
        // An invalid atom propagates its own error.
        assert!(matches!(
            reduce(">=cat/a", &opts),
            Err(HearthError::MalformedAtom { .. })
        ));
    }

    #[test]
    fn src_uri_reduction() {
        let on = flags(&["doc"]);
        let opts = ReduceOptions::with_use(&on);
        let uris = reduce_src_uri(
            "https://example.org/a-1.0.tar.gz doc? ( https://example.org/a-doc.tar.gz -> docs.tar.gz )",
            &opts,
        )
        .unwrap();
        assert_eq!(uris.len(), 2);
        assert_eq!(uris[0].uri, "https://example.org/a-1.0.tar.gz");
        assert_eq!(uris[0].rename, None);
        assert_eq!(uris[1].rename.as_deref(), Some("docs.tar.gz"));

        let off = flags(&[]);
        let uris = reduce_src_uri(
            "https://example.org/a-1.0.tar.gz doc? ( https://example.org/a-doc.tar.gz )",
            &ReduceOptions::with_use(&off),
        )
        .unwrap();
        assert_eq!(uris.len(), 1);
    }

    #[test]
    fn src_uri_misuse() {
        let opts = ReduceOptions::match_all();
        assert!(reduce_src_uri("|| ( u1 u2 )", &opts).is_err());
        assert!(reduce_src_uri("-> name", &opts).is_err());
        assert!(reduce_src_uri("uri ->", &opts).is_err());
        assert!(reduce_src_uri("uri -> dir/name", &opts).is_err());
        let old = ReduceOptions {
            spec_version: SpecVersion(1),
            ..ReduceOptions::match_all()
        };
        assert!(reduce_src_uri("uri -> name", &old).is_err());
    }
}
