//! Version parsing and comparison for the hearth version grammar.
//!
//! A version is a dotted numeric part, an optional single trailing letter,
//! any number of underscore-separated suffix tokens, and an optional
//! revision: `2.1.3b_alpha4_p1-r2`. The ordering differs from semver:
//! - a missing dotted component sorts below an explicit one (`1.0.0` > `1.0`)
//! - components with leading zeros compare as decimal fractions
//!   (`1.02` < `1.1`)
//! - suffix tokens rank `alpha` < `beta` < `pre` < `rc` < release < `p`
//! - the revision breaks remaining ties

use std::cmp::Ordering;
use std::fmt;

use crate::error::{HearthError, HearthResult};

/// A parsed version with comparable components.
///
/// Parsing happens once, when a version string is first read out of a
/// package database; every later comparison works on the parsed form.
#[derive(Debug, Clone)]
pub struct Version {
    original: String,
    /// Dotted numeric components as written, so the leading-zero rule can
    /// be applied pairwise at comparison time.
    components: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<Suffix>,
    revision: u64,
}

/// Well-known suffix tokens with defined ordering.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SuffixKind {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

impl SuffixKind {
    fn rank(self) -> i8 {
        match self {
            SuffixKind::Alpha => -4,
            SuffixKind::Beta => -3,
            SuffixKind::Pre => -2,
            SuffixKind::Rc => -1,
            SuffixKind::P => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Suffix {
    kind: SuffixKind,
    number: Option<u64>,
}

impl Version {
    /// Parse a version string, failing on any grammar violation.
    pub fn parse(input: &str) -> HearthResult<Self> {
        let err = || HearthError::MalformedVersion {
            input: input.to_string(),
        };
        let mut rest = input;

        let mut components = Vec::new();
        let first = take_digits(&mut rest).ok_or_else(err)?;
        components.push(first.to_string());
        while let Some(stripped) = rest.strip_prefix('.') {
            rest = stripped;
            let comp = take_digits(&mut rest).ok_or_else(err)?;
            components.push(comp.to_string());
        }

        let mut letter = None;
        if let Some(ch) = rest.chars().next() {
            if ch.is_ascii_lowercase() {
                letter = Some(ch);
                rest = &rest[1..];
            }
        }

        let mut suffixes = Vec::new();
        while let Some(stripped) = rest.strip_prefix('_') {
            rest = stripped;
            let kind = if let Some(r) = rest.strip_prefix("alpha") {
                rest = r;
                SuffixKind::Alpha
            } else if let Some(r) = rest.strip_prefix("beta") {
                rest = r;
                SuffixKind::Beta
            } else if let Some(r) = rest.strip_prefix("pre") {
                rest = r;
                SuffixKind::Pre
            } else if let Some(r) = rest.strip_prefix("rc") {
                rest = r;
                SuffixKind::Rc
            } else if let Some(r) = rest.strip_prefix('p') {
                rest = r;
                SuffixKind::P
            } else {
                return Err(err());
            };
            let number = match take_digits(&mut rest) {
                Some(digits) => Some(digits.parse::<u64>().map_err(|_| err())?),
                None => None,
            };
            suffixes.push(Suffix { kind, number });
        }

        let mut revision = 0;
        if let Some(stripped) = rest.strip_prefix("-r") {
            rest = stripped;
            let digits = take_digits(&mut rest).ok_or_else(err)?;
            revision = digits.parse::<u64>().map_err(|_| err())?;
        }

        if !rest.is_empty() {
            return Err(err());
        }

        Ok(Version {
            original: input.to_string(),
            components,
            letter,
            suffixes,
            revision,
        })
    }

    /// The version exactly as it was parsed.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Compare ignoring the revision. This is the `~` operator's notion of
    /// equality.
    pub fn cmp_without_revision(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
    }

    fn cmp_parts(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let ord = cmp_component(
                self.components.get(i).map(String::as_str),
                other.components.get(i).map(String::as_str),
            );
            if ord != Ordering::Equal {
                return ord;
            }
        }

        // An absent letter sorts below any present one.
        let ord = match (self.letter, other.letter) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        };
        if ord != Ordering::Equal {
            return ord;
        }

        // An absent suffix behaves like `_p` with counter -1, so that
        // `1.0` < `1.0_p0` while `1.0_rc1` < `1.0`.
        let len = self.suffixes.len().max(other.suffixes.len());
        for i in 0..len {
            let (rank_a, num_a) = suffix_key(self.suffixes.get(i));
            let (rank_b, num_b) = suffix_key(other.suffixes.get(i));
            let ord = rank_a.cmp(&rank_b).then(num_a.cmp(&num_b));
            if ord != Ordering::Equal {
                return ord;
            }
        }

        Ordering::Equal
    }
}

fn suffix_key(suffix: Option<&Suffix>) -> (i8, i64) {
    match suffix {
        Some(s) => (s.kind.rank(), s.number.map_or(0, |n| n as i64)),
        None => (0, -1),
    }
}

/// Split a leading run of ASCII digits off `rest`.
fn take_digits<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let (digits, tail) = rest.split_at(end);
    *rest = tail;
    Some(digits)
}

/// Compare one pair of dotted components. A missing component counts as -1,
/// below any explicit value. When either side carries a leading zero, both
/// are right-padded with zeros to equal length so that `1.02` < `1.1`
/// instead of comparing numerically equal to `1.2`.
fn cmp_component(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            if a.starts_with('0') || b.starts_with('0') {
                let width = a.len().max(b.len());
                let pad = |s: &str| {
                    let mut s = s.to_string();
                    while s.len() < width {
                        s.push('0');
                    }
                    s
                };
                pad(a).cmp(&pad(b))
            } else {
                cmp_decimal(a, b)
            }
        }
    }
}

/// Numeric comparison of digit strings without parsing into a fixed-width
/// integer, so arbitrarily long components stay exact.
fn cmp_decimal(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Compare two raw version strings.
pub fn compare(a: &str, b: &str) -> HearthResult<Ordering> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// The highest of the given versions, or `None` for an empty input.
pub fn best<'a, I>(versions: I) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    versions.into_iter().max_by(|a, b| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn reflexive() {
        for s in ["1", "1.0", "2.1.3b", "1.0_alpha4", "1.0_p1-r2"] {
            assert_eq!(v(s).cmp(&v(s)), Ordering::Equal, "{s}");
        }
    }

    #[test]
    fn canonical_order() {
        let ordered = [
            "1.0_alpha1",
            "1.0_beta1",
            "1.0_pre2",
            "1.0_rc3",
            "1.0",
            "1.0-r1",
            "1.0_p1",
            "1.1",
        ];
        for pair in ordered.windows(2) {
            assert!(
                v(pair[0]) < v(pair[1]),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn antisymmetric_and_transitive() {
        let samples = ["1.0", "1.0.0", "1.02", "1.1", "2b", "2.0_rc1", "1.0-r3"];
        for a in &samples {
            for b in &samples {
                assert_eq!(v(a).cmp(&v(b)), v(b).cmp(&v(a)).reverse());
                for c in &samples {
                    if v(a) <= v(b) && v(b) <= v(c) {
                        assert!(v(a) <= v(c), "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn missing_component_sorts_lower() {
        assert!(v("1.0.0") > v("1.0"));
        assert!(v("1.0") < v("1.0.0"));
    }

    #[test]
    fn leading_zero_components() {
        assert!(v("1.02") < v("1.1"));
        assert!(v("1.2") > v("1.02"));
        assert_eq!(v("1.010").cmp(&v("1.01")), Ordering::Greater);
    }

    #[test]
    fn trailing_letter() {
        assert!(v("1.0a") < v("1.0b"));
        assert!(v("1.0") < v("1.0a"));
        // An explicit third component beats a letter on the second.
        assert!(v("12.2.5") > v("12.2b"));
    }

    #[test]
    fn suffix_counters() {
        assert!(v("1.0_alpha") < v("1.0_alpha1"));
        assert!(v("1.0_p") > v("1.0"));
        assert!(v("1.0_rc2") < v("1.0_rc10"));
        assert!(v("1.0_alpha1_beta2") < v("1.0_alpha1_rc1"));
    }

    #[test]
    fn revisions() {
        assert!(v("1.0") < v("1.0-r1"));
        assert!(v("1.0-r2") < v("1.0-r10"));
        assert_eq!(v("1.0").cmp(&v("1.0-r0")), Ordering::Equal);
        assert_eq!(v("1.0").cmp_without_revision(&v("1.0-r5")), Ordering::Equal);
    }

    #[test]
    fn rejects_bad_syntax() {
        for s in ["", "a.b", "1.", "1..2", "1.0_gamma", "1.0-r", "1.0rc1", "1.0_rc1x"] {
            assert!(Version::parse(s).is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn best_picks_highest() {
        let versions: Vec<Version> = ["1.0", "1.1", "1.0-r2"]
            .iter()
            .map(|s| v(s))
            .collect();
        assert_eq!(best(&versions).unwrap().as_str(), "1.1");
        assert!(best(std::iter::empty::<&Version>()).is_none());
    }

    #[test]
    fn compare_raw_strings() {
        assert_eq!(compare("1.0-r1", "1.2-r3").unwrap(), Ordering::Less);
        assert_eq!(compare("1.3", "1.2-r3").unwrap(), Ordering::Greater);
        assert_eq!(compare("1.0_p3", "1.0_p3").unwrap(), Ordering::Equal);
        assert!(compare("1.0", "not-a-version").is_err());
    }
}
