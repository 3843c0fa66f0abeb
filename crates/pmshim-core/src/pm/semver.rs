//! npm-flavoured semver ranges.
//!
//! Wraps the `semver` crate with the npm syntax package manager pins use
//! (OR ranges, hyphen ranges, x-ranges, space-separated comparators, bare
//! exact versions) and adds the two extra operations resolution needs:
//! relaxed matching, where prerelease tags are ignored on both sides, and
//! range intersection.

use super::error::PmError;
use regex_lite::Regex;
use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::sync::OnceLock;

/// A parsed npm version range: a union of comparator sets.
#[derive(Debug, Clone)]
pub struct Range {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Range {
    /// Parse an npm range such as `^1.2.0`, `>=2 <4`, `1.x || 3.0.0`.
    ///
    /// # Errors
    /// Returns `PM_SPEC_INVALID` if no alternative parses.
    pub fn parse(raw: &str) -> Result<Self, PmError> {
        let mut alternatives = Vec::new();
        for alt in raw.split("||").map(str::trim) {
            if alt.is_empty() && raw.contains("||") {
                continue;
            }
            alternatives.push(parse_single(alt).map_err(|e| {
                PmError::spec_invalid(format!("Invalid version range '{raw}': {e}"))
            })?);
        }

        if alternatives.is_empty() {
            return Err(PmError::spec_invalid(format!(
                "Invalid version range '{raw}': no valid alternatives"
            )));
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            alternatives,
        })
    }

    /// The range as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Standard semver satisfaction: prereleases only match comparators that
    /// name the same `major.minor.patch` with a prerelease.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Satisfaction with prerelease tags stripped from the candidate and from
    /// every comparator, so `2.2.0-rc.1` satisfies `^2.0.0` and `*`.
    #[must_use]
    pub fn matches_relaxed(&self, version: &Version) -> bool {
        let stripped = Version {
            pre: Prerelease::EMPTY,
            ..version.clone()
        };
        self.alternatives
            .iter()
            .any(|req| strip_prerelease(req).matches(&stripped))
    }

    /// Whether some version could satisfy both ranges.
    #[must_use]
    pub fn intersects(&self, other: &Range) -> bool {
        self.alternatives.iter().any(|a| {
            let a = Interval::of_req(a);
            other
                .alternatives
                .iter()
                .any(|b| !a.intersect(&Interval::of_req(b)).is_empty())
        })
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether a range string is a literal tag name such as `latest` or `canary`.
#[must_use]
pub fn is_tag(range: &str) -> bool {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new("^[a-z-]+$").expect("static regex"))
        .is_match(range)
}

/// Strict satisfaction on raw strings; unparseable input never satisfies.
#[must_use]
pub fn satisfies(version: &str, range: &str) -> bool {
    match (Version::parse(version), Range::parse(range)) {
        (Ok(v), Ok(r)) => r.matches(&v),
        _ => false,
    }
}

/// Relaxed satisfaction on raw strings; unparseable input never satisfies.
#[must_use]
pub fn satisfies_relaxed(version: &str, range: &str) -> bool {
    match (Version::parse(version), Range::parse(range)) {
        (Ok(v), Ok(r)) => r.matches_relaxed(&v),
        _ => false,
    }
}

/// Highest version from `candidates` satisfying `range`.
///
/// `relaxed` only changes the filter; the maximum is always taken with true
/// semver ordering, prereleases included.
pub fn max_satisfying<'a, I>(candidates: I, range: &Range, relaxed: bool) -> Option<Version>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| {
            if relaxed {
                range.matches_relaxed(v)
            } else {
                range.matches(v)
            }
        })
        .max()
}

fn strip_prerelease(req: &VersionReq) -> VersionReq {
    VersionReq {
        comparators: req
            .comparators
            .iter()
            .map(|c| Comparator {
                pre: Prerelease::EMPTY,
                ..c.clone()
            })
            .collect(),
    }
}

/// Parse a single comparator set, handling npm-specific syntax.
fn parse_single(range: &str) -> Result<VersionReq, semver::Error> {
    let range = range.trim();

    if range.is_empty() || range == "*" || range == "x" || range == "X" {
        return Ok(VersionReq::STAR);
    }

    // "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = parse_hyphen_range(range) {
        return VersionReq::parse(&format!(">={start}, <={end}"));
    }

    if has_x_component(range) {
        return VersionReq::parse(&convert_x_range(range));
    }

    let converted = convert_space_separated_comparators(range);
    VersionReq::parse(&exact_bare_versions(&converted))
}

fn parse_hyphen_range(range: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = range.split(" - ").collect();
    if parts.len() == 2 {
        let start = parts[0].trim();
        let end = parts[1].trim();
        if !start.is_empty() && !end.is_empty() {
            return Some((start.to_string(), end.to_string()));
        }
    }
    None
}

/// npm allows `>= 2.1.2 < 3.0.0` meaning `>=2.1.2 AND <3.0.0`;
/// the `semver` crate wants `>=2.1.2, <3.0.0`.
fn convert_space_separated_comparators(range: &str) -> String {
    let mut result = String::new();
    let mut need_comma = false;

    for token in range.split_whitespace() {
        if token_has_version(token) {
            if need_comma {
                result.push_str(", ");
            }
            result.push_str(token);
            need_comma = true;
        } else {
            // Operator without version, glue to the next token
            if need_comma {
                result.push_str(", ");
                need_comma = false;
            }
            result.push_str(token);
        }
    }

    result
}

/// npm reads a bare `1.2.3` as `=1.2.3`; the `semver` crate would read `^1.2.3`.
fn exact_bare_versions(req: &str) -> String {
    req.split(',')
        .map(str::trim)
        .map(|c| {
            let c = c.strip_prefix('v').unwrap_or(c);
            if c.starts_with(|ch: char| ch.is_ascii_digit()) {
                format!("={c}")
            } else {
                c.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn token_has_version(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

/// Whether a wildcard appears in the numeric part of any comparator.
/// Prerelease and build identifiers such as `beta.x` do not count.
fn has_x_component(range: &str) -> bool {
    range.split_whitespace().any(|token| {
        let core = token.split(['-', '+']).next().unwrap_or(token);
        core.split('.').any(is_wildcard)
    })
}

fn convert_x_range(range: &str) -> String {
    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, "x" | "X" | "*"] | [major, "x" | "X" | "*", "x" | "X" | "*"] => {
            if let Ok(m) = major.parse::<u64>() {
                return match m.checked_add(1) {
                    Some(next) => format!(">={m}.0.0, <{next}.0.0"),
                    None => format!(">={m}.0.0"),
                };
            }
        }
        [major, minor, "x" | "X" | "*"] => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return match (n.checked_add(1), m.checked_add(1)) {
                    (Some(next), _) => format!(">={m}.{n}.0, <{m}.{next}.0"),
                    (None, Some(next)) => format!(">={m}.{n}.0, <{next}.0.0"),
                    (None, None) => format!(">={m}.{n}.0"),
                };
            }
        }
        _ => {}
    }

    parts
        .iter()
        .map(|part| if is_wildcard(part) { "0" } else { part })
        .collect::<Vec<_>>()
        .join(".")
}

/// Closed/open interval of versions covered by a comparator set.
#[derive(Debug, Clone)]
struct Interval {
    lower: Bound<Version>,
    upper: Bound<Version>,
}

impl Interval {
    const FULL: Self = Self {
        lower: Bound::Unbounded,
        upper: Bound::Unbounded,
    };

    fn of_req(req: &VersionReq) -> Self {
        req.comparators
            .iter()
            .fold(Self::FULL, |acc, c| acc.intersect(&Self::of_comparator(c)))
    }

    fn of_comparator(c: &Comparator) -> Self {
        use Bound::{Excluded, Included, Unbounded};

        let major = c.major;
        let minor = c.minor.unwrap_or(0);
        let patch = c.patch.unwrap_or(0);
        let base = Version {
            pre: c.pre.clone(),
            ..Version::new(major, minor, patch)
        };
        // `None` past the largest representable version
        let next_major = major.checked_add(1).map(|m| Version::new(m, 0, 0));
        let next_minor = minor
            .checked_add(1)
            .map(|n| Version::new(major, n, 0))
            .or_else(|| next_major.clone());
        let below = |v: Option<Version>| v.map_or(Unbounded, Excluded);

        // Upper bound of the partial version `c` taken as a whole (`1.2` = 1.2.x)
        let partial_end = match (c.minor, c.patch) {
            (None, _) => below(next_major.clone()),
            (Some(_), None) => below(next_minor.clone()),
            (Some(_), Some(_)) => Included(base.clone()),
        };

        match c.op {
            Op::Exact | Op::Wildcard => Self {
                lower: Included(base),
                upper: partial_end,
            },
            Op::Greater => Self {
                lower: match partial_end {
                    Included(v) => Excluded(v),
                    Excluded(v) => Included(v),
                    Unbounded => Unbounded,
                },
                upper: Unbounded,
            },
            Op::GreaterEq => Self {
                lower: Included(base),
                upper: Unbounded,
            },
            Op::Less => Self {
                lower: Unbounded,
                upper: Excluded(base),
            },
            Op::LessEq => Self {
                lower: Unbounded,
                upper: partial_end,
            },
            Op::Tilde => Self {
                lower: Included(base),
                upper: if c.minor.is_some() {
                    below(next_minor)
                } else {
                    below(next_major)
                },
            },
            Op::Caret => {
                let upper = match (major, c.minor, c.patch) {
                    (0, Some(0), Some(p)) => p
                        .checked_add(1)
                        .map(|p| Version::new(0, 0, p))
                        .or(next_minor),
                    (0, Some(_), _) => next_minor,
                    _ => next_major,
                };
                Self {
                    lower: Included(base),
                    upper: below(upper),
                }
            }
            _ => Self::FULL,
        }
    }

    fn intersect(&self, other: &Self) -> Self {
        Self {
            lower: max_lower(&self.lower, &other.lower),
            upper: min_upper(&self.upper, &other.upper),
        }
    }

    fn is_empty(&self) -> bool {
        use Bound::{Excluded, Included, Unbounded};

        match (&self.lower, &self.upper) {
            (Unbounded, _) | (_, Unbounded) => false,
            (Included(l), Included(u)) => l > u,
            (Included(l) | Excluded(l), Excluded(u)) | (Excluded(l), Included(u)) => l >= u,
        }
    }
}

fn max_lower(a: &Bound<Version>, b: &Bound<Version>) -> Bound<Version> {
    use Bound::{Excluded, Included, Unbounded};

    match (a, b) {
        (Unbounded, x) | (x, Unbounded) => x.clone(),
        (Included(x) | Excluded(x), Included(y) | Excluded(y)) => match x.cmp(y) {
            Ordering::Greater => a.clone(),
            Ordering::Less => b.clone(),
            Ordering::Equal if matches!(a, Excluded(_)) => a.clone(),
            Ordering::Equal => b.clone(),
        },
    }
}

fn min_upper(a: &Bound<Version>, b: &Bound<Version>) -> Bound<Version> {
    use Bound::{Excluded, Included, Unbounded};

    match (a, b) {
        (Unbounded, x) | (x, Unbounded) => x.clone(),
        (Included(x) | Excluded(x), Included(y) | Excluded(y)) => match x.cmp(y) {
            Ordering::Less => a.clone(),
            Ordering::Greater => b.clone(),
            Ordering::Equal if matches!(a, Excluded(_)) => a.clone(),
            Ordering::Equal => b.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::error::codes;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> Range {
        Range::parse(s).unwrap()
    }

    #[test]
    fn test_bare_version_is_exact() {
        assert!(r("3.2.0").matches(&v("3.2.0")));
        assert!(!r("3.2.0").matches(&v("3.2.1")));
    }

    #[test]
    fn test_partial_bare_version_is_x_range() {
        assert!(r("8").matches(&v("8.15.1")));
        assert!(!r("8").matches(&v("9.0.0")));
    }

    #[test]
    fn test_caret_and_tilde() {
        assert!(r("^2.0.0").matches(&v("2.9.1")));
        assert!(!r("^2.0.0").matches(&v("3.0.0")));
        assert!(r("~1.22.0").matches(&v("1.22.19")));
        assert!(!r("~1.22.0").matches(&v("1.23.0")));
    }

    #[test]
    fn test_star_and_x_ranges() {
        assert!(r("*").matches(&v("0.0.1")));
        assert!(r("").matches(&v("10.0.0")));
        assert!(r("1.x").matches(&v("1.9.9")));
        assert!(!r("1.x").matches(&v("2.0.0")));
        assert!(r("1.2.x").matches(&v("1.2.7")));
    }

    #[test]
    fn test_prerelease_with_x_letter_is_not_x_range() {
        assert!(r("3.0.0-next.1").matches(&v("3.0.0-next.1")));
        assert!(!r("3.0.0-next.1").matches(&v("3.0.0")));
    }

    #[test]
    fn test_wildcard_prerelease_identifier_is_not_x_range() {
        let range = r("1.2.3-beta.x");
        assert!(range.matches(&v("1.2.3-beta.x")));
        assert!(!range.matches(&v("1.2.3-beta.0")));
        assert!(!range.matches(&v("1.2.3")));
    }

    #[test]
    fn test_largest_components_do_not_overflow() {
        let max = u64::MAX;

        assert!(r(&format!("{max}.x")).matches(&v(&format!("{max}.4.0"))));
        assert!(r(&format!("1.{max}.x")).matches(&v(&format!("1.{max}.2"))));
        assert!(r(&format!("^{max}.0.0")).matches(&v(&format!("{max}.1.0"))));
        assert!(r(&format!("^0.{max}.0")).matches(&v(&format!("0.{max}.3"))));
        assert!(r(&format!("^0.0.{max}")).matches(&v(&format!("0.0.{max}"))));
        assert!(r(&format!("~{max}.{max}.0")).matches(&v(&format!("{max}.{max}.9"))));

        // Interval bounds take the same path
        assert!(r(&format!("^{max}.0.0")).intersects(&r(&format!(">={max}.2.0"))));
        assert!(r(&format!("{max}")).intersects(&r(&format!("{max}.1.1"))));
        assert!(!r(&format!("^{max}.0.0")).intersects(&r("<1.0.0")));
    }

    #[test]
    fn test_or_ranges() {
        let range = r("^1.0.0 || ^3.0.0");
        assert!(range.matches(&v("1.5.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(range.matches(&v("3.1.0")));
    }

    #[test]
    fn test_hyphen_and_space_separated() {
        assert!(r("1.0.0 - 2.0.0").matches(&v("2.0.0")));
        assert!(r(">= 2.1.2 < 3.0.0").matches(&v("2.5.0")));
        assert!(!r(">=2.1.2 <3.0.0").matches(&v("3.0.0")));
    }

    #[test]
    fn test_invalid_range() {
        let err = Range::parse("not a range").unwrap_err();
        assert_eq!(err.code(), codes::PM_SPEC_INVALID);
    }

    #[test]
    fn test_relaxed_accepts_prerelease_strict_rejects() {
        let pairs = [
            ("2.2.0-rc.1", "^2.0.0"),
            ("4.0.0-rc.42", "*"),
            ("1.0.0-beta.3", ">=0.5.0"),
            ("8.0.0-alpha.1", "8.x"),
        ];
        for (version, range) in pairs {
            assert!(
                satisfies_relaxed(version, range),
                "{version} should relaxed-satisfy {range}"
            );
            assert!(
                !satisfies(version, range),
                "{version} should not strictly satisfy {range}"
            );
        }
    }

    #[test]
    fn test_relaxed_still_respects_bounds() {
        assert!(!satisfies_relaxed("3.0.0-rc.1", "^2.0.0"));
        assert!(!satisfies_relaxed("1.9.0", "^2.0.0"));
        assert!(!satisfies_relaxed("garbage", "*"));
    }

    #[test]
    fn test_max_satisfying_uses_true_ordering() {
        let versions = ["2.0.0", "2.1.0", "2.2.0-rc.1"];
        let range = r("^2.0.0");
        assert_eq!(
            max_satisfying(versions, &range, true),
            Some(v("2.2.0-rc.1"))
        );
        assert_eq!(max_satisfying(versions, &range, false), Some(v("2.1.0")));
        assert_eq!(max_satisfying(["1.0.0"], &range, true), None);
    }

    #[test]
    fn test_is_tag() {
        assert!(is_tag("latest"));
        assert!(is_tag("next-major"));
        assert!(!is_tag("1.0.0"));
        assert!(!is_tag("^1"));
        assert!(!is_tag("Latest"));
        assert!(!is_tag(""));
    }

    #[test]
    fn test_intersects_disjoint_definition_ranges() {
        let old = r("<2.0.0");
        let new = r(">=2.0.0");
        assert!(!old.intersects(&new));
        assert!(r("^2.0.0").intersects(&new));
        assert!(!r("^2.0.0").intersects(&old));
        assert!(r("*").intersects(&old));
        assert!(r("*").intersects(&new));
    }

    #[test]
    fn test_intersects_exact_and_boundaries() {
        assert!(r("1.22.19").intersects(&r("<2.0.0")));
        assert!(!r("2.0.0").intersects(&r("<2.0.0")));
        assert!(r("2.0.0").intersects(&r(">=2.0.0")));
        assert!(!r(">1.2").intersects(&r("1.2.x")));
        assert!(r("~1.2.3").intersects(&r(">=1.2.9 <1.4")));
        assert!(!r("^0.0.3").intersects(&r(">=0.0.4")));
    }

    #[test]
    fn test_intersects_or_ranges() {
        assert!(r("^1 || ^5").intersects(&r(">=4.0.0")));
        assert!(!r("^1 || ^2").intersects(&r(">=4.0.0")));
    }
}
