//! Version constraint engine
//!
//! Every advisory feed describes affected versions in its own dialect. All of
//! them are parsed at ingestion time into a [`VulnerableRangeSet`]: an ordered
//! union (OR) of [`VersionRange`]s, each an intersection (AND) of comparator
//! constraints. Evaluation has no knowledge of the originating feed.

use crate::error::{AuditError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// A PEP 440 version that keeps its textual form for display
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parsed: pep440_rs::Version,
}

impl Version {
    /// Original text of the version
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Leading numeric release segments (`1.2.3rc1` -> `[1, 2, 3]`)
    fn release(&self) -> Vec<u64> {
        release_segments(&self.raw)
    }
}

impl FromStr for Version {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let parsed = pep440_rs::Version::from_str(raw)
            .map_err(|_| AuditError::InvalidVersion(raw.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            parsed,
        })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed.cmp(&other.parsed)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn release_segments(raw: &str) -> Vec<u64> {
    let raw = raw.trim().trim_start_matches(['v', 'V']);
    let raw = raw.split_once('!').map(|(_, rest)| rest).unwrap_or(raw);
    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    raw[..end]
        .split('.')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Compare release segments, padding the shorter side with zeros
fn release_starts_with(candidate: &[u64], prefix: &[u64]) -> bool {
    prefix
        .iter()
        .enumerate()
        .all(|(i, p)| candidate.get(i).copied().unwrap_or(0) == *p)
}

/// Comparison operator of a single constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    Arbitrary,
}

impl Operator {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Compatible => "~=",
            Self::Arbitrary => "===",
        }
    }
}

/// One `(comparator, version)` pair
#[derive(Debug, Clone)]
pub struct Constraint {
    pub operator: Operator,
    pub version: Version,
    /// `==1.2.*` style prefix match
    pub wildcard: bool,
}

impl Constraint {
    pub fn new(operator: Operator, version: Version) -> Self {
        Self {
            operator,
            version,
            wildcard: false,
        }
    }

    /// Whether `candidate` satisfies this constraint
    pub fn allows(&self, candidate: &Version) -> bool {
        if self.wildcard {
            let matched = release_starts_with(&candidate.release(), &self.version.release());
            return match self.operator {
                Operator::NotEqual => !matched,
                _ => matched,
            };
        }

        match self.operator {
            Operator::Equal => candidate == &self.version,
            Operator::NotEqual => candidate != &self.version,
            Operator::Less => candidate < &self.version,
            Operator::LessEqual => candidate <= &self.version,
            Operator::Greater => candidate > &self.version,
            Operator::GreaterEqual => candidate >= &self.version,
            Operator::Compatible => {
                let release = self.version.release();
                let prefix = &release[..release.len().saturating_sub(1).max(1).min(release.len())];
                candidate >= &self.version && release_starts_with(&candidate.release(), prefix)
            }
            Operator::Arbitrary => candidate.as_str().eq_ignore_ascii_case(self.version.as_str()),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.symbol(), self.version)?;
        if self.wildcard {
            write!(f, ".*")?;
        }
        Ok(())
    }
}

/// A conjunction of constraints; all of them must hold
#[derive(Debug, Clone, Default)]
pub struct VersionRange {
    constraints: Vec<Constraint>,
}

impl VersionRange {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    /// A range without constraints, satisfied by every version
    pub fn any() -> Self {
        Self::default()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        self.constraints.iter().all(|c| c.allows(candidate))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self.constraints.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Range syntax used by an advisory feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDialect {
    /// `<1.11.27||>=2.2,<2.2.9||==3.0`
    Pep440,
    /// `>= 2.0.0, < 2.3.0` or `>=1.0 <2.0`, where `=` means exact match
    Npm,
    /// `1.0.1, 1.0.2`: every entry is an exact-match alternative
    Pinned,
}

impl RangeDialect {
    fn max_constraints(&self) -> usize {
        match self {
            Self::Pep440 | Self::Npm => 2,
            Self::Pinned => 1,
        }
    }
}

/// One event of an OSV `ranges[].events` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeEvent {
    Introduced(String),
    Fixed(String),
    LastAffected(String),
    Limit(String),
}

/// Ordered union of version ranges; a version is affected if any range matches
#[derive(Debug, Clone, Default)]
pub struct VulnerableRangeSet {
    ranges: Vec<VersionRange>,
}

impl VulnerableRangeSet {
    pub fn new(ranges: Vec<VersionRange>) -> Self {
        Self { ranges }
    }

    /// Matches every version
    pub fn all() -> Self {
        Self {
            ranges: vec![VersionRange::any()],
        }
    }

    /// Matches nothing
    pub fn withdrawn() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Parse a feed's range expression
    pub fn parse(expr: &str, dialect: RangeDialect) -> Result<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(Self::all());
        }

        if dialect == RangeDialect::Pinned {
            let ranges = tokenize(trimmed)
                .into_iter()
                .map(|token| parse_constraint(expr, &token, dialect).map(|c| VersionRange::new(vec![c])))
                .collect::<Result<Vec<_>>>()?;
            return Ok(if ranges.is_empty() { Self::all() } else { Self::new(ranges) });
        }

        let mut ranges = Vec::new();
        for alternative in trimmed.split("||") {
            let tokens = tokenize(alternative);
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() > dialect.max_constraints() {
                return Err(AuditError::range(
                    expr,
                    format!(
                        "{} comparators in '{}', at most {} supported",
                        tokens.len(),
                        alternative.trim(),
                        dialect.max_constraints()
                    ),
                ));
            }
            let constraints = tokens
                .iter()
                .map(|token| parse_constraint(expr, token, dialect))
                .collect::<Result<Vec<_>>>()?;
            ranges.push(VersionRange::new(constraints));
        }

        if ranges.is_empty() {
            return Ok(Self::all());
        }
        Ok(Self::new(ranges))
    }

    /// Exact-match alternatives for an enumerated version list
    pub fn pinned<S: AsRef<str>>(versions: &[S]) -> Result<Self> {
        let ranges = versions
            .iter()
            .map(|v| {
                let version = Version::from_str(v.as_ref())
                    .map_err(|_| AuditError::range(v.as_ref(), "invalid pinned version"))?;
                Ok(VersionRange::new(vec![Constraint::new(Operator::Equal, version)]))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(ranges))
    }

    /// Build ranges from an OSV event list
    ///
    /// `introduced` opens a range (`"0"` means no lower bound); `fixed` and
    /// `limit` close it exclusively, `last_affected` inclusively. A range left
    /// open at the end is unbounded above.
    pub fn from_events(events: &[RangeEvent]) -> Result<Self> {
        let parse = |v: &str| -> Result<Version> {
            Version::from_str(v).map_err(|_| AuditError::range(v, "invalid version in range event"))
        };

        let mut ranges = Vec::new();
        let mut lower: Option<Option<Constraint>> = None;

        for event in events {
            match event {
                RangeEvent::Introduced(v) => {
                    if let Some(open) = lower.take() {
                        ranges.push(VersionRange::new(open.into_iter().collect()));
                    }
                    let bound = if v.trim() == "0" {
                        None
                    } else {
                        Some(Constraint::new(Operator::GreaterEqual, parse(v)?))
                    };
                    lower = Some(bound);
                }
                RangeEvent::Fixed(v) | RangeEvent::Limit(v) | RangeEvent::LastAffected(v) => {
                    let operator = if matches!(event, RangeEvent::LastAffected(_)) {
                        Operator::LessEqual
                    } else {
                        Operator::Less
                    };
                    let mut constraints: Vec<Constraint> = lower.take().flatten().into_iter().collect();
                    constraints.push(Constraint::new(operator, parse(v)?));
                    ranges.push(VersionRange::new(constraints));
                }
            }
        }

        if let Some(open) = lower {
            ranges.push(VersionRange::new(open.into_iter().collect()));
        }

        Ok(Self::new(ranges))
    }

    /// Whether `candidate` satisfies every constraint of at least one range
    pub fn evaluate(&self, candidate: &Version) -> bool {
        self.ranges.iter().any(|r| r.matches(candidate))
    }

    /// Parse `version` and evaluate it; unparsable versions never match
    pub fn contains(&self, version: &str) -> bool {
        match Version::from_str(version) {
            Ok(candidate) => self.evaluate(&candidate),
            Err(_) => {
                warn!("Unable to parse version '{}', treating it as unaffected", version);
                false
            }
        }
    }

    /// Append the alternatives of another set
    pub fn extend(&mut self, other: VulnerableRangeSet) {
        self.ranges.extend(other.ranges);
    }
}

impl fmt::Display for VulnerableRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join("||"))
    }
}

const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!', '~', '^'];

/// Split one alternative into `op+version` tokens
///
/// Commas and whitespace both separate comparators; an operator standing
/// alone is joined with the version that follows it.
fn tokenize(alternative: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_operator: Option<String> = None;

    for piece in alternative
        .split(|c: char| c == ',' || c.is_whitespace() || c == '|')
        .filter(|p| !p.is_empty())
    {
        if piece.chars().all(|c| OPERATOR_CHARS.contains(&c)) {
            let op = pending_operator.get_or_insert_with(String::new);
            op.push_str(piece);
            continue;
        }
        match pending_operator.take() {
            Some(op) => tokens.push(format!("{}{}", op, piece)),
            None => tokens.push(piece.to_string()),
        }
    }

    if let Some(op) = pending_operator {
        tokens.push(op);
    }
    tokens
}

fn parse_constraint(expr: &str, token: &str, dialect: RangeDialect) -> Result<Constraint> {
    let split = token
        .find(|c: char| !OPERATOR_CHARS.contains(&c))
        .unwrap_or(token.len());
    let (symbol, version) = token.split_at(split);

    let operator = match (symbol, dialect) {
        ("", _) => Operator::Equal,
        (_, RangeDialect::Pinned) => {
            return Err(AuditError::range(expr, format!("comparator in pinned version '{}'", token)))
        }
        ("==", _) => Operator::Equal,
        ("=", RangeDialect::Npm) => Operator::Equal,
        ("!=", _) => Operator::NotEqual,
        ("<", _) => Operator::Less,
        ("<=", _) => Operator::LessEqual,
        (">", _) => Operator::Greater,
        (">=", _) => Operator::GreaterEqual,
        ("~=", RangeDialect::Pep440) => Operator::Compatible,
        ("===", RangeDialect::Pep440) => Operator::Arbitrary,
        _ => {
            return Err(AuditError::range(expr, format!("unsupported comparator '{}'", symbol)));
        }
    };

    let version = version.trim().trim_end_matches('.');
    if version.is_empty() {
        return Err(AuditError::range(expr, format!("comparator '{}' without version", symbol)));
    }

    let (version, wildcard) = match version.strip_suffix(".*") {
        Some(prefix) if matches!(operator, Operator::Equal | Operator::NotEqual) => (prefix, true),
        Some(_) => return Err(AuditError::range(expr, "wildcard only allowed with == and !=")),
        None => (version, false),
    };

    let version = Version::from_str(version)
        .map_err(|_| AuditError::range(expr, format!("invalid version '{}'", version)))?;

    Ok(Constraint {
        operator,
        version,
        wildcard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn test_union_of_ranges() {
        let set = VulnerableRangeSet::parse("<1.11.27||>=2.2,<2.2.9||==3.0", RangeDialect::Pep440).unwrap();
        assert_eq!(set.len(), 3);

        for (version, expected) in [
            ("1.11.26", true),
            ("0.11.26", true),
            ("0.1.6", true),
            ("2.2.8", true),
            ("2.2.9", false),
            ("3.0.0", true),
            ("3.0.1", false),
            ("3.2", false),
            ("4", false),
        ] {
            assert_eq!(set.contains(version), expected, "version {}", version);
        }
    }

    #[test]
    fn test_display_round_trips_expression() {
        let set = VulnerableRangeSet::parse("<1.11.27||>=2.2,<2.2.9||==3.0", RangeDialect::Pep440).unwrap();
        assert_eq!(set.to_string(), "<1.11.27||>=2.2,<2.2.9||==3.0");
    }

    #[test]
    fn test_empty_expression_matches_everything() {
        let set = VulnerableRangeSet::parse("", RangeDialect::Pep440).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("0.0.1"));
        assert!(set.contains("99.0"));
        assert!(set.contains("1.0a1"));
        assert_eq!(set.to_string(), "*");
    }

    #[test]
    fn test_withdrawn_matches_nothing() {
        let set = VulnerableRangeSet::withdrawn();
        assert!(set.is_empty());
        assert!(!set.contains("0.0.1"));
        assert!(!set.contains("1.0.0"));
    }

    #[test]
    fn test_npm_dialect_spaces_and_single_equals() {
        let set = VulnerableRangeSet::parse(">= 2.0.0, < 2.3.0", RangeDialect::Npm).unwrap();
        assert!(set.contains("2.2.9"));
        assert!(!set.contains("2.3.0"));

        let set = VulnerableRangeSet::parse(">=1.0 <2.0", RangeDialect::Npm).unwrap();
        assert!(set.contains("1.5"));
        assert!(!set.contains("2.0"));

        let set = VulnerableRangeSet::parse("= 1.0.0", RangeDialect::Npm).unwrap();
        assert!(set.contains("1.0"));
        assert!(!set.contains("1.0.1"));
    }

    #[test]
    fn test_stray_delimiters_and_bare_versions() {
        let set = VulnerableRangeSet::parse(",<2.2.,||", RangeDialect::Pep440).unwrap();
        assert_eq!(set.to_string(), "<2.2");
        assert!(set.contains("2.1.9"));
        assert!(!set.contains("2.2.0"));

        let set = VulnerableRangeSet::parse("1.0.0", RangeDialect::Pep440).unwrap();
        assert_eq!(set.to_string(), "==1.0.0");
    }

    #[test]
    fn test_too_many_comparators_fails() {
        let err = VulnerableRangeSet::parse(">=1.0,<2.0,!=1.5", RangeDialect::Pep440).unwrap_err();
        assert!(matches!(err, AuditError::InvalidRange { .. }));
    }

    #[test]
    fn test_unsupported_comparator_fails() {
        assert!(VulnerableRangeSet::parse("^1.2.0", RangeDialect::Npm).is_err());
        assert!(VulnerableRangeSet::parse("=1.2.0", RangeDialect::Pep440).is_err());
        assert!(VulnerableRangeSet::parse(">=", RangeDialect::Pep440).is_err());
    }

    #[test]
    fn test_pinned_dialect() {
        let set = VulnerableRangeSet::parse("1.11.26, 0.1.6 3.0", RangeDialect::Pinned).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("3.0.0"));
        assert!(!set.contains("3.0.1"));
        assert!(VulnerableRangeSet::parse("<1.0", RangeDialect::Pinned).is_err());
    }

    #[test]
    fn test_prereleases_are_eligible() {
        let set = VulnerableRangeSet::parse(">=2018.3.0rc1,<2019.2.0rc1", RangeDialect::Pep440).unwrap();
        assert!(set.contains("2018.3.0rc1"));
        assert!(set.contains("2018.3.0"));
        assert!(set.contains("2019.2.0b2"));
        assert!(!set.contains("2019.2.0rc1"));

        let set = VulnerableRangeSet::parse(">=1.0", RangeDialect::Pep440).unwrap();
        assert!(set.contains("1.1a1"));
    }

    #[test]
    fn test_events_introduced_and_fixed() {
        let set = VulnerableRangeSet::from_events(&[
            RangeEvent::Introduced("1.0.0".into()),
            RangeEvent::Fixed("1.1.0".into()),
        ])
        .unwrap();
        assert_eq!(set.to_string(), ">=1.0.0,<1.1.0");
        assert!(set.contains("1.0.0"));
        assert!(set.contains("1.0.20"));
        assert!(!set.contains("0.9.0"));
        assert!(!set.contains("1.1.0"));
        assert!(!set.contains("2.0.0"));
    }

    #[test]
    fn test_events_introduced_only_is_unbounded() {
        let set = VulnerableRangeSet::from_events(&[RangeEvent::Introduced("1.0.0".into())]).unwrap();
        assert_eq!(set.to_string(), ">=1.0.0");
        assert!(!set.contains("0.9"));
        assert!(set.contains("1.0"));
        assert!(set.contains("2.0.0"));
    }

    #[test]
    fn test_events_zero_introduced_and_multiple_ranges() {
        let set = VulnerableRangeSet::from_events(&[
            RangeEvent::Introduced("0".into()),
            RangeEvent::Fixed("2015.8.10".into()),
            RangeEvent::Introduced("2015.8.11".into()),
            RangeEvent::Fixed("2015.8.13".into()),
            RangeEvent::Introduced("3002".into()),
            RangeEvent::LastAffected("3002.2".into()),
        ])
        .unwrap();
        assert_eq!(
            set.to_string(),
            "<2015.8.10||>=2015.8.11,<2015.8.13||>=3002,<=3002.2"
        );
        assert!(set.contains("2014.1"));
        assert!(!set.contains("2015.8.10"));
        assert!(set.contains("2015.8.12"));
        assert!(set.contains("3002.2"));
        assert!(!set.contains("3002.3"));
    }

    #[test]
    fn test_compatible_release_and_wildcard() {
        let set = VulnerableRangeSet::parse("~=1.4.2", RangeDialect::Pep440).unwrap();
        assert!(set.contains("1.4.5"));
        assert!(!set.contains("1.5.0"));
        assert!(!set.contains("1.4.1"));

        let set = VulnerableRangeSet::parse("==1.2.*", RangeDialect::Pep440).unwrap();
        assert!(set.contains("1.2.9"));
        assert!(!set.contains("1.3.0"));
    }

    #[test]
    fn test_unparsable_candidate_is_unaffected() {
        let set = VulnerableRangeSet::all();
        assert!(!set.contains("not-a-version"));
    }

    #[test]
    fn test_version_ordering_pads_release() {
        assert_eq!(v("3.0"), v("3.0.0"));
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0.post1") > v("1.0"));
    }
}
