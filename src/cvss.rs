//! CVSS v2 and v3 base score calculation

use crate::error::{AuditError, Result};
use crate::types::Severity;
use std::collections::HashMap;

/// A parsed CVSS base vector; the dialect is picked by the `CVSS:3` prefix
#[derive(Debug, Clone, PartialEq)]
pub enum CvssVector {
    V2(Cvss2),
    V3(Cvss3),
}

impl CvssVector {
    pub fn parse(vector: &str) -> Result<Self> {
        let vector = vector.trim();
        if vector.starts_with("CVSS:3") {
            Cvss3::parse(vector).map(Self::V3)
        } else {
            Cvss2::parse(vector).map(Self::V2)
        }
    }

    pub fn exploitability_score(&self) -> f64 {
        match self {
            Self::V2(v) => v.exploitability_score(),
            Self::V3(v) => v.exploitability_score(),
        }
    }

    pub fn impact_score(&self) -> f64 {
        match self {
            Self::V2(v) => v.impact_score(),
            Self::V3(v) => v.impact_score(),
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            Self::V2(v) => v.score(),
            Self::V3(v) => v.score(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::V2(v) => v.severity(),
            Self::V3(v) => v.severity(),
        }
    }
}

/// Split `AV:N/AC:L/...` into metric/value pairs, keeping only `wanted` keys
fn metrics<'a>(vector: &'a str, wanted: &[&str]) -> HashMap<&'a str, &'a str> {
    vector
        .split('/')
        .filter_map(|part| part.split_once(':'))
        .filter(|(key, _)| wanted.contains(key))
        .collect()
}

fn lookup(
    vector: &str,
    metrics: &HashMap<&str, &str>,
    key: &str,
    table: &[(&str, f64)],
) -> Result<f64> {
    let value = metrics
        .get(key)
        .ok_or_else(|| AuditError::cvss(vector, format!("missing metric '{}'", key)))?;
    table
        .iter()
        .find(|(k, _)| k == value)
        .map(|(_, weight)| *weight)
        .ok_or_else(|| AuditError::cvss(vector, format!("unknown value '{}' for metric '{}'", value, key)))
}

fn impact_subscore(c: f64, i: f64, a: f64) -> f64 {
    1.0 - ((1.0 - c) * (1.0 - i) * (1.0 - a))
}

/// Round half away from zero to one decimal
fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Smallest one-decimal number >= `value`, computed on integers to avoid
/// float artifacts (`7.000000001` rounds to 7.1, `7.0` stays 7.0)
fn round_up(value: f64) -> f64 {
    let scaled = (value * 100_000.0).round() as i64;
    if scaled % 10_000 == 0 {
        scaled as f64 / 100_000.0
    } else {
        ((scaled / 10_000) + 1) as f64 / 10.0
    }
}

const V2_ACCESS_VECTOR: &[(&str, f64)] = &[("N", 1.0), ("A", 0.646), ("L", 0.395)];
const V2_ACCESS_COMPLEXITY: &[(&str, f64)] = &[("L", 0.71), ("M", 0.61), ("H", 0.35)];
const V2_AUTHENTICATION: &[(&str, f64)] = &[("M", 0.45), ("S", 0.56), ("N", 0.704)];
const V2_IMPACT: &[(&str, f64)] = &[("N", 0.0), ("P", 0.275), ("C", 0.660)];

/// CVSS 2.0 base metrics, stored as weights
#[derive(Debug, Clone, PartialEq)]
pub struct Cvss2 {
    access_vector: f64,
    access_complexity: f64,
    authentication: f64,
    confidentiality: f64,
    integrity: f64,
    availability: f64,
}

impl Cvss2 {
    pub fn parse(vector: &str) -> Result<Self> {
        let m = metrics(vector.trim(), &["AV", "AC", "Au", "C", "I", "A"]);
        Ok(Self {
            access_vector: lookup(vector, &m, "AV", V2_ACCESS_VECTOR)?,
            access_complexity: lookup(vector, &m, "AC", V2_ACCESS_COMPLEXITY)?,
            authentication: lookup(vector, &m, "Au", V2_AUTHENTICATION)?,
            confidentiality: lookup(vector, &m, "C", V2_IMPACT)?,
            integrity: lookup(vector, &m, "I", V2_IMPACT)?,
            availability: lookup(vector, &m, "A", V2_IMPACT)?,
        })
    }

    pub fn exploitability_score(&self) -> f64 {
        20.0 * self.access_vector * self.access_complexity * self.authentication
    }

    pub fn impact_score(&self) -> f64 {
        10.41 * impact_subscore(self.confidentiality, self.integrity, self.availability)
    }

    pub fn score(&self) -> f64 {
        let impact = self.impact_score();
        if impact <= 0.0 {
            return 0.0;
        }
        round_one(1.176 * ((0.6 * impact) + (0.4 * self.exploitability_score()) - 1.5))
    }

    pub fn severity(&self) -> Severity {
        let score = self.score();
        if score < 0.001 {
            Severity::None
        } else if score < 4.0 {
            Severity::Low
        } else if score < 7.0 {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

/// Scope of a CVSS 3 vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Unchanged,
    Changed,
}

const V3_ATTACK_VECTOR: &[(&str, f64)] = &[("N", 0.85), ("A", 0.62), ("L", 0.55), ("P", 0.2)];
const V3_ATTACK_COMPLEXITY: &[(&str, f64)] = &[("L", 0.77), ("H", 0.44)];
const V3_PRIVILEGES_CHANGED: &[(&str, f64)] = &[("N", 0.85), ("L", 0.68), ("H", 0.50)];
const V3_PRIVILEGES_UNCHANGED: &[(&str, f64)] = &[("N", 0.85), ("L", 0.62), ("H", 0.27)];
const V3_USER_INTERACTION: &[(&str, f64)] = &[("N", 0.85), ("R", 0.62)];
const V3_IMPACT: &[(&str, f64)] = &[("H", 0.56), ("L", 0.22), ("N", 0.0)];

/// CVSS 3.x base metrics, stored as weights
#[derive(Debug, Clone, PartialEq)]
pub struct Cvss3 {
    scope: Scope,
    attack_vector: f64,
    attack_complexity: f64,
    privileges_required: f64,
    user_interaction: f64,
    confidentiality: f64,
    integrity: f64,
    availability: f64,
}

impl Cvss3 {
    pub fn parse(vector: &str) -> Result<Self> {
        let upper = vector.trim().to_uppercase();
        let m = metrics(&upper, &["AV", "AC", "PR", "UI", "S", "C", "I", "A"]);

        let scope = match m.get("S").copied() {
            Some("U") => Scope::Unchanged,
            Some("C") => Scope::Changed,
            Some(other) => {
                return Err(AuditError::cvss(vector, format!("unknown value '{}' for metric 'S'", other)))
            }
            None => return Err(AuditError::cvss(vector, "missing metric 'S'")),
        };
        let privileges = match scope {
            Scope::Changed => V3_PRIVILEGES_CHANGED,
            Scope::Unchanged => V3_PRIVILEGES_UNCHANGED,
        };

        Ok(Self {
            scope,
            attack_vector: lookup(vector, &m, "AV", V3_ATTACK_VECTOR)?,
            attack_complexity: lookup(vector, &m, "AC", V3_ATTACK_COMPLEXITY)?,
            privileges_required: lookup(vector, &m, "PR", privileges)?,
            user_interaction: lookup(vector, &m, "UI", V3_USER_INTERACTION)?,
            confidentiality: lookup(vector, &m, "C", V3_IMPACT)?,
            integrity: lookup(vector, &m, "I", V3_IMPACT)?,
            availability: lookup(vector, &m, "A", V3_IMPACT)?,
        })
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn exploitability_score(&self) -> f64 {
        8.22 * self.attack_vector * self.attack_complexity * self.privileges_required * self.user_interaction
    }

    pub fn impact_score(&self) -> f64 {
        let iss = impact_subscore(self.confidentiality, self.integrity, self.availability);
        match self.scope {
            Scope::Unchanged => 6.42 * iss,
            Scope::Changed => 7.52 * (iss - 0.029) - 3.25 * (iss - 0.02).powi(15),
        }
    }

    pub fn score(&self) -> f64 {
        let impact = self.impact_score();
        if impact <= 0.0 {
            return 0.0;
        }
        let raw = impact + self.exploitability_score();
        match self.scope {
            Scope::Unchanged => round_up(raw.min(10.0)),
            Scope::Changed => round_up((1.08 * raw).min(10.0)),
        }
    }

    pub fn severity(&self) -> Severity {
        let score = self.score();
        if score < 0.001 {
            Severity::None
        } else if score < 4.0 {
            Severity::Low
        } else if score < 7.0 {
            Severity::Medium
        } else if score < 9.0 {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round1(x: f64) -> f64 {
        (x * 10.0).round() / 10.0
    }

    #[test]
    fn test_cvss2_base_scores() {
        for (vector, impact, exploitability, score) in [
            ("AV:N/AC:L/Au:N/C:N/I:N/A:C", 6.9, 10.0, 7.8),
            ("AV:N/AC:L/Au:N/C:C/I:C/A:C", 10.0, 10.0, 10.0),
            ("AV:L/AC:H/Au:N/C:C/I:C/A:C", 10.0, 1.9, 6.2),
        ] {
            let cvss = CvssVector::parse(vector).unwrap();
            assert!(matches!(cvss, CvssVector::V2(_)));
            assert_eq!(round1(cvss.impact_score()), impact, "{}", vector);
            assert_eq!(round1(cvss.exploitability_score()), exploitability, "{}", vector);
            assert_eq!(cvss.score(), score, "{}", vector);
        }
    }

    #[test]
    fn test_score_and_severity() {
        for (vector, score, severity) in [
            ("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:N", 0.0, Severity::None),
            ("CVSS:3.0/AV:P/AC:H/PR:H/UI:R/S:U/C:L/I:N/A:N", 1.6, Severity::Low),
            ("CVSS:3.0/AV:P/AC:H/PR:L/UI:R/S:C/C:L/I:N/A:N", 1.9, Severity::Low),
            ("CVSS:3.0/AV:P/AC:L/PR:N/UI:N/S:U/C:L/I:N/A:N", 2.4, Severity::Low),
            ("CVSS:3.0/AV:N/AC:H/PR:H/UI:R/S:U/C:L/I:L/A:L", 3.9, Severity::Low),
            ("CVSS:3.0/AV:N/AC:H/PR:N/UI:N/S:C/C:L/I:N/A:N", 4.0, Severity::Medium),
            ("CVSS:3.0/AV:N/AC:L/PR:L/UI:R/S:C/C:L/I:N/A:N", 4.1, Severity::Medium),
            ("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:U/C:L/I:N/A:N", 5.3, Severity::Medium),
            ("CVSS:3.0/AV:N/AC:L/PR:L/UI:N/S:C/C:N/I:N/A:L", 5.0, Severity::Medium),
            ("CVSS:3.0/AV:P/AC:L/PR:N/UI:N/S:U/C:N/I:H/A:H", 6.1, Severity::Medium),
            ("CVSS:3.0/AV:N/AC:L/PR:H/UI:R/S:C/C:H/I:L/A:N", 6.9, Severity::Medium),
            ("CVSS:3.0/AV:N/AC:H/PR:N/UI:N/S:U/C:H/I:L/A:L", 7.0, Severity::High),
            ("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:U/C:N/I:N/A:H", 7.5, Severity::High),
            ("CVSS:3.0/AV:N/AC:L/PR:L/UI:R/S:C/C:H/I:H/A:H", 9.0, Severity::Critical),
            ("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H", 9.8, Severity::Critical),
            ("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H", 10.0, Severity::Critical),
            ("AV:L/AC:H/Au:M/C:N/I:N/A:N", 0.0, Severity::None),
            ("AV:A/AC:H/Au:N/C:N/I:N/A:N", 0.0, Severity::None),
            ("AV:L/AC:H/Au:M/C:P/I:P/A:N", 2.3, Severity::Low),
            ("AV:L/AC:H/Au:S/C:N/I:N/A:C", 3.8, Severity::Low),
            ("AV:N/AC:L/Au:S/C:N/I:N/A:P", 4.0, Severity::Medium),
            ("AV:L/AC:H/Au:N/C:C/I:C/A:C", 6.2, Severity::Medium),
            ("AV:A/AC:M/Au:M/C:C/I:C/A:C", 7.0, Severity::High),
            ("AV:N/AC:L/Au:N/C:N/I:N/A:C", 7.8, Severity::High),
            ("AV:N/AC:L/Au:N/C:C/I:C/A:C", 10.0, Severity::High),
        ] {
            let cvss = CvssVector::parse(vector).unwrap();
            assert_eq!(cvss.score(), score, "{}", vector);
            assert_eq!(cvss.severity(), severity, "{}", vector);
        }
    }

    #[test]
    fn test_scope_selects_impact_formula() {
        let unchanged = Cvss3::parse("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H").unwrap();
        let changed = Cvss3::parse("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H").unwrap();
        assert_eq!(unchanged.scope(), Scope::Unchanged);
        assert_eq!(changed.scope(), Scope::Changed);
        assert_ne!(unchanged.impact_score(), changed.impact_score());
        assert_ne!(unchanged.score(), changed.score());
    }

    #[test]
    fn test_round_up_is_ceiling() {
        assert_eq!(round_up(7.51), 7.6);
        assert_eq!(round_up(7.5), 7.5);
        assert_eq!(round_up(4.02), 4.1);
        assert_eq!(round_up(10.0), 10.0);
    }

    #[test]
    fn test_lowercase_v3_metrics_accepted() {
        let cvss = CvssVector::parse("CVSS:3.1/av:n/ac:l/pr:n/ui:n/s:u/c:h/i:h/a:h").unwrap();
        assert_eq!(cvss.score(), 9.8);
    }

    #[test]
    fn test_unknown_metrics_are_ignored() {
        let cvss = CvssVector::parse("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H/E:P/RL:O").unwrap();
        assert_eq!(cvss.score(), 9.8);
        let cvss = CvssVector::parse("AV:N/AC:L/Au:N/C:N/I:N/A:C/E:F/RL:OF").unwrap();
        assert_eq!(cvss.score(), 7.8);
    }

    #[test]
    fn test_missing_metric_fails() {
        let err = CvssVector::parse("AV:N/AC:L/C:N/I:N/A:C").unwrap_err();
        assert!(matches!(err, AuditError::InvalidCvss { .. }));
        assert!(err.to_string().contains("Au"));

        assert!(CvssVector::parse("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/C:H/I:H/A:H").is_err());
        assert!(CvssVector::parse("CVSS:3.0/AV:X/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H").is_err());
    }
}
