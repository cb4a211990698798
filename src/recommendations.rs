//! Recommendations Module
//!
//! Turns a finished [`Summary`] into advisories: which DMARC policy the overall
//! pass rate supports, and which sources are failing badly enough to look at first.
use crate::models::{PolicyType, ReportInfo, Summary};
use crate::ranking::problem_sources;
use serde::Serialize;

/// Policy step the overall pass rate supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    /// At least 99% of messages pass: `p=reject` is within reach.
    Reject,
    /// At least 95%: `p=quarantine` can be applied.
    Quarantine,
    /// Below 95%: find out why before tightening anything.
    Investigate,
}

impl PolicyTier {
    /// Tier for `pass` passing messages out of `total`. The cut points are exact:
    /// 99.0% is already the reject tier and 95.0% the quarantine tier.
    pub fn from_counts(pass: u64, total: u64) -> Self {
        if total == 0 {
            return PolicyTier::Investigate;
        }
        let (pass, total) = (pass as u128 * 100, total as u128);
        if pass >= total * 99 {
            PolicyTier::Reject
        } else if pass >= total * 95 {
            PolicyTier::Quarantine
        } else {
            PolicyTier::Investigate
        }
    }

    /// The policy to move towards, if the tier supports one.
    pub fn target_policy(&self) -> Option<PolicyType> {
        match self {
            PolicyTier::Reject => Some(PolicyType::Reject),
            PolicyTier::Quarantine => Some(PolicyType::Quarantine),
            PolicyTier::Investigate => None,
        }
    }
}

/// A source flagged for frequent authentication failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemSource {
    pub source_ip: String,
    pub hostname: String,
    pub count: u64,
    pub both_pass: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    Policy { tier: PolicyTier, pass_rate: f64 },
    ProblemSources { sources: Vec<ProblemSource> },
}

impl Advisory {
    /// One-line description for the text report.
    pub fn headline(&self) -> String {
        match self {
            Advisory::Policy { tier: PolicyTier::Reject, .. } => {
                "Pass rate is 99% or higher. Moving to a reject policy can be considered.".into()
            }
            Advisory::Policy { tier: PolicyTier::Quarantine, .. } => {
                "Pass rate is 95% or higher. Applying a quarantine policy can be considered.".into()
            }
            Advisory::Policy { tier: PolicyTier::Investigate, .. } => {
                "Pass rate is below 95%. Investigate the failures before tightening the policy."
                    .into()
            }
            Advisory::ProblemSources { .. } => {
                "The following sources fail authentication frequently:".into()
            }
        }
    }
}

/// Overall SPF+DKIM pass rate as a percentage; 0 when nothing was reported.
pub fn overall_pass_rate(summary: &Summary) -> f64 {
    if summary.total_messages == 0 {
        0.0
    } else {
        summary.pass_count as f64 / summary.total_messages as f64 * 100.0
    }
}

/// Advisories for `summary`: always the policy tier, then any problem sources.
pub fn recommend(summary: &Summary) -> Vec<Advisory> {
    let mut advisories = vec![Advisory::Policy {
        tier: PolicyTier::from_counts(summary.pass_count, summary.total_messages),
        pass_rate: overall_pass_rate(summary),
    }];

    let flagged: Vec<ProblemSource> = problem_sources(summary)
        .into_iter()
        .map(|s| ProblemSource {
            source_ip: s.ip.to_string(),
            hostname: s.stats.hostname.clone(),
            count: s.stats.count,
            both_pass: s.stats.both_pass,
        })
        .collect();
    if !flagged.is_empty() {
        advisories.push(Advisory::ProblemSources { sources: flagged });
    }
    advisories
}

/// The `p=` published in the most recently folded report that states one.
pub fn published_policy(reports: &[ReportInfo]) -> Option<PolicyType> {
    reports
        .iter()
        .rev()
        .find_map(|r| r.policy.p.as_deref().and_then(|p| p.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PolicyInfo, ReportMetadata, SourceStats};

    fn summary(pass: u64, fail: u64) -> Summary {
        let mut summary = Summary {
            total_messages: pass + fail,
            pass_count: pass,
            fail_count: fail,
            ..Default::default()
        };
        let stats = summary
            .sources
            .entry_or_insert_with("192.0.2.1", || SourceStats::new("192.0.2.1"));
        stats.count = pass + fail;
        stats.spf_pass = pass;
        stats.dkim_pass = pass;
        stats.both_pass = pass;
        summary
    }

    fn tier(pass: u64, total: u64) -> PolicyTier {
        PolicyTier::from_counts(pass, total)
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(tier(99, 100), PolicyTier::Reject);
        assert_eq!(tier(100, 100), PolicyTier::Reject);
        assert_eq!(tier(989_999, 1_000_000), PolicyTier::Quarantine);
        assert_eq!(tier(95, 100), PolicyTier::Quarantine);
        assert_eq!(tier(949_999, 1_000_000), PolicyTier::Investigate);
        assert_eq!(tier(0, 0), PolicyTier::Investigate);
    }

    #[test]
    fn test_tier_targets() {
        assert_eq!(PolicyTier::Reject.target_policy(), Some(PolicyType::Reject));
        assert_eq!(PolicyTier::Quarantine.target_policy(), Some(PolicyType::Quarantine));
        assert_eq!(PolicyTier::Investigate.target_policy(), None);
    }

    #[test]
    fn test_two_thirds_pass_rate_needs_investigation() {
        let advisories = recommend(&summary(100, 50));
        match &advisories[0] {
            Advisory::Policy { tier, pass_rate } => {
                assert_eq!(*tier, PolicyTier::Investigate);
                assert!((pass_rate - 66.666).abs() < 0.01);
            }
            other => panic!("unexpected advisory {:?}", other),
        }
        // 150 messages, a third failing: not below the 50% problem ratio
        assert_eq!(advisories.len(), 1);
    }

    #[test]
    fn test_empty_summary() {
        let advisories = recommend(&Summary::default());
        assert_eq!(
            advisories,
            vec![Advisory::Policy { tier: PolicyTier::Investigate, pass_rate: 0.0 }]
        );
    }

    #[test]
    fn test_problem_source_advisory() {
        let advisories = recommend(&summary(4, 16));
        assert_eq!(advisories.len(), 2);
        assert_eq!(
            advisories[1],
            Advisory::ProblemSources {
                sources: vec![ProblemSource {
                    source_ip: "192.0.2.1".into(),
                    hostname: "192.0.2.1".into(),
                    count: 20,
                    both_pass: 4,
                }]
            }
        );
        assert!(advisories[1].headline().contains("fail authentication"));
    }

    #[test]
    fn test_published_policy_uses_latest_report() {
        let info = |p: Option<&str>| ReportInfo {
            source: "r.xml".into(),
            metadata: ReportMetadata::default(),
            policy: PolicyInfo { p: p.map(String::from), ..Default::default() },
            records: 0,
            messages: 0,
        };
        assert_eq!(published_policy(&[]), None);
        assert_eq!(
            published_policy(&[info(Some("none")), info(Some("quarantine")), info(None)]),
            Some(PolicyType::Quarantine)
        );
    }
}
