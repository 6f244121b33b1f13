//! Trust/risk state machine
//!
//! Pure decision logic over an item snapshot. Nothing here performs I/O; callers
//! persist whatever these functions change on the `ItemDoc`.
//!
//! ## Rules
//!
//! - Any critical flag makes an item `red`, whatever its score.
//! - Otherwise a score of at least [`GREEN_THRESHOLD`] is `green`, any other
//!   positive score is `yellow`, and an unset or zero score is `red`.
//! - `green` items are `active`; everything else is `pending`. Automated
//!   processing never produces `takedown`, only [`apply_admin_decision`] does,
//!   and it never lifts one either.
//! - `status_history` grows only when the status actually changes.

use bson::DateTime;
use std::collections::BTreeSet;

use crate::db::schemas::{Flag, ItemDoc, ItemStatus, RiskLevel, SignalBreakdown, StatusHistoryEntry};

/// Minimum score for a green rating
pub const GREEN_THRESHOLD: f64 = 0.8;

/// History reason recorded by the image/description worker
pub const IMAGE_ANALYSIS_REASON: &str = "Image-description AI analysis (auto)";

/// Outcome of the image/description matcher, as far as trust is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVerdict {
    /// Image and description disagree
    Mismatch,
    /// Image and description agree
    Match,
}

/// Step sizes applied to the trust score per verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustPolicy {
    /// Decrease on a mismatch
    pub mismatch_step: f64,
    /// Score for an unscored item on a mismatch
    pub mismatch_default: f64,
    /// Increase on a match
    pub match_step: f64,
    /// Score for an unscored item on a match
    pub match_default: f64,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            mismatch_step: 0.2,
            mismatch_default: 0.2,
            match_step: 0.1,
            match_default: 1.0,
        }
    }
}

impl TrustPolicy {
    /// Next raw (unclamped) score for a verdict
    pub fn adjusted_score(&self, current: Option<f64>, verdict: ImageVerdict) -> f64 {
        match (verdict, current) {
            (ImageVerdict::Mismatch, Some(score)) => score - self.mismatch_step,
            (ImageVerdict::Mismatch, None) => self.mismatch_default,
            (ImageVerdict::Match, Some(score)) => score + self.match_step,
            (ImageVerdict::Match, None) => self.match_default,
        }
    }
}

/// Administrative actions; the only path to `takedown`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminDecision {
    Approve,
    Takedown,
}

/// Decimal places kept on stored scores, so repeated steps land on the bands
const SCORE_SCALE: f64 = 1e9;

/// Clamp a score into [0, 1] and round off step drift. NaN collapses to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        (score.clamp(0.0, 1.0) * SCORE_SCALE).round() / SCORE_SCALE
    }
}

/// Derive the risk level from flags and score.
///
/// A score of exactly 0 is treated the same as no score at all.
pub fn compute_risk_level(flags: &BTreeSet<Flag>, score: Option<f64>) -> RiskLevel {
    if flags.iter().any(Flag::is_critical) {
        return RiskLevel::Red;
    }

    match score {
        Some(s) if s >= GREEN_THRESHOLD => RiskLevel::Green,
        Some(s) if s > 0.0 => RiskLevel::Yellow,
        _ => RiskLevel::Red,
    }
}

/// Map a risk level to the status automated processing may assign
pub fn compute_status(risk: RiskLevel) -> ItemStatus {
    match risk {
        RiskLevel::Green => ItemStatus::Active,
        RiskLevel::Yellow | RiskLevel::Red => ItemStatus::Pending,
    }
}

/// Set a new score and re-derive risk and status.
///
/// Appends a history entry when the status changes, or when the item has no
/// history yet so the first evaluation is always on record. Returns whether an
/// entry was appended.
pub fn apply_trust_update(item: &mut ItemDoc, new_score: f64, reason: &str, at: DateTime) -> bool {
    let score = clamp_score(new_score);
    item.trust_score = Some(score);
    item.risk_level = compute_risk_level(&item.flags, item.trust_score);

    if item.status == ItemStatus::Takedown {
        return false;
    }

    let next_status = compute_status(item.risk_level);
    if next_status == item.status && !item.status_history.is_empty() {
        return false;
    }

    item.status = next_status;
    record_transition(item, reason, at);
    true
}

/// Fold one matcher result into the item: breakdown, flag, score, status.
///
/// Returns whether a history entry was appended.
pub fn apply_image_verdict(
    item: &mut ItemDoc,
    verdict: ImageVerdict,
    raw_score: f64,
    policy: &TrustPolicy,
    at: DateTime,
) -> bool {
    item.signal_breakdown
        .set(SignalBreakdown::DESC_MATCH, clamp_score(raw_score));

    match verdict {
        ImageVerdict::Mismatch => {
            item.flags.insert(Flag::DescImageMismatch);
        }
        ImageVerdict::Match => {
            item.flags.remove(&Flag::DescImageMismatch);
        }
    }

    let next = policy.adjusted_score(item.trust_score, verdict);
    apply_trust_update(item, next, IMAGE_ANALYSIS_REASON, at)
}

/// Apply an administrator's approve/takedown decision.
///
/// Returns whether the status changed.
pub fn apply_admin_decision(
    item: &mut ItemDoc,
    decision: AdminDecision,
    reason: &str,
    at: DateTime,
) -> bool {
    let next_status = match decision {
        AdminDecision::Approve => ItemStatus::Active,
        AdminDecision::Takedown => ItemStatus::Takedown,
    };

    if next_status == item.status {
        return false;
    }

    item.status = next_status;
    record_transition(item, reason, at);
    true
}

fn record_transition(item: &mut ItemDoc, reason: &str, at: DateTime) {
    item.status_history.push(StatusHistoryEntry {
        status: item.status,
        changed_at: at,
        reason: reason.to_string(),
        flags: item.flags.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> ItemDoc {
        ItemDoc::new("Watch".into(), "Steel chronograph".into())
    }

    fn flags(list: &[Flag]) -> BTreeSet<Flag> {
        list.iter().cloned().collect()
    }

    fn score_grid() -> Vec<f64> {
        (0..=20).map(|i| f64::from(i) * 0.05).collect()
    }

    #[test]
    fn test_critical_flags_dominate_score() {
        for flag in Flag::CRITICAL {
            for score in score_grid() {
                assert_eq!(
                    compute_risk_level(&flags(&[flag.clone()]), Some(score)),
                    RiskLevel::Red,
                    "{} at {}",
                    flag,
                    score
                );
            }
            assert_eq!(compute_risk_level(&flags(&[flag]), Some(1.0)), RiskLevel::Red);
        }
    }

    #[test]
    fn test_non_critical_flags_do_not_affect_risk() {
        let set = flags(&[Flag::AiReviewBurst, Flag::Other("price_outlier".into())]);
        assert_eq!(compute_risk_level(&set, Some(0.9)), RiskLevel::Green);
    }

    #[test]
    fn test_score_bands() {
        let none = BTreeSet::new();
        assert_eq!(compute_risk_level(&none, Some(1.0)), RiskLevel::Green);
        assert_eq!(compute_risk_level(&none, Some(0.8)), RiskLevel::Green);
        assert_eq!(compute_risk_level(&none, Some(0.79)), RiskLevel::Yellow);
        assert_eq!(compute_risk_level(&none, Some(0.01)), RiskLevel::Yellow);
        assert_eq!(compute_risk_level(&none, None), RiskLevel::Red);
    }

    #[test]
    fn test_zero_score_is_red_like_unset() {
        let none = BTreeSet::new();
        assert_eq!(compute_risk_level(&none, Some(0.0)), RiskLevel::Red);
        assert_eq!(
            compute_risk_level(&none, Some(0.0)),
            compute_risk_level(&none, None)
        );
    }

    #[test]
    fn test_status_never_takedown() {
        for risk in [RiskLevel::Green, RiskLevel::Yellow, RiskLevel::Red] {
            assert_ne!(compute_status(risk), ItemStatus::Takedown);
        }
        assert_eq!(compute_status(RiskLevel::Green), ItemStatus::Active);
        assert_eq!(compute_status(RiskLevel::Red), ItemStatus::Pending);
    }

    #[test]
    fn test_clamping_law() {
        for raw in [-3.0, -0.2, 0.0, 0.5, 1.0, 1.1, 42.0, f64::NAN, f64::INFINITY] {
            let mut it = item();
            apply_trust_update(&mut it, raw, "test", DateTime::now());
            let score = it.trust_score.unwrap();
            assert!((0.0..=1.0).contains(&score), "{} produced {}", raw, score);
        }
    }

    #[test]
    fn test_first_evaluation_is_recorded() {
        let mut it = item();
        assert!(apply_trust_update(&mut it, 0.5, "first", DateTime::now()));
        assert_eq!(it.status, ItemStatus::Pending);
        assert_eq!(it.status_history.len(), 1);
        assert_eq!(it.status_history[0].reason, "first");
    }

    #[test]
    fn test_unchanged_status_is_not_logged() {
        let mut it = item();
        apply_trust_update(&mut it, 0.5, "first", DateTime::now());
        assert!(!apply_trust_update(&mut it, 0.6, "second", DateTime::now()));
        assert_eq!(it.status_history.len(), 1);
        assert_eq!(it.trust_score, Some(0.6));
    }

    #[test]
    fn test_status_change_is_logged_with_flags() {
        let mut it = item();
        apply_trust_update(&mut it, 0.5, "first", DateTime::now());
        it.flags.insert(Flag::AiReviewBurst);
        assert!(apply_trust_update(&mut it, 0.9, "promoted", DateTime::now()));
        assert_eq!(it.status, ItemStatus::Active);
        let last = it.status_history.last().unwrap();
        assert_eq!(last.status, ItemStatus::Active);
        assert!(last.flags.contains(&Flag::AiReviewBurst));
    }

    #[test]
    fn test_replayed_verdict_does_not_duplicate_history() {
        let policy = TrustPolicy::default();
        let mut it = item();
        apply_image_verdict(&mut it, ImageVerdict::Mismatch, 0.1, &policy, DateTime::now());
        apply_image_verdict(&mut it, ImageVerdict::Mismatch, 0.1, &policy, DateTime::now());
        assert_eq!(it.status_history.len(), 1);
        assert_eq!(it.trust_score, Some(0.0));
    }

    #[test]
    fn test_mismatch_then_match_scenario() {
        let policy = TrustPolicy::default();
        let mut it = item();

        apply_image_verdict(&mut it, ImageVerdict::Mismatch, 0.31, &policy, DateTime::now());
        assert_eq!(it.trust_score, Some(0.2));
        assert_eq!(it.risk_level, RiskLevel::Red);
        assert_eq!(it.status, ItemStatus::Pending);
        assert_eq!(it.status_history.len(), 1);
        assert!(it.has_flag(&Flag::DescImageMismatch));
        assert_eq!(it.signal_breakdown.get(SignalBreakdown::DESC_MATCH), Some(0.31));

        apply_image_verdict(&mut it, ImageVerdict::Match, 0.92, &policy, DateTime::now());
        assert_eq!(it.trust_score, Some(0.3));
        assert!(!it.has_flag(&Flag::DescImageMismatch));
        assert_eq!(it.risk_level, RiskLevel::Yellow);
        assert_eq!(it.status, ItemStatus::Pending);
        assert_eq!(it.status_history.len(), 1);
    }

    #[test]
    fn test_match_steps_reach_green_boundary() {
        let policy = TrustPolicy::default();
        let mut it = item();

        apply_image_verdict(&mut it, ImageVerdict::Mismatch, 0.2, &policy, DateTime::now());
        for _ in 0..5 {
            apply_image_verdict(&mut it, ImageVerdict::Match, 0.9, &policy, DateTime::now());
            assert_eq!(it.status, ItemStatus::Pending);
        }
        apply_image_verdict(&mut it, ImageVerdict::Match, 0.9, &policy, DateTime::now());

        assert_eq!(it.trust_score, Some(0.8));
        assert_eq!(it.risk_level, RiskLevel::Green);
        assert_eq!(it.status, ItemStatus::Active);
        assert_eq!(it.status_history.len(), 2);
    }

    #[test]
    fn test_clamp_rounds_step_drift() {
        assert_eq!(clamp_score(0.7 + 0.1), 0.8);
        assert_eq!(clamp_score(0.2 + 0.1), 0.3);
        assert_eq!(clamp_score(0.123456789012), 0.123456789);
    }

    #[test]
    fn test_match_on_unscored_item_activates() {
        let mut it = item();
        apply_image_verdict(&mut it, ImageVerdict::Match, 0.95, &TrustPolicy::default(), DateTime::now());
        assert_eq!(it.trust_score, Some(1.0));
        assert_eq!(it.status, ItemStatus::Active);
    }

    #[test]
    fn test_critical_flag_keeps_high_score_pending() {
        let mut it = item();
        it.flags.insert(Flag::SellerRisk);
        apply_trust_update(&mut it, 1.0, "scored", DateTime::now());
        assert_eq!(it.risk_level, RiskLevel::Red);
        assert_eq!(it.status, ItemStatus::Pending);
    }

    #[test]
    fn test_admin_takedown_and_approve() {
        let mut it = item();
        assert!(apply_admin_decision(&mut it, AdminDecision::Takedown, "counterfeit", DateTime::now()));
        assert_eq!(it.status, ItemStatus::Takedown);
        assert!(!apply_admin_decision(&mut it, AdminDecision::Takedown, "again", DateTime::now()));
        assert!(apply_admin_decision(&mut it, AdminDecision::Approve, "appeal", DateTime::now()));
        assert_eq!(it.status, ItemStatus::Active);
        assert_eq!(it.status_history.len(), 2);
    }

    #[test]
    fn test_automation_does_not_lift_takedown() {
        let mut it = item();
        apply_admin_decision(&mut it, AdminDecision::Takedown, "counterfeit", DateTime::now());
        assert!(!apply_image_verdict(
            &mut it,
            ImageVerdict::Match,
            0.99,
            &TrustPolicy::default(),
            DateTime::now()
        ));
        assert_eq!(it.status, ItemStatus::Takedown);
        assert_eq!(it.trust_score, Some(1.0));
        assert_eq!(it.risk_level, RiskLevel::Green);
        assert_eq!(it.status_history.len(), 1);
    }

    #[test]
    fn test_custom_policy_steps() {
        let policy = TrustPolicy {
            mismatch_step: 0.5,
            mismatch_default: 0.4,
            match_step: 0.25,
            match_default: 0.6,
        };
        assert_eq!(policy.adjusted_score(None, ImageVerdict::Mismatch), 0.4);
        assert_eq!(policy.adjusted_score(Some(0.5), ImageVerdict::Match), 0.75);
        assert_eq!(policy.adjusted_score(Some(0.5), ImageVerdict::Mismatch), 0.0);
    }
}
