/*!
 * Target ordering and namespace health rules
 */

use crate::config::Thresholds;
use crate::model::Health;

/// Weight of the worst (and unrecognized) priority class
pub const WORST_CLASS_WEIGHT: i64 = 4;

/// Map a referral priority class to its weight, best (0) to worst (4)
///
/// Matching ignores case, `-` and `_`, so `GlobalHigh`, `global-high` and
/// `GLOBAL_HIGH` are the same class.
pub fn class_weight(priority_class: Option<&str>) -> i64 {
    let Some(class) = priority_class else {
        return WORST_CLASS_WEIGHT;
    };
    let normalized: String = class
        .chars()
        .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match normalized.as_str() {
        "globalhigh" => 0,
        "sitecosthigh" => 1,
        "sitecostnormal" => 2,
        "sitecostlow" => 3,
        _ => WORST_CLASS_WEIGHT,
    }
}

/// Whether a raw target state counts as enabled for referrals
///
/// An absent state is treated as enabled.
pub fn is_enabled_state(raw_state: Option<&str>) -> bool {
    match raw_state {
        None => true,
        Some(state) => matches!(
            state.trim().to_ascii_lowercase().as_str(),
            "online" | "enabled" | "active"
        ),
    }
}

/// Single sortable referral priority; higher is preferred
pub fn ordering_score(enabled: bool, class_weight: i64, priority_rank: i64) -> i64 {
    let base = if enabled { 100_000 } else { 0 };
    base + (5 - class_weight) * 1000 - priority_rank
}

pub fn namespace_health(unreachable_targets: usize, thresholds: &Thresholds) -> Health {
    Health::from_thresholds(
        unreachable_targets as u64,
        thresholds.warn_unreachable_targets as u64,
        thresholds.critical_unreachable_targets as u64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_examples() {
        assert_eq!(ordering_score(true, 0, 0), 105_000);
        assert_eq!(ordering_score(true, 0, 10), 104_990);
        assert_eq!(ordering_score(false, 0, 0), 5_000);
    }

    #[test]
    fn test_class_weights() {
        assert_eq!(class_weight(Some("GlobalHigh")), 0);
        assert_eq!(class_weight(Some("site-cost-high")), 1);
        assert_eq!(class_weight(Some("SITECOST_NORMAL")), 2);
        assert_eq!(class_weight(Some("SiteCostLow")), 3);
        assert_eq!(class_weight(Some("GlobalLow")), 4);
        assert_eq!(class_weight(Some("Invalid")), 4);
        assert_eq!(class_weight(None), 4);
    }

    #[test]
    fn test_enabled_states() {
        assert!(is_enabled_state(None));
        assert!(is_enabled_state(Some("Online")));
        assert!(is_enabled_state(Some("enabled")));
        assert!(!is_enabled_state(Some("Offline")));
    }

    #[test]
    fn test_namespace_health_thresholds() {
        let t = Thresholds::default();
        assert_eq!(namespace_health(0, &t), Health::Ok);
        assert_eq!(namespace_health(1, &t), Health::Warn);
        assert_eq!(namespace_health(2, &t), Health::Warn);
        assert_eq!(namespace_health(3, &t), Health::Critical);
    }
}
