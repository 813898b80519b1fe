//! Quality tier table and stream selection rules.
//!
//! Tiers are the upstream `qn` codes: a fixed ordering where higher is
//! better, with some tiers gated behind an elevated (VIP) credential.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// An upstream quality tier code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityTier(pub u32);

/// The two 1080p60-class codes the upstream treats as interchangeable
/// high-framerate variants.
const HIGH_FRAMERATE_PAIR: (u32, u32) = (112, 116);

/// Highest tier code any endpoint understands. Negotiation always asks for
/// this and selects from whatever the upstream actually grants.
pub const TOP_TIER: QualityTier = QualityTier(127);

/// Default tier when the caller does not specify one.
pub const DEFAULT_TIER: QualityTier = QualityTier(80);

/// Fixed tier table, best first. (code, label, requires elevated credential)
const TIER_TABLE: &[(u32, &str, bool)] = &[
    (127, "8K 超高清", true),
    (126, "杜比视界", true),
    (125, "HDR 真彩", true),
    (120, "4K 超清", true),
    (116, "1080P60", true),
    (112, "1080P 高码率", true),
    (80, "1080P", false),
    (74, "720P60", false),
    (64, "720P", false),
    (32, "480P", false),
    (16, "360P", false),
];

/// Subset shown to clients in availability tables.
const DISPLAY_TIERS: &[u32] = &[120, 116, 112, 80, 64, 32, 16];

impl QualityTier {
    pub fn label(&self) -> String {
        TIER_TABLE
            .iter()
            .find(|(qn, _, _)| *qn == self.0)
            .map(|(_, label, _)| (*label).to_string())
            .unwrap_or_else(|| format!("清晰度 {}", self.0))
    }

    /// Whether this tier is gated behind an elevated credential.
    pub fn requires_elevated(&self) -> bool {
        TIER_TABLE
            .iter()
            .find(|(qn, _, _)| *qn == self.0)
            .map(|(_, _, vip)| *vip)
            .unwrap_or(self.0 > 80)
    }

    fn high_framerate_twin(&self) -> Option<QualityTier> {
        match self.0 {
            qn if qn == HIGH_FRAMERATE_PAIR.0 => Some(QualityTier(HIGH_FRAMERATE_PAIR.1)),
            qn if qn == HIGH_FRAMERATE_PAIR.1 => Some(QualityTier(HIGH_FRAMERATE_PAIR.0)),
            _ => None,
        }
    }
}

impl Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for QualityTier {
    fn from(qn: u32) -> Self {
        QualityTier(qn)
    }
}

/// One row of the derived availability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierAvailability {
    pub tier: QualityTier,
    pub label: String,
    pub requires_elevated: bool,
    pub exists: bool,
}

/// Pick the concrete tier to download given what the manifest offers.
///
/// Tie-break order: exact match; the interchangeable high-framerate twin;
/// the highest available tier at or below the request; the lowest available
/// tier when nothing lower exists. Returns `None` only for an empty slice.
pub fn select_tier(available: &[QualityTier], requested: QualityTier) -> Option<QualityTier> {
    if available.is_empty() {
        return None;
    }
    if available.contains(&requested) {
        return Some(requested);
    }
    if let Some(twin) = requested.high_framerate_twin()
        && available.contains(&twin)
    {
        return Some(twin);
    }
    available
        .iter()
        .filter(|qn| **qn <= requested)
        .max()
        .or_else(|| available.iter().min())
        .copied()
}

/// Derive the client-facing availability table from the set of tiers the
/// manifest actually contains.
///
/// Any tier present in the manifest exists. Non-gated tiers are assumed
/// always obtainable even when the upstream omits them from this particular
/// response, so every free tier is marked existing as well.
pub fn availability_table(present: &[QualityTier], requested_max: QualityTier) -> Vec<TierAvailability> {
    DISPLAY_TIERS
        .iter()
        .filter(|qn| **qn <= requested_max.0)
        .map(|&qn| {
            let tier = QualityTier(qn);
            let gated = tier.requires_elevated();
            TierAvailability {
                tier,
                label: tier.label(),
                requires_elevated: gated,
                exists: present.contains(&tier) || !gated,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tiers(qns: &[u32]) -> Vec<QualityTier> {
        qns.iter().copied().map(QualityTier).collect()
    }

    #[rstest]
    #[case(&[16, 32, 64, 80], 80, 80)] // exact
    #[case(&[16, 32, 64, 80], 120, 80)] // next lower, never an error
    #[case(&[16, 32, 64, 80], 112, 80)]
    #[case(&[112, 80], 116, 112)] // high-framerate twin beats downgrade
    #[case(&[116, 80], 112, 116)]
    #[case(&[64, 80], 32, 64)] // nothing lower exists: lowest available
    #[case(&[120, 116], 16, 116)]
    fn tier_selection(#[case] available: &[u32], #[case] requested: u32, #[case] expected: u32) {
        let picked = select_tier(&tiers(available), QualityTier(requested)).unwrap();
        assert_eq!(picked, QualityTier(expected));
    }

    #[test]
    fn tier_selection_empty() {
        assert_eq!(select_tier(&[], QualityTier(80)), None);
    }

    #[test]
    fn availability_marks_free_tiers_existing() {
        let table = availability_table(&tiers(&[16, 32, 64, 80]), QualityTier(120));
        for row in &table {
            if !row.requires_elevated {
                assert!(row.exists, "free tier {} must exist", row.tier);
            }
        }
        // Gated tiers absent from the manifest stay unavailable.
        let gated = table.iter().find(|r| r.tier == QualityTier(120)).unwrap();
        assert!(!gated.exists);
    }

    #[test]
    fn availability_includes_granted_gated_tier() {
        let table = availability_table(&tiers(&[80, 112, 116]), QualityTier(120));
        let hfr = table.iter().find(|r| r.tier == QualityTier(116)).unwrap();
        assert!(hfr.exists && hfr.requires_elevated);
    }

    #[test]
    fn availability_respects_requested_max() {
        let table = availability_table(&tiers(&[80]), QualityTier(80));
        assert!(table.iter().all(|r| r.tier <= QualityTier(80)));
    }

    #[test]
    fn labels_and_gating() {
        assert_eq!(QualityTier(80).label(), "1080P");
        assert!(!QualityTier(80).requires_elevated());
        assert!(QualityTier(120).requires_elevated());
        assert_eq!(QualityTier(999).label(), "清晰度 999");
    }
}
