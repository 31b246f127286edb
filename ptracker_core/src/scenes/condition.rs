//! Ranked scene conditions and the classification scan.

use crate::error::{PtrackerError, PtrackerResult};
use crate::types::{AccessClass, ClassMask, Scene, ThroughputSnapshot};
use serde::{Deserialize, Serialize};

/// Upper bound meaning "no limit"
pub const UNBOUNDED_KBPS: u32 = u32::MAX;

/// Rate interval `[min, max)` (kbit/s) that qualifies a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCondition {
    pub scene: Scene,
    /// Classes summed for evaluation; `ClassMask::ALL` tests the combined rate
    pub class_mask: ClassMask,
    pub min_rate_kbps: u32,
    pub max_rate_kbps: u32,
}

impl SceneCondition {
    pub const fn combined(scene: Scene, min_rate_kbps: u32, max_rate_kbps: u32) -> Self {
        Self {
            scene,
            class_mask: ClassMask::ALL,
            min_rate_kbps,
            max_rate_kbps,
        }
    }

    pub const fn classes(scene: Scene, class_mask: ClassMask, min_rate_kbps: u32, max_rate_kbps: u32) -> Self {
        Self {
            scene,
            class_mask,
            min_rate_kbps,
            max_rate_kbps,
        }
    }

    /// Whether a rate in bits/s falls inside the interval
    pub fn matches(&self, rate_bps: u64) -> bool {
        let kbps = rate_bps / 1000;
        kbps >= u64::from(self.min_rate_kbps) && kbps < u64::from(self.max_rate_kbps)
    }
}

/// Default table, lowest rank first.
pub fn default_conditions() -> Vec<SceneCondition> {
    vec![
        SceneCondition::combined(Scene::Idle, 0, 1_000),
        SceneCondition::combined(Scene::Web, 1_000, 10_000),
        // total >= 10 Mbps and < 50 Mbps
        SceneCondition::combined(Scene::Streaming, 10_000, 50_000),
        // voice alone >= 1 Mbps
        SceneCondition::classes(Scene::LowLatency, AccessClass::Vo.bit(), 1_000, UNBOUNDED_KBPS),
        SceneCondition::combined(Scene::Throughput, 50_000, UNBOUNDED_KBPS),
    ]
}

/// Validated condition table. Index order is rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionTable {
    conditions: Vec<SceneCondition>,
}

impl ConditionTable {
    pub fn new(conditions: Vec<SceneCondition>) -> PtrackerResult<Self> {
        if conditions.is_empty() {
            return Err(PtrackerError::invalid_argument("condition table is empty"));
        }
        if conditions.len() > Scene::COUNT {
            return Err(PtrackerError::invalid_argument(format!(
                "condition table has {} entries, at most {} scenes exist",
                conditions.len(),
                Scene::COUNT
            )));
        }
        for pair in conditions.windows(2) {
            if pair[0].scene >= pair[1].scene {
                return Err(PtrackerError::invalid_argument(format!(
                    "conditions must be ordered by increasing rank: {} before {}",
                    pair[0].scene, pair[1].scene
                )));
            }
        }
        if let Some(bad) = conditions.iter().find(|c| c.min_rate_kbps >= c.max_rate_kbps) {
            return Err(PtrackerError::invalid_argument(format!(
                "condition for {} has an empty interval [{}, {})",
                bad.scene, bad.min_rate_kbps, bad.max_rate_kbps
            )));
        }
        if let Some(bad) = conditions.iter().find(|c| c.class_mask.0 & !ClassMask::ALL.0 != 0) {
            return Err(PtrackerError::invalid_argument(format!(
                "condition for {} selects unknown classes (mask {:#x})",
                bad.scene, bad.class_mask.0
            )));
        }
        Ok(Self { conditions })
    }

    pub fn conditions(&self) -> &[SceneCondition] {
        &self.conditions
    }

    /// Scan from highest rank to lowest and return the first qualifying
    /// scene with the rate that qualified it, or `None` if nothing matches.
    ///
    /// Class-masked conditions test the running tx+rx sum after each selected
    /// class, so a subset of classes can qualify on its own.
    pub fn classify(&self, snapshot: &ThroughputSnapshot) -> Option<(Scene, u64)> {
        for cond in self.conditions.iter().rev() {
            if cond.class_mask.is_all() {
                let rate = snapshot.combined_rate();
                if cond.matches(rate) {
                    return Some((cond.scene, rate));
                }
                continue;
            }

            let mut total: u64 = 0;
            for class in AccessClass::ALL {
                if !cond.class_mask.contains(class) {
                    continue;
                }
                total = total.saturating_add(snapshot.class_rate(class));
                if cond.matches(total) {
                    return Some((cond.scene, total));
                }
            }
        }
        None
    }
}

impl Default for ConditionTable {
    fn default() -> Self {
        Self {
            conditions: default_conditions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kbps(v: u64) -> u64 {
        v * 1000
    }

    #[test]
    fn test_interval_is_half_open() {
        let cond = SceneCondition::combined(Scene::Web, 1_000, 10_000);
        assert!(!cond.matches(kbps(999)));
        assert!(cond.matches(kbps(1_000)));
        assert!(cond.matches(kbps(9_999)));
        assert!(!cond.matches(kbps(10_000)));
        // sub-kbps remainder is dropped
        assert!(cond.matches(kbps(10_000) - 1));
    }

    #[test]
    fn test_default_table_classification() {
        let table = ConditionTable::default();
        let cases = [
            (500, Scene::Idle),
            (5_000, Scene::Web),
            (20_000, Scene::Streaming),
            (80_000, Scene::Throughput),
        ];
        for (rate, expected) in cases {
            let snap = ThroughputSnapshot::combined(kbps(rate));
            assert_eq!(table.classify(&snap).map(|(s, _)| s), Some(expected), "rate {rate}");
        }
    }

    #[test]
    fn test_voice_drives_low_latency() {
        let table = ConditionTable::default();
        let snap = ThroughputSnapshot::default()
            .with_class(AccessClass::Vo, kbps(600), kbps(600))
            .with_class(AccessClass::Be, kbps(2_000), 0);
        assert_eq!(table.classify(&snap), Some((Scene::LowLatency, kbps(1_200))));
    }

    #[test]
    fn test_highest_rank_wins_overlap() {
        // Throughput qualifies too, and outranks low latency
        let table = ConditionTable::default();
        let snap = ThroughputSnapshot::default()
            .with_class(AccessClass::Vo, kbps(2_000), 0)
            .with_class(AccessClass::Be, kbps(60_000), 0);
        assert_eq!(table.classify(&snap).map(|(s, _)| s), Some(Scene::Throughput));
    }

    #[test]
    fn test_running_sum_matches_before_all_classes() {
        let table = ConditionTable::new(vec![
            SceneCondition::combined(Scene::Idle, 0, 1_000),
            SceneCondition::classes(
                Scene::Streaming,
                AccessClass::Be.bit() | AccessClass::Vi.bit(),
                1_000,
                2_000,
            ),
        ])
        .unwrap();
        // BE alone qualifies; adding VI would overshoot the interval
        let snap = ThroughputSnapshot::default()
            .with_class(AccessClass::Be, kbps(1_500), 0)
            .with_class(AccessClass::Vi, kbps(5_000), 0);
        assert_eq!(table.classify(&snap), Some((Scene::Streaming, kbps(1_500))));
    }

    #[test]
    fn test_no_match_returns_none() {
        let table = ConditionTable::new(vec![SceneCondition::combined(Scene::Web, 1_000, 2_000)]).unwrap();
        assert_eq!(table.classify(&ThroughputSnapshot::combined(kbps(10))), None);
    }

    #[test]
    fn test_table_validation() {
        assert!(ConditionTable::new(vec![]).is_err());
        assert!(ConditionTable::new(vec![
            SceneCondition::combined(Scene::Web, 0, 10),
            SceneCondition::combined(Scene::Idle, 10, 20),
        ])
        .is_err());
        assert!(ConditionTable::new(vec![SceneCondition::combined(Scene::Idle, 5, 5)]).is_err());
        assert!(ConditionTable::new(vec![SceneCondition::classes(Scene::Idle, ClassMask(0x10), 0, 5)]).is_err());
        assert!(ConditionTable::new(default_conditions()).is_ok());
    }
}
