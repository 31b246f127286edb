//! Shared value types: scenes, event reasons, traffic classes and throughput
//! snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Traffic scene, ranked by declaration order (`Idle` is rank 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    Idle,
    Web,
    Streaming,
    LowLatency,
    Throughput,
}

impl Scene {
    /// Number of scenes in the fixed taxonomy
    pub const COUNT: usize = 5;

    /// All scenes, lowest rank first
    pub const ALL: [Scene; Scene::COUNT] = [
        Scene::Idle,
        Scene::Web,
        Scene::Streaming,
        Scene::LowLatency,
        Scene::Throughput,
    ];

    pub fn rank(self) -> u32 {
        self as u32
    }

    pub fn from_rank(rank: u32) -> Option<Scene> {
        Scene::ALL.get(rank as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Scene::Idle => "idle",
            Scene::Web => "web",
            Scene::Streaming => "streaming",
            Scene::LowLatency => "low_latency",
            Scene::Throughput => "throughput",
        }
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event type carried on the notifier bus. Also stored as the trigger reason of
/// a transition and in consumer history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    ThroughputSample,
    SceneChange,
    SceneChangePrepare,
    Suspend,
    StationChange,
}

impl Reason {
    pub const ALL: [Reason; 5] = [
        Reason::ThroughputSample,
        Reason::SceneChange,
        Reason::SceneChangePrepare,
        Reason::Suspend,
        Reason::StationChange,
    ];

    /// Short label used in history output
    pub fn label(self) -> &'static str {
        match self {
            Reason::ThroughputSample => "tp",
            Reason::SceneChange => "scene_change",
            Reason::SceneChangePrepare => "scene_prep",
            Reason::Suspend => "suspend",
            Reason::StationChange => "sta_change",
        }
    }

    /// Exception trigger: may force a downward transition.
    pub fn is_exception(self) -> bool {
        matches!(self, Reason::Suspend)
    }

    /// Re-arms a transition even when the evaluated scene is unchanged.
    pub fn always_reevaluates(self) -> bool {
        matches!(self, Reason::StationChange)
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Reason> {
        Reason::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// WMM access category (traffic class), in accounting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessClass {
    /// Best effort
    Be,
    /// Background
    Bk,
    /// Video
    Vi,
    /// Voice
    Vo,
}

impl AccessClass {
    pub const COUNT: usize = 4;
    pub const ALL: [AccessClass; AccessClass::COUNT] =
        [AccessClass::Be, AccessClass::Bk, AccessClass::Vi, AccessClass::Vo];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> ClassMask {
        ClassMask(1 << self.index())
    }
}

/// Bitmask over access classes. `ClassMask::ALL` is the sentinel meaning
/// "use the precomputed combined rate".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMask(pub u8);

impl ClassMask {
    pub const ALL: ClassMask = ClassMask(0x0f);

    pub fn contains(self, class: AccessClass) -> bool {
        self.0 & class.bit().0 != 0
    }

    pub fn is_all(self) -> bool {
        self == ClassMask::ALL
    }
}

impl std::ops::BitOr for ClassMask {
    type Output = ClassMask;

    fn bitor(self, rhs: ClassMask) -> ClassMask {
        ClassMask(self.0 | rhs.0)
    }
}

/// Smoothed per-class throughput in bits/s plus the combined total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThroughputSnapshot {
    pub tx: [u64; AccessClass::COUNT],
    pub rx: [u64; AccessClass::COUNT],
    pub combined_tx: u64,
    pub combined_rx: u64,
}

impl ThroughputSnapshot {
    /// Snapshot where only the combined total is known (all counted as rx).
    pub fn combined(bps: u64) -> Self {
        Self {
            combined_rx: bps,
            ..Default::default()
        }
    }

    /// Set one class's rates and fold them into the combined total.
    pub fn with_class(mut self, class: AccessClass, tx_bps: u64, rx_bps: u64) -> Self {
        let i = class.index();
        self.combined_tx = self.combined_tx.saturating_sub(self.tx[i]).saturating_add(tx_bps);
        self.combined_rx = self.combined_rx.saturating_sub(self.rx[i]).saturating_add(rx_bps);
        self.tx[i] = tx_bps;
        self.rx[i] = rx_bps;
        self
    }

    pub fn combined_rate(&self) -> u64 {
        self.combined_tx.saturating_add(self.combined_rx)
    }

    pub fn class_rate(&self, class: AccessClass) -> u64 {
        let i = class.index();
        self.tx[i].saturating_add(self.rx[i])
    }
}

/// External throughput feed. Always available, no error channel.
pub trait ThroughputSource: Send + Sync {
    fn snapshot(&self) -> ThroughputSnapshot;
}

/// The transition message: last committed scene plus the in-flight transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneEvent {
    /// Last committed scene
    pub state: Scene,
    pub src: Scene,
    pub dst: Scene,
    /// Event that armed the transition
    pub reason: Reason,
    /// Rate (bits/s) that qualified `dst`
    pub rate: u64,
}

impl Default for SceneEvent {
    fn default() -> Self {
        Self {
            state: Scene::Idle,
            src: Scene::Idle,
            dst: Scene::Idle,
            reason: Reason::ThroughputSample,
            rate: 0,
        }
    }
}
