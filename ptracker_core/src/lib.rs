//! # Ptracker Core
//!
//! WLAN performance tracker: classifies live traffic into scenes and fans
//! scene transitions out to policy consumers.
//!
//! - **Scenes**: ranked throughput classifier with a two-phase transition worker
//! - **Notifier bus**: priority-ordered synchronous event delivery
//! - **History**: bounded circular log of fixed-size records
//! - **Dynamic TWT**: wake-time scheduling policy driven by scene changes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ptracker_core::{PerformanceTracker, Reason, ThroughputSnapshot, ThroughputSource, TrackerConfig};
//! use std::sync::Arc;
//!
//! struct Feed;
//!
//! impl ThroughputSource for Feed {
//!     fn snapshot(&self) -> ThroughputSnapshot {
//!         ThroughputSnapshot::combined(20_000_000)
//!     }
//! }
//!
//! let tracker = PerformanceTracker::new(TrackerConfig::default(), Arc::new(Feed)).unwrap();
//! tracker.client_event(Reason::ThroughputSample);
//! ```

pub mod client;
pub mod config;
pub mod dytwt;
pub mod error;
pub mod history;
pub mod notifier;
pub mod scenes;
pub mod tracker;
pub mod types;

// Re-export commonly used types for easy access
pub use client::{ClientRegistry, TwtCapability, TwtOps, TwtPowerState, TwtSetupParam};
pub use config::{FsmConfig, TrackerConfig, TwtConfig};
pub use dytwt::{DebugReply, DynamicTwt, TwtAction, TwtRecord, TwtTestAction};
pub use error::{PtrackerError, PtrackerResult};
pub use history::{HistoryLog, HistoryRecord, HistorySlot, HEADER_SIZE};
pub use notifier::{Notifier, NotifierBus, NotifyOutcome, ObserverHandler, SceneObserver};
pub use scenes::{ConditionTable, Phase, SceneCondition, SceneFsm};
pub use tracker::PerformanceTracker;
pub use types::{
    AccessClass, ClassMask, Reason, Scene, SceneEvent, ThroughputSnapshot, ThroughputSource,
};
